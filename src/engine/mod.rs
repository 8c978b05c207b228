//! Node-tree execution engine.
//!
//! A conversation is a chain of [`Node`]s stored in a [`NodeTree`] arena.
//! Each node holds at most one message, a JSON data bag, a link to its
//! parent, and the [`ExecutionContext`] (service handles) it runs with.
//! Workflows take a node and return a new, linked node; a [`Flow`] folds a
//! sequence of workflows over a starting node.
//!
//! ```text
//!   root ──▶ user msg ──▶ search results ──▶ assistant msg
//!    │                                          │
//!    └──────────── thread(leaf) ◀───────────────┘
//!                 [system?, user, assistant]
//! ```
//!
//! ```rust
//! use threadloom::engine::NodeTree;
//! use threadloom::models::Message;
//!
//! let mut tree = NodeTree::new();
//! let root = tree.new_root();
//! let a = tree.add_user_message(root, "hello").unwrap();
//! let b = tree.add_assistant_message(a, "hi there").unwrap();
//! let thread = tree.thread(b).unwrap();
//! assert_eq!(thread, vec![Message::user("hello"), Message::assistant("hi there")]);
//! ```

mod context;
mod flow;
mod node;
mod persist;
mod tree;

pub use context::ExecutionContext;
pub use flow::{propagate, ErrorNode, ErrorWorkflow, Flow, Workflow};
pub use node::{DataBag, Node, NodeId};
pub use persist::{load_thread, store_thread};
pub use tree::{NodeTree, MEMORY_KEY};
