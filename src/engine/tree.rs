use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use super::{ExecutionContext, Node, NodeId};
use crate::error::EngineError;
use crate::models::{Message, Role};

/// Data key whose string value names a remembered message to inject into
/// the thread right before the node's own message.
pub const MEMORY_KEY: &str = "memory";

/// Arena owning every node of a workflow run.
///
/// The arena is also the introspection registry: every registered node can
/// be looked up by its [`NodeId`] for as long as the tree lives.
#[derive(Debug, Default)]
pub struct NodeTree {
    nodes: Vec<Node>,
    memory: HashMap<String, Message>,
}

impl NodeTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a root with no message, no data and no context.
    pub fn new_root(&mut self) -> NodeId {
        self.push(Node::named("root"), None)
    }

    /// Register a root whose descendants inherit `context`.
    pub fn new_root_with(&mut self, context: Arc<ExecutionContext>) -> NodeId {
        self.push(Node::named("root").with_context(context), None)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn get(&self, id: NodeId) -> Result<&Node, EngineError> {
        id.0.checked_sub(1)
            .and_then(|i| self.nodes.get(i as usize))
            .ok_or(EngineError::UnknownNode(id))
    }

    /// Every registered node, in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter()
    }

    pub fn children(&self, id: NodeId) -> impl Iterator<Item = &Node> {
        self.nodes.iter().filter(move |n| n.parent == Some(id))
    }

    /// `id` and then each ancestor up to the root.
    pub fn ancestry(&self, id: NodeId) -> Result<Vec<NodeId>, EngineError> {
        let mut chain = Vec::new();
        let mut cursor = Some(id);
        while let Some(current) = cursor {
            chain.push(current);
            cursor = self.get(current)?.parent;
        }
        Ok(chain)
    }

    /// The execution context a node runs with.
    pub fn context(&self, id: NodeId) -> Result<Arc<ExecutionContext>, EngineError> {
        self.get(id)?
            .context
            .clone()
            .ok_or(EngineError::MissingContext(id))
    }

    /// Register a detached node under `parent`.
    ///
    /// The child inherits the parent's context unless it brings its own.
    /// Registering a node twice is a bug in the caller.
    pub fn add_child(&mut self, parent: NodeId, mut child: Node) -> Result<NodeId, EngineError> {
        if let Some(id) = child.id {
            return Err(EngineError::AlreadyRegistered(id));
        }
        let parent_node = self.get(parent)?;
        if child.context.is_none() {
            child.context = parent_node.context.clone();
        }
        Ok(self.push(child, Some(parent)))
    }

    pub fn add_message(&mut self, parent: NodeId, message: Message) -> Result<NodeId, EngineError> {
        let node = Node::named(message.role.as_str()).with_message(message);
        self.add_child(parent, node)
    }

    pub fn add_system_message(
        &mut self,
        parent: NodeId,
        content: impl Into<String>,
    ) -> Result<NodeId, EngineError> {
        self.add_message(parent, Message::system(content))
    }

    pub fn add_user_message(
        &mut self,
        parent: NodeId,
        content: impl Into<String>,
    ) -> Result<NodeId, EngineError> {
        self.add_message(parent, Message::user(content))
    }

    pub fn add_assistant_message(
        &mut self,
        parent: NodeId,
        content: impl Into<String>,
    ) -> Result<NodeId, EngineError> {
        self.add_message(parent, Message::assistant(content))
    }

    /// Register a copy of `template` with the non-empty fields of
    /// `overrides` applied.
    ///
    /// `name`, `header`, message role and message content are overridden
    /// field by field; a non-empty `overrides.data` replaces the data bag
    /// wholesale. The copy hangs off `parent`, or off the template itself
    /// when no parent is given, and inherits that parent's context.
    pub fn clone_node(
        &mut self,
        template: NodeId,
        overrides: Node,
        parent: Option<NodeId>,
    ) -> Result<NodeId, EngineError> {
        let source = self.get(template)?;
        let mut copy = Node {
            name: source.name.clone(),
            header: source.header.clone(),
            message: source.message.clone(),
            data: source.data.clone(),
            ..Node::default()
        };

        if !overrides.name.is_empty() {
            copy.name = overrides.name;
        }
        if !overrides.header.is_empty() {
            copy.header = overrides.header;
        }
        if let Some(over) = overrides.message {
            match copy.message.as_mut() {
                Some(msg) => {
                    msg.role = over.role;
                    if !over.content.is_empty() {
                        msg.content = over.content;
                    }
                }
                None => copy.message = Some(over),
            }
        }
        if !overrides.data.is_empty() {
            copy.data = overrides.data;
        }
        copy.context = overrides.context;

        self.add_child(parent.unwrap_or(template), copy)
    }

    /// Re-parent `replacement` onto `current`'s parent and hand it
    /// `current`'s context.
    ///
    /// Both ids must already be registered in this tree; an unknown id is
    /// [`EngineError::UnknownNode`]. A detached node has to go through
    /// [`NodeTree::add_child`] first. Since `replacement` already has a
    /// parent, the only structural check is the cycle one.
    ///
    /// Fails with [`EngineError::WouldCycle`] when `replacement` is that
    /// parent or one of its ancestors. On success the old parent link of
    /// `replacement` is gone.
    pub fn hijack(&mut self, current: NodeId, replacement: NodeId) -> Result<(), EngineError> {
        let current_node = self.get(current)?;
        let new_parent = current_node.parent;
        let context = current_node.context.clone();
        self.get(replacement)?;

        if let Some(parent) = new_parent {
            if self.ancestry(parent)?.contains(&replacement) {
                return Err(EngineError::WouldCycle {
                    replacement,
                    parent,
                });
            }
        }

        let node = self.get_mut(replacement)?;
        node.parent = new_parent;
        node.context = context;
        debug!(%current, %replacement, "hijacked node");
        Ok(())
    }

    /// Store a message that nodes can pull into their thread via
    /// [`MEMORY_KEY`].
    pub fn remember(&mut self, key: impl Into<String>, message: Message) {
        self.memory.insert(key.into(), message);
    }

    pub fn memory(&self, key: &str) -> Option<&Message> {
        self.memory.get(key)
    }

    /// Reconstruct the conversation ending at `node`, oldest first.
    ///
    /// Nodes without a message (or with empty content) contribute nothing,
    /// not even their remembered message. The leaf context's initial system instruction, if any, is prepended
    /// once.
    pub fn thread(&self, node: NodeId) -> Result<Vec<Message>, EngineError> {
        let mut chain = self.ancestry(node)?;
        chain.reverse();

        let mut messages = Vec::with_capacity(chain.len() + 1);
        if let Some(system) = self
            .get(node)?
            .context
            .as_ref()
            .and_then(|c| c.initial_system.as_deref())
        {
            messages.push(Message::system(system));
        }

        for id in chain {
            let n = self.get(id)?;
            let Some(message) = n.thread_message() else {
                continue;
            };
            if let Some(key) = n.data_str(MEMORY_KEY) {
                match self.memory.get(key).filter(|m| !m.is_empty()) {
                    Some(remembered) => messages.push(remembered.clone()),
                    None => debug!(node = %id, key, "memory key not found"),
                }
            }
            messages.push(message.clone());
        }
        Ok(messages)
    }

    /// The newest message with `role` on the path to `node`.
    pub fn last_message(&self, node: NodeId, role: Role) -> Result<Option<Message>, EngineError> {
        for id in self.ancestry(node)? {
            if let Some(message) = self.get(id)?.thread_message() {
                if message.role == role {
                    return Ok(Some(message.clone()));
                }
            }
        }
        Ok(None)
    }

    fn get_mut(&mut self, id: NodeId) -> Result<&mut Node, EngineError> {
        id.0.checked_sub(1)
            .and_then(|i| self.nodes.get_mut(i as usize))
            .ok_or(EngineError::UnknownNode(id))
    }

    fn push(&mut self, mut node: Node, parent: Option<NodeId>) -> NodeId {
        let id = NodeId(self.nodes.len() as u64 + 1);
        node.id = Some(id);
        node.parent = parent;
        self.nodes.push(node);
        id
    }
}
