use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

use super::ExecutionContext;
use crate::models::Message;

/// Arbitrary per-node side data.
pub type DataBag = serde_json::Map<String, Value>;

/// Handle to a node registered in a [`NodeTree`](super::NodeTree).
///
/// Ids are assigned in registration order starting at 1 and are never
/// reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct NodeId(pub(super) u64);

impl NodeId {
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// One step's execution state.
///
/// A `Node` is built detached (no id, no parent) and becomes part of a
/// tree when registered with [`NodeTree::add_child`](super::NodeTree::add_child).
/// Once registered it can only be read, never mutated in place.
#[derive(Clone, Default, Serialize)]
pub struct Node {
    pub(super) id: Option<NodeId>,
    pub(super) parent: Option<NodeId>,
    pub name: String,
    pub header: String,
    pub message: Option<Message>,
    pub data: DataBag,
    #[serde(skip)]
    pub(super) context: Option<Arc<ExecutionContext>>,
}

impl Node {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_header(mut self, header: impl Into<String>) -> Self {
        self.header = header.into();
        self
    }

    pub fn with_message(mut self, message: Message) -> Self {
        self.message = Some(message);
        self
    }

    /// Insert a JSON value into the data bag. Callers holding a
    /// serializable type convert with [`serde_json::to_value`] first so a
    /// failure surfaces to them.
    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }

    /// Run with `context` instead of inheriting the parent's.
    pub fn with_context(mut self, context: Arc<ExecutionContext>) -> Self {
        self.context = Some(context);
        self
    }

    /// `None` until the node is registered.
    pub fn id(&self) -> Option<NodeId> {
        self.id
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn context(&self) -> Option<&Arc<ExecutionContext>> {
        self.context.as_ref()
    }

    /// The message this node contributes to a thread, if any.
    pub fn thread_message(&self) -> Option<&Message> {
        self.message.as_ref().filter(|m| !m.is_empty())
    }

    /// Deserialize the data value stored under `key`.
    pub fn data_as<T: DeserializeOwned>(&self, key: &str) -> anyhow::Result<Option<T>> {
        match self.data.get(key) {
            Some(value) => Ok(Some(serde_json::from_value(value.clone()).map_err(|e| {
                anyhow::anyhow!("node data '{}' has an unexpected shape: {}", key, e)
            })?)),
            None => Ok(None),
        }
    }

    pub fn data_str(&self, key: &str) -> Option<&str> {
        self.data.get(key).and_then(Value::as_str)
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.id)
            .field("parent", &self.parent)
            .field("name", &self.name)
            .field("header", &self.header)
            .field("message", &self.message)
            .field("data_keys", &self.data.keys().collect::<Vec<_>>())
            .field("has_context", &self.context.is_some())
            .finish()
    }
}
