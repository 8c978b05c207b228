//! Saving a reconstructed thread to disk and replaying it into a tree.

use anyhow::{Context, Result};
use std::path::Path;

use super::{NodeId, NodeTree};
use crate::models::{Message, Role};

/// Write the thread ending at `node` to `path` as a JSON array of messages.
pub fn store_thread(tree: &NodeTree, node: NodeId, path: &Path) -> Result<()> {
    let thread = tree.thread(node)?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(&thread)?;
    std::fs::write(path, json)
        .with_context(|| format!("Failed to write thread to {}", path.display()))?;
    Ok(())
}

/// Append the messages saved at `path` under `node` as a chain of message
/// nodes, returning the last one.
///
/// A leading system message equal to the context's initial instruction is
/// skipped, since [`NodeTree::thread`] prepends it again.
pub fn load_thread(tree: &mut NodeTree, node: NodeId, path: &Path) -> Result<NodeId> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read thread from {}", path.display()))?;
    let messages: Vec<Message> = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse thread file {}", path.display()))?;

    let initial_system = tree
        .get(node)?
        .context()
        .and_then(|c| c.initial_system.clone());

    let mut skip = 0;
    if let (Some(first), Some(initial)) = (messages.first(), initial_system.as_deref()) {
        if first.role == Role::System && first.content == initial {
            skip = 1;
        }
    }

    let mut cursor = node;
    for message in messages.into_iter().skip(skip) {
        cursor = tree.add_message(cursor, message)?;
    }
    Ok(cursor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::ExecutionContext;
    use std::sync::Arc;
    use tempfile::TempDir;

    #[test]
    fn stored_thread_replays_identically() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("threads/t.json");
        let ctx = Arc::new(ExecutionContext::disabled().with_initial_system("be terse"));

        let mut tree = NodeTree::new();
        let root = tree.new_root_with(ctx.clone());
        let a = tree.add_user_message(root, "hello").unwrap();
        let b = tree.add_assistant_message(a, "hi").unwrap();
        store_thread(&tree, b, &path).unwrap();

        let mut fresh = NodeTree::new();
        let root = fresh.new_root_with(ctx);
        let leaf = load_thread(&mut fresh, root, &path).unwrap();
        assert_eq!(fresh.thread(leaf).unwrap(), tree.thread(b).unwrap());
    }

    #[test]
    fn unreadable_file_is_an_error() {
        let tmp = TempDir::new().unwrap();
        let mut tree = NodeTree::new();
        let root = tree.new_root();
        assert!(load_thread(&mut tree, root, &tmp.path().join("missing.json")).is_err());
    }
}
