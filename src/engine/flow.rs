use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::{debug, warn};

use super::{NodeId, NodeTree};

/// A named step: take a node, extend the tree, return the node to continue
/// from.
#[async_trait]
pub trait Workflow: Send + Sync {
    fn name(&self) -> &str;
    async fn run(&self, tree: &mut NodeTree, node: NodeId) -> Result<NodeId>;
}

/// A step that reports failure as data instead of aborting.
///
/// The returned [`ErrorNode`] always names a node to continue from (the
/// input node when the step failed before producing one).
#[async_trait]
pub trait ErrorWorkflow: Send + Sync {
    fn name(&self) -> &str;
    async fn run(&self, tree: &mut NodeTree, node: NodeId) -> ErrorNode;
}

/// A node paired with the error its step ran into, if any.
#[derive(Debug)]
pub struct ErrorNode {
    pub node: NodeId,
    pub error: Option<anyhow::Error>,
}

impl ErrorNode {
    pub fn ok(node: NodeId) -> Self {
        Self { node, error: None }
    }

    pub fn err(node: NodeId, error: impl Into<anyhow::Error>) -> Self {
        Self {
            node,
            error: Some(error.into()),
        }
    }

    pub fn is_err(&self) -> bool {
        self.error.is_some()
    }
}

/// Recovery handler that aborts the chain with the step's error.
pub fn propagate(node: &mut ErrorNode) -> Option<anyhow::Error> {
    node.error.take()
}

/// Sequential composition of workflow steps over one tree.
///
/// Once a step fails, every later step is skipped and [`Flow::finish`]
/// returns the first error.
///
/// ```rust,ignore
/// let leaf = Flow::start(&mut tree, root)
///     .apply(&embed_query).await
///     .apply(&search_files).await
///     .apply_error_branch(&complete, propagate).await
///     .finish()?;
/// ```
pub struct Flow<'t> {
    tree: &'t mut NodeTree,
    state: Result<NodeId>,
}

impl<'t> Flow<'t> {
    pub fn start(tree: &'t mut NodeTree, node: NodeId) -> Self {
        Self {
            tree,
            state: Ok(node),
        }
    }

    pub async fn apply<W>(self, step: &W) -> Flow<'t>
    where
        W: Workflow + ?Sized,
    {
        let Flow { tree, state } = self;
        let state = match state {
            Ok(node) => {
                debug!(step = step.name(), %node, "applying workflow");
                step.run(tree, node)
                    .await
                    .with_context(|| format!("workflow '{}' failed", step.name()))
            }
            Err(e) => Err(e),
        };
        Flow { tree, state }
    }

    /// Run an [`ErrorWorkflow`]. When it reports an error, `recover`
    /// decides: returning `Some(err)` aborts the chain, `None` continues
    /// from the wrapped node.
    pub async fn apply_error_branch<W, R>(self, step: &W, recover: R) -> Flow<'t>
    where
        W: ErrorWorkflow + ?Sized,
        R: FnOnce(&mut ErrorNode) -> Option<anyhow::Error>,
    {
        let Flow { tree, state } = self;
        let state = match state {
            Ok(node) => {
                debug!(step = step.name(), %node, "applying error workflow");
                let mut outcome = step.run(tree, node).await;
                if outcome.is_err() {
                    match recover(&mut outcome) {
                        Some(e) => Err(e.context(format!("workflow '{}' failed", step.name()))),
                        None => {
                            warn!(step = step.name(), node = %outcome.node, "recovered from step error");
                            Ok(outcome.node)
                        }
                    }
                } else {
                    Ok(outcome.node)
                }
            }
            Err(e) => Err(e),
        };
        Flow { tree, state }
    }

    /// Run a synchronous tree edit as a step.
    pub fn then<F>(self, f: F) -> Flow<'t>
    where
        F: FnOnce(&mut NodeTree, NodeId) -> Result<NodeId>,
    {
        let Flow { tree, state } = self;
        let state = state.and_then(|node| f(tree, node));
        Flow { tree, state }
    }

    /// Look at the current node without changing it. Skipped after a
    /// failure.
    pub fn inspect<F>(self, f: F) -> Flow<'t>
    where
        F: FnOnce(&NodeTree, NodeId),
    {
        if let Ok(node) = &self.state {
            f(&*self.tree, *node);
        }
        self
    }

    pub fn tree(&self) -> &NodeTree {
        &*self.tree
    }

    pub fn finish(self) -> Result<NodeId> {
        self.state
    }
}
