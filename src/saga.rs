//! Undo steps for multi-step flows.

use futures::future::BoxFuture;

use crate::error::BackendResult;

/// Stack of cleanup actions. Each completed step pushes its undo; on failure
/// the stack is unwound newest first, on success it is discarded.
#[derive(Default)]
pub struct Compensations {
    steps: Vec<(String, BoxFuture<'static, BackendResult<()>>)>,
}

impl Compensations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(
        &mut self,
        label: impl Into<String>,
        undo: impl std::future::Future<Output = BackendResult<()>> + Send + 'static,
    ) {
        self.steps.push((label.into(), Box::pin(undo)));
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Run every undo, newest first. Failures are logged, never propagated.
    /// Returns how many undos succeeded.
    pub async fn unwind(self) -> usize {
        let mut undone = 0;
        for (label, undo) in self.steps.into_iter().rev() {
            match undo.await {
                Ok(()) => {
                    tracing::info!("Compensated: {}", label);
                    undone += 1;
                }
                Err(e) => tracing::warn!("Compensation failed ({}): {}", label, e),
            }
        }
        undone
    }

    /// The flow succeeded; drop the undos without running them.
    pub fn commit(self) {
        if !self.steps.is_empty() {
            tracing::debug!("Discarding {} compensation(s)", self.steps.len());
        }
    }
}
