//! Compensation stack for multi-step operations.
//!
//! Each step that mutates state pushes the action that undoes it. When a
//! later step fails the stack is unwound in reverse order; when the whole
//! operation succeeds it is committed and the actions are discarded.

use futures::future::BoxFuture;
use l2bridge_common::DriverResult;

struct Compensation<'a> {
    description: String,
    action: BoxFuture<'a, DriverResult<()>>,
}

/// Undo actions of an in-flight operation.
#[must_use = "a rollback must be unwound or committed"]
pub struct Rollback<'a> {
    operation: &'static str,
    actions: Vec<Compensation<'a>>,
}

impl<'a> Rollback<'a> {
    /// Start an empty stack for `operation`.
    pub const fn new(operation: &'static str) -> Self {
        Self {
            operation,
            actions: Vec::new(),
        }
    }

    /// Register an undo action. The future does not run until unwinding.
    pub fn push(
        &mut self,
        description: impl Into<String>,
        action: impl Future<Output = DriverResult<()>> + Send + 'a,
    ) {
        self.actions.push(Compensation {
            description: description.into(),
            action: Box::pin(action),
        });
    }

    /// Number of pending undo actions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.actions.len()
    }

    /// Whether there is nothing to undo.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Run every undo action, most recent first. Failures are logged and
    /// the remaining actions still run.
    pub async fn unwind(mut self) {
        let actions = std::mem::take(&mut self.actions);
        tracing::debug!(
            operation = self.operation,
            steps = actions.len(),
            "Rolling back"
        );
        for compensation in actions.into_iter().rev() {
            if let Err(e) = compensation.action.await {
                tracing::warn!(
                    operation = self.operation,
                    step = %compensation.description,
                    error = %e,
                    "Rollback step failed"
                );
            }
        }
    }

    /// Discard every undo action.
    pub fn commit(mut self) {
        self.actions.clear();
    }
}

impl Drop for Rollback<'_> {
    fn drop(&mut self) {
        if !self.actions.is_empty() {
            tracing::warn!(
                operation = self.operation,
                steps = self.actions.len(),
                "Rollback dropped with pending undo actions"
            );
        }
    }
}

impl std::fmt::Debug for Rollback<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Rollback")
            .field("operation", &self.operation)
            .field(
                "actions",
                &self
                    .actions
                    .iter()
                    .map(|c| c.description.as_str())
                    .collect::<Vec<_>>(),
            )
            .finish()
    }
}
