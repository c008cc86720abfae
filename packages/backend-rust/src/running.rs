//! Handle to an operation executing in the background.
//!
//! A [`RunningOperation`] is created by the dispatcher together with a
//! [`Completion`] guard that moves into the background task. The guard owns the
//! execution lock; whatever way the task ends (normal return, cancellation,
//! panic, runtime shutdown) dropping the guard cleans up the operation's
//! cancellation token, releases the lock, and publishes a final status.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{watch, OwnedMutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::warn;
use uuid::Uuid;

use crate::operation::{HandlerError, OperationType};

/// Final result of an operation.
#[derive(Debug, Clone)]
pub enum OperationOutcome {
    Succeeded,
    Failed(Arc<HandlerError>),
    Canceled,
}

impl OperationOutcome {
    #[must_use]
    pub fn from_result(result: Result<(), HandlerError>) -> Self {
        match result {
            Ok(()) => Self::Succeeded,
            Err(HandlerError::Canceled) => Self::Canceled,
            Err(e) => Self::Failed(Arc::new(e)),
        }
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded)
    }

    #[must_use]
    pub fn is_canceled(&self) -> bool {
        matches!(self, Self::Canceled)
    }

    /// The handler error, if the operation failed.
    #[must_use]
    pub fn error(&self) -> Option<&HandlerError> {
        match self {
            Self::Failed(e) => Some(e),
            _ => None,
        }
    }

    pub(crate) fn label(&self) -> &'static str {
        match self {
            Self::Succeeded => "succeeded",
            Self::Failed(_) => "failed",
            Self::Canceled => "canceled",
        }
    }
}

/// Observable state of a running operation.
#[derive(Debug, Clone)]
pub enum OperationStatus {
    Running,
    Done(OperationOutcome),
}

// ---------------------------------------------------------------------------
// RunningOperation
// ---------------------------------------------------------------------------

/// Caller-side handle for an in-flight operation.
///
/// Clones observe the same operation. Dropping every handle does not cancel
/// the operation.
#[derive(Debug, Clone)]
pub struct RunningOperation {
    id: Uuid,
    op_type: OperationType,
    token: CancellationToken,
    cancel_requested: Arc<AtomicBool>,
    status: watch::Receiver<OperationStatus>,
}

impl RunningOperation {
    /// Creates a handle and the guard that completes it.
    pub(crate) fn start(
        op_type: OperationType,
        lock: OwnedMutexGuard<()>,
    ) -> (Self, Completion) {
        let id = Uuid::new_v4();
        let token = CancellationToken::new();
        let (status_tx, status_rx) = watch::channel(OperationStatus::Running);
        let handle = Self {
            id,
            op_type: op_type.clone(),
            token: token.clone(),
            cancel_requested: Arc::new(AtomicBool::new(false)),
            status: status_rx,
        };
        let completion = Completion {
            id,
            op_type,
            token,
            lock: Some(lock),
            status: status_tx,
            finished: false,
        };
        (handle, completion)
    }

    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    #[must_use]
    pub fn op_type(&self) -> &OperationType {
        &self.op_type
    }

    /// The operation's own cancellation token.
    ///
    /// Fires when cancellation is requested and, at the latest, when the
    /// operation has finished.
    #[must_use]
    pub fn context(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Requests cooperative cancellation. Idempotent; has no effect once the
    /// operation has finished.
    pub fn cancel(&self) {
        if !self.is_done() {
            self.cancel_requested.store(true, Ordering::SeqCst);
        }
        self.token.cancel();
    }

    /// Whether `cancel` was called while the operation was still running.
    #[must_use]
    pub fn is_cancel_requested(&self) -> bool {
        self.cancel_requested.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn status(&self) -> OperationStatus {
        self.status.borrow().clone()
    }

    #[must_use]
    pub fn is_done(&self) -> bool {
        matches!(*self.status.borrow(), OperationStatus::Done(_))
    }

    /// Waits for the operation to finish.
    ///
    /// When this returns the execution lock has already been released.
    pub async fn wait(&self) -> OperationOutcome {
        let mut rx = self.status.clone();
        let outcome = match rx
            .wait_for(|s| matches!(s, OperationStatus::Done(_)))
            .await
        {
            Ok(status) => match &*status {
                OperationStatus::Done(outcome) => outcome.clone(),
                OperationStatus::Running => {
                    OperationOutcome::Failed(Arc::new(HandlerError::Aborted))
                }
            },
            Err(_) => OperationOutcome::Failed(Arc::new(HandlerError::Aborted)),
        };
        outcome
    }
}

// ---------------------------------------------------------------------------
// Completion
// ---------------------------------------------------------------------------

/// RAII guard held by the background task.
///
/// Teardown order: cancel the operation token, release the lock, then
/// publish the outcome, so that anyone observing completion can rely on the
/// lock being free.
pub(crate) struct Completion {
    id: Uuid,
    op_type: OperationType,
    token: CancellationToken,
    lock: Option<OwnedMutexGuard<()>>,
    status: watch::Sender<OperationStatus>,
    finished: bool,
}

impl Completion {
    pub(crate) fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub(crate) fn finish(mut self, outcome: OperationOutcome) {
        self.complete(outcome);
    }

    fn complete(&mut self, outcome: OperationOutcome) {
        if self.finished {
            return;
        }
        self.finished = true;
        self.token.cancel();
        drop(self.lock.take());
        self.status.send_replace(OperationStatus::Done(outcome));
    }
}

impl Drop for Completion {
    fn drop(&mut self) {
        if !self.finished {
            warn!(
                op_id = %self.id,
                op_type = %self.op_type,
                "operation ended without a result"
            );
            self.complete(OperationOutcome::Failed(Arc::new(HandlerError::Aborted)));
        }
    }
}
