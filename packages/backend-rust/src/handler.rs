//! Operation handlers: the extension point where refresh/plan/apply do work.

use std::sync::Arc;

use async_trait::async_trait;
use atlas_core::ValidatedConfig;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::colorize::Colorize;
use crate::configurator::ActiveConfig;
use crate::operation::{HandlerError, HandlerKind, OperationRequest, OperationType};
use crate::schema::AtlasConfig;
use crate::state::StateStore;

// ---------------------------------------------------------------------------
// RunContext
// ---------------------------------------------------------------------------

/// Everything a handler can see while it runs.
pub struct RunContext {
    pub(crate) id: Uuid,
    pub(crate) op_type: OperationType,
    pub(crate) caller: CancellationToken,
    pub(crate) cancel: CancellationToken,
    pub(crate) config: Option<Arc<ActiveConfig<AtlasConfig>>>,
    pub(crate) state: Option<Arc<dyn StateStore>>,
    pub(crate) colorize: Colorize,
}

impl RunContext {
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    #[must_use]
    pub fn op_type(&self) -> &OperationType {
        &self.op_type
    }

    /// The context of the call that dispatched this operation.
    ///
    /// Informational: the dispatcher never cancels a running operation
    /// because this token fired. Handlers may choose to.
    #[must_use]
    pub fn caller_context(&self) -> &CancellationToken {
        &self.caller
    }

    /// This operation's own cancellation token.
    #[must_use]
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves once cancellation is requested.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await;
    }

    /// Cooperative cancellation point.
    ///
    /// # Errors
    ///
    /// `HandlerError::Canceled` once cancellation has been requested.
    pub fn checkpoint(&self) -> Result<(), HandlerError> {
        if self.cancel.is_cancelled() {
            Err(HandlerError::Canceled)
        } else {
            Ok(())
        }
    }

    /// The validated configuration active at dispatch time.
    #[must_use]
    pub fn config(&self) -> Option<&ValidatedConfig> {
        self.config.as_deref().map(|c| c.validated.as_ref())
    }

    #[must_use]
    pub fn atlas(&self) -> Option<&AtlasConfig> {
        self.config.as_deref().map(|c| c.settings.as_ref())
    }

    #[must_use]
    pub fn state(&self) -> Option<&Arc<dyn StateStore>> {
        self.state.as_ref()
    }

    #[must_use]
    pub fn colorize(&self) -> &Colorize {
        &self.colorize
    }
}

// ---------------------------------------------------------------------------
// OperationHandler
// ---------------------------------------------------------------------------

/// Performs one kind of operation.
///
/// Handlers run on a background task. They should poll
/// [`RunContext::checkpoint`] or select on [`RunContext::cancelled`] and
/// return `HandlerError::Canceled` promptly when asked to stop.
#[async_trait]
pub trait OperationHandler: Send + Sync {
    async fn handle(&self, ctx: &RunContext, request: OperationRequest) -> Result<(), HandlerError>;
}

/// Default handler for every slot. Remote execution is not implemented yet.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlaceholderHandler;

#[async_trait]
impl OperationHandler for PlaceholderHandler {
    async fn handle(
        &self,
        _ctx: &RunContext,
        request: OperationRequest,
    ) -> Result<(), HandlerError> {
        Err(HandlerError::NotImplemented {
            op_type: request.op_type,
        })
    }
}

// ---------------------------------------------------------------------------
// HandlerTable
// ---------------------------------------------------------------------------

/// Static dispatch table: exactly one handler per [`HandlerKind`].
#[derive(Clone)]
pub struct HandlerTable {
    refresh: Arc<dyn OperationHandler>,
    plan: Arc<dyn OperationHandler>,
    apply: Arc<dyn OperationHandler>,
}

impl HandlerTable {
    #[must_use]
    pub fn get(&self, kind: HandlerKind) -> &Arc<dyn OperationHandler> {
        match kind {
            HandlerKind::Refresh => &self.refresh,
            HandlerKind::Plan => &self.plan,
            HandlerKind::Apply => &self.apply,
        }
    }

    pub fn set(&mut self, kind: HandlerKind, handler: Arc<dyn OperationHandler>) {
        match kind {
            HandlerKind::Refresh => self.refresh = handler,
            HandlerKind::Plan => self.plan = handler,
            HandlerKind::Apply => self.apply = handler,
        }
    }
}

impl Default for HandlerTable {
    fn default() -> Self {
        Self {
            refresh: Arc::new(PlaceholderHandler),
            plan: Arc::new(PlaceholderHandler),
            apply: Arc::new(PlaceholderHandler),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
