//! Operation requests and the errors they can produce.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use atlas_core::Value;
use tokio_util::sync::CancellationToken;

/// Kind of operation a caller asks the backend to run.
///
/// Unrecognized names parse to `Other` rather than failing, so that the
/// dispatcher is the single place that decides what is supported.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum OperationType {
    Refresh,
    Plan,
    Apply,
    Other(String),
}

impl OperationType {
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Refresh => "refresh",
            Self::Plan => "plan",
            Self::Apply => "apply",
            Self::Other(name) => name,
        }
    }
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for OperationType {
    fn from(name: &str) -> Self {
        match name.to_ascii_lowercase().as_str() {
            "refresh" => Self::Refresh,
            "plan" => Self::Plan,
            "apply" => Self::Apply,
            _ => Self::Other(name.to_string()),
        }
    }
}

impl FromStr for OperationType {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::from(s))
    }
}

/// Handler slot in the dispatch table. One per supported operation type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandlerKind {
    Refresh,
    Plan,
    Apply,
}

impl HandlerKind {
    /// Static mapping from request type to handler slot.
    #[must_use]
    pub fn for_type(op_type: &OperationType) -> Option<Self> {
        match op_type {
            OperationType::Refresh => Some(Self::Refresh),
            OperationType::Plan => Some(Self::Plan),
            OperationType::Apply => Some(Self::Apply),
            OperationType::Other(_) => None,
        }
    }

    #[must_use]
    pub fn op_type(self) -> OperationType {
        match self {
            Self::Refresh => OperationType::Refresh,
            Self::Plan => OperationType::Plan,
            Self::Apply => OperationType::Apply,
        }
    }
}

/// Operation-specific parameters. Opaque to the dispatcher.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OperationPayload {
    /// Resource addresses to restrict the operation to. Empty means all.
    pub targets: Vec<String>,
    /// Input variables for the run.
    pub variables: BTreeMap<String, Value>,
    /// Plan or apply a destroy instead of a normal change.
    pub destroy: bool,
    /// Apply without waiting for confirmation.
    pub auto_approve: bool,
}

/// A single request to run an operation.
#[derive(Debug, Clone)]
pub struct OperationRequest {
    pub op_type: OperationType,
    /// The caller's context. Cancelling it aborts a dispatch still waiting
    /// for the execution lock; it does not stop an operation already running.
    pub context: CancellationToken,
    pub payload: OperationPayload,
}

impl OperationRequest {
    /// Request with a fresh caller context and an empty payload.
    #[must_use]
    pub fn new(op_type: impl Into<OperationType>) -> Self {
        Self {
            op_type: op_type.into(),
            context: CancellationToken::new(),
            payload: OperationPayload::default(),
        }
    }

    #[must_use]
    pub fn with_context(mut self, context: CancellationToken) -> Self {
        self.context = context;
        self
    }

    #[must_use]
    pub fn with_payload(mut self, payload: OperationPayload) -> Self {
        self.payload = payload;
        self
    }
}

impl From<HandlerKind> for OperationType {
    fn from(kind: HandlerKind) -> Self {
        kind.op_type()
    }
}

/// Errors returned synchronously by `Backend::operation`.
#[derive(Debug, thiserror::Error)]
pub enum OperationError {
    #[error(
        "Unsupported operation type: {op_type}\n\n\
         This is a bug in the backend and should be reported."
    )]
    Unsupported { op_type: OperationType },
    #[error("operation canceled before it started")]
    Canceled,
}

/// Errors produced while an operation runs. Observed only through the
/// `RunningOperation` handle.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error("{op_type} is not implemented by this backend")]
    NotImplemented { op_type: OperationType },
    #[error("operation canceled")]
    Canceled,
    #[error("operation aborted before reporting a result")]
    Aborted,
    #[error(transparent)]
    Failed(#[from] anyhow::Error),
}
