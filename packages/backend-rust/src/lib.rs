//! Atlas Backend — remote-execution backend with schema-driven configuration
//! and single-flight, cancellable operation dispatch.
//!
//! Entry point is [`Backend`]:
//!
//! 1. **Configuration** (`configurator`, `schema`): `input` / `validate` /
//!    `configure` against the `name`, `access_token`, `address` schema
//! 2. **Dispatch** (`backend`): `operation` picks a handler by type, takes the
//!    execution lock, and spawns the handler
//! 3. **Handles** (`running`): observe, await, or cancel a running operation
//! 4. **Extension points** (`handler`, `state`): operation handlers and state
//!    persistence supplied by the embedder

pub mod backend;
pub mod colorize;
pub mod configurator;
pub mod handler;
pub mod operation;
pub mod running;
pub mod schema;
pub mod state;

pub use backend::Backend;
pub use colorize::Colorize;
pub use configurator::{ActiveConfig, ConfigError, Configurator};
pub use handler::{HandlerTable, OperationHandler, PlaceholderHandler, RunContext};
pub use operation::{
    HandlerError, HandlerKind, OperationError, OperationPayload, OperationRequest, OperationType,
};
pub use running::{OperationOutcome, OperationStatus, RunningOperation};
pub use schema::{AtlasConfig, DEFAULT_ADDRESS, TOKEN_ENV_VAR};
pub use state::{MemoryStateStore, StateSnapshot, StateStore};
