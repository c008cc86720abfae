//! The Atlas backend: configuration entry points and single-flight
//! operation dispatch.
//!
//! Dispatch runs through four states:
//!
//! 1. **Idle -> Dispatching**: the handler slot is chosen from the request
//!    type alone. Unsupported types fail here, before any lock is touched.
//! 2. **Dispatching -> Running**: the execution lock is acquired (awaiting
//!    if another operation holds it), a fresh cancellation token is created,
//!    and the handler is spawned on the runtime.
//! 3. **Running -> Completed | Canceled**: the background task returns; its
//!    completion guard releases the lock and publishes the outcome.
//!
//! `operation()` returns as soon as the handler has been spawned.

use std::sync::{Arc, OnceLock};
use std::time::Instant;

use atlas_core::{
    ConfigSchema, EnvSource, ProcessEnv, RawConfig, UiInput, ValidatedConfig, ValidationReport,
};
use tokio::sync::Mutex;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::colorize::Colorize;
use crate::configurator::{ConfigError, Configurator};
use crate::handler::{HandlerTable, OperationHandler, RunContext};
use crate::operation::{HandlerKind, OperationError, OperationRequest};
use crate::running::{OperationOutcome, RunningOperation};
use crate::schema::{atlas_schema, AtlasConfig};
use crate::state::StateStore;

/// Backend that runs operations against an Atlas environment.
///
/// At most one operation executes at a time per instance. Independent
/// instances share nothing.
pub struct Backend {
    env: Arc<dyn EnvSource>,
    colorize: Option<Colorize>,
    handlers: HandlerTable,
    state: Option<Arc<dyn StateStore>>,
    configurator: OnceLock<Configurator<AtlasConfig>>,
    op_lock: Arc<Mutex<()>>,
    #[cfg(test)]
    init_count: std::sync::atomic::AtomicUsize,
}

impl Backend {
    /// Backend reading the process environment, with placeholder handlers,
    /// no state store, and no color configuration.
    #[must_use]
    pub fn new() -> Self {
        Self {
            env: Arc::new(ProcessEnv),
            colorize: None,
            handlers: HandlerTable::default(),
            state: None,
            configurator: OnceLock::new(),
            op_lock: Arc::new(Mutex::new(())),
            #[cfg(test)]
            init_count: std::sync::atomic::AtomicUsize::new(0),
        }
    }

    /// Read environment defaults from `env` instead of the process.
    ///
    /// Discards any configuration made so far.
    #[must_use]
    pub fn with_env(mut self, env: Arc<dyn EnvSource>) -> Self {
        self.env = env;
        self.configurator = OnceLock::new();
        self
    }

    /// Install the handler for one operation kind.
    #[must_use]
    pub fn with_handler(mut self, kind: HandlerKind, handler: Arc<dyn OperationHandler>) -> Self {
        self.handlers.set(kind, handler);
        self
    }

    #[must_use]
    pub fn with_state_store(mut self, store: Arc<dyn StateStore>) -> Self {
        self.state = Some(store);
        self
    }

    #[must_use]
    pub fn with_colorize(mut self, colorize: Colorize) -> Self {
        self.colorize = Some(colorize);
        self
    }

    // -- configuration ------------------------------------------------------

    fn configurator(&self) -> &Configurator<AtlasConfig> {
        self.configurator.get_or_init(|| {
            #[cfg(test)]
            self.init_count
                .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            debug!("initializing configuration schema");
            let schema = atlas_schema().expect("atlas schema keys are unique and well-typed");
            Configurator::new(schema, Arc::clone(&self.env), AtlasConfig::from_validated)
        })
    }

    /// The configuration schema.
    #[must_use]
    pub fn schema(&self) -> &ConfigSchema {
        self.configurator().schema()
    }

    /// Prompt for any required configuration that is missing.
    ///
    /// # Errors
    ///
    /// See [`Configurator::input`].
    pub fn input(&self, ui: &dyn UiInput, raw: &RawConfig) -> Result<RawConfig, ConfigError> {
        self.configurator().input(ui, raw)
    }

    /// Check `raw` without changing any state.
    #[must_use]
    pub fn validate(&self, raw: &RawConfig) -> ValidationReport {
        self.configurator().validate(raw)
    }

    /// Validate `raw`, resolve defaults, and make it the active config.
    ///
    /// # Errors
    ///
    /// See [`Configurator::configure`]. The active config is unchanged on
    /// error.
    pub fn configure(&self, raw: &RawConfig) -> Result<(), ConfigError> {
        self.configurator().configure(raw).map(|_| ())
    }

    /// The active validated config, if configured.
    #[must_use]
    pub fn config(&self) -> Option<Arc<ValidatedConfig>> {
        self.configurator
            .get()
            .and_then(Configurator::active)
            .map(|active| Arc::clone(&active.validated))
    }

    /// The active typed settings, if configured.
    #[must_use]
    pub fn atlas_config(&self) -> Option<Arc<AtlasConfig>> {
        self.configurator
            .get()
            .and_then(Configurator::active)
            .map(|active| Arc::clone(&active.settings))
    }

    /// The state store, or `None` when this backend keeps no state.
    ///
    /// # Errors
    ///
    /// Currently infallible; the signature leaves room for stores that must
    /// be opened.
    pub fn state(&self) -> anyhow::Result<Option<Arc<dyn StateStore>>> {
        Ok(self.state.clone())
    }

    /// The colorizer for CLI output. Never absent: without color
    /// configuration this is a disabled pass-through colorizer.
    #[must_use]
    pub fn colorize(&self) -> Colorize {
        self.colorize.clone().unwrap_or_else(Colorize::disabled)
    }

    // -- dispatch -----------------------------------------------------------

    /// Start an operation in the background.
    ///
    /// Waits only for the execution lock. Handler results are reported
    /// through the returned handle.
    ///
    /// # Errors
    ///
    /// - `OperationError::Unsupported` if no handler slot exists for the
    ///   request type. The lock is not touched.
    /// - `OperationError::Canceled` if the request's context is cancelled
    ///   before the lock is acquired.
    pub async fn operation(
        &self,
        request: OperationRequest,
    ) -> Result<RunningOperation, OperationError> {
        let Some(kind) = HandlerKind::for_type(&request.op_type) else {
            warn!(op_type = %request.op_type, "unsupported operation type");
            return Err(OperationError::Unsupported {
                op_type: request.op_type,
            });
        };
        let handler = Arc::clone(self.handlers.get(kind));

        debug!(op_type = %request.op_type, "waiting for execution lock");
        let guard = tokio::select! {
            biased;
            () = request.context.cancelled() => {
                debug!(op_type = %request.op_type, "caller canceled while waiting for lock");
                return Err(OperationError::Canceled);
            }
            guard = Arc::clone(&self.op_lock).lock_owned() => guard,
        };

        let (handle, completion) = RunningOperation::start(request.op_type.clone(), guard);
        let ctx = RunContext {
            id: handle.id(),
            op_type: request.op_type.clone(),
            caller: request.context.clone(),
            cancel: completion.token(),
            config: self.configurator.get().and_then(Configurator::active),
            state: self.state.clone(),
            colorize: self.colorize(),
        };

        let span = info_span!(
            "operation",
            op_id = %handle.id(),
            op_type = %request.op_type,
        );
        debug!(op_id = %handle.id(), "execution lock acquired");

        tokio::spawn(
            async move {
                let start = Instant::now();
                let result = handler.handle(&ctx, request).await;
                let outcome = OperationOutcome::from_result(result);

                #[allow(clippy::cast_possible_truncation)]
                let duration_ms = start.elapsed().as_millis() as u64;
                if let Some(err) = outcome.error() {
                    warn!(error = %err, duration_ms, "operation failed");
                }
                info!(outcome = outcome.label(), duration_ms, "operation complete");

                completion.finish(outcome);
            }
            .instrument(span),
        );

        Ok(handle)
    }
}

impl Default for Backend {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;
    use std::sync::Barrier;
    use std::time::Duration;

    use async_trait::async_trait;
    use atlas_core::{InputRequest, MapEnv};
    use tokio::sync::Semaphore;

    use super::*;
    use crate::operation::{HandlerError, OperationPayload, OperationType};
    use crate::running::OperationStatus;
    use crate::state::MemoryStateStore;

    // -- helpers --------------------------------------------------------------

    fn backend() -> Backend {
        Backend::new().with_env(Arc::new(MapEnv::new()))
    }

    fn labeled(op: &str, label: &str) -> OperationRequest {
        OperationRequest::new(op).with_payload(OperationPayload {
            targets: vec![label.to_string()],
            ..OperationPayload::default()
        })
    }

    fn label_of(request: &OperationRequest) -> String {
        request.payload.targets.first().cloned().unwrap_or_default()
    }

    /// Logs start/end and blocks before ending until a permit is released.
    struct Gated {
        log: Arc<parking_lot::Mutex<Vec<String>>>,
        gate: Arc<Semaphore>,
    }

    #[async_trait]
    impl OperationHandler for Gated {
        async fn handle(&self, ctx: &RunContext, request: OperationRequest) -> Result<(), HandlerError> {
            let label = label_of(&request);
            self.log.lock().push(format!("start:{label}"));
            tokio::select! {
                permit = self.gate.acquire() => {
                    if let Ok(permit) = permit {
                        permit.forget();
                    }
                }
                () = ctx.cancelled() => {
                    self.log.lock().push(format!("canceled:{label}"));
                    return Err(HandlerError::Canceled);
                }
            }
            self.log.lock().push(format!("end:{label}"));
            Ok(())
        }
    }

    fn gated() -> (Arc<Gated>, Arc<parking_lot::Mutex<Vec<String>>>, Arc<Semaphore>) {
        let log = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let gate = Arc::new(Semaphore::new(0));
        let handler = Arc::new(Gated {
            log: Arc::clone(&log),
            gate: Arc::clone(&gate),
        });
        (handler, log, gate)
    }

    async fn wait_for_log(log: &parking_lot::Mutex<Vec<String>>, entry: &str) {
        for _ in 0..200 {
            if log.lock().iter().any(|e| e == entry) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("log never contained {entry:?}: {:?}", log.lock());
    }

    struct Panicking;

    #[async_trait]
    impl OperationHandler for Panicking {
        async fn handle(&self, _ctx: &RunContext, _request: OperationRequest) -> Result<(), HandlerError> {
            panic!("handler exploded");
        }
    }

    struct SeesConfig {
        seen: Arc<parking_lot::Mutex<Option<String>>>,
    }

    #[async_trait]
    impl OperationHandler for SeesConfig {
        async fn handle(&self, ctx: &RunContext, _request: OperationRequest) -> Result<(), HandlerError> {
            *self.seen.lock() = ctx.atlas().map(|a| a.name.clone());
            Ok(())
        }
    }

    struct FixedAnswer;

    impl UiInput for FixedAnswer {
        fn input(&self, _request: &InputRequest) -> anyhow::Result<String> {
            Ok("hashicorp/myenv".to_string())
        }
    }

    // -- dispatch -------------------------------------------------------------

    #[tokio::test]
    async fn unsupported_type_fails_without_taking_lock() {
        let backend = backend();
        let err = backend
            .operation(OperationRequest::new("destroy"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            OperationError::Unsupported { ref op_type } if *op_type == OperationType::Other("destroy".to_string())
        ));
        assert!(err.to_string().contains("should be reported"));
        assert!(backend.op_lock.try_lock().is_ok());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn unsupported_call_does_not_block_next_dispatch() {
        let (handler, _log, gate) = gated();
        let backend = backend().with_handler(HandlerKind::Plan, handler);

        assert!(backend.operation(OperationRequest::new("destroy")).await.is_err());

        let op = tokio::time::timeout(
            Duration::from_secs(1),
            backend.operation(labeled("plan", "a")),
        )
        .await
        .expect("dispatch after unsupported call must not block")
        .unwrap();
        gate.add_permits(1);
        assert!(op.wait().await.is_success());
    }

    #[tokio::test]
    async fn placeholder_handlers_report_through_handle() {
        let backend = backend();
        for op in ["refresh", "plan", "apply"] {
            let handle = backend.operation(OperationRequest::new(op)).await.unwrap();
            let outcome = handle.wait().await;
            assert!(
                matches!(outcome.error(), Some(HandlerError::NotImplemented { .. })),
                "{op}: {outcome:?}"
            );
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn operation_returns_before_handler_finishes() {
        let (handler, log, gate) = gated();
        let backend = backend().with_handler(HandlerKind::Apply, handler);

        let handle = backend.operation(labeled("apply", "a")).await.unwrap();
        wait_for_log(&log, "start:a").await;
        assert!(matches!(handle.status(), OperationStatus::Running));
        assert!(backend.op_lock.try_lock().is_err());

        gate.add_permits(1);
        assert!(handle.wait().await.is_success());
        assert!(backend.op_lock.try_lock().is_ok());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_operations_are_serialized() {
        let (handler, log, gate) = gated();
        let backend = Arc::new(backend().with_handler(HandlerKind::Plan, handler));

        let first = backend.operation(labeled("plan", "1")).await.unwrap();
        wait_for_log(&log, "start:1").await;

        let second = {
            let backend = Arc::clone(&backend);
            tokio::spawn(async move { backend.operation(labeled("plan", "2")).await })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!second.is_finished());
        assert_eq!(*log.lock(), vec!["start:1"]);

        gate.add_permits(1);
        assert!(first.wait().await.is_success());

        let second = second.await.unwrap().unwrap();
        wait_for_log(&log, "start:2").await;
        gate.add_permits(1);
        assert!(second.wait().await.is_success());

        assert_eq!(*log.lock(), vec!["start:1", "end:1", "start:2", "end:2"]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn cancel_stops_running_operation_and_releases_lock() {
        let (handler, log, _gate) = gated();
        let backend = backend().with_handler(HandlerKind::Refresh, handler);

        let handle = backend.operation(labeled("refresh", "a")).await.unwrap();
        wait_for_log(&log, "start:a").await;
        handle.cancel();

        assert!(handle.wait().await.is_canceled());
        assert!(handle.is_cancel_requested());
        assert_eq!(*log.lock(), vec!["start:a", "canceled:a"]);
        assert!(backend.op_lock.try_lock().is_ok());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn caller_context_does_not_cancel_running_operation() {
        let (handler, log, gate) = gated();
        let backend = backend().with_handler(HandlerKind::Plan, handler);

        let caller = tokio_util::sync::CancellationToken::new();
        let handle = backend
            .operation(labeled("plan", "a").with_context(caller.clone()))
            .await
            .unwrap();
        wait_for_log(&log, "start:a").await;

        caller.cancel();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!handle.context().is_cancelled());
        assert!(!handle.is_done());

        gate.add_permits(1);
        assert!(handle.wait().await.is_success());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn caller_cancel_while_waiting_for_lock_aborts_dispatch() {
        let (handler, log, gate) = gated();
        let backend = Arc::new(backend().with_handler(HandlerKind::Plan, handler));

        let first = backend.operation(labeled("plan", "1")).await.unwrap();
        wait_for_log(&log, "start:1").await;

        let caller = tokio_util::sync::CancellationToken::new();
        let waiting = {
            let backend = Arc::clone(&backend);
            let request = labeled("plan", "2").with_context(caller.clone());
            tokio::spawn(async move { backend.operation(request).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        caller.cancel();

        let err = waiting.await.unwrap().unwrap_err();
        assert!(matches!(err, OperationError::Canceled));

        gate.add_permits(1);
        assert!(first.wait().await.is_success());
        assert_eq!(*log.lock(), vec!["start:1", "end:1"]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn canceling_one_operation_leaves_queued_one_alone() {
        let (handler, log, gate) = gated();
        let backend = Arc::new(backend().with_handler(HandlerKind::Apply, handler));

        let first = backend.operation(labeled("apply", "1")).await.unwrap();
        wait_for_log(&log, "start:1").await;

        let queued = {
            let backend = Arc::clone(&backend);
            tokio::spawn(async move { backend.operation(labeled("apply", "2")).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        first.cancel();
        assert!(first.wait().await.is_canceled());

        let second = queued.await.unwrap().unwrap();
        assert!(!second.context().is_cancelled());
        wait_for_log(&log, "start:2").await;
        gate.add_permits(1);
        assert!(second.wait().await.is_success());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn handler_panic_releases_lock() {
        let backend = backend().with_handler(HandlerKind::Plan, Arc::new(Panicking));

        let handle = backend.operation(OperationRequest::new("plan")).await.unwrap();
        let outcome = handle.wait().await;
        assert!(matches!(outcome.error(), Some(HandlerError::Aborted)));

        let next = tokio::time::timeout(
            Duration::from_secs(1),
            backend.operation(OperationRequest::new("refresh")),
        )
        .await
        .expect("lock must be free after a panic")
        .unwrap();
        next.wait().await;
    }

    #[tokio::test]
    async fn handler_sees_active_config() {
        let seen = Arc::new(parking_lot::Mutex::new(None));
        let backend = backend().with_handler(
            HandlerKind::Refresh,
            Arc::new(SeesConfig {
                seen: Arc::clone(&seen),
            }),
        );
        backend
            .configure(
                &RawConfig::new()
                    .with("name", "hashicorp/myenv")
                    .with("access_token", "t"),
            )
            .unwrap();

        let handle = backend.operation(OperationRequest::new("refresh")).await.unwrap();
        assert!(handle.wait().await.is_success());
        assert_eq!(seen.lock().as_deref(), Some("hashicorp/myenv"));
    }

    // -- configuration ----------------------------------------------------------

    #[test]
    fn validate_and_configure_gate_on_required_fields() {
        let backend = backend();
        let raw = RawConfig::new().with("name", "hashicorp/myenv");

        assert!(!backend.validate(&raw).errors.is_empty());
        assert!(backend.configure(&raw).is_err());
        assert!(backend.config().is_none());
        assert!(backend.atlas_config().is_none());
    }

    #[test]
    fn environment_token_overrides_configured_token() {
        let backend =
            Backend::new().with_env(Arc::new(MapEnv::new().with("ATLAS_TOKEN", "from-env")));
        let raw = RawConfig::new()
            .with("name", "hashicorp/myenv")
            .with("access_token", "explicit");

        assert_eq!(backend.validate(&raw).warnings.len(), 1);
        backend.configure(&raw).unwrap();
        assert_eq!(
            backend.config().unwrap().get_str("access_token"),
            Some("from-env")
        );
        assert_eq!(backend.atlas_config().unwrap().access_token, "from-env");
    }

    #[test]
    fn schema_initialized_once_under_concurrent_first_use() {
        const THREADS: usize = 12;
        let backend = backend();
        let barrier = Barrier::new(THREADS);
        let raw = RawConfig::new()
            .with("name", "hashicorp/myenv")
            .with("access_token", "t");

        let schemas: Vec<usize> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..THREADS)
                .map(|i| {
                    let backend = &backend;
                    let barrier = &barrier;
                    let raw = &raw;
                    s.spawn(move || {
                        barrier.wait();
                        match i % 3 {
                            0 => {
                                let _ = backend.validate(raw);
                            }
                            1 => {
                                let _ = backend.input(&FixedAnswer, &RawConfig::new());
                            }
                            _ => {
                                let _ = backend.configure(raw);
                            }
                        }
                        std::ptr::from_ref(backend.schema()) as usize
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(backend.init_count.load(Ordering::SeqCst), 1);
        assert!(schemas.windows(2).all(|w| w[0] == w[1]));
        assert!(backend.config().is_some());
    }

    #[test]
    fn config_is_absent_without_initialization() {
        let backend = backend();
        assert!(backend.config().is_none());
        assert_eq!(backend.init_count.load(Ordering::SeqCst), 0);
        let _ = backend.schema();
        assert_eq!(backend.init_count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn with_env_resets_lazy_configurator() {
        let backend = Backend::new();
        let _ = backend.schema();
        let backend = backend.with_env(Arc::new(MapEnv::new().with("ATLAS_TOKEN", "x")));
        assert_eq!(backend.init_count.load(Ordering::SeqCst), 1);
        assert!(backend
            .validate(&RawConfig::new().with("name", "hashicorp/myenv"))
            .is_valid());
        assert_eq!(backend.init_count.load(Ordering::SeqCst), 2);
    }

    // -- peripheral -------------------------------------------------------------

    #[test]
    fn colorize_defaults_to_disabled() {
        let c = backend().colorize();
        assert!(c.is_disabled());
        assert_eq!(c.color("[green]ok"), "ok");

        let c = backend().with_colorize(Colorize::new()).colorize();
        assert!(!c.is_disabled());
    }

    #[test]
    fn state_is_absent_unless_store_configured() {
        assert!(backend().state().unwrap().is_none());

        let store: Arc<dyn StateStore> = Arc::new(MemoryStateStore::new());
        let backend = backend().with_state_store(store);
        assert!(backend.state().unwrap().is_some());
    }
}
