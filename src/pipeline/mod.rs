//! Compile pipeline.
//!
//! Turns one [`CompileTrigger`] into exactly one terminal state update.
//! Triggers are queued onto a single consumer, so compile runs are strictly
//! serialized: a trigger arriving mid-compile begins only after the current
//! run's terminal `SetCompiling(false)` dispatch. There is no cancellation
//! of an in-flight compile.
//!
//! ```text
//! trigger → reset dispatches → ImportResolver → CompilerGateway → result
//!          dispatches → gas ceiling → SetCompiling(false)
//! ```

use crate::gateway::CompilerGateway;
use crate::imports::ImportResolver;
use crate::store::{Action, CompileResult, Diagnostic, SourceMap, StateStore};
use crate::workspace::Surface;
use crate::{debug, log};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tokio::sync::mpsc;

/// File extension of the supported source kind.
pub const SOURCE_EXTENSION: &str = "sol";

// =============================================================================
// Trigger
// =============================================================================

/// An event (save, command) that initiates a compile run. Immutable once
/// created.
#[derive(Debug, Clone)]
pub struct CompileTrigger {
    pub file_path: PathBuf,
    pub source_text: String,
    pub timestamp: SystemTime,
}

impl CompileTrigger {
    pub fn new(file_path: PathBuf, source_text: String) -> Self {
        Self {
            file_path,
            source_text,
            timestamp: SystemTime::now(),
        }
    }

    pub fn from_surface(surface: &Surface) -> Self {
        Self::new(surface.path.clone(), surface.text.clone())
    }
}

// =============================================================================
// Handle
// =============================================================================

/// Submission side of the pipeline queue.
#[derive(Clone)]
pub struct PipelineHandle {
    tx: mpsc::UnboundedSender<CompileTrigger>,
}

impl PipelineHandle {
    /// Queue a trigger. Returns false if the pipeline has shut down.
    pub fn submit(&self, trigger: CompileTrigger) -> bool {
        self.tx.send(trigger).is_ok()
    }
}

/// A handle wired to a bare receiver, for exercising producers without a
/// pipeline behind them.
#[cfg(test)]
pub(crate) fn test_handle() -> (PipelineHandle, mpsc::UnboundedReceiver<CompileTrigger>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (PipelineHandle { tx }, rx)
}

// =============================================================================
// Pipeline
// =============================================================================

pub struct CompilePipeline<R, G> {
    resolver: R,
    gateway: G,
    store: StateStore,
    rx: mpsc::UnboundedReceiver<CompileTrigger>,
}

impl<R: ImportResolver, G: CompilerGateway> CompilePipeline<R, G> {
    pub fn new(resolver: R, gateway: G, store: StateStore) -> (Self, PipelineHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                resolver,
                gateway,
                store,
                rx,
            },
            PipelineHandle { tx },
        )
    }

    /// Consume triggers until every handle is dropped. One trigger runs to
    /// its terminal dispatch before the next is taken.
    pub async fn run(mut self) {
        while let Some(trigger) = self.rx.recv().await {
            self.process(trigger);
        }
        debug!("compile"; "pipeline stopped");
    }

    /// Run one trigger through the full dispatch protocol.
    ///
    /// Non-source files are a silent no-op. Every other path dispatches
    /// `SetCompiling(true)`, the unconditional reset, a result (artifact or
    /// diagnostics), the best-effort gas ceiling, and exactly one terminal
    /// `SetCompiling(false)`.
    pub fn process(&self, trigger: CompileTrigger) {
        let extension = trigger
            .file_path
            .extension()
            .and_then(|ext| ext.to_str())
            .unwrap_or("");
        if extension != SOURCE_EXTENSION {
            return;
        }

        let file_name = trigger
            .file_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| trigger.file_path.to_string_lossy().into_owned());
        log!("compile"; "compiling {file_name}");

        let store = &self.store;
        store.dispatch(Action::SetCompiling(true));
        // Reset before any I/O, so a slow resolve or compile never leaves
        // stale results visible as current.
        store.dispatch(Action::SetCompiled(None));
        store.dispatch(Action::SetErrors(Vec::new()));
        store.dispatch(Action::SetEvents(Vec::new()));

        let dir = trigger
            .file_path
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .to_path_buf();
        let seed = SourceMap::single(file_name.clone(), trigger.source_text.clone());

        match self.resolver.resolve(&dir, seed) {
            Ok(sources) => self.compile(&sources),
            Err(error) => {
                log!("compile"; "{error}");
                store.dispatch(Action::SetErrors(vec![Diagnostic::error(error.to_string())]));
            }
        }

        // Best-effort, on every path; a fetch failure never aborts the run.
        match self.gateway.gas_limit() {
            Ok(limit) => store.dispatch(Action::SetGasLimit(limit)),
            Err(error) => log!("compile"; "gas ceiling fetch failed: {error}"),
        }

        store.dispatch(Action::SetCompiling(false));
    }

    fn compile(&self, sources: &SourceMap) {
        let store = &self.store;
        match self.gateway.compile(sources) {
            Ok(CompileResult::Success { contracts }) => {
                store.dispatch(Action::SetCompiled(Some(CompileResult::Success {
                    contracts: contracts.clone(),
                })));
                // One interface per contract, file order then contract order
                // exactly as the gateway returned them.
                for contracts_in_file in contracts.values() {
                    let Some(entries) = contracts_in_file.as_object() else {
                        continue;
                    };
                    for (contract_name, contract) in entries {
                        let interface = contract.get("abi").cloned().unwrap_or(Value::Null);
                        store.dispatch(Action::AddInterface {
                            contract_name: contract_name.clone(),
                            interface,
                        });
                    }
                }
            }
            Ok(CompileResult::Failure { diagnostics }) => {
                store.dispatch(Action::SetErrors(diagnostics));
            }
            Err(error) => {
                log!("compile"; "{error}");
                store.dispatch(Action::SetErrors(vec![Diagnostic::error(format!(
                    "compiler invocation failed: {error}"
                ))]));
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::GatewayError;
    use crate::imports::ResolveError;
    use crate::store::Severity;
    use parking_lot::Mutex;
    use serde_json::{Map, json};
    use std::io;
    use std::sync::Arc;
    use tokio::sync::broadcast;

    fn drain(rx: &mut broadcast::Receiver<Action>) -> Vec<Action> {
        let mut actions = Vec::new();
        while let Ok(action) = rx.try_recv() {
            actions.push(action);
        }
        actions
    }

    // ---- fakes --------------------------------------------------------------

    /// Resolver fake: identity by default, or a forced failure.
    struct FakeResolver {
        fail: bool,
    }

    impl ImportResolver for FakeResolver {
        fn resolve(&self, _dir: &Path, sources: SourceMap) -> Result<SourceMap, ResolveError> {
            if self.fail {
                return Err(ResolveError::Missing {
                    import: "./gone.sol".into(),
                    from: "B.sol".into(),
                    source: io::Error::new(io::ErrorKind::NotFound, "no such file"),
                });
            }
            Ok(sources)
        }
    }

    /// Gateway fake: programmable per-call results, gas limit, call journal.
    struct FakeGateway {
        results: Mutex<Vec<Result<CompileResult, GatewayError>>>,
        gas: Mutex<Result<u64, ()>>,
        compiled: Arc<Mutex<Vec<String>>>,
    }

    impl FakeGateway {
        fn new() -> Self {
            Self {
                results: Mutex::new(Vec::new()),
                gas: Mutex::new(Ok(8_000_000)),
                compiled: Arc::default(),
            }
        }

        fn push_result(&self, result: Result<CompileResult, GatewayError>) {
            self.results.lock().insert(0, result);
        }

        fn fail_gas(&self) {
            *self.gas.lock() = Err(());
        }
    }

    impl CompilerGateway for FakeGateway {
        fn compile(&self, sources: &SourceMap) -> Result<CompileResult, GatewayError> {
            let name = sources
                .file_names()
                .next()
                .cloned()
                .unwrap_or_default();
            self.compiled.lock().push(name);
            self.results
                .lock()
                .pop()
                .unwrap_or_else(|| Ok(success_for("Fallback")))
        }

        fn gas_limit(&self) -> Result<u64, GatewayError> {
            match *self.gas.lock() {
                Ok(limit) => Ok(limit),
                Err(()) => Err(GatewayError::Malformed("gas unavailable".into())),
            }
        }
    }

    fn success_for(contract: &str) -> CompileResult {
        let mut in_file = Map::new();
        in_file.insert(contract.to_string(), json!({ "abi": [{"name": "ping"}] }));
        let mut contracts = Map::new();
        contracts.insert(format!("{contract}.sol"), Value::Object(in_file));
        CompileResult::Success { contracts }
    }

    fn pipeline(
        resolver: FakeResolver,
        gateway: FakeGateway,
    ) -> (
        CompilePipeline<FakeResolver, FakeGateway>,
        PipelineHandle,
        StateStore,
    ) {
        let store = StateStore::new();
        let (pipeline, handle) = CompilePipeline::new(resolver, gateway, store.clone());
        (pipeline, handle, store)
    }

    fn trigger(name: &str) -> CompileTrigger {
        CompileTrigger::new(PathBuf::from(format!("/work/{name}")), "contract {}".into())
    }

    // ---- scenarios ----------------------------------------------------------

    #[test]
    fn test_non_source_trigger_is_noop() {
        let (pipeline, _handle, store) = pipeline(FakeResolver { fail: false }, FakeGateway::new());
        let mut rx = store.subscribe();

        pipeline.process(trigger("README.md"));

        assert!(drain(&mut rx).is_empty());
        assert!(!store.snapshot().compiling);
    }

    #[test]
    fn test_success_dispatch_order() {
        let gateway = FakeGateway::new();
        gateway.push_result(Ok(success_for("A")));
        let (pipeline, _handle, store) = pipeline(FakeResolver { fail: false }, gateway);
        let mut rx = store.subscribe();

        pipeline.process(trigger("A.sol"));

        let actions = drain(&mut rx);
        assert_eq!(actions[0], Action::SetCompiling(true));
        assert_eq!(actions[1], Action::SetCompiled(None));
        assert_eq!(actions[2], Action::SetErrors(Vec::new()));
        assert_eq!(actions[3], Action::SetEvents(Vec::new()));
        assert!(matches!(
            &actions[4],
            Action::SetCompiled(Some(CompileResult::Success { .. }))
        ));
        assert_eq!(
            actions[5],
            Action::AddInterface {
                contract_name: "A".into(),
                interface: json!([{"name": "ping"}]),
            }
        );
        assert_eq!(actions[6], Action::SetGasLimit(8_000_000));
        assert_eq!(actions[7], Action::SetCompiling(false));
        assert_eq!(actions.len(), 8);
    }

    #[test]
    fn test_interfaces_follow_gateway_iteration_order() {
        let mut contracts = Map::new();
        contracts.insert("Z.sol".to_string(), json!({ "Zeta": { "abi": [] } }));
        let mut in_a = Map::new();
        in_a.insert("Beta".to_string(), json!({ "abi": [] }));
        in_a.insert("Alpha".to_string(), json!({ "abi": [] }));
        contracts.insert("A.sol".to_string(), Value::Object(in_a));

        let gateway = FakeGateway::new();
        gateway.push_result(Ok(CompileResult::Success { contracts }));
        let (pipeline, _handle, store) = pipeline(FakeResolver { fail: false }, gateway);
        let mut rx = store.subscribe();

        pipeline.process(trigger("A.sol"));

        let names: Vec<String> = drain(&mut rx)
            .into_iter()
            .filter_map(|action| match action {
                Action::AddInterface { contract_name, .. } => Some(contract_name),
                _ => None,
            })
            .collect();
        // File order, then contract order within file, as returned (never
        // re-sorted).
        assert_eq!(names, vec!["Zeta", "Beta", "Alpha"]);
    }

    #[test]
    fn test_resolution_failure_short_circuits_compile() {
        let gateway = FakeGateway::new();
        let compiled = Arc::clone(&gateway.compiled);
        let (pipeline, _handle, store) = pipeline(FakeResolver { fail: true }, gateway);
        let mut rx = store.subscribe();

        pipeline.process(trigger("B.sol"));

        let actions = drain(&mut rx);
        assert!(compiled.lock().is_empty(), "gateway must not be invoked");

        let errors: Vec<_> = actions
            .iter()
            .filter_map(|action| match action {
                Action::SetErrors(errors) if !errors.is_empty() => Some(errors.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0][0].severity, Severity::Error);
        assert!(errors[0][0].message.contains("./gone.sol"));

        // No artifact, no interfaces for this run.
        assert!(!actions.iter().any(|action| matches!(
            action,
            Action::SetCompiled(Some(_)) | Action::AddInterface { .. }
        )));
        assert_eq!(actions.last(), Some(&Action::SetCompiling(false)));
    }

    #[test]
    fn test_gateway_failure_dispatches_diagnostics() {
        let gateway = FakeGateway::new();
        gateway.push_result(Ok(CompileResult::Failure {
            diagnostics: vec![Diagnostic::error("Expected ';'")],
        }));
        let (pipeline, _handle, store) = pipeline(FakeResolver { fail: false }, gateway);

        pipeline.process(trigger("A.sol"));

        let state = store.snapshot();
        assert_eq!(state.errors.len(), 1);
        assert!(state.compiled.is_none());
        assert!(!state.compiling);
    }

    #[test]
    fn test_transport_error_becomes_diagnostic() {
        let gateway = FakeGateway::new();
        gateway.push_result(Err(GatewayError::Invocation("solc exploded".into())));
        let (pipeline, _handle, store) = pipeline(FakeResolver { fail: false }, gateway);

        pipeline.process(trigger("A.sol"));

        let state = store.snapshot();
        assert_eq!(state.errors.len(), 1);
        assert!(state.errors[0].message.contains("solc exploded"));
        assert!(!state.compiling);
    }

    #[test]
    fn test_gas_failure_logged_not_fatal() {
        let gateway = FakeGateway::new();
        gateway.push_result(Ok(success_for("A")));
        gateway.fail_gas();
        let (pipeline, _handle, store) = pipeline(FakeResolver { fail: false }, gateway);
        let mut rx = store.subscribe();

        pipeline.process(trigger("A.sol"));

        let actions = drain(&mut rx);
        assert!(!actions.iter().any(|a| matches!(a, Action::SetGasLimit(_))));
        assert!(actions.iter().any(|a| matches!(
            a,
            Action::SetCompiled(Some(CompileResult::Success { .. }))
        )));
        assert_eq!(actions.last(), Some(&Action::SetCompiling(false)));
    }

    #[test]
    fn test_exactly_one_compiling_pair_per_trigger() {
        let gateway = FakeGateway::new();
        gateway.push_result(Ok(success_for("A")));
        let (pipeline, _handle, store) = pipeline(FakeResolver { fail: false }, gateway);
        let mut rx = store.subscribe();

        pipeline.process(trigger("A.sol"));

        let flags: Vec<bool> = drain(&mut rx)
            .into_iter()
            .filter_map(|action| match action {
                Action::SetCompiling(flag) => Some(flag),
                _ => None,
            })
            .collect();
        assert_eq!(flags, vec![true, false]);
    }

    #[tokio::test]
    async fn test_back_to_back_triggers_are_serialized() {
        let gateway = FakeGateway::new();
        gateway.push_result(Ok(success_for("First")));
        gateway.push_result(Ok(success_for("Second")));
        let (pipeline, handle, store) = pipeline(FakeResolver { fail: false }, gateway);
        let mut rx = store.subscribe();

        // Both triggers queued before the consumer starts.
        assert!(handle.submit(trigger("First.sol")));
        assert!(handle.submit(trigger("Second.sol")));
        drop(handle);
        pipeline.run().await;

        let actions = drain(&mut rx);
        assert_eq!(actions.len(), 16);

        // The second run's dispatches all come after the first's terminal
        // SetCompiling(false).
        let first_terminal = actions
            .iter()
            .position(|a| *a == Action::SetCompiling(false))
            .unwrap();
        assert_eq!(actions[first_terminal + 1], Action::SetCompiling(true));
        assert!(matches!(
            &actions[first_terminal + 5],
            Action::SetCompiled(Some(CompileResult::Success { contracts }))
                if contracts.contains_key("Second.sol")
        ));
        assert_eq!(actions.last(), Some(&Action::SetCompiling(false)));
    }
}
