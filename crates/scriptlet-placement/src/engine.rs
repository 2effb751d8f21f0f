//! PlacementEngine — runs a placement program against one request.
//!
//! # Run lifecycle
//!
//! ```text
//! snapshot + marshal ─▶ instantiate ─▶ resolve entry ─▶ call ─▶ validate
//!                         (Init)      (MissingEntryPoint /      (UnexpectedReturn /
//!                                      EntryPointNotCallable)    InvalidTarget)
//! ```
//!
//! Each run gets its own `Store<InvocationState>` and a watcher task. The
//! watcher fires at most once, on caller cancellation or the configured
//! deadline: it cancels the run's stop token (which aborts a pending
//! builtin) and bumps the engine epoch (which traps running guest code at
//! its next check-point). The watcher is joined before `run` returns.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use wasmtime::{Caller, Config, Engine, Extern, Linker, Store, StoreLimitsBuilder, UpdateDeadline};

use scriptlet_cluster::epoch_secs;
use scriptlet_core::{PlacementRequest, ScriptletConfig};
use scriptlet_state::NodeInfo;

use crate::abi::{ENTRY_POINT, GuestMemory, IMPORT_MODULE};
use crate::args::CallArgs;
use crate::builtins::{self, Builtin};
use crate::error::{PlacementError, PlacementResult};
use crate::host::PlacementHost;
use crate::invocation::{InvocationContext, InvocationState, TargetState};
use crate::marshal::to_value;
use crate::program::PlacementProgram;
use crate::snapshot::ClusterSnapshot;
use crate::value::Value;

const DEFAULT_MEMORY_LIMIT: usize = 64 * 1024 * 1024;
const TABLE_ELEMENT_LIMIT: usize = 10_000;

/// Engine-wide settings.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Deadline for a single run. `None` leaves runs bounded only by the caller.
    pub timeout: Option<Duration>,
    /// Cap on guest linear memory in bytes.
    pub memory_limit: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            timeout: None,
            memory_limit: DEFAULT_MEMORY_LIMIT,
        }
    }
}

impl EngineConfig {
    pub fn from_config(config: &ScriptletConfig) -> anyhow::Result<Self> {
        Ok(Self {
            timeout: config.placement_timeout()?,
            memory_limit: usize::try_from(config.memory_limit()?)?,
        })
    }
}

/// Configured wasmtime engine plus the builtin linker.
///
/// Cheap to clone. Programs must be compiled with [`PlacementEngine::engine`].
#[derive(Clone)]
pub struct PlacementEngine {
    engine: Engine,
    linker: Arc<Linker<InvocationState>>,
    config: EngineConfig,
}

impl PlacementEngine {
    pub fn new(config: EngineConfig) -> PlacementResult<Self> {
        let mut wasm_config = Config::new();
        wasm_config.async_support(true);
        wasm_config.epoch_interruption(true);

        let engine =
            Engine::new(&wasm_config).map_err(|e| PlacementError::Init(format!("{e:#}")))?;
        let linker = build_linker(&engine).map_err(|e| PlacementError::Init(format!("{e:#}")))?;

        info!(
            builtins = Builtin::ALL.len(),
            timeout = ?config.timeout,
            memory_limit = config.memory_limit,
            "placement engine initialized"
        );

        Ok(Self {
            engine,
            linker: Arc::new(linker),
            config,
        })
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Compile and validate a program for this engine.
    pub fn load_program(&self, name: &str, bytes: &[u8]) -> PlacementResult<PlacementProgram> {
        PlacementProgram::from_bytes(&self.engine, name, bytes)
    }

    /// Run `program` to choose a member from `candidates` for `request`.
    ///
    /// Returns the selected element of `candidates`, or `None` when the
    /// program made no selection.
    pub async fn run<'a>(
        &self,
        program: &PlacementProgram,
        host: &PlacementHost,
        request: &PlacementRequest,
        candidates: &'a [NodeInfo],
        cancel: &CancellationToken,
    ) -> PlacementResult<Option<&'a NodeInfo>> {
        if cancel.is_cancelled() {
            return Err(PlacementError::Cancelled);
        }
        if !Engine::same(program.module().engine(), &self.engine) {
            return Err(PlacementError::Init(format!(
                "program {:?} was compiled for a different engine",
                program.name()
            )));
        }

        info!(
            program = %program.name(),
            instance = %request.name,
            project = %request.project,
            candidates = candidates.len(),
            "running placement program"
        );

        let membership = host.membership();
        let snapshot = ClusterSnapshot::load(
            host.cluster(),
            host.node(),
            membership.offline_threshold(),
            membership.leader_address(),
        )?;
        let entry_args = entry_args(&snapshot, request, candidates)?;

        let stop = CancellationToken::new();
        let mut store = self.new_store(InvocationContext {
            host: host.clone(),
            request: request.clone(),
            candidates: candidates.to_vec(),
            snapshot,
        }, stop.clone());

        let watcher = Watcher::spawn(self.engine.clone(), cancel.clone(), stop, self.config.timeout);
        let outcome = self.execute(&mut store, program, &entry_args).await;
        let stopped = watcher.finish().await;

        let index = match (outcome, stopped) {
            (Ok(index), _) => index,
            (Err(_), Some(StopReason::Cancelled)) => return Err(PlacementError::Cancelled),
            (Err(_), Some(StopReason::TimedOut(after))) => {
                return Err(PlacementError::TimedOut(after));
            }
            (Err(e), None) => {
                warn!(program = %program.name(), error = %e, "placement program failed");
                return Err(e);
            }
        };

        let selected = index.and_then(|i| candidates.get(i));
        match selected {
            Some(member) => info!(member = %member.name, "placement program selected member"),
            None => info!("placement program made no selection"),
        }
        Ok(selected)
    }

    fn new_store(&self, context: InvocationContext, stop: CancellationToken) -> Store<InvocationState> {
        let limits = StoreLimitsBuilder::new()
            .memory_size(self.config.memory_limit)
            .table_elements(TABLE_ELEMENT_LIMIT)
            .build();

        let mut store = Store::new(
            &self.engine,
            InvocationState {
                context: Arc::new(context),
                target: TargetState::default(),
                stop,
                limits,
            },
        );
        store.limiter(|state| &mut state.limits);

        // The epoch only moves when a watcher fires. Runs that were not
        // stopped keep going.
        store.set_epoch_deadline(1);
        store.epoch_deadline_callback(|ctx| {
            if ctx.data().stop.is_cancelled() {
                Err(PlacementError::Cancelled.into())
            } else {
                Ok(UpdateDeadline::Continue(1))
            }
        });
        store
    }

    async fn execute(
        &self,
        store: &mut Store<InvocationState>,
        program: &PlacementProgram,
        entry_args: &Value,
    ) -> PlacementResult<Option<usize>> {
        let instance = self
            .linker
            .instantiate_async(&mut *store, program.module())
            .await
            .map_err(|e| host_error(e, PlacementError::Init))?;

        let entry = match instance.get_export(&mut *store, ENTRY_POINT) {
            None => return Err(PlacementError::MissingEntryPoint),
            Some(Extern::Func(func)) => func,
            Some(other) => {
                return Err(PlacementError::EntryPointNotCallable(format!(
                    "export is a {}",
                    extern_kind(&other)
                )));
            }
        };
        let entry = entry
            .typed::<(i32, i32), i64>(&*store)
            .map_err(|e| PlacementError::EntryPointNotCallable(format!("{e:#}")))?;

        let guest = GuestMemory::from_instance(&instance, &mut *store)?;
        let (ptr, len) = guest
            .write_bytes(&mut *store, &entry_args.to_vec())
            .await
            .map_err(|e| host_error(e, PlacementError::Script))?;

        debug!(program = %program.name(), "calling entry point");
        let packed = entry
            .call_async(&mut *store, (ptr as i32, len as i32))
            .await
            .map_err(|e| host_error(e, PlacementError::Script))?;

        let index = store.data().target.outcome()?;
        let returned = guest.read_packed(&*store, packed)?;
        if !returned.is_none() {
            return Err(PlacementError::UnexpectedReturn(returned));
        }
        Ok(index)
    }
}

/// Named entry point arguments: `request` and `candidate_members`.
fn entry_args(
    snapshot: &ClusterSnapshot,
    request: &PlacementRequest,
    candidates: &[NodeInfo],
) -> PlacementResult<Value> {
    let rendered = snapshot.render_all(candidates, epoch_secs());
    let mut args = BTreeMap::new();
    args.insert(
        "request".to_string(),
        to_value(request).map_err(|e| PlacementError::marshal("placement request", e))?,
    );
    args.insert(
        "candidate_members".to_string(),
        to_value(&rendered).map_err(|e| PlacementError::marshal("candidate members", e))?,
    );
    Ok(Value::Dict(args))
}

fn build_linker(engine: &Engine) -> anyhow::Result<Linker<InvocationState>> {
    let mut linker = Linker::new(engine);
    for builtin in Builtin::ALL {
        linker.func_wrap_async(
            IMPORT_MODULE,
            builtin.name(),
            move |mut caller: Caller<'_, InvocationState>, (ptr, len): (i32, i32)| {
                Box::new(async move { dispatch(&mut caller, builtin, ptr, len).await })
            },
        )?;
    }
    Ok(linker)
}

/// Host side of every builtin import: decode args, run, encode the result.
async fn dispatch(
    caller: &mut Caller<'_, InvocationState>,
    builtin: Builtin,
    ptr: i32,
    len: i32,
) -> anyhow::Result<i64> {
    let guest = GuestMemory::from_caller(caller).map_err(PlacementError::from)?;
    let raw = guest
        .read_value(&*caller, ptr, len)
        .map_err(PlacementError::from)?;
    let args = CallArgs::from_value(raw).map_err(|e| PlacementError::InvalidArguments {
        builtin: builtin.name(),
        reason: e.to_string(),
    })?;

    let result = builtins::call(caller.data_mut(), builtin, args).await?;
    guest.write_value(&mut *caller, &result).await
}

/// Recover a host error carried through wasmtime, or wrap a guest failure.
fn host_error(err: anyhow::Error, wrap: impl FnOnce(String) -> PlacementError) -> PlacementError {
    match err.downcast::<PlacementError>() {
        Ok(e) => e,
        Err(err) => wrap(format!("{err:#}")),
    }
}

fn extern_kind(ext: &Extern) -> &'static str {
    match ext {
        Extern::Func(_) => "function",
        Extern::Global(_) => "global",
        Extern::Table(_) => "table",
        Extern::Memory(_) | Extern::SharedMemory(_) => "memory",
        _ => "non-function export",
    }
}

// ── Watcher ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StopReason {
    Cancelled,
    TimedOut(Duration),
}

/// Forwards cancellation or the deadline into a run, at most once.
struct Watcher {
    done: CancellationToken,
    handle: JoinHandle<Option<StopReason>>,
}

impl Watcher {
    fn spawn(
        engine: Engine,
        cancel: CancellationToken,
        stop: CancellationToken,
        timeout: Option<Duration>,
    ) -> Self {
        let done = CancellationToken::new();
        let finished = done.clone();

        let handle = tokio::spawn(async move {
            let deadline = async move {
                match timeout {
                    Some(after) => tokio::time::sleep(after).await,
                    None => std::future::pending::<()>().await,
                }
            };

            let reason = tokio::select! {
                biased;
                _ = finished.cancelled() => return None,
                _ = cancel.cancelled() => StopReason::Cancelled,
                _ = deadline => StopReason::TimedOut(timeout.unwrap_or_default()),
            };

            warn!(?reason, "stopping placement program");
            stop.cancel();
            engine.increment_epoch();
            Some(reason)
        });

        Self { done, handle }
    }

    /// Stop watching and report whether the watcher fired.
    async fn finish(self) -> Option<StopReason> {
        self.done.cancel();
        self.handle.await.ok().flatten()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_creates_successfully() {
        assert!(PlacementEngine::new(EngineConfig::default()).is_ok());
    }

    #[test]
    fn engine_config_from_toml() {
        let config: ScriptletConfig =
            toml::from_str("[placement]\ntimeout = \"250ms\"\nmemory_limit = \"8MiB\"\n").unwrap();
        let engine_config = EngineConfig::from_config(&config).unwrap();
        assert_eq!(engine_config.timeout, Some(Duration::from_millis(250)));
        assert_eq!(engine_config.memory_limit, 8 << 20);
    }

    #[test]
    fn foreign_engine_programs_are_detected() {
        let engine = PlacementEngine::new(EngineConfig::default()).unwrap();
        let other = Engine::default();
        let bytes = wat::parse_str("(module)").unwrap();
        let program = PlacementProgram::from_bytes(&other, "p", &bytes).unwrap();
        assert!(!Engine::same(program.module().engine(), engine.engine()));
    }

    #[tokio::test]
    async fn watcher_idle_finish_reports_nothing() {
        let engine = Engine::default();
        let watcher = Watcher::spawn(
            engine,
            CancellationToken::new(),
            CancellationToken::new(),
            None,
        );
        assert_eq!(watcher.finish().await, None);
    }

    #[tokio::test]
    async fn watcher_forwards_cancellation_once() {
        let cancel = CancellationToken::new();
        let stop = CancellationToken::new();
        let watcher = Watcher::spawn(Engine::default(), cancel.clone(), stop.clone(), None);

        cancel.cancel();
        stop.cancelled().await;
        assert_eq!(watcher.finish().await, Some(StopReason::Cancelled));
    }

    #[tokio::test]
    async fn watcher_deadline() {
        let stop = CancellationToken::new();
        let watcher = Watcher::spawn(
            Engine::default(),
            CancellationToken::new(),
            stop.clone(),
            Some(Duration::from_millis(10)),
        );
        stop.cancelled().await;
        assert_eq!(
            watcher.finish().await,
            Some(StopReason::TimedOut(Duration::from_millis(10)))
        );
    }
}
