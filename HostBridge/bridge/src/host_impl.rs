//! Per-instance mutable state held in the Wasmtime Store.
//!
//! `BridgeState` combines the handle table, the memory view cache, the
//! resolved guest exports and the host capabilities into a single struct
//! that lives inside `Store<BridgeState>` for the lifetime of one guest
//! instance.

use std::collections::{HashMap, VecDeque};

use wasmtime::{
    AsContext, AsContextMut, Instance, Memory, StoreLimits, StoreLimitsBuilder, Table, TypedFunc,
};

use keel_hostapi::{
    Globals, HandleTable, HostError, HostValue, LogLevel, LogLine, LogSink, OsRandom,
    RandomSource, ReclaimQueue, TracingSink,
};

use crate::config::{BridgeConfig, MinerConfig};
use crate::memory::MemoryViews;
use crate::miner;
use crate::validation::TABLE_EXPORTS;
use crate::worker::{TaskHandle, WorkerDispatcher};

/// Host capabilities handed to a new instance.
pub struct HostEnv {
    pub random: Box<dyn RandomSource>,
    pub sink: Box<dyn LogSink>,
    pub globals: Globals,
    pub dispatcher: WorkerDispatcher,
}

impl Default for HostEnv {
    fn default() -> Self {
        let dispatcher = WorkerDispatcher::new();
        miner::register_miner(&dispatcher, MinerConfig::default());
        Self {
            random: Box::new(OsRandom),
            sink: Box::new(TracingSink),
            globals: Globals::new(),
            dispatcher,
        }
    }
}

impl HostEnv {
    pub fn with_random(mut self, random: impl RandomSource + 'static) -> Self {
        self.random = Box::new(random);
        self
    }

    pub fn with_sink(mut self, sink: impl LogSink + 'static) -> Self {
        self.sink = Box::new(sink);
        self
    }

    pub fn with_globals(mut self, globals: Globals) -> Self {
        self.globals = globals;
        self
    }

    pub fn with_dispatcher(mut self, dispatcher: WorkerDispatcher) -> Self {
        self.dispatcher = dispatcher;
        self
    }
}

/// Guest exports every bridge operation needs, resolved once after
/// instantiation.
#[derive(Clone)]
pub struct GuestExports {
    pub instance: Instance,
    pub memory: Memory,
    pub table: Table,
    pub malloc: TypedFunc<(u32, u32), u32>,
    pub realloc: TypedFunc<(u32, u32, u32, u32), u32>,
    pub free: TypedFunc<(u32, u32, u32), ()>,
    pub exn_store: TypedFunc<u32, ()>,
}

impl GuestExports {
    pub fn resolve(mut store: impl AsContextMut, instance: Instance) -> Result<Self, HostError> {
        let mut store = store.as_context_mut();
        let memory = instance
            .get_memory(&mut store, "memory")
            .ok_or_else(|| HostError::Unavailable("no memory export".into()))?;
        let table = TABLE_EXPORTS
            .iter()
            .find_map(|name| instance.get_table(&mut store, name))
            .ok_or_else(|| HostError::Unavailable("no function table export".into()))?;
        let typed_err = |name: &str, e: anyhow::Error| HostError::Unavailable(format!("{name}: {e}"));
        Ok(Self {
            instance,
            memory,
            table,
            malloc: instance
                .get_typed_func(&mut store, "bridge_malloc")
                .map_err(|e| typed_err("bridge_malloc", e))?,
            realloc: instance
                .get_typed_func(&mut store, "bridge_realloc")
                .map_err(|e| typed_err("bridge_realloc", e))?,
            free: instance
                .get_typed_func(&mut store, "bridge_free")
                .map_err(|e| typed_err("bridge_free", e))?,
            exn_store: instance
                .get_typed_func(&mut store, "bridge_exn_store")
                .map_err(|e| typed_err("bridge_exn_store", e))?,
        })
    }
}

/// A worker the guest opened through `worker_spawn`.
pub struct GuestWorker {
    pub task: TaskHandle,
    pub onmessage: Option<HostValue>,
}

/// Per-instance mutable state held in the Wasmtime `Store`.
pub struct BridgeState {
    /// Host values the guest refers to by handle.
    pub heap: HandleTable,
    /// Memoized identity of guest linear memory.
    pub views: MemoryViews,
    /// Set right after instantiation.
    pub exports: Option<GuestExports>,
    /// Finalizers waiting for the next sweep.
    pub reclaim: ReclaimQueue,
    /// Captured guest log lines.
    pub logs: Vec<LogLine>,
    pub enable_guest_logs: bool,
    pub max_log_lines: usize,
    pub guest_log_level: LogLevel,
    pub sink: Box<dyn LogSink>,
    pub random: Box<dyn RandomSource>,
    pub globals: Globals,
    /// Callables queued by `queue_microtask`, run by `run_microtasks`.
    pub microtasks: VecDeque<HostValue>,
    pub dispatcher: WorkerDispatcher,
    pub workers: HashMap<u32, GuestWorker>,
    pub next_worker_id: u32,
    /// Memory cap enforced by the store limiter.
    pub limits: StoreLimits,
}

impl BridgeState {
    pub fn new(config: &BridgeConfig, env: HostEnv) -> Self {
        Self {
            heap: HandleTable::new(),
            views: MemoryViews::new(),
            exports: None,
            reclaim: ReclaimQueue::new(),
            logs: Vec::new(),
            enable_guest_logs: config.enable_guest_logs,
            max_log_lines: config.max_log_lines,
            guest_log_level: config.guest_log_level,
            sink: env.sink,
            random: env.random,
            globals: env.globals,
            microtasks: VecDeque::new(),
            dispatcher: env.dispatcher,
            workers: HashMap::new(),
            next_worker_id: 1,
            limits: StoreLimitsBuilder::new()
                .memory_size(config.max_memory_bytes())
                .build(),
        }
    }

    /// Route a guest log line to the sink and keep a bounded copy.
    pub fn record_log(&mut self, level: LogLevel, message: &str) {
        if !self.enable_guest_logs || level < self.guest_log_level {
            return;
        }
        self.sink.log(level, message);
        if self.logs.len() < self.max_log_lines {
            self.logs.push(LogLine {
                level,
                message: message.to_owned(),
            });
        }
    }

    /// Register a worker opened by the guest and return its id.
    pub fn add_worker(&mut self, task: TaskHandle) -> u32 {
        let id = self.next_worker_id;
        self.next_worker_id = self.next_worker_id.wrapping_add(1).max(1);
        self.workers.insert(
            id,
            GuestWorker {
                task,
                onmessage: None,
            },
        );
        id
    }
}

/// The resolved exports of the instance behind `ctx`.
pub fn exports(ctx: &impl AsContext<Data = BridgeState>) -> Result<GuestExports, HostError> {
    ctx.as_context()
        .data()
        .exports
        .clone()
        .ok_or_else(|| HostError::Unavailable("guest exports are not bound yet".into()))
}

/// Allocate `size` bytes in guest memory through `bridge_malloc`.
pub fn guest_malloc(
    ctx: &mut impl AsContextMut<Data = BridgeState>,
    size: u32,
    align: u32,
) -> anyhow::Result<u32> {
    let ex = exports(&*ctx)?;
    let ptr = ex.malloc.call(&mut *ctx, (size, align))?;
    ctx.as_context_mut().data_mut().views.invalidate();
    if ptr == 0 && size != 0 {
        return Err(HostError::Internal(format!("guest failed to allocate {size} bytes")).into());
    }
    Ok(ptr)
}

/// Resize a guest allocation through `bridge_realloc`.
pub fn guest_realloc(
    ctx: &mut impl AsContextMut<Data = BridgeState>,
    ptr: u32,
    old_size: u32,
    new_size: u32,
    align: u32,
) -> anyhow::Result<u32> {
    let ex = exports(&*ctx)?;
    let new_ptr = ex.realloc.call(&mut *ctx, (ptr, old_size, new_size, align))?;
    ctx.as_context_mut().data_mut().views.invalidate();
    if new_ptr == 0 && new_size != 0 {
        return Err(
            HostError::Internal(format!("guest failed to reallocate {new_size} bytes")).into(),
        );
    }
    Ok(new_ptr)
}

/// Return a guest allocation through `bridge_free`.
pub fn guest_free(
    ctx: &mut impl AsContextMut<Data = BridgeState>,
    ptr: u32,
    size: u32,
    align: u32,
) -> anyhow::Result<()> {
    let ex = exports(&*ctx)?;
    ex.free.call(&mut *ctx, (ptr, size, align))?;
    ctx.as_context_mut().data_mut().views.invalidate();
    Ok(())
}
