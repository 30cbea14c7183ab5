//! Bridge runtime: Wasmtime engine, module loading, and guest instances.
//!
//! `Bridge` loads and validates a guest module once. Each `instantiate`
//! creates an independent `GuestInstance` with its own store, handle table
//! and capabilities. Every public call on an instance first sweeps queued
//! finalizers, then refuels the store and maps traps into `BridgeError`.

use std::path::Path;
use std::rc::Rc;

use wasmtime::{Config, Engine, Linker, Module, Store, WasmParams, WasmResults};

use keel_hostapi::{ClosureCell, HostError, HostValue, LogLine, ReclaimQueue};

use crate::closure;
use crate::codec;
use crate::config::BridgeConfig;
use crate::error::{map_trap, BridgeError};
use crate::exception::{RetSlot, RET_SLOT_ALIGN, RET_SLOT_SIZE};
use crate::host_impl::{guest_free, guest_malloc, BridgeState, GuestExports, HostEnv};
use crate::linker::register_host_functions;
use crate::validation::validate_module;
use crate::worker::{Envelope, TaskHandle};

/// A validated guest module ready to be instantiated.
pub struct Bridge {
    engine: Engine,
    module: Module,
    config: BridgeConfig,
}

impl Bridge {
    /// Compile and validate a guest module (binary or WAT text).
    pub fn new(wasm_bytes: &[u8], config: BridgeConfig) -> Result<Self, BridgeError> {
        let engine = create_engine()?;
        let module = Module::new(&engine, wasm_bytes)?;
        validate_module(&module)?;
        Ok(Self {
            engine,
            module,
            config,
        })
    }

    /// Load from a `.wasm` file path.
    pub fn from_file(path: &Path, config: BridgeConfig) -> Result<Self, BridgeError> {
        let engine = create_engine()?;
        let module = Module::from_file(&engine, path)?;
        validate_module(&module)?;
        Ok(Self {
            engine,
            module,
            config,
        })
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Create a fresh instance with the given host capabilities.
    pub fn instantiate(&self, env: HostEnv) -> Result<GuestInstance, BridgeError> {
        let mut store = Store::new(&self.engine, BridgeState::new(&self.config, env));
        store.limiter(|state| &mut state.limits);
        store.set_fuel(self.config.fuel_per_call)?;

        let mut linker = Linker::new(&self.engine);
        register_host_functions(&mut linker)?;
        let instance = linker
            .instantiate(&mut store, &self.module)
            .map_err(map_trap)?;

        let exports = GuestExports::resolve(&mut store, instance)?;
        store.data_mut().exports = Some(exports);
        tracing::debug!(
            memory_pages = self.config.max_memory_pages,
            fuel_per_call = self.config.fuel_per_call,
            "guest instantiated"
        );

        Ok(GuestInstance {
            store,
            fuel_per_call: self.config.fuel_per_call,
            exports_entered: 0,
        })
    }
}

/// Create a Wasmtime engine with fuel metering.
fn create_engine() -> Result<Engine, BridgeError> {
    let mut wasm_config = Config::new();

    // Fuel metering bounds every call into the guest.
    wasm_config.consume_fuel(true);

    // Single-threaded guests only.
    wasm_config.wasm_threads(false);
    wasm_config.wasm_multi_memory(false);

    Ok(Engine::new(&wasm_config)?)
}

/// One running guest and everything the host holds on its behalf.
///
/// Not `Send`: host values may hold `Rc`s, and guest closures are only ever
/// called from the thread that owns the instance.
pub struct GuestInstance {
    store: Store<BridgeState>,
    fuel_per_call: u64,
    exports_entered: u64,
}

impl GuestInstance {
    /// Run queued finalizers and reset the fuel budget.
    fn enter(&mut self) -> Result<(), BridgeError> {
        self.store.set_fuel(self.fuel_per_call)?;
        closure::sweep(&mut self.store).map_err(map_trap)?;
        self.store.set_fuel(self.fuel_per_call)?;
        Ok(())
    }

    /// Call a guest export by name.
    pub fn call_export<P, R>(&mut self, name: &str, params: P) -> Result<R, BridgeError>
    where
        P: WasmParams,
        R: WasmResults,
    {
        self.enter()?;
        let instance = self.exports()?.instance;
        let func = instance
            .get_typed_func::<P, R>(&mut self.store, name)
            .map_err(|e| HostError::Unavailable(format!("{name}: {e}")))?;
        self.exports_entered += 1;
        let result = func.call(&mut self.store, params);
        self.store.data_mut().views.invalidate();
        result.map_err(map_trap)
    }

    /// Call an export that reports through a return slot.
    ///
    /// `params` receives the slot pointer and builds the argument tuple.
    /// Returns the slot's value pair, or `BridgeError::Guest` if the guest
    /// reported an error.
    pub fn call_ret<P, F>(&mut self, name: &str, params: F) -> Result<(u32, u32), BridgeError>
    where
        P: WasmParams,
        F: FnOnce(u32) -> P,
    {
        let retptr = self.malloc(RET_SLOT_SIZE, RET_SLOT_ALIGN)?;
        RetSlot::clear(&mut self.store, retptr)?;
        let called = self.call_export::<P, ()>(name, params(retptr));
        let slot = RetSlot::read(&mut self.store, retptr);
        self.free(retptr, RET_SLOT_SIZE, RET_SLOT_ALIGN)?;
        called?;
        slot?.into_result(&mut self.store)
    }

    /// Number of export calls that got as far as running guest code.
    pub fn exports_entered(&self) -> u64 {
        self.exports_entered
    }

    fn exports(&self) -> Result<GuestExports, BridgeError> {
        crate::host_impl::exports(&self.store).map_err(Into::into)
    }

    // ── Guest memory ──

    pub fn malloc(&mut self, size: u32, align: u32) -> Result<u32, BridgeError> {
        self.enter()?;
        guest_malloc(&mut self.store, size, align).map_err(map_trap)
    }

    pub fn free(&mut self, ptr: u32, size: u32, align: u32) -> Result<(), BridgeError> {
        self.enter()?;
        guest_free(&mut self.store, ptr, size, align).map_err(map_trap)
    }

    /// Copy a string into guest memory. The guest owns the result.
    pub fn pass_str(&mut self, text: &str) -> Result<(u32, u32), BridgeError> {
        self.enter()?;
        codec::encode_str(&mut self.store, text).map_err(map_trap)
    }

    /// Copy bytes into guest memory. The guest owns the result.
    pub fn pass_bytes(&mut self, bytes: &[u8]) -> Result<(u32, u32), BridgeError> {
        self.enter()?;
        codec::encode_bytes(&mut self.store, bytes).map_err(map_trap)
    }

    pub fn read_str(&mut self, ptr: u32, len: u32) -> Result<String, BridgeError> {
        Ok(codec::decode_str(&mut self.store, ptr, len)?)
    }

    pub fn read_bytes(&mut self, ptr: u32, len: u32) -> Result<Vec<u8>, BridgeError> {
        Ok(codec::decode_bytes(&mut self.store, ptr, len)?)
    }

    /// Read a guest-allocated string and free it.
    pub(crate) fn take_str(&mut self, ptr: u32, len: u32) -> Result<String, BridgeError> {
        let text = self.read_str(ptr, len);
        self.free(ptr, len, 1)?;
        text
    }

    /// Read a guest-allocated buffer and free it.
    pub(crate) fn take_bytes(&mut self, ptr: u32, len: u32) -> Result<Vec<u8>, BridgeError> {
        let bytes = self.read_bytes(ptr, len);
        self.free(ptr, len, 1)?;
        bytes
    }

    pub fn memory_size(&self) -> Result<usize, BridgeError> {
        Ok(self.exports()?.memory.data_size(&self.store))
    }

    /// How many times the memory views were rebuilt over a new buffer.
    pub fn view_rebuilds(&self) -> u64 {
        self.store.data().views.rebuilds()
    }

    // ── Handles ──

    pub fn alloc_value(&mut self, value: HostValue) -> u32 {
        self.store.data_mut().heap.alloc(value)
    }

    pub fn value(&self, handle: u32) -> Result<HostValue, BridgeError> {
        Ok(self.store.data().heap.get(handle)?.clone())
    }

    pub fn take_value(&mut self, handle: u32) -> Result<HostValue, BridgeError> {
        Ok(self.store.data_mut().heap.take(handle)?)
    }

    pub fn release_value(&mut self, handle: u32) -> Result<(), BridgeError> {
        Ok(self.store.data_mut().heap.release(handle)?)
    }

    pub fn live_handles(&self) -> usize {
        self.store.data().heap.live()
    }

    // ── Closures ──

    fn closure_cell(&self, handle: u32) -> Result<Rc<ClosureCell>, BridgeError> {
        Ok(Rc::clone(self.store.data().heap.get(handle)?.as_closure()?))
    }

    /// Call the guest closure behind `handle`.
    pub fn invoke_closure(&mut self, handle: u32, arg: HostValue) -> Result<HostValue, BridgeError> {
        let cell = self.closure_cell(handle)?;
        self.enter()?;
        closure::invoke(&mut self.store, &cell, arg).map_err(map_trap)
    }

    /// Call any callable value the guest handed over.
    pub fn call_value(&mut self, callee: &HostValue, arg: HostValue) -> Result<HostValue, BridgeError> {
        self.enter()?;
        closure::call_value(&mut self.store, callee, arg).map_err(map_trap)
    }

    /// Drop the owning reference to the closure behind `handle` and release
    /// the handle. Releasing twice is a no-op.
    pub fn release_closure(&mut self, handle: u32) -> Result<(), BridgeError> {
        let cell = match self.store.data_mut().heap.take(handle) {
            Ok(HostValue::Closure(cell)) => cell,
            Ok(other) => {
                return Err(HostError::type_mismatch(keel_hostapi::ValueTag::Closure, other.tag()).into())
            }
            Err(_) => return Ok(()),
        };
        self.enter()?;
        closure::release(&mut self.store, &cell).map_err(map_trap)
    }

    /// Run queued finalizers now. Returns how many ran.
    pub fn sweep(&mut self) -> Result<usize, BridgeError> {
        self.store.set_fuel(self.fuel_per_call)?;
        closure::sweep(&mut self.store).map_err(map_trap)
    }

    pub fn reclaim_queue(&self) -> ReclaimQueue {
        self.store.data().reclaim.clone()
    }

    pub fn pending_finalizers(&self) -> usize {
        self.store.data().reclaim.len()
    }

    // ── Event loop ──

    /// Run every queued microtask, including ones queued while running.
    /// Failures are logged and do not stop the queue; traps do.
    pub fn run_microtasks(&mut self) -> Result<usize, BridgeError> {
        let mut ran = 0;
        while let Some(task) = self.store.data_mut().microtasks.pop_front() {
            match self.call_value(&task, HostValue::Undefined) {
                Ok(_) => {}
                Err(BridgeError::Host(err)) => {
                    tracing::warn!(code = %err.code(), "microtask failed: {err}");
                }
                Err(err) => return Err(err),
            }
            ran += 1;
        }
        Ok(ran)
    }

    /// Deliver queued worker replies to the guest's `onmessage` handlers.
    /// Returns how many were delivered.
    ///
    /// Every drained reply is delivered even if a handler fails; the first
    /// failure is returned afterwards.
    pub fn pump_workers(&mut self) -> Result<usize, BridgeError> {
        let mut deliveries = Vec::new();
        let mut closed = Vec::new();
        for (id, worker) in &self.store.data().workers {
            let Some(handler) = &worker.onmessage else {
                continue;
            };
            loop {
                match worker.task.try_recv() {
                    Ok(Some(envelope)) => deliveries.push((handler.clone(), envelope)),
                    Ok(None) => break,
                    Err(_) => {
                        closed.push(*id);
                        break;
                    }
                }
            }
        }
        for id in closed {
            tracing::debug!(worker = id, "worker channel closed");
            self.store.data_mut().workers.remove(&id);
        }

        let delivered = deliveries.len();
        let mut first_err = None;
        for (handler, envelope) in deliveries {
            let arg = match envelope {
                Envelope::Message(payload) => HostValue::Bytes(payload),
                Envelope::Error(err) => HostValue::Error(err),
            };
            if let Err(err) = self.call_value(&handler, arg) {
                tracing::warn!(error = %err, "onmessage handler failed");
                first_err.get_or_insert(err);
            }
        }
        match first_err {
            Some(err) => Err(err),
            None => Ok(delivered),
        }
    }

    /// Connect to a registered background task from the host side.
    pub fn register_background_task(&self, name: &str) -> Result<TaskHandle, BridgeError> {
        Ok(self.store.data().dispatcher.spawn(name)?)
    }

    /// Number of workers the guest has open.
    pub fn guest_workers(&self) -> usize {
        self.store.data().workers.len()
    }

    // ── Diagnostics ──

    pub fn logs(&self) -> &[LogLine] {
        &self.store.data().logs
    }

    pub fn remaining_fuel(&self) -> Result<u64, BridgeError> {
        Ok(self.store.get_fuel()?)
    }
}
