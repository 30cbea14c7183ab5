//! Guest half of the bridge conventions.
//!
//! - `HostRef` owns one host handle and releases it on drop.
//! - The exception slot holds at most one pending host error; every
//!   fallible import is followed by `take_exception`.
//! - Host values are read into native types (`read_string`, `read_bytes`,
//!   `read_key_input`, `read_seeds`).
//! - `Closure` registers a Rust closure with the host; `Worker` drives a
//!   host background task whose replies arrive through such a closure.

use alloc::boxed::Box;
use alloc::string::{String, ToString};
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU32, Ordering};

use keel_primitives::{ErrorCode, PrimitiveError};

use crate::imports;
use crate::values::{
    superseded_warning, KeyInput, RetSlot, KIND_TRANSFER, LOG_WARN, TAG_ARRAY, TAG_BYTES, TAG_STRING,
};

// ── Owned handles ──

/// An owned host handle.
#[derive(Debug)]
pub struct HostRef(u32);

impl HostRef {
    /// Take ownership of a handle returned by an import. 0 means absent.
    pub fn from_raw(handle: u32) -> Option<Self> {
        (handle != 0).then_some(Self(handle))
    }

    pub fn handle(&self) -> u32 {
        self.0
    }

    /// Give up ownership, e.g. when returning the handle to the host.
    pub fn into_raw(self) -> u32 {
        let handle = self.0;
        core::mem::forget(self);
        handle
    }

    /// A second owned handle to a value the caller only borrows.
    pub fn clone_borrowed(handle: u32) -> GuestResult<Self> {
        let cloned = checked(unsafe { imports::object_clone_ref(handle) })?;
        Self::from_raw(cloned).ok_or_else(|| missing("cloned value"))
    }
}

impl Drop for HostRef {
    fn drop(&mut self) {
        unsafe { imports::object_drop_ref(self.0) }
    }
}

// ── Exceptions ──

static EXCEPTION: AtomicU32 = AtomicU32::new(0);

/// Store the host's pending error. Called by the host only.
///
/// An error nobody took yet is released and reported as a warning; the
/// newer one wins.
#[no_mangle]
pub extern "C" fn bridge_exn_store(handle: u32) {
    let superseded = EXCEPTION.swap(handle, Ordering::Relaxed);
    if superseded != 0 {
        log(LOG_WARN, &superseded_warning(superseded, handle));
        unsafe { imports::object_drop_ref(superseded) }
    }
}

/// A failure inside a guest export.
#[derive(Debug)]
pub enum GuestError {
    /// An error value raised by the host.
    Host(HostRef),
    Primitive(PrimitiveError),
}

impl From<PrimitiveError> for GuestError {
    fn from(err: PrimitiveError) -> Self {
        Self::Primitive(err)
    }
}

impl GuestError {
    /// The error handle to report through a return slot.
    pub fn into_handle(self) -> u32 {
        match self {
            Self::Host(value) => value.into_raw(),
            Self::Primitive(err) => new_error(err.code(), &err.to_string()),
        }
    }
}

pub type GuestResult<T> = Result<T, GuestError>;

/// Drain the exception slot.
pub fn take_exception() -> GuestResult<()> {
    match EXCEPTION.swap(0, Ordering::Relaxed) {
        0 => Ok(()),
        handle => Err(GuestError::Host(HostRef(handle))),
    }
}

/// `value`, unless the import that produced it raised.
fn checked<T>(value: T) -> GuestResult<T> {
    take_exception().map(|()| value)
}

fn missing(what: &str) -> GuestError {
    PrimitiveError::InvalidEncoding(alloc::format!("missing {what}")).into()
}

/// A new host error value. Returns 0 if the host could not create it.
pub fn new_error(code: ErrorCode, message: &str) -> u32 {
    let handle = unsafe { imports::error_new(code.as_i32(), message.as_ptr() as u32, message.len() as u32) };
    // A failure here has nowhere better to go than being dropped.
    let _ = take_exception();
    handle
}

/// Write a return slot for the host.
///
/// # Safety
/// `retptr` must be the 4-aligned, 16-byte slot the host allocated.
pub unsafe fn write_slot(retptr: u32, result: GuestResult<RetSlot>) {
    let slot = match result {
        Ok(slot) => slot,
        Err(err) => RetSlot::err(err.into_handle()),
    };
    core::ptr::write(retptr as *mut [u32; 4], slot.words());
}

// ── Buffers ──

/// Take ownership of a buffer the host allocated through `bridge_malloc`
/// with alignment 1.
///
/// # Safety
/// `(ptr, len)` must come from the host's codec and not be used again.
pub unsafe fn take_buffer(ptr: u32, len: u32) -> Vec<u8> {
    Vec::from_raw_parts(ptr as *mut u8, len as usize, len as usize)
}

/// Hand a buffer to the host, which frees it with `bridge_free(ptr, len, 1)`.
pub fn give_buffer(bytes: Vec<u8>) -> RetSlot {
    let boxed = bytes.into_boxed_slice();
    let len = boxed.len() as u32;
    let ptr = Box::into_raw(boxed) as *mut u8 as u32;
    RetSlot::ok(ptr, len)
}

// ── Reading host values ──

pub fn value_tag(value: u32) -> GuestResult<u32> {
    checked(unsafe { imports::value_tag(value) })
}

/// The string behind `value`, `None` if it is not a string.
pub fn read_string(value: u32) -> GuestResult<Option<String>> {
    let mut out = [0u32; 2];
    unsafe { imports::string_get(value, out.as_mut_ptr() as u32) };
    take_exception()?;
    let [ptr, len] = out;
    if ptr == 0 {
        return Ok(None);
    }
    let bytes = unsafe { take_buffer(ptr, len) };
    String::from_utf8(bytes)
        .map(Some)
        .map_err(|_| PrimitiveError::InvalidEncoding("string is not UTF-8".into()).into())
}

pub fn read_bytes(value: u32) -> GuestResult<Vec<u8>> {
    let len = checked(unsafe { imports::bytes_len(value) })?;
    let mut buf = alloc::vec![0u8; len as usize];
    unsafe { imports::bytes_copy_to(value, buf.as_mut_ptr() as u32) };
    take_exception()?;
    Ok(buf)
}

fn read_item(array: u32, index: u32) -> GuestResult<HostRef> {
    let item = checked(unsafe { imports::array_get(array, index) })?;
    HostRef::from_raw(item).ok_or_else(|| missing("array element"))
}

pub fn read_numbers(value: u32) -> GuestResult<Vec<f64>> {
    let len = checked(unsafe { imports::array_len(value) })?;
    let mut numbers = Vec::with_capacity(len as usize);
    for index in 0..len {
        let item = read_item(value, index)?;
        let mut number = 0f64;
        let found = unsafe { imports::number_get(item.handle(), &mut number as *mut f64 as u32) };
        take_exception()?;
        if found == 0 {
            return Err(PrimitiveError::InvalidEncoding(alloc::format!(
                "array element {index} is not a number"
            ))
            .into());
        }
        numbers.push(number);
    }
    Ok(numbers)
}

/// A constructor argument in any accepted form.
pub fn read_key_input(value: u32) -> GuestResult<KeyInput> {
    let input = match value_tag(value)? {
        TAG_STRING => KeyInput::Text(read_string(value)?.ok_or_else(|| missing("string"))?),
        TAG_BYTES => KeyInput::Bytes(read_bytes(value)?),
        TAG_ARRAY => KeyInput::Numbers(read_numbers(value)?),
        tag => KeyInput::Unsupported(tag),
    };
    Ok(input)
}

/// Derivation seeds: an array of byte strings or strings.
pub fn read_seeds(value: u32) -> GuestResult<Vec<Vec<u8>>> {
    let len = checked(unsafe { imports::array_len(value) })?;
    let mut seeds = Vec::with_capacity(len as usize);
    for index in 0..len {
        let item = read_item(value, index)?;
        let seed = match value_tag(item.handle())? {
            TAG_BYTES => read_bytes(item.handle())?,
            TAG_STRING => read_string(item.handle())?
                .map(String::into_bytes)
                .unwrap_or_default(),
            tag => {
                return Err(PrimitiveError::InvalidSeeds(alloc::format!(
                    "seed {index} has unsupported type tag {tag}"
                ))
                .into())
            }
        };
        seeds.push(seed);
    }
    Ok(seeds)
}

// ── Environment ──

pub fn random_fill(buf: &mut [u8]) -> GuestResult<()> {
    unsafe { imports::random_fill(buf.as_mut_ptr() as u32, buf.len() as u32) };
    take_exception()
}

pub fn log(level: u32, message: &str) {
    unsafe { imports::log(level, message.as_ptr() as u32, message.len() as u32) }
}

// ── Closures ──

type Callback = Box<dyn FnMut(HostRef) -> Option<HostRef>>;

extern "C" fn invoke_shim(a: u32, _b: u32, arg: u32) -> u32 {
    // The host zeroes `a` while a transfer closure runs, so this is the only
    // live reference to the callback.
    let callback = unsafe { &mut *(a as *mut Callback) };
    match callback(HostRef(arg)) {
        Some(ret) => ret.into_raw(),
        None => 0,
    }
}

extern "C" fn dtor_shim(a: u32, _b: u32) {
    drop(unsafe { Box::from_raw(a as *mut Callback) });
}

/// A Rust closure callable by the host. Dropping it releases the host's
/// reference and destroys the closure unless a call is in flight.
pub struct Closure {
    handle: u32,
    state: u32,
}

impl Closure {
    pub fn new(f: impl FnMut(HostRef) -> Option<HostRef> + 'static) -> GuestResult<Self> {
        let callback: Callback = Box::new(f);
        let state = Box::into_raw(Box::new(callback)) as u32;
        let invoke = invoke_shim as usize as u32;
        let dtor = dtor_shim as usize as u32;
        let handle = unsafe { imports::closure_new(state, 0, dtor, invoke, KIND_TRANSFER) };
        if let Err(err) = take_exception() {
            dtor_shim(state, 0);
            return Err(err);
        }
        Ok(Self { handle, state })
    }

    pub fn handle(&self) -> u32 {
        self.handle
    }
}

impl Drop for Closure {
    fn drop(&mut self) {
        if unsafe { imports::cb_drop(self.handle) } == 1 {
            dtor_shim(self.state, 0);
        }
    }
}

/// Call a host callable with `arg`. Returns the result handle.
pub fn call(callee: u32, arg: HostRef) -> GuestResult<Option<HostRef>> {
    let ret = checked(unsafe { imports::call(callee, arg.into_raw()) })?;
    Ok(HostRef::from_raw(ret))
}

/// Abort the current host call with `err`.
pub fn rethrow(err: GuestError) {
    unsafe { imports::rethrow(err.into_handle()) }
}

// ── Workers ──

/// A connection to a host background task.
pub struct Worker {
    id: u32,
    /// Owned here so the host can keep calling it until the worker closes.
    #[allow(dead_code)]
    onmessage: Option<Closure>,
}

impl Worker {
    pub fn spawn(name: &str) -> GuestResult<Self> {
        let id = checked(unsafe { imports::worker_spawn(name.as_ptr() as u32, name.len() as u32) })?;
        Ok(Self { id, onmessage: None })
    }

    /// Route replies to `handler`, replacing any previous one.
    pub fn set_onmessage(&mut self, handler: Closure) -> GuestResult<()> {
        unsafe { imports::worker_set_onmessage(self.id, handler.handle()) };
        take_exception()?;
        self.onmessage = Some(handler);
        Ok(())
    }

    pub fn post(&self, payload: &[u8]) -> GuestResult<()> {
        unsafe { imports::worker_post(self.id, payload.as_ptr() as u32, payload.len() as u32) };
        take_exception()
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        unsafe { imports::worker_close(self.id) }
    }
}
