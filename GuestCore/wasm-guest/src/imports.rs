//! Host function imports.
//!
//! All host functions are imported under the `bridge_host` module. Values
//! are passed as handles into the host's handle table; strings and buffers
//! as `(ptr, len)` in this module's memory. A fallible import that fails
//! stores an error handle through `bridge_exn_store` and returns 0, so every
//! call to one is followed by `host_bridge::take_exception`.

#[link(wasm_import_module = "bridge_host")]
extern "C" {
    // ── Handles ──

    /// Release a handle. Never fails.
    pub fn object_drop_ref(handle: u32);

    /// A second handle to the same value.
    pub fn object_clone_ref(handle: u32) -> u32;

    /// The `ValueTag` of a value.
    pub fn value_tag(handle: u32) -> u32;

    // ── Strings, bytes, arrays, numbers ──

    /// Copy a UTF-8 string out of guest memory into a new host value.
    pub fn string_new(ptr: u32, len: u32) -> u32;

    /// Write `(ptr, len)` of a guest-owned copy of a string value to
    /// `retptr`, or `(0, 0)` if the value is not a string.
    pub fn string_get(handle: u32, retptr: u32);

    pub fn bytes_new(ptr: u32, len: u32) -> u32;
    pub fn bytes_len(handle: u32) -> u32;

    /// Copy a byte value to `dst`, which must hold `bytes_len` bytes.
    pub fn bytes_copy_to(handle: u32, dst: u32);

    pub fn array_len(handle: u32) -> u32;

    /// A new handle to element `index`; undefined past the end.
    pub fn array_get(handle: u32, index: u32) -> u32;

    pub fn number_new(value: f64) -> u32;

    /// Write the number to `retptr` and return 1, or return 0 if the value
    /// is not a number.
    pub fn number_get(handle: u32, retptr: u32) -> u32;

    // ── Errors ──

    /// A new error value with an `ErrorCode` and message.
    pub fn error_new(code: i32, ptr: u32, len: u32) -> u32;

    /// Abort the current call with a message. Does not return.
    pub fn throw(ptr: u32, len: u32);

    /// Abort the current call with an error value. Does not return.
    pub fn rethrow(handle: u32);

    // ── Environment ──

    /// Write a log line. The guest must never branch on its outcome.
    pub fn log(level: u32, ptr: u32, len: u32);

    /// Fill `[ptr, ptr + len)` from the host random source.
    pub fn random_fill(ptr: u32, len: u32);

    pub fn queue_microtask(callee: u32);

    /// A well-known global object, 0 if the host has none.
    pub fn global(scope: u32) -> u32;

    // ── Closures and calls ──

    /// Register a closure; `dtor` and `invoke` are function-table indices.
    pub fn closure_new(a: u32, b: u32, dtor: u32, invoke: u32, kind: u32) -> u32;

    /// Drop the owning reference. Returns 1 if the guest must run the
    /// destructor now.
    pub fn cb_drop(handle: u32) -> u32;

    /// Call a callable value, consuming `arg`. Returns the result handle.
    pub fn call(callee: u32, arg: u32) -> u32;

    // ── Workers ──

    pub fn worker_spawn(name_ptr: u32, name_len: u32) -> u32;
    pub fn worker_set_onmessage(id: u32, handler: u32);
    pub fn worker_post(id: u32, ptr: u32, len: u32);
    pub fn worker_close(id: u32);
}
