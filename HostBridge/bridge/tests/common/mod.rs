//! Shared test helpers for integration tests.
//!
//! Provides a hand-written WAT guest that speaks the bridge ABI, plus
//! factories for bridges, instances and a test worker dispatcher.

#![allow(dead_code)]

use std::time::{Duration, Instant};

use keel_bridge::{
    BackgroundTask, Bridge, BridgeConfig, GuestInstance, HandlerId, HostEnv, WorkerDispatcher,
    WorkerScope,
};

/// Closure kinds as passed to `closure_new`.
pub const REUSABLE: u32 = 0;
pub const TRANSFER: u32 = 1;

/// Function table slots of the test guest.
pub const ECHO: u32 = 1;
pub const DTOR: u32 = 2;
pub const REENTER: u32 = 3;
pub const SELF_DROP: u32 = 4;

pub const WAIT: Duration = Duration::from_secs(10);

/// A small guest written directly against the bridge ABI.
///
/// Allocation is a bump allocator that grows memory on demand; `bridge_free`
/// only counts calls. Closures share the context pair `(16, 7)`. Exported
/// counters (`frees`, `dtors`, `calls`, `pubkey_frees`, `list_frees`,
/// `tx_frees`) let tests observe guest-side effects.
pub const TEST_GUEST: &str = r#"
(module
    (import "bridge_host" "object_drop_ref" (func $drop_ref (param i32)))
    (import "bridge_host" "string_new" (func $string_new (param i32 i32) (result i32)))
    (import "bridge_host" "string_get" (func $string_get (param i32 i32)))
    (import "bridge_host" "number_get" (func $number_get (param i32 i32) (result i32)))
    (import "bridge_host" "random_fill" (func $random_fill (param i32 i32)))
    (import "bridge_host" "value_tag" (func $value_tag (param i32) (result i32)))
    (import "bridge_host" "bytes_len" (func $bytes_len (param i32) (result i32)))
    (import "bridge_host" "bytes_copy_to" (func $bytes_copy_to (param i32 i32)))
    (import "bridge_host" "array_len" (func $array_len (param i32) (result i32)))
    (import "bridge_host" "error_new" (func $error_new (param i32 i32 i32) (result i32)))
    (import "bridge_host" "throw" (func $throw (param i32 i32)))
    (import "bridge_host" "rethrow" (func $rethrow (param i32)))
    (import "bridge_host" "closure_new" (func $closure_new (param i32 i32 i32 i32 i32) (result i32)))
    (import "bridge_host" "cb_drop" (func $cb_drop (param i32) (result i32)))
    (import "bridge_host" "call" (func $call (param i32 i32) (result i32)))
    (import "bridge_host" "log" (func $log (param i32 i32 i32)))
    (import "bridge_host" "queue_microtask" (func $queue_microtask (param i32)))
    (import "bridge_host" "worker_spawn" (func $worker_spawn (param i32 i32) (result i32)))
    (import "bridge_host" "worker_set_onmessage" (func $worker_set_onmessage (param i32 i32)))
    (import "bridge_host" "worker_post" (func $worker_post (param i32 i32 i32)))

    (memory (export "memory") 1)
    (table (export "bridge_fn_table") 8 funcref)
    (elem (i32.const 1) $echo $dtor $reenter $self_drop)

    (data (i32.const 256) "boom")
    (data (i32.const 264) "hello from guest")
    (data (i32.const 288) "\ff\fe")
    (data (i32.const 296) "echo")
    (data (i32.const 320) "invalid public key")
    (data (i32.const 352) "trailing bytes")
    (data (i32.const 368) "seed too long")
    (data (i32.const 384) "exception dropped unread")

    (global $bump (mut i32) (i32.const 1024))
    (global $exn (mut i32) (i32.const 0))
    (global $frees (mut i32) (i32.const 0))
    (global $dtors (mut i32) (i32.const 0))
    (global $calls (mut i32) (i32.const 0))
    (global $self_h (mut i32) (i32.const 0))
    (global $depth (mut i32) (i32.const 0))
    (global $last_drop (mut i32) (i32.const -1))
    (global $pubkey_frees (mut i32) (i32.const 0))
    (global $list_frees (mut i32) (i32.const 0))
    (global $tx_frees (mut i32) (i32.const 0))

    ;; ── allocator and exception slot ──

    (func $malloc (export "bridge_malloc") (param $size i32) (param $align i32) (result i32)
        (local $p i32) (local $end i32)
        (local.set $p
            (i32.and
                (i32.sub (i32.add (global.get $bump) (local.get $align)) (i32.const 1))
                (i32.sub (i32.const 0) (local.get $align))))
        (local.set $end (i32.add (local.get $p) (local.get $size)))
        (block $ok
            (loop $grow
                (br_if $ok (i32.le_u (local.get $end) (i32.shl (memory.size) (i32.const 16))))
                (if (i32.eq (memory.grow (i32.const 1)) (i32.const -1))
                    (then unreachable))
                (br $grow)))
        (global.set $bump (local.get $end))
        (local.get $p))

    (func (export "bridge_realloc") (param $ptr i32) (param $old i32) (param $new i32) (param $align i32) (result i32)
        (local $p i32)
        (local.set $p (call $malloc (local.get $new) (local.get $align)))
        (memory.copy (local.get $p) (local.get $ptr)
            (select (local.get $old) (local.get $new) (i32.lt_u (local.get $old) (local.get $new))))
        (local.get $p))

    (func (export "bridge_free") (param i32 i32 i32)
        (global.set $frees (i32.add (global.get $frees) (i32.const 1))))

    ;; An exception nobody took is released with a warning.
    (func (export "bridge_exn_store") (param $h i32)
        (if (i32.ne (global.get $exn) (i32.const 0))
            (then
                (call $log (i32.const 3) (i32.const 384) (i32.const 24))
                (call $drop_ref (global.get $exn))))
        (global.set $exn (local.get $h)))

    (func (export "take_exn") (result i32)
        (local $h i32)
        (local.set $h (global.get $exn))
        (global.set $exn (i32.const 0))
        (local.get $h))

    (func $slot (param $ret i32) (param $a i32) (param $b i32) (param $err i32) (param $is_err i32)
        (i32.store (local.get $ret) (local.get $a))
        (i32.store offset=4 (local.get $ret) (local.get $b))
        (i32.store offset=8 (local.get $ret) (local.get $err))
        (i32.store offset=12 (local.get $ret) (local.get $is_err)))

    ;; ── counters ──

    (func (export "frees") (result i32) (global.get $frees))
    (func (export "dtors") (result i32) (global.get $dtors))
    (func (export "calls") (result i32) (global.get $calls))
    (func (export "last_drop") (result i32) (global.get $last_drop))
    (func (export "pubkey_frees") (result i32) (global.get $pubkey_frees))
    (func (export "list_frees") (result i32) (global.get $list_frees))
    (func (export "tx_frees") (result i32) (global.get $tx_frees))

    ;; ── values, errors, logging ──

    (func (export "grow") (param i32) (result i32) (memory.grow (local.get 0)))

    (func (export "spin") (loop $l (br $l)))

    (func (export "intern") (param $ptr i32) (param $len i32) (result i32)
        (call $string_new (local.get $ptr) (local.get $len)))

    (func (export "bad_string") (result i32)
        (call $string_new (i32.const 288) (i32.const 2)))

    (func (export "release") (param i32)
        (call $drop_ref (local.get 0)))

    (func (export "read_string") (param $h i32) (param $ret i32)
        (call $string_get (local.get $h) (local.get $ret)))

    (func (export "read_number") (param $h i32) (param $ret i32) (result i32)
        (call $number_get (local.get $h) (local.get $ret)))

    (func (export "fill_random") (param $ptr i32) (param $len i32)
        (call $random_fill (local.get $ptr) (local.get $len)))

    (func (export "ok_ret") (param $ret i32) (param $a i32) (param $b i32)
        (call $slot (local.get $ret) (local.get $a) (local.get $b) (i32.const 0) (i32.const 0)))

    (func (export "fail_ret") (param $ret i32) (param $code i32)
        (call $slot (local.get $ret) (i32.const 0) (i32.const 0)
            (call $error_new (local.get $code) (i32.const 256) (i32.const 4))
            (i32.const 1)))

    (func (export "throw_boom")
        (call $throw (i32.const 256) (i32.const 4)))

    (func (export "say") (param $level i32)
        (call $log (local.get $level) (i32.const 264) (i32.const 16)))

    ;; ── closures ──

    (func $echo (param $a i32) (param $b i32) (param $arg i32) (result i32)
        (global.set $calls (i32.add (global.get $calls) (i32.const 1)))
        (local.get $arg))

    (func $dtor (param $a i32) (param $b i32)
        (global.set $dtors (i32.add (global.get $dtors) (i32.const 1))))

    ;; Calls itself once through the host, rethrowing a failed inner call.
    (func $reenter (param $a i32) (param $b i32) (param $arg i32) (result i32)
        (local $ret i32) (local $e i32)
        (if (i32.ne (global.get $depth) (i32.const 0))
            (then (return (local.get $arg))))
        (global.set $depth (i32.const 1))
        (local.set $ret (call $call (global.get $self_h) (local.get $arg)))
        (global.set $depth (i32.const 0))
        (local.set $e (global.get $exn))
        (if (i32.ne (local.get $e) (i32.const 0))
            (then
                (global.set $exn (i32.const 0))
                (call $rethrow (local.get $e))))
        (local.get $ret))

    ;; Drops its own handle while running.
    (func $self_drop (param $a i32) (param $b i32) (param $arg i32) (result i32)
        (global.set $last_drop (call $cb_drop (global.get $self_h)))
        (local.get $arg))

    (func (export "make_closure") (param $kind i32) (param $invoke i32) (result i32)
        (global.set $self_h
            (call $closure_new (i32.const 16) (i32.const 7) (i32.const 2) (local.get $invoke) (local.get $kind)))
        (global.get $self_h))

    (func (export "drop_closure") (param $h i32) (result i32)
        (local $r i32)
        (local.set $r (call $cb_drop (local.get $h)))
        (if (local.get $r)
            (then (call $dtor (i32.const 16) (i32.const 7))))
        (local.get $r))

    (func (export "call_with") (param $callee i32) (param $arg i32) (result i32)
        (call $call (local.get $callee) (local.get $arg)))

    (func (export "schedule") (param i32)
        (call $queue_microtask (local.get 0)))

    ;; ── workers ──

    (func (export "spawn_echo") (result i32)
        (call $worker_spawn (i32.const 296) (i32.const 4)))

    (func (export "set_onmessage") (param i32 i32)
        (call $worker_set_onmessage (local.get 0) (local.get 1)))

    (func (export "post") (param i32 i32 i32)
        (call $worker_post (local.get 0) (local.get 1) (local.get 2)))

    ;; ── typed objects: a 32-byte key and opaque list/transaction cells ──

    (func (export "pubkey_new") (param $ret i32) (param $h i32)
        (local $p i32) (local $ok i32)
        (if (i32.eq (call $value_tag (local.get $h)) (i32.const 5))
            (then
                (local.set $ok (i32.eq (call $bytes_len (local.get $h)) (i32.const 32)))))
        (if (local.get $ok)
            (then
                (local.set $p (call $malloc (i32.const 32) (i32.const 1)))
                (call $bytes_copy_to (local.get $h) (local.get $p))
                (call $slot (local.get $ret) (local.get $p) (i32.const 0) (i32.const 0) (i32.const 0)))
            (else
                (call $slot (local.get $ret) (i32.const 0) (i32.const 0)
                    (call $error_new (i32.const 4) (i32.const 320) (i32.const 18))
                    (i32.const 1)))))

    (func (export "pubkey_to_bytes") (param $ret i32) (param $ptr i32)
        (local $buf i32)
        (local.set $buf (call $malloc (i32.const 32) (i32.const 1)))
        (memory.copy (local.get $buf) (local.get $ptr) (i32.const 32))
        (call $slot (local.get $ret) (local.get $buf) (i32.const 32) (i32.const 0) (i32.const 0)))

    (func (export "pubkey_equals") (param $a i32) (param $b i32) (result i32)
        (i32.and
            (i32.and
                (i64.eq (i64.load (local.get $a)) (i64.load (local.get $b)))
                (i64.eq (i64.load offset=8 (local.get $a)) (i64.load offset=8 (local.get $b))))
            (i32.and
                (i64.eq (i64.load offset=16 (local.get $a)) (i64.load offset=16 (local.get $b)))
                (i64.eq (i64.load offset=24 (local.get $a)) (i64.load offset=24 (local.get $b))))))

    (func (export "pubkey_free") (param i32)
        (global.set $pubkey_frees (i32.add (global.get $pubkey_frees) (i32.const 1))))

    (func (export "instructions_new") (result i32)
        (call $malloc (i32.const 4) (i32.const 4)))

    (func (export "instructions_free") (param i32)
        (global.set $list_frees (i32.add (global.get $list_frees) (i32.const 1))))

    ;; Derived keys: the program key with byte 0 set to the seed count, and
    ;; bump 255 minus that count.
    (func (export "pubkey_find_program_address") (param $ret i32) (param $seeds i32) (param $program i32)
        (local $p i32) (local $n i32)
        (local.set $n (call $array_len (local.get $seeds)))
        (local.set $p (call $malloc (i32.const 32) (i32.const 1)))
        (memory.copy (local.get $p) (local.get $program) (i32.const 32))
        (i32.store8 (local.get $p) (local.get $n))
        (call $slot (local.get $ret) (local.get $p) (i32.sub (i32.const 255) (local.get $n))
            (i32.const 0) (i32.const 0)))

    ;; The base key overwritten by the seed, ending in the owner's last byte.
    (func (export "pubkey_create_with_seed")
        (param $ret i32) (param $base i32) (param $seed i32) (param $len i32) (param $owner i32)
        (local $p i32)
        (if (i32.gt_u (local.get $len) (i32.const 31))
            (then
                (call $slot (local.get $ret) (i32.const 0) (i32.const 0)
                    (call $error_new (i32.const 4) (i32.const 368) (i32.const 13))
                    (i32.const 1))
                (return)))
        (local.set $p (call $malloc (i32.const 32) (i32.const 1)))
        (memory.copy (local.get $p) (local.get $base) (i32.const 32))
        (memory.copy (local.get $p) (local.get $seed) (local.get $len))
        (i32.store8 offset=31 (local.get $p) (i32.load8_u offset=31 (local.get $owner)))
        (call $slot (local.get $ret) (local.get $p) (i32.const 0) (i32.const 0) (i32.const 0)))

    ;; A transaction cell holds one word: the payer's first word, or 1.
    (func (export "transaction_new") (param $ret i32) (param $list i32) (param $payer i32)
        (local $p i32)
        (local.set $p (call $malloc (i32.const 4) (i32.const 4)))
        (i32.store (local.get $p)
            (select (i32.load (local.get $payer)) (i32.const 1) (local.get $payer)))
        (call $slot (local.get $ret) (local.get $p) (i32.const 0) (i32.const 0) (i32.const 0)))

    (func (export "transaction_to_bytes") (param $ret i32) (param $tx i32)
        (local $buf i32)
        (local.set $buf (call $malloc (i32.const 4) (i32.const 1)))
        (i32.store (local.get $buf) (i32.load (local.get $tx)))
        (call $slot (local.get $ret) (local.get $buf) (i32.const 4) (i32.const 0) (i32.const 0)))

    (func (export "transaction_from_bytes") (param $ret i32) (param $data i32) (param $len i32)
        (local $p i32)
        (if (i32.ne (local.get $len) (i32.const 4))
            (then
                (call $slot (local.get $ret) (i32.const 0) (i32.const 0)
                    (call $error_new (i32.const 5) (i32.const 352) (i32.const 14))
                    (i32.const 1))
                (return)))
        (local.set $p (call $malloc (i32.const 4) (i32.const 4)))
        (i32.store (local.get $p) (i32.load (local.get $data)))
        (call $slot (local.get $ret) (local.get $p) (i32.const 0) (i32.const 0) (i32.const 0)))

    (func (export "transaction_is_signed") (param i32) (result i32)
        (i32.const 0))

    (func (export "transaction_free") (param i32)
        (global.set $tx_frees (i32.add (global.get $tx_frees) (i32.const 1))))
)
"#;

/// Compile the test guest with `config`.
pub fn bridge_with(config: BridgeConfig) -> Bridge {
    Bridge::new(TEST_GUEST.as_bytes(), config).expect("test guest should validate")
}

/// An instance of the test guest with default config and capabilities.
pub fn guest() -> GuestInstance {
    guest_with(BridgeConfig::default(), HostEnv::default())
}

pub fn guest_with(config: BridgeConfig, env: HostEnv) -> GuestInstance {
    bridge_with(config)
        .instantiate(env)
        .expect("test guest should instantiate")
}

/// Read one of the guest's exported counters.
pub fn counter(guest: &mut GuestInstance, name: &str) -> u32 {
    guest
        .call_export::<(), u32>(name, ())
        .unwrap_or_else(|e| panic!("counter {name}: {e}"))
}

/// Take the handle of the guest's pending exception, 0 if none.
pub fn take_exn(guest: &mut GuestInstance) -> u32 {
    counter(guest, "take_exn")
}

// ── Workers ──

/// Replies to every message with `echo:` followed by the payload.
struct EchoTask;

impl BackgroundTask for EchoTask {
    fn received(&mut self, scope: &WorkerScope, id: HandlerId, payload: Vec<u8>) {
        let mut reply = b"echo:".to_vec();
        reply.extend_from_slice(&payload);
        scope.respond(id, reply);
    }
}

/// A dispatcher offering the `echo` task.
pub fn echo_dispatcher() -> WorkerDispatcher {
    let dispatcher = WorkerDispatcher::new();
    dispatcher.register_task("echo", || Ok(Box::new(EchoTask) as Box<dyn BackgroundTask>));
    dispatcher
}

/// Poll `cond` until it holds or `WAIT` elapses.
pub fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < WAIT {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    false
}
