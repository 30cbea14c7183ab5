//! Guest logging, microtasks, worker delivery and the miner task.

mod common;

use std::cell::RefCell;
use std::rc::Rc;

use futures::executor::block_on;

use keel_bridge::{BridgeConfig, HostEnv, MineRequest, MinerEvent, MINER_TASK};
use keel_hostapi::{ErrorValue, HostValue, LogLevel, MemLogSink};
use keel_primitives::{ErrorCode, Hash, Pubkey};

use common::*;

fn logging_config() -> BridgeConfig {
    BridgeConfig {
        enable_guest_logs: true,
        ..BridgeConfig::default()
    }
}

// ── Logging ──

#[test]
fn test_guest_logs_are_captured() {
    let sink = MemLogSink::new();
    let mut guest = guest_with(logging_config(), HostEnv::default().with_sink(sink.clone()));

    guest.call_export::<u32, ()>("say", 2).unwrap();
    assert_eq!(guest.logs().len(), 1);
    assert_eq!(guest.logs()[0].level, LogLevel::Info);
    assert_eq!(guest.logs()[0].message, "hello from guest");
    assert_eq!(sink.len(), 1);
}

#[test]
fn test_logs_below_threshold_are_dropped() {
    let sink = MemLogSink::new();
    let mut guest = guest_with(logging_config(), HostEnv::default().with_sink(sink.clone()));
    guest.call_export::<u32, ()>("say", 0).unwrap();
    guest.call_export::<u32, ()>("say", 1).unwrap();
    assert!(guest.logs().is_empty());
    assert!(sink.is_empty());
}

#[test]
fn test_logs_disabled_by_default() {
    let mut guest = guest();
    guest.call_export::<u32, ()>("say", 4).unwrap();
    assert!(guest.logs().is_empty());
}

#[test]
fn test_captured_logs_are_capped() {
    let sink = MemLogSink::new();
    let config = BridgeConfig {
        max_log_lines: 2,
        ..logging_config()
    };
    let mut guest = guest_with(config, HostEnv::default().with_sink(sink.clone()));
    for _ in 0..3 {
        guest.call_export::<u32, ()>("say", 3).unwrap();
    }
    assert_eq!(guest.logs().len(), 2);
    assert_eq!(sink.len(), 3);
}

// ── Microtasks ──

#[test]
fn test_microtasks_run_in_order() {
    let mut guest = guest();
    let closure = guest
        .call_export::<(u32, u32), u32>("make_closure", (REUSABLE, ECHO))
        .unwrap();
    let order = Rc::new(RefCell::new(Vec::new()));
    let seen = Rc::clone(&order);
    let task = guest.alloc_value(HostValue::function(move |_| {
        seen.borrow_mut().push("host");
        Ok(HostValue::Undefined)
    }));

    guest.call_export::<u32, ()>("schedule", closure).unwrap();
    guest.call_export::<u32, ()>("schedule", task).unwrap();
    assert_eq!(take_exn(&mut guest), 0);

    assert_eq!(guest.run_microtasks().unwrap(), 2);
    assert_eq!(counter(&mut guest, "calls"), 1);
    assert_eq!(*order.borrow(), vec!["host"]);
    assert_eq!(guest.run_microtasks().unwrap(), 0);
}

#[test]
fn test_failing_microtask_does_not_stop_queue() {
    let mut guest = guest();
    let failing = guest.alloc_value(HostValue::function(|_| {
        Err(ErrorValue::new(ErrorCode::Error, "task failed"))
    }));
    let closure = guest
        .call_export::<(u32, u32), u32>("make_closure", (REUSABLE, ECHO))
        .unwrap();

    guest.call_export::<u32, ()>("schedule", failing).unwrap();
    guest.call_export::<u32, ()>("schedule", closure).unwrap();
    assert_eq!(guest.run_microtasks().unwrap(), 2);
    assert_eq!(counter(&mut guest, "calls"), 1);
}

// ── Workers ──

#[test]
fn test_worker_replies_reach_onmessage() {
    let env = HostEnv::default().with_dispatcher(echo_dispatcher());
    let mut guest = guest_with(BridgeConfig::default(), env);

    let id = guest.call_export::<(), u32>("spawn_echo", ()).unwrap();
    assert_ne!(id, 0);
    assert_eq!(guest.guest_workers(), 1);

    let received = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&received);
    let handler = guest.alloc_value(HostValue::function(move |arg| {
        if let HostValue::Bytes(payload) = arg {
            sink.borrow_mut().push(payload);
        }
        Ok(HostValue::Undefined)
    }));
    guest
        .call_export::<(u32, u32), ()>("set_onmessage", (id, handler))
        .unwrap();

    let (ptr, len) = guest.pass_bytes(b"hi").unwrap();
    guest
        .call_export::<(u32, u32, u32), ()>("post", (id, ptr, len))
        .unwrap();
    assert_eq!(take_exn(&mut guest), 0);

    assert!(wait_until(|| guest.pump_workers().unwrap() > 0));
    assert_eq!(*received.borrow(), vec![b"echo:hi".to_vec()]);
}

#[test]
fn test_worker_replies_reach_guest_closure() {
    let env = HostEnv::default().with_dispatcher(echo_dispatcher());
    let mut guest = guest_with(BridgeConfig::default(), env);

    let id = guest.call_export::<(), u32>("spawn_echo", ()).unwrap();
    let closure = guest
        .call_export::<(u32, u32), u32>("make_closure", (REUSABLE, ECHO))
        .unwrap();
    guest
        .call_export::<(u32, u32), ()>("set_onmessage", (id, closure))
        .unwrap();

    let (ptr, len) = guest.pass_bytes(b"ping").unwrap();
    guest
        .call_export::<(u32, u32, u32), ()>("post", (id, ptr, len))
        .unwrap();

    assert!(wait_until(|| guest.pump_workers().unwrap() > 0));
    assert_eq!(counter(&mut guest, "calls"), 1);
}

#[test]
fn test_failing_onmessage_does_not_drop_replies() {
    let env = HostEnv::default().with_dispatcher(echo_dispatcher());
    let mut guest = guest_with(BridgeConfig::default(), env);
    let id = guest.call_export::<(), u32>("spawn_echo", ()).unwrap();

    let received = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&received);
    let handler = guest.alloc_value(HostValue::function(move |arg| {
        let first = sink.borrow().is_empty();
        if let HostValue::Bytes(payload) = arg {
            sink.borrow_mut().push(payload);
        }
        if first {
            return Err(ErrorValue::new(ErrorCode::Error, "handler failed"));
        }
        Ok(HostValue::Undefined)
    }));
    guest
        .call_export::<(u32, u32), ()>("set_onmessage", (id, handler))
        .unwrap();

    for payload in [&b"a"[..], b"b"] {
        let (ptr, len) = guest.pass_bytes(payload).unwrap();
        guest
            .call_export::<(u32, u32, u32), ()>("post", (id, ptr, len))
            .unwrap();
    }
    // Let both replies queue up so one pump drains them together.
    std::thread::sleep(std::time::Duration::from_millis(50));

    let mut failures = 0;
    assert!(wait_until(|| {
        if guest.pump_workers().is_err() {
            failures += 1;
        }
        received.borrow().len() == 2
    }));
    assert_eq!(failures, 1);
    assert_eq!(*received.borrow(), vec![b"echo:a".to_vec(), b"echo:b".to_vec()]);
}

#[test]
fn test_unknown_worker_is_exception() {
    // The default environment only offers the miner.
    let mut guest = guest();
    let id = guest.call_export::<(), u32>("spawn_echo", ()).unwrap();
    assert_eq!(id, 0);

    let exn = take_exn(&mut guest);
    let value = guest.take_value(exn).unwrap();
    assert_eq!(value.as_error().unwrap().code, ErrorCode::Unavailable);
    assert_eq!(guest.guest_workers(), 0);
}

#[test]
fn test_post_to_unknown_worker_is_exception() {
    let mut guest = guest();
    guest
        .call_export::<(u32, u32, u32), ()>("post", (77, 0, 0))
        .unwrap();
    let exn = take_exn(&mut guest);
    let value = guest.take_value(exn).unwrap();
    assert_eq!(value.as_error().unwrap().code, ErrorCode::InvalidHandle);
}

// ── Miner ──

#[test]
fn test_miner_from_host() {
    let guest = guest();
    let task = guest.register_background_task(MINER_TASK).unwrap();
    block_on(task.ready()).unwrap();

    let request = MineRequest {
        challenge: Hash([1; 32]),
        difficulty: Hash([0xff; 32]),
        signer: Pubkey([2; 32]),
        nonce_start: 5,
        nonce_end: u64::MAX,
        cutoff_ms: 60_000,
    };
    task.send_json(&request).unwrap();
    match task.recv_json::<MinerEvent>(WAIT).unwrap() {
        Some(MinerEvent::Solution(solution)) => assert_eq!(solution.nonce, 5),
        other => panic!("expected a solution, got {other:?}"),
    }
}

#[test]
fn test_unknown_background_task() {
    let guest = guest();
    let err = guest.register_background_task("nope").unwrap_err();
    assert_eq!(err.code(), Some(ErrorCode::Unavailable));
}
