//! Errors crossing the boundary in both directions.

mod common;

use keel_bridge::{BridgeConfig, BridgeError, HostEnv};
use keel_hostapi::{ErrorValue, HostValue, LogLevel};
use keel_primitives::ErrorCode;

use common::*;

// ── Guest → host ──

#[test]
fn test_return_slot_success() {
    let mut guest = guest();
    let pair = guest.call_ret("ok_ret", |ret| (ret, 3u32, 4u32)).unwrap();
    assert_eq!(pair, (3, 4));
}

#[test]
fn test_return_slot_error_carries_code_and_message() {
    let mut guest = guest();
    let err = guest
        .call_ret("fail_ret", |ret| (ret, ErrorCode::SignatureVerificationFailure.as_i32() as u32))
        .unwrap_err();
    match err {
        BridgeError::Guest { code, message } => {
            assert_eq!(code, ErrorCode::SignatureVerificationFailure);
            assert_eq!(message, "boom");
        }
        other => panic!("expected Guest error, got {other:?}"),
    }
    // The error handle was taken by the host.
    assert_eq!(guest.live_handles(), 0);
}

#[test]
fn test_unknown_error_code_maps_to_generic() {
    let mut guest = guest();
    let err = guest.call_ret("fail_ret", |ret| (ret, 999u32)).unwrap_err();
    assert_eq!(err.code(), Some(ErrorCode::Error));
}

#[test]
fn test_throw_surfaces_message() {
    let mut guest = guest();
    match guest.call_export::<(), ()>("throw_boom", ()) {
        Err(BridgeError::Thrown(message)) => assert_eq!(message, "boom"),
        other => panic!("expected Thrown, got {other:?}"),
    }
    // The instance stays usable after a throw.
    assert_eq!(guest.call_ret("ok_ret", |ret| (ret, 1u32, 2u32)).unwrap(), (1, 2));
}

#[test]
fn test_missing_export_is_unavailable() {
    let mut guest = guest();
    let err = guest.call_export::<(), ()>("no_such_export", ()).unwrap_err();
    assert_eq!(err.code(), Some(ErrorCode::Unavailable));
}

// ── Host → guest ──

#[test]
fn test_invalid_handle_becomes_pending_exception() {
    let mut guest = guest();
    let ret = guest.call_export::<(u32, u32), u32>("call_with", (9999, 128)).unwrap();
    assert_eq!(ret, 0);

    let exn = take_exn(&mut guest);
    let value = guest.take_value(exn).unwrap();
    assert_eq!(value.as_error().unwrap().code, ErrorCode::InvalidHandle);
    assert_eq!(take_exn(&mut guest), 0);
}

#[test]
fn test_unread_exception_is_released_when_replaced() {
    let config = BridgeConfig {
        enable_guest_logs: true,
        ..BridgeConfig::default()
    };
    let mut guest = guest_with(config, HostEnv::default());

    guest.call_export::<u32, ()>("release", 9999).unwrap();
    assert_eq!(guest.live_handles(), 1);
    guest.call_export::<u32, ()>("release", 9998).unwrap();
    // Only the newer error is still held.
    assert_eq!(guest.live_handles(), 1);
    assert_eq!(guest.logs().len(), 1);
    assert_eq!(guest.logs()[0].level, LogLevel::Warn);
    assert_eq!(guest.logs()[0].message, "exception dropped unread");

    let exn = take_exn(&mut guest);
    let value = guest.take_value(exn).unwrap();
    assert!(value.as_error().unwrap().message.contains("9998"));
}

#[test]
fn test_type_mismatch_becomes_pending_exception() {
    let mut guest = guest();
    let not_callable = guest.alloc_value(HostValue::from("not a function"));
    guest.call_export::<u32, ()>("schedule", not_callable).unwrap();

    let exn = take_exn(&mut guest);
    let value = guest.take_value(exn).unwrap();
    assert_eq!(value.as_error().unwrap().code, ErrorCode::TypeMismatch);
}

#[test]
fn test_host_function_error_reaches_guest() {
    let mut guest = guest();
    let failing = guest.alloc_value(HostValue::function(|_| {
        Err(ErrorValue::new(ErrorCode::ChannelClosed, "gone"))
    }));
    let ret = guest.call_export::<(u32, u32), u32>("call_with", (failing, 128)).unwrap();
    assert_eq!(ret, 0);

    let exn = take_exn(&mut guest);
    let value = guest.take_value(exn).unwrap();
    let err = value.as_error().unwrap();
    assert_eq!(err.code, ErrorCode::ChannelClosed);
    assert_eq!(err.message, "gone");
}

#[test]
fn test_host_function_result_reaches_guest() {
    let mut guest = guest();
    let double = guest.alloc_value(HostValue::function(|arg| match arg {
        HostValue::Number(n) => Ok(HostValue::Number(n * 2.0)),
        _ => Err(ErrorValue::new(ErrorCode::TypeMismatch, "expected a number")),
    }));
    let arg = guest.alloc_value(HostValue::Number(21.0));
    let ret = guest.call_export::<(u32, u32), u32>("call_with", (double, arg)).unwrap();
    assert_eq!(guest.take_value(ret).unwrap().as_number().unwrap(), 42.0);
    assert_eq!(take_exn(&mut guest), 0);
}
