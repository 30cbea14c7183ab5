//! Typed wrapper lifecycle: construction, release, consumption, reclamation.

mod common;

use keel_bridge::wrappers::{Instructions, Pubkey, Transaction};
use keel_bridge::BridgeError;
use keel_hostapi::Finalizer;
use keel_primitives::ErrorCode;

use common::*;

#[test]
fn test_pubkey_from_bytes_round_trip() {
    let mut guest = guest();
    let key = Pubkey::from_bytes(&mut guest, &[7; 32]).unwrap();
    assert_ne!(key.token(), 0);
    assert_eq!(key.to_bytes(&mut guest).unwrap(), vec![7; 32]);
    // The constructor's value handle was released.
    assert_eq!(guest.live_handles(), 0);
}

#[test]
fn test_pubkey_equals() {
    let mut guest = guest();
    let a = Pubkey::from_bytes(&mut guest, &[1; 32]).unwrap();
    let b = Pubkey::from_bytes(&mut guest, &[1; 32]).unwrap();
    let mut other = [1; 32];
    other[31] = 2;
    let c = Pubkey::from_bytes(&mut guest, &other).unwrap();

    assert!(a.equals(&mut guest, &b).unwrap());
    assert!(!a.equals(&mut guest, &c).unwrap());
}

#[test]
fn test_pubkey_rejects_bad_input() {
    let mut guest = guest();
    match Pubkey::from_bytes(&mut guest, &[1; 31]) {
        Err(BridgeError::Guest { code, message }) => {
            assert_eq!(code, ErrorCode::InvalidEncoding);
            assert_eq!(message, "invalid public key");
        }
        other => panic!("expected Guest error, got {other:?}"),
    }
    let err = Pubkey::from_numbers(&mut guest, &[1.0, 2.0]).unwrap_err();
    assert_eq!(err.code(), Some(ErrorCode::InvalidEncoding));
    assert_eq!(guest.live_handles(), 0);
}

#[test]
fn test_free_is_idempotent() {
    let mut guest = guest();
    let mut key = Pubkey::from_bytes(&mut guest, &[3; 32]).unwrap();
    key.free(&mut guest).unwrap();
    key.free(&mut guest).unwrap();
    assert!(key.is_released());
    assert_eq!(counter(&mut guest, "pubkey_frees"), 1);
}

#[test]
fn test_use_after_free_is_released_error() {
    let mut guest = guest();
    let mut key = Pubkey::from_bytes(&mut guest, &[3; 32]).unwrap();
    key.free(&mut guest).unwrap();
    assert!(matches!(
        key.to_bytes(&mut guest),
        Err(BridgeError::Released("Pubkey"))
    ));
}

#[test]
fn test_dropped_wrapper_is_reclaimed_at_next_call() {
    let mut guest = guest();
    let key = Pubkey::from_bytes(&mut guest, &[4; 32]).unwrap();
    drop(key);
    assert_eq!(guest.pending_finalizers(), 1);
    assert_eq!(counter(&mut guest, "pubkey_frees"), 1);
    assert_eq!(guest.pending_finalizers(), 0);
}

#[test]
fn test_missing_operation_is_unavailable() {
    let mut guest = guest();
    let key = Pubkey::from_bytes(&mut guest, &[5; 32]).unwrap();
    let err = key.to_string(&mut guest).unwrap_err();
    assert_eq!(err.code(), Some(ErrorCode::Unavailable));
    // The key is still usable.
    assert_eq!(key.to_bytes(&mut guest).unwrap(), vec![5; 32]);
}

#[test]
fn test_consumed_instructions_are_freed_through_transaction() {
    let mut guest = guest();
    let list = Instructions::new(&mut guest).unwrap();
    let mut tx = Transaction::new(&mut guest, list, None).unwrap();
    assert!(!tx.is_signed(&mut guest).unwrap());

    tx.free(&mut guest).unwrap();
    tx.free(&mut guest).unwrap();
    assert_eq!(counter(&mut guest, "tx_frees"), 1);
    assert_eq!(counter(&mut guest, "list_frees"), 0);
    assert_eq!(guest.pending_finalizers(), 0);
}

#[test]
fn test_unconsumed_instructions_are_reclaimed() {
    let mut guest = guest();
    let list = Instructions::new(&mut guest).unwrap();
    drop(list);
    assert_eq!(counter(&mut guest, "list_frees"), 1);
}

#[test]
fn test_payer_must_be_live() {
    let mut guest = guest();
    let mut payer = Pubkey::from_bytes(&mut guest, &[6; 32]).unwrap();
    payer.free(&mut guest).unwrap();
    let list = Instructions::new(&mut guest).unwrap();
    assert!(matches!(
        Transaction::new(&mut guest, list, Some(&payer)),
        Err(BridgeError::Released("Pubkey"))
    ));
    // The list was not consumed, so dropping it queued its release.
    assert_eq!(counter(&mut guest, "list_frees"), 1);
}

#[test]
fn test_list_survives_a_call_that_never_starts() {
    let mut guest = guest();
    let list = Instructions::new(&mut guest).unwrap();
    // A failing finalizer aborts the next call before any guest code runs.
    guest.reclaim_queue().push(Finalizer::Resource {
        free_export: "missing_free",
        ptr: 64,
    });

    let entered = guest.exports_entered();
    let err = Transaction::new(&mut guest, list, None).unwrap_err();
    assert_eq!(err.code(), Some(ErrorCode::Unavailable));
    assert_eq!(guest.exports_entered(), entered);
    // The list was still owned by the wrapper, so its drop queued the free.
    assert_eq!(counter(&mut guest, "list_frees"), 1);
}

#[test]
fn test_transaction_bytes_round_trip() {
    let mut guest = guest();
    let payer = Pubkey::from_bytes(&mut guest, &[6; 32]).unwrap();
    let list = Instructions::new(&mut guest).unwrap();
    let tx = Transaction::new(&mut guest, list, Some(&payer)).unwrap();

    let bytes = tx.to_bytes(&mut guest).unwrap();
    assert_eq!(bytes, vec![6; 4]);
    let decoded = Transaction::from_bytes(&mut guest, &bytes).unwrap();
    assert_ne!(decoded.token(), tx.token());
    assert_eq!(decoded.to_bytes(&mut guest).unwrap(), bytes);

    let list = Instructions::new(&mut guest).unwrap();
    let unpaid = Transaction::new(&mut guest, list, None).unwrap();
    assert_eq!(unpaid.to_bytes(&mut guest).unwrap(), vec![1, 0, 0, 0]);
}

#[test]
fn test_transaction_from_bytes_rejects_trailing_bytes() {
    let mut guest = guest();
    match Transaction::from_bytes(&mut guest, &[6, 6, 6, 6, 0]) {
        Err(BridgeError::Guest { code, message }) => {
            assert_eq!(code, ErrorCode::DeserializationFailure);
            assert_eq!(message, "trailing bytes");
        }
        other => panic!("expected Guest error, got {other:?}"),
    }
    assert_eq!(guest.live_handles(), 0);
}

#[test]
fn test_find_program_address() {
    let mut guest = guest();
    let program = Pubkey::from_bytes(&mut guest, &[9; 32]).unwrap();
    let (address, bump) =
        Pubkey::find_program_address(&mut guest, &[b"vault", b"x"], &program).unwrap();

    assert_eq!(bump, 253);
    let mut expected = [9; 32];
    expected[0] = 2;
    assert_eq!(address.to_bytes(&mut guest).unwrap(), expected);
    // The seeds handle was released.
    assert_eq!(guest.live_handles(), 0);
}

#[test]
fn test_create_with_seed() {
    let mut guest = guest();
    let base = Pubkey::from_bytes(&mut guest, &[1; 32]).unwrap();
    let owner = Pubkey::from_bytes(&mut guest, &[3; 32]).unwrap();

    let derived = Pubkey::create_with_seed(&mut guest, &base, "ab", &owner).unwrap();
    let mut expected = [1; 32];
    expected[..2].copy_from_slice(b"ab");
    expected[31] = 3;
    assert_eq!(derived.to_bytes(&mut guest).unwrap(), expected);

    let long = "s".repeat(40);
    let err = Pubkey::create_with_seed(&mut guest, &base, &long, &owner).unwrap_err();
    assert_eq!(err.code(), Some(ErrorCode::InvalidEncoding));
    // Both inputs stay usable.
    assert!(!base.is_released() && !owner.is_released());
}
