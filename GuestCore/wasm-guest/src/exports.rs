//! Guest exported functions.
//!
//! Allocation: `bridge_malloc`, `bridge_realloc`, `bridge_free`.
//! Typed objects (`Pubkey`, `Hash`, `Keypair`, `Instruction`,
//! `Instructions`, `Transaction`) live on the guest heap and cross the
//! boundary as opaque `u32` tokens. Each type has a `*_free` export.
//!
//! Fallible exports take a `retptr` first and report through the return
//! slot; they never trap on bad input. Value handles passed in are
//! borrowed. Buffers passed in are guest-owned and taken over here.

use alloc::alloc::{alloc, dealloc, realloc, Layout};
use alloc::boxed::Box;
use alloc::vec::Vec;

use keel_primitives::{address, system_transfer, Hash, Instruction, Keypair, Pubkey, Transaction};

use crate::host_bridge::{
    self, give_buffer, read_key_input, read_seeds, take_buffer, write_slot, Closure, GuestResult, HostRef,
    Worker,
};
use crate::values::{seed_slices, RetSlot};

// ── Allocation ──

fn layout(size: u32, align: u32) -> Option<Layout> {
    Layout::from_size_align(size as usize, align.max(1) as usize).ok()
}

/// Allocate `size` bytes. Returns 0 on failure; a zero-sized request gets
/// a dangling, aligned pointer.
#[no_mangle]
pub extern "C" fn bridge_malloc(size: u32, align: u32) -> u32 {
    let Some(layout) = layout(size, align) else {
        return 0;
    };
    if size == 0 {
        return layout.align() as u32;
    }
    unsafe { alloc(layout) as u32 }
}

#[no_mangle]
pub extern "C" fn bridge_realloc(ptr: u32, old_size: u32, new_size: u32, align: u32) -> u32 {
    if old_size == 0 {
        return bridge_malloc(new_size, align);
    }
    if new_size == 0 {
        bridge_free(ptr, old_size, align);
        return bridge_malloc(0, align);
    }
    let Some(layout) = layout(old_size, align) else {
        return 0;
    };
    unsafe { realloc(ptr as *mut u8, layout, new_size as usize) as u32 }
}

#[no_mangle]
pub extern "C" fn bridge_free(ptr: u32, size: u32, align: u32) {
    if ptr == 0 || size == 0 {
        return;
    }
    if let Some(layout) = layout(size, align) {
        unsafe { dealloc(ptr as *mut u8, layout) }
    }
}

// ── Tokens ──

fn into_token<T>(value: T) -> u32 {
    Box::into_raw(Box::new(value)) as u32
}

/// # Safety
/// `token` must be a live token of type `T`.
unsafe fn borrow<'a, T>(token: u32) -> &'a T {
    &*(token as *const T)
}

/// # Safety
/// `token` must be a live token of type `T`.
unsafe fn borrow_mut<'a, T>(token: u32) -> &'a mut T {
    &mut *(token as *mut T)
}

/// Consume a token. A 0 token is a no-op.
///
/// # Safety
/// `token` must be 0 or a live token of type `T`, not used afterwards.
unsafe fn take<T>(token: u32) -> Option<T> {
    (token != 0).then(|| *Box::from_raw(token as *mut T))
}

/// Report `result` through the return slot.
fn finish(retptr: u32, result: GuestResult<RetSlot>) {
    unsafe { write_slot(retptr, result) }
}

fn token_slot<T>(result: GuestResult<T>) -> GuestResult<RetSlot> {
    result.map(|value| RetSlot::ok(into_token(value), 0))
}

// ── Pubkey ──

#[no_mangle]
pub extern "C" fn pubkey_new(retptr: u32, value: u32) {
    let result = read_key_input(value).and_then(|input| Ok(input.to_pubkey()?));
    finish(retptr, token_slot(result));
}

#[no_mangle]
pub extern "C" fn pubkey_free(ptr: u32) {
    drop(unsafe { take::<Pubkey>(ptr) });
}

#[no_mangle]
pub extern "C" fn pubkey_to_string(retptr: u32, ptr: u32) {
    let key = unsafe { borrow::<Pubkey>(ptr) };
    finish(retptr, Ok(give_buffer(key.to_base58().into_bytes())));
}

#[no_mangle]
pub extern "C" fn pubkey_to_bytes(retptr: u32, ptr: u32) {
    let key = unsafe { borrow::<Pubkey>(ptr) };
    finish(retptr, Ok(give_buffer(key.to_bytes().to_vec())));
}

#[no_mangle]
pub extern "C" fn pubkey_equals(a: u32, b: u32) -> u32 {
    unsafe { (borrow::<Pubkey>(a) == borrow::<Pubkey>(b)) as u32 }
}

#[no_mangle]
pub extern "C" fn pubkey_is_on_curve(ptr: u32) -> u32 {
    unsafe { borrow::<Pubkey>(ptr).is_on_curve() as u32 }
}

#[no_mangle]
pub extern "C" fn pubkey_create_with_seed(retptr: u32, base: u32, seed_ptr: u32, seed_len: u32, owner: u32) {
    let seed = unsafe { take_buffer(seed_ptr, seed_len) };
    let (base, owner) = unsafe { (borrow::<Pubkey>(base), borrow::<Pubkey>(owner)) };
    let result = core::str::from_utf8(&seed)
        .map_err(|_| keel_primitives::PrimitiveError::InvalidSeeds("seed is not UTF-8".into()))
        .and_then(|seed| address::create_with_seed(base, seed, owner));
    finish(retptr, token_slot(result.map_err(Into::into)));
}

#[no_mangle]
pub extern "C" fn pubkey_create_program_address(retptr: u32, seeds: u32, program: u32) {
    let program = unsafe { borrow::<Pubkey>(program) };
    let result = read_seeds(seeds)
        .and_then(|seeds| Ok(address::create_program_address(&seed_slices(&seeds), program)?));
    finish(retptr, token_slot(result));
}

#[no_mangle]
pub extern "C" fn pubkey_find_program_address(retptr: u32, seeds: u32, program: u32) {
    let program = unsafe { borrow::<Pubkey>(program) };
    let result = read_seeds(seeds)
        .and_then(|seeds| Ok(address::find_program_address(&seed_slices(&seeds), program)?))
        .map(|(key, bump)| RetSlot::ok(into_token(key), bump as u32));
    finish(retptr, result);
}

// ── Hash ──

#[no_mangle]
pub extern "C" fn hash_new(retptr: u32, value: u32) {
    let result = read_key_input(value).and_then(|input| Ok(input.to_hash()?));
    finish(retptr, token_slot(result));
}

#[no_mangle]
pub extern "C" fn hash_free(ptr: u32) {
    drop(unsafe { take::<Hash>(ptr) });
}

#[no_mangle]
pub extern "C" fn hash_to_string(retptr: u32, ptr: u32) {
    let hash = unsafe { borrow::<Hash>(ptr) };
    finish(retptr, Ok(give_buffer(hash.to_base58().into_bytes())));
}

#[no_mangle]
pub extern "C" fn hash_to_bytes(retptr: u32, ptr: u32) {
    let hash = unsafe { borrow::<Hash>(ptr) };
    finish(retptr, Ok(give_buffer(hash.to_bytes().to_vec())));
}

#[no_mangle]
pub extern "C" fn hash_equals(a: u32, b: u32) -> u32 {
    unsafe { (borrow::<Hash>(a) == borrow::<Hash>(b)) as u32 }
}

// ── Keypair ──

/// A keypair from a host-random seed.
#[no_mangle]
pub extern "C" fn keypair_new(retptr: u32) {
    let mut seed = [0u8; 32];
    let result = host_bridge::random_fill(&mut seed).map(|()| Keypair::from_seed(&seed));
    finish(retptr, token_slot(result));
}

#[no_mangle]
pub extern "C" fn keypair_from_bytes(retptr: u32, ptr: u32, len: u32) {
    let bytes = unsafe { take_buffer(ptr, len) };
    let result = Keypair::from_bytes(&bytes).map_err(Into::into);
    finish(retptr, token_slot(result));
}

#[no_mangle]
pub extern "C" fn keypair_to_bytes(retptr: u32, ptr: u32) {
    let keypair = unsafe { borrow::<Keypair>(ptr) };
    finish(retptr, Ok(give_buffer(keypair.to_bytes().to_vec())));
}

/// A new `Pubkey` token for the keypair's public half.
#[no_mangle]
pub extern "C" fn keypair_pubkey(ptr: u32) -> u32 {
    into_token(unsafe { borrow::<Keypair>(ptr) }.pubkey())
}

#[no_mangle]
pub extern "C" fn keypair_free(ptr: u32) {
    drop(unsafe { take::<Keypair>(ptr) });
}

// ── Instructions ──

#[no_mangle]
pub extern "C" fn instruction_system_transfer(from: u32, to: u32, lamports: u64) -> u32 {
    let (from, to) = unsafe { (borrow::<Pubkey>(from), borrow::<Pubkey>(to)) };
    into_token(system_transfer(from, to, lamports))
}

#[no_mangle]
pub extern "C" fn instruction_free(ptr: u32) {
    drop(unsafe { take::<Instruction>(ptr) });
}

#[no_mangle]
pub extern "C" fn instructions_new() -> u32 {
    into_token(Vec::<Instruction>::new())
}

/// Append `item` to `list`, consuming `item`.
#[no_mangle]
pub extern "C" fn instructions_push(list: u32, item: u32) {
    let list = unsafe { borrow_mut::<Vec<Instruction>>(list) };
    if let Some(item) = unsafe { take::<Instruction>(item) } {
        list.push(item);
    }
}

#[no_mangle]
pub extern "C" fn instructions_free(ptr: u32) {
    drop(unsafe { take::<Vec<Instruction>>(ptr) });
}

// ── Transaction ──

/// Compile `list` (consumed) into an unsigned transaction. `payer` 0
/// means the first signer pays.
#[no_mangle]
pub extern "C" fn transaction_new(retptr: u32, list: u32, payer: u32) {
    let instructions = unsafe { take::<Vec<Instruction>>(list) }.unwrap_or_default();
    let payer = (payer != 0).then(|| unsafe { borrow::<Pubkey>(payer) });
    let result = Transaction::new(&instructions, payer).map_err(Into::into);
    finish(retptr, token_slot(result));
}

#[no_mangle]
pub extern "C" fn transaction_from_bytes(retptr: u32, ptr: u32, len: u32) {
    let bytes = unsafe { take_buffer(ptr, len) };
    let result = Transaction::from_bytes(&bytes).map_err(Into::into);
    finish(retptr, token_slot(result));
}

#[no_mangle]
pub extern "C" fn transaction_partial_sign(retptr: u32, tx: u32, keypair: u32, blockhash: u32) {
    let tx = unsafe { borrow_mut::<Transaction>(tx) };
    let (keypair, blockhash) = unsafe { (borrow::<Keypair>(keypair), borrow::<Hash>(blockhash)) };
    let result = tx.partial_sign(keypair, *blockhash).map(|()| RetSlot::ok(0, 0));
    finish(retptr, result.map_err(Into::into));
}

#[no_mangle]
pub extern "C" fn transaction_is_signed(ptr: u32) -> u32 {
    unsafe { borrow::<Transaction>(ptr) }.is_signed() as u32
}

#[no_mangle]
pub extern "C" fn transaction_verify(retptr: u32, ptr: u32) {
    let tx = unsafe { borrow::<Transaction>(ptr) };
    let result = tx.verify().map(|()| RetSlot::ok(0, 0));
    finish(retptr, result.map_err(Into::into));
}

#[no_mangle]
pub extern "C" fn transaction_message_data(retptr: u32, ptr: u32) {
    let tx = unsafe { borrow::<Transaction>(ptr) };
    finish(retptr, tx.message_data().map(give_buffer).map_err(Into::into));
}

#[no_mangle]
pub extern "C" fn transaction_to_bytes(retptr: u32, ptr: u32) {
    let tx = unsafe { borrow::<Transaction>(ptr) };
    finish(retptr, tx.to_bytes().map(give_buffer).map_err(Into::into));
}

#[no_mangle]
pub extern "C" fn transaction_free(ptr: u32) {
    drop(unsafe { take::<Transaction>(ptr) });
}

// ── Miner ──

/// Open the host miner. Every event it emits is passed to `handler`, a
/// borrowed callable, as a byte string of JSON.
#[no_mangle]
pub extern "C" fn miner_open(retptr: u32, handler: u32) {
    finish(retptr, token_slot(open_miner(handler)));
}

fn open_miner(handler: u32) -> GuestResult<Worker> {
    let handler = HostRef::clone_borrowed(handler)?;
    let mut worker = Worker::spawn("miner")?;
    let forward = Closure::new(move |event| match host_bridge::call(handler.handle(), event) {
        Ok(ret) => ret,
        Err(err) => {
            host_bridge::rethrow(err);
            None
        }
    })?;
    worker.set_onmessage(forward)?;
    Ok(worker)
}

/// Send a JSON request (guest-owned buffer) to an open miner.
#[no_mangle]
pub extern "C" fn miner_post(retptr: u32, worker: u32, ptr: u32, len: u32) {
    let payload = unsafe { take_buffer(ptr, len) };
    let worker = unsafe { borrow::<Worker>(worker) };
    finish(retptr, worker.post(&payload).map(|()| RetSlot::ok(0, 0)));
}

#[no_mangle]
pub extern "C" fn miner_free(ptr: u32) {
    drop(unsafe { take::<Worker>(ptr) });
}
