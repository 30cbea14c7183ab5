//! Host-side handles to typed guest objects.
//!
//! Each wrapper owns one guest resource token: a pointer the guest handed
//! out and will free through the type's `*_free` export. `free` is
//! idempotent. Dropping a wrapper without `free` queues the release for
//! the next call boundary. Consuming operations zero the component tokens
//! so the guest object is freed once, through the composite.
//!
//! Buffers passed into guest exports become guest-owned; buffers the guest
//! returns through a return slot are copied out and freed by the host.

use keel_hostapi::{Finalizer, HostValue, ReclaimQueue};

use crate::error::BridgeError;
use crate::runtime::GuestInstance;

/// One guest resource token.
#[derive(Debug)]
struct GuestResource {
    ptr: u32,
    kind: &'static str,
    free_export: &'static str,
    reclaim: ReclaimQueue,
}

impl GuestResource {
    fn new(inst: &GuestInstance, ptr: u32, kind: &'static str, free_export: &'static str) -> Self {
        Self {
            ptr,
            kind,
            free_export,
            reclaim: inst.reclaim_queue(),
        }
    }

    fn ptr(&self) -> Result<u32, BridgeError> {
        match self.ptr {
            0 => Err(BridgeError::Released(self.kind)),
            ptr => Ok(ptr),
        }
    }

    /// Hand the token to a guest call that takes ownership of it.
    ///
    /// The token is given up once the export has started running, whatever
    /// it returns. If the call failed before reaching the guest the wrapper
    /// still owns it.
    fn consume<T>(
        &mut self,
        inst: &mut GuestInstance,
        call: impl FnOnce(&mut GuestInstance, u32) -> Result<T, BridgeError>,
    ) -> Result<T, BridgeError> {
        let ptr = self.ptr()?;
        let entered = inst.exports_entered();
        let result = call(inst, ptr);
        if inst.exports_entered() != entered {
            self.ptr = 0;
        }
        result
    }

    fn free(&mut self, inst: &mut GuestInstance) -> Result<(), BridgeError> {
        if self.ptr == 0 {
            return Ok(());
        }
        let free_export = self.free_export;
        self.consume(inst, |inst, ptr| inst.call_export::<u32, ()>(free_export, ptr))
    }
}

impl Drop for GuestResource {
    fn drop(&mut self) {
        if self.ptr != 0 {
            self.reclaim.push(Finalizer::Resource {
                free_export: self.free_export,
                ptr: self.ptr,
            });
        }
    }
}

/// Pass `value` by handle to a constructor export and release the handle
/// afterwards.
fn construct(inst: &mut GuestInstance, export: &str, value: HostValue) -> Result<u32, BridgeError> {
    let handle = inst.alloc_value(value);
    let result = inst.call_ret(export, |ret| (ret, handle));
    inst.release_value(handle)?;
    result.map(|(ptr, _)| ptr)
}

fn seeds_value(seeds: &[&[u8]]) -> HostValue {
    HostValue::Array(seeds.iter().map(|s| HostValue::Bytes(s.to_vec())).collect())
}

macro_rules! resource_common {
    ($name:ident, $kind:literal, $free:literal) => {
        impl $name {
            fn wrap(inst: &GuestInstance, ptr: u32) -> Self {
                Self {
                    res: GuestResource::new(inst, ptr, $kind, $free),
                }
            }

            /// Release the guest object. Calling it again does nothing.
            pub fn free(&mut self, inst: &mut GuestInstance) -> Result<(), BridgeError> {
                self.res.free(inst)
            }

            /// True once freed or consumed.
            pub fn is_released(&self) -> bool {
                self.res.ptr == 0
            }

            /// The raw guest token, 0 once released.
            pub fn token(&self) -> u32 {
                self.res.ptr
            }
        }
    };
}

// ── Pubkey ──

/// A 32-byte address held by the guest.
#[derive(Debug)]
pub struct Pubkey {
    res: GuestResource,
}

resource_common!(Pubkey, "Pubkey", "pubkey_free");

impl Pubkey {
    /// Accepts base58 text, 32 bytes, or an array of 32 numbers.
    pub fn new(inst: &mut GuestInstance, value: impl Into<HostValue>) -> Result<Self, BridgeError> {
        let ptr = construct(inst, "pubkey_new", value.into())?;
        Ok(Self::wrap(inst, ptr))
    }

    pub fn from_base58(inst: &mut GuestInstance, text: &str) -> Result<Self, BridgeError> {
        Self::new(inst, text)
    }

    pub fn from_bytes(inst: &mut GuestInstance, bytes: &[u8]) -> Result<Self, BridgeError> {
        Self::new(inst, bytes.to_vec())
    }

    pub fn from_numbers(inst: &mut GuestInstance, numbers: &[f64]) -> Result<Self, BridgeError> {
        let array = numbers.iter().copied().map(HostValue::Number).collect();
        Self::new(inst, HostValue::Array(array))
    }

    /// Base58 rendering.
    pub fn to_string(&self, inst: &mut GuestInstance) -> Result<String, BridgeError> {
        let ptr = self.res.ptr()?;
        let (s, len) = inst.call_ret("pubkey_to_string", |ret| (ret, ptr))?;
        inst.take_str(s, len)
    }

    pub fn to_bytes(&self, inst: &mut GuestInstance) -> Result<Vec<u8>, BridgeError> {
        let ptr = self.res.ptr()?;
        let (b, len) = inst.call_ret("pubkey_to_bytes", |ret| (ret, ptr))?;
        inst.take_bytes(b, len)
    }

    pub fn equals(&self, inst: &mut GuestInstance, other: &Pubkey) -> Result<bool, BridgeError> {
        let (a, b) = (self.res.ptr()?, other.res.ptr()?);
        Ok(inst.call_export::<(u32, u32), u32>("pubkey_equals", (a, b))? != 0)
    }

    pub fn is_on_curve(&self, inst: &mut GuestInstance) -> Result<bool, BridgeError> {
        let ptr = self.res.ptr()?;
        Ok(inst.call_export::<u32, u32>("pubkey_is_on_curve", ptr)? != 0)
    }

    pub fn create_with_seed(
        inst: &mut GuestInstance,
        base: &Pubkey,
        seed: &str,
        owner: &Pubkey,
    ) -> Result<Pubkey, BridgeError> {
        let (base, owner) = (base.res.ptr()?, owner.res.ptr()?);
        let (seed_ptr, seed_len) = inst.pass_str(seed)?;
        let (ptr, _) = inst.call_ret("pubkey_create_with_seed", |ret| {
            (ret, base, seed_ptr, seed_len, owner)
        })?;
        Ok(Self::wrap(inst, ptr))
    }

    pub fn create_program_address(
        inst: &mut GuestInstance,
        seeds: &[&[u8]],
        program_id: &Pubkey,
    ) -> Result<Pubkey, BridgeError> {
        let program = program_id.res.ptr()?;
        let handle = inst.alloc_value(seeds_value(seeds));
        let result = inst.call_ret("pubkey_create_program_address", |ret| (ret, handle, program));
        inst.release_value(handle)?;
        let (ptr, _) = result?;
        Ok(Self::wrap(inst, ptr))
    }

    /// The first off-curve address, searching bumps from 255 down.
    pub fn find_program_address(
        inst: &mut GuestInstance,
        seeds: &[&[u8]],
        program_id: &Pubkey,
    ) -> Result<(Pubkey, u8), BridgeError> {
        let program = program_id.res.ptr()?;
        let handle = inst.alloc_value(seeds_value(seeds));
        let result = inst.call_ret("pubkey_find_program_address", |ret| (ret, handle, program));
        inst.release_value(handle)?;
        let (ptr, bump) = result?;
        Ok((Self::wrap(inst, ptr), bump as u8))
    }
}

// ── Hash ──

/// A 32-byte digest held by the guest.
#[derive(Debug)]
pub struct Hash {
    res: GuestResource,
}

resource_common!(Hash, "Hash", "hash_free");

impl Hash {
    /// Accepts base58 text, 32 bytes, or an array of 32 numbers.
    pub fn new(inst: &mut GuestInstance, value: impl Into<HostValue>) -> Result<Self, BridgeError> {
        let ptr = construct(inst, "hash_new", value.into())?;
        Ok(Self::wrap(inst, ptr))
    }

    pub fn from_base58(inst: &mut GuestInstance, text: &str) -> Result<Self, BridgeError> {
        Self::new(inst, text)
    }

    pub fn from_bytes(inst: &mut GuestInstance, bytes: &[u8]) -> Result<Self, BridgeError> {
        Self::new(inst, bytes.to_vec())
    }

    pub fn to_string(&self, inst: &mut GuestInstance) -> Result<String, BridgeError> {
        let ptr = self.res.ptr()?;
        let (s, len) = inst.call_ret("hash_to_string", |ret| (ret, ptr))?;
        inst.take_str(s, len)
    }

    pub fn to_bytes(&self, inst: &mut GuestInstance) -> Result<Vec<u8>, BridgeError> {
        let ptr = self.res.ptr()?;
        let (b, len) = inst.call_ret("hash_to_bytes", |ret| (ret, ptr))?;
        inst.take_bytes(b, len)
    }

    pub fn equals(&self, inst: &mut GuestInstance, other: &Hash) -> Result<bool, BridgeError> {
        let (a, b) = (self.res.ptr()?, other.res.ptr()?);
        Ok(inst.call_export::<(u32, u32), u32>("hash_equals", (a, b))? != 0)
    }
}

// ── Keypair ──

/// An ed25519 key pair held by the guest.
#[derive(Debug)]
pub struct Keypair {
    res: GuestResource,
}

resource_common!(Keypair, "Keypair", "keypair_free");

impl Keypair {
    /// Generate from the instance's random source.
    pub fn new(inst: &mut GuestInstance) -> Result<Self, BridgeError> {
        let (ptr, _) = inst.call_ret("keypair_new", |ret| ret)?;
        Ok(Self::wrap(inst, ptr))
    }

    /// From the 64-byte secret||public encoding.
    pub fn from_bytes(inst: &mut GuestInstance, bytes: &[u8]) -> Result<Self, BridgeError> {
        let (data, len) = inst.pass_bytes(bytes)?;
        let (ptr, _) = inst.call_ret("keypair_from_bytes", |ret| (ret, data, len))?;
        Ok(Self::wrap(inst, ptr))
    }

    pub fn to_bytes(&self, inst: &mut GuestInstance) -> Result<Vec<u8>, BridgeError> {
        let ptr = self.res.ptr()?;
        let (b, len) = inst.call_ret("keypair_to_bytes", |ret| (ret, ptr))?;
        inst.take_bytes(b, len)
    }

    pub fn pubkey(&self, inst: &mut GuestInstance) -> Result<Pubkey, BridgeError> {
        let ptr = self.res.ptr()?;
        let key = inst.call_export::<u32, u32>("keypair_pubkey", ptr)?;
        Ok(Pubkey::wrap(inst, key))
    }
}

// ── Instruction ──

#[derive(Debug)]
pub struct Instruction {
    res: GuestResource,
}

resource_common!(Instruction, "Instruction", "instruction_free");

impl Instruction {
    /// A system program transfer of `lamports` from `from` to `to`.
    pub fn system_transfer(
        inst: &mut GuestInstance,
        from: &Pubkey,
        to: &Pubkey,
        lamports: u64,
    ) -> Result<Self, BridgeError> {
        let (from, to) = (from.res.ptr()?, to.res.ptr()?);
        let ptr = inst.call_export::<(u32, u32, u64), u32>(
            "instruction_system_transfer",
            (from, to, lamports),
        )?;
        Ok(Self::wrap(inst, ptr))
    }
}

// ── Instructions ──

/// An ordered list of instructions, consumed by `Transaction::new`.
#[derive(Debug)]
pub struct Instructions {
    res: GuestResource,
}

resource_common!(Instructions, "Instructions", "instructions_free");

impl Instructions {
    pub fn new(inst: &mut GuestInstance) -> Result<Self, BridgeError> {
        let ptr = inst.call_export::<(), u32>("instructions_new", ())?;
        Ok(Self::wrap(inst, ptr))
    }

    /// Append `instruction`, which is consumed.
    pub fn push(
        &mut self,
        inst: &mut GuestInstance,
        mut instruction: Instruction,
    ) -> Result<(), BridgeError> {
        let list = self.res.ptr()?;
        instruction.res.consume(inst, |inst, item| {
            inst.call_export::<(u32, u32), ()>("instructions_push", (list, item))
        })
    }
}

// ── Transaction ──

#[derive(Debug)]
pub struct Transaction {
    res: GuestResource,
}

resource_common!(Transaction, "Transaction", "transaction_free");

impl Transaction {
    /// Compile `instructions` (consumed) into an unsigned transaction.
    /// Without `payer` the first signer becomes the fee payer.
    pub fn new(
        inst: &mut GuestInstance,
        mut instructions: Instructions,
        payer: Option<&Pubkey>,
    ) -> Result<Self, BridgeError> {
        let payer = match payer {
            Some(p) => p.res.ptr()?,
            None => 0,
        };
        let (ptr, _) = instructions.res.consume(inst, |inst, list| {
            inst.call_ret("transaction_new", |ret| (ret, list, payer))
        })?;
        Ok(Self::wrap(inst, ptr))
    }

    /// Decode the wire format. Trailing bytes are rejected.
    pub fn from_bytes(inst: &mut GuestInstance, bytes: &[u8]) -> Result<Self, BridgeError> {
        let (data, len) = inst.pass_bytes(bytes)?;
        let (ptr, _) = inst.call_ret("transaction_from_bytes", |ret| (ret, data, len))?;
        Ok(Self::wrap(inst, ptr))
    }

    /// Sign with `keypair` over the message with `recent_blockhash`.
    pub fn partial_sign(
        &mut self,
        inst: &mut GuestInstance,
        keypair: &Keypair,
        recent_blockhash: &Hash,
    ) -> Result<(), BridgeError> {
        let (tx, kp, bh) = (self.res.ptr()?, keypair.res.ptr()?, recent_blockhash.res.ptr()?);
        inst.call_ret("transaction_partial_sign", |ret| (ret, tx, kp, bh))?;
        Ok(())
    }

    pub fn is_signed(&self, inst: &mut GuestInstance) -> Result<bool, BridgeError> {
        let ptr = self.res.ptr()?;
        Ok(inst.call_export::<u32, u32>("transaction_is_signed", ptr)? != 0)
    }

    /// Check every signature against the message.
    pub fn verify(&self, inst: &mut GuestInstance) -> Result<(), BridgeError> {
        let ptr = self.res.ptr()?;
        inst.call_ret("transaction_verify", |ret| (ret, ptr))?;
        Ok(())
    }

    /// The serialized message, the bytes that get signed.
    pub fn message_data(&self, inst: &mut GuestInstance) -> Result<Vec<u8>, BridgeError> {
        let ptr = self.res.ptr()?;
        let (b, len) = inst.call_ret("transaction_message_data", |ret| (ret, ptr))?;
        inst.take_bytes(b, len)
    }

    pub fn to_bytes(&self, inst: &mut GuestInstance) -> Result<Vec<u8>, BridgeError> {
        let ptr = self.res.ptr()?;
        let (b, len) = inst.call_ret("transaction_to_bytes", |ret| (ret, ptr))?;
        inst.take_bytes(b, len)
    }
}
