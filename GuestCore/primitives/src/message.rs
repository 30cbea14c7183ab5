//! Legacy message compilation and wire encoding.
//!
//! Account keys are ordered: writable signers (fee payer first), readonly
//! signers, writable non-signers, readonly non-signers. The header counts
//! let a decoder recover each key's role from its position alone.

use alloc::vec::Vec;

use serde::{Deserialize, Serialize};

use crate::codec::{write_len, Reader};
use crate::error::{PrimitiveError, PrimitiveResult};
use crate::instruction::Instruction;
use crate::types::{Hash, Pubkey};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageHeader {
    pub num_required_signatures: u8,
    pub num_readonly_signed_accounts: u8,
    pub num_readonly_unsigned_accounts: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompiledInstruction {
    pub program_id_index: u8,
    pub accounts: Vec<u8>,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub header: MessageHeader,
    pub account_keys: Vec<Pubkey>,
    pub recent_blockhash: Hash,
    pub instructions: Vec<CompiledInstruction>,
}

#[derive(Clone, Copy)]
struct KeyRole {
    key: Pubkey,
    signer: bool,
    writable: bool,
}

fn upsert(roles: &mut Vec<KeyRole>, key: Pubkey, signer: bool, writable: bool) {
    if let Some(role) = roles.iter_mut().find(|r| r.key == key) {
        role.signer |= signer;
        role.writable |= writable;
    } else {
        roles.push(KeyRole {
            key,
            signer,
            writable,
        });
    }
}

fn index_of(keys: &[Pubkey], key: &Pubkey) -> PrimitiveResult<u8> {
    keys.iter()
        .position(|k| k == key)
        .and_then(|i| u8::try_from(i).ok())
        .ok_or_else(|| PrimitiveError::InvalidEncoding("too many account keys".into()))
}

impl Message {
    /// Compile `instructions` with an optional fee payer.
    pub fn new(instructions: &[Instruction], payer: Option<&Pubkey>) -> PrimitiveResult<Self> {
        let mut roles: Vec<KeyRole> = Vec::new();
        if let Some(payer) = payer {
            upsert(&mut roles, *payer, true, true);
        }
        for ix in instructions {
            for meta in &ix.accounts {
                upsert(&mut roles, meta.pubkey, meta.is_signer, meta.is_writable);
            }
        }
        for ix in instructions {
            upsert(&mut roles, ix.program_id, false, false);
        }

        // Stable partition keeps first-seen order inside each group.
        let group = |r: &KeyRole| -> u8 {
            match (r.signer, r.writable) {
                (true, true) => 0,
                (true, false) => 1,
                (false, true) => 2,
                (false, false) => 3,
            }
        };
        let mut ordered = roles;
        ordered.sort_by_key(group);

        let count = |g: u8| ordered.iter().filter(|r| group(*r) == g).count();
        let header = MessageHeader {
            num_required_signatures: u8::try_from(count(0) + count(1))
                .map_err(|_| PrimitiveError::InvalidEncoding("too many signers".into()))?,
            num_readonly_signed_accounts: u8::try_from(count(1))
                .map_err(|_| PrimitiveError::InvalidEncoding("too many signers".into()))?,
            num_readonly_unsigned_accounts: u8::try_from(count(3))
                .map_err(|_| PrimitiveError::InvalidEncoding("too many accounts".into()))?,
        };
        let account_keys: Vec<Pubkey> = ordered.iter().map(|r| r.key).collect();

        let mut compiled = Vec::with_capacity(instructions.len());
        for ix in instructions {
            let mut accounts = Vec::with_capacity(ix.accounts.len());
            for meta in &ix.accounts {
                accounts.push(index_of(&account_keys, &meta.pubkey)?);
            }
            compiled.push(CompiledInstruction {
                program_id_index: index_of(&account_keys, &ix.program_id)?,
                accounts,
                data: ix.data.clone(),
            });
        }

        Ok(Self {
            header,
            account_keys,
            recent_blockhash: Hash::default(),
            instructions: compiled,
        })
    }

    pub fn fee_payer(&self) -> Option<&Pubkey> {
        if self.header.num_required_signatures == 0 {
            return None;
        }
        self.account_keys.first()
    }

    /// The keys that must sign, in signature order.
    pub fn signer_keys(&self) -> &[Pubkey] {
        let n = (self.header.num_required_signatures as usize).min(self.account_keys.len());
        &self.account_keys[..n]
    }

    pub fn serialize(&self) -> PrimitiveResult<Vec<u8>> {
        let mut buf = Vec::with_capacity(128);
        buf.push(self.header.num_required_signatures);
        buf.push(self.header.num_readonly_signed_accounts);
        buf.push(self.header.num_readonly_unsigned_accounts);

        write_len(&mut buf, self.account_keys.len())?;
        for key in &self.account_keys {
            buf.extend_from_slice(key.as_bytes());
        }
        buf.extend_from_slice(self.recent_blockhash.as_bytes());

        write_len(&mut buf, self.instructions.len())?;
        for ix in &self.instructions {
            buf.push(ix.program_id_index);
            write_len(&mut buf, ix.accounts.len())?;
            buf.extend_from_slice(&ix.accounts);
            write_len(&mut buf, ix.data.len())?;
            buf.extend_from_slice(&ix.data);
        }
        Ok(buf)
    }

    pub(crate) fn read_from(r: &mut Reader<'_>) -> PrimitiveResult<Self> {
        let header = MessageHeader {
            num_required_signatures: r.read_u8()?,
            num_readonly_signed_accounts: r.read_u8()?,
            num_readonly_unsigned_accounts: r.read_u8()?,
        };

        let key_count = r.read_len()?;
        let mut account_keys = Vec::with_capacity(key_count);
        for _ in 0..key_count {
            account_keys.push(Pubkey(r.read_array::<32>()?));
        }
        let recent_blockhash = Hash(r.read_array::<32>()?);

        let ix_count = r.read_len()?;
        let mut instructions = Vec::with_capacity(ix_count);
        for _ in 0..ix_count {
            let program_id_index = r.read_u8()?;
            let n = r.read_len()?;
            let accounts = r.read_bytes(n)?.to_vec();
            let n = r.read_len()?;
            let data = r.read_bytes(n)?.to_vec();
            instructions.push(CompiledInstruction {
                program_id_index,
                accounts,
                data,
            });
        }

        let message = Self {
            header,
            account_keys,
            recent_blockhash,
            instructions,
        };
        message.sanitize()?;
        Ok(message)
    }

    pub fn deserialize(bytes: &[u8]) -> PrimitiveResult<Self> {
        let mut r = Reader::new(bytes);
        let message = Self::read_from(&mut r)?;
        r.finish()?;
        Ok(message)
    }

    /// Structural checks a decoded message must pass.
    fn sanitize(&self) -> PrimitiveResult<()> {
        let keys = self.account_keys.len();
        let h = &self.header;
        if h.num_required_signatures as usize + h.num_readonly_unsigned_accounts as usize > keys
            || (h.num_readonly_signed_accounts > 0
                && h.num_readonly_signed_accounts >= h.num_required_signatures)
        {
            return Err(PrimitiveError::Deserialization("inconsistent header".into()));
        }
        for ix in &self.instructions {
            if ix.program_id_index as usize >= keys
                || ix.accounts.iter().any(|&a| a as usize >= keys)
            {
                return Err(PrimitiveError::Deserialization(
                    "account index out of range".into(),
                ));
            }
        }
        Ok(())
    }
}
