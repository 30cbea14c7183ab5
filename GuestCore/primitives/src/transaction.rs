//! Signed transactions.
//!
//! Wire form: compact-u16 signature count, 64-byte signatures, message.
//! Unsigned slots hold 64 zero bytes.

use alloc::vec;
use alloc::vec::Vec;

use crate::codec::{write_len, Reader};
use crate::crypto::verify_ed25519;
use crate::error::{PrimitiveError, PrimitiveResult};
use crate::instruction::Instruction;
use crate::keypair::Keypair;
use crate::message::Message;
use crate::types::{Hash, Pubkey, SIGNATURE_BYTES};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    pub signatures: Vec<[u8; SIGNATURE_BYTES]>,
    pub message: Message,
}

impl Transaction {
    /// Build an unsigned transaction; one zeroed signature slot per signer.
    pub fn new(instructions: &[Instruction], payer: Option<&Pubkey>) -> PrimitiveResult<Self> {
        let message = Message::new(instructions, payer)?;
        let signatures = vec![[0u8; SIGNATURE_BYTES]; message.header.num_required_signatures as usize];
        Ok(Self {
            signatures,
            message,
        })
    }

    pub fn message_data(&self) -> PrimitiveResult<Vec<u8>> {
        self.message.serialize()
    }

    /// Sign with `keypair` after setting the blockhash.
    ///
    /// Changing the blockhash invalidates signatures made over the old one,
    /// so those slots are cleared first.
    pub fn partial_sign(&mut self, keypair: &Keypair, recent_blockhash: Hash) -> PrimitiveResult<()> {
        let signer = keypair.pubkey();
        let position = self
            .message
            .signer_keys()
            .iter()
            .position(|k| *k == signer)
            .ok_or(PrimitiveError::KeypairPubkeyMismatch)?;

        if self.message.recent_blockhash != recent_blockhash {
            self.message.recent_blockhash = recent_blockhash;
            for sig in self.signatures.iter_mut() {
                *sig = [0u8; SIGNATURE_BYTES];
            }
        }

        let data = self.message_data()?;
        self.signatures[position] = keypair.sign(&data);
        Ok(())
    }

    /// Every required signature slot is filled.
    pub fn is_signed(&self) -> bool {
        self.signatures.len() == self.message.header.num_required_signatures as usize
            && self.signatures.iter().all(|s| s.iter().any(|b| *b != 0))
    }

    /// Check every signature against its signer key.
    pub fn verify(&self) -> PrimitiveResult<()> {
        let data = self.message_data()?;
        let signers = self.message.signer_keys();
        if signers.len() != self.signatures.len() {
            return Err(PrimitiveError::SignatureVerification);
        }
        for (sig, key) in self.signatures.iter().zip(signers) {
            if !verify_ed25519(&data, sig, key.as_bytes()) {
                return Err(PrimitiveError::SignatureVerification);
            }
        }
        Ok(())
    }

    pub fn to_bytes(&self) -> PrimitiveResult<Vec<u8>> {
        let message = self.message.serialize()?;
        let mut buf = Vec::with_capacity(3 + self.signatures.len() * SIGNATURE_BYTES + message.len());
        write_len(&mut buf, self.signatures.len())?;
        for sig in &self.signatures {
            buf.extend_from_slice(sig);
        }
        buf.extend_from_slice(&message);
        Ok(buf)
    }

    /// Decode wire bytes; rejects truncated input and trailing bytes.
    pub fn from_bytes(bytes: &[u8]) -> PrimitiveResult<Self> {
        let mut r = Reader::new(bytes);
        let count = r.read_len()?;
        let mut signatures = Vec::with_capacity(count);
        for _ in 0..count {
            signatures.push(r.read_array::<SIGNATURE_BYTES>()?);
        }
        let message = Message::read_from(&mut r)?;
        r.finish()?;
        if signatures.len() != message.header.num_required_signatures as usize {
            return Err(PrimitiveError::Deserialization(alloc::format!(
                "{} signatures for {} required signers",
                signatures.len(),
                message.header.num_required_signatures
            )));
        }
        Ok(Self {
            signatures,
            message,
        })
    }
}
