//! The object handle table.
//!
//! Host values are referred to from the guest by small integer handles.
//! Indices below `RESERVED_END` are never handed out: 0 doubles as the
//! "absent" marker, and 128..132 hold the shared sentinels for
//! `undefined`, `null`, `true` and `false`. Vacant slots form a singly
//! linked free list, so a released index is the next one reused. Occupied
//! slots never move when the table grows.

use crate::error::HostError;
use crate::types::HostValue;

/// Handle of the shared `undefined` value.
pub const UNDEFINED: u32 = 128;
/// Handle of the shared `null` value.
pub const NULL: u32 = 129;
/// Handle of the shared `true` value.
pub const TRUE: u32 = 130;
/// Handle of the shared `false` value.
pub const FALSE: u32 = 131;
/// First index handed out for allocated values.
pub const RESERVED_END: u32 = 132;

/// End of the free list.
const NONE: u32 = 0;

enum Slot {
    Vacant(u32),
    Occupied(HostValue),
}

pub struct HandleTable {
    slots: Vec<Slot>,
    free_head: u32,
    live: usize,
    sentinels: [HostValue; 4],
}

impl Default for HandleTable {
    fn default() -> Self {
        Self::new()
    }
}

impl HandleTable {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free_head: NONE,
            live: 0,
            sentinels: [
                HostValue::Undefined,
                HostValue::Null,
                HostValue::Bool(true),
                HostValue::Bool(false),
            ],
        }
    }

    fn slot_index(handle: u32) -> Option<usize> {
        handle.checked_sub(RESERVED_END).map(|i| i as usize)
    }

    /// Store `value` and return its handle. Sentinel values map to their
    /// shared handles without taking a slot.
    pub fn alloc(&mut self, value: HostValue) -> u32 {
        match value {
            HostValue::Undefined => return UNDEFINED,
            HostValue::Null => return NULL,
            HostValue::Bool(true) => return TRUE,
            HostValue::Bool(false) => return FALSE,
            _ => {}
        }
        self.live += 1;
        let head = self.free_head;
        if let Some(slot) = Self::slot_index(head).and_then(|i| self.slots.get_mut(i)) {
            if let Slot::Vacant(next) = *slot {
                *slot = Slot::Occupied(value);
                self.free_head = next;
                return head;
            }
        }
        self.slots.push(Slot::Occupied(value));
        RESERVED_END + (self.slots.len() as u32 - 1)
    }

    pub fn get(&self, handle: u32) -> Result<&HostValue, HostError> {
        if (UNDEFINED..RESERVED_END).contains(&handle) {
            return Ok(&self.sentinels[(handle - UNDEFINED) as usize]);
        }
        match Self::slot_index(handle).and_then(|i| self.slots.get(i)) {
            Some(Slot::Occupied(value)) => Ok(value),
            _ => Err(HostError::InvalidHandle(handle)),
        }
    }

    /// Remove the value and free its slot. Sentinels are returned by copy.
    pub fn take(&mut self, handle: u32) -> Result<HostValue, HostError> {
        if (UNDEFINED..RESERVED_END).contains(&handle) {
            return Ok(self.sentinels[(handle - UNDEFINED) as usize].clone());
        }
        let idx = match Self::slot_index(handle) {
            Some(i) if matches!(self.slots.get(i), Some(Slot::Occupied(_))) => i,
            _ => return Err(HostError::InvalidHandle(handle)),
        };
        let slot = std::mem::replace(&mut self.slots[idx], Slot::Vacant(self.free_head));
        self.free_head = handle;
        self.live -= 1;
        match slot {
            Slot::Occupied(value) => Ok(value),
            Slot::Vacant(_) => Err(HostError::InvalidHandle(handle)),
        }
    }

    /// Release a handle. Reserved indices are ignored; releasing a vacant
    /// or unknown handle is an error.
    pub fn release(&mut self, handle: u32) -> Result<(), HostError> {
        if handle < RESERVED_END {
            return Ok(());
        }
        match self.take(handle) {
            // Dropped here, outside any borrow of the table.
            Ok(_value) => Ok(()),
            Err(err) => {
                tracing::error!(handle, "release of a handle that is not live");
                Err(err)
            }
        }
    }

    /// A second handle to the same value.
    pub fn clone_ref(&mut self, handle: u32) -> Result<u32, HostError> {
        let value = self.get(handle)?.clone();
        Ok(self.alloc(value))
    }

    /// Number of occupied slots.
    pub fn live(&self) -> usize {
        self.live
    }

    /// Number of slots ever allocated, occupied or vacant.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }
}
