//! Fixed binary layout of the metadata stored at the base of every
//! instrumented object.
//!
//! ```text
//! base                                     base + user_offset
//! | magic | state | flags | checksum | requested_size | alignment | user_offset | pad ... | offset word | user ...
//! ```
//!
//! `user_offset` is the last field, and when the user region does not start
//! right after the header the last 4 bytes of the padding repeat it. Either
//! way the `u32` just below the user pointer is the distance back to `base`.

use crate::error::ExtentError;
use core::mem::{offset_of, size_of};

/// Tag identifying an object header.
pub const HEADER_MAGIC: u16 = 0xA5E1;

/// Size of the serialized header in bytes.
pub const HEADER_SIZE: usize = size_of::<ObjectHeader>();

/// Size of the back-pointer word found just below every user pointer.
pub const OFFSET_WORD_SIZE: usize = size_of::<u32>();

/// Header flag: the object is one of the engine's own bookkeeping allocations.
pub const FLAG_NESTED: u8 = 1 << 0;

const _: () = assert!(offset_of!(ObjectHeader, user_offset) + OFFSET_WORD_SIZE == HEADER_SIZE);

/// Lifecycle state of an instrumented object.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[repr(u8)]
pub enum ObjectState {
    /// User region is accessible.
    Allocated = 1,
    /// Freed, fully poisoned, waiting in the caller's quarantine.
    Quarantined = 2,
    /// Evicted from quarantine; the block may be reused.
    Destroyed = 3,
}

impl ObjectState {
    pub const fn from_u8(raw: u8) -> Option<ObjectState> {
        match raw {
            1 => Some(ObjectState::Allocated),
            2 => Some(ObjectState::Quarantined),
            3 => Some(ObjectState::Destroyed),
            _ => None,
        }
    }
}

#[repr(C)]
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct ObjectHeader {
    pub magic: u16,
    pub state: u8,
    pub flags: u8,
    pub checksum: u32,
    pub requested_size: usize,
    pub alignment: u32,
    pub user_offset: u32,
}

impl ObjectHeader {
    /// Build a sealed header for an object living at `base`.
    pub fn new(
        base: usize,
        requested_size: usize,
        alignment: usize,
        user_offset: usize,
        state: ObjectState,
        flags: u8,
    ) -> Self {
        let mut header = Self {
            magic: HEADER_MAGIC,
            state: state as u8,
            flags,
            checksum: 0,
            requested_size,
            alignment: alignment as u32,
            user_offset: user_offset as u32,
        };
        header.seal(base);
        header
    }

    /// Decoded state. Only meaningful on a header that passed `verify`.
    #[inline]
    pub fn state(&self) -> ObjectState {
        ObjectState::from_u8(self.state).unwrap_or(ObjectState::Destroyed)
    }

    #[inline]
    pub fn is_nested(&self) -> bool {
        self.flags & FLAG_NESTED != 0
    }

    /// Change the state and recompute the checksum.
    pub fn transition(&mut self, base: usize, state: ObjectState) {
        self.state = state as u8;
        self.seal(base);
    }

    /// Recompute the checksum for a header stored at `base`.
    pub fn seal(&mut self, base: usize) {
        self.checksum = self.compute_checksum(base);
    }

    /// Check magic, state and checksum. Layout consistency is checked by the
    /// caller, which knows the sizing rules.
    pub fn verify(&self, base: usize) -> Result<(), ExtentError> {
        if self.magic != HEADER_MAGIC {
            return Err(ExtentError::BadMagic(self.magic));
        }
        if ObjectState::from_u8(self.state).is_none() {
            return Err(ExtentError::BadState(self.state));
        }
        if self.checksum != self.compute_checksum(base) {
            return Err(ExtentError::BadChecksum(base));
        }
        Ok(())
    }

    /// FNV-1a over every field but the checksum, plus the base address, so a
    /// header moved without being resealed is rejected.
    fn compute_checksum(&self, base: usize) -> u32 {
        const OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
        const PRIME: u64 = 0x0000_0100_0000_01b3;

        let words = [
            self.magic as u64,
            self.state as u64,
            self.flags as u64,
            self.requested_size as u64,
            self.alignment as u64,
            self.user_offset as u64,
            base as u64,
        ];
        let mut hash = OFFSET_BASIS;
        for word in words {
            for byte in word.to_le_bytes() {
                hash ^= byte as u64;
                hash = hash.wrapping_mul(PRIME);
            }
        }
        (hash ^ (hash >> 32)) as u32
    }
}
