//! Shared helpers for integration tests against the process-wide shadow table.

#![allow(dead_code)]

use rtasan::{GRANULE_SIZE, SHADOW};

/// An aligned, heap-backed scratch block.
///
/// Dropping it unpoisons the whole block in the global shadow table, so memory
/// handed back to the system allocator never carries stale poison into a later
/// test that happens to receive the same addresses.
pub struct Block {
    storage: Vec<u8>,
    offset: usize,
    len: usize,
}

impl Block {
    pub fn new(len: usize, align: usize) -> Self {
        // Whole granules only, so the unpoison on drop never leaves a
        // partial entry covering a neighbouring allocation.
        let capacity = (len + align + GRANULE_SIZE - 1) & !(GRANULE_SIZE - 1);
        let storage = vec![0u8; capacity];
        let offset = storage.as_ptr().align_offset(align);
        Self {
            storage,
            offset,
            len,
        }
    }

    pub fn ptr(&mut self) -> *mut u8 {
        unsafe { self.storage.as_mut_ptr().add(self.offset) }
    }

    pub fn addr(&self) -> usize {
        self.storage.as_ptr() as usize + self.offset
    }

    pub fn len(&self) -> usize {
        self.len
    }
}

impl Drop for Block {
    fn drop(&mut self) {
        SHADOW.unpoison(self.storage.as_ptr() as usize, self.storage.len());
    }
}

pub fn range_is_poisoned(addr: usize, size: usize) -> bool {
    (0..size).all(|i| !SHADOW.is_accessible(addr + i))
}

pub fn range_is_accessible(addr: usize, size: usize) -> bool {
    (0..size).all(|i| SHADOW.is_accessible(addr + i))
}
