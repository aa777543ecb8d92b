//! Shadow memory: one atomic entry per granule of the monitored address space.
//!
//! The table is a 3-level radix tree over the granule index
//! (`address >> GRANULE_SHIFT`). For 48-bit addresses and 8-byte granules that
//! is 45 bits of index, split as: root 12 bits, mid 15 bits, leaf 18 bits.
//!
//! The root is statically allocated (32 KiB). Mid and leaf nodes are lazily
//! allocated from the OS and installed with compare-and-swap, so there is no
//! lock anywhere: reads are a couple of Acquire loads, and writers touching
//! distinct granules never contend. A missing node reads as all-accessible,
//! which is also what a freshly zeroed leaf holds.
//!
//! Entry encoding:
//! - `0`: the whole granule is addressable
//! - `1..GRANULE_SIZE`: only that many leading bytes are addressable
//! - a [`Marker`]: nothing in the granule is addressable

use crate::config::{ADDRESS_BITS, GRANULE_SHIFT, GRANULE_SIZE};
use crate::platform;
use crate::{stat_add, stat_inc};
use core::ptr;
use core::sync::atomic::{AtomicPtr, AtomicU8, Ordering};

const INDEX_BITS: usize = ADDRESS_BITS - GRANULE_SHIFT;
const ROOT_BITS: usize = 12;
const LEAF_BITS: usize = 18;
const MID_BITS: usize = INDEX_BITS - ROOT_BITS - LEAF_BITS;

const ROOT_LEN: usize = 1 << ROOT_BITS;
const MID_LEN: usize = 1 << MID_BITS;
const LEAF_LEN: usize = 1 << LEAF_BITS;

const MID_SHIFT: usize = LEAF_BITS;
const ROOT_SHIFT: usize = LEAF_BITS + MID_BITS;

const MID_MASK: usize = MID_LEN - 1;
const LEAF_MASK: usize = LEAF_LEN - 1;

const GRANULE_MASK: usize = GRANULE_SIZE - 1;

/// One past the highest monitored address.
pub const MONITORED_LIMIT: u128 = 1 << ADDRESS_BITS;

/// Entry value of a fully addressable granule.
pub const ACCESSIBLE: u8 = 0;

/// Why a granule is poisoned. Stored verbatim as the shadow entry.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[repr(u8)]
pub enum Marker {
    /// Poisoned through an explicit `poison_range` call.
    UserPoisoned = 0xf7,
    /// Header in front of an instrumented object's user region.
    HeapLeftRedzone = 0xfa,
    /// Padding after an instrumented object's user region.
    HeapRightRedzone = 0xfb,
    /// A quarantined or destroyed instrumented object.
    HeapFreed = 0xfd,
}

impl Marker {
    /// Decode a raw shadow entry. Accessible and partial entries are `None`.
    pub const fn from_entry(entry: u8) -> Option<Marker> {
        match entry {
            0xf7 => Some(Marker::UserPoisoned),
            0xfa => Some(Marker::HeapLeftRedzone),
            0xfb => Some(Marker::HeapRightRedzone),
            0xfd => Some(Marker::HeapFreed),
            _ => None,
        }
    }
}

#[repr(C)]
struct MidNode {
    children: [AtomicPtr<LeafNode>; MID_LEN],
}

#[repr(C)]
struct LeafNode {
    entries: [AtomicU8; LEAF_LEN],
}

/// Shadow table over the whole monitored address range.
pub struct Shadow {
    root: [AtomicPtr<MidNode>; ROOT_LEN],
}

/// The process-wide shadow table consulted by the C ABI and by compiled-in
/// access checks.
pub static SHADOW: Shadow = Shadow::new();

/// Release every node of the process-wide table.
///
/// # Safety
/// No other thread may touch [`SHADOW`] concurrently, and no reference into
/// it may outlive this call. Afterwards every address reads as accessible.
pub unsafe fn teardown() {
    unsafe { SHADOW.reset() };
}

#[inline]
const fn granule_index(addr: usize) -> usize {
    addr >> GRANULE_SHIFT
}

#[inline]
const fn is_monitored(addr: usize) -> bool {
    (addr as u128) < MONITORED_LIMIT
}

/// Assert that `[addr, addr + size)` lies inside the monitored range and
/// return its exclusive end.
#[inline]
fn checked_end(addr: usize, size: usize) -> usize {
    let end = addr.checked_add(size);
    assert!(
        matches!(end, Some(end) if (end as u128) <= MONITORED_LIMIT),
        "shadow range {:#x}+{:#x} outside monitored address space",
        addr,
        size
    );
    addr + size
}

impl Shadow {
    /// Create an empty table. Every address starts out accessible.
    #[allow(clippy::new_without_default)]
    pub const fn new() -> Self {
        Self {
            root: [const { AtomicPtr::new(ptr::null_mut()) }; ROOT_LEN],
        }
    }

    /// Returns true iff the byte at `addr` may currently be read or written.
    /// This is lock-free. Unmonitored addresses are always accessible.
    #[inline]
    pub fn is_accessible(&self, addr: usize) -> bool {
        let entry = self.entry(addr);
        entry == ACCESSIBLE
            || ((entry as usize) < GRANULE_SIZE && (addr & GRANULE_MASK) < entry as usize)
    }

    /// Raw shadow entry of the granule containing `addr`.
    #[inline]
    pub fn entry(&self, addr: usize) -> u8 {
        if !is_monitored(addr) {
            return ACCESSIBLE;
        }
        let leaf = self.leaf(granule_index(addr));
        if leaf.is_null() {
            return ACCESSIBLE;
        }
        unsafe { (*leaf).entries[granule_index(addr) & LEAF_MASK].load(Ordering::Acquire) }
    }

    /// The poison marker of the granule containing `addr`, if it is poisoned.
    #[inline]
    pub fn marker(&self, addr: usize) -> Option<Marker> {
        Marker::from_entry(self.entry(addr))
    }

    /// True iff every byte of `[addr, addr + size)` is accessible.
    pub fn is_range_accessible(&self, addr: usize, size: usize) -> bool {
        let end = addr.saturating_add(size);
        let mut cursor = addr;
        while cursor < end {
            let granule_end = (cursor | GRANULE_MASK).saturating_add(1);
            // Accessible bytes form a prefix of the granule, so the last byte
            // in range decides for the whole slice.
            if !self.is_accessible(granule_end.min(end) - 1) {
                return false;
            }
            cursor = granule_end;
        }
        true
    }

    /// True iff no byte of `[addr, addr + size)` is accessible.
    pub fn is_range_poisoned(&self, addr: usize, size: usize) -> bool {
        let end = addr.saturating_add(size);
        let mut cursor = addr;
        while cursor < end {
            if self.is_accessible(cursor) {
                return false;
            }
            cursor = (cursor | GRANULE_MASK).saturating_add(1);
        }
        true
    }

    /// Poison every granule any byte of which lies in `[addr, addr + size)`
    /// with the user marker.
    pub fn poison_range(&self, addr: usize, size: usize) {
        self.poison(addr, size, Marker::UserPoisoned);
    }

    /// Poison every granule any byte of which lies in `[addr, addr + size)`.
    pub fn poison(&self, addr: usize, size: usize, marker: Marker) {
        if size == 0 {
            return;
        }
        let end = checked_end(addr, size);
        stat_inc!(poison_calls);
        stat_add!(poisoned_bytes, size);
        self.fill(granule_index(addr), granule_index(end - 1) + 1, marker as u8);
    }

    /// Make `[addr, addr + size)` accessible.
    ///
    /// Fully covered granules become accessible. A region ending inside a
    /// granule leaves that granule partially accessible, so the first byte past
    /// the region stays poisoned. An unaligned `addr` makes its whole leading
    /// granule accessible.
    pub fn unpoison(&self, addr: usize, size: usize) {
        if size == 0 {
            return;
        }
        let end = checked_end(addr, size);
        stat_inc!(unpoison_calls);
        stat_add!(unpoisoned_bytes, size);

        let first = granule_index(addr);
        let full_end = granule_index(end);
        if full_end > first {
            self.fill(first, full_end, ACCESSIBLE);
        }
        let tail = end & GRANULE_MASK;
        if tail != 0 {
            self.store(full_end, tail as u8);
        }
    }

    /// Release every node. All addresses read as accessible afterwards.
    ///
    /// # Safety
    /// No other thread may use this table concurrently, and no pointer
    /// obtained from it may be dereferenced afterwards.
    pub unsafe fn reset(&self) {
        let mut released = 0usize;
        for slot in self.root.iter() {
            let mid = slot.swap(ptr::null_mut(), Ordering::AcqRel);
            if mid.is_null() {
                continue;
            }
            for child in unsafe { (*mid).children.iter() } {
                let leaf = child.swap(ptr::null_mut(), Ordering::AcqRel);
                if !leaf.is_null() {
                    unsafe { free_node(leaf) };
                    released += 1;
                }
            }
            unsafe { free_node(mid) };
            released += 1;
        }
        if released > 0 {
            log::debug!("shadow: released {} nodes", released);
        }
    }

    /// Store `value` into every entry of granules `[first, end)`.
    fn fill(&self, first: usize, end: usize, value: u8) {
        let mut granule = first;
        while granule < end {
            let leaf_idx = granule & LEAF_MASK;
            let run = (end - granule).min(LEAF_LEN - leaf_idx);
            // A missing leaf already reads as accessible.
            let leaf = if value == ACCESSIBLE {
                self.leaf(granule)
            } else {
                self.leaf_or_create(granule)
            };
            if !leaf.is_null() {
                let entries = unsafe { &(&(*leaf).entries)[leaf_idx..leaf_idx + run] };
                for entry in entries {
                    entry.store(value, Ordering::Release);
                }
            }
            granule += run;
        }
    }

    fn store(&self, granule: usize, value: u8) {
        let leaf = self.leaf_or_create(granule);
        unsafe { (*leaf).entries[granule & LEAF_MASK].store(value, Ordering::Release) };
    }

    /// Leaf covering `granule`, or null if it was never created.
    #[inline]
    fn leaf(&self, granule: usize) -> *mut LeafNode {
        let mid = self.root[granule >> ROOT_SHIFT].load(Ordering::Acquire);
        if mid.is_null() {
            return ptr::null_mut();
        }
        unsafe { (*mid).children[(granule >> MID_SHIFT) & MID_MASK].load(Ordering::Acquire) }
    }

    fn leaf_or_create(&self, granule: usize) -> *mut LeafNode {
        let mid = install(&self.root[granule >> ROOT_SHIFT]);
        install(unsafe { &(*mid).children[(granule >> MID_SHIFT) & MID_MASK] })
    }
}

impl Drop for Shadow {
    fn drop(&mut self) {
        unsafe { self.reset() };
    }
}

/// Load `slot`, installing a zeroed node first if it is empty. Losing a race
/// to another installer frees our node and adopts theirs.
fn install<T>(slot: &AtomicPtr<T>) -> *mut T {
    let current = slot.load(Ordering::Acquire);
    if !current.is_null() {
        return current;
    }

    let fresh = unsafe { alloc_node::<T>() };
    assert!(!fresh.is_null(), "failed to allocate shadow node");
    match slot.compare_exchange(ptr::null_mut(), fresh, Ordering::AcqRel, Ordering::Acquire) {
        Ok(_) => {
            stat_inc!(shadow_nodes);
            log::debug!(
                "shadow: allocated {} byte node at {:p}",
                core::mem::size_of::<T>(),
                fresh
            );
            fresh
        }
        Err(winner) => {
            unsafe { free_node(fresh) };
            winner
        }
    }
}

unsafe fn alloc_node<T>() -> *mut T {
    // page_alloc returns zeroed memory, which is valid for both node types
    // (null children, accessible entries).
    let size = platform::page_round_up(core::mem::size_of::<T>());
    unsafe { platform::page_alloc(size) }.cast::<T>()
}

unsafe fn free_node<T>(node: *mut T) {
    let size = platform::page_round_up(core::mem::size_of::<T>());
    unsafe { platform::page_dealloc(node.cast::<u8>(), size) };
}
