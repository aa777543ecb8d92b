//! Lifecycle of an instrumented object: initialize, introspect, clone,
//! quarantine and destroy, keeping the shadow table consistent at each step.
//!
//! ```text
//! [raw block] --initialize--> Allocated --quarantine--> Quarantined --destroy--> Destroyed
//! ```
//!
//! Every operation takes the object's base address and the shadow table
//! explicitly; nothing is remembered between calls. Callers serialize
//! operations on a given object (the allocation interceptor does this); the
//! shadow table itself tolerates any concurrency.
//!
//! Shadow state per lifecycle state:
//! - Allocated: header `HeapLeftRedzone`, user region accessible to the exact
//!   byte, trailer `HeapRightRedzone`
//! - Quarantined / Destroyed: the whole block `HeapFreed`
//!
//! Header lookups never trust memory blindly: the shadow entries of the bytes
//! about to be read must be poisoned, then the header's magic, checksum and
//! layout are checked.

use crate::config::GRANULE_SIZE;
use crate::header::{FLAG_NESTED, HEADER_SIZE, OFFSET_WORD_SIZE, ObjectHeader};
use crate::layout::{self, MIN_HEADER_SIZE, ObjectLayout};
use crate::shadow::{Marker, Shadow};
use crate::stat_inc;
use core::ptr;

pub use crate::error::ExtentError;
pub use crate::header::ObjectState;

/// User-visible side of an object, as reported by [`user_extent`].
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct UserExtent {
    pub user_ptr: *mut u8,
    pub user_size: usize,
}

/// Whole-object side of an object, as reported by [`asan_extent`].
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct AsanExtent {
    pub base: *mut u8,
    pub total_size: usize,
}

/// Raw bytes an object of `requested_size` bytes at `alignment` needs.
#[inline]
pub fn asan_object_size(requested_size: usize, alignment: usize) -> usize {
    layout::object_size(requested_size, alignment)
}

/// Turn the raw block at `base` into an `Allocated` object.
///
/// # Safety
/// `base` must point to at least `asan_object_size(size, alignment)` writable
/// bytes owned exclusively by the caller, and be granule aligned.
pub unsafe fn initialize(
    shadow: &Shadow,
    base: *mut u8,
    requested_size: usize,
    alignment: usize,
) -> ObjectLayout {
    unsafe { initialize_with_flags(shadow, base, requested_size, alignment, 0) }
}

/// Like [`initialize`], for the engine's own bookkeeping allocations. The
/// object carries the nested flag so reports can tell it apart.
///
/// # Safety
/// Same as [`initialize`].
pub unsafe fn initialize_nested(
    shadow: &Shadow,
    base: *mut u8,
    requested_size: usize,
    alignment: usize,
) -> ObjectLayout {
    unsafe { initialize_with_flags(shadow, base, requested_size, alignment, FLAG_NESTED) }
}

unsafe fn initialize_with_flags(
    shadow: &Shadow,
    base: *mut u8,
    requested_size: usize,
    alignment: usize,
    flags: u8,
) -> ObjectLayout {
    assert!(!base.is_null(), "initialize on null block");
    let layout = ObjectLayout::compute(base as usize, requested_size, alignment);
    let header = ObjectHeader::new(
        layout.base,
        requested_size,
        layout.alignment,
        layout.user_offset,
        ObjectState::Allocated,
        flags,
    );
    unsafe { write_header(&layout, &header) };
    apply_allocated_shadow(shadow, &layout);

    stat_inc!(objects_initialized);
    log::trace!(
        "object: init base={:#x} size={} align={} user={:#x} total={}",
        layout.base,
        requested_size,
        layout.alignment,
        layout.user_addr(),
        layout.total_size
    );
    layout
}

/// Report the user pointer and requested size of the object at `base`.
///
/// # Safety
/// If the shadow table marks `base` as an object header, the header bytes
/// must still be readable.
pub unsafe fn user_extent(shadow: &Shadow, base: *const u8) -> Result<UserExtent, ExtentError> {
    match unsafe { read_object(shadow, base as usize) } {
        Ok((_, layout)) => Ok(UserExtent {
            user_ptr: layout.user_ptr(),
            user_size: layout.requested_size,
        }),
        Err(err) => {
            reject(base as usize, &err);
            Err(err)
        }
    }
}

/// Recover the base and total size of the object owning `user_ptr`, walking
/// back through the offset word stored just below it.
///
/// # Safety
/// Same as [`user_extent`]: memory the shadow table marks as a header must
/// still be readable.
pub unsafe fn asan_extent(shadow: &Shadow, user_ptr: *const u8) -> Result<AsanExtent, ExtentError> {
    let user = user_ptr as usize;
    let result = unsafe { find_base(shadow, user) }.and_then(|base| {
        let (header, layout) = unsafe { read_object(shadow, base) }?;
        if header.user_offset as usize != user - base {
            return Err(ExtentError::BadLayout(base));
        }
        Ok(AsanExtent {
            base: base as *mut u8,
            total_size: layout.total_size,
        })
    });
    if let Err(err) = &result {
        reject(user, err);
    }
    result
}

/// Current lifecycle state of the object at `base`.
///
/// # Safety
/// Same as [`user_extent`].
pub unsafe fn state(shadow: &Shadow, base: *const u8) -> Result<ObjectState, ExtentError> {
    let (header, _) = unsafe { read_object(shadow, base as usize) }?;
    Ok(header.state())
}

/// Whether the object at `base` is one of the engine's own allocations.
///
/// # Safety
/// Same as [`user_extent`].
pub unsafe fn is_nested(shadow: &Shadow, base: *const u8) -> Result<bool, ExtentError> {
    let (header, _) = unsafe { read_object(shadow, base as usize) }?;
    Ok(header.is_nested())
}

/// Copy the object at `source` to `destination` and make the copy a live
/// `Allocated` object, whatever state the source is in.
///
/// The destination ends up exactly as `initialize` would leave it, with the
/// source's user bytes. If the source is not recognized nothing is written.
///
/// # Safety
/// `destination` must point to at least the source's total size of writable
/// bytes, owned exclusively by the caller, not overlapping the source, and be
/// granule aligned. The copy gets its own user offset, so the destination's
/// position relative to the alignment may differ from the source's.
pub unsafe fn clone(
    shadow: &Shadow,
    source: *const u8,
    destination: *mut u8,
) -> Result<ObjectLayout, ExtentError> {
    let (src_header, src) = unsafe { read_object(shadow, source as usize) }?;

    assert!(!destination.is_null(), "clone to null block");
    let dst = ObjectLayout::compute(destination as usize, src.requested_size, src.alignment);
    assert!(
        dst.end() <= src.base || src.end() <= dst.base,
        "clone source and destination overlap"
    );

    unsafe { ptr::copy_nonoverlapping(source, destination, src.total_size) };
    if dst.user_offset != src.user_offset {
        unsafe { ptr::copy_nonoverlapping(src.user_ptr(), dst.user_ptr(), src.requested_size) };
    }
    let header = ObjectHeader::new(
        dst.base,
        dst.requested_size,
        dst.alignment,
        dst.user_offset,
        ObjectState::Allocated,
        src_header.flags,
    );
    unsafe { write_header(&dst, &header) };
    apply_allocated_shadow(shadow, &dst);

    stat_inc!(objects_cloned);
    log::trace!(
        "object: clone {:#x} -> {:#x} size={} (source {:?})",
        src.base,
        dst.base,
        dst.requested_size,
        src_header.state()
    );
    Ok(dst)
}

/// Poison the whole object at `base` and mark it `Quarantined`. The header
/// stays readable so extents can still be reported.
///
/// Panics if `base` is not an `Allocated` object.
///
/// # Safety
/// `base` must be a block previously passed to `initialize` (or a clone
/// destination), still owned by the caller.
pub unsafe fn quarantine(shadow: &Shadow, base: *mut u8) -> ObjectLayout {
    let (mut header, layout) = unsafe { expect_object(shadow, base, "quarantine") };
    assert_eq!(
        header.state(),
        ObjectState::Allocated,
        "quarantine of object at {:p} in wrong state",
        base
    );
    header.transition(layout.base, ObjectState::Quarantined);
    unsafe { write_header(&layout, &header) };
    shadow.poison(layout.base, layout.total_size, Marker::HeapFreed);

    stat_inc!(objects_quarantined);
    log::trace!("object: quarantine base={:#x} total={}", layout.base, layout.total_size);
    layout
}

/// Mark the quarantined object at `base` `Destroyed`. Shadow memory is left
/// exactly as it was: the block stays poisoned until it is initialized again.
///
/// Panics if `base` is not a `Quarantined` object.
///
/// # Safety
/// Same as [`quarantine`].
pub unsafe fn destroy(shadow: &Shadow, base: *mut u8) -> ObjectLayout {
    let (mut header, layout) = unsafe { expect_object(shadow, base, "destroy") };
    assert_eq!(
        header.state(),
        ObjectState::Quarantined,
        "destroy of object at {:p} in wrong state",
        base
    );
    header.transition(layout.base, ObjectState::Destroyed);
    unsafe { write_header(&layout, &header) };

    stat_inc!(objects_destroyed);
    log::trace!("object: destroy base={:#x}", layout.base);
    layout
}

fn apply_allocated_shadow(shadow: &Shadow, layout: &ObjectLayout) {
    shadow.poison(layout.base, layout.user_offset, Marker::HeapLeftRedzone);
    // The trailer may start mid-granule; unpoisoning the user region
    // afterwards turns that granule into a partial entry.
    shadow.poison(layout.user_end(), layout.trailer_size(), Marker::HeapRightRedzone);
    shadow.unpoison(layout.user_addr(), layout.requested_size);
}

/// Serialize `header` at the layout's base and store the offset word just
/// below the user pointer.
unsafe fn write_header(layout: &ObjectLayout, header: &ObjectHeader) {
    let base = layout.base as *mut u8;
    unsafe { ptr::write_unaligned(base.cast::<ObjectHeader>(), *header) };
    if layout.user_offset > HEADER_SIZE {
        let word = layout.user_addr() - OFFSET_WORD_SIZE;
        unsafe { ptr::write_unaligned(word as *mut u32, layout.user_offset as u32) };
    }
}

/// True iff the granule holding `addr` is poisoned, so it may hold a header.
/// Any marker counts: an unpoison/poison cycle over a live header leaves the
/// user marker behind. Magic, checksum and layout decide the rest.
#[inline]
fn is_header_marked(shadow: &Shadow, addr: usize) -> bool {
    shadow.marker(addr).is_some()
}

/// Read and validate the header at `base`.
unsafe fn read_object(
    shadow: &Shadow,
    base: usize,
) -> Result<(ObjectHeader, ObjectLayout), ExtentError> {
    if base == 0 {
        return Err(ExtentError::NullPointer);
    }
    if base % GRANULE_SIZE != 0 {
        return Err(ExtentError::Misaligned(base));
    }
    let header_end = base
        .checked_add(HEADER_SIZE)
        .ok_or(ExtentError::NotInstrumented(base))?;
    let mut granule = base;
    while granule < header_end {
        if !is_header_marked(shadow, granule) {
            return Err(ExtentError::NotInstrumented(base));
        }
        granule += GRANULE_SIZE;
    }

    let header = unsafe { ptr::read_unaligned(base as *const ObjectHeader) };
    header.verify(base)?;
    let layout = ObjectLayout::from_header(base, &header).ok_or(ExtentError::BadLayout(base))?;
    Ok((header, layout))
}

/// Follow the offset word below `user` back to the object base.
unsafe fn find_base(shadow: &Shadow, user: usize) -> Result<usize, ExtentError> {
    if user == 0 {
        return Err(ExtentError::NullPointer);
    }
    if user % GRANULE_SIZE != 0 {
        return Err(ExtentError::Misaligned(user));
    }
    let word = user - OFFSET_WORD_SIZE;
    if !is_header_marked(shadow, word) {
        return Err(ExtentError::NotInstrumented(user));
    }
    let offset = unsafe { ptr::read_unaligned(word as *const u32) } as usize;
    if offset < MIN_HEADER_SIZE || offset > user || offset % GRANULE_SIZE != 0 {
        return Err(ExtentError::BadLayout(user));
    }
    Ok(user - offset)
}

/// Lifecycle ops only run on blocks the interceptor itself initialized, so an
/// unreadable header here is a contract violation.
unsafe fn expect_object(shadow: &Shadow, base: *mut u8, op: &str) -> (ObjectHeader, ObjectLayout) {
    match unsafe { read_object(shadow, base as usize) } {
        Ok(found) => found,
        Err(err) => panic!("{} of unrecognized object at {:p}: {}", op, base, err),
    }
}

#[cold]
fn reject(addr: usize, err: &ExtentError) {
    stat_inc!(headers_rejected);
    log::warn!("object: rejected pointer {:#x}: {}", addr, err);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MAX_ALIGNMENT;
    use alloc::boxed::Box;
    use alloc::vec;
    use alloc::vec::Vec;

    /// Heap buffer whose usable start is aligned to `align`.
    struct Buffer {
        storage: Vec<u8>,
        offset: usize,
    }

    impl Buffer {
        fn new(size: usize, align: usize) -> Self {
            let storage = vec![0u8; size + align];
            let offset = storage.as_ptr().align_offset(align);
            Self { storage, offset }
        }

        fn ptr(&mut self) -> *mut u8 {
            unsafe { self.storage.as_mut_ptr().add(self.offset) }
        }
    }

    fn fresh() -> Box<Shadow> {
        Box::new(Shadow::new())
    }

    #[test]
    fn test_initialize_shadow_pattern() {
        let shadow = fresh();
        let mut buf = Buffer::new(512, 8);
        let base = buf.ptr();
        let layout = unsafe { initialize(&shadow, base, 100, 8) };

        assert!(shadow.is_range_poisoned(layout.base, layout.user_offset));
        assert!(shadow.is_range_accessible(layout.user_addr(), 100));
        assert!(shadow.is_range_poisoned(layout.user_end(), layout.trailer_size()));
        assert_eq!(shadow.marker(layout.base), Some(Marker::HeapLeftRedzone));
        assert_eq!(shadow.marker(layout.end() - 1), Some(Marker::HeapRightRedzone));

        let user = layout.user_ptr();
        unsafe {
            ptr::write_bytes(user, 0x9C, 100);
            for i in 0..100 {
                assert_eq!(*user.add(i), 0x9C);
            }
        }
    }

    #[test]
    fn test_user_pointer_alignment() {
        let shadow = fresh();
        let mut align = 1;
        while align <= MAX_ALIGNMENT {
            let total = asan_object_size(37, align);
            let mut buf = Buffer::new(total, align.max(GRANULE_SIZE));
            let layout = unsafe { initialize(&shadow, buf.ptr(), 37, align) };
            assert_eq!(layout.user_addr() % align, 0, "align {align}");
            assert!(layout.end() <= buf.ptr() as usize + total);
            align *= 2;
        }
    }

    #[test]
    fn test_extent_round_trip() {
        let shadow = fresh();
        for &align in &[8usize, 16, 64, 256, 2048] {
            let total = asan_object_size(100, align);
            let mut buf = Buffer::new(total, align);
            let base = buf.ptr();
            unsafe { initialize(&shadow, base, 100, align) };

            let user = unsafe { user_extent(&shadow, base) }.unwrap();
            assert_eq!(user.user_size, 100);
            let asan = unsafe { asan_extent(&shadow, user.user_ptr) }.unwrap();
            assert_eq!(asan.base, base);
            assert_eq!(asan.total_size, total);
        }
    }

    #[test]
    fn test_zero_size_object() {
        let shadow = fresh();
        let total = asan_object_size(0, 8);
        let mut buf = Buffer::new(total, 8);
        let layout = unsafe { initialize(&shadow, buf.ptr(), 0, 8) };
        assert!(shadow.is_range_poisoned(layout.base, layout.total_size));
        let user = unsafe { user_extent(&shadow, layout.base as *const u8) }.unwrap();
        assert_eq!(user.user_size, 0);
        let asan = unsafe { asan_extent(&shadow, user.user_ptr) }.unwrap();
        assert_eq!(asan.total_size, total);
    }

    #[test]
    fn test_unknown_pointer_rejected() {
        let shadow = fresh();
        let mut buf = Buffer::new(256, 8);
        let p = buf.ptr();
        assert_eq!(
            unsafe { user_extent(&shadow, p) },
            Err(ExtentError::NotInstrumented(p as usize))
        );
        let user = unsafe { p.add(64) };
        assert_eq!(
            unsafe { asan_extent(&shadow, user) },
            Err(ExtentError::NotInstrumented(user as usize))
        );
        assert_eq!(
            unsafe { asan_extent(&shadow, ptr::null()) },
            Err(ExtentError::NullPointer)
        );
        assert_eq!(
            unsafe { user_extent(&shadow, p.wrapping_add(3)) },
            Err(ExtentError::Misaligned(p as usize + 3))
        );
    }

    #[test]
    fn test_interior_pointer_rejected() {
        let shadow = fresh();
        let total = asan_object_size(64, 8);
        let mut buf = Buffer::new(total, 8);
        let layout = unsafe { initialize(&shadow, buf.ptr(), 64, 8) };
        // The word below an interior pointer is user data, not a header.
        let interior = unsafe { layout.user_ptr().add(16) };
        assert!(unsafe { asan_extent(&shadow, interior) }.is_err());
        // The user pointer is not a base.
        assert!(unsafe { user_extent(&shadow, layout.user_ptr()) }.is_err());
    }

    #[test]
    fn test_corrupted_header_rejected() {
        let shadow = fresh();
        let total = asan_object_size(32, 8);
        let mut buf = Buffer::new(total, 8);
        let base = buf.ptr();
        unsafe { initialize(&shadow, base, 32, 8) };
        unsafe { *base.add(8) ^= 0xFF };
        assert_eq!(
            unsafe { user_extent(&shadow, base) },
            Err(ExtentError::BadChecksum(base as usize))
        );
    }

    #[test]
    fn test_copied_header_rejected() {
        let shadow = fresh();
        let total = asan_object_size(32, 8);
        let mut a = Buffer::new(total, 8);
        let mut b = Buffer::new(total, 8);
        unsafe { initialize(&shadow, a.ptr(), 32, 8) };
        unsafe { ptr::copy_nonoverlapping(a.ptr(), b.ptr(), total) };
        // Not instrumented at all yet.
        assert!(unsafe { user_extent(&shadow, b.ptr()) }.is_err());
        // Even with the shadow faked, the checksum is bound to the old base.
        shadow.poison(b.ptr() as usize, total, Marker::HeapLeftRedzone);
        assert_eq!(
            unsafe { user_extent(&shadow, b.ptr()) },
            Err(ExtentError::BadChecksum(b.ptr() as usize))
        );
    }

    #[test]
    fn test_quarantine_and_destroy() {
        let shadow = fresh();
        let total = asan_object_size(100, 16);
        let mut buf = Buffer::new(total, 16);
        let base = buf.ptr();
        let layout = unsafe { initialize(&shadow, base, 100, 16) };

        unsafe { quarantine(&shadow, base) };
        assert!(shadow.is_range_poisoned(layout.base, total));
        assert_eq!(unsafe { state(&shadow, base) }, Ok(ObjectState::Quarantined));
        // Extents stay readable in quarantine.
        let user = unsafe { user_extent(&shadow, base) }.unwrap();
        assert_eq!(user.user_ptr, layout.user_ptr());
        assert_eq!(unsafe { asan_extent(&shadow, user.user_ptr) }.unwrap().base, base);

        let before: Vec<u8> = (0..total).map(|i| shadow.entry(layout.base + i)).collect();
        unsafe { destroy(&shadow, base) };
        let after: Vec<u8> = (0..total).map(|i| shadow.entry(layout.base + i)).collect();
        assert_eq!(before, after);
        assert_eq!(unsafe { state(&shadow, base) }, Ok(ObjectState::Destroyed));
        assert!(shadow.is_range_poisoned(layout.base, total));
    }

    #[test]
    fn test_reinitialize_after_destroy() {
        let shadow = fresh();
        let total = asan_object_size(64, 8);
        let mut buf = Buffer::new(total, 8);
        let base = buf.ptr();
        unsafe {
            initialize(&shadow, base, 64, 8);
            quarantine(&shadow, base);
            destroy(&shadow, base);
            let layout = initialize(&shadow, base, 40, 8);
            assert!(shadow.is_range_accessible(layout.user_addr(), 40));
            assert!(shadow.is_range_poisoned(layout.user_end(), layout.trailer_size()));
            assert_eq!(state(&shadow, base), Ok(ObjectState::Allocated));
        }
    }

    #[test]
    #[should_panic(expected = "wrong state")]
    fn test_double_quarantine_panics() {
        let shadow = fresh();
        let total = asan_object_size(8, 8);
        let mut buf = Buffer::new(total, 8);
        let base = buf.ptr();
        unsafe {
            initialize(&shadow, base, 8, 8);
            quarantine(&shadow, base);
            quarantine(&shadow, base);
        }
    }

    #[test]
    #[should_panic(expected = "wrong state")]
    fn test_destroy_live_object_panics() {
        let shadow = fresh();
        let total = asan_object_size(8, 8);
        let mut buf = Buffer::new(total, 8);
        let base = buf.ptr();
        unsafe {
            initialize(&shadow, base, 8, 8);
            destroy(&shadow, base);
        }
    }

    #[test]
    #[should_panic(expected = "unrecognized object")]
    fn test_quarantine_unknown_block_panics() {
        let shadow = fresh();
        let mut buf = Buffer::new(64, 8);
        unsafe { quarantine(&shadow, buf.ptr()) };
    }

    #[test]
    #[should_panic(expected = "null block")]
    fn test_initialize_null_panics() {
        let shadow = fresh();
        unsafe { initialize(&shadow, ptr::null_mut(), 8, 8) };
    }

    #[test]
    fn test_clone_from_quarantined_source() {
        let shadow = fresh();
        let total = asan_object_size(100, 32);
        let mut src = Buffer::new(total, 32);
        let mut dst = Buffer::new(total, 32);
        let layout = unsafe { initialize(&shadow, src.ptr(), 100, 32) };
        unsafe { ptr::write_bytes(layout.user_ptr(), 0x5A, 100) };
        unsafe { quarantine(&shadow, src.ptr()) };

        let copy = unsafe { clone(&shadow, src.ptr(), dst.ptr()) }.unwrap();
        assert_eq!(copy.base, dst.ptr() as usize);
        assert_eq!(copy.total_size, total);
        assert!(shadow.is_range_poisoned(copy.base, copy.user_offset));
        assert!(shadow.is_range_accessible(copy.user_addr(), 100));
        assert!(shadow.is_range_poisoned(copy.user_end(), copy.trailer_size()));
        for i in 0..100 {
            assert_eq!(unsafe { *copy.user_ptr().add(i) }, 0x5A);
        }
        assert_eq!(unsafe { state(&shadow, dst.ptr()) }, Ok(ObjectState::Allocated));
        // The source is untouched.
        assert_eq!(unsafe { state(&shadow, src.ptr()) }, Ok(ObjectState::Quarantined));
        assert!(shadow.is_range_poisoned(layout.base, total));
    }

    #[test]
    fn test_clone_with_different_padding() {
        let shadow = fresh();
        let align = 64;
        let total = asan_object_size(50, align);
        // Source base one granule past a boundary, destination on it.
        let mut src = Buffer::new(total + GRANULE_SIZE, align);
        let mut dst = Buffer::new(total, align);
        let src_base = unsafe { src.ptr().add(GRANULE_SIZE) };
        let layout = unsafe { initialize(&shadow, src_base, 50, align) };
        for i in 0..50 {
            unsafe { *layout.user_ptr().add(i) = i as u8 };
        }
        let copy = unsafe { clone(&shadow, src_base, dst.ptr()) }.unwrap();
        assert_eq!(copy.user_addr() % align, 0);
        for i in 0..50 {
            assert_eq!(unsafe { *copy.user_ptr().add(i) }, i as u8);
        }
        let asan = unsafe { asan_extent(&shadow, copy.user_ptr()) }.unwrap();
        assert_eq!(asan.base, dst.ptr());
    }

    #[test]
    fn test_clone_to_granule_aligned_destination() {
        let shadow = fresh();
        let align = 256;
        let total = asan_object_size(70, align);
        let mut src = Buffer::new(total, align);
        let mut dst = Buffer::new(total + GRANULE_SIZE, align);
        let layout = unsafe { initialize(&shadow, src.ptr(), 70, align) };
        unsafe { ptr::write_bytes(layout.user_ptr(), 0xC3, 70) };

        // Only granule aligned, not aligned to 256.
        let dst_base = unsafe { dst.ptr().add(GRANULE_SIZE) };
        let copy = unsafe { clone(&shadow, src.ptr(), dst_base) }.unwrap();
        assert_eq!(copy.base, dst_base as usize);
        assert_eq!(copy.total_size, total);
        assert_eq!(copy.user_addr() % align, 0);
        assert!(copy.end() <= dst_base as usize + total);
        assert!(shadow.is_range_accessible(copy.user_addr(), 70));
        assert!(shadow.is_range_poisoned(copy.base, copy.user_offset));
        for i in 0..70 {
            assert_eq!(unsafe { *copy.user_ptr().add(i) }, 0xC3);
        }
        let asan = unsafe { asan_extent(&shadow, copy.user_ptr()) }.unwrap();
        assert_eq!(asan.base, dst_base);
    }

    #[test]
    fn test_header_survives_unpoison_poison_cycle() {
        let shadow = fresh();
        let total = asan_object_size(100, 8);
        let mut buf = Buffer::new(total, 8);
        let base = buf.ptr();
        let layout = unsafe { initialize(&shadow, base, 100, 8) };

        shadow.unpoison(layout.base, layout.user_offset);
        shadow.poison_range(layout.base, layout.user_offset);
        assert_eq!(shadow.marker(layout.base), Some(Marker::UserPoisoned));

        let user = unsafe { user_extent(&shadow, base) }.unwrap();
        assert_eq!(user.user_ptr, layout.user_ptr());
        assert_eq!(user.user_size, 100);
        let asan = unsafe { asan_extent(&shadow, user.user_ptr) }.unwrap();
        assert_eq!(asan.base, base);
        assert_eq!(asan.total_size, total);

        unsafe { quarantine(&shadow, base) };
        unsafe { destroy(&shadow, base) };
        assert_eq!(unsafe { state(&shadow, base) }, Ok(ObjectState::Destroyed));
    }

    #[test]
    fn test_clone_unknown_source_writes_nothing() {
        let shadow = fresh();
        let mut src = Buffer::new(128, 8);
        let mut dst = Buffer::new(128, 8);
        unsafe { ptr::write_bytes(dst.ptr(), 0x11, 128) };
        let result = unsafe { clone(&shadow, src.ptr(), dst.ptr()) };
        assert!(result.is_err());
        assert!(shadow.is_range_accessible(dst.ptr() as usize, 128));
        for i in 0..128 {
            assert_eq!(unsafe { *dst.ptr().add(i) }, 0x11);
        }
    }

    #[test]
    fn test_nested_flag() {
        let shadow = fresh();
        let total = asan_object_size(16, 8);
        let mut a = Buffer::new(total, 8);
        let mut b = Buffer::new(total, 8);
        unsafe {
            initialize_nested(&shadow, a.ptr(), 16, 8);
            assert_eq!(is_nested(&shadow, a.ptr()), Ok(true));
            clone(&shadow, a.ptr(), b.ptr()).unwrap();
            assert_eq!(is_nested(&shadow, b.ptr()), Ok(true));
            initialize(&shadow, a.ptr(), 16, 8);
            assert_eq!(is_nested(&shadow, a.ptr()), Ok(false));
        }
    }
}
