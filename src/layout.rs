//! Object layout calculator: pure integer arithmetic sizing an instrumented
//! object.
//!
//! ```text
//! base          base + user_offset       user_end              base + total_size
//! |-- header ---|------- user region -------|---- trailing redzone ----|
//!   (poisoned)        (accessible)                 (poisoned)
//! ```
//!
//! The header is at least [`MIN_HEADER_SIZE`] bytes and grows with the
//! alignment so the user pointer lands on an aligned address. The trailing
//! redzone covers the rounding of the user region to a granule plus at least
//! `MIN_TRAILER_REDZONE` bytes.

use crate::config::{GRANULE_SIZE, MAX_ALIGNMENT, MIN_HEADER_REDZONE, MIN_TRAILER_REDZONE};
use crate::header::{HEADER_SIZE, ObjectHeader};

/// Round up to the next multiple of `align` (must be a power of 2).
#[inline]
pub const fn round_up(size: usize, align: usize) -> usize {
    (size + align - 1) & !(align - 1)
}

const fn max(a: usize, b: usize) -> usize {
    if a > b { a } else { b }
}

/// Smallest distance between an object's base and its user pointer.
pub const MIN_HEADER_SIZE: usize = round_up(max(HEADER_SIZE, MIN_HEADER_REDZONE), GRANULE_SIZE);

/// Clamp `alignment` to at least one granule.
///
/// Panics if `alignment` is not a power of two or exceeds `MAX_ALIGNMENT`:
/// a bad alignment is a caller bug, never a runtime condition.
#[inline]
pub fn effective_alignment(alignment: usize) -> usize {
    assert!(
        alignment.is_power_of_two(),
        "alignment {} is not a power of two",
        alignment
    );
    assert!(
        alignment <= MAX_ALIGNMENT,
        "alignment {} exceeds maximum {}",
        alignment,
        MAX_ALIGNMENT
    );
    alignment.max(GRANULE_SIZE)
}

/// Header bytes reserved so that an `alignment`-aligned user pointer is
/// reachable from any granule-aligned base.
#[inline]
fn header_room(alignment: usize) -> usize {
    MIN_HEADER_SIZE + alignment - GRANULE_SIZE
}

/// Total bytes an instrumented object with `requested_size` user bytes and
/// the given alignment occupies. The caller reserves this much raw memory
/// before calling `object::initialize`.
pub fn object_size(requested_size: usize, alignment: usize) -> usize {
    let alignment = effective_alignment(alignment);
    let total = requested_size
        .checked_add(GRANULE_SIZE - 1)
        .map(|s| s & !(GRANULE_SIZE - 1))
        .and_then(|body| body.checked_add(header_room(alignment)))
        .and_then(|s| s.checked_add(MIN_TRAILER_REDZONE));
    match total {
        Some(total) => total,
        None => panic!("object size overflow for {} bytes", requested_size),
    }
}

/// Smallest offset of at least [`MIN_HEADER_SIZE`] that puts
/// `base + offset` on an `alignment` boundary.
pub fn user_offset(base: usize, alignment: usize) -> usize {
    let alignment = effective_alignment(alignment);
    round_up(base + MIN_HEADER_SIZE, alignment) - base
}

/// Resolved layout of one instrumented object at a concrete address.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct ObjectLayout {
    pub base: usize,
    pub requested_size: usize,
    /// Effective alignment (at least one granule).
    pub alignment: usize,
    pub user_offset: usize,
    pub total_size: usize,
}

impl ObjectLayout {
    /// Lay out an object at `base`, which must be granule aligned.
    pub fn compute(base: usize, requested_size: usize, alignment: usize) -> Self {
        assert!(
            base % GRANULE_SIZE == 0,
            "object base {:#x} is not granule aligned",
            base
        );
        let alignment = effective_alignment(alignment);
        let total_size = object_size(requested_size, alignment);
        let user_offset = user_offset(base, alignment);
        debug_assert!(user_offset + requested_size < total_size);
        Self {
            base,
            requested_size,
            alignment,
            user_offset,
            total_size,
        }
    }

    /// Layout described by a header that already passed verification.
    /// Returns `None` if its fields violate the sizing rules.
    pub fn from_header(base: usize, header: &ObjectHeader) -> Option<Self> {
        let alignment = header.alignment as usize;
        if !alignment.is_power_of_two() || alignment < GRANULE_SIZE || alignment > MAX_ALIGNMENT {
            return None;
        }
        if base % GRANULE_SIZE != 0 || user_offset(base, alignment) != header.user_offset as usize {
            return None;
        }
        // Reject sizes whose layout would overflow instead of panicking.
        let limit = usize::MAX - header_room(alignment) - MIN_TRAILER_REDZONE - GRANULE_SIZE;
        if header.requested_size > limit {
            return None;
        }
        Some(Self::compute(base, header.requested_size, alignment))
    }

    #[inline]
    pub fn user_addr(&self) -> usize {
        self.base + self.user_offset
    }

    #[inline]
    pub fn user_ptr(&self) -> *mut u8 {
        self.user_addr() as *mut u8
    }

    /// One past the last user byte: the start of the trailing redzone.
    #[inline]
    pub fn user_end(&self) -> usize {
        self.user_addr() + self.requested_size
    }

    #[inline]
    pub fn trailer_size(&self) -> usize {
        self.end() - self.user_end()
    }

    /// One past the last byte of the object.
    #[inline]
    pub fn end(&self) -> usize {
        self.base + self.total_size
    }
}
