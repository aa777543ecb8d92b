//! OS platform abstraction for the shadow table's backing memory.
//!
//! Provides `page_alloc` and `page_dealloc` over the platform virtual memory
//! APIs (VirtualAlloc on Windows, mmap on Unix). Under Miri, uses std::alloc
//! as a backing store instead. Only shadow nodes are allocated here; user
//! blocks always come from the caller.

cfg_if::cfg_if! {
    if #[cfg(miri)] {
        mod miri;
    } else if #[cfg(windows)] {
        mod windows;
    } else if #[cfg(unix)] {
        mod unix;
    }
}

/// Granularity `page_alloc` sizes are rounded to before being handed out.
pub const PAGE_SIZE: usize = 4096;

/// Round `size` up to a whole number of pages.
#[inline]
pub const fn page_round_up(size: usize) -> usize {
    (size + PAGE_SIZE - 1) & !(PAGE_SIZE - 1)
}

/// Allocate `size` bytes of virtual memory, page-aligned.
/// Returns null on failure. Memory is zero-initialized by the OS.
///
/// # Safety
/// Caller must eventually call `page_dealloc` with the returned pointer and the
/// same `size`.
#[inline]
pub unsafe fn page_alloc(size: usize) -> *mut u8 {
    cfg_if::cfg_if! {
        if #[cfg(miri)] {
            unsafe { miri::page_alloc(size) }
        } else if #[cfg(windows)] {
            unsafe { windows::page_alloc(size) }
        } else if #[cfg(unix)] {
            unsafe { unix::page_alloc(size) }
        }
    }
}

/// Free virtual memory previously allocated by `page_alloc`.
///
/// # Safety
/// `ptr` must have been returned by `page_alloc`, and `size` must match
/// the original allocation size.
#[inline]
pub unsafe fn page_dealloc(ptr: *mut u8, size: usize) {
    cfg_if::cfg_if! {
        if #[cfg(miri)] {
            unsafe { miri::page_dealloc(ptr, size) }
        } else if #[cfg(windows)] {
            let _ = size;
            unsafe { windows::page_dealloc(ptr) }
        } else if #[cfg(unix)] {
            unsafe { unix::page_dealloc(ptr, size) }
        }
    }
}
