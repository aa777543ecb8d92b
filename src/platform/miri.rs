//! Miri-compatible platform shim using std::alloc as backing store.
//!
//! Miri can't execute mmap/VirtualAlloc, so shadow nodes come from the
//! system allocator. This keeps the radix-tree pointer logic checkable.

extern crate alloc;

use core::alloc::Layout;

fn node_layout(size: usize) -> Option<Layout> {
    Layout::from_size_align(size, super::PAGE_SIZE).ok()
}

pub unsafe fn page_alloc(size: usize) -> *mut u8 {
    match node_layout(size) {
        Some(layout) => unsafe { alloc::alloc::alloc_zeroed(layout) },
        None => core::ptr::null_mut(),
    }
}

pub unsafe fn page_dealloc(ptr: *mut u8, size: usize) {
    if let Some(layout) = node_layout(size) {
        unsafe { alloc::alloc::dealloc(ptr, layout) };
    }
}
