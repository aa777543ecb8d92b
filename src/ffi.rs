//! C-ABI exports for the allocation interceptor and compiled-in checks.
//!
//! Gated behind `features = ["ffi"]`. Every export operates on the
//! process-wide [`SHADOW`] table. With the `testing` feature, export names
//! are prefixed `rtasan_testing_` instead of `asan_` so a test binary can
//! link them next to a real sanitizer runtime.
//!
//! Extent lookups never fail loudly: an unrecognized pointer writes null and
//! zero to the out parameters. Contract violations (bad alignment, lifecycle
//! misuse) panic, which aborts under the `fast` profile.

use crate::object;
use crate::shadow::SHADOW;
use core::ffi::c_void;
use core::ptr;

#[cfg_attr(not(feature = "testing"), unsafe(export_name = "asan_PoisonMemoryRange"))]
#[cfg_attr(feature = "testing", unsafe(export_name = "rtasan_testing_PoisonMemoryRange"))]
pub unsafe extern "C" fn asan_poison_memory_range(address: *const c_void, size: usize) {
    SHADOW.poison_range(address as usize, size);
}

#[cfg_attr(not(feature = "testing"), unsafe(export_name = "asan_UnpoisonMemoryRange"))]
#[cfg_attr(feature = "testing", unsafe(export_name = "rtasan_testing_UnpoisonMemoryRange"))]
pub unsafe extern "C" fn asan_unpoison_memory_range(address: *const c_void, size: usize) {
    SHADOW.unpoison(address as usize, size);
}

#[cfg_attr(not(feature = "testing"), unsafe(export_name = "asan_IsAccessible"))]
#[cfg_attr(feature = "testing", unsafe(export_name = "rtasan_testing_IsAccessible"))]
pub extern "C" fn asan_is_accessible(address: *const c_void) -> bool {
    SHADOW.is_accessible(address as usize)
}

#[cfg_attr(not(feature = "testing"), unsafe(export_name = "asan_GetAsanObjectSize"))]
#[cfg_attr(feature = "testing", unsafe(export_name = "rtasan_testing_GetAsanObjectSize"))]
pub extern "C" fn asan_get_asan_object_size(user_object_size: usize, alignment: usize) -> usize {
    object::asan_object_size(user_object_size, alignment)
}

#[cfg_attr(not(feature = "testing"), unsafe(export_name = "asan_InitializeObject"))]
#[cfg_attr(feature = "testing", unsafe(export_name = "rtasan_testing_InitializeObject"))]
pub unsafe extern "C" fn asan_initialize_object(
    asan_pointer: *mut c_void,
    user_object_size: usize,
    alignment: usize,
) {
    unsafe { object::initialize(&SHADOW, asan_pointer.cast(), user_object_size, alignment) };
}

#[cfg_attr(not(feature = "testing"), unsafe(export_name = "asan_GetUserExtent"))]
#[cfg_attr(feature = "testing", unsafe(export_name = "rtasan_testing_GetUserExtent"))]
pub unsafe extern "C" fn asan_get_user_extent(
    asan_pointer: *const c_void,
    user_pointer: *mut *mut c_void,
    size: *mut usize,
) {
    let (found, found_size) = match unsafe { object::user_extent(&SHADOW, asan_pointer.cast()) } {
        Ok(extent) => (extent.user_ptr.cast::<c_void>(), extent.user_size),
        Err(_) => (ptr::null_mut(), 0),
    };
    unsafe { write_out(user_pointer, size, found, found_size) };
}

#[cfg_attr(not(feature = "testing"), unsafe(export_name = "asan_GetAsanExtent"))]
#[cfg_attr(feature = "testing", unsafe(export_name = "rtasan_testing_GetAsanExtent"))]
pub unsafe extern "C" fn asan_get_asan_extent(
    user_pointer: *const c_void,
    asan_pointer: *mut *mut c_void,
    size: *mut usize,
) {
    let (found, found_size) = match unsafe { object::asan_extent(&SHADOW, user_pointer.cast()) } {
        Ok(extent) => (extent.base.cast::<c_void>(), extent.total_size),
        Err(_) => (ptr::null_mut(), 0),
    };
    unsafe { write_out(asan_pointer, size, found, found_size) };
}

/// Returns false (and leaves the destination untouched) if the source is not
/// a recognized object.
#[cfg_attr(not(feature = "testing"), unsafe(export_name = "asan_CloneObject"))]
#[cfg_attr(feature = "testing", unsafe(export_name = "rtasan_testing_CloneObject"))]
pub unsafe extern "C" fn asan_clone_object(src: *const c_void, dst: *mut c_void) -> bool {
    unsafe { object::clone(&SHADOW, src.cast(), dst.cast()) }.is_ok()
}

#[cfg_attr(not(feature = "testing"), unsafe(export_name = "asan_QuarantineObject"))]
#[cfg_attr(feature = "testing", unsafe(export_name = "rtasan_testing_QuarantineObject"))]
pub unsafe extern "C" fn asan_quarantine_object(asan_pointer: *mut c_void) {
    unsafe { object::quarantine(&SHADOW, asan_pointer.cast()) };
}

#[cfg_attr(not(feature = "testing"), unsafe(export_name = "asan_DestroyObject"))]
#[cfg_attr(feature = "testing", unsafe(export_name = "rtasan_testing_DestroyObject"))]
pub unsafe extern "C" fn asan_destroy_object(asan_pointer: *mut c_void) {
    unsafe { object::destroy(&SHADOW, asan_pointer.cast()) };
}

unsafe fn write_out(
    pointer_out: *mut *mut c_void,
    size_out: *mut usize,
    pointer: *mut c_void,
    size: usize,
) {
    if !pointer_out.is_null() {
        unsafe { *pointer_out = pointer };
    }
    if !size_out.is_null() {
        unsafe { *size_out = size };
    }
}
