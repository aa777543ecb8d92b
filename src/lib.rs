#![no_std]

//! rtasan: the object-layout and shadow-memory engine of a heap address
//! sanitizer.
//!
//! Three layers, leaves first:
//! - [`shadow`]: one atomic entry per granule of the address space, recording
//!   which bytes are currently addressable (lock-free reads, no global lock)
//! - [`layout`]: pure arithmetic sizing an instrumented object (header,
//!   user region, trailing redzone) for any size and alignment
//! - [`object`]: the lifecycle of an instrumented object (initialize, clone,
//!   quarantine, destroy) kept consistent with the shadow table
//!
//! # Usage
//!
//! ```ignore
//! use rtasan::{object, shadow::SHADOW};
//!
//! let total = object::asan_object_size(100, 16);
//! let block = raw_alloc(total, 16);
//! let layout = unsafe { object::initialize(&SHADOW, block, 100, 16) };
//! let user = layout.user_ptr();
//! ```

#[cfg(test)]
extern crate alloc;
#[cfg(any(test, feature = "std"))]
extern crate std;

pub mod config {
    //! Build-time constants generated from `rtasan.toml`.
    include!(concat!(env!("OUT_DIR"), "/config_gen.rs"));
}

mod error;
#[cfg(feature = "ffi")]
pub mod ffi;
pub mod header;
pub mod layout;
mod macros;
pub mod object;
pub mod platform;
pub mod shadow;
#[cfg(feature = "stats")]
pub mod stats;

pub use config::{GRANULE_SHIFT, GRANULE_SIZE};
pub use layout::ObjectLayout;
pub use object::{AsanExtent, ExtentError, ObjectState, UserExtent};
pub use shadow::{Marker, SHADOW, Shadow};

// Panic handler for staticlib builds (no_std has no default panic handler).
// Only active when panic="abort" (i.e., the `fast` profile), not during normal checks.
#[cfg(all(feature = "ffi", not(test), not(feature = "std"), panic = "abort"))]
#[panic_handler]
fn panic(_: &core::panic::PanicInfo) -> ! {
    unsafe extern "C" {
        fn abort() -> !;
    }
    unsafe { abort() }
}
