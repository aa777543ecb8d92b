//! Shadow and lifecycle statistics counters.
//!
//! All counters use `Relaxed` ordering. The shadow entries carry their own
//! Acquire/Release ordering; these counters are purely for monitoring.
//!
//! # Usage
//!
//! ```ignore
//! let snap = rtasan::stats::snapshot();
//! println!("quarantined: {}", snap.objects_quarantined);
//! ```
//!
//! Individual counter loads are atomic but not globally consistent with each
//! other.

use core::sync::atomic::{AtomicU64, Ordering};

pub(crate) struct Stats {
    // ---- Shadow table ----
    /// Calls to `Shadow::poison` with size > 0.
    pub poison_calls: AtomicU64,
    /// Calls to `Shadow::unpoison` with size > 0.
    pub unpoison_calls: AtomicU64,
    /// Sum of byte sizes passed to `Shadow::poison`.
    pub poisoned_bytes: AtomicU64,
    /// Sum of byte sizes passed to `Shadow::unpoison`.
    pub unpoisoned_bytes: AtomicU64,
    /// Mid and leaf nodes installed (race losers are not counted).
    pub shadow_nodes: AtomicU64,

    // ---- Object lifecycle ----
    pub objects_initialized: AtomicU64,
    pub objects_cloned: AtomicU64,
    pub objects_quarantined: AtomicU64,
    pub objects_destroyed: AtomicU64,
    /// Headers that failed validation in an extent lookup.
    pub headers_rejected: AtomicU64,
}

impl Stats {
    const fn new() -> Self {
        Self {
            poison_calls: AtomicU64::new(0),
            unpoison_calls: AtomicU64::new(0),
            poisoned_bytes: AtomicU64::new(0),
            unpoisoned_bytes: AtomicU64::new(0),
            shadow_nodes: AtomicU64::new(0),
            objects_initialized: AtomicU64::new(0),
            objects_cloned: AtomicU64::new(0),
            objects_quarantined: AtomicU64::new(0),
            objects_destroyed: AtomicU64::new(0),
            headers_rejected: AtomicU64::new(0),
        }
    }
}

pub(crate) static STATS: Stats = Stats::new();

/// A point-in-time snapshot of all counters.
///
/// Obtain a snapshot with [`snapshot()`].
#[derive(Clone, Copy, Debug, Default)]
pub struct Snapshot {
    pub poison_calls: u64,
    pub unpoison_calls: u64,
    pub poisoned_bytes: u64,
    pub unpoisoned_bytes: u64,
    pub shadow_nodes: u64,
    pub objects_initialized: u64,
    pub objects_cloned: u64,
    pub objects_quarantined: u64,
    pub objects_destroyed: u64,
    pub headers_rejected: u64,
}

impl Snapshot {
    /// Objects currently sitting in quarantine, as far as the counters can tell.
    pub fn in_quarantine(&self) -> u64 {
        self.objects_quarantined.saturating_sub(self.objects_destroyed)
    }
}

/// Load all counters with `Relaxed` ordering and return a [`Snapshot`].
pub fn snapshot() -> Snapshot {
    let s = &STATS;
    Snapshot {
        poison_calls: s.poison_calls.load(Ordering::Relaxed),
        unpoison_calls: s.unpoison_calls.load(Ordering::Relaxed),
        poisoned_bytes: s.poisoned_bytes.load(Ordering::Relaxed),
        unpoisoned_bytes: s.unpoisoned_bytes.load(Ordering::Relaxed),
        shadow_nodes: s.shadow_nodes.load(Ordering::Relaxed),
        objects_initialized: s.objects_initialized.load(Ordering::Relaxed),
        objects_cloned: s.objects_cloned.load(Ordering::Relaxed),
        objects_quarantined: s.objects_quarantined.load(Ordering::Relaxed),
        objects_destroyed: s.objects_destroyed.load(Ordering::Relaxed),
        headers_rejected: s.headers_rejected.load(Ordering::Relaxed),
    }
}
