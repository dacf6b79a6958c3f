//! Single-owner accounting cell.

use std::sync::atomic::{AtomicI64, Ordering};

use blobdepot_types::{SpaceColor, VDiskId};

use crate::color_limits::ColorLimits;
use crate::error::QuotaError;

/// Chunk accounting for one owner.
///
/// Invariant: `0 <= used <= hard_limit` at every observable point, except
/// transiently after [`QuotaRecord::force_hard_limit`] shrank the limit
/// below the current usage (callers must then rebalance upward or treat
/// the colour as black) and after a force allocation during state restore.
///
/// All numeric fields are relaxed atomics: writes happen from one logical
/// execution context, but monitoring threads read limits, usage and colour
/// estimates concurrently. A stale read is acceptable because every
/// consumer of these figures treats them as advisory. The `name` and
/// `vdisk_id` fields are only touched from the writer context.
#[derive(Debug, Default)]
pub struct QuotaRecord {
    name: String,
    vdisk_id: Option<VDiskId>,
    hard_limit: AtomicI64,
    used: AtomicI64,
    // Thresholds are copied in whenever the hard limit changes so that a
    // colour estimate is a handful of single-word loads.
    cyan: AtomicI64,
    yellow: AtomicI64,
    light_orange: AtomicI64,
    orange: AtomicI64,
    red: AtomicI64,
    black: AtomicI64,
}

impl QuotaRecord {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    pub fn vdisk_id(&self) -> Option<VDiskId> {
        self.vdisk_id
    }

    pub fn set_vdisk_id(&mut self, vdisk_id: VDiskId) {
        self.vdisk_id = Some(vdisk_id);
    }

    pub fn hard_limit(&self) -> i64 {
        self.hard_limit.load(Ordering::Relaxed)
    }

    pub fn used(&self) -> i64 {
        self.used.load(Ordering::Relaxed)
    }

    /// Chunks still available under the hard limit. Negative while the
    /// record is mid-rebalance with `used > hard_limit`.
    pub fn free(&self) -> i64 {
        self.hard_limit() - self.used()
    }

    /// Current colour thresholds.
    pub fn limits(&self) -> ColorLimits {
        ColorLimits {
            cyan: self.cyan.load(Ordering::Relaxed),
            yellow: self.yellow.load(Ordering::Relaxed),
            light_orange: self.light_orange.load(Ordering::Relaxed),
            orange: self.orange.load(Ordering::Relaxed),
            red: self.red.load(Ordering::Relaxed),
            black: self.black.load(Ordering::Relaxed),
        }
    }

    /// Sets the hard limit and refreshes the colour thresholds, leaving
    /// `used` untouched. Returns the signed delta `new_limit - old_limit`
    /// so the caller can adjust its unappropriated running total.
    pub fn force_hard_limit(&self, new_limit: i64, limits: &ColorLimits) -> i64 {
        assert!(new_limit >= 0, "hard limit must be non-negative");
        debug_assert!(limits.is_monotonic(), "colour thresholds must be monotonic");

        self.cyan.store(limits.cyan, Ordering::Relaxed);
        self.yellow.store(limits.yellow, Ordering::Relaxed);
        self.light_orange.store(limits.light_orange, Ordering::Relaxed);
        self.orange.store(limits.orange, Ordering::Relaxed);
        self.red.store(limits.red, Ordering::Relaxed);
        self.black.store(limits.black, Ordering::Relaxed);

        let old_limit = self.hard_limit.swap(new_limit, Ordering::Relaxed);
        new_limit - old_limit
    }

    /// Allocates `count` chunks if they fit under the hard limit.
    pub fn try_allocate(&self, count: i64) -> Result<(), QuotaError> {
        assert!(count >= 0, "allocation count must be non-negative");
        let used = self.used();
        let hard_limit = self.hard_limit();
        if used + count > hard_limit {
            return Err(QuotaError::OutOfSpace {
                name: self.name.clone(),
                requested: count,
                free: hard_limit - used,
                hard_limit,
            });
        }
        self.used.store(used + count, Ordering::Relaxed);
        Ok(())
    }

    /// Unconditionally allocates `count` chunks. Used for user-pool
    /// bookkeeping, where the shared pool is the hard wall.
    pub fn force_allocate(&self, count: i64) {
        self.used.fetch_add(count, Ordering::Relaxed);
    }

    /// Restores `count` used chunks during initial state restore.
    pub fn initial_allocate(&self, count: i64) {
        assert!(count >= 0, "initial allocation must be non-negative");
        self.force_allocate(count);
    }

    /// Releases `count` previously allocated chunks.
    ///
    /// # Panics
    ///
    /// Panics if `count` exceeds the current usage; releasing chunks that
    /// were never allocated is a programmer error.
    pub fn release(&self, count: i64) {
        assert!(count >= 0, "release count must be non-negative");
        let used = self.used();
        assert!(
            count <= used,
            "released {count} chunks from \"{}\" with only {used} used",
            self.name
        );
        self.used.store(used - count, Ordering::Relaxed);
    }

    /// Estimates the colour this record would show after allocating
    /// `allocation_size` more chunks. Safe to call from any thread.
    pub fn estimate_color(&self, allocation_size: i64) -> SpaceColor {
        self.limits().color_for_free(self.free() - allocation_size)
    }
}
