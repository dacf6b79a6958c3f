//! Per-owner quota distribution.

use blobdepot_types::{OwnerId, SpaceColor, VDiskId, OWNER_COUNT};

use crate::color_limits::ColorLimits;
use crate::error::QuotaError;
use crate::quota_record::QuotaRecord;

/// Distributes a declared total across a variable set of active owners
/// with an equal-split rule.
///
/// The record table is densely allocated over the whole owner id space so
/// that monitoring threads can read any owner's figures lock-free; the
/// active id set itself changes only from the writer context.
///
/// `expected_owner_count` acts as a floor on the split divisor: with an
/// expected count of `n`, the first `n` owners each receive `total / n`
/// and later joiners receive nothing until the expected count is raised.
/// Zero means "add and remove owners as you go".
#[derive(Debug)]
pub struct PerOwnerQuotaTracker {
    limits: ColorLimits,
    total: i64,
    expected_owner_count: usize,
    active: Vec<OwnerId>,
    records: Box<[QuotaRecord; OWNER_COUNT]>,
}

impl PerOwnerQuotaTracker {
    pub fn new(total: i64, limits: ColorLimits) -> Self {
        Self {
            limits,
            total,
            expected_owner_count: 0,
            active: Vec::new(),
            records: Box::new(std::array::from_fn(|_| QuotaRecord::default())),
        }
    }

    pub fn total(&self) -> i64 {
        self.total
    }

    pub fn expected_owner_count(&self) -> usize {
        self.expected_owner_count
    }

    pub fn active_owners(&self) -> &[OwnerId] {
        &self.active
    }

    pub fn limits(&self) -> ColorLimits {
        self.limits
    }

    pub(crate) fn record(&self, id: OwnerId) -> &QuotaRecord {
        &self.records[id.index()]
    }

    /// Retunes the split divisor floor and redistributes.
    ///
    /// Reducing the expected count is fair. Increasing it is fundamentally
    /// not: shares jump down instantly and overusers keep their unfair
    /// share until they release.
    pub fn set_expected_owner_count(&mut self, count: usize) {
        if count != self.expected_owner_count {
            self.expected_owner_count = count;
            self.redistribute();
        }
    }

    /// Divides the total into `max(expected_owner_count, |active|)` equal
    /// parts and assigns one part to each active owner. No rounding
    /// compensation: the leftover stays unallocated.
    pub fn redistribute(&mut self) {
        let parts = self.expected_owner_count.max(self.active.len());
        if parts > 0 {
            let share = self.total / parts as i64;
            for &id in &self.active {
                self.records[id.index()].force_hard_limit(share, &self.limits);
            }
        }
    }

    /// Adds a user owner.
    ///
    /// Redistributes only while the active set still fits the expected
    /// count (or the expected count is unset); a joiner beyond the
    /// expected count receives a zero share until the count is raised.
    ///
    /// # Panics
    ///
    /// Panics if the owner's record is not empty: an id must be removed
    /// before it can be added again.
    pub fn add_owner(&mut self, id: OwnerId, vdisk_id: VDiskId) {
        let record = &mut self.records[id.index()];
        assert_eq!(record.hard_limit(), 0, "owner {id} already has a quota");
        assert_eq!(record.used(), 0, "owner {id} still has used chunks");
        record.set_name(format!("Owner {id}"));
        record.set_vdisk_id(vdisk_id);

        self.active.push(id);
        if self.active.len() <= self.expected_owner_count || self.expected_owner_count == 0 {
            self.redistribute();
        }
    }

    /// Removes an owner and zeroes its quota. The freed share is NOT
    /// redistributed to the remaining owners; reducing the expected count
    /// is the fair way to widen shares.
    ///
    /// # Panics
    ///
    /// Panics if the owner is not active.
    pub fn remove_owner(&mut self, id: OwnerId) {
        let position = self
            .active
            .iter()
            .position(|&active_id| active_id == id)
            .unwrap_or_else(|| panic!("owner {id} is not active"));
        self.active.swap_remove(position);
        self.records[id.index()].force_hard_limit(0, &self.limits);
    }

    /// Adds a system owner with a fixed quota outside the equal-split
    /// rule. Returns the signed hard-limit delta for the caller's
    /// unappropriated running total.
    ///
    /// A zero quota still appends the id to the active set.
    pub fn add_system_owner(&mut self, id: OwnerId, quota: i64, name: impl Into<String>) -> i64 {
        let record = &mut self.records[id.index()];
        assert_eq!(record.hard_limit(), 0, "owner {id} already has a quota");
        assert_eq!(record.used(), 0, "owner {id} still has used chunks");
        record.set_name(name);

        let delta = self.records[id.index()].force_hard_limit(quota, &self.limits);
        self.active.push(id);
        delta
    }

    pub fn hard_limit(&self, id: OwnerId) -> i64 {
        self.records[id.index()].hard_limit()
    }

    pub fn free(&self, id: OwnerId) -> i64 {
        self.records[id.index()].free()
    }

    pub fn used(&self, id: OwnerId) -> i64 {
        self.records[id.index()].used()
    }

    /// Thread-safe colour estimate for one owner.
    pub fn estimate_color(&self, id: OwnerId, allocation_size: i64) -> SpaceColor {
        self.records[id.index()].estimate_color(allocation_size)
    }

    pub fn try_allocate(&self, id: OwnerId, count: i64) -> Result<(), QuotaError> {
        self.records[id.index()].try_allocate(count)
    }

    pub fn force_allocate(&self, id: OwnerId, count: i64) {
        self.records[id.index()].force_allocate(count);
    }

    pub fn initial_allocate(&self, id: OwnerId, count: i64) {
        self.records[id.index()].initial_allocate(count);
    }

    pub fn release(&self, id: OwnerId, count: i64) {
        self.records[id.index()].release(count);
    }
}
