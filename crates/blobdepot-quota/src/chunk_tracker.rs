//! Chunk tracker: the composed quota state for one disk.

use blobdepot_types::{OwnerId, SpaceColor, StatusFlags, VDiskId};
use tracing::debug;

use crate::color_limits::ColorLimits;
use crate::error::{QuotaError, ResetError};
use crate::owner_tracker::PerOwnerQuotaTracker;
use crate::params::KeeperParams;
use crate::quota_record::QuotaRecord;
use crate::snapshot::ChunkTrackerSnapshot;

/// Composes the system-role tracker, the shared user-pool record and the
/// per-user tracker, and routes allocate/release/colour through the
/// correct pool for each owner class.
///
/// Invariant: the shared record's usage equals the sum of all user
/// owners' usage; user allocation force-increments the per-owner record
/// (advisory) and then takes the shared pool as the hard wall.
#[derive(Debug)]
pub struct ChunkTracker {
    global: PerOwnerQuotaTracker,
    shared: QuotaRecord,
    owner: PerOwnerQuotaTracker,
    params: KeeperParams,
    color_border: SpaceColor,
}

impl Default for ChunkTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ChunkTracker {
    /// Chunks always reserved for the system.
    pub const SYS_RESERVE_SIZE: i64 = 5;

    /// Common log bonus granted when static groups are present.
    pub const COMMON_STATIC_LOG_SIZE: i64 = 70;

    /// Floor on the effective common log size.
    pub const MIN_COMMON_LOG_SIZE: i64 = 200;

    pub fn new() -> Self {
        Self {
            global: PerOwnerQuotaTracker::new(0, ColorLimits::log_limits()),
            shared: QuotaRecord::new("SharedQuota"),
            owner: PerOwnerQuotaTracker::new(0, ColorLimits::chunk_limits()),
            params: KeeperParams::default(),
            color_border: SpaceColor::Green,
        }
    }

    /// Rebuilds the pool from `params`.
    ///
    /// System pools are carved out of an unappropriated running total
    /// initialised to the whole pool size; whatever remains becomes the
    /// user chunk pool. Any step that would drive the unappropriated
    /// total negative fails the reset and leaves the tracker in its
    /// prior state.
    pub fn reset(&mut self, params: KeeperParams) -> Result<(), ResetError> {
        let mut global = PerOwnerQuotaTracker::new(params.total_chunks, ColorLimits::log_limits());
        let mut unappropriated = params.total_chunks;

        unappropriated -= global.add_system_owner(OwnerId::SYSTEM_LOG, params.sys_log_size, "SysLog");
        if unappropriated < 0 {
            return Err(ResetError::SysLogQuota {
                size: params.sys_log_size,
                total_chunks: params.total_chunks,
            });
        }

        unappropriated -=
            global.add_system_owner(OwnerId::SYSTEM_RESERVE, Self::SYS_RESERVE_SIZE, "System Reserve");
        if unappropriated < 0 {
            return Err(ResetError::SysReserveQuota {
                size: Self::SYS_RESERVE_SIZE,
                total_chunks: params.total_chunks,
            });
        }

        let static_log = if params.has_static_groups {
            Self::COMMON_STATIC_LOG_SIZE
        } else {
            0
        };
        unappropriated -= global.add_system_owner(
            OwnerId::COMMON_STATIC_LOG,
            static_log,
            "Common Log Static Group Bonus",
        );
        if unappropriated < 0 {
            return Err(ResetError::StaticLogQuota {
                size: static_log,
                total_chunks: params.total_chunks,
            });
        }

        let common_log = Self::MIN_COMMON_LOG_SIZE.max(params.common_log_size - static_log);
        unappropriated -= global.add_system_owner(OwnerId::SYSTEM, common_log, "Common Log");
        if unappropriated < 0 {
            return Err(ResetError::CommonLogQuota {
                size: common_log,
                total_chunks: params.total_chunks,
            });
        }

        let chunks_owned: i64 = params.owners.values().map(|info| info.chunks_owned).sum();
        if chunks_owned > unappropriated {
            return Err(ResetError::UserPoolExceeded {
                chunks_owned,
                unappropriated,
                total_chunks: params.total_chunks,
            });
        }
        // The remainder of the pool becomes the per-owner chunk pool,
        // held by the BEGIN_USER pseudo-owner in the global tracker.
        global.add_system_owner(OwnerId::BEGIN_USER, unappropriated, "Per Owner Chunk Pool");

        let user_pool = global.hard_limit(OwnerId::BEGIN_USER);
        let chunk_limits = ColorLimits::chunk_limits();
        let shared = QuotaRecord::new("SharedQuota");
        shared.force_hard_limit(user_pool, &chunk_limits);
        let mut owner = PerOwnerQuotaTracker::new(user_pool, chunk_limits);
        owner.set_expected_owner_count(params.expected_owner_count);

        for (&owner_id, info) in &params.owners {
            assert!(owner_id.is_user(), "owner table must hold user ids");
            owner.add_owner(owner_id, info.vdisk_id);
            if info.chunks_owned > 0 {
                owner.initial_allocate(owner_id, info.chunks_owned);
                shared.initial_allocate(info.chunks_owned);
            }
        }

        if params.common_log_size > 0 {
            global.initial_allocate(OwnerId::SYSTEM, params.common_log_size);
        }

        debug!(
            total_chunks = params.total_chunks,
            user_pool,
            owners = params.owners.len(),
            "chunk tracker reset"
        );

        self.color_border = params.space_color_border;
        self.global = global;
        self.shared = shared;
        self.owner = owner;
        self.params = params;
        Ok(())
    }

    /// The parameters the pool was last built from.
    pub fn params(&self) -> &KeeperParams {
        &self.params
    }

    /// Registers a user owner after reset.
    pub fn add_owner(&mut self, owner: OwnerId, vdisk_id: VDiskId) {
        assert!(owner.is_user(), "owner {owner} is not a user id");
        self.owner.add_owner(owner, vdisk_id);
    }

    /// Unregisters a user owner.
    pub fn remove_owner(&mut self, owner: OwnerId) {
        assert!(owner.is_user(), "owner {owner} is not a user id");
        self.owner.remove_owner(owner);
    }

    pub fn owner_hard_limit(&self, owner: OwnerId) -> i64 {
        if owner.is_user() {
            self.owner.hard_limit(owner)
        } else if owner == OwnerId::COMMON_STATIC_LOG {
            // Static groups use both the common and the bonus pools.
            self.global.hard_limit(OwnerId::COMMON_STATIC_LOG)
                + self.global.hard_limit(OwnerId::SYSTEM)
        } else {
            self.global.hard_limit(owner)
        }
    }

    pub fn owner_used(&self, owner: OwnerId) -> i64 {
        if owner.is_user() {
            self.owner.used(owner)
        } else {
            self.global.used(owner)
        }
    }

    /// Free chunks for one owner.
    ///
    /// For user owners this reports the shared pool's free figure, not
    /// the per-owner record's: the per-owner limit is advisory, and
    /// downstream group balancers depend on seeing the shared wall.
    pub fn owner_free(&self, owner: OwnerId) -> i64 {
        if owner.is_user() {
            self.shared.free()
        } else if owner == OwnerId::COMMON_STATIC_LOG {
            self.global.free(OwnerId::COMMON_STATIC_LOG) + self.global.free(OwnerId::SYSTEM)
        } else {
            self.global.free(owner)
        }
    }

    /// Total user-pool usage, for monitoring.
    pub fn total_used(&self) -> i64 {
        self.shared.used()
    }

    /// Total user-pool capacity, for monitoring.
    pub fn total_hard_limit(&self) -> i64 {
        self.shared.hard_limit()
    }

    pub fn space_color(&self, owner: OwnerId) -> SpaceColor {
        self.estimate_space_color(owner, 0)
    }

    pub fn space_status_flags(&self, owner: OwnerId) -> StatusFlags {
        self.space_color(owner).status_flags()
    }

    /// Estimates the colour `owner` would see after allocating
    /// `allocation_size` more chunks. Safe to call from any thread.
    ///
    /// User owners combine two signals: the per-owner colour capped at
    /// the configured border, then the shared pool's colour, taking the
    /// more severe. The two layers keep separate threshold presets; do
    /// not merge them.
    pub fn estimate_space_color(&self, owner: OwnerId, allocation_size: i64) -> SpaceColor {
        if owner.is_user() {
            let capped = self
                .color_border
                .min(self.owner.estimate_color(owner, allocation_size));
            capped.max(self.shared.estimate_color(allocation_size))
        } else {
            let owner = if owner == OwnerId::COMMON_STATIC_LOG
                && self.global.hard_limit(OwnerId::COMMON_STATIC_LOG) == 0
            {
                // No static group bonus; answer for the common pool.
                OwnerId::SYSTEM
            } else {
                owner
            };
            self.global.estimate_color(owner, allocation_size)
        }
    }

    /// Allocates `count` chunks for `owner`.
    ///
    /// User allocations force-increment the per-owner record and then
    /// take the shared pool, which is the hard wall. Static-log
    /// allocations try the common pool first and spill into the bonus
    /// pool.
    pub fn try_allocate(&self, owner: OwnerId, count: i64) -> Result<(), QuotaError> {
        if owner.is_user() {
            self.owner.force_allocate(owner, count);
            self.shared.try_allocate(count).inspect_err(|_| {
                // Unwind the advisory increment so the two pools stay in sync.
                self.owner.release(owner, count);
            })
        } else if owner == OwnerId::COMMON_STATIC_LOG {
            self.global
                .try_allocate(OwnerId::SYSTEM, count)
                .or_else(|_| self.global.try_allocate(OwnerId::COMMON_STATIC_LOG, count))
        } else {
            self.global.try_allocate(owner, count)
        }
    }

    /// Releases `count` chunks held by `owner`.
    ///
    /// Common-log releases refill the bonus pool first (up to its current
    /// usage) and spill the rest into the common pool.
    pub fn release(&self, owner: OwnerId, count: i64) {
        if owner.is_user() {
            self.owner.release(owner, count);
            self.shared.release(count);
        } else if owner == OwnerId::COMMON_STATIC_LOG || owner == OwnerId::SYSTEM {
            let used_bonus = self.global.used(OwnerId::COMMON_STATIC_LOG);
            let release_bonus = used_bonus.min(count);
            if release_bonus > 0 {
                self.global.release(OwnerId::COMMON_STATIC_LOG, release_bonus);
            }
            let release_common = count - release_bonus;
            if release_common > 0 {
                self.global.release(OwnerId::SYSTEM, release_common);
            }
        } else {
            self.global.release(owner, count);
        }
    }

    /// Structured state dump for monitoring surfaces.
    pub fn snapshot(&self) -> ChunkTrackerSnapshot {
        ChunkTrackerSnapshot::capture(&self.global, &self.owner, &self.shared, self.color_border)
    }
}
