//! Keeper parameters, fixed at reset time.

use std::collections::BTreeMap;

use blobdepot_types::{OwnerId, SpaceColor, VDiskId};
use serde::{Deserialize, Serialize};

/// Per-owner restore data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnerInfo {
    /// The virtual disk bound to this owner.
    pub vdisk_id: VDiskId,
    /// Chunks the owner already holds at reset time.
    pub chunks_owned: i64,
}

/// Pool-building parameters for [`crate::ChunkTracker::reset`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeeperParams {
    /// Size of the whole pool, in chunks.
    pub total_chunks: i64,

    /// Chunks reserved for the system log.
    pub sys_log_size: i64,

    /// Requested common log size; the effective size is floored at
    /// [`crate::ChunkTracker::MIN_COMMON_LOG_SIZE`] after subtracting the
    /// static-group bonus.
    pub common_log_size: i64,

    /// Whether static groups are present; grants the common log bonus pool.
    pub has_static_groups: bool,

    /// Split divisor floor for the user pool.
    pub expected_owner_count: usize,

    /// Cap applied to per-owner colour before combining with the shared
    /// pool's colour.
    pub space_color_border: SpaceColor,

    /// User owners to restore, keyed by owner id. Ordered so that two
    /// resets with the same parameters replay identically.
    pub owners: BTreeMap<OwnerId, OwnerInfo>,
}

impl Default for KeeperParams {
    fn default() -> Self {
        Self {
            total_chunks: 0,
            sys_log_size: 0,
            common_log_size: 0,
            has_static_groups: false,
            expected_owner_count: 0,
            space_color_border: SpaceColor::Green,
            owners: BTreeMap::new(),
        }
    }
}
