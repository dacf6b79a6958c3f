//! Structured monitoring snapshots.
//!
//! Higher layers render these however they like (JSON endpoint, console
//! table); the tracker itself never formats markup.

use blobdepot_types::{OwnerId, SpaceColor, VDiskId};
use serde::Serialize;

use crate::color_limits::ColorLimits;
use crate::owner_tracker::PerOwnerQuotaTracker;
use crate::quota_record::QuotaRecord;

/// Point-in-time copy of one quota record.
#[derive(Debug, Clone, Serialize)]
pub struct QuotaRecordSnapshot {
    pub name: String,
    pub owner: Option<OwnerId>,
    pub vdisk_id: Option<VDiskId>,
    pub hard_limit: i64,
    pub free: i64,
    pub used: i64,
    pub color: SpaceColor,
    pub limits: ColorLimits,
}

impl QuotaRecordSnapshot {
    fn capture(owner: Option<OwnerId>, record: &QuotaRecord) -> Self {
        Self {
            name: record.name().to_owned(),
            owner,
            vdisk_id: record.vdisk_id(),
            hard_limit: record.hard_limit(),
            free: record.free(),
            used: record.used(),
            color: record.estimate_color(0),
            limits: record.limits(),
        }
    }
}

/// Point-in-time copy of one per-owner tracker: active records only.
#[derive(Debug, Clone, Serialize)]
pub struct TrackerSnapshot {
    pub limits: ColorLimits,
    pub total: i64,
    pub expected_owner_count: usize,
    pub records: Vec<QuotaRecordSnapshot>,
}

impl TrackerSnapshot {
    fn capture(tracker: &PerOwnerQuotaTracker) -> Self {
        Self {
            limits: tracker.limits(),
            total: tracker.total(),
            expected_owner_count: tracker.expected_owner_count(),
            records: tracker
                .active_owners()
                .iter()
                .map(|&id| QuotaRecordSnapshot::capture(Some(id), tracker.record(id)))
                .collect(),
        }
    }
}

/// Full chunk-tracker state dump.
#[derive(Debug, Clone, Serialize)]
pub struct ChunkTrackerSnapshot {
    pub global: TrackerSnapshot,
    pub owner: TrackerSnapshot,
    pub shared: QuotaRecordSnapshot,
    pub color_border: SpaceColor,
}

impl ChunkTrackerSnapshot {
    pub(crate) fn capture(
        global: &PerOwnerQuotaTracker,
        owner: &PerOwnerQuotaTracker,
        shared: &QuotaRecord,
        color_border: SpaceColor,
    ) -> Self {
        Self {
            global: TrackerSnapshot::capture(global),
            owner: TrackerSnapshot::capture(owner),
            shared: QuotaRecordSnapshot::capture(None, shared),
            color_border,
        }
    }
}
