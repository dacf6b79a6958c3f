//! # blobdepot-quota: In-memory chunk quota tracking
//!
//! This crate partitions a finite pool of disk chunks across system roles
//! and user owners, tracks allocation and release, and exposes the coarse
//! space-colour signal that higher layers use to throttle writes.
//!
//! ## Architecture
//!
//! - [`QuotaRecord`]: a single-owner accounting cell with colour thresholds
//! - [`PerOwnerQuotaTracker`]: a dense table of records plus an equal-split
//!   redistribution policy over a declared total
//! - [`ChunkTracker`]: two trackers (system roles + user owners) composed
//!   with a shared user-pool record; routes every operation through the
//!   correct pool for the owner's class
//!
//! ## Concurrency
//!
//! All writes happen from one logical execution context. The numeric
//! fields of every record are relaxed atomics so that monitoring threads
//! may read limits, usage and colour estimates without locks; a stale
//! colour reading is acceptable because colour is advisory.

pub mod chunk_tracker;
pub mod color_limits;
pub mod error;
pub mod owner_tracker;
pub mod params;
pub mod quota_record;
pub mod snapshot;

#[cfg(test)]
mod tests;

pub use chunk_tracker::ChunkTracker;
pub use color_limits::ColorLimits;
pub use error::{QuotaError, ResetError};
pub use owner_tracker::PerOwnerQuotaTracker;
pub use params::{KeeperParams, OwnerInfo};
pub use quota_record::QuotaRecord;
pub use snapshot::{ChunkTrackerSnapshot, QuotaRecordSnapshot, TrackerSnapshot};
