//! Depot-facing commands and responses.
//!
//! The depot is a message-passing peer: the agent emits
//! [`DepotCommand`]s in its step output and receives [`DepotResponse`]s
//! as input events. Every command carries the issuing query's id so the
//! response can be routed back through the registry.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use blobdepot_types::{BlobId, StatusFlags, TabletId};

use crate::event::{BlobDiff, ReplyStatus};

/// A command issued to the depot on behalf of one query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DepotCommand {
    /// Ask whether writes for `tablet` are fenced.
    CheckBlock { query_id: u64, tablet: TabletId },

    /// Lease a write sequence token.
    AllocateId { query_id: u64 },

    /// Read a blob slice.
    ResolveBlob {
        query_id: u64,
        blob: BlobId,
        shift: u32,
        size: u32,
    },

    /// Write a blob under a previously leased sequence token.
    WriteBlob {
        query_id: u64,
        blob: BlobId,
        data: Bytes,
        sequence: u64,
    },

    /// Fence a tablet generation.
    BlockTablet {
        query_id: u64,
        tablet: TabletId,
        generation: u32,
    },

    /// Find the tablet's most recent blob.
    Discover {
        query_id: u64,
        tablet: TabletId,
        read_body: bool,
    },

    /// List blobs in an id interval.
    ListRange {
        query_id: u64,
        tablet: TabletId,
        from: BlobId,
        to: BlobId,
    },

    /// Advance the collection barrier.
    CollectGarbage {
        query_id: u64,
        tablet: TabletId,
        record_generation: u32,
        collect_generation: u32,
        collect_step: u32,
    },

    /// Query space pressure.
    QueryStatus { query_id: u64 },

    /// Write a blob as a diff over an existing one.
    PatchBlob {
        query_id: u64,
        original: BlobId,
        patched: BlobId,
        diffs: Vec<BlobDiff>,
    },
}

impl DepotCommand {
    pub fn query_id(&self) -> u64 {
        match self {
            DepotCommand::CheckBlock { query_id, .. }
            | DepotCommand::AllocateId { query_id }
            | DepotCommand::ResolveBlob { query_id, .. }
            | DepotCommand::WriteBlob { query_id, .. }
            | DepotCommand::BlockTablet { query_id, .. }
            | DepotCommand::Discover { query_id, .. }
            | DepotCommand::ListRange { query_id, .. }
            | DepotCommand::CollectGarbage { query_id, .. }
            | DepotCommand::QueryStatus { query_id }
            | DepotCommand::PatchBlob { query_id, .. } => *query_id,
        }
    }
}

/// Successful depot answer payloads, paired with the command kinds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DepotPayload {
    /// Answer to `CheckBlock`: the fenced generation, if any.
    BlockChecked { blocked_generation: Option<u32> },

    /// Answer to `AllocateId`.
    IdAllocated { sequence: u64 },

    /// Answer to `ResolveBlob`; `None` means the blob does not exist.
    Blob { data: Option<Bytes> },

    /// Answer to `WriteBlob`.
    Written,

    /// Answer to `BlockTablet`.
    Blocked,

    /// Answer to `Discover`.
    Discovered {
        last_blob: Option<BlobId>,
        data: Option<Bytes>,
    },

    /// Answer to `ListRange`.
    Range { blobs: Vec<(BlobId, Bytes)> },

    /// Answer to `CollectGarbage`.
    Collected,

    /// Answer to `QueryStatus`.
    Status { flags: StatusFlags },

    /// Answer to `PatchBlob`.
    Patched,
}

/// A depot-side failure, propagated opaquely to the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepotError {
    pub status: ReplyStatus,
    pub reason: String,
}

/// One answer to one previously issued command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DepotResponse {
    pub query_id: u64,
    pub result: Result<DepotPayload, DepotError>,
}
