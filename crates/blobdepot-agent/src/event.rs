//! Client-facing events and replies.
//!
//! This module defines the closed enumeration of requests a client may
//! send to the agent, and the paired reply for each request kind:
//!
//! - [`GetRequest`] / [`GetResult`] - read one blob (or a slice of it)
//! - [`PutRequest`] / [`PutResult`] - write one blob
//! - [`BlockRequest`] / [`BlockResult`] - fence a tablet generation
//! - [`DiscoverRequest`] / [`DiscoverResult`] - find a tablet's latest blob
//! - [`RangeRequest`] / [`RangeResult`] - read a blob id interval
//! - [`CollectGarbageRequest`] / [`CollectGarbageResult`] - advance the
//!   collection barrier
//! - [`StatusRequest`] / [`StatusResult`] - query space pressure flags
//! - [`PatchRequest`] / [`PatchResult`] - write a blob as a diff of another
//! - [`AssimilateRequest`] / [`AssimilateResult`] - bulk handoff, always
//!   forwarded to the proxy
//!
//! Every request computes a byte estimate for pending-queue admission
//! and can manufacture the error form of its paired reply.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use blobdepot_types::{BlobId, ClientId, GroupId, StatusFlags, TabletId};

// ============================================================================
// Envelopes
// ============================================================================

/// A client event with its routing identity.
///
/// The sender/cookie pair must survive any internal handoff unchanged:
/// forwarded events keep the original identity end-to-end.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub sender: ClientId,
    pub cookie: u64,
    pub request: ClientRequest,
}

/// A reply addressed back to the requester, echoing its cookie.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplyEnvelope {
    pub to: ClientId,
    pub cookie: u64,
    pub reply: Reply,
}

/// Transport status of a reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReplyStatus {
    Ok,
    Error,
    Deadline,
}

// ============================================================================
// Requests
// ============================================================================

/// Read one blob, optionally a slice of it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetRequest {
    pub blob: BlobId,
    pub shift: u32,
    pub size: u32,
    /// Bypass the agent and read through the pass-through proxy.
    pub decommission: bool,
}

/// Write one blob.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PutRequest {
    pub blob: BlobId,
    pub data: Bytes,
}

/// Fence every write from `tablet` generations up to `generation`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockRequest {
    pub tablet: TabletId,
    pub generation: u32,
}

/// Find the most recent blob a tablet wrote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoverRequest {
    pub tablet: TabletId,
    pub read_body: bool,
}

/// Read every blob in an id interval.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RangeRequest {
    pub tablet: TabletId,
    pub from: BlobId,
    pub to: BlobId,
    /// Bypass the agent and read through the pass-through proxy.
    pub decommission: bool,
}

/// Advance the garbage collection barrier for a tablet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectGarbageRequest {
    pub tablet: TabletId,
    pub record_generation: u32,
    pub collect_generation: u32,
    pub collect_step: u32,
}

/// Query the group's space pressure flags.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusRequest {
    pub tablet: TabletId,
}

/// Write a blob expressed as byte diffs over an existing one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatchRequest {
    pub original: BlobId,
    pub patched: BlobId,
    pub diffs: Vec<BlobDiff>,
}

/// One contiguous byte replacement within a patch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlobDiff {
    pub offset: u32,
    pub data: Bytes,
}

/// Bulk data handoff during decommission; the agent never interprets it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssimilateRequest {
    pub tablet: TabletId,
}

/// The closed enumeration of requests the agent accepts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ClientRequest {
    Get(GetRequest),
    Put(PutRequest),
    Block(BlockRequest),
    Discover(DiscoverRequest),
    Range(RangeRequest),
    CollectGarbage(CollectGarbageRequest),
    Status(StatusRequest),
    Patch(PatchRequest),
    Assimilate(AssimilateRequest),
}

impl ClientRequest {
    /// Request kind name for diagnostics.
    pub fn name(&self) -> &'static str {
        match self {
            ClientRequest::Get(_) => "Get",
            ClientRequest::Put(_) => "Put",
            ClientRequest::Block(_) => "Block",
            ClientRequest::Discover(_) => "Discover",
            ClientRequest::Range(_) => "Range",
            ClientRequest::CollectGarbage(_) => "CollectGarbage",
            ClientRequest::Status(_) => "Status",
            ClientRequest::Patch(_) => "Patch",
            ClientRequest::Assimilate(_) => "Assimilate",
        }
    }

    /// Byte estimate used for pending-queue admission.
    pub fn calculate_size(&self) -> usize {
        match self {
            ClientRequest::Get(_) => 48,
            ClientRequest::Put(put) => 64 + put.data.len(),
            ClientRequest::Block(_) => 32,
            ClientRequest::Discover(_) => 32,
            ClientRequest::Range(_) => 64,
            ClientRequest::CollectGarbage(_) => 48,
            ClientRequest::Status(_) => 16,
            ClientRequest::Patch(patch) => {
                64 + patch.diffs.iter().map(|diff| diff.data.len()).sum::<usize>()
            }
            ClientRequest::Assimilate(_) => 32,
        }
    }

    /// Whether this request asked to bypass the agent.
    pub fn decommission(&self) -> bool {
        match self {
            ClientRequest::Get(get) => get.decommission,
            ClientRequest::Range(range) => range.decommission,
            _ => false,
        }
    }

    /// Builds the error form of the paired reply type.
    pub fn error_response(
        &self,
        status: ReplyStatus,
        reason: impl Into<String>,
        group: GroupId,
    ) -> Reply {
        let reason = Some(reason.into());
        match self {
            ClientRequest::Get(_) => Reply::Get(GetResult {
                status,
                reason,
                group,
                data: None,
            }),
            ClientRequest::Put(put) => Reply::Put(PutResult {
                status,
                reason,
                group,
                blob: put.blob,
            }),
            ClientRequest::Block(_) => Reply::Block(BlockResult {
                status,
                reason,
                group,
            }),
            ClientRequest::Discover(_) => Reply::Discover(DiscoverResult {
                status,
                reason,
                group,
                last_blob: None,
                data: None,
            }),
            ClientRequest::Range(_) => Reply::Range(RangeResult {
                status,
                reason,
                group,
                blobs: Vec::new(),
            }),
            ClientRequest::CollectGarbage(_) => Reply::CollectGarbage(CollectGarbageResult {
                status,
                reason,
                group,
            }),
            ClientRequest::Status(_) => Reply::Status(StatusResult {
                status,
                reason,
                group,
                flags: None,
            }),
            ClientRequest::Patch(patch) => Reply::Patch(PatchResult {
                status,
                reason,
                group,
                blob: patch.patched,
            }),
            ClientRequest::Assimilate(_) => Reply::Assimilate(AssimilateResult {
                status,
                reason,
                group,
            }),
        }
    }
}

// ============================================================================
// Replies
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GetResult {
    pub status: ReplyStatus,
    pub reason: Option<String>,
    pub group: GroupId,
    pub data: Option<Bytes>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PutResult {
    pub status: ReplyStatus,
    pub reason: Option<String>,
    pub group: GroupId,
    pub blob: BlobId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockResult {
    pub status: ReplyStatus,
    pub reason: Option<String>,
    pub group: GroupId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoverResult {
    pub status: ReplyStatus,
    pub reason: Option<String>,
    pub group: GroupId,
    pub last_blob: Option<BlobId>,
    pub data: Option<Bytes>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RangeResult {
    pub status: ReplyStatus,
    pub reason: Option<String>,
    pub group: GroupId,
    pub blobs: Vec<(BlobId, Bytes)>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectGarbageResult {
    pub status: ReplyStatus,
    pub reason: Option<String>,
    pub group: GroupId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusResult {
    pub status: ReplyStatus,
    pub reason: Option<String>,
    pub group: GroupId,
    pub flags: Option<StatusFlags>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatchResult {
    pub status: ReplyStatus,
    pub reason: Option<String>,
    pub group: GroupId,
    pub blob: BlobId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssimilateResult {
    pub status: ReplyStatus,
    pub reason: Option<String>,
    pub group: GroupId,
}

/// One reply per request, paired by kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Reply {
    Get(GetResult),
    Put(PutResult),
    Block(BlockResult),
    Discover(DiscoverResult),
    Range(RangeResult),
    CollectGarbage(CollectGarbageResult),
    Status(StatusResult),
    Patch(PatchResult),
    Assimilate(AssimilateResult),
}

impl Reply {
    pub fn status(&self) -> ReplyStatus {
        match self {
            Reply::Get(reply) => reply.status,
            Reply::Put(reply) => reply.status,
            Reply::Block(reply) => reply.status,
            Reply::Discover(reply) => reply.status,
            Reply::Range(reply) => reply.status,
            Reply::CollectGarbage(reply) => reply.status,
            Reply::Status(reply) => reply.status,
            Reply::Patch(reply) => reply.status,
            Reply::Assimilate(reply) => reply.status,
        }
    }

    pub fn reason(&self) -> Option<&str> {
        let reason = match self {
            Reply::Get(reply) => &reply.reason,
            Reply::Put(reply) => &reply.reason,
            Reply::Block(reply) => &reply.reason,
            Reply::Discover(reply) => &reply.reason,
            Reply::Range(reply) => &reply.reason,
            Reply::CollectGarbage(reply) => &reply.reason,
            Reply::Status(reply) => &reply.reason,
            Reply::Patch(reply) => &reply.reason,
            Reply::Assimilate(reply) => &reply.reason,
        };
        reason.as_deref()
    }
}
