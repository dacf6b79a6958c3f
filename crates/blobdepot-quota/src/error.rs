//! Quota error types.

use thiserror::Error;

/// Allocation refusal. Not a fault: the caller is expected to surface the
/// reason string to the requester and carry on.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum QuotaError {
    #[error(
        "out of space: \"{name}\" requested {requested} chunks, free {free} of {hard_limit}"
    )]
    OutOfSpace {
        name: String,
        requested: i64,
        free: i64,
        hard_limit: i64,
    },
}

/// Configuration error raised while rebuilding the pool at reset time.
///
/// A failed reset leaves the tracker in its prior state; every variant
/// carries the figures needed to diagnose the configuration.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ResetError {
    #[error("error adding system log quota, size {size}, total chunks {total_chunks}")]
    SysLogQuota { size: i64, total_chunks: i64 },

    #[error("error adding system reserve quota, size {size}, total chunks {total_chunks}")]
    SysReserveQuota { size: i64, total_chunks: i64 },

    #[error("error adding static log bonus quota, size {size}, total chunks {total_chunks}")]
    StaticLogQuota { size: i64, total_chunks: i64 },

    #[error("error adding common log quota, size {size}, total chunks {total_chunks}")]
    CommonLogQuota { size: i64, total_chunks: i64 },

    #[error(
        "error adding user chunk pool, chunks owned {chunks_owned}, \
         unappropriated {unappropriated}, total chunks {total_chunks}"
    )]
    UserPoolExceeded {
        chunks_owned: i64,
        unappropriated: i64,
        total_chunks: i64,
    },
}
