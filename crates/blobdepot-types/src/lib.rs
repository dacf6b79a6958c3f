//! # blobdepot-types: Core types for the blobdepot storage fragment
//!
//! This crate contains shared types used across the blobdepot system:
//! - Owner identities and the system/user id partition ([`OwnerId`])
//! - Virtual disk and tablet identities ([`VDiskId`], [`TabletId`])
//! - Blob addressing ([`BlobId`])
//! - Space pressure signalling ([`SpaceColor`], [`StatusFlags`])
//! - Monotonic time ([`Monotonic`])

use std::{
    fmt::Display,
    ops::{Add, AddAssign, Sub},
    time::Duration,
};

use serde::{Deserialize, Serialize};

// ============================================================================
// Owner identity - Copy (1-byte value)
// ============================================================================

/// Number of addressable owners. [`OwnerId`] is one byte wide, and the
/// per-owner quota table is densely allocated to this size so that reads
/// index it without bounds surprises.
pub const OWNER_COUNT: usize = 256;

/// Identity of a chunk-quota owner: either a fixed system role or a user
/// virtual-disk tenant.
///
/// The value space is partitioned: ids below [`OwnerId::BEGIN_USER`] are
/// fixed system roles, everything at or above it is a user owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct OwnerId(u8);

impl OwnerId {
    /// The common log pool.
    pub const SYSTEM: OwnerId = OwnerId(0);

    /// The system log pool.
    pub const SYSTEM_LOG: OwnerId = OwnerId(1);

    /// The system reserve pool.
    pub const SYSTEM_RESERVE: OwnerId = OwnerId(2);

    /// The common log bonus pool granted when static groups are present.
    pub const COMMON_STATIC_LOG: OwnerId = OwnerId(3);

    /// First user owner id. Doubles as the pseudo-owner that holds the
    /// whole user chunk pool in the global tracker.
    pub const BEGIN_USER: OwnerId = OwnerId(4);

    pub fn new(id: u8) -> Self {
        Self(id)
    }

    /// Returns true if this id belongs to the user range, i.e. accounting
    /// for it is routed through the per-owner user pool rather than the
    /// global system pool.
    pub fn is_user(self) -> bool {
        self.0 >= Self::BEGIN_USER.0
    }

    /// Index of this owner in a dense per-owner table.
    pub fn index(self) -> usize {
        usize::from(self.0)
    }
}

impl Display for OwnerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u8> for OwnerId {
    fn from(value: u8) -> Self {
        Self(value)
    }
}

impl From<OwnerId> for u8 {
    fn from(id: OwnerId) -> Self {
        id.0
    }
}

// ============================================================================
// Disk / tablet / client identities - all Copy
// ============================================================================

/// Identifier of a user virtual disk bound to an owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct VDiskId {
    /// Storage group the disk belongs to.
    pub group: u32,
    /// Position of the disk within the group.
    pub index: u32,
}

impl VDiskId {
    pub fn new(group: u32, index: u32) -> Self {
        Self { group, index }
    }
}

impl Display for VDiskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}:{}]", self.group, self.index)
    }
}

/// Identifier of the upstream authoritative blob-storage tablet (the depot).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TabletId(u64);

impl TabletId {
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl Display for TabletId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of the virtual group an agent serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GroupId(u32);

impl GroupId {
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    pub const fn as_u32(self) -> u32 {
        self.0
    }
}

impl Display for GroupId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity of a local client of the agent, used to address replies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ClientId(u64);

impl ClientId {
    pub const fn new(id: u64) -> Self {
        Self(id)
    }
}

impl Display for ClientId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Blob addressing
// ============================================================================

/// Address of a stored blob.
///
/// Blobs are written by tablets; the (generation, step, cookie) triple
/// orders writes within one tablet's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BlobId {
    pub tablet: TabletId,
    pub generation: u32,
    pub step: u32,
    pub cookie: u32,
}

impl BlobId {
    pub fn new(tablet: TabletId, generation: u32, step: u32, cookie: u32) -> Self {
        Self {
            tablet,
            generation,
            step,
            cookie,
        }
    }
}

impl Display for BlobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{}:{}:{}:{}]",
            self.tablet, self.generation, self.step, self.cookie
        )
    }
}

// ============================================================================
// Space colour - coarse pressure signal
// ============================================================================

/// Coarse disk-pressure level used to throttle upstream writers.
///
/// Variants are declared in increasing severity, so `Ord` compares
/// severity: `Green < Cyan < ... < Black`. Combining signals from
/// several pools takes the `max` (more severe wins).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub enum SpaceColor {
    /// No pressure.
    #[default]
    Green,
    /// Earliest, softest warning.
    Cyan,
    Yellow,
    LightOrange,
    Orange,
    Red,
    /// Hardest level: out of space.
    Black,
}

impl SpaceColor {
    /// All colours in increasing severity.
    pub const ALL: [SpaceColor; 7] = [
        SpaceColor::Green,
        SpaceColor::Cyan,
        SpaceColor::Yellow,
        SpaceColor::LightOrange,
        SpaceColor::Orange,
        SpaceColor::Red,
        SpaceColor::Black,
    ];

    /// Converts the colour to the flag form consumed by writers that
    /// test bits rather than compare colours.
    pub fn status_flags(self) -> StatusFlags {
        let mut flags = StatusFlags::VALID;
        for color in Self::ALL {
            if color > SpaceColor::Green && color <= self {
                flags = flags.with(color);
            }
        }
        flags
    }
}

impl Display for SpaceColor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SpaceColor::Green => "Green",
            SpaceColor::Cyan => "Cyan",
            SpaceColor::Yellow => "Yellow",
            SpaceColor::LightOrange => "LightOrange",
            SpaceColor::Orange => "Orange",
            SpaceColor::Red => "Red",
            SpaceColor::Black => "Black",
        };
        f.write_str(name)
    }
}

/// Bitmask form of the space pressure signal.
///
/// **Bit layout**:
/// - bit 0: flags are valid
/// - bits 1..=6: one bit per colour above Green; every severity at or
///   below the current colour is set, so writers can test a single bit
///   for "at least this bad".
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize,
)]
pub struct StatusFlags(u32);

impl StatusFlags {
    pub const VALID: StatusFlags = StatusFlags(1);

    fn bit(color: SpaceColor) -> u32 {
        match color {
            SpaceColor::Green => 0,
            SpaceColor::Cyan => 1 << 1,
            SpaceColor::Yellow => 1 << 2,
            SpaceColor::LightOrange => 1 << 3,
            SpaceColor::Orange => 1 << 4,
            SpaceColor::Red => 1 << 5,
            SpaceColor::Black => 1 << 6,
        }
    }

    fn with(self, color: SpaceColor) -> Self {
        Self(self.0 | Self::bit(color))
    }

    /// Returns true if the pressure is at least at `color`.
    pub fn is_set(self, color: SpaceColor) -> bool {
        self.0 & Self::bit(color) != 0
    }

    pub fn as_u32(self) -> u32 {
        self.0
    }
}

// ============================================================================
// Monotonic time - Copy (8-byte value)
// ============================================================================

/// A point on the process-local monotonic clock.
///
/// Stored as nanoseconds since an arbitrary origin. The agent never reads
/// an ambient clock: callers pass `Monotonic` values in, which keeps every
/// deadline computation deterministic under test.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct Monotonic(u64);

impl Monotonic {
    /// The clock origin.
    pub const ZERO: Monotonic = Monotonic(0);

    pub fn from_nanos(nanos: u64) -> Self {
        Self(nanos)
    }

    pub fn as_nanos(self) -> u64 {
        self.0
    }

    /// Duration elapsed since `earlier`, saturating to zero if `earlier`
    /// is in the future.
    pub fn saturating_since(self, earlier: Monotonic) -> Duration {
        Duration::from_nanos(self.0.saturating_sub(earlier.0))
    }
}

impl Add<Duration> for Monotonic {
    type Output = Monotonic;

    fn add(self, rhs: Duration) -> Monotonic {
        Monotonic(self.0 + rhs.as_nanos() as u64)
    }
}

impl AddAssign<Duration> for Monotonic {
    fn add_assign(&mut self, rhs: Duration) {
        self.0 += rhs.as_nanos() as u64;
    }
}

impl Sub<Monotonic> for Monotonic {
    type Output = Duration;

    fn sub(self, rhs: Monotonic) -> Duration {
        debug_assert!(self.0 >= rhs.0, "monotonic subtraction went backwards");
        Duration::from_nanos(self.0 - rhs.0)
    }
}

impl Display for Monotonic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", Duration::from_nanos(self.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn owner_partition() {
        assert!(!OwnerId::SYSTEM.is_user());
        assert!(!OwnerId::SYSTEM_LOG.is_user());
        assert!(!OwnerId::SYSTEM_RESERVE.is_user());
        assert!(!OwnerId::COMMON_STATIC_LOG.is_user());
        assert!(OwnerId::BEGIN_USER.is_user());
        assert!(OwnerId::new(200).is_user());
        assert!(OwnerId::new(255).is_user());
    }

    #[test]
    fn owner_index_covers_table() {
        assert!(OwnerId::new(255).index() < OWNER_COUNT);
    }

    #[test]
    fn color_severity_order() {
        assert!(SpaceColor::Green < SpaceColor::Cyan);
        assert!(SpaceColor::Cyan < SpaceColor::Yellow);
        assert!(SpaceColor::Yellow < SpaceColor::LightOrange);
        assert!(SpaceColor::LightOrange < SpaceColor::Orange);
        assert!(SpaceColor::Orange < SpaceColor::Red);
        assert!(SpaceColor::Red < SpaceColor::Black);
    }

    #[test]
    fn status_flags_cumulative() {
        let flags = SpaceColor::Orange.status_flags();
        assert!(flags.is_set(SpaceColor::Cyan));
        assert!(flags.is_set(SpaceColor::Yellow));
        assert!(flags.is_set(SpaceColor::LightOrange));
        assert!(flags.is_set(SpaceColor::Orange));
        assert!(!flags.is_set(SpaceColor::Red));
        assert!(!flags.is_set(SpaceColor::Black));
    }

    #[test]
    fn green_status_flags_only_valid() {
        let flags = SpaceColor::Green.status_flags();
        assert_eq!(flags.as_u32(), StatusFlags::VALID.as_u32());
    }

    #[test]
    fn monotonic_arithmetic() {
        let t0 = Monotonic::ZERO;
        let t1 = t0 + Duration::from_secs(10);
        assert_eq!(t1 - t0, Duration::from_secs(10));
        assert_eq!(t0.saturating_since(t1), Duration::ZERO);
    }
}
