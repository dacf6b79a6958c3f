//! Unit tests for blobdepot-quota.
//!
//! The trackers are pure in-memory state, so every path is exercised
//! without mocks.

use std::collections::BTreeMap;

use blobdepot_types::{OwnerId, SpaceColor, VDiskId};
use proptest::prelude::*;

use crate::chunk_tracker::ChunkTracker;
use crate::color_limits::ColorLimits;
use crate::error::ResetError;
use crate::params::{KeeperParams, OwnerInfo};

// ============================================================================
// Test Helpers
// ============================================================================

fn user(offset: u8) -> OwnerId {
    OwnerId::new(u8::from(OwnerId::BEGIN_USER) + offset)
}

fn vdisk(index: u32) -> VDiskId {
    VDiskId::new(7, index)
}

fn owners(chunks: &[i64]) -> BTreeMap<OwnerId, OwnerInfo> {
    chunks
        .iter()
        .enumerate()
        .map(|(i, &chunks_owned)| {
            (
                user(i as u8),
                OwnerInfo {
                    vdisk_id: vdisk(i as u32),
                    chunks_owned,
                },
            )
        })
        .collect()
}

/// The reference configuration: 1000 chunks, 50 syslog, 200 common log,
/// no static groups, 4 expected owners, three users owning [100, 50, 0].
fn reference_params() -> KeeperParams {
    KeeperParams {
        total_chunks: 1000,
        sys_log_size: 50,
        common_log_size: 200,
        has_static_groups: false,
        expected_owner_count: 4,
        space_color_border: SpaceColor::Green,
        owners: owners(&[100, 50, 0]),
    }
}

fn reset_tracker(params: KeeperParams) -> ChunkTracker {
    let mut tracker = ChunkTracker::new();
    tracker.reset(params).expect("reset should succeed");
    tracker
}

fn sum_user_used(tracker: &ChunkTracker, count: u8) -> i64 {
    (0..count).map(|i| tracker.owner_used(user(i))).sum()
}

// ============================================================================
// Reset
// ============================================================================

#[test]
fn reset_builds_user_pool_from_remainder() {
    let tracker = reset_tracker(reference_params());

    // 1000 - 50 (syslog) - 5 (reserve) - 0 (static) - 200 (common log)
    // leaves 745 for the user pool, split four ways.
    assert_eq!(tracker.total_hard_limit(), 745);
    for i in 0..3 {
        assert_eq!(tracker.owner_hard_limit(user(i)), 186);
    }
    assert_eq!(tracker.total_used(), 150);
    assert_eq!(tracker.owner_used(user(0)), 100);
    assert_eq!(tracker.owner_used(user(1)), 50);
    assert_eq!(tracker.owner_used(user(2)), 0);
}

#[test]
fn reset_replays_common_log_usage() {
    let tracker = reset_tracker(reference_params());
    assert_eq!(tracker.owner_used(OwnerId::SYSTEM), 200);
    assert_eq!(tracker.owner_free(OwnerId::SYSTEM), 0);
}

#[test]
fn reset_grants_static_log_bonus() {
    let mut params = reference_params();
    params.has_static_groups = true;
    let tracker = reset_tracker(params);

    assert_eq!(tracker.owner_hard_limit(OwnerId::COMMON_STATIC_LOG), 270);
    // The bonus shrinks the user pool accordingly.
    assert_eq!(tracker.total_hard_limit(), 675);
}

#[test]
fn common_log_size_is_floored() {
    let mut params = reference_params();
    params.common_log_size = 50;
    let tracker = reset_tracker(params);

    assert_eq!(tracker.owner_hard_limit(OwnerId::SYSTEM), 200);
    assert_eq!(tracker.owner_used(OwnerId::SYSTEM), 50);
}

#[test]
fn reset_is_idempotent() {
    let mut tracker = ChunkTracker::new();
    tracker.reset(reference_params()).unwrap();
    let first = serde_json::to_value(tracker.snapshot()).unwrap();
    tracker.reset(reference_params()).unwrap();
    let second = serde_json::to_value(tracker.snapshot()).unwrap();
    assert_eq!(first, second);
}

#[test]
fn oversized_syslog_fails_reset() {
    let mut params = reference_params();
    params.sys_log_size = 2000;
    let mut tracker = ChunkTracker::new();
    let err = tracker.reset(params).unwrap_err();
    assert!(matches!(
        err,
        ResetError::SysLogQuota { size: 2000, total_chunks: 1000 }
    ));
}

#[test]
fn overcommitted_user_chunks_fail_reset() {
    let mut params = reference_params();
    params.owners = owners(&[700, 100, 0]);
    let mut tracker = ChunkTracker::new();
    let err = tracker.reset(params).unwrap_err();
    assert!(matches!(
        err,
        ResetError::UserPoolExceeded { chunks_owned: 800, unappropriated: 745, .. }
    ));
}

#[test]
fn failed_reset_leaves_prior_state() {
    let mut tracker = reset_tracker(reference_params());
    let before = serde_json::to_value(tracker.snapshot()).unwrap();

    let mut bad = reference_params();
    bad.sys_log_size = 2000;
    tracker.reset(bad).unwrap_err();

    let after = serde_json::to_value(tracker.snapshot()).unwrap();
    assert_eq!(before, after);
}

// ============================================================================
// Allocation routing
// ============================================================================

#[test]
fn user_allocation_updates_both_pools() {
    let tracker = reset_tracker(reference_params());

    tracker.try_allocate(user(2), 10).unwrap();
    assert_eq!(tracker.owner_used(user(2)), 10);
    assert_eq!(tracker.total_used(), 160);
    assert_eq!(
        tracker.total_used(),
        sum_user_used(&tracker, 3),
        "shared usage must equal the sum of user usage"
    );
}

#[test]
fn user_release_updates_both_pools() {
    let tracker = reset_tracker(reference_params());

    tracker.release(user(0), 40);
    assert_eq!(tracker.owner_used(user(0)), 60);
    assert_eq!(tracker.total_used(), 110);
    assert_eq!(tracker.total_used(), sum_user_used(&tracker, 3));
}

#[test]
fn shared_pool_is_the_hard_wall_for_users() {
    let tracker = reset_tracker(reference_params());

    // 595 free in the shared pool; the per-owner record (186 limit) is
    // advisory and does not refuse.
    tracker.try_allocate(user(0), 500).unwrap();
    assert_eq!(tracker.owner_used(user(0)), 600);

    let err = tracker.try_allocate(user(1), 200).unwrap_err();
    let reason = err.to_string();
    assert!(reason.contains("out of space"), "unexpected reason: {reason}");

    // The refused allocation must not skew the cross-pool invariant.
    assert_eq!(tracker.total_used(), sum_user_used(&tracker, 3));
}

#[test]
fn user_free_reports_shared_pool() {
    let tracker = reset_tracker(reference_params());
    // Per-owner free would be 86 for user 0; balancers must see the
    // shared wall instead.
    assert_eq!(tracker.owner_free(user(0)), 595);
    assert_eq!(tracker.owner_free(user(2)), 595);
}

#[test]
fn static_log_allocation_spills_into_bonus_pool() {
    let mut params = reference_params();
    params.has_static_groups = true;
    params.common_log_size = 0;
    let tracker = reset_tracker(params);

    // Common pool: 200 chunks, bonus: 70. Fill the common pool, then one
    // more allocation must land in the bonus pool.
    tracker.try_allocate(OwnerId::COMMON_STATIC_LOG, 200).unwrap();
    assert_eq!(tracker.owner_used(OwnerId::SYSTEM), 200);
    assert_eq!(tracker.owner_used(OwnerId::COMMON_STATIC_LOG), 0);

    tracker.try_allocate(OwnerId::COMMON_STATIC_LOG, 50).unwrap();
    assert_eq!(tracker.owner_used(OwnerId::COMMON_STATIC_LOG), 50);

    // Both pools exhausted after 20 more.
    tracker.try_allocate(OwnerId::COMMON_STATIC_LOG, 20).unwrap();
    tracker.try_allocate(OwnerId::COMMON_STATIC_LOG, 1).unwrap_err();
}

#[test]
fn common_log_release_refills_bonus_pool_first() {
    let mut params = reference_params();
    params.has_static_groups = true;
    params.common_log_size = 0;
    let tracker = reset_tracker(params);

    tracker.try_allocate(OwnerId::COMMON_STATIC_LOG, 200).unwrap();
    tracker.try_allocate(OwnerId::COMMON_STATIC_LOG, 50).unwrap();

    // Releasing 60 drains the 50 bonus chunks first, then 10 common.
    tracker.release(OwnerId::SYSTEM, 60);
    assert_eq!(tracker.owner_used(OwnerId::COMMON_STATIC_LOG), 0);
    assert_eq!(tracker.owner_used(OwnerId::SYSTEM), 190);
}

#[test]
fn system_owner_allocation_is_direct() {
    let mut params = reference_params();
    params.common_log_size = 0;
    let tracker = reset_tracker(params);

    tracker.try_allocate(OwnerId::SYSTEM_RESERVE, 5).unwrap();
    assert_eq!(tracker.owner_used(OwnerId::SYSTEM_RESERVE), 5);
    tracker.try_allocate(OwnerId::SYSTEM_RESERVE, 1).unwrap_err();
    tracker.release(OwnerId::SYSTEM_RESERVE, 5);
    assert_eq!(tracker.owner_used(OwnerId::SYSTEM_RESERVE), 0);
}

// ============================================================================
// Colour signalling
// ============================================================================

#[test]
fn severest_signal_wins_after_border_cap() {
    // Border yellow, the user's own record reports cyan, the shared pool
    // reports orange: the severest signal wins after the border cap.
    let params = KeeperParams {
        total_chunks: 1500,
        sys_log_size: 50,
        common_log_size: 200,
        has_static_groups: false,
        expected_owner_count: 2,
        space_color_border: SpaceColor::Yellow,
        owners: owners(&[0, 0]),
    };
    let tracker = reset_tracker(params);
    assert_eq!(tracker.total_hard_limit(), 1245);
    assert_eq!(tracker.owner_hard_limit(user(0)), 622);

    // Owner 0: 122 free in its own record, inside the cyan band. Owner 1
    // overshoots its advisory share (the shared pool is the only wall),
    // pinning the shared record at 23 free, inside the orange band.
    tracker.try_allocate(user(0), 500).unwrap();
    tracker.try_allocate(user(1), 722).unwrap();
    assert_eq!(tracker.owner_free(user(0)), 23);

    assert_eq!(tracker.estimate_space_color(user(0), 0), SpaceColor::Orange);
}

#[test]
fn border_caps_per_owner_signal() {
    // One owner of two expected: the owner record has half the pool, so
    // its own colour howls long before the shared pool worries.
    let params = KeeperParams {
        total_chunks: 1500,
        sys_log_size: 50,
        common_log_size: 200,
        has_static_groups: false,
        expected_owner_count: 2,
        space_color_border: SpaceColor::Cyan,
        owners: owners(&[600]),
    };
    let tracker = reset_tracker(params);

    // Owner record: 622 limit, 600 used -> orange territory. Shared
    // pool: 1245 limit, 600 used -> green. The border caps the
    // per-owner signal at cyan.
    assert_eq!(tracker.estimate_space_color(user(0), 0), SpaceColor::Cyan);
}

#[test]
fn static_log_color_uses_common_pool_without_bonus() {
    let tracker = reset_tracker(reference_params());
    // No static groups: the bonus pool is zero-sized, so the static-log
    // colour is answered by the common pool (fully used -> black).
    assert_eq!(
        tracker.space_color(OwnerId::COMMON_STATIC_LOG),
        SpaceColor::Black
    );

    let mut params = reference_params();
    params.has_static_groups = true;
    params.common_log_size = 0;
    let tracker = reset_tracker(params);
    // Bonus pool present and empty: its own colour answers.
    assert_eq!(
        tracker.space_color(OwnerId::COMMON_STATIC_LOG),
        ColorLimits::log_limits().color_for_free(70)
    );
}

#[test]
fn status_flags_follow_color() {
    let tracker = reset_tracker(reference_params());
    let flags = tracker.space_status_flags(OwnerId::SYSTEM);
    assert!(flags.is_set(SpaceColor::Black));
}

// ============================================================================
// Owner lifecycle after reset
// ============================================================================

#[test]
fn add_and_remove_owner_at_runtime() {
    let mut tracker = reset_tracker(reference_params());

    tracker.add_owner(user(3), vdisk(3));
    assert_eq!(tracker.owner_hard_limit(user(3)), 186);

    tracker.try_allocate(user(3), 20).unwrap();
    tracker.release(user(3), 20);
    tracker.remove_owner(user(3));
    assert_eq!(tracker.owner_hard_limit(user(3)), 0);
}

#[test]
#[should_panic(expected = "is not a user id")]
fn adding_system_id_as_user_panics() {
    let mut tracker = reset_tracker(reference_params());
    tracker.add_owner(OwnerId::SYSTEM, vdisk(0));
}

// ============================================================================
// Property tests
// ============================================================================

proptest! {
    /// Colour severity never decreases as the projected allocation grows.
    #[test]
    fn estimate_color_is_monotonic(
        hard_limit in 0i64..10_000,
        used in 0i64..10_000,
        alloc_a in 0i64..10_000,
        alloc_b in 0i64..10_000,
    ) {
        prop_assume!(used <= hard_limit);
        let record = crate::quota_record::QuotaRecord::new("prop");
        record.force_hard_limit(hard_limit, &ColorLimits::chunk_limits());
        record.force_allocate(used);

        let (small, large) = if alloc_a <= alloc_b { (alloc_a, alloc_b) } else { (alloc_b, alloc_a) };
        prop_assert!(record.estimate_color(small) <= record.estimate_color(large));
    }

    /// Random allocate/release sequences keep every record inside
    /// `0 <= used <= hard_limit` and keep the shared pool equal to the
    /// sum of user usage.
    #[test]
    fn accounting_invariants_hold(ops in prop::collection::vec((0u8..3, 0u8..3, 1i64..100), 0..64)) {
        let params = KeeperParams {
            total_chunks: 2000,
            sys_log_size: 50,
            common_log_size: 200,
            has_static_groups: false,
            expected_owner_count: 3,
            space_color_border: SpaceColor::Green,
            owners: owners(&[0, 0, 0]),
        };
        let tracker = reset_tracker(params);

        for (kind, owner_offset, count) in ops {
            let id = user(owner_offset);
            match kind {
                0 => {
                    let _ = tracker.try_allocate(id, count);
                }
                1 => {
                    let releasable = tracker.owner_used(id).min(count);
                    if releasable > 0 {
                        tracker.release(id, releasable);
                    }
                }
                _ => {
                    // Point reads must never disturb state.
                    let _ = tracker.estimate_space_color(id, count);
                    let _ = tracker.owner_free(id);
                }
            }

            prop_assert!(tracker.total_used() >= 0);
            prop_assert!(tracker.total_used() <= tracker.total_hard_limit());
            prop_assert_eq!(tracker.total_used(), sum_user_used(&tracker, 3));
        }
    }
}
