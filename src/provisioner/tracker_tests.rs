// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `tracker.rs`

use super::ProvisioningTracker;
use std::sync::Arc;

#[test]
fn test_add_and_delete() {
    let tracker = ProvisioningTracker::new();
    assert!(!tracker.is_tracked("pvc-1"));

    tracker.add("pvc-1");
    tracker.add("pvc-1");
    assert!(tracker.is_tracked("pvc-1"));
    assert_eq!(tracker.len(), 1);

    tracker.delete("pvc-1");
    assert!(!tracker.is_tracked("pvc-1"));

    // Deleting an untracked id is a no-op
    tracker.delete("pvc-1");
    assert!(tracker.is_empty());
}

#[test]
fn test_guard_untracks_on_drop() {
    let tracker = Arc::new(ProvisioningTracker::new());
    {
        let guard = tracker.track("pvc-1");
        assert_eq!(guard.volume_id(), "pvc-1");
        assert!(tracker.is_tracked("pvc-1"));
    }
    assert!(!tracker.is_tracked("pvc-1"));
}

#[test]
fn test_guard_untracks_on_early_return() {
    fn failing_step(tracker: &Arc<ProvisioningTracker>) -> Result<(), String> {
        let _guard = tracker.track("pvc-2");
        Err("boom".to_string())?;
        Ok(())
    }

    let tracker = Arc::new(ProvisioningTracker::new());
    assert!(failing_step(&tracker).is_err());
    assert!(!tracker.is_tracked("pvc-2"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_tracking() {
    let tracker = Arc::new(ProvisioningTracker::new());

    let handles: Vec<_> = (0..16)
        .map(|i| {
            let tracker = Arc::clone(&tracker);
            tokio::spawn(async move {
                let id = format!("pvc-{i}");
                let _guard = tracker.track(&id);
                tokio::task::yield_now().await;
                assert!(tracker.is_tracked(&id));
            })
        })
        .collect();

    for handle in handles {
        handle.await.unwrap();
    }
    assert!(tracker.is_empty());
}

#[test]
fn test_try_track_refuses_tracked_volume() {
    let tracker = Arc::new(ProvisioningTracker::new());

    let provisioning = tracker.track("pvc-1");
    assert!(tracker.try_track("pvc-1").is_none());
    drop(provisioning);

    let collecting = tracker.try_track("pvc-1").unwrap();
    assert_eq!(collecting.volume_id(), "pvc-1");
    assert!(tracker.try_track("pvc-1").is_none());
    drop(collecting);

    assert!(tracker.is_empty());
}

#[test]
fn test_volume_stays_tracked_until_last_guard_drops() {
    let tracker = Arc::new(ProvisioningTracker::new());

    let collecting = tracker.try_track("pvc-1").unwrap();
    let provisioning = tracker.track("pvc-1");
    assert_eq!(tracker.len(), 1);

    drop(collecting);
    assert!(tracker.is_tracked("pvc-1"));

    drop(provisioning);
    assert!(!tracker.is_tracked("pvc-1"));
}
