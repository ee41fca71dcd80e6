// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! In-flight volume tracking.
//!
//! Volumes inside a create or delete sequence are recorded here so the
//! garbage collector leaves them alone. Queries take a read lock, so sweeps do
//! not serialize against each other.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// Set of volume identifiers currently being created or deleted.
///
/// Each entry counts the guards holding it, so a volume stays tracked until
/// the last holder lets go.
#[derive(Debug, Default)]
pub struct ProvisioningTracker {
    in_flight: RwLock<HashMap<String, usize>>,
}

impl ProvisioningTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, volume_id: &str) {
        *self
            .in_flight
            .write()
            .entry(volume_id.to_string())
            .or_default() += 1;
    }

    /// Stop tracking `volume_id`. This never touches cluster resources.
    pub fn delete(&self, volume_id: &str) {
        self.in_flight.write().remove(volume_id);
    }

    #[must_use]
    pub fn is_tracked(&self, volume_id: &str) -> bool {
        self.in_flight.read().contains_key(volume_id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.in_flight.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.in_flight.read().is_empty()
    }

    /// Track `volume_id` until the returned guard is dropped.
    #[must_use = "the volume is untracked as soon as the guard is dropped"]
    pub fn track(self: &Arc<Self>, volume_id: &str) -> TrackingGuard {
        self.add(volume_id);
        self.guard(volume_id)
    }

    /// Track `volume_id` only if nobody else does. The check and the insert
    /// happen under one write lock.
    #[must_use = "the volume is untracked as soon as the guard is dropped"]
    pub fn try_track(self: &Arc<Self>, volume_id: &str) -> Option<TrackingGuard> {
        {
            let mut in_flight = self.in_flight.write();
            if in_flight.contains_key(volume_id) {
                return None;
            }
            in_flight.insert(volume_id.to_string(), 1);
        }
        Some(self.guard(volume_id))
    }

    fn guard(self: &Arc<Self>, volume_id: &str) -> TrackingGuard {
        TrackingGuard {
            tracker: Arc::clone(self),
            volume_id: volume_id.to_string(),
        }
    }

    fn release(&self, volume_id: &str) {
        let mut in_flight = self.in_flight.write();
        if let Some(holders) = in_flight.get_mut(volume_id) {
            *holders -= 1;
            if *holders == 0 {
                in_flight.remove(volume_id);
            }
        }
    }
}

/// Releases its hold on the volume on drop, on every exit path.
#[derive(Debug)]
pub struct TrackingGuard {
    tracker: Arc<ProvisioningTracker>,
    volume_id: String,
}

impl TrackingGuard {
    #[must_use]
    pub fn volume_id(&self) -> &str {
        &self.volume_id
    }
}

impl Drop for TrackingGuard {
    fn drop(&mut self) {
        self.tracker.release(&self.volume_id);
    }
}

#[cfg(test)]
#[path = "tracker_tests.rs"]
mod tracker_tests;
