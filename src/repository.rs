//! Versioned in-memory storage for the toggle repository.
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, RwLock,
    },
};

use chrono::{DateTime, Utc};

use crate::model::{Repository, Segment, Toggle};

#[derive(Debug)]
struct Snapshot {
    repository: Arc<Repository>,
    updated_at: DateTime<Utc>,
}

/// `DataRepository` provides a Sync storage for the toggle repository that allows concurrent
/// access for readers and a writer.
///
/// Readers get an `Arc` to the current snapshot and keep using it even if a newer one gets stored
/// meanwhile. Updates go through [`DataRepository::refresh`], which only accepts snapshots with a
/// strictly greater version.
#[derive(Debug, Default)]
pub struct DataRepository {
    snapshot: RwLock<Option<Snapshot>>,
    initialized: AtomicBool,
}

impl DataRepository {
    /// Create an empty, uninitialized repository.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a new snapshot, returning whether it was accepted.
    ///
    /// The snapshot is ignored if it lacks toggle or segment maps, or if both the current and the
    /// new snapshot carry a version and the new one is not greater.
    pub fn refresh(&self, repository: Repository) -> bool {
        if !repository.is_well_formed() {
            log::warn!(target: "featureprobe", "ignoring repository without toggles or segments");
            return false;
        }

        // Constructing new value before requesting the lock to minimize lock span.
        let version = repository.version;
        let new_value = Snapshot {
            repository: Arc::new(repository),
            updated_at: Utc::now(),
        };

        {
            let Ok(mut slot) = self.snapshot.write() else {
                return false;
            };
            let current_version = slot
                .as_ref()
                .and_then(|snapshot| snapshot.repository.version);
            if let (Some(current), Some(new)) = (current_version, version) {
                if new <= current {
                    log::trace!(target: "featureprobe", current, new; "ignoring stale repository");
                    return false;
                }
            }
            *slot = Some(new_value);
        }

        self.initialized.store(true, Ordering::Release);
        log::debug!(target: "featureprobe", version:serde = version; "repository updated");
        true
    }

    /// Get the current snapshot.
    pub fn snapshot(&self) -> Option<Arc<Repository>> {
        // self.snapshot.read() should always return Ok(). Err() is possible only if the lock is
        // poisoned (writer panicked while holding the lock), which should never happen. Still,
        // using .ok()? here to not crash the app.
        let snapshot = self.snapshot.read().ok()?;
        snapshot
            .as_ref()
            .map(|snapshot| Arc::clone(&snapshot.repository))
    }

    /// Clone of the toggle with `key` from the current snapshot.
    pub fn get_toggle(&self, key: &str) -> Option<Toggle> {
        self.snapshot()?.toggle(key).cloned()
    }

    /// Clone of all toggles in the current snapshot. Empty before the first refresh.
    pub fn get_all_toggles(&self) -> HashMap<String, Toggle> {
        self.snapshot()
            .and_then(|repository| repository.toggles.clone())
            .unwrap_or_default()
    }

    /// Clone of the segment with `unique_id` from the current snapshot.
    pub fn get_segment(&self, unique_id: &str) -> Option<Segment> {
        self.snapshot()?.segment(unique_id).cloned()
    }

    /// Clone of all segments in the current snapshot. Empty before the first refresh.
    pub fn get_all_segments(&self) -> HashMap<String, Segment> {
        self.snapshot()
            .and_then(|repository| repository.segments.clone())
            .unwrap_or_default()
    }

    /// Debug window end, in epoch milliseconds.
    pub fn debug_until_time(&self) -> Option<i64> {
        self.snapshot()?.debug_until_time
    }

    /// Whether a snapshot has ever been accepted.
    pub fn initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    /// Time the current snapshot was accepted.
    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        let snapshot = self.snapshot.read().ok()?;
        snapshot.as_ref().map(|snapshot| snapshot.updated_at)
    }

    /// Drop the held snapshot. `initialized` stays true.
    pub fn clear(&self) {
        if let Ok(mut slot) = self.snapshot.write() {
            *slot = None;
        }
    }
}
