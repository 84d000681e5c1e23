use crate::counters::TkoCounters;
use crate::report::Report;
use crate::tracker::{Params, TkoTracker};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tracing::{debug, trace};

/// Shares each host's tracker between the destinations addressing it.
///
/// The registry holds only weak references: a tracker lives exactly as long
/// as some destination retains it, and deregisters itself when the last one
/// lets go. The registry also owns the fleet-wide knock-out gauges shared by
/// all of its trackers, and outlives every tracker it hands out.
#[derive(Clone, Debug, Default)]
pub struct TkoRegistry {
    shared: Arc<Shared>,
}

#[derive(Debug, Default)]
pub(crate) struct Shared {
    pub(crate) counters: TkoCounters,
    trackers: Mutex<HashMap<Arc<str>, Weak<TkoTracker>>>,
}

/// A destination that has failed at least once since its last success.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Suspect {
    /// Whether the destination is currently knocked out.
    pub tko: bool,
    /// Failures observed since the destination's last recorded success.
    pub consecutive_failures: usize,
}

// === impl TkoRegistry ===

impl TkoRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the shared tracker for `key`, registering a new one if no
    /// destination currently holds it.
    ///
    /// `params` only applies when this call creates the tracker; an already
    /// registered tracker keeps the parameters it was created with.
    pub fn tracker(&self, key: &str, params: Params) -> Arc<TkoTracker> {
        let mut trackers = self.shared.trackers.lock();
        if let Some(tracker) = trackers.get(key).and_then(Weak::upgrade) {
            trace!(%key, "Using shared tracker");
            return tracker;
        }

        debug!(%key, "Registering tracker");
        // Reuse the key allocation of a dead entry; the tracker and the map
        // share it.
        let key: Arc<str> = trackers
            .get_key_value(key)
            .map(|(key, _)| key.clone())
            .unwrap_or_else(|| Arc::from(key));
        let tracker = Arc::new(TkoTracker::new(params, key.clone(), self.shared.clone()));
        trackers.insert(key, Arc::downgrade(&tracker));
        tracker
    }

    /// Visits every live tracker while holding the registry lock.
    ///
    /// `f` must not call back into the registry.
    pub fn for_each_tracker(&self, f: impl FnMut(&str, &Arc<TkoTracker>)) {
        self.shared.for_each(f);
    }

    /// Snapshots every destination with failures outstanding.
    pub fn suspect_servers(&self) -> HashMap<String, Suspect> {
        let mut suspects = HashMap::new();
        self.shared.for_each(|key, tracker| {
            let consecutive_failures = tracker.consecutive_failures();
            if consecutive_failures > 0 {
                let suspect = Suspect {
                    tko: tracker.is_tko(),
                    consecutive_failures,
                };
                suspects.insert(key.to_string(), suspect);
            }
        });
        suspects
    }

    /// Counts the destinations with failures outstanding.
    pub fn suspect_server_count(&self) -> usize {
        let mut count = 0;
        self.shared.for_each(|_, tracker| {
            if tracker.consecutive_failures() > 0 {
                count += 1;
            }
        });
        count
    }

    /// The fleet-wide knock-out gauges.
    pub fn global_tkos(&self) -> &TkoCounters {
        &self.shared.counters
    }

    /// A prometheus-formatted view over this registry.
    pub fn report(&self) -> Report {
        Report::new(self.shared.clone())
    }

    #[cfg(test)]
    pub(crate) fn tracker_count(&self) -> usize {
        self.shared.trackers.lock().len()
    }
}

// === impl Shared ===

impl Shared {
    /// Walks the map, invoking `f` on every entry that still resolves.
    ///
    /// Strong references obtained under the lock are accumulated and dropped
    /// only once the lock is released: releasing the last reference to a
    /// tracker runs its `Drop`, which takes the lock to deregister itself.
    pub(crate) fn for_each(&self, mut f: impl FnMut(&str, &Arc<TkoTracker>)) {
        let mut live = Vec::new();
        {
            let trackers = self.trackers.lock();
            live.reserve(trackers.len());
            for (key, weak) in trackers.iter() {
                if let Some(tracker) = weak.upgrade() {
                    f(key, &tracker);
                    live.push(tracker);
                }
            }
        }
        drop(live);
    }

    /// Drops `key`'s registration if its tracker is gone.
    ///
    /// A lookup racing with the final release may already have installed a
    /// replacement tracker under the same key; a live entry is left alone.
    /// Missing keys are ignored.
    pub(crate) fn release(&self, key: &str) {
        let mut trackers = self.trackers.lock();
        if let Some(weak) = trackers.get(key) {
            if weak.strong_count() == 0 {
                trace!(%key, "Deregistering tracker");
                trackers.remove(key);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracker::Token;

    fn params() -> Params {
        Params { threshold: 4 }
    }

    #[test]
    fn same_key_shares_one_tracker() {
        let registry = TkoRegistry::new();
        let first = registry.tracker("10.0.0.1:11211", params());
        let second = registry.tracker("10.0.0.1:11211", params());
        let other = registry.tracker("10.0.0.2:11211", params());

        assert!(Arc::ptr_eq(&first, &second));
        assert!(!Arc::ptr_eq(&first, &other));
        assert_eq!(registry.tracker_count(), 2);
    }

    #[test]
    fn last_drop_deregisters() {
        let registry = TkoRegistry::new();
        let first = registry.tracker("10.0.0.1:11211", params());
        let second = registry.tracker("10.0.0.1:11211", params());

        drop(first);
        assert_eq!(registry.tracker_count(), 1);
        drop(second);
        assert_eq!(registry.tracker_count(), 0);
    }

    #[test]
    fn dropped_tracker_state_is_forgotten() {
        let registry = TkoRegistry::new();
        let tracker = registry.tracker("10.0.0.1:11211", params());
        assert!(tracker.record_hard_failure(Token::new(0x1000)));
        assert_eq!(registry.global_tkos().hard_tkos(), 1);

        // Destinations release a tracker only after removing themselves, so
        // the knock-out is cleared before the reference goes away.
        assert!(tracker.remove_destination(Token::new(0x1000)));
        drop(tracker);

        let tracker = registry.tracker("10.0.0.1:11211", params());
        assert!(!tracker.is_tko());
        assert_eq!(tracker.consecutive_failures(), 0);
        assert_eq!(registry.global_tkos().hard_tkos(), 0);
    }

    #[test]
    fn dead_entry_is_replaced() {
        let registry = TkoRegistry::new();
        registry
            .shared
            .trackers
            .lock()
            .insert(Arc::from("10.0.0.1:11211"), Weak::new());

        let tracker = registry.tracker("10.0.0.1:11211", params());
        assert_eq!(tracker.key(), "10.0.0.1:11211");
        assert_eq!(registry.tracker_count(), 1);
        drop(tracker);
        assert_eq!(registry.tracker_count(), 0);
    }

    #[test]
    fn iteration_outlives_released_destinations() {
        let registry = TkoRegistry::new();
        let tracker = registry.tracker("10.0.0.1:11211", params());

        // The only external reference goes away mid-iteration; the buffered
        // reference must keep the tracker alive until the lock is released.
        let slot = std::cell::RefCell::new(Some(tracker));
        let mut seen = 0;
        registry.for_each_tracker(|key, _| {
            assert_eq!(key, "10.0.0.1:11211");
            slot.borrow_mut().take();
            seen += 1;
        });

        assert_eq!(seen, 1);
        assert_eq!(registry.tracker_count(), 0);
    }

    #[test]
    fn suspect_servers_reports_failing_destinations() {
        let registry = TkoRegistry::new();
        let healthy = registry.tracker("10.0.0.1:11211", params());
        let failing = registry.tracker("10.0.0.2:11211", params());
        let knocked_out = registry.tracker("10.0.0.3:11211", params());

        let token = Token::new(0x1000);
        failing.record_soft_failure(token);
        failing.record_soft_failure(token);
        for _ in 0..4 {
            knocked_out.record_soft_failure(token);
        }

        assert_eq!(registry.suspect_server_count(), 2);
        let suspects = registry.suspect_servers();
        assert!(!suspects.contains_key(healthy.key()));
        assert_eq!(
            suspects.get("10.0.0.2:11211"),
            Some(&Suspect {
                tko: false,
                consecutive_failures: 2,
            }),
        );
        assert_eq!(
            suspects.get("10.0.0.3:11211"),
            Some(&Suspect {
                tko: true,
                consecutive_failures: 4,
            }),
        );
    }
}
