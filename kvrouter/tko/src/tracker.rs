use crate::counters::TkoCounters;
use crate::registry::Shared;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// Identifies a live destination to its tracker.
///
/// A token is an even, nonzero machine word, unique among live destinations
/// and numerically larger than any failure threshold it is used with. The
/// low bit stays clear so the tracker can tag it with knock-out severity.
/// Deriving the token from the address of the destination's allocation
/// satisfies all three properties; a token may be reused once its
/// destination is gone.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Token(usize);

/// Failure-accrual parameters for a destination's tracker.
// The raw field is exposed so this type can be constructed statically.
#[derive(Copy, Clone, Debug)]
pub struct Params {
    /// The number of accumulated soft failures that knocks a destination
    /// out.
    ///
    /// Must be nonzero. With a threshold of 1, the first soft failure
    /// enters soft TKO.
    pub threshold: usize,
}

#[derive(Clone, Debug, Error)]
#[error("invalid knock-out parameters: {0}")]
pub struct InvalidParams(&'static str);

/// Accrues request failures for a single backend host.
///
/// A tracker is shared by every destination addressing its host. One atomic
/// word encodes the accumulated failure count, the knock-out severity and,
/// while knocked out, the token of the destination responsible for probing
/// the host back to health:
///
/// - `w <= threshold`: `w` soft failures accumulated; the host is healthy.
/// - `w > threshold`, even: soft TKO; `w` is the responsible token.
/// - `w > threshold`, odd: hard TKO; `w` is the responsible token tagged.
///
/// Tokens are even and larger than the threshold, so the ranges cannot
/// collide. Recording a success against a healthy host is a single load;
/// failure paths retry a CAS only under contention. While a host is knocked
/// out, no destination other than the responsible one can change the state.
#[derive(Debug)]
pub struct TkoTracker {
    threshold: usize,
    sum_failures: AtomicUsize,

    /// Failures observed since the last recorded success. Reported for
    /// observability; state transitions never read it.
    consecutive_failures: AtomicUsize,

    /// The `host:port` identity this tracker is registered under, shared
    /// with the registry's map key.
    key: Arc<str>,

    shared: Arc<Shared>,
}

// === impl Token ===

impl Token {
    /// Wraps a raw token value, which must be even and nonzero.
    pub fn new(token: usize) -> Self {
        debug_assert!(token != 0, "tokens must be nonzero");
        debug_assert!(token & 1 == 0, "tokens must leave the low bit clear");
        Self(token)
    }

    /// Derives a token from a destination's shared allocation.
    ///
    /// The allocation's address is stable and unique for as long as the
    /// `Arc` has strong references.
    pub fn from_arc<T>(dst: &Arc<T>) -> Self {
        debug_assert!(
            std::mem::align_of::<T>() >= 2,
            "destination allocations must be at least 2-byte aligned",
        );
        Self::new(Arc::as_ptr(dst) as usize)
    }

    fn value(self) -> usize {
        self.0
    }
}

// === impl Params ===

impl Params {
    pub fn new(threshold: usize) -> Result<Self, InvalidParams> {
        if threshold == 0 {
            return Err(InvalidParams("threshold must be nonzero"));
        }
        Ok(Params { threshold })
    }
}

// === impl TkoTracker ===

impl TkoTracker {
    pub(crate) fn new(params: Params, key: Arc<str>, shared: Arc<Shared>) -> Self {
        debug_assert!(params.threshold != 0, "threshold must be nonzero");
        Self {
            threshold: params.threshold,
            sum_failures: AtomicUsize::new(0),
            consecutive_failures: AtomicUsize::new(0),
            key,
            shared,
        }
    }

    /// The `host:port` identity this tracker is registered under.
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    /// The knock-out gauges shared with this tracker's registry.
    pub fn global_tkos(&self) -> &TkoCounters {
        &self.shared.counters
    }

    /// The number of failures recorded since the last recorded success.
    pub fn consecutive_failures(&self) -> usize {
        self.consecutive_failures.load(Ordering::Relaxed)
    }

    pub fn is_tko(&self) -> bool {
        self.sum_failures.load(Ordering::SeqCst) > self.threshold
    }

    pub fn is_soft_tko(&self) -> bool {
        let sum = self.sum_failures.load(Ordering::SeqCst);
        sum > self.threshold && sum & 1 == 0
    }

    pub fn is_hard_tko(&self) -> bool {
        let sum = self.sum_failures.load(Ordering::SeqCst);
        sum > self.threshold && sum & 1 == 1
    }

    /// Whether `token`'s destination owns this tracker's knock-out state.
    pub fn is_responsible(&self, token: Token) -> bool {
        (self.sum_failures.load(Ordering::SeqCst) & !1) == token.value()
    }

    /// Records one soft failure against the host.
    ///
    /// Returns true iff this call knocked the host out, making `token`'s
    /// destination responsible for probing it back to health.
    pub fn record_soft_failure(&self, token: Token) -> bool {
        self.check_token(token);
        self.consecutive_failures.fetch_add(1, Ordering::Relaxed);

        // A knocked-out host already has an owner; leave it alone.
        if self.is_tko() {
            return false;
        }

        let token = token.value();
        let mut sum = self.sum_failures.load(Ordering::SeqCst);
        let mut value = 0;
        loop {
            if sum == self.threshold - 1 {
                // One failure below the limit: this CAS attempt enters soft
                // TKO. The gauge moves before responsibility is actually
                // won, so racing callers may briefly over-count; iterations
                // that lose the race compensate below.
                if value != token {
                    self.shared.counters.soft_tkos.incr();
                }
                value = token;
            } else {
                if value == token {
                    // The previous iteration tried to knock the host out;
                    // undo its increment.
                    self.shared.counters.soft_tkos.decr();
                }
                // Someone else took responsibility.
                if sum > self.threshold {
                    return false;
                }
                value = sum + 1;
            }
            match self.sum_failures.compare_exchange_weak(
                sum,
                value,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => break,
                Err(observed) => sum = observed,
            }
        }

        if value == token {
            debug!(key = %self.key, "Destination knocked out");
            return true;
        }
        false
    }

    /// Records one hard failure, knocking the host out regardless of the
    /// accumulated failure count.
    ///
    /// Returns true iff this call acquired responsibility for the host. A
    /// responsible destination escalating its own soft TKO keeps its
    /// responsibility and gets `false`.
    pub fn record_hard_failure(&self, token: Token) -> bool {
        self.check_token(token);
        self.consecutive_failures.fetch_add(1, Ordering::Relaxed);

        if self.is_hard_tko() {
            return false;
        }

        if self.is_responsible(token) {
            // Already responsible for a soft TKO; escalate it in place.
            self.sum_failures.fetch_or(1, Ordering::SeqCst);
            self.shared.counters.soft_tkos.decr();
            self.shared.counters.hard_tkos.incr();
            debug!(key = %self.key, "Knock-out escalated to hard");
            return false;
        }

        if self.try_set_sum_failures(token.value() | 1) {
            self.shared.counters.hard_tkos.incr();
            debug!(key = %self.key, "Destination knocked out hard");
            return true;
        }
        false
    }

    /// Records a successful reply observed by `token`'s destination.
    ///
    /// Returns true iff this call cleared a knock-out owned by `token`.
    pub fn record_success(&self, token: Token) -> bool {
        self.check_token(token);

        // While responsible, no other destination can change the state, so
        // this path has exclusive write access.
        if self.is_responsible(token) {
            if self.is_soft_tko() {
                self.shared.counters.soft_tkos.decr();
            }
            if self.is_hard_tko() {
                self.shared.counters.hard_tkos.decr();
            }
            self.sum_failures.store(0, Ordering::SeqCst);
            self.consecutive_failures.store(0, Ordering::Relaxed);
            debug!(key = %self.key, "Knock-out cleared");
            return true;
        }

        // Skip the write entirely when the count is already at zero, keeping
        // healthy traffic off the shared cache line. A failure racing past
        // this load is ordered after the success.
        if self.sum_failures.load(Ordering::SeqCst) != 0 && self.try_set_sum_failures(0) {
            self.consecutive_failures.store(0, Ordering::Relaxed);
        }
        false
    }

    /// Releases `token`'s interest in the host ahead of destination
    /// teardown.
    ///
    /// A responsible destination clears its knock-out on the way out so the
    /// host is not left parked with no prober; any other destination is a
    /// no-op. Returns the same value as the [`record_success`] it may
    /// delegate to.
    ///
    /// [`record_success`]: TkoTracker::record_success
    pub fn remove_destination(&self, token: Token) -> bool {
        if self.is_responsible(token) {
            return self.record_success(token);
        }
        false
    }

    /// Installs `value` unless the host is knocked out.
    ///
    /// A knocked-out host is owned by its responsible destination; nobody
    /// else may change the state.
    fn try_set_sum_failures(&self, value: usize) -> bool {
        let mut sum = self.sum_failures.load(Ordering::SeqCst);
        loop {
            if sum > self.threshold {
                return false;
            }
            match self.sum_failures.compare_exchange_weak(
                sum,
                value,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return true,
                Err(observed) => sum = observed,
            }
        }
    }

    fn check_token(&self, token: Token) {
        debug_assert!(
            token.value() > self.threshold,
            "tokens must exceed the failure threshold",
        );
    }
}

impl Drop for TkoTracker {
    fn drop(&mut self) {
        self.shared.release(&self.key);
    }
}
