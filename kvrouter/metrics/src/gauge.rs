use super::fmt::{FmtLabels, FmtMetric};
use super::MAX_PRECISE_UINT64;
use std::fmt::{self, Display};
use std::sync::atomic::{AtomicU64, Ordering};

/// An instantaneous metric value.
#[derive(Debug, Default)]
pub struct Gauge(AtomicU64);

impl Gauge {
    /// Increment the gauge by one.
    pub fn incr(&self) {
        self.0.fetch_add(1, Ordering::Release);
    }

    /// Decrement the gauge by one.
    ///
    /// The gauge must be nonzero: every decrement must be paired with an
    /// earlier increment.
    pub fn decr(&self) {
        let prior = self.0.fetch_sub(1, Ordering::Release);
        debug_assert!(prior != 0, "gauge underflow");
    }

    pub fn value(&self) -> u64 {
        self.0
            .load(Ordering::Acquire)
            .wrapping_rem(MAX_PRECISE_UINT64 + 1)
    }
}

impl From<u64> for Gauge {
    fn from(n: u64) -> Self {
        Gauge(n.into())
    }
}

impl From<Gauge> for u64 {
    fn from(gauge: Gauge) -> u64 {
        gauge.value()
    }
}

impl FmtMetric for Gauge {
    const KIND: &'static str = "gauge";

    fn fmt_metric<N: Display>(&self, f: &mut fmt::Formatter<'_>, name: N) -> fmt::Result {
        writeln!(f, "{} {}", name, self.value())
    }

    fn fmt_metric_labeled<N, L>(
        &self,
        f: &mut fmt::Formatter<'_>,
        name: N,
        labels: L,
    ) -> fmt::Result
    where
        N: Display,
        L: FmtLabels,
    {
        write!(f, "{}{{", name)?;
        labels.fmt_labels(f)?;
        writeln!(f, "}} {}", self.value())
    }
}
