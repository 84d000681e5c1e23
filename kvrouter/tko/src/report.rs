use crate::registry::Shared;
use kvrouter_metrics::{metrics, FmtLabels, FmtMetric, FmtMetrics, Gauge};
use std::fmt;
use std::sync::Arc;

metrics! {
    destinations_tko_soft: Gauge { "Number of destinations currently in soft TKO" },
    destinations_tko_hard: Gauge { "Number of destinations currently in hard TKO" },
    destination_consecutive_failures: Gauge { "Failures observed since a destination's last recorded success" }
}

/// Renders a registry's knock-out state in prometheus text format.
///
/// Rendering never fails and never blocks state transitions for longer than
/// the registry walk itself.
#[derive(Clone, Debug)]
pub struct Report {
    shared: Arc<Shared>,
}

struct DstLabels<'a> {
    addr: &'a str,
    tko: bool,
}

// === impl Report ===

impl Report {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        Self { shared }
    }
}

impl FmtMetrics for Report {
    fn fmt_metrics(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        destinations_tko_soft.fmt_help(f)?;
        self.shared.counters.soft_tkos.fmt_metric(f, destinations_tko_soft.name)?;

        destinations_tko_hard.fmt_help(f)?;
        self.shared.counters.hard_tkos.fmt_metric(f, destinations_tko_hard.name)?;

        // Snapshot the suspects before formatting so tracker references are
        // not held across the writes.
        let mut suspects = Vec::new();
        self.shared.for_each(|key, tracker| {
            let failures = tracker.consecutive_failures();
            if failures > 0 {
                suspects.push((key.to_string(), tracker.is_tko(), failures as u64));
            }
        });

        destination_consecutive_failures.fmt_help(f)?;
        destination_consecutive_failures.fmt_scopes(
            f,
            suspects.iter().map(|(addr, tko, failures)| {
                let labels = DstLabels {
                    addr: addr.as_str(),
                    tko: *tko,
                };
                (labels, Gauge::from(*failures))
            }),
            |gauge| gauge,
        )?;

        Ok(())
    }
}

// === impl DstLabels ===

impl FmtLabels for DstLabels<'_> {
    fn fmt_labels(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "addr=\"{}\",tko=\"{}\"", self.addr, self.tko)
    }
}
