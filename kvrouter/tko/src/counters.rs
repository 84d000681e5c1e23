use kvrouter_metrics::Gauge;

/// Fleet-wide counts of knocked-out destinations.
///
/// One instance is shared by every tracker of a registry. Only trackers
/// mutate the gauges, pairing each increment with exactly one decrement, so
/// each gauge reads as the number of hosts currently at that severity.
#[derive(Debug, Default)]
pub struct TkoCounters {
    pub(crate) soft_tkos: Gauge,
    pub(crate) hard_tkos: Gauge,
}

impl TkoCounters {
    /// The number of destinations currently in soft TKO.
    pub fn soft_tkos(&self) -> u64 {
        self.soft_tkos.value()
    }

    /// The number of destinations currently in hard TKO.
    pub fn hard_tkos(&self) -> u64 {
        self.hard_tkos.value()
    }
}
