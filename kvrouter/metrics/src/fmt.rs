use std::fmt;
use std::marker::PhantomData;

/// Describes a metric statically, by name, help and kind.
pub struct Metric<'a, N: fmt::Display, M> {
    pub name: N,
    pub help: &'a str,
    pub _p: PhantomData<M>,
}

/// Formats a single metric value.
pub trait FmtMetric {
    /// The metric's `TYPE` in help messages.
    const KIND: &'static str;

    /// Writes a metric with the given name, without labels.
    fn fmt_metric<N: fmt::Display>(&self, f: &mut fmt::Formatter<'_>, name: N) -> fmt::Result;

    /// Writes a metric with the given name and labels.
    fn fmt_metric_labeled<N, L>(
        &self,
        f: &mut fmt::Formatter<'_>,
        name: N,
        labels: L,
    ) -> fmt::Result
    where
        N: fmt::Display,
        L: FmtLabels;
}

/// Formats a block of metrics in prometheus text exposition format.
pub trait FmtMetrics {
    fn fmt_metrics(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result;

    fn as_display(&self) -> DisplayMetrics<&'_ Self>
    where
        Self: Sized,
    {
        DisplayMetrics(self)
    }
}

/// Formats a series of key-value pairs as prometheus labels.
pub trait FmtLabels {
    fn fmt_labels(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result;
}

/// Adapts `FmtMetrics` to `fmt::Display`.
#[derive(Clone, Debug)]
pub struct DisplayMetrics<M>(M);

// === impl Metric ===

impl<'a, N: fmt::Display, M: FmtMetric> Metric<'a, N, M> {
    pub fn new(name: N, help: &'a str) -> Self {
        Self {
            name,
            help,
            _p: PhantomData,
        }
    }

    /// Writes the metric's `HELP` and `TYPE` preamble.
    pub fn fmt_help(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "# HELP {} {}", self.name, self.help)?;
        writeln!(f, "# TYPE {} {}", self.name, M::KIND)?;
        Ok(())
    }

    /// Writes a labeled value of this metric for each scope.
    pub fn fmt_scopes<L, S>(
        &self,
        f: &mut fmt::Formatter<'_>,
        scopes: impl IntoIterator<Item = (L, S)>,
        to_metric: impl Fn(&S) -> &M,
    ) -> fmt::Result
    where
        L: FmtLabels,
    {
        for (labels, scope) in scopes {
            to_metric(&scope).fmt_metric_labeled(f, &self.name, &labels)?;
        }
        Ok(())
    }
}

// === impl FmtLabels ===

impl<A: FmtLabels, B: FmtLabels> FmtLabels for (A, B) {
    fn fmt_labels(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (a, b) = self;
        a.fmt_labels(f)?;
        f.pad(",")?;
        b.fmt_labels(f)
    }
}

impl<A: FmtLabels> FmtLabels for &A {
    fn fmt_labels(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        (*self).fmt_labels(f)
    }
}

// === impl DisplayMetrics ===

impl<M: FmtMetrics> fmt::Display for DisplayMetrics<&'_ M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt_metrics(f)
    }
}
