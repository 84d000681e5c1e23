#![deny(rust_2018_idioms, clippy::disallowed_methods, clippy::disallowed_types)]
#![forbid(unsafe_code)]

//! Utilities for exposing metrics to Prometheus.

mod fmt;
mod gauge;

pub use self::{
    fmt::{FmtLabels, FmtMetric, FmtMetrics, Metric},
    gauge::Gauge,
};

#[macro_export]
macro_rules! metrics {
    { $( $name:ident : $kind:ty { $help:expr } ),+ } => {
        $(
            #[allow(non_upper_case_globals)]
            const $name: $crate::Metric<'static, &str, $kind> =
                $crate::Metric {
                    name: stringify!($name),
                    help: $help,
                    _p: ::std::marker::PhantomData,
                };
        )+
    }
}

/// Largest `u64` that can fit without loss of precision in `f64` (2^53).
///
/// Prometheus models values as f64 (52-bits mantissa), so integer values over
/// 2^53 are not guaranteed to be exposed correctly. Values wrap explicitly at
/// this bound.
const MAX_PRECISE_UINT64: u64 = 0x20_0000_0000_0000;
