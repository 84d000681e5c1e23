#![deny(rust_2018_idioms, clippy::disallowed_methods, clippy::disallowed_types)]
#![forbid(unsafe_code)]

//! Failure accrual for router destinations.
//!
//! Every backend host the router talks to is watched by a [`TkoTracker`]:
//! destinations report request outcomes to it, and the tracker decides when
//! the host is knocked out ("TKO") and which single destination becomes
//! responsible for probing it back to health. Destinations addressing the
//! same host share one tracker through a [`TkoRegistry`], which also carries
//! the fleet-wide knock-out gauges.
//!
//! The tracker packs its whole state into one atomic word, so recording a
//! success against a healthy host is a single load and recording failures is
//! lock-free. Once a host is knocked out, only the responsible destination
//! can clear the state or escalate its severity, so probing needs no
//! cross-destination coordination.

mod counters;
mod registry;
mod report;
mod tracker;


pub use self::{
    counters::TkoCounters,
    registry::{Suspect, TkoRegistry},
    report::Report,
    tracker::{InvalidParams, Params, TkoTracker, Token},
};
