//! Analysis pipeline.
//!
//! Glue layer wiring the stages together:
//! condition → locate (or seed from expected positions) → sample → fit →
//! aggregate. Algorithms live in `crate::condition`, `crate::picket` and
//! `crate::tolerance`; this module owns call order and data flow.

mod result;
mod run;

pub use result::{ConditioningSummary, LeafSummary, MaxError, PfResult, PicketSummary};

pub(crate) use run::run;
