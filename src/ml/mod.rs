//! Hand-rolled classifiers and evaluation helpers.

pub mod forest;
pub mod metrics;
pub mod workers;
