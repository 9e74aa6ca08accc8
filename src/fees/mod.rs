//! Fee Estimation Module
//!
//! Byte-size fee formulas per chain, chunked-upload fee constants and
//! provider fee-tier selection.

mod estimator;

pub use estimator::*;
