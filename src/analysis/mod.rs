//! Per-method program analyses.
//!
//! # Key Components
//!
//! - [`liveness`] - live variable sets per block
//! - [`ssa`] - SSA construction and validation
//!
//! Whole-program reachability lives in [`crate::dependency`]; these analyses only look
//! at one [`crate::model::Program`] at a time and can run in parallel.

pub mod liveness;
pub mod ssa;

pub use liveness::LivenessAnalyzer;
pub use ssa::{verify_ssa, SsaTransformer};
