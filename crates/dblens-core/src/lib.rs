//! dblens-core — diagnostic normalization and severity-scoring engine.
//!
//! Provides:
//! - `analysis` — field reconciliation, typed records, severity classifier,
//!   per-domain checks and the `Analyzer` that runs them
//! - `connector` — backend connector contract, snapshot replay, and
//!   live connectors (`postgres`, `mysql`, `mongodb` and `sqlite` features,
//!   all default)
//! - `report` — JSON report contract and text rendering
//! - `fmt` — shared formatting helpers

pub mod analysis;
pub mod connector;
pub mod fmt;
pub mod report;
