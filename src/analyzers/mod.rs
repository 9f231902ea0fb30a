//! Read-back analysis of the stored dataset.
//!
//! Computes headline KPIs, the per-city risk distribution and the pollutant
//! trend table, writes them as CSV, and emits Vega-Lite chart specifications
//! next to them.

pub mod aggregate;
pub mod analyzer;
pub mod charts;
pub mod types;
pub mod utility;
