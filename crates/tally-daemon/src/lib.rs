//! tally daemon library entry.
//!
//! This crate wires the ingestion pipeline, the metric registry, the reload
//! controller, and the scrape endpoint into a running daemon. It is intended
//! to be consumed by the binary (`main.rs`) and by integration tests.

pub mod app_state;
pub mod config;
pub mod daemon;
pub mod logging;
pub mod metric;
pub mod ops;
pub mod pipeline;
pub mod registry;
pub mod reload;
pub mod router;
