//! # Ocea exporter - resident portal metering for Prometheus
//!
//! Periodically reads water, hot water and heating meters from the Ocea
//! resident portal, turns them into monotonically increasing absolute
//! indexes and republishes them to listeners such as the Prometheus
//! exporter.
//!
//! ## Architecture
//!
//! - `config`: Configuration loading and validation
//! - `logging`: Structured logging and tracing
//! - `auth`: Token lifecycle, including the simulated B2C browser login
//! - `api`: Resident portal REST client
//! - `counters`: Reconciliation of device readings with dashboard deltas
//! - `state`: JSON persistence of counters and account data
//! - `notify`: Non-blocking fan-out of counter snapshots
//! - `metrics`: Prometheus gauges
//! - `fetcher`: Poll loop tying everything together
//! - `web`: `/metrics` and `/health` over HTTP

pub mod api;
pub mod auth;
pub mod config;
pub mod counters;
pub mod error;
pub mod fetcher;
pub mod logging;
pub mod metrics;
pub mod notify;
pub mod state;
pub mod web;


// Re-export commonly used types
pub use config::Config;
pub use error::{OceaError, Result};
pub use fetcher::CounterFetcher;
