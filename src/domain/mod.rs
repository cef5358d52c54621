//! Domain types used throughout the residual engine.
//!
//! This module defines:
//!
//! - residual selection enums (`ResidualKind`, `TrackMode`, `ResidualUnit`)
//! - timing-model parameters (`Parameter`)
//! - computation options (`ResidualConfig`)

pub mod config;
pub mod types;

pub use config::*;
pub use types::*;
