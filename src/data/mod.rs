//! Observation data: the TOA container and a synthetic TOA generator.

pub mod simulate;
pub mod toas;

pub use simulate::*;
pub use toas::*;
