//! Timing-model interface plus a reference spin-down model and noise components.
//!
//! The residual engine only talks to `TimingModel`; the concrete types here
//! exist so the engine can be driven end to end.

pub mod model;
pub mod noise;
pub mod spindown;

pub use model::*;
pub use noise::*;
pub use spindown::*;
