//! Numerical building blocks: extended-precision phase, weighted statistics and
//! covariance-aware chi-squared.

pub mod gls;
pub mod phase;
pub mod stats;

pub use gls::*;
pub use phase::*;
pub use stats::*;
