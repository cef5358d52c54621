//! `psr-residuals` library crate.
//!
//! Computes and scores timing residuals of pulse times of arrival against a
//! timing model:
//!
//! - phase residuals under nearest-pulse or pulse-number tracking
//! - time residuals and chi-squared (white or ECORR-correlated noise)
//! - epoch-averaged residuals under ECORR
//! - wideband DM residuals and joint scoring across residual kinds
//!
//! Observation loading, parameter fitting and plotting live outside this crate.

pub mod data;
pub mod domain;
pub mod error;
pub mod math;
pub mod models;
pub mod residuals;
