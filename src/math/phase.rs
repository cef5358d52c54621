//! Extended-precision rotational phase.
//!
//! Pulse counts grow without bound (a millisecond pulsar accumulates ~10^10
//! turns per decade), so a single `f64` cannot hold both the cycle count and a
//! sub-microsecond fraction. `Phase` keeps the two apart:
//!
//! - `int`: whole cycles (always integral)
//! - `frac`: fractional cycle, normalized into `[-0.5, 0.5]`
//!
//! Arithmetic adds the parts separately and renormalizes, so the fraction never
//! absorbs the large integer part.

use std::ops::{Add, Neg, Sub};

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Phase {
    pub int: f64,
    pub frac: f64,
}

impl Phase {
    /// Build a phase from an integer part and a fractional part.
    ///
    /// Either argument may carry cycles of the other kind; the result is
    /// renormalized so that `int` is integral and `|frac| <= 0.5`.
    pub fn new(int: f64, frac: f64) -> Self {
        let int_whole = int.trunc();
        let carry = int - int_whole;

        let total_frac = frac + carry;
        let frac_whole = total_frac.trunc();

        let mut int = int_whole + frac_whole;
        let mut frac = total_frac - frac_whole;

        if frac < -0.5 {
            frac += 1.0;
            int -= 1.0;
        } else if frac > 0.5 {
            frac -= 1.0;
            int += 1.0;
        }
        Self { int, frac }
    }

    /// Split a plain cycle count.
    pub fn from_cycles(cycles: f64) -> Self {
        Self::new(0.0, cycles)
    }

    /// `a * b` with the rounding error of the product kept in the fraction.
    ///
    /// Uses an FMA two-product: `a * b == hi + lo` exactly.
    pub fn from_product(a: f64, b: f64) -> Self {
        let hi = a * b;
        let lo = a.mul_add(b, -hi);
        Self::new(hi, lo)
    }

    /// An integral pulse number (no fractional part).
    pub fn from_pulse_number(pulse: f64) -> Self {
        Self::new(pulse, 0.0)
    }

    /// Collapse to a single `f64` (loses precision for large `int`).
    pub fn value(self) -> f64 {
        self.int + self.frac
    }
}

impl Add for Phase {
    type Output = Phase;

    fn add(self, rhs: Phase) -> Phase {
        Phase::new(self.int + rhs.int, self.frac + rhs.frac)
    }
}

impl Sub for Phase {
    type Output = Phase;

    fn sub(self, rhs: Phase) -> Phase {
        Phase::new(self.int - rhs.int, self.frac - rhs.frac)
    }
}

impl Neg for Phase {
    type Output = Phase;

    fn neg(self) -> Phase {
        Phase::new(-self.int, -self.frac)
    }
}
