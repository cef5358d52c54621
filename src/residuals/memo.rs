//! Generation-keyed memo for a lazily computed scalar.
//!
//! The owner bumps the generation whenever its inputs or derived arrays
//! change. A cached value is returned only if it was computed at the current
//! generation; otherwise it is recomputed on access.

use std::cell::Cell;

use crate::error::ResidualResult;

#[derive(Debug, Default)]
pub struct GenerationMemo {
    generation: u64,
    cached: Cell<Option<(u64, f64)>>,
}

impl GenerationMemo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Invalidate the cached value.
    pub fn bump(&mut self) {
        self.generation = self.generation.wrapping_add(1);
    }

    pub fn is_fresh(&self) -> bool {
        matches!(self.cached.get(), Some((g, _)) if g == self.generation)
    }

    pub fn get_or_try_compute<F>(&self, compute: F) -> ResidualResult<f64>
    where
        F: FnOnce() -> ResidualResult<f64>,
    {
        if let Some((generation, value)) = self.cached.get() {
            if generation == self.generation {
                return Ok(value);
            }
        }
        let value = compute()?;
        self.cached.set(Some((self.generation, value)));
        Ok(value)
    }
}
