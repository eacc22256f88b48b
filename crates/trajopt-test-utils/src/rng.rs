//! Deterministic RNG utilities for reproducible tests.

use nalgebra::DVector;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Create a deterministic `ChaCha8Rng` from a seed.
///
/// All test randomization should go through this to ensure reproducibility.
pub fn seeded_rng(seed: u64) -> ChaCha8Rng {
    ChaCha8Rng::seed_from_u64(seed)
}

/// `horizon` control vectors of length `dim`, uniform in `[-scale, scale]`.
pub fn deterministic_controls(horizon: usize, dim: usize, scale: f64, seed: u64) -> Vec<DVector<f64>> {
    let mut rng = seeded_rng(seed);
    (0..horizon)
        .map(|_| DVector::from_fn(dim, |_, _| scale * (2.0 * rng.r#gen::<f64>() - 1.0)))
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
