use rand::Rng;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::index;

use crate::error::{PipelineError, Result};

#[derive(Debug, Clone, PartialEq)]
pub struct BalancedSample {
    pub scores: Vec<f64>,
    /// Background was smaller than signal and rows were drawn more than once.
    pub with_replacement: bool,
}

/// Draws `signal.len()` background scores with a seeded generator: without
/// replacement when the pool is large enough, with replacement otherwise.
/// Same inputs and seed give the same output bit for bit.
pub fn balance(signal: &[f64], background: &[f64], seed: u64) -> Result<BalancedSample> {
    let target = signal.len();
    if target == 0 {
        return Ok(BalancedSample {
            scores: Vec::new(),
            with_replacement: false,
        });
    }
    if background.is_empty() {
        return Err(PipelineError::FatalEmptyInput(
            "background pool is empty, nothing to resample".to_string(),
        ));
    }

    let mut rng = StdRng::seed_from_u64(seed);
    if background.len() >= target {
        let picked = index::sample(&mut rng, background.len(), target);
        let scores = picked.iter().map(|i| background[i]).collect();
        tracing::info!(
            signal = target,
            background = background.len(),
            seed,
            "resampled background without replacement"
        );
        Ok(BalancedSample {
            scores,
            with_replacement: false,
        })
    } else {
        tracing::warn!(
            signal = target,
            background = background.len(),
            seed,
            "background pool smaller than signal; sampling WITH replacement, background variance will be understated"
        );
        let scores = (0..target)
            .map(|_| background[rng.gen_range(0..background.len())])
            .collect();
        Ok(BalancedSample {
            scores,
            with_replacement: true,
        })
    }
}

#[cfg(test)]
#[path = "../../tests/src_inline/pipeline/stage5_balance.rs"]
mod tests;
