//! Randomized pacing between automated actions
//!
//! Every delay is drawn from a bounded distribution and always lands inside
//! `[min_delay, max_delay]`. A fixed seed makes the sequence reproducible.

use std::f64::consts::PI;
use std::time::Duration;

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::trace;

use crate::config::{ConfigError, PacingConfig, PacingDistribution};

/// Spread of the log-normal distribution in log space
const LOG_NORMAL_SIGMA: f64 = 0.4;

/// Computes inter-action delays
pub struct PacingPolicy {
    config: PacingConfig,
    rng: Mutex<StdRng>,
}

impl PacingPolicy {
    /// Policy seeded from system entropy
    pub fn new(config: PacingConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            rng: Mutex::new(StdRng::from_entropy()),
        })
    }

    /// Policy with a deterministic sequence
    pub fn with_seed(config: PacingConfig, seed: u64) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        })
    }

    /// Policy that never waits
    pub fn disabled() -> Self {
        Self {
            config: PacingConfig {
                min_delay_ms: 0,
                max_delay_ms: 0,
                distribution: PacingDistribution::Uniform,
            },
            rng: Mutex::new(StdRng::seed_from_u64(0)),
        }
    }

    /// Configuration in effect
    pub fn config(&self) -> &PacingConfig {
        &self.config
    }

    /// Draw the next delay
    pub fn next_delay(&self) -> Duration {
        let min = self.config.min_delay_ms;
        let max = self.config.max_delay_ms;
        if min == max {
            return Duration::from_millis(min);
        }

        let mut rng = self.rng.lock();
        let millis = match self.config.distribution {
            PacingDistribution::Uniform => rng.gen_range(min..=max),
            PacingDistribution::LogNormal => sample_log_normal(&mut *rng, min, max),
        };
        trace!(delay_ms = millis, "Pacing delay drawn");

        Duration::from_millis(millis.clamp(min, max))
    }
}

impl std::fmt::Debug for PacingPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PacingPolicy")
            .field("config", &self.config)
            .finish()
    }
}

/// Log-normal sample with its median at the midpoint of the bounds
fn sample_log_normal<R: Rng>(rng: &mut R, min: u64, max: u64) -> u64 {
    let median = ((min as f64 + max as f64) / 2.0).max(1.0);

    // Box-Muller; u1 is kept away from zero for the logarithm
    let u1: f64 = 1.0 - rng.gen::<f64>();
    let u2: f64 = rng.gen();
    let z = (-2.0 * u1.ln()).sqrt() * (2.0 * PI * u2).cos();

    let value = (median.ln() + LOG_NORMAL_SIGMA * z).exp();
    if !value.is_finite() {
        return max;
    }
    (value.round() as u64).clamp(min, max)
}
