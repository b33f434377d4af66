//! TTL jitter sources.
//!
//! Spreading default TTLs avoids every entry written in the same burst
//! expiring in the same instant. The random source is injected so tests can
//! pin it.

use std::sync::Mutex;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::store::{MAX_TTL, MIN_TTL};

/// Source of jitter samples in `[-1.0, 1.0]`.
pub trait JitterSource: Send + Sync {
    fn sample(&self) -> f64;
}

/// Always returns zero.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoJitter;

impl JitterSource for NoJitter {
    fn sample(&self) -> f64 {
        0.0
    }
}

/// Samples the thread-local RNG.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomJitter;

impl JitterSource for RandomJitter {
    fn sample(&self) -> f64 {
        rand::rng().random_range(-1.0..=1.0)
    }
}

/// Deterministic jitter from a seeded RNG.
#[derive(Debug)]
pub struct SeededJitter {
    rng: Mutex<StdRng>,
}

impl SeededJitter {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }
}

impl JitterSource for SeededJitter {
    fn sample(&self) -> f64 {
        let mut rng = self
            .rng
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        rng.random_range(-1.0..=1.0)
    }
}

/// Scale `ttl` by `1 + ratio * sample`, staying within [`MIN_TTL`, `MAX_TTL`].
pub fn jittered_ttl(ttl: Duration, ratio: f64, source: &dyn JitterSource) -> Duration {
    if ratio <= 0.0 {
        return ttl;
    }
    let factor = (1.0 + ratio * source.sample().clamp(-1.0, 1.0)).clamp(0.0, 2.0);
    ttl.min(MAX_TTL).mul_f64(factor).clamp(MIN_TTL, MAX_TTL)
}
