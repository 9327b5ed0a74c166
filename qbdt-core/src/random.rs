//! Uniform random sources for measurement sampling
//!
//! A state draws from a [`SharedRandom`] so that clones of a state, and the
//! engines it owns, consume one stream.

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::VecDeque;
use std::sync::Arc;

/// Source of uniform draws in `[0, 1)`.
pub trait RandomSource: Send {
    /// Next uniform draw in `[0, 1)`.
    fn draw(&mut self) -> f64;
}

/// Random source shared between a state and its clones.
pub type SharedRandom = Arc<Mutex<dyn RandomSource>>;

/// Wraps `source` for sharing.
pub fn shared<R: RandomSource + 'static>(source: R) -> SharedRandom {
    Arc::new(Mutex::new(source))
}

/// Pseudo-random draws from a [`StdRng`]
#[derive(Debug, Clone)]
pub struct StdRandom {
    rng: StdRng,
}

impl StdRandom {
    /// Seeded from the operating system.
    pub fn from_entropy() -> Self {
        Self {
            rng: StdRng::from_entropy(),
        }
    }

    /// Reproducible stream for `seed`.
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Seeded when `seed` is given, from entropy otherwise.
    pub fn from_seed(seed: Option<u64>) -> Self {
        seed.map_or_else(Self::from_entropy, Self::seeded)
    }
}

impl RandomSource for StdRandom {
    fn draw(&mut self) -> f64 {
        self.rng.gen::<f64>()
    }
}

/// Returns the same value on every draw.
#[derive(Debug, Clone, Copy)]
pub struct FixedRandom(pub f64);

impl RandomSource for FixedRandom {
    fn draw(&mut self) -> f64 {
        self.0
    }
}

/// Replays a scripted list of draws, then repeats the last one.
#[derive(Debug, Clone)]
pub struct SequenceRandom {
    queue: VecDeque<f64>,
    last: f64,
}

impl SequenceRandom {
    pub fn new(draws: impl IntoIterator<Item = f64>) -> Self {
        Self {
            queue: draws.into_iter().collect(),
            last: 0.0,
        }
    }
}

impl RandomSource for SequenceRandom {
    fn draw(&mut self) -> f64 {
        if let Some(next) = self.queue.pop_front() {
            self.last = next;
        }
        self.last
    }
}
