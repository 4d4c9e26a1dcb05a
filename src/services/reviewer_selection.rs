//! Constrained random reviewer selection.
//!
//! The selector owns its random source, so the engine can be built with a
//! seeded generator in tests and an entropy-backed one in production. The
//! generator sits behind a mutex and is shared by concurrent workflows.

use std::sync::Mutex;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

pub struct ReviewerSelector {
    rng: Mutex<StdRng>,
}

impl ReviewerSelector {
    /// Selector seeded from OS entropy.
    pub fn from_entropy() -> Self {
        Self {
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Deterministic selector for reproducible runs.
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    pub fn from_seed(seed: Option<u64>) -> Self {
        match seed {
            Some(seed) => Self::seeded(seed),
            None => Self::from_entropy(),
        }
    }

    /// Pick `min(k, pool.len())` distinct entries uniformly at random.
    ///
    /// An empty pool yields an empty selection.
    pub fn select<T>(&self, mut pool: Vec<T>, k: usize) -> Vec<T> {
        let amount = k.min(pool.len());
        if amount == 0 {
            return Vec::new();
        }

        // A poisoned lock only means another selection panicked; the
        // generator state is still usable.
        let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());
        pool.partial_shuffle(&mut *rng, amount);
        drop(rng);

        pool.truncate(amount);
        pool
    }

    /// Pick a single entry, or `None` if the pool is empty.
    pub fn select_one<T>(&self, pool: Vec<T>) -> Option<T> {
        self.select(pool, 1).pop()
    }
}
