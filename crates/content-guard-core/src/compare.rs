//! Similarity comparators.
//!
//! A [`Comparator`] scores two fingerprints of the same modality in
//! `[0, 1]`. Every implementation must honour two boundaries, checked by
//! [`boundary_score`]:
//!
//! - either fingerprint empty → exactly `0.0`
//! - identical primary digest → exactly `1.0`
//!
//! [`PlaceholderComparator`] fills the gap between the boundaries with a
//! bounded random draw until a perceptual model replaces it. Because that is
//! non-deterministic, the orchestrator wraps the configured comparator in a
//! [`JobComparator`] that caches each digest pair for the life of one job.

use std::collections::HashMap;
use std::sync::Mutex;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::models::Fingerprint;

/// Scores two fingerprints of the same modality.
pub trait Comparator: Send + Sync {
    /// Returns a similarity in `[0.0, 1.0]`.
    fn compare(&self, a: &Fingerprint, b: &Fingerprint) -> f64;
}

/// The two guaranteed outcomes; `None` when neither applies.
pub fn boundary_score(a: &Fingerprint, b: &Fingerprint) -> Option<f64> {
    if a.is_empty() || b.is_empty() {
        return Some(0.0);
    }
    match (a.digest(), b.digest()) {
        (Some(x), Some(y)) if x == y => Some(1.0),
        _ => None,
    }
}

/// Lower bound of the placeholder draw.
pub const PLACEHOLDER_MIN: f64 = 0.5;
/// Upper bound of the placeholder draw.
pub const PLACEHOLDER_MAX: f64 = 0.9;

/// Uniform draw in `[0.5, 0.9]` for non-identical fingerprints.
pub struct PlaceholderComparator {
    rng: Mutex<StdRng>,
}

impl PlaceholderComparator {
    pub fn new() -> Self {
        Self {
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Reproducible draws for tests and replays.
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }
}

impl Default for PlaceholderComparator {
    fn default() -> Self {
        Self::new()
    }
}

impl Comparator for PlaceholderComparator {
    fn compare(&self, a: &Fingerprint, b: &Fingerprint) -> f64 {
        if let Some(score) = boundary_score(a, b) {
            return score;
        }
        match self.rng.lock() {
            Ok(mut rng) => rng.gen_range(PLACEHOLDER_MIN..=PLACEHOLDER_MAX),
            // A poisoned RNG still holds valid state.
            Err(poisoned) => poisoned
                .into_inner()
                .gen_range(PLACEHOLDER_MIN..=PLACEHOLDER_MAX),
        }
    }
}

/// Per-job wrapper that makes any comparator referentially consistent.
///
/// Enforces the boundary rules, clamps into `[0, 1]` (NaN becomes `0.0`) and
/// remembers the score of every digest pair it has seen.
pub struct JobComparator<'a> {
    inner: &'a dyn Comparator,
    cache: Mutex<HashMap<(String, String), f64>>,
}

impl<'a> JobComparator<'a> {
    pub fn new(inner: &'a dyn Comparator) -> Self {
        Self {
            inner,
            cache: Mutex::new(HashMap::new()),
        }
    }

    fn pair_key(a: &Fingerprint, b: &Fingerprint) -> Option<(String, String)> {
        let (x, y) = (a.digest()?, b.digest()?);
        // Order-independent so compare(a, b) == compare(b, a).
        if x <= y {
            Some((x.to_string(), y.to_string()))
        } else {
            Some((y.to_string(), x.to_string()))
        }
    }
}

impl Comparator for JobComparator<'_> {
    fn compare(&self, a: &Fingerprint, b: &Fingerprint) -> f64 {
        if let Some(score) = boundary_score(a, b) {
            return score;
        }
        let key = Self::pair_key(a, b);
        if let Some(key) = &key {
            if let Some(score) = self.cache.lock().ok().and_then(|c| c.get(key).copied()) {
                return score;
            }
        }

        let raw = self.inner.compare(a, b);
        let score = if raw.is_nan() { 0.0 } else { raw.clamp(0.0, 1.0) };

        if let Some(key) = key {
            if let Ok(mut cache) = self.cache.lock() {
                cache.insert(key, score);
            }
        }
        score
    }
}
