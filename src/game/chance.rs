//! Probability resolver.
//!
//! Every chance evaluation in the game goes through [`Resolver`], so engines can be
//! driven by a seeded RNG in production-like tests or by a [`ScriptedResolver`]
//! that replays fixed draws.

use std::collections::VecDeque;
use std::sync::Mutex;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Source of all random draws. Implementations must be shareable across worker threads.
pub trait Resolver: Send + Sync {
    /// True with probability `p`. The draw is compared with `<=`, so `p >= 1.0` always hits
    /// and `p <= 0.0` never does.
    fn hit(&self, p: f64) -> bool;

    /// Uniform integer in `[min, max]`, both inclusive.
    fn roll_die(&self, min: i64, max: i64) -> i64;

    /// Uniform float in `[min, max]`.
    fn uniform(&self, min: f64, max: f64) -> f64;

    /// `k` distinct indices out of `0..len`, in draw order.
    fn sample_indices(&self, len: usize, k: usize) -> Vec<usize>;
}

/// Pick one element, or `None` for an empty slice.
pub fn pick_one<'a, T>(resolver: &dyn Resolver, items: &'a [T]) -> Option<&'a T> {
    resolver.sample_indices(items.len(), 1).first().and_then(|&i| items.get(i))
}

/// Sample `k` elements without replacement. Order follows the draw, not the input.
pub fn sample<T: Clone>(resolver: &dyn Resolver, items: &[T], k: usize) -> Vec<T> {
    resolver
        .sample_indices(items.len(), k)
        .into_iter()
        .filter_map(|i| items.get(i).cloned())
        .collect()
}

fn ordered<T: PartialOrd>(a: T, b: T) -> (T, T) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

/// `StdRng`-backed resolver. Seeded from OS entropy unless a seed is given.
pub struct RngResolver {
    rng: Mutex<StdRng>,
}

impl RngResolver {
    pub fn from_entropy() -> Self {
        Self {
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    fn with_rng<T>(&self, f: impl FnOnce(&mut StdRng) -> T) -> T {
        // a poisoned RNG is still a valid RNG
        let mut guard = match self.rng.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut guard)
    }
}

impl Default for RngResolver {
    fn default() -> Self {
        Self::from_entropy()
    }
}

impl Resolver for RngResolver {
    fn hit(&self, p: f64) -> bool {
        if p >= 1.0 {
            return true;
        }
        if p <= 0.0 || p.is_nan() {
            return false;
        }
        self.with_rng(|rng| rng.gen::<f64>() <= p)
    }

    fn roll_die(&self, min: i64, max: i64) -> i64 {
        let (lo, hi) = ordered(min, max);
        self.with_rng(|rng| rng.gen_range(lo..=hi))
    }

    fn uniform(&self, min: f64, max: f64) -> f64 {
        let (lo, hi) = ordered(min, max);
        if lo == hi {
            return lo;
        }
        self.with_rng(|rng| rng.gen_range(lo..=hi))
    }

    fn sample_indices(&self, len: usize, k: usize) -> Vec<usize> {
        let amount = k.min(len);
        self.with_rng(|rng| rand::seq::index::sample(rng, len, amount).into_vec())
    }
}

#[derive(Default)]
struct Script {
    hits: VecDeque<bool>,
    rolls: VecDeque<i64>,
    uniforms: VecDeque<f64>,
    indices: VecDeque<Vec<usize>>,
}

/// Replays queued draws in order, falling back to a fixed-seed RNG when a queue runs dry.
pub struct ScriptedResolver {
    script: Mutex<Script>,
    fallback: RngResolver,
}

impl ScriptedResolver {
    pub fn new() -> Self {
        Self {
            script: Mutex::new(Script::default()),
            fallback: RngResolver::seeded(0),
        }
    }

    pub fn with_hits(self, hits: &[bool]) -> Self {
        self.edit(|s| s.hits.extend(hits.iter().copied()));
        self
    }

    pub fn with_rolls(self, rolls: &[i64]) -> Self {
        self.edit(|s| s.rolls.extend(rolls.iter().copied()));
        self
    }

    pub fn with_uniforms(self, values: &[f64]) -> Self {
        self.edit(|s| s.uniforms.extend(values.iter().copied()));
        self
    }

    /// Queue one `sample_indices` result. Out-of-range indices are dropped at draw time.
    pub fn with_indices(self, indices: &[usize]) -> Self {
        self.edit(|s| s.indices.push_back(indices.to_vec()));
        self
    }

    /// Queue more hits after construction, for services that already hold the resolver.
    pub fn push_hits(&self, hits: &[bool]) {
        self.edit(|s| s.hits.extend(hits.iter().copied()));
    }

    pub fn push_rolls(&self, rolls: &[i64]) {
        self.edit(|s| s.rolls.extend(rolls.iter().copied()));
    }

    fn edit<T>(&self, f: impl FnOnce(&mut Script) -> T) -> T {
        let mut guard = match self.script.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut guard)
    }
}

impl Default for ScriptedResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl Resolver for ScriptedResolver {
    fn hit(&self, p: f64) -> bool {
        match self.edit(|s| s.hits.pop_front()) {
            Some(hit) => hit,
            None => self.fallback.hit(p),
        }
    }

    fn roll_die(&self, min: i64, max: i64) -> i64 {
        match self.edit(|s| s.rolls.pop_front()) {
            Some(roll) => roll,
            None => self.fallback.roll_die(min, max),
        }
    }

    fn uniform(&self, min: f64, max: f64) -> f64 {
        match self.edit(|s| s.uniforms.pop_front()) {
            Some(value) => value,
            None => self.fallback.uniform(min, max),
        }
    }

    fn sample_indices(&self, len: usize, k: usize) -> Vec<usize> {
        match self.edit(|s| s.indices.pop_front()) {
            Some(indices) => indices.into_iter().filter(|&i| i < len).take(k).collect(),
            None => self.fallback.sample_indices(len, k),
        }
    }
}
