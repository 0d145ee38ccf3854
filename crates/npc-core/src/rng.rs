//! Deterministic random number generation and weighted discrete sampling.
//!
//! All randomness in the kernel flows through `KernelRng`, a SplitMix64
//! generator. Seeds are derived from the world seed plus a label and index,
//! so placement and config draws replay identically for a given world.

// ---------------------------------------------------------------------------
// Seed derivation
// ---------------------------------------------------------------------------

/// Derive a deterministic sub-seed from a base seed, a label, and an index.
/// Uses SplitMix64-style mixing for good distribution.
pub fn derive_seed(seed: u64, label: &str, index: u64) -> u64 {
    let mut h: u64 = seed;
    h = h.wrapping_add(index.wrapping_mul(0x9e3779b97f4a7c15));
    for b in label.bytes() {
        h = h.wrapping_add(b as u64);
        h = h.wrapping_mul(0xbf58476d1ce4e5b9);
    }
    h = (h ^ (h >> 30)).wrapping_mul(0xbf58476d1ce4e5b9);
    h = (h ^ (h >> 27)).wrapping_mul(0x94d049bb133111eb);
    h ^ (h >> 31)
}

// ---------------------------------------------------------------------------
// KernelRng
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct KernelRng {
    state: u64,
}

impl KernelRng {
    pub fn new(seed: u64) -> Self {
        // A zero state would lock the generator near zero for early draws.
        Self {
            state: seed ^ 0x9e3779b97f4a7c15,
        }
    }

    pub fn next_u64(&mut self) -> u64 {
        self.state = self.state.wrapping_add(0x9e3779b97f4a7c15);
        let mut z = self.state;
        z = (z ^ (z >> 30)).wrapping_mul(0xbf58476d1ce4e5b9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94d049bb133111eb);
        z ^ (z >> 31)
    }

    /// Uniform draw in [0, 1).
    pub fn next_f64(&mut self) -> f64 {
        (self.next_u64() >> 11) as f64 * (1.0 / (1u64 << 53) as f64)
    }

    /// Uniform draw in [0, bound). Returns 0 for bound 0.
    pub fn range_u32(&mut self, bound: u32) -> u32 {
        if bound == 0 {
            return 0;
        }
        ((u128::from(self.next_u64()) * u128::from(bound)) >> 64) as u32
    }

    /// Uniform draw in the inclusive range [lo, hi].
    pub fn range_i32(&mut self, lo: i32, hi: i32) -> i32 {
        debug_assert!(lo <= hi);
        let span = (i64::from(hi) - i64::from(lo) + 1) as u32;
        lo + self.range_u32(span) as i32
    }

    /// Bernoulli draw with probability `p` (clamped to [0, 1]).
    pub fn chance(&mut self, p: f64) -> bool {
        if p <= 0.0 {
            return false;
        }
        if p >= 1.0 {
            return true;
        }
        self.next_f64() < p
    }

    /// Split off an independent generator for a labeled sub-stream.
    pub fn fork(&mut self, label: &str) -> KernelRng {
        KernelRng::new(derive_seed(self.next_u64(), label, 0))
    }
}

// ---------------------------------------------------------------------------
// Weighted discrete sampling
// ---------------------------------------------------------------------------

/// Weighted discrete distribution sampled by binary search over cumulative
/// weights. Zero-weight entries never sample; an all-zero table has no
/// distribution and construction returns `None`.
#[derive(Debug, Clone)]
pub struct WeightedTable<T> {
    entries: Vec<T>,
    cumulative: Vec<u64>,
    total: u64,
}

impl<T: Copy> WeightedTable<T> {
    pub fn new(weighted: impl IntoIterator<Item = (T, u64)>) -> Option<Self> {
        let mut entries = Vec::new();
        let mut cumulative = Vec::new();
        let mut total: u64 = 0;
        for (value, weight) in weighted {
            if weight == 0 {
                continue;
            }
            total += weight;
            entries.push(value);
            cumulative.push(total);
        }
        if total == 0 {
            return None;
        }
        Some(Self {
            entries,
            cumulative,
            total,
        })
    }

    pub fn sample(&self, rng: &mut KernelRng) -> T {
        let roll = ((u128::from(rng.next_u64()) * u128::from(self.total)) >> 64) as u64;
        let idx = self.cumulative.partition_point(|&c| c <= roll);
        self.entries[idx]
    }
}
