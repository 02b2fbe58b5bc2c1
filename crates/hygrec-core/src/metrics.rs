//! Quality metrics for semantic IDs.
//!
//! Semantic IDs are ordered tuples of per-level code indices. These helpers
//! measure how well a tokenizer spreads a catalog over its code space:
//!
//! - **Collision rate**: fraction of items whose tuple is shared with an earlier item
//! - **Collision groups**: items that share an identical tuple
//! - **Code usage / perplexity**: how evenly one level's codebook is used
//! - [`EmaUsage`]: exponential moving average of per-level code usage during training
//!
//! ## Example
//!
//! ```
//! use hygrec_core::metrics::{collision_rate, collision_groups};
//!
//! let codes = vec![vec![1, 2, 3], vec![1, 2, 4], vec![1, 2, 3]];
//!
//! assert!((collision_rate(&codes) - 1.0 / 3.0).abs() < 1e-12);
//! assert_eq!(collision_groups(&codes), vec![vec![0, 2]]);
//! ```

use std::collections::HashMap;

/// Fraction of items that do not own a unique semantic ID.
///
/// Computed as `1 - unique_tuples / n_items`; an empty catalog has rate 0.
///
/// ```
/// use hygrec_core::metrics::collision_rate;
///
/// assert_eq!(collision_rate(&[vec![0, 1], vec![1, 0]]), 0.0);
/// assert_eq!(collision_rate(&[vec![5, 5], vec![5, 5]]), 0.5);
/// assert_eq!(collision_rate(&[]), 0.0);
/// ```
pub fn collision_rate(codes: &[Vec<usize>]) -> f64 {
    if codes.is_empty() {
        return 0.0;
    }
    let unique: std::collections::HashSet<&Vec<usize>> = codes.iter().collect();
    1.0 - unique.len() as f64 / codes.len() as f64
}

/// Groups of item positions sharing an identical semantic ID.
///
/// Only groups with more than one member are returned. Groups are ordered by
/// their first member and members are in ascending order, so the output is
/// deterministic for a given input.
pub fn collision_groups(codes: &[Vec<usize>]) -> Vec<Vec<usize>> {
    let mut by_code: HashMap<&Vec<usize>, Vec<usize>> = HashMap::new();
    for (i, code) in codes.iter().enumerate() {
        by_code.entry(code).or_default().push(i);
    }

    let mut groups: Vec<Vec<usize>> = by_code
        .into_values()
        .filter(|members| members.len() > 1)
        .collect();
    groups.sort_by_key(|members| members[0]);
    groups
}

/// Number of items that share their semantic ID with at least one other item.
pub fn n_colliding_items(codes: &[Vec<usize>]) -> usize {
    collision_groups(codes).iter().map(Vec::len).sum()
}

/// Histogram of code indices at one level.
///
/// ```
/// use hygrec_core::metrics::code_histogram;
///
/// assert_eq!(code_histogram(&[0, 2, 2, 3], 4), vec![1, 0, 2, 1]);
/// ```
pub fn code_histogram(indices: &[usize], codebook_size: usize) -> Vec<usize> {
    let mut counts = vec![0usize; codebook_size];
    for &idx in indices {
        if idx < codebook_size {
            counts[idx] += 1;
        }
    }
    counts
}

/// Perplexity `exp(H(p))` of a usage distribution.
///
/// Ranges from 1 (a single code absorbs everything, i.e. collapse) to the
/// number of codes (perfectly uniform use). Zero total mass yields 0.
///
/// ```
/// use hygrec_core::metrics::perplexity;
///
/// assert!((perplexity(&[1.0, 1.0, 1.0, 1.0]) - 4.0).abs() < 1e-9);
/// assert!((perplexity(&[7.0, 0.0, 0.0]) - 1.0).abs() < 1e-9);
/// ```
pub fn perplexity(counts: &[f64]) -> f64 {
    let total: f64 = counts.iter().sum();
    if total <= 0.0 {
        return 0.0;
    }
    let entropy: f64 = counts
        .iter()
        .filter(|&&c| c > 0.0)
        .map(|&c| {
            let p = c / total;
            -p * p.ln()
        })
        .sum();
    entropy.exp()
}

/// Fraction of codes with non-zero usage.
pub fn utilization(counts: &[usize]) -> f64 {
    if counts.is_empty() {
        return 0.0;
    }
    counts.iter().filter(|&&c| c > 0).count() as f64 / counts.len() as f64
}

/// Exponential moving average of per-level code usage.
///
/// Updated once per training batch with the batch histogram of every level;
/// the stored values are normalized usage frequencies.
#[derive(Clone, Debug)]
pub struct EmaUsage {
    decay: f64,
    levels: Vec<Vec<f64>>,
    initialized: bool,
}

impl EmaUsage {
    /// Create a tracker for codebooks of the given sizes.
    pub fn new(codebook_sizes: &[usize], decay: f64) -> Self {
        let levels = codebook_sizes
            .iter()
            .map(|&k| vec![1.0 / k.max(1) as f64; k])
            .collect();
        Self {
            decay: decay.clamp(0.0, 1.0),
            levels,
            initialized: false,
        }
    }

    /// Fold one batch of per-level indices into the average.
    ///
    /// `batch_codes[i][l]` is the code of item `i` at level `l`.
    pub fn update(&mut self, batch_codes: &[Vec<usize>]) {
        if batch_codes.is_empty() {
            return;
        }
        let n = batch_codes.len() as f64;
        for (level, usage) in self.levels.iter_mut().enumerate() {
            let indices: Vec<usize> = batch_codes.iter().filter_map(|c| c.get(level).copied()).collect();
            let counts = code_histogram(&indices, usage.len());
            let decay = if self.initialized { self.decay } else { 0.0 };
            for (u, &c) in usage.iter_mut().zip(counts.iter()) {
                *u = decay * *u + (1.0 - decay) * (c as f64 / n);
            }
        }
        self.initialized = true;
    }

    /// Current usage frequencies of one level.
    pub fn usage(&self, level: usize) -> &[f64] {
        &self.levels[level]
    }

    /// Perplexity of the averaged usage at one level.
    pub fn perplexity(&self, level: usize) -> f64 {
        perplexity(&self.levels[level])
    }

    /// Number of codes whose averaged usage fell below `threshold`.
    pub fn dead_codes(&self, level: usize, threshold: f64) -> usize {
        self.levels[level].iter().filter(|&&u| u < threshold).count()
    }

    pub fn n_levels(&self) -> usize {
        self.levels.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collision_groups_multiple() {
        let codes = vec![
            vec![0, 0],
            vec![1, 1],
            vec![0, 0],
            vec![2, 2],
            vec![1, 1],
            vec![0, 0],
        ];
        assert_eq!(collision_groups(&codes), vec![vec![0, 2, 5], vec![1, 4]]);
        assert_eq!(n_colliding_items(&codes), 5);
        assert!((collision_rate(&codes) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_utilization() {
        assert_eq!(utilization(&[1, 0, 3, 0]), 0.5);
        assert_eq!(utilization(&[]), 0.0);
    }

    #[test]
    fn test_ema_usage_tracks_collapse() {
        let mut ema = EmaUsage::new(&[4, 2], 0.5);
        let uniform: Vec<Vec<usize>> = (0..8).map(|i| vec![i % 4, i % 2]).collect();
        ema.update(&uniform);
        assert!((ema.perplexity(0) - 4.0).abs() < 1e-9);

        let collapsed: Vec<Vec<usize>> = (0..8).map(|_| vec![0, 0]).collect();
        for _ in 0..20 {
            ema.update(&collapsed);
        }
        assert!(ema.perplexity(0) < 1.01);
        assert_eq!(ema.dead_codes(0, 1e-3), 3);
        assert_eq!(ema.n_levels(), 2);
    }
}
