//! Held-out index sets for cross-validation.

use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use crate::error::{GenvarError, Result};

/// One held-out set of individual indices per fold.
///
/// Folds may overlap (Monte Carlo designs) or be disjoint (k-fold). Every
/// fold leaves at least one individual for training.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Partition {
    n: usize,
    folds: Vec<Vec<usize>>,
}

impl Partition {
    /// Validate explicit held-out sets over `n` individuals. Each set is
    /// sorted; indices must be in range and unique within a set.
    pub fn new(mut folds: Vec<Vec<usize>>, n: usize) -> Result<Self> {
        if folds.is_empty() {
            return Err(GenvarError::InvalidPartition("no folds given".into()));
        }
        for (f, fold) in folds.iter_mut().enumerate() {
            fold.sort_unstable();
            if fold.is_empty() {
                return Err(GenvarError::InvalidPartition(format!("fold {} is empty", f)));
            }
            if let Some(&bad) = fold.iter().find(|&&i| i >= n) {
                return Err(GenvarError::InvalidPartition(format!(
                    "fold {} holds out individual {} but n = {}",
                    f, bad, n
                )));
            }
            if fold.windows(2).any(|w| w[0] == w[1]) {
                return Err(GenvarError::InvalidPartition(format!(
                    "fold {} lists an individual twice",
                    f
                )));
            }
            if fold.len() >= n {
                return Err(GenvarError::InvalidPartition(format!(
                    "fold {} leaves no individuals for training",
                    f
                )));
            }
        }
        Ok(Self { n, folds })
    }

    /// Disjoint folds covering all `n` individuals after a seeded shuffle.
    /// Fold sizes differ by at most one.
    pub fn k_fold(n: usize, k: usize, seed: u64) -> Result<Self> {
        if k < 2 || k > n {
            return Err(GenvarError::InvalidPartition(format!(
                "k-fold needs 2 <= k <= n (k = {}, n = {})",
                k, n
            )));
        }
        let mut order: Vec<usize> = (0..n).collect();
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        order.shuffle(&mut rng);

        let mut folds = vec![Vec::with_capacity(n / k + 1); k];
        for (pos, &i) in order.iter().enumerate() {
            folds[pos % k].push(i);
        }
        Self::new(folds, n)
    }

    /// `reps` independent random held-out sets of `n_test` individuals.
    pub fn monte_carlo(n: usize, n_test: usize, reps: usize, seed: u64) -> Result<Self> {
        if n_test == 0 || n_test >= n || reps == 0 {
            return Err(GenvarError::InvalidPartition(format!(
                "Monte Carlo needs 0 < n_test < n and reps > 0 (n_test = {}, n = {}, reps = {})",
                n_test, n, reps
            )));
        }
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let folds = (0..reps)
            .map(|_| rand::seq::index::sample(&mut rng, n, n_test).into_vec())
            .collect();
        Self::new(folds, n)
    }

    pub fn n(&self) -> usize {
        self.n
    }

    pub fn len(&self) -> usize {
        self.folds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.folds.is_empty()
    }

    pub fn folds(&self) -> &[Vec<usize>] {
        &self.folds
    }

    /// Training individuals of `fold`: the complement of its held-out set.
    pub fn training(&self, fold: usize) -> Vec<usize> {
        let mut held = vec![false; self.n];
        for &i in &self.folds[fold] {
            held[i] = true;
        }
        (0..self.n).filter(|&i| !held[i]).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_k_fold_is_disjoint_and_covering() {
        let p = Partition::k_fold(23, 5, 7).unwrap();
        assert_eq!(p.len(), 5);
        let mut all: Vec<usize> = p.folds().iter().flatten().copied().collect();
        all.sort_unstable();
        assert_eq!(all, (0..23).collect::<Vec<_>>());
        let sizes: Vec<usize> = p.folds().iter().map(Vec::len).collect();
        assert!(sizes.iter().max().unwrap() - sizes.iter().min().unwrap() <= 1);
    }

    #[test]
    fn test_k_fold_is_seeded() {
        assert_eq!(Partition::k_fold(30, 3, 1).unwrap(), Partition::k_fold(30, 3, 1).unwrap());
        assert_ne!(Partition::k_fold(30, 3, 1).unwrap(), Partition::k_fold(30, 3, 2).unwrap());
    }

    #[test]
    fn test_training_is_complement() {
        let p = Partition::new(vec![vec![3, 1]], 5).unwrap();
        assert_eq!(p.folds()[0], vec![1, 3]);
        assert_eq!(p.training(0), vec![0, 2, 4]);
    }

    #[test]
    fn test_invalid_partitions() {
        assert!(Partition::new(vec![vec![0, 5]], 5).is_err());
        assert!(Partition::new(vec![vec![1, 1]], 5).is_err());
        assert!(Partition::new(vec![vec![]], 5).is_err());
        assert!(Partition::new(vec![vec![0, 1, 2]], 3).is_err());
        assert!(Partition::k_fold(3, 5, 0).is_err());
        assert!(Partition::monte_carlo(10, 10, 2, 0).is_err());
    }

    #[test]
    fn test_monte_carlo_sizes() {
        let p = Partition::monte_carlo(50, 10, 4, 3).unwrap();
        assert_eq!(p.len(), 4);
        assert!(p.folds().iter().all(|f| f.len() == 10));
    }
}
