//! Property-based tests using proptest.
//!
//! These check invariants over generated inputs rather than fixed values:
//!   - variance components stay non-negative
//!   - repeated marker solves are deterministic
//!   - the incrementally maintained residual matches a fresh one
//!   - k-fold partitions cover every individual exactly once
//!   - GRMs are symmetric and positive semi-definite

use proptest::prelude::*;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use genvar_core::cv::Partition;
use genvar_core::grm::compute_grm;
use genvar_core::marker::{solve_marker_effects, update_block, Block, MarkerSolverConfig, SweepState};
use genvar_core::reml::{estimate_variance_components, RemlConfig};
use genvar_core::GenvarError;
use genvar_geno::store::write_store_file;
use genvar_geno::{ByteCoding, GenotypeStore};
use genvar_linalg::DenseMatrix;

fn random_matrix(rng: &mut ChaCha8Rng, n: usize, m: usize) -> DenseMatrix {
    DenseMatrix::from_fn(n, m, |_, _| rng.gen::<f64>() * 2.0 - 1.0)
}

// ---------------------------------------------------------------------------
// 1. Variance components are floored, never negative
// ---------------------------------------------------------------------------
proptest! {
    #![proptest_config(ProptestConfig::with_cases(40))]

    #[test]
    fn prop_theta_non_negative(
        y in prop::collection::vec(-5.0f64..5.0, 12),
        theta0 in prop::collection::vec(0.001f64..50.0, 2),
        max_iter in 1usize..30,
    ) {
        let groups: Vec<usize> = (0..12).map(|i| i / 4).collect();
        let g = DenseMatrix::from_fn(12, 12, |i, j| (groups[i] == groups[j]) as u8 as f64);
        let x = DenseMatrix::from_fn(12, 1, |_, _| 1.0);
        let config = RemlConfig { max_iter, ..Default::default() };

        match estimate_variance_components(&y, Some(&x), &[g], Some(&theta0), &config) {
            Ok(fit) => {
                prop_assert!(fit.theta.iter().all(|t| *t >= config.floor), "{:?}", fit.theta);
                prop_assert!(fit.iterations <= max_iter);
                prop_assert_eq!(fit.converged, fit.final_delta <= config.tol);
            }
            // A degenerate draw may leave the AI matrix singular; that is
            // reported, never a negative component.
            Err(e) => prop_assert!(matches!(e, GenvarError::NumericalFailure { .. }), "{}", e),
        }
    }
}

// ---------------------------------------------------------------------------
// 2. Marker solves are deterministic
// ---------------------------------------------------------------------------
proptest! {
    #![proptest_config(ProptestConfig::with_cases(30))]

    #[test]
    fn prop_marker_solve_idempotent(
        seed in 0u64..1000,
        lambda in 0.01f64..10.0,
        adaptive in any::<bool>(),
    ) {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let w = random_matrix(&mut rng, 15, 6);
        let y: Vec<f64> = (0..15).map(|_| rng.gen::<f64>()).collect();
        let config = MarkerSolverConfig {
            adaptive_weights: adaptive,
            ..MarkerSolverConfig::with_lambda(lambda)
        };
        let sets = vec![vec![0, 1], vec![2], vec![3, 4, 5]];

        let a = solve_marker_effects(&y, None, &w, Some(&sets), &config).unwrap();
        let b = solve_marker_effects(&y, None, &w, Some(&sets), &config).unwrap();
        prop_assert_eq!(a.effects, b.effects);
        prop_assert_eq!(a.sweeps, b.sweeps);
    }
}

// ---------------------------------------------------------------------------
// 3. Incremental residual equals y - Xb - Ws
// ---------------------------------------------------------------------------
proptest! {
    #![proptest_config(ProptestConfig::with_cases(30))]

    #[test]
    fn prop_block_update_residual_consistent(
        seed in 0u64..1000,
        lambda in 0.0f64..5.0,
    ) {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let n = 10;
        let w = random_matrix(&mut rng, n, 4);
        let columns: Vec<Vec<f64>> = (0..4).map(|j| w.col(j)).collect();
        let ww: Vec<f64> = columns.iter().map(|c| DenseMatrix::dot(c, c)).collect();
        let y: Vec<f64> = (0..n).map(|_| rng.gen::<f64>() * 4.0 - 2.0).collect();

        let mut state = SweepState { s: vec![0.0; 4], e: y.clone() };
        let blocks: [&[usize]; 2] = [&[0, 2], &[1, 3]];
        for _ in 0..3 {
            for markers in blocks {
                let cols: Vec<Vec<f64>> = markers.iter().map(|&j| columns[j].clone()).collect();
                let block_ww: Vec<f64> = markers.iter().map(|&j| ww[j]).collect();
                let block_lambda = vec![lambda; markers.len()];
                let block = Block {
                    markers,
                    columns: &cols,
                    ww: &block_ww,
                    lambda: &block_lambda,
                };
                state = update_block(state, &block).0;

                let fitted = w.mat_vec(&state.s);
                for i in 0..n {
                    prop_assert!((state.e[i] - (y[i] - fitted[i])).abs() < 1e-10);
                }
            }
        }
    }

    #[test]
    fn prop_solver_residual_consistent(seed in 0u64..1000) {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let n = 20;
        let w = random_matrix(&mut rng, n, 5);
        let x = DenseMatrix::from_fn(n, 2, |i, j| if j == 0 { 1.0 } else { i as f64 / n as f64 });
        let y: Vec<f64> = (0..n).map(|_| rng.gen::<f64>() * 3.0).collect();

        let fit = solve_marker_effects(&y, Some(&x), &w, None, &MarkerSolverConfig::default())
            .unwrap();
        let xb = x.mat_vec(&fit.fixed_effects);
        let ws = w.mat_vec(&fit.effects);
        for i in 0..n {
            prop_assert!((fit.residual[i] - (y[i] - xb[i] - ws[i])).abs() < 1e-9);
        }
    }
}

// ---------------------------------------------------------------------------
// 4. k-fold partitions
// ---------------------------------------------------------------------------
proptest! {
    #![proptest_config(ProptestConfig::with_cases(50))]

    #[test]
    fn prop_k_fold_covers_once(
        n in 2usize..200,
        k_raw in 2usize..12,
        seed in any::<u64>(),
    ) {
        let k = k_raw.min(n);
        let partition = Partition::k_fold(n, k, seed).unwrap();
        prop_assert_eq!(partition.len(), k);

        let mut seen = vec![0usize; n];
        for fold in partition.folds() {
            for &i in fold {
                seen[i] += 1;
            }
        }
        prop_assert!(seen.iter().all(|c| *c == 1));

        let sizes: Vec<usize> = partition.folds().iter().map(Vec::len).collect();
        let (lo, hi) = (sizes.iter().min().unwrap(), sizes.iter().max().unwrap());
        prop_assert!(hi - lo <= 1);

        let train = partition.training(0);
        prop_assert_eq!(train.len() + sizes[0], n);
    }
}

// ---------------------------------------------------------------------------
// 5. GRM symmetry and positive semi-definiteness
// ---------------------------------------------------------------------------
proptest! {
    #![proptest_config(ProptestConfig::with_cases(20))]

    #[test]
    fn prop_grm_symmetric_psd(seed in 0u64..300) {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let (n, m) = (8, 25);
        let columns: Vec<Vec<u8>> = (0..m)
            .map(|_| (0..n).map(|_| rng.gen_range(0..=3u8)).collect())
            .collect();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("g.raw");
        write_store_file(&path, &columns).unwrap();
        let store = GenotypeStore::with_computed_frequencies(
            &path,
            (0..n).map(|i| i.to_string()).collect(),
            (0..m).map(|j| format!("m{}", j)).collect(),
            ByteCoding::default(),
        )
        .unwrap();
        let markers: Vec<usize> = (0..m).collect();
        let (grm, _) = compute_grm(&store, &markers, &store.all_rows()).unwrap();

        for i in 0..n {
            for j in 0..n {
                prop_assert!((grm.get(i, j) - grm.get(j, i)).abs() < 1e-12);
            }
        }
        for _ in 0..10 {
            let v: Vec<f64> = (0..n).map(|_| rng.gen::<f64>() * 2.0 - 1.0).collect();
            let vgv = DenseMatrix::dot(&v, &grm.mat_vec(&v));
            prop_assert!(vgv >= -1e-10, "v'Gv = {}", vgv);
        }
    }
}
