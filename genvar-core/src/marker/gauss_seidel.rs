//! Gauss-Seidel sweep engine for ridge-penalized marker effects.
//!
//! Minimizes ||y - Xb - Ws||^2 + sum_j lambda_j s_j^2 one block of markers
//! at a time. The residual e = y - Xb - Ws is carried between blocks and
//! updated incrementally; it is never recomputed from scratch.

use genvar_linalg::decomposition::CholeskyDecomp;
use genvar_linalg::DenseMatrix;
use tracing::{debug, info, warn};

use super::source::{ColumnPass, ColumnSource};
use super::weights::{apply_adaptive_weights, correlation_p_value};
use super::{Lambda, MarkerSolverConfig};
use crate::error::{check_len, GenvarError, Result};

/// Working state of one solve: marker effects and the current residual.
#[derive(Debug, Clone, PartialEq)]
pub struct SweepState {
    pub s: Vec<f64>,
    pub e: Vec<f64>,
}

/// Column data and penalties for the markers of one block.
pub struct Block<'a> {
    /// Marker indices into `SweepState::s`.
    pub markers: &'a [usize],
    /// One column per marker, each of length n.
    pub columns: &'a [Vec<f64>],
    /// ||w_j||^2 per marker.
    pub ww: &'a [f64],
    pub lambda: &'a [f64],
}

/// One block update, (e, s) -> (e', s').
///
/// All markers of the block are solved against the same residual, then
/// the residual absorbs their combined change. Markers with ww = 0 are
/// pinned at 0 and leave e untouched. Returns the new state and the sum
/// of squared effect changes.
pub fn update_block(mut state: SweepState, block: &Block<'_>) -> (SweepState, f64) {
    let diffs: Vec<f64> = block
        .markers
        .iter()
        .enumerate()
        .map(|(k, &j)| {
            let ww = block.ww[k];
            if ww <= 0.0 {
                return 0.0;
            }
            let lhs = ww + block.lambda[k];
            let rhs = DenseMatrix::dot(&block.columns[k], &state.e) + ww * state.s[j];
            rhs / lhs - state.s[j]
        })
        .collect();

    let mut change_sq = 0.0;
    for ((k, &j), &d) in block.markers.iter().enumerate().zip(&diffs) {
        if block.ww[k] <= 0.0 {
            state.s[j] = 0.0;
            continue;
        }
        if d == 0.0 {
            continue;
        }
        state.s[j] += d;
        change_sq += d * d;
        for (ei, w) in state.e.iter_mut().zip(&block.columns[k]) {
            *ei -= w * d;
        }
    }
    (state, change_sq)
}

/// Relative tolerance on the centred sum of squares below which a column
/// counts as constant.
const CONSTANT_TOL: f64 = 1e-12;

/// True when every entry of `col` is the same value, up to rounding.
pub(crate) fn is_constant(col: &[f64]) -> bool {
    if col.is_empty() {
        return true;
    }
    let mean = col.iter().sum::<f64>() / col.len() as f64;
    let centred: f64 = col.iter().map(|v| (v - mean).powi(2)).sum();
    centred <= CONSTANT_TOL * DenseMatrix::dot(col, col)
}

/// Output of [`run_sweeps`].
#[derive(Debug, Clone)]
pub(crate) struct SweepOutcome {
    pub state: SweepState,
    pub fixed_effects: Vec<f64>,
    pub lambda: Vec<f64>,
    pub sweeps: usize,
    pub final_delta: f64,
    pub converged: bool,
}

/// Validate `sets` against `m` markers; `None` means one marker per set.
pub(crate) fn resolve_sets(sets: Option<&[Vec<usize>]>, m: usize) -> Result<Vec<Vec<usize>>> {
    let Some(sets) = sets else {
        return Ok((0..m).map(|j| vec![j]).collect());
    };
    let mut seen = vec![false; m];
    for set in sets {
        for &j in set {
            if j >= m {
                return Err(GenvarError::InvalidConfig(format!(
                    "set refers to marker {} but only {} markers were given",
                    j, m
                )));
            }
            if std::mem::replace(&mut seen[j], true) {
                return Err(GenvarError::InvalidConfig(format!(
                    "marker {} appears in more than one set",
                    j
                )));
            }
        }
    }
    let unassigned = seen.iter().filter(|s| !**s).count();
    if unassigned > 0 {
        debug!("{} markers are in no set and keep their initial effect", unassigned);
    }
    Ok(sets.iter().filter(|s| !s.is_empty()).cloned().collect())
}

fn penalty_vector(config: &MarkerSolverConfig, m: usize) -> Result<Vec<f64>> {
    let lambda = match &config.lambda {
        Lambda::Scalar(l) => vec![*l; m],
        Lambda::PerMarker(v) => {
            check_len("per-marker lambda", m, v.len())?;
            v.clone()
        }
    };
    if lambda.iter().any(|l| !l.is_finite() || *l < 0.0) {
        return Err(GenvarError::InvalidConfig(
            "lambda must be finite and non-negative".into(),
        ));
    }
    Ok(lambda)
}

/// OLS of y on X. Returns (b, y - Xb).
pub(crate) fn ols_residual(y: &[f64], x: Option<&DenseMatrix>) -> Result<(Vec<f64>, Vec<f64>)> {
    let Some(x) = x.filter(|x| x.ncols() > 0) else {
        return Ok((Vec::new(), y.to_vec()));
    };
    check_len("design rows", y.len(), x.nrows())?;
    let chol = CholeskyDecomp::new(&x.crossprod())
        .map_err(|e| GenvarError::numerical("Cholesky of X'X", e))?;
    let b = chol.solve(&x.tmat_vec(y));
    let xb = x.mat_vec(&b);
    let e = y.iter().zip(&xb).map(|(a, c)| a - c).collect();
    Ok((b, e))
}

/// Run the full solve: OLS start, marginal initial effects, optional
/// adaptive weights, then sweeps until delta <= tol or max_iter.
pub(crate) fn run_sweeps<S: ColumnSource>(
    source: &S,
    y: &[f64],
    x: Option<&DenseMatrix>,
    sets: Option<&[Vec<usize>]>,
    config: &MarkerSolverConfig,
) -> Result<SweepOutcome> {
    let n = source.n_rows();
    let m = source.n_cols();
    check_len("phenotype length", n, y.len())?;
    if m == 0 {
        return Err(GenvarError::shape("marker columns (at least)", 1, 0));
    }
    config.validate()?;
    let sets = resolve_sets(sets, m)?;
    let mut lambda = penalty_vector(config, m)?;

    let (fixed_effects, mut e) = ols_residual(y, x)?;

    // Initial pass: ww, marginal effects scaled by 1/m, adaptive p-values.
    let mut ww = vec![0.0; m];
    let mut s = vec![0.0; m];
    let mut p_values = Vec::with_capacity(if config.adaptive_weights { m } else { 0 });
    let mut ws = vec![0.0; n];
    {
        let mut col = vec![0.0; n];
        let mut pass = source.open_pass()?;
        for j in 0..m {
            pass.load(j, &mut col)?;
            // A column constant over the selected rows carries no signal
            // and is pinned at 0 like an all-zero one.
            ww[j] = if is_constant(&col) {
                0.0
            } else {
                DenseMatrix::dot(&col, &col)
            };
            if config.adaptive_weights {
                p_values.push(correlation_p_value(&col, &e));
            }
            if ww[j] > 0.0 {
                s[j] = DenseMatrix::dot(&col, &e) / ww[j] / m as f64;
                for (acc, w) in ws.iter_mut().zip(&col) {
                    *acc += w * s[j];
                }
            }
        }
    }
    for (ei, wi) in e.iter_mut().zip(&ws) {
        *ei -= wi;
    }
    if config.adaptive_weights {
        apply_adaptive_weights(&mut lambda, &p_values, config.min_weight);
    }

    let n_zero = ww.iter().filter(|w| **w <= 0.0).count();
    if n_zero > 0 {
        debug!("{} zero-variance markers fixed at effect 0", n_zero);
    }
    info!(
        "Gauss-Seidel: n={}, m={}, {} blocks, adaptive_weights={}",
        n,
        m,
        sets.len(),
        config.adaptive_weights
    );

    let mut state = SweepState { s, e };
    let scale = (m as f64).sqrt();
    let mut delta = f64::INFINITY;
    let mut sweeps = 0;
    let max_block = sets.iter().map(Vec::len).max().unwrap_or(0);
    let mut columns: Vec<Vec<f64>> = vec![vec![0.0; n]; max_block];
    let mut block_ww = Vec::with_capacity(max_block);
    let mut block_lambda = Vec::with_capacity(max_block);

    while sweeps < config.max_iter && delta > config.tol {
        sweeps += 1;
        let mut change_sq = 0.0;
        let mut pass = source.open_pass()?;
        for set in &sets {
            block_ww.clear();
            block_lambda.clear();
            for (k, &j) in set.iter().enumerate() {
                pass.load(j, &mut columns[k])?;
                block_ww.push(ww[j]);
                block_lambda.push(lambda[j]);
            }
            let block = Block {
                markers: set,
                columns: &columns[..set.len()],
                ww: &block_ww,
                lambda: &block_lambda,
            };
            let (next, dsq) = update_block(state, &block);
            state = next;
            change_sq += dsq;
        }
        delta = change_sq / scale;
        debug!("Sweep {}: delta={:.3e}", sweeps, delta);
    }

    let converged = delta <= config.tol;
    if converged {
        info!("Gauss-Seidel converged after {} sweeps", sweeps);
    } else {
        warn!(
            "Gauss-Seidel did not converge after {} sweeps (delta={:.3e}, tol={:.1e})",
            sweeps, delta, config.tol
        );
    }

    Ok(SweepOutcome {
        state,
        fixed_effects,
        lambda,
        sweeps,
        final_delta: delta,
        converged,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_marker_block_matches_closed_form() {
        // One marker, no penalty: one update lands on the OLS slope.
        let col = vec![1.0, -1.0, 2.0];
        let e = vec![2.0, -2.0, 4.0];
        let ww = DenseMatrix::dot(&col, &col);
        let state = SweepState { s: vec![0.0], e };
        let block = Block {
            markers: &[0],
            columns: std::slice::from_ref(&col),
            ww: &[ww],
            lambda: &[0.0],
        };
        let (next, change_sq) = update_block(state, &block);
        assert!((next.s[0] - 2.0).abs() < 1e-12);
        assert!(next.e.iter().all(|v| v.abs() < 1e-12));
        assert!((change_sq - 4.0).abs() < 1e-12);
    }

    #[test]
    fn test_zero_variance_marker_leaves_residual() {
        let cols = vec![vec![0.0, 0.0, 0.0], vec![1.0, 0.0, -1.0]];
        let e = vec![1.0, 2.0, 3.0];
        let state = SweepState {
            s: vec![0.0, 0.0],
            e: e.clone(),
        };
        let block = Block {
            markers: &[0],
            columns: &cols[..1],
            ww: &[0.0],
            lambda: &[0.0],
        };
        let (next, change_sq) = update_block(state, &block);
        assert_eq!(next.e, e);
        assert_eq!(next.s, vec![0.0, 0.0]);
        assert_eq!(change_sq, 0.0);
    }

    #[test]
    fn test_is_constant() {
        assert!(is_constant(&[0.0, 0.0, 0.0]));
        assert!(is_constant(&[1.3, 1.3, 1.3, 1.3]));
        assert!(is_constant(&[-0.7; 5]));
        assert!(!is_constant(&[1.0, 1.0, 1.0 + 1e-3]));
        assert!(!is_constant(&[0.0, 1e-8, 0.0]));
    }

    #[test]
    fn test_update_keeps_residual_consistent() {
        let cols = vec![vec![1.0, 2.0, 0.5, -1.0], vec![0.0, 1.0, -1.0, 1.0]];
        let y = vec![3.0, 1.0, -2.0, 0.5];
        let ww: Vec<f64> = cols.iter().map(|c| DenseMatrix::dot(c, c)).collect();
        let mut state = SweepState {
            s: vec![0.0, 0.0],
            e: y.clone(),
        };
        for _ in 0..5 {
            let block = Block {
                markers: &[0, 1],
                columns: &cols,
                ww: &ww,
                lambda: &[0.5, 0.5],
            };
            state = update_block(state, &block).0;
            for i in 0..4 {
                let fitted = cols[0][i] * state.s[0] + cols[1][i] * state.s[1];
                assert!((state.e[i] - (y[i] - fitted)).abs() < 1e-12);
            }
        }
    }

    #[test]
    fn test_resolve_sets() {
        assert_eq!(resolve_sets(None, 3).unwrap(), vec![vec![0], vec![1], vec![2]]);
        let sets = vec![vec![0, 2], vec![], vec![1]];
        assert_eq!(resolve_sets(Some(&sets), 3).unwrap(), vec![vec![0, 2], vec![1]]);
        assert!(resolve_sets(Some(&[vec![0, 3]]), 3).is_err());
        assert!(resolve_sets(Some(&[vec![0, 1], vec![1]]), 3).is_err());
    }

    #[test]
    fn test_ols_residual_is_orthogonal_to_design() {
        let x = DenseMatrix::from_row_major(4, 2, &[1.0, 0.0, 1.0, 1.0, 1.0, 2.0, 1.0, 3.0]);
        let y = vec![1.0, 3.0, 2.0, 5.0];
        let (b, e) = ols_residual(&y, Some(&x)).unwrap();
        assert_eq!(b.len(), 2);
        for v in x.tmat_vec(&e) {
            assert!(v.abs() < 1e-10);
        }
        let collinear = DenseMatrix::from_row_major(4, 2, &[1.0, 2.0, 1.0, 2.0, 1.0, 2.0, 1.0, 2.0]);
        assert!(matches!(
            ols_residual(&y, Some(&collinear)),
            Err(GenvarError::NumericalFailure { .. })
        ));
    }
}
