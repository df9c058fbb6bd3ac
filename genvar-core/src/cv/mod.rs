//! Cross-validation of REML and marker-effect predictions.
//!
//! Each fold refits on the individuals it does not hold out and predicts
//! the held-out ones. Folds own all of their working state, so they run
//! sequentially or on the rayon pool with identical results.

pub mod accuracy;
pub mod partition;

use genvar_geno::GenotypeStore;
use genvar_linalg::DenseMatrix;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{check_len, GenvarError, Result};
use crate::marker::streamed::solve_streamed_rows;
use crate::marker::{solve_marker_effects, MarkerSolverConfig};
use crate::reml::VarianceEstimator;
use crate::score::score_streamed;

pub use accuracy::Accuracy;
pub use partition::Partition;

/// Cross-validation settings used by the CLI.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CvOptions {
    pub folds: usize,
    pub seed: u64,
    pub parallel: bool,
}

impl Default for CvOptions {
    fn default() -> Self {
        Self {
            folds: 5,
            seed: 42,
            parallel: true,
        }
    }
}

/// Predictions for one fold's held-out individuals.
#[derive(Debug, Clone, Default)]
pub struct FoldPrediction {
    pub predicted: Vec<f64>,
    pub log_likelihood: Option<f64>,
    pub theta: Option<Vec<f64>>,
}

/// Something that can be refit on a training subset and predict the rest.
///
/// `train` and `test` index the full phenotype vector; `y_train` is the
/// phenotype restricted to `train`.
pub trait FoldModel: Sync {
    fn fit_predict(&self, y_train: &[f64], train: &[usize], test: &[usize])
        -> Result<FoldPrediction>;

    /// Check that the model's inputs cover `n` individuals. Called once by
    /// [`cross_validate`] before any fold is fit.
    fn check_size(&self, _n: usize) -> Result<()> {
        Ok(())
    }
}

impl<F> FoldModel for F
where
    F: Fn(&[f64], &[usize], &[usize]) -> Result<FoldPrediction> + Sync,
{
    fn fit_predict(
        &self,
        y_train: &[f64],
        train: &[usize],
        test: &[usize],
    ) -> Result<FoldPrediction> {
        self(y_train, train, test)
    }
}

/// Per-fold summary row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FoldAccuracy {
    pub fold: usize,
    pub n_train: usize,
    pub accuracy: Accuracy,
    pub log_likelihood: Option<f64>,
    pub theta: Option<Vec<f64>>,
}

/// Result of [`cross_validate`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CvResult {
    pub folds: Vec<FoldAccuracy>,
    /// Accuracy over all held-out predictions together.
    pub pooled: Accuracy,
    /// Held-out individual, observed value, prediction and fold, one entry
    /// per prediction in fold order.
    pub individual: Vec<usize>,
    pub observed: Vec<f64>,
    pub predicted: Vec<f64>,
    pub fold_index: Vec<usize>,
}

/// Refit `model` once per fold of `partition` and score its predictions.
pub fn cross_validate<M: FoldModel + ?Sized>(
    model: &M,
    y: &[f64],
    partition: &Partition,
    parallel: bool,
) -> Result<CvResult> {
    check_len("partition size", y.len(), partition.n())?;
    model.check_size(y.len())?;
    info!(
        "Cross-validating over {} folds ({} individuals, parallel={})",
        partition.len(),
        y.len(),
        parallel
    );

    let run_fold = |f: usize| -> Result<(FoldAccuracy, Vec<f64>)> {
        let test = &partition.folds()[f];
        let train = partition.training(f);
        let y_train: Vec<f64> = train.iter().map(|&i| y[i]).collect();
        let pred = model.fit_predict(&y_train, &train, test)?;
        check_len("fold predictions", test.len(), pred.predicted.len())?;

        let observed: Vec<f64> = test.iter().map(|&i| y[i]).collect();
        let accuracy = Accuracy::compute(&observed, &pred.predicted)?;
        debug!(
            "Fold {}: n_test={}, r={:.4}, mspe={:.4}",
            f, accuracy.n, accuracy.correlation, accuracy.mspe
        );
        Ok((
            FoldAccuracy {
                fold: f,
                n_train: train.len(),
                accuracy,
                log_likelihood: pred.log_likelihood,
                theta: pred.theta,
            },
            pred.predicted,
        ))
    };

    let results: Vec<(FoldAccuracy, Vec<f64>)> = if parallel {
        (0..partition.len())
            .into_par_iter()
            .map(run_fold)
            .collect::<Result<_>>()?
    } else {
        (0..partition.len()).map(run_fold).collect::<Result<_>>()?
    };

    let mut individual = Vec::new();
    let mut observed = Vec::new();
    let mut predicted = Vec::new();
    let mut fold_index = Vec::new();
    let mut folds = Vec::with_capacity(results.len());
    for (row, preds) in results {
        for (&i, p) in partition.folds()[row.fold].iter().zip(preds) {
            individual.push(i);
            observed.push(y[i]);
            predicted.push(p);
            fold_index.push(row.fold);
        }
        folds.push(row);
    }
    let pooled = Accuracy::compute(&observed, &predicted)?;
    info!(
        "Pooled out-of-fold accuracy: r={:.4}, slope={:.4}, mspe={:.4}",
        pooled.correlation, pooled.slope, pooled.mspe
    );

    Ok(CvResult {
        folds,
        pooled,
        individual,
        observed,
        predicted,
        fold_index,
    })
}

fn rows_of(x: Option<&DenseMatrix>, rows: &[usize]) -> Option<DenseMatrix> {
    x.map(|x| x.select_rows(rows))
}

fn check_design(x: Option<&DenseMatrix>, n: usize) -> Result<()> {
    match x {
        Some(x) => check_len("fixed-effect design rows", n, x.nrows()),
        None => Ok(()),
    }
}

fn add_fixed(pred: &mut [f64], x_test: Option<&DenseMatrix>, b: &[f64]) {
    if let Some(x) = x_test.filter(|x| x.ncols() > 0) {
        for (p, v) in pred.iter_mut().zip(x.mat_vec(b)) {
            *p += v;
        }
    }
}

/// REML folds: refit variance components on the training individuals and
/// predict held-out ones by BLUP through the kernels' cross blocks.
pub struct RemlFolds<'a, E: VarianceEstimator> {
    pub estimator: &'a E,
    pub x: Option<&'a DenseMatrix>,
    pub kernels: &'a [DenseMatrix],
    pub initial_theta: Option<Vec<f64>>,
}

impl<E: VarianceEstimator> FoldModel for RemlFolds<'_, E> {
    fn check_size(&self, n: usize) -> Result<()> {
        check_design(self.x, n)?;
        for k in self.kernels {
            check_len("kernel rows", n, k.nrows())?;
            check_len("kernel columns", n, k.ncols())?;
        }
        Ok(())
    }

    fn fit_predict(
        &self,
        y_train: &[f64],
        train: &[usize],
        test: &[usize],
    ) -> Result<FoldPrediction> {
        let x_train = rows_of(self.x, train);
        let k_train: Vec<DenseMatrix> = self.kernels.iter().map(|k| k.select(train, train)).collect();
        let fit = self.estimator.estimate(
            y_train,
            x_train.as_ref(),
            &k_train,
            self.initial_theta.as_deref(),
        )?;

        let cross: Vec<DenseMatrix> = self.kernels.iter().map(|k| k.select(test, train)).collect();
        let x_test = rows_of(self.x, test);
        let predicted = fit.predict(&cross, x_test.as_ref())?;
        Ok(FoldPrediction {
            predicted,
            log_likelihood: Some(fit.log_likelihood),
            theta: Some(fit.theta),
        })
    }
}

/// Marker folds over an in-memory marker matrix.
pub struct MarkerFolds<'a> {
    pub x: Option<&'a DenseMatrix>,
    pub w: &'a DenseMatrix,
    pub sets: Option<&'a [Vec<usize>]>,
    pub config: &'a MarkerSolverConfig,
}

impl FoldModel for MarkerFolds<'_> {
    fn check_size(&self, n: usize) -> Result<()> {
        check_design(self.x, n)?;
        check_len("marker matrix rows", n, self.w.nrows())
    }

    fn fit_predict(
        &self,
        y_train: &[f64],
        train: &[usize],
        test: &[usize],
    ) -> Result<FoldPrediction> {
        let x_train = rows_of(self.x, train);
        let fit = solve_marker_effects(
            y_train,
            x_train.as_ref(),
            &self.w.select_rows(train),
            self.sets,
            self.config,
        )?;
        let mut predicted = self.w.select_rows(test).mat_vec(&fit.effects);
        add_fixed(&mut predicted, rows_of(self.x, test).as_ref(), &fit.fixed_effects);
        Ok(FoldPrediction {
            predicted,
            ..Default::default()
        })
    }
}

/// Marker folds streaming genotypes from a store.
///
/// `rows[i]` is the store row of phenotype entry `i`; `markers` are store
/// marker indices in ascending order.
pub struct StreamedMarkerFolds<'a> {
    pub store: &'a GenotypeStore,
    pub markers: Vec<usize>,
    pub rows: Vec<usize>,
    pub x: Option<&'a DenseMatrix>,
    pub config: &'a MarkerSolverConfig,
}

impl<'a> StreamedMarkerFolds<'a> {
    /// Resolve marker and individual IDs against `store`. Missing markers
    /// are dropped with a warning; every individual must be present.
    pub fn from_ids<S: AsRef<str>>(
        store: &'a GenotypeStore,
        marker_ids: &[S],
        individual_ids: &[S],
        x: Option<&'a DenseMatrix>,
        config: &'a MarkerSolverConfig,
    ) -> Result<Self> {
        let markers = store.resolve_markers(marker_ids).indices;
        let sel = store.resolve_individuals(individual_ids);
        if sel.n_missing > 0 {
            return Err(GenvarError::shape(
                "individuals found in genotype store",
                individual_ids.len(),
                sel.rows.len(),
            ));
        }
        Ok(Self {
            store,
            markers,
            rows: sel.rows,
            x,
            config,
        })
    }
}

impl FoldModel for StreamedMarkerFolds<'_> {
    fn check_size(&self, n: usize) -> Result<()> {
        check_design(self.x, n)?;
        check_len("genotype store rows", n, self.rows.len())
    }

    fn fit_predict(
        &self,
        y_train: &[f64],
        train: &[usize],
        test: &[usize],
    ) -> Result<FoldPrediction> {
        let train_rows: Vec<usize> = train.iter().map(|&i| self.rows[i]).collect();
        let test_rows: Vec<usize> = test.iter().map(|&i| self.rows[i]).collect();
        let x_train = rows_of(self.x, train);
        let fit = solve_streamed_rows(
            y_train,
            x_train.as_ref(),
            self.store,
            self.markers.clone(),
            train_rows,
            self.config,
        )?;
        let mut predicted = score_streamed(self.store, &self.markers, &fit.effects, &test_rows)?;
        add_fixed(&mut predicted, rows_of(self.x, test).as_ref(), &fit.fixed_effects);
        Ok(FoldPrediction {
            predicted,
            ..Default::default()
        })
    }
}
