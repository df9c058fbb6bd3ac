//! Solve ridge marker effects by Gauss-Seidel over a genotype store.
//!
//! genvar gsolve --store data.meta.json --pheno-file pheno.txt --pheno-col y --out model

use std::fmt::Write as _;
use std::path::PathBuf;

use anyhow::{bail, Result};
use clap::Args;
use tracing::{info, warn};

use genvar_core::marker::{
    solve_marker_effects_qr, solve_marker_effects_streamed, Lambda, MarkerFit, MarkerSolverConfig,
};
use genvar_core::model::{save_model, save_model_json, MarkerModel};
use genvar_geno::sample::intersect_samples;
use genvar_geno::GenotypeStore;
use genvar_linalg::DenseMatrix;

use super::{load_phenotypes, marker_ids, with_suffix, Phenotypes, PhenoArgs};

/// Solver options shared with `cv`.
#[derive(Args, Debug, Clone)]
pub struct SolverArgs {
    /// Ridge penalty applied to every marker
    #[arg(long, default_value = "1.0")]
    pub lambda: f64,

    /// Scale the penalty per marker by its association with the phenotype
    #[arg(long, default_value = "false")]
    pub adaptive_weights: bool,

    /// Lower bound on 1 - p in adaptive weighting
    #[arg(long, default_value = "0.01")]
    pub min_weight: f64,

    /// Maximum Gauss-Seidel sweeps
    #[arg(long, default_value = "500")]
    pub max_iter: usize,

    /// Convergence tolerance on sum of squared effect changes / sqrt(m)
    #[arg(long, default_value = "1e-7")]
    pub tol: f64,
}

impl SolverArgs {
    pub fn config(&self) -> MarkerSolverConfig {
        MarkerSolverConfig {
            lambda: Lambda::Scalar(self.lambda),
            adaptive_weights: self.adaptive_weights,
            min_weight: self.min_weight,
            max_iter: self.max_iter,
            tol: self.tol,
        }
    }
}

#[derive(Args)]
pub struct GsolveArgs {
    #[command(flatten)]
    pheno: PhenoArgs,

    #[command(flatten)]
    solver: SolverArgs,

    /// Genotype store metadata (.meta.json)
    #[arg(long)]
    store: PathBuf,

    /// Marker IDs to fit, one per line (default: all)
    #[arg(long)]
    markers: Option<PathBuf>,

    /// Orthogonalize markers in blocks of this size and solve in memory
    #[arg(long)]
    qr_block_size: Option<usize>,

    /// Output prefix; writes <out>.gvm, <out>.effects.txt, <out>.pred.txt
    #[arg(long)]
    out: PathBuf,

    /// Also save a JSON sidecar of the model
    #[arg(long, default_value = "false")]
    save_json: bool,
}

/// Individuals with phenotypes that are also in the store, in phenotype
/// order: (ids, positions into the phenotype rows).
pub fn shared_individuals(phenos: &Phenotypes, store: &GenotypeStore) -> Result<(Vec<String>, Vec<usize>)> {
    let pheno_ids = phenos.ids();
    let shared = intersect_samples(&[pheno_ids.as_slice(), store.individual_ids()]);
    if shared.ids.len() < 2 {
        bail!(
            "Only {} individuals shared between phenotypes and the genotype store",
            shared.ids.len()
        );
    }
    info!("{} individuals shared by phenotypes and genotypes", shared.ids.len());
    let mut indices = shared.indices;
    Ok((shared.ids, indices.swap_remove(0)))
}

/// Standardized genotypes of `markers` for `rows`, read in one pass.
fn dense_markers(store: &GenotypeStore, markers: &[usize], rows: &[usize]) -> Result<DenseMatrix> {
    let mut pass = store.open_pass()?;
    let mut columns = Vec::with_capacity(markers.len());
    for &j in markers {
        let mut col = vec![0.0; rows.len()];
        pass.read_standardized(j, rows, &mut col)?;
        columns.push(col);
    }
    Ok(DenseMatrix::from_columns(&columns))
}

pub fn run(args: GsolveArgs) -> Result<()> {
    info!("=== genvar gsolve ===");
    let store = GenotypeStore::load(&args.store)?;
    let phenos = load_phenotypes(&args.pheno)?;
    let (ids, subset) = shared_individuals(&phenos, &store)?;
    let (y, x) = phenos.select(&subset);
    let requested = marker_ids(&store, args.markers.as_deref())?;
    let config = args.solver.config();

    let fit: MarkerFit = match args.qr_block_size {
        None => solve_marker_effects_streamed(&y, x.as_ref(), &store, &requested, Some(ids.as_slice()), &config)?,
        Some(block_size) => {
            let selection = store.resolve_markers(&requested);
            let rows = store.resolve_individuals(&ids).rows;
            let w = dense_markers(&store, &selection.indices, &rows)?;
            let mut fit = solve_marker_effects_qr(&y, x.as_ref(), &w, block_size, &config)?;
            fit.marker_ids = selection
                .indices
                .iter()
                .map(|&j| store.marker_ids()[j].clone())
                .collect();
            fit.markers_dropped = selection.n_missing;
            fit
        }
    };
    if fit.markers_dropped > 0 {
        warn!("{} requested markers were not in the genotype store", fit.markers_dropped);
    }
    if !fit.converged {
        warn!(
            "Solver stopped after {} sweeps (delta = {:.3e})",
            fit.sweeps, fit.final_delta
        );
    }

    let model = MarkerModel::from_fit(&fit, config.lambda.clone());
    save_model(&model, &with_suffix(&args.out, ".gvm"))?;
    if args.save_json {
        save_model_json(&model, &with_suffix(&args.out, ".gvm.json"))?;
    }

    let mut effects = String::from("marker\teffect\tlambda\n");
    for ((id, s), l) in fit.marker_ids.iter().zip(&fit.effects).zip(&fit.lambda) {
        let _ = writeln!(effects, "{}\t{}\t{}", id, s, l);
    }
    std::fs::write(with_suffix(&args.out, ".effects.txt"), effects)?;

    let mut pred = String::from("IID\ty\tgenetic_value\tpredicted\tresidual\n");
    for (i, id) in ids.iter().enumerate() {
        let _ = writeln!(
            pred,
            "{}\t{}\t{}\t{}\t{}",
            id, y[i], fit.fitted_genetic_value[i], fit.predicted[i], fit.residual[i]
        );
    }
    std::fs::write(with_suffix(&args.out, ".pred.txt"), pred)?;

    info!(
        "Solved {} marker effects for {} individuals in {} sweeps",
        fit.effects.len(),
        ids.len(),
        fit.sweeps
    );
    Ok(())
}
