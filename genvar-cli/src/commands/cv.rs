//! Cross-validate REML or marker-effect prediction.
//!
//! genvar cv --method greml --kernel grm.mtx --pheno-file pheno.txt --pheno-col y --out cv
//! genvar cv --method gsolve --store data.meta.json --pheno-file pheno.txt --pheno-col y --out cv

use std::fmt::Write as _;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Args, ValueEnum};
use tracing::info;

use genvar_core::cv::{cross_validate, CvOptions, CvResult, Partition, RemlFolds, StreamedMarkerFolds};
use genvar_core::reml::{AiReml, RemlConfig};
use genvar_geno::GenotypeStore;

use super::greml::{load_reml_inputs, parse_theta};
use super::gsolve::{shared_individuals, SolverArgs};
use super::{load_phenotypes, marker_ids, with_suffix, write_json, PhenoArgs};

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Method {
    /// AI-REML over kernels, BLUP for held-out individuals
    Greml,
    /// Streamed Gauss-Seidel marker effects
    Gsolve,
}

#[derive(Args)]
pub struct CvArgs {
    #[command(flatten)]
    pheno: PhenoArgs,

    /// Prediction method
    #[arg(long, value_enum)]
    method: Method,

    /// Kernel files for greml (repeatable)
    #[arg(long = "kernel")]
    kernels: Vec<PathBuf>,

    /// Starting variance components for greml, comma-separated
    #[arg(long)]
    init_theta: Option<String>,

    /// Maximum AI-REML iterations
    #[arg(long, default_value = "100")]
    reml_max_iter: usize,

    /// Genotype store metadata for gsolve
    #[arg(long)]
    store: Option<PathBuf>,

    /// Marker IDs for gsolve, one per line (default: all)
    #[arg(long)]
    markers: Option<PathBuf>,

    #[command(flatten)]
    solver: SolverArgs,

    /// Number of folds
    #[arg(long, default_value = "5")]
    folds: usize,

    /// Random seed for the fold assignment
    #[arg(long, default_value = "42")]
    seed: u64,

    /// Run folds one after another instead of on the thread pool
    #[arg(long, default_value = "false")]
    sequential: bool,

    /// Output prefix; writes <out>.cv.json and <out>.cv.txt
    #[arg(long)]
    out: PathBuf,
}

pub fn run(args: CvArgs) -> Result<()> {
    info!("=== genvar cv ({:?}) ===", args.method);
    let options = CvOptions {
        folds: args.folds,
        seed: args.seed,
        parallel: !args.sequential,
    };

    let (ids, result) = match args.method {
        Method::Greml => {
            if args.kernels.is_empty() {
                bail!("--method greml needs at least one --kernel");
            }
            let inputs = load_reml_inputs(&args.pheno, &args.kernels)?;
            let estimator = AiReml::new(RemlConfig {
                max_iter: args.reml_max_iter,
                ..Default::default()
            });
            let model = RemlFolds {
                estimator: &estimator,
                x: inputs.x.as_ref(),
                kernels: &inputs.kernels,
                initial_theta: parse_theta(args.init_theta.as_deref())?,
            };
            let partition = Partition::k_fold(inputs.y.len(), options.folds, options.seed)?;
            let result = cross_validate(&model, &inputs.y, &partition, options.parallel)?;
            (inputs.ids, result)
        }
        Method::Gsolve => {
            let store_path = args.store.as_ref().context("--method gsolve needs --store")?;
            let store = GenotypeStore::load(store_path)?;
            let phenos = load_phenotypes(&args.pheno)?;
            let (ids, subset) = shared_individuals(&phenos, &store)?;
            let (y, x) = phenos.select(&subset);
            let requested = marker_ids(&store, args.markers.as_deref())?;
            let config = args.solver.config();
            let model = StreamedMarkerFolds::from_ids(&store, &requested, &ids, x.as_ref(), &config)?;
            let partition = Partition::k_fold(y.len(), options.folds, options.seed)?;
            let result = cross_validate(&model, &y, &partition, options.parallel)?;
            (ids, result)
        }
    };

    report(&ids, &result, &options, &args.out)
}

fn report(ids: &[String], result: &CvResult, options: &CvOptions, out: &std::path::Path) -> Result<()> {
    for f in &result.folds {
        info!(
            "Fold {}: n_train={}, n_test={}, r={:.4}, mspe={:.4}",
            f.fold, f.n_train, f.accuracy.n, f.accuracy.correlation, f.accuracy.mspe
        );
    }
    info!(
        "Pooled: r={:.4}, slope={:.4}, intercept={:.4}, mspe={:.4}",
        result.pooled.correlation, result.pooled.slope, result.pooled.intercept, result.pooled.mspe
    );

    let summary = serde_json::json!({
        "options": options,
        "folds": result.folds,
        "pooled": result.pooled,
    });
    write_json(&summary, &with_suffix(out, ".cv.json"))?;

    let mut table = String::from("IID\tfold\tobserved\tpredicted\n");
    for k in 0..result.individual.len() {
        let _ = writeln!(
            table,
            "{}\t{}\t{}\t{}",
            ids[result.individual[k]], result.fold_index[k], result.observed[k], result.predicted[k]
        );
    }
    std::fs::write(with_suffix(out, ".cv.txt"), table)?;
    Ok(())
}
