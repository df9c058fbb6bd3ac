//! Estimate variance components over one or more kernels.
//!
//! genvar greml --pheno-file pheno.txt --pheno-col y --kernel grm.mtx --out fit

use std::fmt::Write as _;
use std::path::PathBuf;

use anyhow::{bail, Result};
use clap::Args;
use serde_json::json;
use tracing::{info, warn};

use genvar_core::reml::{AiReml, ExternalReml, RemlConfig, VarianceEstimator};
use genvar_geno::kernel_io::read_kernel;
use genvar_geno::sample::intersect_samples;
use genvar_linalg::DenseMatrix;

use super::{load_phenotypes, matrix_rows, split_list, with_suffix, write_json, PhenoArgs};

#[derive(Args)]
pub struct GremlArgs {
    #[command(flatten)]
    pheno: PhenoArgs,

    /// Kernel files (.mtx with .mtx.ids.txt); repeat for several kernels
    #[arg(long = "kernel", required = true)]
    kernels: Vec<PathBuf>,

    /// Starting variance components, comma-separated (k kernels + residual)
    #[arg(long)]
    init_theta: Option<String>,

    /// Maximum AI-REML iterations
    #[arg(long, default_value = "100")]
    max_iter: usize,

    /// Convergence tolerance on the largest variance component change
    #[arg(long, default_value = "1e-5")]
    tol: f64,

    /// External REML executable (in-process AI-REML when absent)
    #[arg(long)]
    external: Option<PathBuf>,

    /// Work directory for the external executable
    #[arg(long, default_value = "genvar_reml_work")]
    work_dir: PathBuf,

    /// Output prefix; writes <out>.reml.json and <out>.blup.txt
    #[arg(long)]
    out: PathBuf,
}

/// Phenotypes and kernels restricted to the individuals they share.
pub struct RemlInputs {
    pub ids: Vec<String>,
    pub y: Vec<f64>,
    pub x: Option<DenseMatrix>,
    pub kernels: Vec<DenseMatrix>,
}

pub fn load_reml_inputs(pheno: &PhenoArgs, kernel_paths: &[PathBuf]) -> Result<RemlInputs> {
    let phenos = load_phenotypes(pheno)?;
    let pheno_ids = phenos.ids();

    let mut kernels = Vec::with_capacity(kernel_paths.len());
    let mut kernel_ids = Vec::with_capacity(kernel_paths.len());
    for path in kernel_paths {
        let (k, ids) = read_kernel(path)?;
        info!("Kernel {}: {} individuals", path.display(), ids.len());
        kernels.push(k);
        kernel_ids.push(ids);
    }

    let mut sources: Vec<&[String]> = vec![pheno_ids.as_slice()];
    sources.extend(kernel_ids.iter().map(Vec::as_slice));
    let shared = intersect_samples(&sources);
    if shared.ids.len() < 2 {
        bail!(
            "Only {} individuals shared between phenotypes and kernels",
            shared.ids.len()
        );
    }
    info!("{} individuals shared by phenotypes and all kernels", shared.ids.len());

    let (y, x) = phenos.select(&shared.indices[0]);
    let kernels = kernels
        .iter()
        .zip(&shared.indices[1..])
        .map(|(k, idx)| k.select(idx, idx))
        .collect();
    Ok(RemlInputs {
        ids: shared.ids,
        y,
        x,
        kernels,
    })
}

pub fn parse_theta(s: Option<&str>) -> Result<Option<Vec<f64>>> {
    s.map(|s| {
        split_list(s)
            .iter()
            .map(|t| t.parse::<f64>().map_err(|e| anyhow::anyhow!("Bad theta '{}': {}", t, e)))
            .collect()
    })
    .transpose()
}

pub fn run(args: GremlArgs) -> Result<()> {
    info!("=== genvar greml ===");
    let inputs = load_reml_inputs(&args.pheno, &args.kernels)?;
    let init_theta = parse_theta(args.init_theta.as_deref())?;
    let config = RemlConfig {
        max_iter: args.max_iter,
        tol: args.tol,
        ..Default::default()
    };

    let estimator: Box<dyn VarianceEstimator> = match &args.external {
        Some(exe) => Box::new(ExternalReml {
            threads: rayon::current_num_threads(),
            config: config.clone(),
            ..ExternalReml::new(exe, &args.work_dir)
        }),
        None => Box::new(AiReml::new(config.clone())),
    };
    let fit = estimator.estimate(
        &inputs.y,
        inputs.x.as_ref(),
        &inputs.kernels,
        init_theta.as_deref(),
    )?;
    if !fit.converged {
        warn!(
            "REML stopped after {} iterations without converging; estimates are provisional",
            fit.iterations
        );
    }

    let summary = json!({
        "n": inputs.ids.len(),
        "kernels": args.kernels,
        "theta": fit.theta,
        "theta_cov": matrix_rows(&fit.theta_cov),
        "log_likelihood": fit.log_likelihood,
        "fixed_effects": fit.fixed_effects,
        "fixed_effect_cov": matrix_rows(&fit.fixed_effect_cov),
        "trace_pg": fit.trace_pg,
        "trace_vg": fit.trace_vg,
        "iterations": fit.iterations,
        "final_delta": fit.final_delta,
        "converged": fit.converged,
    });
    write_json(&summary, &with_suffix(&args.out, ".reml.json"))?;

    let mut table = String::from("IID\ty\tfitted\tpredicted\tresidual");
    for k in 0..fit.random_effects.len() {
        let _ = write!(table, "\tu{}", k + 1);
    }
    table.push('\n');
    for (i, id) in inputs.ids.iter().enumerate() {
        let _ = write!(
            table,
            "{}\t{}\t{}\t{}\t{}",
            id, inputs.y[i], fit.fitted[i], fit.predicted[i], fit.residuals[i]
        );
        for u in &fit.random_effects {
            let _ = write!(table, "\t{}", u[i]);
        }
        table.push('\n');
    }
    let blup_path = with_suffix(&args.out, ".blup.txt");
    std::fs::write(&blup_path, table)?;

    info!(
        "theta = {:?}, llik = {:.4}, {} iterations",
        fit.theta, fit.log_likelihood, fit.iterations
    );
    Ok(())
}
