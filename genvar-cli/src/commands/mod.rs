//! Subcommands and the input handling they share.

pub mod convert;
pub mod cv;
pub mod greml;
pub mod grm;
pub mod gsolve;
pub mod score;

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::Args;
use tracing::info;

use genvar_geno::phenotype::{parse_phenotype_file, PhenotypeTable};
use genvar_geno::GenotypeStore;
use genvar_linalg::DenseMatrix;

/// Phenotype file options shared by the fitting commands.
#[derive(Args, Debug, Clone)]
pub struct PhenoArgs {
    /// Phenotype file (tab or space delimited, with header)
    #[arg(long)]
    pub pheno_file: PathBuf,

    /// Phenotype column name
    #[arg(long)]
    pub pheno_col: String,

    /// Covariate column names (comma-separated)
    #[arg(long, default_value = "")]
    pub covar_cols: String,

    /// Individual ID column name
    #[arg(long, default_value = "IID")]
    pub id_col: String,

    /// Fit without an intercept or covariates
    #[arg(long, default_value = "false")]
    pub no_fixed: bool,
}

/// Phenotypes of complete individuals, in file order.
pub struct Phenotypes {
    pub table: PhenotypeTable,
    /// Table rows with phenotype and covariates present.
    pub rows: Vec<usize>,
    pub no_fixed: bool,
}

impl Phenotypes {
    pub fn ids(&self) -> Vec<String> {
        self.rows.iter().map(|&r| self.table.ids[r].clone()).collect()
    }

    /// Phenotype and design for `subset` (positions into `rows`).
    pub fn select(&self, subset: &[usize]) -> (Vec<f64>, Option<DenseMatrix>) {
        let rows: Vec<usize> = subset.iter().map(|&k| self.rows[k]).collect();
        let y = self.table.values_at(&rows);
        let x = (!self.no_fixed).then(|| self.table.design_matrix(&rows));
        (y, x)
    }
}

pub fn load_phenotypes(args: &PhenoArgs) -> Result<Phenotypes> {
    let covar_cols = split_list(&args.covar_cols);
    let table = parse_phenotype_file(&args.pheno_file, &args.pheno_col, &covar_cols, &args.id_col)?;
    let rows = table.complete_rows();
    info!(
        "Loaded phenotype '{}' for {} individuals ({} complete, {} covariates)",
        args.pheno_col,
        table.ids.len(),
        rows.len(),
        covar_cols.len()
    );
    if rows.is_empty() {
        bail!("No individual has a complete phenotype and covariate record");
    }
    Ok(Phenotypes {
        table,
        rows,
        no_fixed: args.no_fixed,
    })
}

pub fn split_list(s: &str) -> Vec<String> {
    s.split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

/// One ID per line (first whitespace-separated field).
pub fn read_id_list(path: &Path) -> Result<Vec<String>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read ID list: {}", path.display()))?;
    Ok(text
        .lines()
        .filter_map(|l| l.split_whitespace().next())
        .map(str::to_string)
        .collect())
}

/// Store marker indices (ascending) for an optional marker list file.
pub fn select_markers(store: &GenotypeStore, markers: Option<&Path>) -> Result<Vec<usize>> {
    match markers {
        Some(path) => {
            let ids = read_id_list(path)?;
            let sel = store.resolve_markers(&ids);
            if sel.indices.is_empty() {
                bail!("None of the {} listed markers are in the genotype store", ids.len());
            }
            Ok(sel.indices)
        }
        None => Ok((0..store.n_markers()).collect()),
    }
}

/// Marker IDs for an optional marker list file; all store markers otherwise.
pub fn marker_ids(store: &GenotypeStore, markers: Option<&Path>) -> Result<Vec<String>> {
    match markers {
        Some(path) => read_id_list(path),
        None => Ok(store.marker_ids().to_vec()),
    }
}

/// Store rows for an optional keep file; all rows otherwise.
pub fn select_rows(store: &GenotypeStore, keep: Option<&Path>) -> Result<(Vec<usize>, Vec<String>)> {
    match keep {
        Some(path) => {
            let ids = read_id_list(path)?;
            let sel = store.resolve_individuals(&ids);
            if sel.n_missing > 0 {
                tracing::warn!("{} listed individuals are not in the genotype store", sel.n_missing);
            }
            let kept = sel.rows.iter().map(|&r| store.individual_ids()[r].clone()).collect();
            Ok((sel.rows, kept))
        }
        None => Ok((store.all_rows(), store.individual_ids().to_vec())),
    }
}

pub fn write_json<T: serde::Serialize>(value: &T, path: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    std::fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))?;
    info!("Wrote {}", path.display());
    Ok(())
}

pub fn with_suffix(prefix: &Path, suffix: &str) -> PathBuf {
    let mut s = prefix.as_os_str().to_os_string();
    s.push(suffix);
    PathBuf::from(s)
}

pub fn matrix_rows(m: &DenseMatrix) -> Vec<Vec<f64>> {
    (0..m.nrows())
        .map(|i| (0..m.ncols()).map(|j| m.get(i, j)).collect())
        .collect()
}
