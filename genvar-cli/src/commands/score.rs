//! Score individuals in a genotype store with a saved marker model.
//!
//! genvar score --store data.meta.json --model model.gvm --out scores.txt

use std::fmt::Write as _;
use std::path::PathBuf;

use anyhow::Result;
use clap::Args;
use tracing::{info, warn};

use genvar_core::model::{load_model, model_summary};
use genvar_core::score::score_model;
use genvar_geno::GenotypeStore;

use super::select_rows;

#[derive(Args)]
pub struct ScoreArgs {
    /// Genotype store metadata (.meta.json)
    #[arg(long)]
    store: PathBuf,

    /// Marker model written by gsolve (.gvm)
    #[arg(long)]
    model: PathBuf,

    /// Individual IDs to score, one per line (default: all)
    #[arg(long)]
    keep: Option<PathBuf>,

    /// Output table of genetic scores
    #[arg(long)]
    out: PathBuf,
}

pub fn run(args: ScoreArgs) -> Result<()> {
    info!("=== genvar score ===");
    let model = load_model(&args.model)?;
    info!("{}", model_summary(&model));
    let store = GenotypeStore::load(&args.store)?;
    let (rows, ids) = select_rows(&store, args.keep.as_deref())?;

    let (scores, n_missing) = score_model(&store, &model, &rows)?;
    if n_missing > 0 {
        warn!(
            "{} of {} model markers are absent from the store",
            n_missing,
            model.n_markers()
        );
    }

    let mut out = String::from("IID\tscore\n");
    for (id, s) in ids.iter().zip(&scores) {
        let _ = writeln!(out, "{}\t{}", id, s);
    }
    std::fs::write(&args.out, out)?;
    info!("Scored {} individuals into {}", ids.len(), args.out.display());
    Ok(())
}
