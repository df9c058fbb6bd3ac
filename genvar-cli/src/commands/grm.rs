//! Build a dense GRM from a genotype store and write it as a kernel file.
//!
//! genvar grm --store data.meta.json --out grm.mtx

use std::path::PathBuf;

use anyhow::Result;
use clap::Args;
use tracing::info;

use genvar_core::grm::compute_grm;
use genvar_geno::kernel_io::write_kernel;
use genvar_geno::GenotypeStore;

use super::{select_markers, select_rows};

#[derive(Args)]
pub struct GrmArgs {
    /// Genotype store metadata (.meta.json)
    #[arg(long)]
    store: PathBuf,

    /// Marker IDs to use, one per line (default: all)
    #[arg(long)]
    markers: Option<PathBuf>,

    /// Individual IDs to keep, one per line (default: all)
    #[arg(long)]
    keep: Option<PathBuf>,

    /// Output kernel (.mtx); IDs go to <out>.ids.txt
    #[arg(long)]
    out: PathBuf,
}

pub fn run(args: GrmArgs) -> Result<()> {
    info!("=== genvar grm ===");
    let store = GenotypeStore::load(&args.store)?;
    let markers = select_markers(&store, args.markers.as_deref())?;
    let (rows, ids) = select_rows(&store, args.keep.as_deref())?;

    let (grm, used) = compute_grm(&store, &markers, &rows)?;
    if used == 0 {
        anyhow::bail!("No marker varies among the selected individuals");
    }
    write_kernel(&grm, &ids, &args.out)?;
    info!(
        "GRM over {} individuals from {} markers written to {}",
        ids.len(),
        used,
        args.out.display()
    );
    Ok(())
}
