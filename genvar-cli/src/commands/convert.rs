//! Convert PLINK bed/bim/fam into a byte-per-genotype store.
//!
//! genvar convert --bfile data --out data_store

use std::path::PathBuf;

use anyhow::Result;
use clap::Args;
use tracing::info;

use genvar_geno::plink::PlinkReader;
use genvar_geno::ByteCoding;

use super::with_suffix;

#[derive(Args)]
pub struct ConvertArgs {
    /// PLINK file prefix (bed/bim/fam)
    #[arg(long)]
    bfile: PathBuf,

    /// Output prefix; writes <out>.raw and <out>.meta.json
    #[arg(long)]
    out: PathBuf,

    /// Write plain 0/1/2 bytes and reject missing genotypes
    #[arg(long, default_value = "false")]
    plain: bool,
}

pub fn run(args: ConvertArgs) -> Result<()> {
    let coding = if args.plain {
        ByteCoding::plain()
    } else {
        ByteCoding::default()
    };
    info!("=== genvar convert ===");
    info!("PLINK prefix: {}", args.bfile.display());

    let plink = PlinkReader::new(&args.bfile)?;
    let raw = with_suffix(&args.out, ".raw");
    let meta = with_suffix(&args.out, ".meta.json");
    let store = plink.convert_to_store(&raw, &meta, coding)?;

    info!(
        "Store: {} individuals x {} markers, metadata at {}",
        store.n_individuals(),
        store.n_markers(),
        meta.display()
    );
    Ok(())
}
