//! genvar: variance components and marker effects for quantitative traits.
//!
//! CLI entry point using clap for argument parsing.

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "genvar",
    version,
    about = "genvar: AI-REML variance components and Gauss-Seidel marker effects",
    long_about = "Estimates variance components over relationship kernels with AI-REML,\n\
                  solves ridge marker effects by Gauss-Seidel from a byte-per-genotype store,\n\
                  and cross-validates both."
)]
struct Cli {
    /// Number of threads to use
    #[arg(long, default_value = "1", global = true)]
    threads: usize,

    /// Verbosity level (can be repeated: -v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Convert PLINK bed/bim/fam into a genotype store
    Convert(commands::convert::ConvertArgs),

    /// Compute a dense GRM kernel from a genotype store
    Grm(commands::grm::GrmArgs),

    /// Estimate variance components with AI-REML
    Greml(commands::greml::GremlArgs),

    /// Solve marker effects by Gauss-Seidel
    Gsolve(commands::gsolve::GsolveArgs),

    /// Score individuals with a saved marker model
    Score(commands::score::ScoreArgs),

    /// Cross-validate greml or gsolve predictions
    Cv(commands::cv::CvArgs),
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging
    let filter = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();

    // Set up thread pool
    rayon::ThreadPoolBuilder::new()
        .num_threads(cli.threads)
        .build_global()
        .ok();

    tracing::info!("genvar v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!("Using {} threads", cli.threads);

    match cli.command {
        Commands::Convert(args) => commands::convert::run(args),
        Commands::Grm(args) => commands::grm::run(args),
        Commands::Greml(args) => commands::greml::run(args),
        Commands::Gsolve(args) => commands::gsolve::run(args),
        Commands::Score(args) => commands::score::run(args),
        Commands::Cv(args) => commands::cv::run(args),
    }
}
