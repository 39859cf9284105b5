use clap::Parser;
use kfreq::config::resolve_threads;
use kfreq::{Compression, Config, Outcome};
use tracing::info;

use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "kfreq")]
#[command(version)]
#[command(about = "k-mer frequencies, Markov z-scores and genome correlation", long_about = None)]
struct Cli {
    /// Input FASTA/FASTQ files (optionally compressed)
    #[arg(required = true)]
    paths: Vec<PathBuf>,

    /// K-mer length; every length 1..=k is counted
    #[arg(short, long = "kmer-size", default_value_t = 4, value_parser = clap::value_parser!(u8).range(2..=16))]
    k: u8,

    /// Emit binary tables instead of text
    #[arg(short, long)]
    binary: bool,

    /// Number of worker threads (negative = all available cores)
    #[arg(short = 'p', long, default_value_t = 1, allow_negative_numbers = true)]
    threads: i64,

    /// Compute pairwise genome correlations instead of writing tables
    #[arg(short, long)]
    distances: bool,

    /// Merge each k-mer with its reverse complement
    #[arg(short, long)]
    rc_collapse: bool,

    /// Distance table destination (default: stdout)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Directory for per-input tables
    #[arg(long, default_value = ".")]
    outdir: PathBuf,

    /// Compression for per-input tables
    #[arg(long, value_enum, default_value_t = Compression::None)]
    compress: Compression,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing: use RUST_LOG if set, otherwise default to info
    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .init();

    let config = Config {
        k: cli.k as usize,
        emit_binary: cli.binary,
        threads: resolve_threads(cli.threads)?,
        distances: cli.distances,
        rc_collapse: cli.rc_collapse,
        output: cli.output,
        outdir: cli.outdir,
        compression: cli.compress,
        ..Config::new(cli.paths)
    };

    info!("kfreq: {} inputs, k = {}", config.paths.len(), config.k);
    info!("  Workers: {}", config.threads);
    info!("  Reverse-complement collapse: {}", config.rc_collapse);

    match kfreq::run(&config)? {
        Outcome::Tables(paths) => {
            for path in paths {
                info!("  {}", path.display());
            }
        }
        Outcome::Distances(matrix) => {
            info!("Correlated {} genomes", matrix.len());
        }
    }
    Ok(())
}
