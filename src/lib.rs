pub mod config;
pub mod error;
pub mod functions;
pub mod utils;

pub use config::Config;
pub use error::{KfreqError, Result};
pub use functions::correlation::{DistanceMatrix, pearson};
pub use functions::kmer_counter::{
    KmerCountTable, SourceSummary, SubTable, TableLayout, count_kmers_file,
};
pub use functions::pool::run_pool;
pub use functions::sequence_source::{FastxSource, MemorySource, SequenceSource};
pub use functions::table_codec::{
    Compression, TableFormat, decode, encode, read_table_file, write_table_file,
};
pub use functions::zscore::{GenomeProfile, z_score, z_scores};
pub use utils::count_type::CountType;
pub use utils::rolling_encoder::{decode_kmer, encode_kmer, reverse_complement};

use tracing::info;

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;

/// What a run produced.
#[derive(Debug)]
pub enum Outcome {
    /// One persisted table per input, in input order
    Tables(Vec<PathBuf>),
    Distances(DistanceMatrix),
}

fn count_one(kf: &mut KmerCountTable, path: &std::path::Path, rc_collapse: bool) -> Result<()> {
    count_kmers_file(kf, path)?;
    if rc_collapse {
        kf.rc_collapse();
    }
    Ok(())
}

/// Counts every input on the worker pool, then either writes one table per
/// input or correlates their z-score profiles.
pub fn run(config: &Config) -> Result<Outcome> {
    config.validate()?;
    let factory = || KmerCountTable::<u32>::new(config.k);

    if config.distances {
        let profiles = run_pool(&config.paths, config.threads, factory, |kf, _, path| {
            count_one(kf, path, config.rc_collapse)?;
            z_scores(kf)
        })?;
        let names = config
            .paths
            .iter()
            .map(|p| p.display().to_string())
            .collect();
        let matrix = DistanceMatrix::build_with_threads(names, &profiles, config.threads)?;

        match &config.output {
            Some(path) => {
                let file = File::create(path).map_err(|e| KfreqError::io(path, e))?;
                let mut writer = BufWriter::new(file);
                matrix.write_tsv(&mut writer).map_err(|e| match e {
                    KfreqError::Stream(source) => KfreqError::io(path, source),
                    other => other,
                })?;
                info!("Wrote distance table to {}", path.display());
            }
            None => {
                let stdout = std::io::stdout();
                let mut writer = BufWriter::new(stdout.lock());
                matrix.write_tsv(&mut writer)?;
                writer.flush()?;
            }
        }
        Ok(Outcome::Distances(matrix))
    } else {
        let written = run_pool(&config.paths, config.threads, factory, |kf, _, path| {
            count_one(kf, path, config.rc_collapse)?;
            let out = config.artifact_path(path);
            write_table_file(&out, kf, config.format(), config.compression)?;
            Ok(out)
        })?;
        info!("Wrote {} tables", written.len());
        Ok(Outcome::Tables(written))
    }
}
