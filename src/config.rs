use std::path::{Path, PathBuf};

use crate::error::{KfreqError, Result};
use crate::functions::table_codec::{Compression, TableFormat};
use crate::utils::rolling_encoder::MAX_K;

pub const DEFAULT_K: usize = 4;

/// Everything one run needs to know.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub paths: Vec<PathBuf>,
    pub k: usize,
    pub emit_binary: bool,
    pub threads: usize,
    pub distances: bool,
    pub rc_collapse: bool,
    /// Distance table destination; `None` is stdout
    pub output: Option<PathBuf>,
    pub outdir: PathBuf,
    pub compression: Compression,
}

impl Config {
    pub fn new(paths: Vec<PathBuf>) -> Self {
        Self {
            paths,
            k: DEFAULT_K,
            emit_binary: false,
            threads: 1,
            distances: false,
            rc_collapse: false,
            output: None,
            outdir: PathBuf::from("."),
            compression: Compression::None,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !(2..=MAX_K).contains(&self.k) {
            return Err(KfreqError::Config(format!(
                "k = {} is outside the supported range 2..={MAX_K}",
                self.k
            )));
        }
        if self.threads == 0 {
            return Err(KfreqError::Config("at least one worker is required".into()));
        }
        if self.paths.is_empty() {
            return Err(KfreqError::Config("no input files given".into()));
        }
        Ok(())
    }

    pub fn format(&self) -> TableFormat {
        if self.emit_binary {
            TableFormat::Binary
        } else {
            TableFormat::Text
        }
    }

    /// Input basename plus `.k<K>.<bin|txt>` and any compression suffix,
    /// placed in `outdir`.
    pub fn artifact_path(&self, input: &Path) -> PathBuf {
        let base = input
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| input.to_string_lossy().into_owned());
        let mut name = format!("{base}.k{}.{}", self.k, self.format().extension());
        if let Some(ext) = self.compression.extension() {
            name.push('.');
            name.push_str(ext);
        }
        self.outdir.join(name)
    }
}

/// Negative means every hardware thread; zero is rejected.
pub fn resolve_threads(requested: i64) -> Result<usize> {
    match requested {
        n if n < 0 => Ok(std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)),
        0 => Err(KfreqError::Config("thread count must not be zero".into())),
        n => Ok(n as usize),
    }
}
