use needletail::errors::ParseErrorKind;
use needletail::{FastxReader, parse_fastx_file};
use tracing::warn;

use std::path::{Path, PathBuf};

use crate::error::{KfreqError, Result};

/// Yields the raw sequences of one input, one at a time.
///
/// The returned slice is only valid until the next call; sources reuse a
/// single buffer.
pub trait SequenceSource {
    fn next_sequence(&mut self) -> Option<Result<&[u8]>>;
}

/// FASTA/FASTQ file, plain or compressed, read through needletail.
pub struct FastxSource {
    path: PathBuf,
    reader: Option<Box<dyn FastxReader>>,
    buffer: Vec<u8>,
}

impl FastxSource {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Err(e) = std::fs::metadata(&path) {
            return Err(KfreqError::io(path, e));
        }

        let reader = match parse_fastx_file(&path) {
            Ok(reader) => Some(reader),
            Err(e) if matches!(e.kind, ParseErrorKind::EmptyFile) => {
                warn!("{} is empty", path.display());
                None
            }
            Err(e) if matches!(e.kind, ParseErrorKind::Io) => {
                return Err(KfreqError::io(
                    path,
                    std::io::Error::other(e.to_string()),
                ));
            }
            Err(source) => return Err(KfreqError::Parse { path, source }),
        };

        Ok(Self {
            path,
            reader,
            buffer: Vec::with_capacity(1 << 20),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SequenceSource for FastxSource {
    fn next_sequence(&mut self) -> Option<Result<&[u8]>> {
        let reader = self.reader.as_mut()?;
        let record = match reader.next()? {
            Ok(record) => record,
            Err(source) => {
                return Some(Err(KfreqError::Parse {
                    path: self.path.clone(),
                    source,
                }));
            }
        };

        // Multi-line FASTA records come back with line breaks removed
        self.buffer.clear();
        self.buffer.extend_from_slice(&record.seq());
        Some(Ok(&self.buffer))
    }
}

/// Sequences already held in memory.
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    sequences: Vec<Vec<u8>>,
    next: usize,
}

impl MemorySource {
    pub fn new<I, S>(sequences: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<[u8]>,
    {
        Self {
            sequences: sequences
                .into_iter()
                .map(|s| s.as_ref().to_vec())
                .collect(),
            next: 0,
        }
    }
}

impl SequenceSource for MemorySource {
    fn next_sequence(&mut self) -> Option<Result<&[u8]>> {
        let seq = self.sequences.get(self.next)?;
        self.next += 1;
        Some(Ok(seq.as_slice()))
    }
}
