use tracing::{debug, info};

use std::path::Path;
use std::time::Instant;

use crate::error::{KfreqError, Result};
use crate::functions::sequence_source::{FastxSource, SequenceSource};
use crate::utils::count_type::CountType;
use crate::utils::rolling_encoder::{
    INVALID, MAX_K, RollingKmer2, encode_base, encode_kmer, kmer_space, reverse_complement,
};

/// Counts for every k-mer of a single length, indexed by packed value.
#[derive(Debug, Clone)]
pub struct SubTable<C: CountType> {
    counts: Vec<C>,
    roller: RollingKmer2,
}

impl<C: CountType> SubTable<C> {
    pub fn new(k: usize) -> Self {
        Self {
            counts: vec![C::ZERO; kmer_space(k)],
            roller: RollingKmer2::new(k),
        }
    }

    #[inline]
    pub fn k(&self) -> usize {
        self.roller.k
    }

    #[inline]
    pub fn counts(&self) -> &[C] {
        &self.counts
    }

    pub(crate) fn counts_mut(&mut self) -> &mut [C] {
        &mut self.counts
    }

    #[inline]
    pub fn get(&self, kmer: u32) -> Option<C> {
        self.counts.get(kmer as usize).copied()
    }

    pub fn total(&self) -> u64 {
        self.counts.iter().map(|c| c.as_u64()).sum()
    }

    pub fn clear_kmer(&mut self) {
        self.roller.reset();
    }

    pub fn clear(&mut self) {
        self.clear_kmer();
        self.counts.fill(C::ZERO);
    }

    /// Folds each k-mer's count into its canonical form, the smaller of the
    /// k-mer and its reverse complement. Palindromes stay where they are.
    pub fn rc_collapse(&mut self) {
        let k = self.k();
        for kmer in 0..self.counts.len() {
            let rc = reverse_complement(kmer as u32, k) as usize;
            if rc > kmer {
                let moved = std::mem::replace(&mut self.counts[rc], C::ZERO);
                self.counts[kmer].merge(moved);
            }
        }
    }
}

/// Which lengths a table holds, and so which magic tags it persists under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableLayout {
    /// Every length `1..=max_k`
    Full,
    /// Only the trailing `num_lengths` lengths ending at `max_k`
    Windowed { num_lengths: usize },
}

/// Summary of what `add` pulled from a source.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SourceSummary {
    pub sequences: u64,
    pub bases: u64,
    /// Bytes outside `ACGTacgt`, each of which resets the windows
    pub ambiguous: u64,
}

/// Counts short k-mer occurrences for several lengths at once using dense
/// arrays. Supports lengths up to 16.
#[derive(Debug, Clone)]
pub struct KmerCountTable<C: CountType = u32> {
    max_k: usize,
    layout: TableLayout,
    tables: Vec<SubTable<C>>,
}

impl<C: CountType> KmerCountTable<C> {
    /// Table holding every length `1..=max_k`.
    pub fn new(max_k: usize) -> Result<Self> {
        Self::with_layout(max_k, TableLayout::Full)
    }

    /// Table holding lengths `max_k - num_lengths + 1 ..= max_k`.
    pub fn windowed(max_k: usize, num_lengths: usize) -> Result<Self> {
        Self::with_layout(max_k, TableLayout::Windowed { num_lengths })
    }

    pub fn with_layout(max_k: usize, layout: TableLayout) -> Result<Self> {
        if !(2..=MAX_K).contains(&max_k) {
            return Err(KfreqError::Config(format!(
                "k = {max_k} is outside the supported range 2..={MAX_K}"
            )));
        }
        if C::MAX < (kmer_space(max_k) - 1) as u64 {
            return Err(KfreqError::Config(format!(
                "count type with width {} bits is not long enough for k = {max_k}",
                C::BYTES * 8
            )));
        }
        let min_k = match layout {
            TableLayout::Full => 1,
            TableLayout::Windowed { num_lengths } => {
                if num_lengths == 0 || num_lengths > max_k {
                    return Err(KfreqError::Config(format!(
                        "a window of {num_lengths} lengths does not fit k = {max_k}"
                    )));
                }
                max_k - num_lengths + 1
            }
        };

        Ok(Self {
            max_k,
            layout,
            tables: (min_k..=max_k).map(SubTable::new).collect(),
        })
    }

    #[inline]
    pub fn max_k(&self) -> usize {
        self.max_k
    }

    #[inline]
    pub fn min_k(&self) -> usize {
        self.tables[0].k()
    }

    #[inline]
    pub fn layout(&self) -> TableLayout {
        self.layout
    }

    pub fn subtables(&self) -> &[SubTable<C>] {
        &self.tables
    }

    pub(crate) fn subtables_mut(&mut self) -> &mut [SubTable<C>] {
        &mut self.tables
    }

    pub fn subtable(&self, k: usize) -> Option<&SubTable<C>> {
        let min_k = self.min_k();
        if k < min_k {
            return None;
        }
        self.tables.get(k - min_k)
    }

    pub fn count(&self, k: usize, kmer: u32) -> Option<C> {
        self.subtable(k)?.get(kmer)
    }

    /// Count of a k-mer given as a nucleotide string.
    pub fn count_kmer(&self, kmer: &[u8]) -> Result<C> {
        let packed = encode_kmer(kmer)?;
        self.count(kmer.len(), packed).ok_or_else(|| {
            KfreqError::InvalidKmer(format!(
                "no table for length {} (holding {}..={})",
                kmer.len(),
                self.min_k(),
                self.max_k
            ))
        })
    }

    pub fn total(&self, k: usize) -> Option<u64> {
        self.subtable(k).map(SubTable::total)
    }

    pub fn clear_kmers(&mut self) {
        self.tables.iter_mut().for_each(SubTable::clear_kmer);
    }

    pub fn clear(&mut self) {
        self.tables.iter_mut().for_each(SubTable::clear);
    }

    /// Counts every k-mer of every held length in `seq`. A non-ACGT byte
    /// resets all windows, so no k-mer spans it.
    pub fn process(&mut self, seq: &[u8]) {
        self.clear_kmers();
        for &base in seq {
            let code = encode_base(base);
            if code == INVALID {
                self.clear_kmers();
                continue;
            }
            for table in self.tables.iter_mut() {
                if let Some(kmer) = table.roller.roll(code) {
                    table.counts[kmer as usize].increment();
                }
            }
        }
    }

    /// Processes every sequence the source yields.
    pub fn add<S: SequenceSource + ?Sized>(&mut self, source: &mut S) -> Result<SourceSummary> {
        let mut summary = SourceSummary::default();
        while let Some(seq) = source.next_sequence() {
            let seq = seq?;
            summary.sequences += 1;
            summary.bases += seq.len() as u64;
            let valid: usize = b"ACGTacgt".iter().map(|&b| bytecount::count(seq, b)).sum();
            summary.ambiguous += (seq.len() - valid) as u64;
            self.process(seq);
        }
        debug!(
            "Counted {} sequences ({} bases, {} non-ACGT)",
            summary.sequences, summary.bases, summary.ambiguous
        );
        Ok(summary)
    }

    pub fn rc_collapse(&mut self) {
        self.tables.iter_mut().for_each(SubTable::rc_collapse);
    }
}

/// Counts every record of a FASTA/FASTQ file into `kf`.
pub fn count_kmers_file<C: CountType>(
    kf: &mut KmerCountTable<C>,
    path: &Path,
) -> Result<SourceSummary> {
    let start = Instant::now();
    let mut source = FastxSource::open(path)?;
    let summary = kf.add(&mut source)?;
    info!(
        "Processed {} ({} sequences, {} bases) in {:?}",
        path.display(),
        summary.sequences,
        summary.bases,
        start.elapsed()
    );
    Ok(summary)
}
