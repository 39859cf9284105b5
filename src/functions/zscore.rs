use pulp::Arch;
use tracing::warn;

use crate::error::{KfreqError, Result};
use crate::functions::kmer_counter::{KmerCountTable, SubTable};
use crate::utils::count_type::CountType;
use crate::utils::rolling_encoder::{kmer_mask, kmer_space};

/// Per-k-mer z-scores of one genome, indexed by packed k-mer value.
#[derive(Debug, Clone, PartialEq)]
pub struct GenomeProfile {
    k: usize,
    values: Vec<f64>,
}

impl GenomeProfile {
    pub fn k(&self) -> usize {
        self.k
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn get(&self, kmer: u32) -> Option<f64> {
        self.values.get(kmer as usize).copied()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl AsRef<[f64]> for GenomeProfile {
    fn as_ref(&self) -> &[f64] {
        &self.values
    }
}

/// Z-score of one k-mer against the maximal-order Markov expectation.
///
/// `left` and `right` are the counts of the two overlapping (k-1)-mers and
/// `mid` the count of the (k-2)-mer they share. A non-positive variance
/// (possible once reverse complements are merged, as a palindromic `mid` no
/// longer bounds its flanks) takes the degenerate `1 / mid^2` branch.
#[inline]
pub fn z_score(observed: f64, left: f64, right: f64, mid: f64) -> f64 {
    if mid == 0.0 {
        return 0.0;
    }
    let expected = left * right / mid;
    let variance = expected * (mid - left) * (mid - right) / (mid * mid);
    if variance <= 0.0 {
        1.0 / (mid * mid)
    } else {
        (observed - expected) / variance.sqrt()
    }
}

enum Bridge<'a, C: CountType> {
    Table(&'a SubTable<C>),
    /// k = 2: the shared context is the empty string, seen once per valid base
    Total(f64),
}

/// Derives one z-score per k-mer of the table's longest length from the
/// lengths k, k-1 and k-2.
pub fn z_scores<C: CountType>(kf: &KmerCountTable<C>) -> Result<GenomeProfile> {
    let k = kf.max_k();
    let missing = |len: usize| {
        KfreqError::Config(format!(
            "z-scores for k = {k} need counts for length {len}, table holds {}..={k}",
            kf.min_k()
        ))
    };
    let top = kf.subtable(k).ok_or_else(|| missing(k))?;
    let flank = kf.subtable(k - 1).ok_or_else(|| missing(k - 1))?;
    let bridge = if k > 2 {
        Bridge::Table(kf.subtable(k - 2).ok_or_else(|| missing(k - 2))?)
    } else {
        Bridge::Total(flank.total() as f64)
    };

    let flank_mask = kmer_mask(k - 1) as usize;
    let bridge_mask = kmer_mask(k - 2) as usize;
    let flank_counts = flank.counts();
    let top_counts = top.counts();

    let arch = Arch::new();
    let values: Vec<f64> = arch.dispatch(|| {
        (0..kmer_space(k))
            .map(|i| {
                let mid = match &bridge {
                    Bridge::Table(t) => t.counts()[(i >> 2) & bridge_mask].as_f64(),
                    Bridge::Total(n) => *n,
                };
                if mid == 0.0 {
                    return 0.0;
                }
                let left = flank_counts[i & flank_mask].as_f64();
                let right = flank_counts[(i >> 2) & flank_mask].as_f64();
                z_score(top_counts[i].as_f64(), left, right, mid)
            })
            .collect()
    });

    if values.iter().all(|&z| z == 0.0) {
        warn!("z-score profile for k = {k} is all zero; was anything counted?");
    }

    Ok(GenomeProfile { k, values })
}
