use crate::error::{KfreqError, Result};

/// Sentinel code for anything outside A/C/G/T.
pub const INVALID: u8 = 4;

/// Longest k-mer that fits the 2-bit packing in a `u32`.
pub const MAX_K: usize = 16;

pub static DNA_CODES: [u8; 256] = {
    const X: u8 = INVALID;
    let mut table = [X; 256];
    table[b'A' as usize] = 0; table[b'a' as usize] = 0;
    table[b'C' as usize] = 1; table[b'c' as usize] = 1;
    table[b'G' as usize] = 2; table[b'g' as usize] = 2;
    table[b'T' as usize] = 3; table[b't' as usize] = 3;
    // everything else stays 4
    table
};

#[inline(always)]
pub fn encode_base(base: u8) -> u8 {
    DNA_CODES[base as usize]
}

/// Mask keeping the low `2k` bits of a packed k-mer. Zero for `k == 0`.
#[inline(always)]
pub const fn kmer_mask(k: usize) -> u32 {
    if k == 0 { 0 } else { u32::MAX >> (32 - 2 * k) }
}

/// Number of distinct k-mers of length `k`, i.e. `4^k`.
#[inline(always)]
pub const fn kmer_space(k: usize) -> usize {
    1usize << (2 * k)
}

/// Reverse complement of a 2-bit packed k-mer, `1 <= k <= 16`.
// From Jellyfish, by Guillaume Marcais
#[inline]
pub const fn reverse_complement(kmer: u32, k: usize) -> u32 {
    let mut kmer = kmer;
    kmer = ((kmer >> 2) & 0x3333_3333) | ((kmer & 0x3333_3333) << 2);
    kmer = ((kmer >> 4) & 0x0F0F_0F0F) | ((kmer & 0x0F0F_0F0F) << 4);
    kmer = ((kmer >> 8) & 0x00FF_00FF) | ((kmer & 0x00FF_00FF) << 8);
    kmer = kmer.rotate_left(16);
    (u32::MAX - kmer) >> (32 - 2 * k)
}

/// Packs a k-mer string, `A=0 C=1 G=2 T=3`, first symbol in the highest bits.
pub fn encode_kmer(kmer: &[u8]) -> Result<u32> {
    if kmer.is_empty() || kmer.len() > MAX_K {
        return Err(KfreqError::InvalidKmer(format!(
            "length {} is outside 1..={MAX_K}",
            kmer.len()
        )));
    }
    kmer.iter().try_fold(0u32, |packed, &base| match encode_base(base) {
        INVALID => Err(KfreqError::InvalidKmer(format!(
            "illegal character {:?} in {:?}",
            base as char,
            String::from_utf8_lossy(kmer)
        ))),
        code => Ok((packed << 2) | code as u32),
    })
}

pub fn decode_kmer(packed: u32, k: usize) -> String {
    (0..k)
        .rev()
        .map(|i| b"ACGT"[((packed >> (2 * i)) & 3) as usize] as char)
        .collect()
}

/// A rolling k-mer encoder using 2 bits per nucleotide.
///
/// `filled` counts valid symbols since the last reset and stops at `k - 1`
/// once the window is full; from then on every symbol completes a k-mer.
#[derive(Debug, Clone, Copy)]
pub struct RollingKmer2 {
    pub k: usize,
    pub window: u32,
    pub filled: usize,
    mask: u32,
}

impl RollingKmer2 {
    pub fn new(k: usize) -> Self {
        debug_assert!((1..=MAX_K).contains(&k));
        Self {
            k,
            window: 0,
            filled: 0,
            mask: kmer_mask(k),
        }
    }

    #[inline(always)]
    pub fn reset(&mut self) {
        self.window = 0;
        self.filled = 0;
    }

    /// Shifts a valid 2-bit code in. Returns the packed k-mer once the
    /// window holds `k` consecutive valid symbols.
    #[inline(always)]
    pub fn roll(&mut self, code: u8) -> Option<u32> {
        self.window = (self.window << 2) | code as u32;
        if self.filled == self.k - 1 {
            self.window &= self.mask;
            Some(self.window)
        } else {
            self.filled += 1;
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn symbol_map() {
        for (i, b) in b"ACGT".iter().enumerate() {
            assert_eq!(encode_base(*b), i as u8);
            assert_eq!(encode_base(b.to_ascii_lowercase()), i as u8);
        }
        for b in [b'N', b'n', b'-', b'U', b'\n', 0u8, 255u8] {
            assert_eq!(encode_base(b), INVALID);
        }
    }

    #[test]
    fn masks() {
        assert_eq!(kmer_mask(0), 0);
        assert_eq!(kmer_mask(1), 0b11);
        assert_eq!(kmer_mask(4), 0xFF);
        assert_eq!(kmer_mask(16), u32::MAX);
        assert_eq!(kmer_space(3), 64);
    }

    #[test]
    fn reverse_complement_matches_strings() {
        let cases: &[(&[u8], &[u8])] = &[
            (b"A", b"T"),
            (b"AC", b"GT"),
            (b"AAC", b"GTT"),
            (b"ACGT", b"ACGT"),
            (b"GATTACA", b"TGTAATC"),
            (b"ACGTACGTACGTACGA", b"TCGTACGTACGTACGT"),
        ];
        for (fwd, rc) in cases {
            let k = fwd.len();
            let v = encode_kmer(fwd).unwrap();
            assert_eq!(decode_kmer(reverse_complement(v, k), k).as_bytes(), *rc);
        }
    }

    #[test]
    fn reverse_complement_is_involution() {
        for k in 1..=6 {
            for v in 0..kmer_space(k) as u32 {
                assert_eq!(reverse_complement(reverse_complement(v, k), k), v);
            }
        }
    }

    #[test]
    fn encode_rejects_bad_input() {
        assert!(encode_kmer(b"ACNT").is_err());
        assert!(encode_kmer(b"").is_err());
        assert!(encode_kmer(&[b'A'; 17]).is_err());
        assert_eq!(encode_kmer(b"TTTTTTTTTTTTTTTT").unwrap(), u32::MAX);
        assert_eq!(encode_kmer(b"gt").unwrap(), 0b1011);
    }

    #[test]
    fn roll_emits_after_k_symbols() {
        let mut r = RollingKmer2::new(3);
        assert_eq!(r.roll(0), None);
        assert_eq!(r.roll(1), None);
        assert_eq!(r.roll(2), Some(0b00_01_10));
        assert_eq!(r.roll(3), Some(0b01_10_11));
        r.reset();
        assert_eq!(r.roll(3), None);
    }
}
