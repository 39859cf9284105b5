use pulp::Arch;
use rayon::prelude::*;
use tracing::info;

use std::io::Write;

use crate::error::{KfreqError, Result};

/// Pearson correlation, two-pass, clamped into `[-1, 1]`.
///
/// A vector with no variance has no measurable linear relationship, so the
/// result is 0. Non-finite input also yields 0; the result is never NaN.
pub fn pearson(v1: &[f64], v2: &[f64]) -> f64 {
    debug_assert_eq!(v1.len(), v2.len());
    if v1.is_empty() {
        return 0.0;
    }
    let arch = Arch::new();
    arch.dispatch(|| {
        let n = v1.len() as f64;
        let m1 = v1.iter().sum::<f64>() / n;
        let m2 = v2.iter().sum::<f64>() / n;
        let (mut s1s, mut s2s, mut sd) = (0.0f64, 0.0f64, 0.0f64);
        for (a, b) in v1.iter().zip(v2.iter()) {
            let val1 = a - m1;
            let val2 = b - m2;
            s1s += val1 * val1;
            s2s += val2 * val2;
            sd += val1 * val2;
        }
        // two square roots for better floating-point accuracy
        let rden = s1s.sqrt() * s2s.sqrt();
        let r = sd / rden;
        if rden == 0.0 || !r.is_finite() {
            return 0.0;
        }
        r.clamp(-1.0, 1.0)
    })
}

/// Symmetric `N x N` matrix of pairwise correlations between profiles.
#[derive(Debug, Clone, PartialEq)]
pub struct DistanceMatrix {
    names: Vec<String>,
    values: Vec<f64>,
}

impl DistanceMatrix {
    /// Correlates every pair `i <= j` of `profiles`, in parallel over rows.
    pub fn build<V>(names: Vec<String>, profiles: &[V]) -> Result<Self>
    where
        V: AsRef<[f64]> + Sync,
    {
        if names.len() != profiles.len() {
            return Err(KfreqError::Config(format!(
                "{} names given for {} profiles",
                names.len(),
                profiles.len()
            )));
        }
        if let Some(first) = profiles.first() {
            let len = first.as_ref().len();
            if let Some(bad) = profiles.iter().position(|p| p.as_ref().len() != len) {
                return Err(KfreqError::Config(format!(
                    "profile {} has length {}, expected {len}",
                    names[bad],
                    profiles[bad].as_ref().len()
                )));
            }
        }

        let n = profiles.len();
        info!("Computing {} pairwise correlations", n * (n + 1) / 2);

        let rows: Vec<Vec<f64>> = (0..n)
            .into_par_iter()
            .map(|i| {
                (i..n)
                    .map(|j| pearson(profiles[i].as_ref(), profiles[j].as_ref()))
                    .collect()
            })
            .collect();

        let mut values = vec![0.0; n * n];
        for (i, row) in rows.into_iter().enumerate() {
            for (offset, r) in row.into_iter().enumerate() {
                let j = i + offset;
                values[i * n + j] = r;
                values[j * n + i] = r;
            }
        }

        Ok(Self { names, values })
    }

    /// Same as [`DistanceMatrix::build`], on a dedicated pool of `threads`
    /// workers instead of rayon's global one.
    pub fn build_with_threads<V>(names: Vec<String>, profiles: &[V], threads: usize) -> Result<Self>
    where
        V: AsRef<[f64]> + Sync,
    {
        if threads == 0 {
            return Err(KfreqError::Config("correlation needs at least one thread".into()));
        }
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build()
            .map_err(|e| KfreqError::Config(format!("cannot start correlation workers: {e}")))?;
        pool.install(|| Self::build(names, profiles))
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn get(&self, i: usize, j: usize) -> f64 {
        self.values[i * self.len() + j]
    }

    pub fn row(&self, i: usize) -> &[f64] {
        let n = self.len();
        &self.values[i * n..(i + 1) * n]
    }

    /// Tab-separated table: a `#Path` header naming every column, then one
    /// row per genome.
    pub fn write_tsv<W: Write>(&self, writer: &mut W) -> Result<()> {
        write!(writer, "#Path")?;
        for name in &self.names {
            write!(writer, "\t{name}")?;
        }
        writeln!(writer)?;
        for (i, name) in self.names.iter().enumerate() {
            write!(writer, "{name}")?;
            for r in self.row(i) {
                write!(writer, "\t{r}")?;
            }
            writeln!(writer)?;
        }
        writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn perfectly_correlated() {
        assert!((pearson(&[1.0, 2.0, 3.0], &[2.0, 4.0, 6.0]) - 1.0).abs() < 1e-12);
        assert!((pearson(&[1.0, 2.0, 3.0], &[6.0, 4.0, 2.0]) + 1.0).abs() < 1e-12);
    }

    #[test]
    fn constant_vector_is_uncorrelated() {
        assert_eq!(pearson(&[1.0, 1.0, 1.0], &[1.0, 2.0, 3.0]), 0.0);
        assert_eq!(pearson(&[], &[]), 0.0);
    }

    #[test]
    fn non_finite_input_is_uncorrelated() {
        assert_eq!(pearson(&[1.0, f64::NAN, 3.0], &[1.0, 2.0, 3.0]), 0.0);
        assert_eq!(pearson(&[1.0, f64::INFINITY, 3.0], &[1.0, 2.0, 3.0]), 0.0);
    }

    #[test]
    fn matrix_two_genomes() {
        let profiles = vec![vec![1.0, 2.0, 3.0], vec![2.0, 4.0, 6.0]];
        let dm = DistanceMatrix::build(vec!["a".into(), "b".into()], &profiles).unwrap();
        assert_eq!(dm.len(), 2);
        assert!((dm.get(0, 1) - 1.0).abs() < 1e-12);
        assert_eq!(dm.get(0, 1), dm.get(1, 0));
        assert!((dm.get(0, 0) - 1.0).abs() < 1e-12);

        let mut out = Vec::new();
        dm.write_tsv(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "#Path\ta\tb");
        assert!(lines[1].starts_with("a\t"));
        assert!(lines[2].starts_with("b\t"));
        assert_eq!(lines[1].split('\t').count(), 3);
    }

    #[test]
    fn mismatched_lengths_are_rejected() {
        let profiles = vec![vec![1.0, 2.0], vec![1.0, 2.0, 3.0]];
        assert!(DistanceMatrix::build(vec!["a".into(), "b".into()], &profiles).is_err());
        assert!(DistanceMatrix::build(vec!["a".into()], &profiles).is_err());
    }

    #[test]
    fn dedicated_pool_matches_global() {
        let profiles = vec![
            vec![1.0, 5.0, 2.0, 0.5],
            vec![2.0, 4.0, 6.0, 1.0],
            vec![0.0, 1.0, 0.0, 3.0],
        ];
        let names: Vec<String> = vec!["a".into(), "b".into(), "c".into()];
        let global = DistanceMatrix::build(names.clone(), &profiles).unwrap();
        let single = DistanceMatrix::build_with_threads(names.clone(), &profiles, 1).unwrap();
        assert_eq!(global, single);
        assert!(matches!(
            DistanceMatrix::build_with_threads(names, &profiles, 0),
            Err(KfreqError::Config(_))
        ));
    }

    proptest! {
        #[test]
        fn prop_pearson_bounds_and_symmetry(
            pairs in prop::collection::vec((-1e3f64..1e3, -1e3f64..1e3), 2..64)
        ) {
            let (v, w): (Vec<f64>, Vec<f64>) = pairs.into_iter().unzip();
            let r = pearson(&v, &w);
            prop_assert!((-1.0..=1.0).contains(&r));
            prop_assert_eq!(r, pearson(&w, &v));
        }

        #[test]
        fn prop_self_correlation_is_one(v in prop::collection::vec(-1e3f64..1e3, 2..64)) {
            prop_assume!(v.iter().any(|&x| (x - v[0]).abs() > 1e-6));
            prop_assert!((pearson(&v, &v) - 1.0).abs() < 1e-9);
        }
    }
}
