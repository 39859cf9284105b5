use std::fmt::{Debug, Display};

/// Unsigned integer used for the dense count arrays.
///
/// Counting saturates at `MAX` rather than wrapping. Byte conversion is
/// native-endian, matching the persisted binary layout.
pub trait CountType: Copy + Default + Eq + Ord + Debug + Display + Send + Sync + 'static {
    const BYTES: usize;
    const MAX: u64;
    const ZERO: Self;

    fn increment(&mut self);
    fn merge(&mut self, other: Self);
    fn as_u64(self) -> u64;
    fn as_f64(self) -> f64;
    fn from_u64(value: u64) -> Option<Self>;
    fn extend_ne_bytes(self, out: &mut Vec<u8>);
    /// `bytes` must be exactly `BYTES` long
    fn from_ne_slice(bytes: &[u8]) -> Self;
}

macro_rules! impl_count_type {
    ($($t:ty),*) => {$(
        impl CountType for $t {
            const BYTES: usize = std::mem::size_of::<$t>();
            const MAX: u64 = <$t>::MAX as u64;
            const ZERO: Self = 0;

            #[inline(always)]
            fn increment(&mut self) {
                *self = self.saturating_add(1);
            }

            #[inline(always)]
            fn merge(&mut self, other: Self) {
                *self = self.saturating_add(other);
            }

            #[inline(always)]
            fn as_u64(self) -> u64 {
                self as u64
            }

            #[inline(always)]
            fn as_f64(self) -> f64 {
                self as f64
            }

            #[inline]
            fn from_u64(value: u64) -> Option<Self> {
                <$t>::try_from(value).ok()
            }

            #[inline]
            fn extend_ne_bytes(self, out: &mut Vec<u8>) {
                out.extend_from_slice(&self.to_ne_bytes());
            }

            #[inline]
            fn from_ne_slice(bytes: &[u8]) -> Self {
                let mut buf = [0u8; std::mem::size_of::<$t>()];
                buf.copy_from_slice(bytes);
                <$t>::from_ne_bytes(buf)
            }
        }
    )*};
}

impl_count_type!(u16, u32, u64, usize);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn increment_saturates() {
        let mut c: u16 = u16::MAX - 1;
        c.increment();
        c.increment();
        assert_eq!(c, u16::MAX);

        let mut m: u32 = u32::MAX - 3;
        m.merge(10);
        assert_eq!(m, u32::MAX);
    }

    #[test]
    fn from_u64_checks_width() {
        assert_eq!(<u16 as CountType>::from_u64(65_535), Some(65_535));
        assert_eq!(<u16 as CountType>::from_u64(65_536), None);
        assert_eq!(<u64 as CountType>::from_u64(u64::MAX), Some(u64::MAX));
    }

    #[test]
    fn native_bytes() {
        let mut out = Vec::new();
        0xDEAD_BEEFu32.extend_ne_bytes(&mut out);
        assert_eq!(out.len(), <u32 as CountType>::BYTES);
        assert_eq!(<u32 as CountType>::from_ne_slice(&out), 0xDEAD_BEEF);
    }
}
