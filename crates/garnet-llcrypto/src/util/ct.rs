//! Helpers for working with types in constant time.

use subtle::{Choice, ConstantTimeEq};

/// A byte array of length N for which comparisons are performed in constant
/// time.
///
/// # Limitations
///
/// It is possible to avoid constant time comparisons here, just by using the
/// `as_ref()` and `as_mut()` methods.  They should therefore be approached
/// with some caution.
#[allow(clippy::derived_hash_with_manual_eq)]
#[derive(Clone, Copy, Debug, Hash)]
pub struct CtByteArray<const N: usize>([u8; N]);

impl<const N: usize> ConstantTimeEq for CtByteArray<N> {
    fn ct_eq(&self, other: &Self) -> Choice {
        self.0.ct_eq(&other.0)
    }
}

impl<const N: usize> PartialEq for CtByteArray<N> {
    fn eq(&self, other: &Self) -> bool {
        self.ct_eq(other).into()
    }
}
impl<const N: usize> Eq for CtByteArray<N> {}

impl<const N: usize> From<[u8; N]> for CtByteArray<N> {
    fn from(value: [u8; N]) -> Self {
        Self(value)
    }
}

impl<const N: usize> From<CtByteArray<N>> for [u8; N] {
    fn from(value: CtByteArray<N>) -> Self {
        value.0
    }
}

impl<const N: usize> AsRef<[u8; N]> for CtByteArray<N> {
    fn as_ref(&self) -> &[u8; N] {
        &self.0
    }
}

impl<const N: usize> AsMut<[u8; N]> for CtByteArray<N> {
    fn as_mut(&mut self) -> &mut [u8; N] {
        &mut self.0
    }
}

/// Compare two byte slices for equality without leaking their contents
/// through timing.
///
/// Unequal lengths are reported immediately; only the contents are
/// protected.
pub fn bytes_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.ct_eq(b).into()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn eq_and_neq() {
        let a: CtByteArray<4> = [1, 2, 3, 4].into();
        let b: CtByteArray<4> = [1, 2, 3, 4].into();
        let c: CtByteArray<4> = [1, 2, 3, 5].into();
        assert_eq!(a, b);
        assert_ne!(a, c);
        let back: [u8; 4] = a.into();
        assert_eq!(back, [1, 2, 3, 4]);
    }

    #[test]
    fn slices() {
        assert!(bytes_eq(b"whole of the law", b"whole of the law"));
        assert!(!bytes_eq(b"whole of the law", b"whole of the lawn"));
        assert!(!bytes_eq(b"whole of the law", b"whole of the las"));
        assert!(bytes_eq(b"", b""));
    }
}
