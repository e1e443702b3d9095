//! Test-only cryptographic helpers.

use rand_core::{CryptoRng, RngCore};

/// A "PRNG" that returns a canned sequence of bytes.
///
/// Only for tests, obviously: it lets us drive a handshake with a known
/// "random" input so the outputs can be checked against fixed vectors.
pub(crate) struct FakePRNG<'a> {
    /// The bytes we have not yet handed out.
    bytes: &'a [u8],
}

impl<'a> FakePRNG<'a> {
    /// Create a new FakePRNG yielding `bytes`.
    pub(crate) fn new(bytes: &'a [u8]) -> Self {
        FakePRNG { bytes }
    }
}

impl RngCore for FakePRNG<'_> {
    fn next_u32(&mut self) -> u32 {
        let mut b = [0_u8; 4];
        self.fill_bytes(&mut b);
        u32::from_be_bytes(b)
    }
    fn next_u64(&mut self) -> u64 {
        let mut b = [0_u8; 8];
        self.fill_bytes(&mut b);
        u64::from_be_bytes(b)
    }
    fn fill_bytes(&mut self, dest: &mut [u8]) {
        assert!(dest.len() <= self.bytes.len(), "out of fake random bytes");
        dest.copy_from_slice(&self.bytes[..dest.len()]);
        self.bytes = &self.bytes[dest.len()..];
    }
}
impl CryptoRng for FakePRNG<'_> {}
