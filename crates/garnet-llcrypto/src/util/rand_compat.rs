//! Compatibility utilities for working with libraries that consume
//! older versions of rand_core.
//!
//! The `rsa` crate is still on [`rand_core`] 0.6, but everywhere else in
//! this workspace we use the latest `rand_core`.  The extension trait in
//! this module lets us hand a modern RNG to those older interfaces.
//!
//! The wrapped RNG can be used with the old version of the `RngCore`
//! trait, as well as the new one.

use rand_core::{CryptoRng, RngCore};
use rand_core_06::{
    CryptoRng as OldCryptoRng, Error as OldError, RngCore as OldRngCore,
};

/// Extension trait for current versions of [`RngCore`]; adds a
/// compatibility-wrapper function.
pub trait RngCompatExt: RngCore {
    /// Wrapper type returned by this trait.
    type Wrapper: RngCore + OldRngCore;
    /// Return a version of this Rng that can be used with older versions
    /// of the rand_core and rand libraries.
    fn rng_compat(self) -> Self::Wrapper;
}

impl<T: RngCore + Sized> RngCompatExt for T {
    type Wrapper = RngWrapper<T>;
    fn rng_compat(self) -> RngWrapper<Self> {
        self.into()
    }
}

/// A new-style Rng, wrapped for backward compatibility.
///
/// This object implements both the current version of [`RngCore`] and the
/// 0.6 version that the `rsa` crate expects.
pub struct RngWrapper<T>(T);

impl<T: RngCore> From<T> for RngWrapper<T> {
    fn from(rng: T) -> RngWrapper<T> {
        RngWrapper(rng)
    }
}

impl<T: RngCore> OldRngCore for RngWrapper<T> {
    fn next_u32(&mut self) -> u32 {
        self.0.next_u32()
    }
    fn next_u64(&mut self) -> u64 {
        self.0.next_u64()
    }
    fn fill_bytes(&mut self, dest: &mut [u8]) {
        self.0.fill_bytes(dest);
    }
    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), OldError> {
        self.0.fill_bytes(dest);
        Ok(())
    }
}

impl<T: RngCore> RngCore for RngWrapper<T> {
    fn next_u32(&mut self) -> u32 {
        self.0.next_u32()
    }
    fn next_u64(&mut self) -> u64 {
        self.0.next_u64()
    }
    fn fill_bytes(&mut self, dest: &mut [u8]) {
        self.0.fill_bytes(dest);
    }
}

impl<T: CryptoRng> OldCryptoRng for RngWrapper<T> {}
impl<T: CryptoRng> CryptoRng for RngWrapper<T> {}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn wrapper_gives_same_stream() {
        // Wrapping must not alter the underlying stream of bytes.
        use rand::{rngs::StdRng, SeedableRng};
        let mut rng1 = StdRng::seed_from_u64(17);
        let mut rng2 = StdRng::seed_from_u64(17).rng_compat();

        let mut b1 = [0_u8; 32];
        let mut b2 = [0_u8; 32];
        rng1.fill_bytes(&mut b1);
        OldRngCore::fill_bytes(&mut rng2, &mut b2);
        assert_eq!(b1, b2);
    }
}
