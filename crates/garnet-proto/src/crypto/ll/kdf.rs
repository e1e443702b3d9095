//! Key derivation functions
//!
//! The circuit-creation handshakes use these to turn a shared secret
//! into the key material that a circuit needs.  There are two: an
//! iterated-SHA1 construction used by the legacy handshakes, and an
//! HKDF-SHA256 instantiation used by ntor.

use crate::{Error, Result};
use digest::Digest;
use garnet_llcrypto::d::{Sha1, Sha256};
use tor_bytes::SecretBuf;

/// A trait for a key derivation function.
pub trait Kdf {
    /// Derive `n_bytes` of key data from some secret `seed`.
    fn derive(&self, seed: &[u8], n_bytes: usize) -> Result<SecretBuf>;
}

/// A legacy KDF, for use with TAP and CREATE_FAST.
///
/// This KDF is based on SHA1: the output is
/// `SHA1(s || [i]) || SHA1(s || [i+1]) || ...`, truncated to the
/// length requested.  The index starts at `idx`, so that a caller can
/// skip blocks that an earlier derivation already consumed.
pub struct LegacyKdf {
    /// The index of the first block to generate.
    idx: u8,
}

impl LegacyKdf {
    /// Instantiate a LegacyKdf, starting the block counter at `idx`.
    pub fn new(idx: u8) -> Self {
        LegacyKdf { idx }
    }
}
impl Kdf for LegacyKdf {
    fn derive(&self, seed: &[u8], n_bytes: usize) -> Result<SecretBuf> {
        let digest_len = 20;

        let mut result = SecretBuf::with_capacity(n_bytes + digest_len);
        let mut k = self.idx;
        if n_bytes > digest_len * (256 - usize::from(k)) {
            return Err(Error::InvalidOutputLength);
        }

        while result.len() < n_bytes {
            let mut d = Sha1::new();
            d.update(seed);
            d.update([k]);
            result.extend_from_slice(&d.finalize());
            k += 1;
        }

        result.truncate(n_bytes);
        Ok(result)
    }
}

/// A parameterized KDF, for use with ntor.
///
/// This KDF is just HKDF-SHA256, with the constant `t_key` as its salt
/// and the constant `m_expand` as its info string.
pub struct Ntor1Kdf<'a, 'b> {
    /// The value used as HKDF salt.
    t_key: &'a [u8],
    /// The value used as the HKDF info parameter.
    m_expand: &'b [u8],
}

impl<'a, 'b> Ntor1Kdf<'a, 'b> {
    /// Instantiate an Ntor1Kdf with given values for `t_key` and
    /// `m_expand`.
    pub fn new(t_key: &'a [u8], m_expand: &'b [u8]) -> Self {
        Ntor1Kdf { t_key, m_expand }
    }
}

impl Kdf for Ntor1Kdf<'_, '_> {
    fn derive(&self, seed: &[u8], n_bytes: usize) -> Result<SecretBuf> {
        let hkdf = hkdf::Hkdf::<Sha256>::new(Some(self.t_key), seed);

        let mut result: SecretBuf = vec![0; n_bytes].into();
        hkdf.expand(self.m_expand, result.as_mut())
            .map_err(|_| Error::InvalidOutputLength)?;
        Ok(result)
    }
}

#[cfg(test)]
mod test {
    #![allow(clippy::unwrap_used)]
    use super::*;

    #[test]
    fn legacy_blocks() {
        // The output is the concatenation of indexed SHA1 blocks, so a
        // longer derivation must extend a shorter one.
        let seed = b"in a hole in the ground there lived";
        let k20 = LegacyKdf::new(0).derive(seed, 20).unwrap();
        let k92 = LegacyKdf::new(0).derive(seed, 92).unwrap();
        assert_eq!(&k20[..], &k92[..20]);

        // The first block is just SHA1(seed || 0x00).
        let mut d = Sha1::new();
        d.update(seed);
        d.update([0_u8]);
        assert_eq!(&k20[..], &d.finalize()[..]);

        // Starting the counter at 1 skips exactly one block.
        let shifted = LegacyKdf::new(1).derive(seed, 72).unwrap();
        assert_eq!(&shifted[..], &k92[20..]);
    }

    #[test]
    fn legacy_too_much() {
        let e = LegacyKdf::new(200).derive(b"x", 20 * 57);
        assert!(e.is_err());
        assert!(LegacyKdf::new(200).derive(b"x", 20 * 56).is_ok());
    }

    #[test]
    fn ntor1_kdf() {
        // HKDF-SHA256 test vector from RFC 5869, case 1.
        use hex_literal::hex;
        let ikm = hex!("0b0b0b0b0b0b0b0b0b0b0b0b0b0b0b0b0b0b0b0b0b0b");
        let salt = hex!("000102030405060708090a0b0c");
        let info = hex!("f0f1f2f3f4f5f6f7f8f9");

        let kdf = Ntor1Kdf::new(&salt[..], &info[..]);
        let okm = kdf.derive(&ikm[..], 42).unwrap();
        assert_eq!(
            &okm[..],
            &hex!(
                "3cb25f25faacd57a90434f64d0362f2a"
                "2d2d0a90cf1a5a4c5db02d56ecc4c5bf"
                "34007208d5b887185865"
            )[..]
        );
    }
}
