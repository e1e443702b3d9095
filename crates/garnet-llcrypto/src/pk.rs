//! Public-key cryptography for the relay protocols.
//!
//! The wire protocol is conservative here: Curve25519 for the modern
//! circuit handshake, and RSA-1024 (with SHA-1 identities) everywhere the
//! legacy protocol demands it.

pub mod rsa;
pub mod x509;

/// Re-exporting Curve25519 implementations.
///
/// Eventually there should probably be a key-agreement trait or something
/// here, but for now we are just re-using the APIs from [`x25519_dalek`].
pub mod curve25519 {
    use rand_core::{CryptoRng, RngCore};

    pub use x25519_dalek::{PublicKey, SharedSecret, StaticSecret};

    /// Length of a Curve25519 public key, in bytes.
    pub const PK_LEN: usize = 32;

    /// Generate a new random secret scalar.
    ///
    /// We fill a byte array ourselves rather than using the dalek
    /// constructors, so that any `rand_core`-compatible RNG will do.
    pub fn generate_secret<R: RngCore + CryptoRng>(rng: &mut R) -> StaticSecret {
        let mut bytes = [0_u8; 32];
        rng.fill_bytes(&mut bytes);
        StaticSecret::from(bytes)
    }
}
