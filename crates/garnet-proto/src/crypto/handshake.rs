//! Circuit-creation handshakes.
//!
//! Each handshake is a one-way-authenticated key exchange: a client who
//! knows a public "onion key" for this relay sends a "client onionskin",
//! and receives a "relay onionskin" in response.  When the handshake is
//! successful, both sides share a set of circuit keys, and the client
//! knows that nobody else shares them unless they hold the relay's
//! private onion key.
//!
//! Three variants are implemented: ntor (current), TAP (legacy
//! RSA+DH), and CREATE_FAST (no public key at all; only safe as the
//! first hop over an already-encrypted link).

pub mod fast;
pub mod ntor;
pub mod tap;

use crate::crypto::binding::CircuitBinding;
use crate::crypto::ll::kdf::{Kdf, LegacyKdf};
use crate::{Error, Result};

use rand_core::{CryptoRng, RngCore};
use tor_bytes::SecretBuf;
use zeroize::Zeroizing;

/// Total length of the key material one circuit consumes.
pub(crate) const CIRCUIT_KEY_LEN: usize = 20 * 3 + 16 * 2;

/// A ClientHandshake is used to generate a client onionskin and
/// handle a relay onionskin.
///
/// The relay does not normally run these itself, but they are the other
/// half of every handshake we answer, and the extension path speaks
/// them on behalf of clients.
pub trait ClientHandshake {
    /// The type for the onion key.
    type KeyType;
    /// The type for the state that the client holds while waiting for a
    /// reply.
    type StateType;

    /// Generate a new client onionskin for a relay with a given onion
    /// key.
    ///
    /// On success, return a state object that will be used to complete
    /// the handshake, along with the message to send.
    fn client1<R: RngCore + CryptoRng>(
        rng: &mut R,
        key: &Self::KeyType,
    ) -> Result<(Self::StateType, Vec<u8>)>;

    /// Handle an onionskin from a relay, and produce the circuit keys.
    ///
    /// The state object must match the one that was used to make the
    /// client onionskin that the relay is replying to.
    fn client2<T: AsRef<[u8]>>(state: Self::StateType, msg: T) -> Result<CircuitKeys>;
}

/// A ServerHandshake is used to handle a client onionskin and generate
/// a relay onionskin.
pub trait ServerHandshake {
    /// The type for the onion key.  This is a private key type.
    type KeyType;

    /// Perform the server handshake.  Take as input a strong PRNG in
    /// `rng`, our private onion key(s), and the client's message.
    ///
    /// On success, return the circuit keys and a reply message to send.
    fn server<R: RngCore + CryptoRng, T: AsRef<[u8]>>(
        rng: &mut R,
        key: &Self::KeyType,
        msg: T,
    ) -> RelayHandshakeResult<(CircuitKeys, Vec<u8>)>;
}

/// The full set of key material derived for one circuit.
///
/// Each direction of a circuit gets a cipher key and a digest seed; the
/// remaining `KH` value binds later messages to this handshake, and the
/// legacy handshakes also send it back to the client in their reply.
pub struct CircuitKeys {
    /// Derivative key data; the handshake binding value.
    kh: Zeroizing<[u8; 20]>,
    /// Seed for the forward (client to relay) running digest.
    df: Zeroizing<[u8; 20]>,
    /// Seed for the backward (relay to client) running digest.
    db: Zeroizing<[u8; 20]>,
    /// Key for the forward cipher.
    kf: Zeroizing<[u8; 16]>,
    /// Key for the backward cipher.
    kb: Zeroizing<[u8; 16]>,
}

impl CircuitKeys {
    /// Derive circuit keys from a shared secret with the legacy KDF.
    ///
    /// In this derivation, `KH` is the first segment of the output,
    /// followed by the digest seeds and then the cipher keys.
    pub fn from_kdf_tor(secret: &[u8]) -> Result<Self> {
        let seed = LegacyKdf::new(0).derive(secret, CIRCUIT_KEY_LEN)?;
        let mut keys = CircuitKeys::zeroed();
        let (kh, rest) = seed.split_at(20);
        let (df, rest) = rest.split_at(20);
        let (db, rest) = rest.split_at(20);
        let (kf, kb) = rest.split_at(16);
        keys.kh.copy_from_slice(kh);
        keys.df.copy_from_slice(df);
        keys.db.copy_from_slice(db);
        keys.kf.copy_from_slice(kf);
        keys.kb.copy_from_slice(kb);
        Ok(keys)
    }

    /// Partition key material already derived by the ntor KDF.
    ///
    /// In this derivation, `KH` is the *last* segment: the digest seeds
    /// and cipher keys come first.
    pub fn from_ntor_seed(seed: &SecretBuf) -> Result<Self> {
        if seed.len() != CIRCUIT_KEY_LEN {
            return Err(Error::InvalidKDFOutputLength);
        }
        let mut keys = CircuitKeys::zeroed();
        let (df, rest) = seed.split_at(20);
        let (db, rest) = rest.split_at(20);
        let (kf, rest) = rest.split_at(16);
        let (kb, kh) = rest.split_at(16);
        keys.df.copy_from_slice(df);
        keys.db.copy_from_slice(db);
        keys.kf.copy_from_slice(kf);
        keys.kb.copy_from_slice(kb);
        keys.kh.copy_from_slice(kh);
        Ok(keys)
    }

    /// Return an all-zero set of keys, for filling in.
    fn zeroed() -> Self {
        CircuitKeys {
            kh: Zeroizing::new([0; 20]),
            df: Zeroizing::new([0; 20]),
            db: Zeroizing::new([0; 20]),
            kf: Zeroizing::new([0; 16]),
            kb: Zeroizing::new([0; 16]),
        }
    }

    /// Return the handshake binding value `KH`.
    pub fn kh(&self) -> &[u8; 20] {
        &self.kh
    }

    /// Return the binding value as a [`CircuitBinding`].
    pub fn binding(&self) -> CircuitBinding {
        CircuitBinding::from(*self.kh)
    }

    /// Return the forward digest seed and cipher key.
    pub(crate) fn forward(&self) -> (&[u8; 20], &[u8; 16]) {
        (&self.df, &self.kf)
    }

    /// Return the backward digest seed and cipher key.
    pub(crate) fn backward(&self) -> (&[u8; 20], &[u8; 16]) {
        (&self.db, &self.kb)
    }
}

/// An error produced by our attempt to handle a client's onion
/// handshake.
#[derive(Clone, Debug, thiserror::Error)]
#[non_exhaustive]
pub enum RelayHandshakeError {
    /// An error in parsing a handshake message.
    #[error("Problem decoding onion handshake")]
    Fmt(#[from] tor_bytes::Error),
    /// The client asked for a key we didn't have.
    #[error("Client asked for a key or ID that we don't have")]
    MissingKey,
    /// The client did something wrong with their handshake or
    /// cryptography.
    #[error("Bad handshake from client")]
    BadClientHandshake,
    /// An internal error.
    #[error("Internal error")]
    Internal(#[from] tor_error::Bug),
}

/// Type alias for results from our attempt to handle a client's onion
/// handshake.
pub type RelayHandshakeResult<T> = std::result::Result<T, RelayHandshakeError>;

#[cfg(test)]
mod test {
    #![allow(clippy::unwrap_used)]
    use super::*;

    #[test]
    fn partition_orders_differ() {
        // The same 92 bytes of key material, partitioned both ways:
        // the legacy order has KH first, the ntor order has it last.
        let material: Vec<u8> = (0..92_u8).collect();

        let ntor = CircuitKeys::from_ntor_seed(&material.clone().into()).unwrap();
        assert_eq!(&ntor.forward().0[..], &material[0..20]);
        assert_eq!(&ntor.backward().0[..], &material[20..40]);
        assert_eq!(&ntor.forward().1[..], &material[40..56]);
        assert_eq!(&ntor.backward().1[..], &material[56..72]);
        assert_eq!(&ntor.kh()[..], &material[72..92]);

        // from_kdf_tor runs the KDF itself, so check its layout against
        // a manual derivation.
        use crate::crypto::ll::kdf::{Kdf, LegacyKdf};
        let secret = b"mainly in the plain";
        let raw = LegacyKdf::new(0).derive(secret, 92).unwrap();
        let legacy = CircuitKeys::from_kdf_tor(secret).unwrap();
        assert_eq!(&legacy.kh()[..], &raw[0..20]);
        assert_eq!(&legacy.forward().0[..], &raw[20..40]);
        assert_eq!(&legacy.backward().0[..], &raw[40..60]);
        assert_eq!(&legacy.forward().1[..], &raw[60..76]);
        assert_eq!(&legacy.backward().1[..], &raw[76..92]);
    }

    #[test]
    fn ntor_seed_must_be_exact() {
        assert!(CircuitKeys::from_ntor_seed(&vec![0_u8; 91].into()).is_err());
        assert!(CircuitKeys::from_ntor_seed(&vec![0_u8; 93].into()).is_err());
        assert!(CircuitKeys::from_ntor_seed(&vec![0_u8; 92].into()).is_ok());
    }
}
