//! Relay cell cryptography
//!
//! Every relay cell is onion-encrypted: the client shares a "forward"
//! and a "backward" crypto state with each hop of a circuit.  Each state
//! is an AES-CTR keystream plus a running digest absorbed over every
//! relay cell seen in that direction.  A hop "recognizes" a cell (the
//! cell terminates there) when the recognized field is zero and the
//! first four bytes of the running digest match the cell's digest field.
//!
//! The types here are generic over cipher and digest; the protocol as
//! deployed instantiates them with AES-128-CTR and SHA-1 (see
//! [`Tor1RelayCrypto`]).

use std::ops::Range;

use cipher::{KeyIvInit, StreamCipher};
use digest::Digest;

use crate::crypto::binding::CircuitBinding;
use crate::crypto::handshake::CircuitKeys;
use crate::util::ct;
use crate::{Error, Result};
use garnet_cell::chancell::BoxedCellBody;
use garnet_llcrypto::cipher::aes::Aes128Ctr;
use garnet_llcrypto::d::Sha1;

/// Byte range of the "recognized" field within a relay cell body.
pub(crate) const RECOGNIZED_RANGE: Range<usize> = 1..3;
/// Byte range of the digest field within a relay cell body.
pub(crate) const DIGEST_RANGE: Range<usize> = 5..9;

/// Type for the body of a relay cell.
#[derive(Clone)]
pub struct RelayCellBody(BoxedCellBody);

impl From<BoxedCellBody> for RelayCellBody {
    fn from(body: BoxedCellBody) -> Self {
        RelayCellBody(body)
    }
}
impl From<RelayCellBody> for BoxedCellBody {
    fn from(cell: RelayCellBody) -> Self {
        cell.0
    }
}
impl AsRef<[u8]> for RelayCellBody {
    fn as_ref(&self) -> &[u8] {
        &self.0[..]
    }
}
impl AsMut<[u8]> for RelayCellBody {
    fn as_mut(&mut self) -> &mut [u8] {
        &mut self.0[..]
    }
}

impl RelayCellBody {
    /// Prepare a cell to be sent: zero its recognized and digest
    /// fields, absorb it into the running digest `d`, and stamp the
    /// first four bytes of the digest into place.
    fn set_digest<D: Digest + Clone>(&mut self, d: &mut D) {
        self.0[RECOGNIZED_RANGE].fill(0);
        self.0[DIGEST_RANGE].fill(0);
        d.update(&self.0[..]);
        let snapshot = d.clone().finalize();
        self.0[DIGEST_RANGE].copy_from_slice(&snapshot[0..4]);
    }

    /// Check whether this (decrypted) cell terminates at the hop
    /// holding digest state `d`.
    ///
    /// The running digest is only advanced if the cell is recognized;
    /// an unrecognized cell belongs to some other hop's stream and must
    /// not disturb ours.
    fn is_recognized<D: Digest + Clone>(&self, d: &mut D) -> bool {
        let recognized = u16::from_be_bytes(
            self.0[RECOGNIZED_RANGE]
                .try_into()
                .expect("Two-byte slice was not two bytes long!?"),
        );
        if recognized != 0 {
            return false;
        }

        // Absorb the cell with its digest field zeroed, without yet
        // committing to the result.
        let mut dtmp = d.clone();
        dtmp.update(&self.0[..DIGEST_RANGE.start]);
        dtmp.update([0_u8; 4]);
        dtmp.update(&self.0[DIGEST_RANGE.end..]);
        let snapshot = dtmp.clone().finalize();

        if ct::bytes_eq(&snapshot[0..4], &self.0[DIGEST_RANGE]) {
            // The cell is ours; commit the digest update.
            *d = dtmp;
            true
        } else {
            false
        }
    }
}

/// A relay's view of the outbound (away from the client) crypto state
/// on a given circuit.
pub trait OutboundRelayLayer {
    /// Decrypt a RelayCellBody that is moving away from the client.
    ///
    /// Return true if it is addressed to us.
    fn decrypt_outbound(&mut self, cell: &mut RelayCellBody) -> bool;
}

/// A relay's view of the inbound (towards the client) crypto state on a
/// given circuit.
pub trait InboundRelayLayer {
    /// Prepare a RelayCellBody to be sent towards the client, and
    /// encrypt it.
    fn originate(&mut self, cell: &mut RelayCellBody);
    /// Encrypt a RelayCellBody that is moving towards the client.
    fn encrypt_inbound(&mut self, cell: &mut RelayCellBody);
}

/// A client's view of the crypto state shared with a single relay, as
/// used for outbound cells.
pub trait OutboundClientLayer {
    /// Prepare a RelayCellBody to be sent to the relay at this layer,
    /// and encrypt it.
    fn originate_for(&mut self, cell: &mut RelayCellBody);
    /// Encrypt a RelayCellBody to be decrypted by this layer.
    fn encrypt_outbound(&mut self, cell: &mut RelayCellBody);
}

/// A client's view of the crypto state shared with a single relay, as
/// used for inbound cells.
pub trait InboundClientLayer {
    /// Decrypt a RelayCellBody that passed through this layer.
    ///
    /// Return true if this layer is the originator.
    fn decrypt_inbound(&mut self, cell: &mut RelayCellBody) -> bool;
}

/// One direction of a hop's cryptographic state: a keyed stream cipher
/// and a running digest.
pub struct CryptState<SC: StreamCipher, D: Digest + Clone> {
    /// The keystream, keyed at handshake time.  The IV starts at zero.
    cipher: SC,
    /// The running digest, seeded at handshake time.
    digest: D,
}

impl<SC: StreamCipher + KeyIvInit, D: Digest + Clone> CryptState<SC, D> {
    /// Construct a state from a cipher key and a digest seed.
    fn new(key: &[u8], digest_seed: &[u8]) -> Result<Self> {
        let iv = vec![0_u8; SC::iv_size()];
        let cipher = SC::new_from_slices(key, &iv).map_err(|_| Error::InvalidKDFOutputLength)?;
        let mut digest = D::new();
        digest.update(digest_seed);
        Ok(CryptState { cipher, digest })
    }
}

impl<SC: StreamCipher, D: Digest + Clone> OutboundRelayLayer for CryptState<SC, D> {
    fn decrypt_outbound(&mut self, cell: &mut RelayCellBody) -> bool {
        self.cipher.apply_keystream(cell.as_mut());
        cell.is_recognized(&mut self.digest)
    }
}
impl<SC: StreamCipher, D: Digest + Clone> InboundRelayLayer for CryptState<SC, D> {
    fn originate(&mut self, cell: &mut RelayCellBody) {
        cell.set_digest(&mut self.digest);
        self.cipher.apply_keystream(cell.as_mut());
    }
    fn encrypt_inbound(&mut self, cell: &mut RelayCellBody) {
        self.cipher.apply_keystream(cell.as_mut());
    }
}
impl<SC: StreamCipher, D: Digest + Clone> OutboundClientLayer for CryptState<SC, D> {
    fn originate_for(&mut self, cell: &mut RelayCellBody) {
        cell.set_digest(&mut self.digest);
        self.cipher.apply_keystream(cell.as_mut());
    }
    fn encrypt_outbound(&mut self, cell: &mut RelayCellBody) {
        self.cipher.apply_keystream(cell.as_mut());
    }
}
impl<SC: StreamCipher, D: Digest + Clone> InboundClientLayer for CryptState<SC, D> {
    fn decrypt_inbound(&mut self, cell: &mut RelayCellBody) -> bool {
        self.cipher.apply_keystream(cell.as_mut());
        cell.is_recognized(&mut self.digest)
    }
}

/// A paired forward and backward crypto state for one hop of one
/// circuit, plus the binding value tied to its handshake.
pub struct CryptStatePair<SC: StreamCipher, D: Digest + Clone> {
    /// State for the forward (away from the client) direction.
    fwd: CryptState<SC, D>,
    /// State for the backward (towards the client) direction.
    back: CryptState<SC, D>,
    /// The handshake binding value.
    binding: CircuitBinding,
}

impl<SC: StreamCipher + KeyIvInit, D: Digest + Clone> CryptStatePair<SC, D> {
    /// Construct a pair from a complete set of circuit keys.
    pub fn from_circuit_keys(keys: &CircuitKeys) -> Result<Self> {
        let (df, kf) = keys.forward();
        let (db, kb) = keys.backward();
        Ok(CryptStatePair {
            fwd: CryptState::new(&kf[..], &df[..])?,
            back: CryptState::new(&kb[..], &db[..])?,
            binding: keys.binding(),
        })
    }

    /// Consume this pair and return the two directions and the binding.
    ///
    /// The forward state is returned first.
    pub fn split(self) -> (CryptState<SC, D>, CryptState<SC, D>, CircuitBinding) {
        (self.fwd, self.back, self.binding)
    }
}

/// Standard relay crypto, as instantiated for RELAY cells.
pub type Tor1RelayCrypto = CryptStatePair<Aes128Ctr, Sha1>;
