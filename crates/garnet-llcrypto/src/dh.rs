//! Finite-field Diffie–Hellman, as used by the legacy circuit-creation
//! handshake.
//!
//! The group is the 1024-bit MODP group ("Oakley group 2") with
//! generator 2.  Nothing else in the protocol family uses classic DH, so
//! this module hardcodes those parameters.

use std::sync::OnceLock;

use num_bigint_dig::BigUint;
use rand_core::{CryptoRng, RngCore};
use zeroize::Zeroizing;

use crate::{Error, Result};

/// Length of a DH public value (and of a shared secret), in bytes.
pub const DH_LEN: usize = 128;

/// Length of a DH private exponent, in bytes.
///
/// The protocol calls for 320-bit private exponents.
pub const DH_SEC_LEN: usize = 40;

/// The hexadecimal expansion of the 1024-bit MODP prime from RFC 2409.
const MODP1024_PRIME_HEX: &[u8] = b"\
FFFFFFFFFFFFFFFFC90FDAA22168C234C4C6628B80DC1CD129024E088A67CC74\
020BBEA63B139B22514A08798E3404DDEF9519B3CD3A431B302B0A6DF25F1437\
4FE1356D6D51C245E485B576625E7EC6F44C42E9A637ED6B0BFF5CB6F406B7ED\
EE386BFB5A899FA5AE9F24117C4B1FE649286651ECE65381FFFFFFFFFFFFFFFF";

/// Shared group parameters.
struct DhParams {
    /// The group modulus p.
    p: BigUint,
    /// The group generator g (2).
    g: BigUint,
    /// Cached p - 1, the upper bound on valid public values.
    p_minus_1: BigUint,
}

/// Return the MODP-1024 parameters, initializing them on first use.
fn params() -> &'static DhParams {
    static PARAMS: OnceLock<DhParams> = OnceLock::new();
    PARAMS.get_or_init(|| {
        let p = BigUint::parse_bytes(MODP1024_PRIME_HEX, 16)
            .expect("constant MODP prime failed to parse");
        let p_minus_1 = &p - BigUint::from(1_u32);
        DhParams {
            p,
            g: BigUint::from(2_u32),
            p_minus_1,
        }
    })
}

/// A Diffie–Hellman keypair over the MODP-1024 group.
pub struct KeyPair {
    /// The private exponent x.
    x: Zeroizing<BigUint>,
    /// The public value g^x, already serialized.
    public: [u8; DH_LEN],
}

impl KeyPair {
    /// Generate a new keypair with a random 320-bit private exponent.
    pub fn generate<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        let mut secret = Zeroizing::new([0_u8; DH_SEC_LEN]);
        rng.fill_bytes(&mut secret[..]);
        let x = Zeroizing::new(BigUint::from_bytes_be(&secret[..]));
        let gx = params().g.modpow(&x, &params().p);
        KeyPair {
            x,
            public: pad_to_dh_len(&gx),
        }
    }

    /// Return our public value g^x as the 128 bytes sent on the wire.
    pub fn public(&self) -> &[u8; DH_LEN] {
        &self.public
    }

    /// Compute the 128-byte shared secret with a peer's public value.
    ///
    /// Rejects public values outside `[2, p-2]`: those would let the peer
    /// force the shared secret into a tiny subgroup.
    pub fn shared_secret(&self, peer_public: &[u8]) -> Result<Zeroizing<[u8; DH_LEN]>> {
        if peer_public.len() != DH_LEN {
            return Err(Error::BadPublicValue);
        }
        let peer = BigUint::from_bytes_be(peer_public);
        if peer <= BigUint::from(1_u32) || peer >= params().p_minus_1 {
            return Err(Error::BadPublicValue);
        }
        let secret = peer.modpow(&self.x, &params().p);
        Ok(Zeroizing::new(pad_to_dh_len(&secret)))
    }
}

/// Serialize `n` big-endian into exactly [`DH_LEN`] bytes, left-padded
/// with zeros.
fn pad_to_dh_len(n: &BigUint) -> [u8; DH_LEN] {
    let bytes = n.to_bytes_be();
    let mut out = [0_u8; DH_LEN];
    debug_assert!(bytes.len() <= DH_LEN);
    out[DH_LEN - bytes.len()..].copy_from_slice(&bytes);
    out
}

#[cfg(test)]
mod test {
    #![allow(clippy::unwrap_used)]
    use super::*;

    #[test]
    fn roundtrip() {
        let mut rng = rand::rng();
        let kp1 = KeyPair::generate(&mut rng);
        let kp2 = KeyPair::generate(&mut rng);

        assert_eq!(kp1.public().len(), DH_LEN);

        let s1 = kp1.shared_secret(&kp2.public()[..]).unwrap();
        let s2 = kp2.shared_secret(&kp1.public()[..]).unwrap();
        assert_eq!(&s1[..], &s2[..]);
    }

    #[test]
    fn rejects_degenerate_values() {
        let mut rng = rand::rng();
        let kp = KeyPair::generate(&mut rng);

        // 0 and 1 are out of range.
        for small in 0_u8..=1 {
            let mut value = [0_u8; DH_LEN];
            value[DH_LEN - 1] = small;
            assert!(kp.shared_secret(&value[..]).is_err());
        }

        // So are p-1 and anything larger.
        let p_minus_1 = {
            let p = BigUint::parse_bytes(MODP1024_PRIME_HEX, 16).unwrap();
            pad_to_dh_len(&(&p - BigUint::from(1_u32)))
        };
        assert!(kp.shared_secret(&p_minus_1[..]).is_err());
        assert!(kp.shared_secret(&[0xff; DH_LEN][..]).is_err());

        // Wrong length entirely.
        assert!(kp.shared_secret(&[4_u8; 64][..]).is_err());
    }
}
