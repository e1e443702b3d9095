//! Implementation for the (deprecated) CreateFast handshake.
//!

use super::{
    CircuitKeys, ClientHandshake, RelayHandshakeError, RelayHandshakeResult, ServerHandshake,
};
use crate::util::ct::bytes_eq;
use crate::{Error, Result};

use rand_core::{CryptoRng, RngCore};
use tor_bytes::SecretBuf;
use tor_error::into_internal;

/// Number of bytes used for a "CREATE_FAST" handshake by the initiator.
pub(crate) const FAST_C_HANDSHAKE_LEN: usize = 20;
/// Number of bytes used for a "CREATE_FAST" handshake by the responder
pub(crate) const FAST_S_HANDSHAKE_LEN: usize = 20 * 2;

/// State for a CREATE_FAST client handshake.
pub struct CreateFastClientState([u8; FAST_C_HANDSHAKE_LEN]);

/// Client-handshake for CREATE_FAST.
///
/// This handshake is only safe over a channel that is already
/// encrypted; it proves nothing about who the other end is.
pub struct CreateFastClient;

/// How many bytes does this handshake use for its input seed?
const SECRET_INPUT_LEN: usize = 40;

impl ClientHandshake for CreateFastClient {
    type KeyType = ();
    type StateType = CreateFastClientState;

    fn client1<R: RngCore + CryptoRng>(
        rng: &mut R,
        _key: &Self::KeyType,
    ) -> Result<(Self::StateType, Vec<u8>)> {
        let mut state = [0_u8; FAST_C_HANDSHAKE_LEN];
        rng.fill_bytes(&mut state);
        Ok((CreateFastClientState(state), state.into()))
    }

    fn client2<T: AsRef<[u8]>>(state: Self::StateType, msg: T) -> Result<CircuitKeys> {
        let msg = msg.as_ref();
        if msg.len() != FAST_S_HANDSHAKE_LEN {
            return Err(Error::BadCircHandshake);
        }
        let mut inp = SecretBuf::with_capacity(SECRET_INPUT_LEN);
        inp.extend_from_slice(&state.0[..]);
        inp.extend_from_slice(&msg[0..20]);

        let keys = CircuitKeys::from_kdf_tor(&inp[..])?;
        if !bytes_eq(&keys.kh()[..], &msg[20..40]) {
            return Err(Error::BadCircHandshake);
        }

        Ok(keys)
    }
}

/// Relay-handshake for CREATE_FAST.
pub struct CreateFastServer;

impl ServerHandshake for CreateFastServer {
    type KeyType = ();

    fn server<R: RngCore + CryptoRng, T: AsRef<[u8]>>(
        rng: &mut R,
        _key: &Self::KeyType,
        msg: T,
    ) -> RelayHandshakeResult<(CircuitKeys, Vec<u8>)> {
        let msg = msg.as_ref();
        if msg.len() != FAST_C_HANDSHAKE_LEN {
            return Err(RelayHandshakeError::BadClientHandshake);
        }
        let mut y = [0_u8; 20];
        rng.fill_bytes(&mut y);

        let mut inp = SecretBuf::with_capacity(SECRET_INPUT_LEN);
        inp.extend_from_slice(msg);
        inp.extend_from_slice(&y[..]);
        let keys = CircuitKeys::from_kdf_tor(&inp[..])
            .map_err(into_internal!("Can't expand key"))?;

        let mut reply = Vec::with_capacity(FAST_S_HANDSHAKE_LEN);
        reply.extend_from_slice(&y[..]);
        reply.extend_from_slice(&keys.kh()[..]);

        Ok((keys, reply))
    }
}

#[cfg(test)]
mod test {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use hex_literal::hex;

    #[test]
    fn roundtrip() {
        let mut rng = rand::rng();

        let (state, cmsg) = CreateFastClient::client1(&mut rng, &()).unwrap();
        let (s_keys, smsg) = CreateFastServer::server(&mut rng, &(), cmsg).unwrap();
        let c_keys = CreateFastClient::client2(state, smsg).unwrap();

        assert_eq!(s_keys.kh(), c_keys.kh());
        assert_eq!(s_keys.forward().0, c_keys.forward().0);
        assert_eq!(s_keys.forward().1, c_keys.forward().1);
        assert_eq!(s_keys.backward().0, c_keys.backward().0);
        assert_eq!(s_keys.backward().1, c_keys.backward().1);
    }

    #[test]
    fn failure() {
        let mut rng = rand::rng();

        // badly formatted client message.
        let cmsg = [6_u8; 19];
        let ans = CreateFastServer::server(&mut rng, &(), cmsg);
        assert!(ans.is_err());

        // corrupt/incorrect server reply.
        let (state, cmsg) = CreateFastClient::client1(&mut rng, &()).unwrap();
        let (_, mut smsg) = CreateFastServer::server(&mut rng, &(), cmsg).unwrap();
        smsg[35] ^= 16;
        let ans = CreateFastClient::client2(state, smsg);
        assert!(ans.is_err());
    }

    fn test_one_handshake(cmsg: [u8; 20], smsg: [u8; 40], keys: [u8; 72]) {
        use crate::crypto::testing::FakePRNG;

        let mut rng = FakePRNG::new(&cmsg);
        let (state, cmsg) = CreateFastClient::client1(&mut rng, &()).unwrap();

        // The server's "randomness" is the Y value of the reference
        // exchange, so its whole reply must match the reference.
        let mut rng = FakePRNG::new(&smsg);
        let (s_keys, reply) = CreateFastServer::server(&mut rng, &(), cmsg).unwrap();
        assert_eq!(&reply[..], &smsg[..]);

        let c_keys = CreateFastClient::client2(state, reply).unwrap();

        for k in [&s_keys, &c_keys] {
            assert_eq!(&k.forward().0[..], &keys[0..20]);
            assert_eq!(&k.backward().0[..], &keys[20..40]);
            assert_eq!(&k.forward().1[..], &keys[40..56]);
            assert_eq!(&k.backward().1[..], &keys[56..72]);
            assert_eq!(&k.kh()[..], &smsg[20..40]);
        }
    }

    #[test]
    fn testvec() {
        // Generated from a C implementation of this handshake.
        test_one_handshake(
            hex!("080E247DF7C252FCD2DC10F459703480C223E3A6"),
            hex!("BA95C0D092335428BF80093BBED0B7A26C49E1E8696FBF9C8D6BE26504219C000D26AFE370FCEF04"),
            hex!(
                "AFA89B4FC8CF882335A582C52478B5FCB1E08DAF707E2C2D23B8C27D30BD461F"
                "3DF98A3AF82221CB658AD0AA8680B99067E4F7DBC546970EA9A56B26433C71DA"
                "867BDD09C14A1308"
            ),
        );

        test_one_handshake(
            hex!("5F786C724C2F5978474A04FA63772057AD896A03"),
            hex!("6210B037001405742FE78B6F5B34E6DB3C9F2F7E24239498613E0ED872E110A00774A3FCB37A7507"),
            hex!(
                "D41B65D83FB4B34A322B658BE4D706EDCD8B62813757E719118C394E1F22E1C8"
                "EA8959BAB30E856A914C3054946F547397094DE031F5BCA384C65C8880BF7AAB"
                "9CE7BEE33971F9DE"
            ),
        );
    }

    #[test]
    fn zero_seed_reply_shape() {
        // Even a degenerate all-zero client seed produces a reply of
        // the right shape, whose tail is the binding value.
        use crate::crypto::ll::kdf::{Kdf, LegacyKdf};
        use crate::crypto::testing::FakePRNG;

        let x = [0_u8; 20];
        let y = [0x5a_u8; 20];
        let mut rng = FakePRNG::new(&y);
        let (keys, reply) = CreateFastServer::server(&mut rng, &(), x).unwrap();

        assert_eq!(&reply[0..20], &y[..]);
        assert_eq!(&reply[20..40], &keys.kh()[..]);

        let mut seed = Vec::new();
        seed.extend_from_slice(&x[..]);
        seed.extend_from_slice(&y[..]);
        let kh = LegacyKdf::new(0).derive(&seed, 20).unwrap();
        assert_eq!(&kh[..], &keys.kh()[..]);
    }
}
