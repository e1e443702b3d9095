//! Implementation for the ntor handshake.

use super::{
    CIRCUIT_KEY_LEN, CircuitKeys, ClientHandshake, RelayHandshakeError, RelayHandshakeResult,
    ServerHandshake,
};
use crate::crypto::ll::kdf::{Kdf, Ntor1Kdf};
use crate::util::ct;
use crate::{Error, Result};

use garnet_llcrypto::d::Sha256;
use garnet_llcrypto::pk::curve25519::{self, PublicKey, SharedSecret, StaticSecret};
use garnet_llcrypto::pk::rsa::RsaIdentity;
use hmac::{Hmac, Mac};
use rand_core::{CryptoRng, RngCore};
use subtle::{Choice, ConstantTimeEq};
use tor_bytes::{Reader, SecretBuf};

/// The protocol identifier, mixed into every derivation.
const PROTOID: &[u8] = b"ntor-curve25519-sha256-1";
/// HMAC tag for computing the MAC of the handshake.
const T_MAC: &[u8] = b"ntor-curve25519-sha256-1:mac";
/// HMAC tag (as HKDF salt) for extracting the key seed.
const T_KEY: &[u8] = b"ntor-curve25519-sha256-1:key_extract";
/// HMAC tag for the "verify" check value.
const T_VERIFY: &[u8] = b"ntor-curve25519-sha256-1:verify";
/// HKDF info string for expanding the key seed.
const M_EXPAND: &[u8] = b"ntor-curve25519-sha256-1:key_expand";
/// Role string mixed into the server's authentication value.
const SERVER_STR: &[u8] = b"Server";

/// Tag prepended to an ntor request when it rides in a legacy CREATE
/// cell instead of a CREATE2.
pub(crate) const NTOR_HANDSHAKE_TAG: &[u8; 16] = b"ntorNTORntorNTOR";

/// Number of bytes in an ntor client handshake:
/// `NODEID || KEYID || CLIENT_PK`.
pub(crate) const NTOR_C_HANDSHAKE_LEN: usize = 20 + 32 + 32;
/// Number of bytes in an ntor server reply: `SERVER_PK || AUTH`.
pub(crate) const NTOR_S_HANDSHAKE_LEN: usize = 32 + 32;

/// A relay's public key information for the ntor handshake.
#[derive(Clone, Debug)]
pub struct NtorPublicKey {
    /// The relay's identity fingerprint.
    pub id: RsaIdentity,
    /// The relay's onion key.
    pub pk: PublicKey,
}

/// A relay's secret key information for the ntor handshake.
pub struct NtorSecretKey {
    /// The relay's public ntor information.
    pk: NtorPublicKey,
    /// The secret onion key.
    sk: StaticSecret,
}

impl NtorSecretKey {
    /// Construct a new NtorSecretKey from its components.
    pub fn new(sk: StaticSecret, pk: PublicKey, id: RsaIdentity) -> Self {
        NtorSecretKey {
            pk: NtorPublicKey { id, pk },
            sk,
        }
    }
    /// Generate a fresh secret key, for a relay with identity `id`.
    pub fn generate<R: RngCore + CryptoRng>(rng: &mut R, id: RsaIdentity) -> Self {
        let sk = curve25519::generate_secret(rng);
        let pk = PublicKey::from(&sk);
        NtorSecretKey::new(sk, pk, id)
    }
    /// Return the public counterpart of this key.
    pub fn public(&self) -> &NtorPublicKey {
        &self.pk
    }
}

/// Client state for an ntor handshake.
pub struct NtorHandshakeState {
    /// The relay's public key.
    relay_public: NtorPublicKey,
    /// Our ephemeral public key.
    my_public: PublicKey,
    /// Our ephemeral secret key.
    my_sk: StaticSecret,
}

/// Client-side ntor handshake.
pub struct NtorClient;

impl ClientHandshake for NtorClient {
    type KeyType = NtorPublicKey;
    type StateType = NtorHandshakeState;

    fn client1<R: RngCore + CryptoRng>(
        rng: &mut R,
        key: &Self::KeyType,
    ) -> Result<(Self::StateType, Vec<u8>)> {
        let my_sk = curve25519::generate_secret(rng);
        let my_public = PublicKey::from(&my_sk);

        let mut v = Vec::with_capacity(NTOR_C_HANDSHAKE_LEN);
        v.extend_from_slice(key.id.as_bytes());
        v.extend_from_slice(key.pk.as_bytes());
        v.extend_from_slice(my_public.as_bytes());

        let state = NtorHandshakeState {
            relay_public: key.clone(),
            my_public,
            my_sk,
        };
        Ok((state, v))
    }

    fn client2<T: AsRef<[u8]>>(state: Self::StateType, msg: T) -> Result<CircuitKeys> {
        let msg = msg.as_ref();
        if msg.len() != NTOR_S_HANDSHAKE_LEN {
            return Err(Error::BadCircHandshake);
        }
        let mut their_pk_bytes = [0_u8; 32];
        their_pk_bytes.copy_from_slice(&msg[0..32]);
        let their_pk = PublicKey::from(their_pk_bytes);
        let auth: &[u8] = &msg[32..64];

        let xy = state.my_sk.diffie_hellman(&their_pk);
        let xb = state.my_sk.diffie_hellman(&state.relay_public.pk);
        let (keys, my_auth) =
            ntor_derive(&xy, &xb, &state.relay_public, &state.my_public, &their_pk)?;

        let okay = my_auth[..].ct_eq(auth)
            & ct::bool_to_choice(xy.was_contributory())
            & ct::bool_to_choice(xb.was_contributory());

        if okay.into() {
            Ok(keys)
        } else {
            Err(Error::BadCircHandshake)
        }
    }
}

/// Relay-side ntor handshake.
pub struct NtorServer;

impl ServerHandshake for NtorServer {
    type KeyType = NtorSecretKey;

    fn server<R: RngCore + CryptoRng, T: AsRef<[u8]>>(
        rng: &mut R,
        key: &Self::KeyType,
        msg: T,
    ) -> RelayHandshakeResult<(CircuitKeys, Vec<u8>)> {
        let mut r = Reader::from_slice(msg.as_ref());
        let id = RsaIdentity::from_bytes(r.take(20)?).ok_or(tor_bytes::Error::MissingData)?;
        let requested_keyid: [u8; 32] = r.extract()?;
        let x_bytes: [u8; 32] = r.extract()?;
        r.should_be_exhausted()?;

        // Refuse unless the client is really talking to us.  (One check,
        // one error: we don't tell them which part was wrong.)
        let us: Choice =
            key.pk.id.ct_eq(&id) & key.pk.pk.as_bytes().ct_eq(&requested_keyid[..]);
        if !bool::from(us) {
            return Err(RelayHandshakeError::MissingKey);
        }

        let x = PublicKey::from(x_bytes);
        let y_sk = curve25519::generate_secret(rng);
        let y_pk = PublicKey::from(&y_sk);

        let xy = y_sk.diffie_hellman(&x);
        let xb = key.sk.diffie_hellman(&x);

        let (keys, auth) = ntor_derive(&xy, &xb, &key.pk, &x, &y_pk)
            .map_err(|_| RelayHandshakeError::BadClientHandshake)?;

        let okay =
            ct::bool_to_choice(xy.was_contributory()) & ct::bool_to_choice(xb.was_contributory());

        let mut reply = Vec::with_capacity(NTOR_S_HANDSHAKE_LEN);
        reply.extend_from_slice(y_pk.as_bytes());
        reply.extend_from_slice(&auth[..]);

        if okay.into() {
            Ok((keys, reply))
        } else {
            Err(RelayHandshakeError::BadClientHandshake)
        }
    }
}

/// Perform the core of the ntor key derivation, shared by both sides.
///
/// Compute the circuit keys and the `AUTH` value from the two shared
/// points, the relay's public key information, and both ephemeral
/// public keys.
fn ntor_derive(
    xy: &SharedSecret,
    xb: &SharedSecret,
    server_pk: &NtorPublicKey,
    x: &PublicKey,
    y: &PublicKey,
) -> Result<(CircuitKeys, [u8; 32])> {
    // secret_input = EXP(X,y) | EXP(X,b) | ID | B | X | Y | PROTOID
    let mut secret_input = SecretBuf::with_capacity(32 * 2 + 20 + 32 * 3 + PROTOID.len());
    secret_input.extend_from_slice(xy.as_bytes());
    secret_input.extend_from_slice(xb.as_bytes());
    secret_input.extend_from_slice(server_pk.id.as_bytes());
    secret_input.extend_from_slice(server_pk.pk.as_bytes());
    secret_input.extend_from_slice(x.as_bytes());
    secret_input.extend_from_slice(y.as_bytes());
    secret_input.extend_from_slice(PROTOID);

    // verify = H(secret_input, t_verify)
    let verify = hmac32(T_VERIFY, &secret_input[..]);
    // auth_input = verify | ID | B | Y | X | PROTOID | "Server"
    let mut auth_input = Vec::with_capacity(32 + 20 + 32 * 3 + PROTOID.len() + SERVER_STR.len());
    auth_input.extend_from_slice(&verify[..]);
    auth_input.extend_from_slice(server_pk.id.as_bytes());
    auth_input.extend_from_slice(server_pk.pk.as_bytes());
    auth_input.extend_from_slice(y.as_bytes());
    auth_input.extend_from_slice(x.as_bytes());
    auth_input.extend_from_slice(PROTOID);
    auth_input.extend_from_slice(SERVER_STR);

    // auth = H(auth_input, t_mac)
    let auth = hmac32(T_MAC, &auth_input);

    let seed = Ntor1Kdf::new(T_KEY, M_EXPAND).derive(&secret_input[..], CIRCUIT_KEY_LEN)?;
    let keys = CircuitKeys::from_ntor_seed(&seed)?;

    Ok((keys, auth))
}

/// Helper: compute an HMAC-SHA256 with key `key` over `msg`.
fn hmac32(key: &[u8], msg: &[u8]) -> [u8; 32] {
    let mut m = Hmac::<Sha256>::new_from_slice(key).expect("Hmac allows keys of any size");
    m.update(msg);
    m.finalize().into_bytes().into()
}
