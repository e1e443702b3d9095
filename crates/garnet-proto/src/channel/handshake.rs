//! Implementation for the channel handshake, as the accepting side.
//!
//! An accepted connection starts in `AwaitVersions`: the first cell the
//! initiator sends must be VERSIONS.  We reply with our own VERSIONS,
//! then CERTS, AUTH_CHALLENGE, and NETINFO.  The initiator answers with
//! its own CERTS and AUTHENTICATE if it is a relay, or goes straight to
//! NETINFO if it is a client; then the channel is open.

use asynchronous_codec as futures_codec;
use futures::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use futures::sink::SinkExt;
use futures::stream::StreamExt;
use rand::RngCore;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tor_bytes::Reader;
use tor_error::internal;
use tracing::{debug, trace, warn};

use crate::channel::codec::{ChannelCodec, CodecError};
use crate::channel::{Channel, ChannelConfig, Reactor, UniqId, auth};
use crate::router::RelayKeys;
use crate::tls::{CertifiedConn, TlsSecrets};
use crate::{Error, Result};
use garnet_cell::chancell::msg::AnyChanMsg;
use garnet_cell::chancell::{ChanCmd, ChanMsg, msg};
use garnet_llcrypto::pk::rsa::RsaIdentity;
use garnet_llcrypto::pk::x509;

/// A list of the link protocols that we support.
pub(crate) static LINK_PROTOCOLS: &[u16] = &[3, 4];

/// The authentication methods we advertise and accept.
pub(crate) static AUTH_METHODS: &[u16] = &[auth::AUTH_METHOD_RSA_SHA256_TLSSECRET];

/// Convert a CodecError to an Error, under the context that it occurs
/// while doing a channel handshake.
fn codec_err_to_handshake(err: CodecError) -> Error {
    match err {
        CodecError::Io(e) => Error::HandshakeIoErr(Arc::new(e)),
        CodecError::DecCell(e) => {
            Error::HandshakeProto(format!("Invalid cell on handshake: {}", e))
        }
        CodecError::EncCell(e) => Error::from(garnet_cell::Error::from(e)),
    }
}

/// An accepted connection on which nothing has been done yet.
pub struct InboundHandshake<
    T: AsyncRead + AsyncWrite + CertifiedConn + Send + Unpin + 'static,
> {
    /// Underlying TLS stream.
    ///
    /// (We don't enforce that this is actually TLS, but if it isn't,
    /// the connection won't be secure.)
    tls: T,
    /// Logging identifier for this stream.  (Used for logging only.)
    unique_id: UniqId,
}

impl<T: AsyncRead + AsyncWrite + CertifiedConn + Send + Unpin + 'static> InboundHandshake<T> {
    /// Construct a new InboundHandshake over an accepted transport.
    pub fn new(tls: T) -> Self {
        Self {
            tls,
            unique_id: UniqId::new(),
        }
    }

    /// Run the handshake to completion.
    ///
    /// On success, the peer (authenticated or not) is ready to create
    /// circuits: the returned [`Reactor`] must be spawned for the
    /// channel to do anything.
    pub async fn accept(
        mut self,
        keys: &Arc<RelayKeys>,
        config: &ChannelConfig,
        peer_addr: Option<IpAddr>,
        my_addrs: &[IpAddr],
    ) -> Result<(Channel, Reactor<T>)> {
        /// Helper: wrap an IoError as a HandshakeIoErr.
        fn io_err_to_handshake(err: std::io::Error) -> Error {
            Error::HandshakeIoErr(Arc::new(err))
        }
        /// Helper: wrap a cell-encoding error.
        fn enc_err_to_handshake(err: tor_bytes::EncodeError) -> Error {
            Error::from(garnet_cell::Error::from(err))
        }

        debug!("{}: accepting a link handshake", self.unique_id);

        // Grab what we need from the transport's cryptographic state up
        // front; verification needs it later.
        let our_cert = self.tls.our_certificate()?;
        let tls_secrets = self.tls.tls_secrets()?;

        // Wait for the initiator's VERSIONS cell.  VERSIONS is the only
        // legal first cell; its circuit ID is two bytes, and zero.
        trace!("{}: waiting for versions", self.unique_id);
        let mut hdr = [0_u8; 5];
        self.tls
            .read_exact(&mut hdr)
            .await
            .map_err(io_err_to_handshake)?;
        if hdr[0..3] != [0, 0, ChanCmd::VERSIONS.into()] {
            return Err(Error::HandshakeProto(
                "First cell was not a VERSIONS cell".into(),
            ));
        }
        let msglen = u16::from_be_bytes(
            hdr[3..5]
                .try_into()
                .expect("Two-byte field was not two bytes!?"),
        );
        let mut msgbody = vec![0_u8; msglen as usize];
        self.tls
            .read_exact(&mut msgbody)
            .await
            .map_err(io_err_to_handshake)?;
        let their_versions: msg::Versions = {
            let mut reader = Reader::from_slice(&msgbody);
            reader.extract()?
        };
        trace!("{}: received {:?}", self.unique_id, their_versions);

        // Determine which link protocol we negotiated.
        let link_protocol = their_versions
            .best_shared_link_protocol(LINK_PROTOCOLS)
            .ok_or_else(|| Error::HandshakeProto("No shared link protocols".into()))?;
        trace!("{}: negotiated version {}", self.unique_id, link_protocol);

        // Send our own VERSIONS cell.
        let my_versions = msg::Versions::new(LINK_PROTOCOLS)?
            .encode_for_handshake()
            .map_err(enc_err_to_handshake)?;
        self.tls
            .write_all(&my_versions)
            .await
            .map_err(io_err_to_handshake)?;
        self.tls.flush().await.map_err(io_err_to_handshake)?;

        // Now we can switch to using a "Framed".  We keep transcript
        // digests of both directions from here until the authentication
        // phase is over: the AUTHENTICATE proof covers them, starting
        // with the VERSIONS cells just exchanged.
        let mut codec = ChannelCodec::new(link_protocol);
        let mut versions_transcript = hdr.to_vec();
        versions_transcript.extend_from_slice(&msgbody);
        codec.start_logging(&my_versions, &versions_transcript);
        let mut tls = futures_codec::Framed::new(self.tls, codec);

        // CERTS, then AUTH_CHALLENGE, then NETINFO.
        tls.send(keys.certs_cell().into())
            .await
            .map_err(codec_err_to_handshake)?;

        let mut challenge = [0_u8; 32];
        rand::rng().fill_bytes(&mut challenge);
        tls.send(msg::AuthChallenge::new(challenge, AUTH_METHODS).into())
            .await
            .map_err(codec_err_to_handshake)?;

        // Our transcript, as covered by any AUTHENTICATE: everything up
        // to and including AUTH_CHALLENGE, but not NETINFO.
        let server_log = tls.codec_mut().sent_log_digest();

        let timestamp: u32 = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|_| internal!("clock set before the epoch"))?
            .as_secs()
            .try_into()
            .map_err(|_| internal!("clock not representable in 32 bits"))?;
        tls.send(msg::Netinfo::from_relay(timestamp, peer_addr, my_addrs.to_vec()).into())
            .await
            .map_err(codec_err_to_handshake)?;

        // Read until we have the initiator's NETINFO, rejecting
        // duplicate and unexpected cells.
        trace!("{}: waiting for rest of handshake.", self.unique_id);
        let mut peer_certs: Option<msg::Certs> = None;
        let mut auth_cell: Option<msg::Authenticate> = None;
        let mut client_log: Option<[u8; 32]> = None;
        loop {
            let m = tls
                .next()
                .await
                .ok_or_else(|| {
                    Error::HandshakeProto("Connection closed during handshake".into())
                })?
                .map_err(codec_err_to_handshake)?;
            let (_, m) = m.into_circid_and_msg();
            trace!("{}: received a {} cell.", self.unique_id, m.cmd());
            match m {
                // Padding is always allowed.
                AnyChanMsg::Padding(_) | AnyChanMsg::Vpadding(_) => (),
                AnyChanMsg::Certs(c) => {
                    if peer_certs.is_some() {
                        return Err(Error::HandshakeProto("Duplicate certs cell".into()));
                    }
                    // The initiator transcript that an AUTHENTICATE
                    // covers ends with this cell.
                    client_log = tls.codec_mut().recv_log_digest();
                    peer_certs = Some(c);
                }
                AnyChanMsg::Authenticate(a) => {
                    if auth_cell.is_some() {
                        return Err(Error::HandshakeProto(
                            "Duplicate authenticate cell".into(),
                        ));
                    }
                    if peer_certs.is_none() {
                        return Err(Error::HandshakeProto(
                            "AUTHENTICATE cell without CERTS".into(),
                        ));
                    }
                    auth_cell = Some(a);
                }
                AnyChanMsg::Netinfo(_) => break,
                m => {
                    return Err(Error::HandshakeProto(format!(
                        "Unexpected cell {} during handshake",
                        m.cmd()
                    )));
                }
            }
        }
        tls.codec_mut().stop_logging();

        // If the initiator sent an AUTHENTICATE, it claims to be a
        // relay: verify the proof and extract its identity.  Otherwise
        // it is an (unauthenticated) client, which is fine too.
        let peer_id = match auth_cell {
            Some(a) => {
                let certs = peer_certs
                    .ok_or_else(|| internal!("AUTHENTICATE accepted without CERTS"))?;
                let id = check_authenticate(
                    keys,
                    our_cert,
                    tls_secrets,
                    server_log,
                    client_log,
                    &certs,
                    &a,
                )?;
                debug!("{}: peer authenticated as {}", self.unique_id, id);
                Some(id)
            }
            None => None,
        };

        let (channel, control_rx, cell_rx) = Channel::new(
            self.unique_id,
            peer_id,
            link_protocol,
            config.outbound_queue_len,
        );
        let reactor = Reactor::new(
            tls,
            control_rx,
            cell_rx,
            Arc::clone(keys),
            config,
            self.unique_id,
        );
        Ok((channel, reactor))
    }
}

/// Verify an AUTHENTICATE cell against our view of the conversation.
///
/// On success, return the initiator's proven RSA identity.
fn check_authenticate(
    keys: &RelayKeys,
    our_cert: Option<Vec<u8>>,
    tls_secrets: Option<TlsSecrets>,
    server_log: Option<[u8; 32]>,
    client_log: Option<[u8; 32]>,
    certs: &msg::Certs,
    auth_cell: &msg::Authenticate,
) -> Result<RsaIdentity> {
    if auth_cell.authtype() != auth::AUTH_METHOD_RSA_SHA256_TLSSECRET {
        return Err(Error::HandshakeProto(format!(
            "Unsupported authentication method {}",
            auth_cell.authtype()
        )));
    }
    let our_cert = our_cert.ok_or_else(|| {
        Error::HandshakeProto("Transport presented no local certificate".into())
    })?;
    let tls_secrets = tls_secrets.ok_or_else(|| {
        Error::HandshakeProto("Transport cannot supply legacy secrets".into())
    })?;
    let (server_log, client_log) = server_log
        .zip(client_log)
        .ok_or_else(|| internal!("handshake transcripts were not recorded"))?;

    // The peer's keys come out of its CERTS cell: the identity key from
    // the identity certificate, and the key that signed the proof from
    // the link-authentication certificate.
    let id_cert = certs.cert_body(msg::CertType::RSA_ID_X509).ok_or_else(|| {
        Error::HandshakeProto("Peer sent no RSA identity certificate".into())
    })?;
    let client_identity = x509::subject_rsa_key(id_cert)
        .map_err(|_| Error::HandshakeProto("Unparseable identity certificate".into()))?;
    let auth_cert = certs
        .cert_body(msg::CertType::LINK_AUTH_X509)
        .ok_or_else(|| {
            Error::HandshakeProto("Peer sent no link authentication certificate".into())
        })?;
    let auth_key = x509::subject_rsa_key(auth_cert)
        .map_err(|_| Error::HandshakeProto("Unparseable authentication certificate".into()))?;

    let expected = auth::AuthRsaSha256TlsSecret::new(
        client_identity.clone(),
        keys.identity_public(),
        server_log,
        client_log,
        our_cert,
        tls_secrets,
    );
    expected.check(auth_cell.body(), &auth_key).map_err(|_| {
        warn!("Peer failed AUTHENTICATE verification");
        Error::HandshakeProto("Authentication failed".into())
    })?;

    Ok(client_identity.to_rsa_identity())
}
