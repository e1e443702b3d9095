//! Traits for the secure transport under a channel.
//!
//! The relay core does not open sockets or speak TLS itself; whoever
//! accepts connections hands us something that implements
//! `AsyncRead + AsyncWrite` plus [`CertifiedConn`], which exposes just
//! enough of the transport's cryptographic state for channel
//! authentication.

use zeroize::Zeroizing;

use crate::Result;

/// The transport-layer secrets needed to verify the legacy
/// (`RSA-SHA256-TLSSECRET`) authentication method.
///
/// Modern TLS stacks do not always expose these; a transport that
/// cannot supply them simply refuses that authentication method.
pub struct TlsSecrets {
    /// The TLS master secret.
    pub master_secret: Zeroizing<Vec<u8>>,
    /// The client random from the TLS handshake.
    pub client_random: Vec<u8>,
    /// The server random from the TLS handshake.
    pub server_random: Vec<u8>,
}

/// A connection (typically TLS) whose peer certificate and keying
/// material we can inspect.
pub trait CertifiedConn {
    /// Return the DER certificate the peer presented, if any.
    fn peer_certificate(&self) -> Result<Option<Vec<u8>>>;
    /// Return the DER certificate we presented, if any.
    fn our_certificate(&self) -> Result<Option<Vec<u8>>>;
    /// Export keying material from the transport session per RFC 5705.
    fn export_keying_material(
        &self,
        len: usize,
        label: &[u8],
        context: Option<&[u8]>,
    ) -> Result<Vec<u8>>;
    /// Return the legacy TLS secrets, if the transport can expose
    /// them.
    fn tls_secrets(&self) -> Result<Option<TlsSecrets>>;
}
