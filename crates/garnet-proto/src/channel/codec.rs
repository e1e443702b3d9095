//! Wrap the cell codec for use with the asynchronous-codec crate, and
//! keep the handshake transcript digests that link authentication
//! needs.

use std::io::Error as IoError;

use asynchronous_codec as futures_codec;
use bytes::BytesMut;
use digest::Digest;

use garnet_cell::chancell::{AnyChanCell, codec};
use garnet_llcrypto::d::Sha256;

/// An error from a ChannelCodec.
///
/// This is a separate error type from [`crate::Error`] because the
/// handshake and the reactor want to handle its cases differently.
#[derive(Debug, thiserror::Error)]
pub(crate) enum CodecError {
    /// An error from the underlying IO stream underneath a codec.
    #[error("Io error reading or writing a channel cell")]
    Io(#[from] IoError),
    /// An error from the cell decoding logic.
    #[error("Error decoding an incoming channel cell")]
    DecCell(#[source] garnet_cell::Error),
    /// An error from the cell encoding logic.
    #[error("Error encoding an outgoing channel cell")]
    EncCell(#[source] garnet_cell::Error),
}

impl From<CodecError> for crate::Error {
    fn from(err: CodecError) -> Self {
        use std::sync::Arc;
        match err {
            CodecError::Io(e) => crate::Error::ChanIoErr(Arc::new(e)),
            CodecError::DecCell(e) | CodecError::EncCell(e) => e.into(),
        }
    }
}

/// Asynchronous wrapper around the cell codec, with implementations for
/// use with futures_codec.
///
/// This type lets us wrap a secure transport as a Sink and a Stream of
/// `AnyChanCell`, so we can forget about byte-oriented communication.
///
/// While the link handshake is in progress, the codec also maintains a
/// running SHA-256 digest of each direction of the conversation: the
/// AUTHENTICATE proof covers those transcripts.  Logging is switched
/// off once the handshake is over.
pub(crate) struct ChannelCodec {
    /// The cell codec, configured for the negotiated link protocol.
    inner: codec::ChannelCodec,
    /// Running digest of the bytes we have sent, if still logging.
    sent_log: Option<Sha256>,
    /// Running digest of the bytes we have received, if still logging.
    recv_log: Option<Sha256>,
}

impl ChannelCodec {
    /// Create a new ChannelCodec with a given link protocol, with
    /// transcript logging disabled.
    pub(crate) fn new(link_proto: u16) -> Self {
        ChannelCodec {
            inner: codec::ChannelCodec::new(link_proto),
            sent_log: None,
            recv_log: None,
        }
    }

    /// Enable transcript logging, seeding each direction with bytes
    /// already exchanged before this codec took over (the VERSIONS
    /// cells, which travel before any framing exists).
    pub(crate) fn start_logging(&mut self, sent_so_far: &[u8], received_so_far: &[u8]) {
        let mut sent = Sha256::new();
        sent.update(sent_so_far);
        self.sent_log = Some(sent);
        let mut recv = Sha256::new();
        recv.update(received_so_far);
        self.recv_log = Some(recv);
    }

    /// Stop keeping transcripts.
    pub(crate) fn stop_logging(&mut self) {
        self.sent_log = None;
        self.recv_log = None;
    }

    /// Return the digest of the sent transcript so far.
    pub(crate) fn sent_log_digest(&self) -> Option<[u8; 32]> {
        self.sent_log.as_ref().map(|d| d.clone().finalize().into())
    }

    /// Return the digest of the received transcript so far.
    pub(crate) fn recv_log_digest(&self) -> Option<[u8; 32]> {
        self.recv_log.as_ref().map(|d| d.clone().finalize().into())
    }
}

impl futures_codec::Encoder for ChannelCodec {
    type Item<'a> = AnyChanCell;
    type Error = CodecError;

    fn encode(&mut self, item: Self::Item<'_>, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let pos = dst.len();
        self.inner.write_cell(item, dst).map_err(CodecError::EncCell)?;
        if let Some(d) = self.sent_log.as_mut() {
            d.update(&dst[pos..]);
        }
        Ok(())
    }
}

impl futures_codec::Decoder for ChannelCodec {
    type Item = AnyChanCell;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(d) = self.recv_log.as_mut() {
            // Copying the buffer here is fine: the log only exists for
            // the few cells of the link handshake.
            let before = src.clone();
            let cell = self.inner.decode_cell(src).map_err(CodecError::DecCell)?;
            if cell.is_some() {
                let consumed = before.len() - src.len();
                d.update(&before[..consumed]);
            }
            Ok(cell)
        } else {
            self.inner.decode_cell(src).map_err(CodecError::DecCell)
        }
    }
}

#[cfg(test)]
pub(crate) mod test {
    #![allow(clippy::unwrap_used)]
    use futures::io::{AsyncRead, AsyncWrite, Cursor, Result};
    use futures::sink::SinkExt;
    use futures::stream::StreamExt;
    use futures::task::{Context, Poll};
    use hex_literal::hex;
    use std::pin::Pin;
    use std::sync::{Arc, Mutex};

    use super::{ChannelCodec, futures_codec};
    use crate::tls::{CertifiedConn, TlsSecrets};
    use garnet_cell::chancell::{ChanCell, ChanCmd, ChanMsg, CircId, msg};

    /// Helper type for reading and writing bytes to/from buffers.
    pub(crate) struct MsgBuf {
        /// Data we have received as a reader.
        inbuf: futures::io::Cursor<Vec<u8>>,
        /// Data we write as a writer, shared so a test can keep a
        /// handle after the MsgBuf is consumed.
        outbuf: Arc<Mutex<Vec<u8>>>,
        /// Fake DER certificate we claim to have presented.
        pub(crate) our_cert: Option<Vec<u8>>,
        /// Fake DER certificate we claim the peer presented.
        pub(crate) peer_cert: Option<Vec<u8>>,
        /// Fake legacy TLS secrets.
        pub(crate) secrets: Option<(Vec<u8>, Vec<u8>, Vec<u8>)>,
    }

    impl AsyncRead for MsgBuf {
        fn poll_read(
            mut self: Pin<&mut Self>,
            cx: &mut Context<'_>,
            buf: &mut [u8],
        ) -> Poll<Result<usize>> {
            Pin::new(&mut self.inbuf).poll_read(cx, buf)
        }
    }
    impl AsyncWrite for MsgBuf {
        fn poll_write(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &[u8],
        ) -> Poll<Result<usize>> {
            self.outbuf.lock().unwrap().extend_from_slice(buf);
            Poll::Ready(Ok(buf.len()))
        }
        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<()>> {
            Poll::Ready(Ok(()))
        }
        fn poll_close(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    impl CertifiedConn for MsgBuf {
        fn peer_certificate(&self) -> crate::Result<Option<Vec<u8>>> {
            Ok(self.peer_cert.clone())
        }
        fn our_certificate(&self) -> crate::Result<Option<Vec<u8>>> {
            Ok(self.our_cert.clone())
        }
        fn export_keying_material(
            &self,
            len: usize,
            _label: &[u8],
            _context: Option<&[u8]>,
        ) -> crate::Result<Vec<u8>> {
            Ok(vec![0x42; len])
        }
        fn tls_secrets(&self) -> crate::Result<Option<TlsSecrets>> {
            Ok(self.secrets.as_ref().map(|(m, c, s)| TlsSecrets {
                master_secret: m.clone().into(),
                client_random: c.clone(),
                server_random: s.clone(),
            }))
        }
    }

    impl MsgBuf {
        pub(crate) fn new<T: Into<Vec<u8>>>(output: T) -> Self {
            let inbuf = Cursor::new(output.into());
            MsgBuf {
                inbuf,
                outbuf: Arc::new(Mutex::new(Vec::new())),
                our_cert: None,
                peer_cert: None,
                secrets: None,
            }
        }

        /// Return a handle on the output buffer that survives this
        /// MsgBuf being consumed by a Framed.
        pub(crate) fn out_handle(&self) -> Arc<Mutex<Vec<u8>>> {
            Arc::clone(&self.outbuf)
        }
    }

    fn frame_buf(mbuf: MsgBuf) -> futures_codec::Framed<MsgBuf, ChannelCodec> {
        futures_codec::Framed::new(mbuf, ChannelCodec::new(4))
    }

    #[test]
    fn check_encoding() {
        futures::executor::block_on(async move {
            let mb = MsgBuf::new(&b""[..]);
            let out = mb.out_handle();
            let mut framed = frame_buf(mb);

            let destroycell = msg::Destroy::new(2.into());
            framed
                .send(ChanCell::new(CircId::new(7), destroycell.into()))
                .await
                .unwrap();

            let nocerts = msg::Certs::new_empty();
            framed.send(nocerts.into()).await.unwrap();

            framed.flush().await.unwrap();

            let data = out.lock().unwrap();

            assert_eq!(&data[0..10], &hex!("00000007 04 0200000000")[..]);
            assert_eq!(&data[514..], &hex!("00000000 81 0001 00")[..]);
        });
    }

    #[test]
    fn check_decoding() {
        futures::executor::block_on(async move {
            let mut dat = Vec::new();
            dat.extend_from_slice(&hex!("00000007 04 0200000000")[..]);
            dat.resize(514, 0);
            dat.extend_from_slice(&hex!("00000000 81 0001 00")[..]);
            let mb = MsgBuf::new(&dat[..]);
            let mut framed = frame_buf(mb);

            let destroy = framed.next().await.unwrap().unwrap();
            let nocerts = framed.next().await.unwrap().unwrap();

            assert_eq!(destroy.circid(), CircId::new(7));
            assert_eq!(destroy.msg().cmd(), ChanCmd::DESTROY);
            assert_eq!(nocerts.circid(), None);
            assert_eq!(nocerts.msg().cmd(), ChanCmd::CERTS);

            assert!(framed.next().await.is_none());
        });
    }

    #[test]
    fn transcript_digests() {
        use digest::Digest;
        use garnet_llcrypto::d::Sha256;

        futures::executor::block_on(async move {
            let mut dat = Vec::new();
            dat.extend_from_slice(&hex!("00000007 04 0200000000")[..]);
            dat.resize(514, 0);
            let mb = MsgBuf::new(&dat[..]);
            let out = mb.out_handle();
            let mut framed = frame_buf(mb);
            framed.codec_mut().start_logging(b"hello ", b"olleh ");

            let _ = framed.next().await.unwrap().unwrap();
            framed
                .send(msg::Vpadding::new(2).into())
                .await
                .unwrap();

            // The received log is seeded, then extended with the full
            // wire bytes of the destroy cell.
            let mut expect_recv = Sha256::new();
            expect_recv.update(b"olleh ");
            expect_recv.update(&dat);
            let got: [u8; 32] = framed.codec_mut().recv_log_digest().unwrap();
            assert_eq!(got, <[u8; 32]>::from(expect_recv.finalize()));

            // Same for the sent side.
            let mut expect_sent = Sha256::new();
            expect_sent.update(b"hello ");
            expect_sent.update(&out.lock().unwrap()[..]);
            let got: [u8; 32] = framed.codec_mut().sent_log_digest().unwrap();
            assert_eq!(got, <[u8; 32]>::from(expect_sent.finalize()));

            framed.codec_mut().stop_logging();
            assert!(framed.codec_mut().sent_log_digest().is_none());
        });
    }
}
