//! Types for parsing a circuit-extension request.
//!
//! An EXTEND2 relay message asks a relay to open a channel to another
//! relay and extend the circuit there.  The target is named by a list of
//! "link specifiers" (addresses and identities), followed by a
//! circuit-creation handshake to forward.  Actually performing the
//! extension is the connection-owner's business; this module only
//! understands the bytes.

use std::net::IpAddr;

use caret::caret_int;
use garnet_llcrypto::pk::rsa::RsaIdentity;
use tor_bytes::{EncodeResult, Readable, Reader, Writeable, Writer};

use crate::chancell::msg::HandshakeType;
use crate::{Error, Result};

caret_int! {
    /// A type of link specifier, as found in an EXTEND2 message.
    pub struct LinkSpecType(u8) {
        /// Connect via IPv4
        ORPORT_V4 = 0,
        /// Connect via IPv6
        ORPORT_V6 = 1,
        /// The SHA-1 digest of the target's RSA identity key
        RSAID = 2,
        /// The target's Ed25519 identity key
        ED25519ID = 3,
    }
}

/// One way to identify or reach the target of a circuit extension.
#[derive(Clone, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum LinkSpec {
    /// The target's address and OR port.
    OrPort(IpAddr, u16),
    /// The SHA-1 digest of the target's RSA identity key.
    RsaId(RsaIdentity),
    /// The target's Ed25519 identity key.
    Ed25519Id([u8; 32]),
    /// A specifier of a type we don't recognize.
    ///
    /// We keep these around (rather than rejecting them) so that a
    /// request can be forwarded unmodified.
    Unrecognized(LinkSpecType, Vec<u8>),
}

impl Readable for LinkSpec {
    fn take_from(r: &mut Reader<'_>) -> tor_bytes::Result<Self> {
        let lstype: LinkSpecType = r.take_u8()?.into();
        let lslen = r.take_u8()? as usize;
        let mut body = Reader::from_slice(r.take(lslen)?);
        Ok(match lstype {
            LinkSpecType::ORPORT_V4 => {
                let ip = IpAddr::V4(body.extract::<[u8; 4]>()?.into());
                LinkSpec::OrPort(ip, body.take_u16()?)
            }
            LinkSpecType::ORPORT_V6 => {
                let ip = IpAddr::V6(body.extract::<[u8; 16]>()?.into());
                LinkSpec::OrPort(ip, body.take_u16()?)
            }
            LinkSpecType::RSAID => {
                let id = RsaIdentity::from_bytes(body.take(20)?)
                    .ok_or(tor_bytes::Error::MissingData)?;
                LinkSpec::RsaId(id)
            }
            LinkSpecType::ED25519ID => LinkSpec::Ed25519Id(body.extract()?),
            _ => LinkSpec::Unrecognized(lstype, body.take_rest().into()),
        })
    }
}

impl Writeable for LinkSpec {
    fn write_onto<W: Writer + ?Sized>(&self, w: &mut W) -> EncodeResult<()> {
        match self {
            LinkSpec::OrPort(IpAddr::V4(v4), port) => {
                w.write_u8(LinkSpecType::ORPORT_V4.into());
                w.write_u8(6);
                w.write_all(&v4.octets()[..]);
                w.write_u16(*port);
            }
            LinkSpec::OrPort(IpAddr::V6(v6), port) => {
                w.write_u8(LinkSpecType::ORPORT_V6.into());
                w.write_u8(18);
                w.write_all(&v6.octets()[..]);
                w.write_u16(*port);
            }
            LinkSpec::RsaId(id) => {
                w.write_u8(LinkSpecType::RSAID.into());
                w.write_u8(20);
                w.write_all(id.as_bytes());
            }
            LinkSpec::Ed25519Id(id) => {
                w.write_u8(LinkSpecType::ED25519ID.into());
                w.write_u8(32);
                w.write_all(&id[..]);
            }
            LinkSpec::Unrecognized(lstype, body) => {
                w.write_u8((*lstype).into());
                w.write_u8(body.len() as u8);
                w.write_all(&body[..]);
            }
        }
        Ok(())
    }
}

/// A parsed EXTEND2 request.
#[derive(Clone, Debug)]
pub struct Extend2Request {
    /// Ways to identify and reach the extension target.
    link_specs: Vec<LinkSpec>,
    /// The kind of handshake carried for the target.
    handshake_type: HandshakeType,
    /// The handshake request itself, still encrypted to the target.
    handshake: Vec<u8>,
}

impl Extend2Request {
    /// Parse an EXTEND2 request from the data of a relay cell.
    pub fn decode(data: &[u8]) -> Result<Self> {
        /// Wrap `be` as an appropriate type.
        fn wrap_err(err: tor_bytes::Error) -> Error {
            Error::BytesErr {
                err,
                parsed: "EXTEND2 request",
            }
        }
        let mut r = Reader::from_slice(data);
        let n_specs = r.take_u8().map_err(wrap_err)?;
        let mut link_specs = Vec::with_capacity(n_specs as usize);
        for _ in 0..n_specs {
            link_specs.push(r.extract().map_err(wrap_err)?);
        }
        let handshake_type = r.take_u16().map_err(wrap_err)?.into();
        let hlen = r.take_u16().map_err(wrap_err)?;
        let handshake = r.take(hlen as usize).map_err(wrap_err)?.into();
        Ok(Extend2Request {
            link_specs,
            handshake_type,
            handshake,
        })
    }

    /// Return the link specifiers in this request.
    pub fn link_specs(&self) -> &[LinkSpec] {
        &self.link_specs
    }

    /// Return the handshake type of this request.
    pub fn handshake_type(&self) -> HandshakeType {
        self.handshake_type
    }

    /// Return the handshake body of this request.
    pub fn handshake(&self) -> &[u8] {
        &self.handshake
    }
}

#[cfg(test)]
mod test {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use hex_literal::hex;

    #[test]
    fn parse_request() {
        let mut data = Vec::new();
        data.write_u8(2); // two link specifiers
        let specs = [
            LinkSpec::OrPort("203.0.113.7".parse().unwrap(), 9001),
            LinkSpec::RsaId(
                RsaIdentity::from_hex("5696ab38cb3852afa476a5c07b2d4788963d5553").unwrap(),
            ),
        ];
        for s in &specs {
            s.write_onto(&mut data).unwrap();
        }
        data.write_u16(HandshakeType::NTOR.into());
        data.write_u16(84);
        data.extend_from_slice(&[0xab; 84]);
        // EXTEND2 data is padded out to the full relay cell.
        data.extend_from_slice(&[0; 100]);

        let req = Extend2Request::decode(&data).unwrap();
        assert_eq!(req.link_specs(), &specs[..]);
        assert_eq!(req.handshake_type(), HandshakeType::NTOR);
        assert_eq!(req.handshake(), &[0xab; 84][..]);
    }

    #[test]
    fn unknown_spec_type_is_kept() {
        let data = hex!(
            "01"       // one link specifier
            "2a 03 010203" // of a type we don't know
            "0000"     // TAP
            "0002 ffff"
        );
        let req = Extend2Request::decode(&data[..]).unwrap();
        assert_eq!(
            req.link_specs(),
            &[LinkSpec::Unrecognized(42.into(), vec![1, 2, 3])]
        );
        assert_eq!(req.handshake_type(), HandshakeType::TAP);
    }

    #[test]
    fn truncated_request() {
        assert!(Extend2Request::decode(&hex!("02 00 06 7f000001 2329")[..]).is_err());
        assert!(Extend2Request::decode(&[]).is_err());
    }
}
