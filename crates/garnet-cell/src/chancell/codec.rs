//! Implementation for encoding and decoding of ChanCells.

use super::{CELL_DATA_LEN, ChanCell};
use crate::Error;
use crate::chancell::{ChanCmd, ChanMsg, CircId};
use tor_bytes::{self, Reader, Writer};
use tor_error::internal;

use bytes::BytesMut;

/// This object can be used to encode and decode channel cells.
///
/// The implemented format is one of the following:
///
/// Variable-length cells:
/// ```ignore
///     u16 | u32 circid;
///     u8 command;
///     u16 len;
///     u8 body[len];
/// ```
///
/// Fixed-width cells:
/// ```ignore
///     u16 | u32 circid;
///     u8 command;
///     u8 body[509];
/// ```
///
/// The circuit-id width is a property of the negotiated link protocol:
/// two bytes below version 4, four bytes from version 4 on.  VERSIONS
/// cells themselves always use the two-byte form; before negotiation is
/// done, use a codec for link protocol 0 (or see
/// [`Versions::encode_for_handshake`](crate::chancell::msg::Versions::encode_for_handshake)).
pub struct ChannelCodec {
    /// The link protocol version being used for this channel.
    link_version: u16,
}

impl ChannelCodec {
    /// Create a new ChannelCodec with a given link protocol version
    pub fn new(link_version: u16) -> Self {
        ChannelCodec { link_version }
    }

    /// Return the width, in bytes, of the circuit-id field.
    fn circid_len(&self) -> usize {
        if self.link_version >= 4 { 4 } else { 2 }
    }

    /// Write the given cell into the provided BytesMut object.
    pub fn write_cell<M: ChanMsg>(
        &mut self,
        item: ChanCell<M>,
        dst: &mut BytesMut,
    ) -> crate::Result<()> {
        let ChanCell { circid, msg } = item;
        let cmd = msg.cmd();
        let id = CircId::get_or_zero(circid);
        if self.circid_len() == 4 {
            dst.write_u32(id);
        } else {
            let id: u16 = id
                .try_into()
                .map_err(|_| Error::CantEncode("circuit ID too wide for link protocol"))?;
            dst.write_u16(id);
        }
        dst.write_u8(cmd.into());

        let pos = dst.len(); // always circid_len + 1.

        // now write the cell body and handle the length.
        if cmd.is_var_cell() {
            dst.write_u16(0);
            msg.encode_onto(dst)?;
            let len = dst.len() - pos - 2;
            if len > u16::MAX as usize {
                return Err(Error::Internal(internal!("ran out of space for varcell")));
            }
            // go back and set the length.
            *(<&mut [u8; 2]>::try_from(&mut dst[pos..pos + 2])
                .expect("two-byte slice was not two bytes!?")) = (len as u16).to_be_bytes();
        } else {
            msg.encode_onto(dst)?;
            let len = dst.len() - pos;
            if len > CELL_DATA_LEN {
                return Err(Error::Internal(internal!("ran out of space for cell")));
            }
            // pad to end of fixed-length cell
            dst.write_zeros(CELL_DATA_LEN - len);
        }
        Ok(())
    }

    /// Try to decode a cell from the provided BytesMut object.
    ///
    /// On a definite decoding error, return Err(_).  On a cell that might
    /// just be truncated, return Ok(None).
    pub fn decode_cell<M: ChanMsg>(
        &mut self,
        src: &mut BytesMut,
    ) -> crate::Result<Option<ChanCell<M>>> {
        /// Wrap `be` as an appropriate type.
        fn wrap_err(be: tor_bytes::Error) -> crate::Error {
            crate::Error::BytesErr {
                err: be,
                parsed: "channel cell",
            }
        }

        let id_len = self.circid_len();
        // The smallest thing we can decide anything about: a variable
        // cell's header.
        if src.len() < id_len + 3 {
            return Ok(None);
        }
        let cmd: ChanCmd = src[id_len].into();
        let varcell = cmd.is_var_cell();
        let cell_len: usize = if varcell {
            let msg_len = u16::from_be_bytes(
                src[id_len + 1..id_len + 3]
                    .try_into()
                    .expect("Two-byte slice was not two bytes long!?"),
            );
            msg_len as usize + id_len + 3
        } else {
            id_len + 1 + CELL_DATA_LEN
        };
        if src.len() < cell_len {
            return Ok(None);
        }

        let cell = src.split_to(cell_len).freeze();
        let mut r = Reader::from_bytes(&cell);
        let id = if id_len == 4 {
            r.take_u32().map_err(wrap_err)?
        } else {
            r.take_u16().map_err(wrap_err)?.into()
        };
        let circid: Option<CircId> = CircId::new(id);
        r.advance(if varcell { 3 } else { 1 }).map_err(wrap_err)?;
        let msg = M::decode_from_reader(cmd, &mut r).map_err(wrap_err)?;

        if !cmd.accepts_circid_val(circid) {
            return Err(Error::ChanProto(format!(
                "Invalid circuit ID {} for cell command {}",
                CircId::get_or_zero(circid),
                cmd
            )));
        }
        Ok(Some(ChanCell { circid, msg }))
    }
}

#[cfg(test)]
mod test {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::chancell::msg::{self, AnyChanMsg};
    use hex_literal::hex;

    fn encode(cell: ChanCell<AnyChanMsg>, version: u16) -> BytesMut {
        let mut codec = ChannelCodec::new(version);
        let mut bm = BytesMut::new();
        codec.write_cell(cell, &mut bm).unwrap();
        bm
    }

    fn decode(version: u16, bytes: &[u8]) -> Option<ChanCell<AnyChanMsg>> {
        let mut codec = ChannelCodec::new(version);
        let mut bm = BytesMut::from(bytes);
        codec.decode_cell(&mut bm).unwrap()
    }

    /// All the messages we exercise for the per-command round-trip checks.
    fn samples() -> Vec<(Option<CircId>, AnyChanMsg)> {
        let circid = CircId::new(0x0a0b);
        vec![
            (None, msg::Padding::new().into()),
            (None, msg::Vpadding::new(77).into()),
            (circid, msg::Create::new(&[9_u8; 186][..]).into()),
            (circid, msg::Created::new(&[10_u8; 148][..]).into()),
            (circid, msg::CreateFast::new(&[11_u8; 20][..]).into()),
            (circid, msg::CreatedFast::new(&[12_u8; 40][..]).into()),
            (
                circid,
                msg::Create2::new(msg::HandshakeType::NTOR, &[13_u8; 84][..]).into(),
            ),
            (circid, msg::Created2::new(&[14_u8; 64][..]).into()),
            (circid, msg::Relay::new(&[15_u8; 499][..]).into()),
            (
                circid,
                msg::Relay::new(&[16_u8; 499][..]).into_early(),
            ),
            (
                circid,
                msg::Destroy::new(msg::DestroyReason::PROTOCOL).into(),
            ),
            (None, msg::Netinfo::from_client(Some("1.2.3.4".parse().unwrap())).into()),
            (None, msg::Versions::new([3_u16, 4, 5]).unwrap().into()),
            (
                None,
                {
                    let mut certs = msg::Certs::new_empty();
                    certs.push_cert_body(msg::CertType::RSA_ID_X509, &[1_u8, 2, 3][..]);
                    certs.push_cert_body(msg::CertType::TLS_LINK_X509, &[4_u8, 5][..]);
                    certs.into()
                },
            ),
            (
                None,
                msg::AuthChallenge::new([6_u8; 32], [1_u16, 3]).into(),
            ),
            (None, msg::Authenticate::new(1, &[8_u8; 352][..]).into()),
            (None, msg::Authorize::new(&[9_u8, 9, 9][..]).into()),
            (
                circid,
                msg::Unrecognized::new(ChanCmd::from(77), &[1_u8; 509][..]).into(),
            ),
        ]
    }

    #[test]
    fn roundtrip_all_commands_both_widths() {
        for version in [3_u16, 4, 5] {
            for (circid, m) in samples() {
                let bytes1 = encode(ChanCell::new(circid, m), version);
                let cell = decode(version, &bytes1).unwrap();
                assert_eq!(cell.circid(), circid);
                let (id2, m2) = cell.into_circid_and_msg();
                let bytes2 = encode(ChanCell::new(id2, m2), version);
                // Re-encoding must be byte-for-byte identical.
                assert_eq!(bytes1, bytes2);
            }
        }
    }

    #[test]
    fn fixed_cells_have_fixed_length() {
        for (version, id_len) in [(3_u16, 2_usize), (4, 4)] {
            for (circid, m) in samples() {
                if m.cmd().is_var_cell() {
                    continue;
                }
                let bytes = encode(ChanCell::new(circid, m), version);
                assert_eq!(bytes.len(), id_len + 1 + CELL_DATA_LEN);
            }
        }
    }

    #[test]
    fn narrow_vs_wide() {
        let destroy = msg::Destroy::new(msg::DestroyReason::NONE);
        let cell = ChanCell::new(CircId::new(7), destroy.into());
        let bytes = encode(cell, 3);
        assert_eq!(&bytes[0..4], &hex!("0007 04 00")[..]);
        assert_eq!(bytes.len(), 2 + 1 + 509);

        let destroy = msg::Destroy::new(msg::DestroyReason::NONE);
        let cell = ChanCell::new(CircId::new(7), destroy.into());
        let bytes = encode(cell, 4);
        assert_eq!(&bytes[0..6], &hex!("00000007 04 00")[..]);
        assert_eq!(bytes.len(), 4 + 1 + 509);

        // A wide circuit ID cannot be sent on a narrow channel.
        let destroy = msg::Destroy::new(msg::DestroyReason::NONE);
        let cell: ChanCell<AnyChanMsg> = ChanCell::new(CircId::new(0x0001_0000), destroy.into());
        let mut codec = ChannelCodec::new(3);
        let mut bm = BytesMut::new();
        assert!(codec.write_cell(cell, &mut bm).is_err());
    }

    #[test]
    fn truncated_is_not_an_error() {
        let relay = msg::Relay::new(&[1_u8; 100][..]);
        let bytes = encode(ChanCell::new(CircId::new(5), relay.into()), 4);
        for take in [0, 1, 4, 5, 6, 100, 513] {
            assert!(decode(4, &bytes[..take]).is_none());
        }
        assert!(decode(4, &bytes).is_some());
    }

    #[test]
    fn bad_circid_for_command() {
        // A RELAY cell with circuit ID zero is invalid...
        let mut dat = Vec::new();
        dat.extend_from_slice(&hex!("00000000 03")[..]);
        dat.resize(514, 0);
        let mut codec = ChannelCodec::new(4);
        let mut bm = BytesMut::from(&dat[..]);
        assert!(codec.decode_cell::<AnyChanMsg>(&mut bm).is_err());

        // ...and so is a NETINFO cell with a nonzero one.
        let mut dat = Vec::new();
        dat.extend_from_slice(&hex!("00000009 08 00000000 04 04 7f000001 00")[..]);
        dat.resize(514, 0);
        let mut bm = BytesMut::from(&dat[..]);
        assert!(codec.decode_cell::<AnyChanMsg>(&mut bm).is_err());
    }

    #[test]
    fn authenticate_cell_reemits_exactly() {
        // An AUTHENTICATE cell captured from a link handshake.
        let data = hex!(
            "0000000083016400010160415554483030303181e471361d86964749720f6e79"
            "000dfaa88f834a67415cc034fea2c135e784cb872b113e0585314a255c669411"
            "2a18ff1ccb2c5b4026fc032e8aa401ad92b474b4a0cfad1b16d510bf6723fb3e"
            "7a88ea5b27130065738c14e2ca50c56c3ca6a8bcc241022ae397325199aab75d"
            "86d5c7e85e2422ab5cafe01e3096e30f27d65bef8f62830a484557451c3b281f"
            "066abcf238ae86debeeb04294cb96b30e6ad30255c5beca4c472edcabb65a867"
            "2c8a9dfaf0634dd6c78b9cbad780c51cc60bbc8b913df8b08114683a561ad2ef"
            "fde1ea4bcce4f5c0015e753ee2dc160f5929305d483d520b999b267a19437b73"
            "42d20c616539a69d600dc892402d88bc69fdad39cfb1a8de4d80b95ed62ed1b9"
            "6397872ee9b2eb7e99aff5e5e68fb8ac8bd6036f5e8b5ba78e7c86339ca1378a"
            "5f0b0dbf75ffdca2fd9d3255650c8ae66c4efcfaaa29800a1293d6aa89ffdb06"
            "65f0eeb255fa847adf65a7"
        );
        let cell = decode(4, &data[..]).unwrap();
        assert_eq!(cell.circid(), None);
        assert_eq!(cell.msg().cmd(), ChanCmd::AUTHENTICATE);
        let (id, m) = cell.into_circid_and_msg();
        let reencoded = encode(ChanCell::new(id, m), 4);
        assert_eq!(&reencoded[..], &data[..]);
    }
}
