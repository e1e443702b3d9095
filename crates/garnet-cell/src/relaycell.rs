//! Implementation for the payload of a relay cell.
//!
//! A relay cell's payload is onion-encrypted hop by hop.  Once a hop has
//! decrypted and "recognized" a cell, the cleartext has this layout:
//!
//! ```ignore
//!     u8    relay command;
//!     u16   recognized;      // zero when the cell terminates here
//!     u16   stream id;
//!     u8    digest[4];       // running-digest check value
//!     u16   length;
//!     u8    data[length];
//!     u8    padding[];
//! ```
//!
//! The `recognized` and `digest` fields belong to the relay-crypto
//! layer; everything else is meaningful to whoever handles the cell.

pub mod extend;

use std::num::NonZeroU16;

use caret::caret_int;
use tor_bytes::{Reader, Writer};

use crate::chancell::{CELL_DATA_LEN, RawCellBody};
use crate::{Error, Result};

caret_int! {
    /// A command that identifies the meaning of a relay cell.
    pub struct RelayCmd(u8) {
        /// Start a new stream
        BEGIN = 1,
        /// Data on a stream
        DATA = 2,
        /// Close a stream
        END = 3,
        /// Acknowledge a BEGIN; stream is open
        CONNECTED = 4,
        /// Used for flow control
        SENDME = 5,
        /// Extend a circuit to a new hop; deprecated
        EXTEND = 6,
        /// Reply to an EXTEND message; deprecated
        EXTENDED = 7,
        /// Partially close a circuit
        TRUNCATE = 8,
        /// Circuit has been partially closed
        TRUNCATED = 9,
        /// Padding message
        DROP = 10,
        /// Start a DNS lookup
        RESOLVE = 11,
        /// Reply to a DNS lookup
        RESOLVED = 12,
        /// Start a directory stream
        BEGIN_DIR = 13,
        /// Extend a circuit to a new hop
        EXTEND2 = 14,
        /// Reply to an EXTEND2 message
        EXTENDED2 = 15,
    }
}

/// Identify a stream within a particular circuit.
///
/// Cannot be zero; a zero stream ID denotes a message meant for the
/// circuit itself rather than any stream.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Hash)]
pub struct StreamId(NonZeroU16);

impl From<NonZeroU16> for StreamId {
    fn from(id: NonZeroU16) -> Self {
        Self(id)
    }
}
impl From<StreamId> for u16 {
    fn from(id: StreamId) -> u16 {
        id.0.get()
    }
}
impl std::fmt::Display for StreamId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}
impl StreamId {
    /// Creates a `StreamId` for non-zero `val`.
    pub fn new(val: u16) -> Option<Self> {
        NonZeroU16::new(val).map(Self)
    }

    /// Convenience function to convert to a `u16`; `None` is mapped to 0.
    pub fn get_or_zero(stream_id: Option<Self>) -> u16 {
        match stream_id {
            Some(stream_id) => stream_id.0.get(),
            None => 0,
        }
    }
}

/// Length of the cleartext header of a relay cell.
pub const RELAY_HEADER_LEN: usize = 11;

/// Largest amount of data one relay cell can carry.
pub const RELAY_DATA_LEN: usize = CELL_DATA_LEN - RELAY_HEADER_LEN;

/// A parsed view of the cleartext header of a relay cell.
#[derive(Clone, Debug)]
pub struct RelayHeader {
    /// The relay command.
    pub cmd: RelayCmd,
    /// The "recognized" check field.  Zero on cells that may terminate
    /// at this hop; the crypto layer confirms with the digest.
    pub recognized: u16,
    /// Stream ID this message concerns, or None for the circuit itself.
    pub stream_id: Option<StreamId>,
    /// The four-byte running-digest check value.
    pub digest: [u8; 4],
    /// Number of meaningful data bytes that follow the header.
    pub length: u16,
}

impl RelayHeader {
    /// Parse the header fields from the front of a relay cell body.
    pub fn decode(body: &[u8]) -> Result<Self> {
        /// Wrap `be` as an appropriate type.
        fn wrap_err(err: tor_bytes::Error) -> Error {
            Error::BytesErr {
                err,
                parsed: "relay cell header",
            }
        }
        let mut r = Reader::from_slice(body);
        let cmd = r.take_u8().map_err(wrap_err)?.into();
        let recognized = r.take_u16().map_err(wrap_err)?;
        let stream_id = StreamId::new(r.take_u16().map_err(wrap_err)?);
        let digest = r.extract().map_err(wrap_err)?;
        let length = r.take_u16().map_err(wrap_err)?;
        if usize::from(length) > r.remaining() {
            return Err(Error::ChanProto(
                "Relay cell data length is longer than its body".into(),
            ));
        }
        Ok(RelayHeader {
            cmd,
            recognized,
            stream_id,
            digest,
            length,
        })
    }

    /// Return the data carried by a relay cell with this header.
    ///
    /// # Panics
    ///
    /// Panics if `body` is not the body this header was decoded from,
    /// and is too short for the recorded length.
    pub fn data<'a>(&self, body: &'a [u8]) -> &'a [u8] {
        &body[RELAY_HEADER_LEN..RELAY_HEADER_LEN + usize::from(self.length)]
    }
}

/// Assemble a relay cell body around `data`, with the `recognized` and
/// `digest` fields zeroed.
///
/// The crypto layer fills in the digest when the cell is actually sent.
pub fn encode_relay_body(
    cmd: RelayCmd,
    stream_id: Option<StreamId>,
    data: &[u8],
) -> Result<RawCellBody> {
    if data.len() > RELAY_DATA_LEN {
        return Err(Error::CantEncode("Too much data for one relay cell"));
    }
    let mut body = [0_u8; CELL_DATA_LEN];
    let mut w: Vec<u8> = Vec::with_capacity(RELAY_HEADER_LEN);
    w.write_u8(cmd.into());
    w.write_u16(0); // recognized
    w.write_u16(StreamId::get_or_zero(stream_id));
    w.write_zeros(4); // digest
    w.write_u16(data.len() as u16);
    body[..RELAY_HEADER_LEN].copy_from_slice(&w);
    body[RELAY_HEADER_LEN..RELAY_HEADER_LEN + data.len()].copy_from_slice(data);
    Ok(body)
}
