//! Define an error type for the garnet-proto crate.
use std::sync::Arc;
use thiserror::Error;

/// An error type for the garnet-proto crate.
///
/// There's more than one kind of error that can occur while doing
/// something with the protocol; the connection driver sorts these into
/// the on-the-wire behaviors (close the connection, or destroy one
/// circuit with a particular reason).
#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub enum Error {
    /// An error that occurred in the tor_bytes crate while decoding an
    /// object.
    #[error("parsing error: {0}")]
    BytesErr(#[from] tor_bytes::Error),
    /// An error that occurred from the io system when using a
    /// channel.
    #[error("io error on channel: {0}")]
    ChanIoErr(#[source] Arc<std::io::Error>),
    /// An error from the io system that occurred when trying to
    /// negotiate a channel.
    #[error("io error in handshake: {0}")]
    HandshakeIoErr(#[source] Arc<std::io::Error>),
    /// An error occurred in the cell-handling layer.
    #[error("cell encoding error: {0}")]
    CellErr(#[source] garnet_cell::Error),
    /// We tried to produce too much output for a key derivation
    /// function.
    #[error("couldn't produce that much output")]
    InvalidOutputLength,
    /// A key-derivation function produced the wrong amount of output.
    #[error("invalid key-derivation output length")]
    InvalidKDFOutputLength,
    /// The authentication information on this cell was completely
    /// wrong, or the cell was corrupted.
    #[error("bad relay cell authentication")]
    BadCellAuth,
    /// A circuit-extension handshake failed.
    #[error("handshake failed")]
    BadCircHandshake,
    /// Handshake protocol violation.
    #[error("handshake protocol violation: {0}")]
    HandshakeProto(String),
    /// Protocol violation at the channel level, other than at the
    /// handshake stage.
    #[error("channel protocol violation: {0}")]
    ChanProto(String),
    /// Protocol violation at the circuit level
    #[error("circuit protocol violation: {0}")]
    CircProto(String),
    /// Channel is closed.
    #[error("channel closed")]
    ChannelClosed,
    /// Tried to register something that was already registered.
    #[error("identity already present in registry")]
    AlreadyRegistered,
    /// There was a programming error somewhere in our code, or the
    /// calling code.
    #[error("Programming error: {0}")]
    Bug(#[from] tor_error::Bug),
}

impl From<garnet_cell::Error> for Error {
    fn from(err: garnet_cell::Error) -> Error {
        match err {
            garnet_cell::Error::ChanProto(msg) => Error::ChanProto(msg),
            _ => Error::CellErr(err),
        }
    }
}

/// Internal type: Error return value from the reactor's run_once
/// function: indicates an error or a shutdown.
#[derive(Debug)]
pub(crate) enum ReactorError {
    /// The reactor should shut down with an abnormal exit condition.
    Err(Error),
    /// The reactor should shut down without an error, since all is
    /// well.
    Shutdown,
}
impl From<Error> for ReactorError {
    fn from(e: Error) -> ReactorError {
        ReactorError::Err(e)
    }
}
