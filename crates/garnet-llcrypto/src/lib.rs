#![doc = include_str!("../README.md")]
#![warn(missing_docs)]
#![warn(noop_method_call)]
#![warn(unreachable_pub)]
#![warn(clippy::all)]
#![warn(clippy::missing_docs_in_private_items)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::print_stderr)]
#![deny(clippy::print_stdout)]
#![allow(clippy::uninlined_format_args)]

pub mod cipher;
pub mod d;
pub mod dh;
pub mod pk;
pub mod util;

use thiserror::Error;

/// An error produced by this cryptographic layer.
///
/// We deliberately keep these variants coarse: callers that are verifying
/// handshakes must not learn (or leak) which particular check failed.
#[derive(Clone, Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// A ciphertext, signature, or other cryptographic input was invalid.
    ///
    /// This covers both malformed input and authentication failure.
    #[error("cryptographic input was invalid")]
    BadInput,
    /// A public value was outside the range permitted by the protocol.
    #[error("public value rejected")]
    BadPublicValue,
    /// A DER object did not have the structure we expected.
    #[error("unable to parse DER object")]
    BadDer,
    /// A key was the wrong length or otherwise unusable.
    #[error("unusable key material")]
    BadKey,
}

/// A Result type for this crate.
pub type Result<T> = std::result::Result<T, Error>;
