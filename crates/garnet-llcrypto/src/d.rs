//! Digests used to implement the relay protocols.
//!
//! For legacy reasons the wire protocol uses both SHA1 and SHA2.  We
//! re-export them here in forms implementing the [`digest::Digest`]
//! traits; other code should access them via those traits.

pub use sha1::Sha1;
pub use sha2::{Sha256, Sha512};
