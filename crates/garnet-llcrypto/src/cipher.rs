//! Ciphers used to implement the relay protocols.
//!
//! The protocols here have managed not to proliferate ciphers: everything
//! symmetric is AES in counter mode.

/// Re-exports implementations of counter-mode AES.
///
/// These ciphers implement the `cipher::StreamCipher` trait, so use
/// the [`cipher`](https://docs.rs/cipher) crate to access them.
pub mod aes {
    // These implement StreamCipher.
    /// AES128 in counter mode, as used for relay-cell encryption and the
    /// symmetric part of hybrid public-key encryption.
    pub type Aes128Ctr = ctr::Ctr128BE<aes::Aes128>;

    /// AES256 in counter mode.
    pub type Aes256Ctr = ctr::Ctr128BE<aes::Aes256>;
}
