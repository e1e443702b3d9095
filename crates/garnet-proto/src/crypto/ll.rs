//! Low-level crypto implementations: protocol constructions that are
//! built from primitives but carry no protocol state of their own.

pub mod kdf;
