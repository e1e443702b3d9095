#![doc = include_str!("../README.md")]
#![warn(missing_docs)]
#![warn(noop_method_call)]
#![warn(unreachable_pub)]
#![warn(clippy::all)]
#![warn(clippy::missing_docs_in_private_items)]
#![deny(clippy::await_holding_lock)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::print_stderr)]
#![deny(clippy::print_stdout)]
#![allow(clippy::uninlined_format_args)]

pub mod channel;
pub mod circuit;
pub mod crypto;
pub mod protover;
pub mod router;
pub mod tls;
mod util;

pub use util::err::Error;

/// A Result type for this crate.
pub type Result<T> = std::result::Result<T, Error>;
