//! Internal utilities for the relay protocol implementation.

pub(crate) mod ct;
pub(crate) mod err;
pub(crate) mod token_bucket;
