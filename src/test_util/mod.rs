//! Utilities for running clients and servers against an unreliable network on a single machine.
//!  They are used by this crate's own tests and by the `router` binary, which is why they are
//!  part of the crate's regular (non-#[cfg(test)]) code.

pub mod relay;
