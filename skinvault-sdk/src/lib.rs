//! Shared types for the Skinvault trade settlement service.
//!
//! The trading-platform bridge, the server and any tooling talk to each
//! other through the objects in [`objects`]; notifications posted by the
//! bridge are authenticated with the scheme in [`signature`].

pub mod objects;
pub mod signature;
