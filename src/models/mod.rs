//! Core data models for the relay.
//!
//! These describe the identity of a backend object, the metadata it resolves to,
//! and the byte interval a client asked for.

pub mod object;
pub mod range;
