//! Domain models for the ticket relay
//!
//! Thread links and the types exchanged with the relay flows.

mod link;

pub use link::*;
