//! Machine-specific protocol implementations.
//!
//! Currently a single supported controller family: [`grbl`], the GRBL 1.1h
//! streaming core. The module boundary exists so a second controller family
//! (e.g. grblHAL) could be added beside it without disturbing callers that
//! go through `machines::grbl::*`.

pub mod grbl;
pub mod session;
