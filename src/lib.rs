//! Host-side streaming sender for GRBL 1.1h CNC controllers.
//!
//! See [`machines::grbl`] for the protocol core (flow control, pause/resume,
//! alarm handling, the G-code source pipeline, resume-from modal pre-scan)
//! and [`config`] for the layered per-user configuration store.

pub mod config;
pub mod machines;
