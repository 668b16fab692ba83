//! Macro/Manual Gate.
//!
//! A single mutex serializes streaming dispatch, manual sends, and macro
//! sends. While streaming is `Running`/`Paused`, manual sends are rejected
//! except real-time bytes and (if paused) permitted overrides. While
//! `AlarmLocked`, only `$X`, `$H`, `0x18`, `?` are permitted.

use super::controller::StreamState;
use super::errors::GateError;
use tokio::sync::{Mutex, MutexGuard};

/// What a caller is asking permission to send.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GateRequest<'a> {
    Manual(&'a str),
    Macro(&'a str),
    RealTime(u8),
}

/// RAII permit returned by a successful [`Gate::acquire`]. Held for the
/// duration of one send; dropping it releases the underlying mutex.
pub struct GatePermit<'a> {
    _guard: MutexGuard<'a, ()>,
}

/// Serializes access to the link for everything that isn't job dispatch
/// itself (manual sends, macro sends, realtime bytes). Job dispatch writes
/// go directly through the controller/writer worker and don't contend on
/// this mutex — modeled here as an allow-list check plus a mutex that only
/// macro/manual paths take.
pub struct Gate {
    lock: Mutex<()>,
}

/// The fixed allow-list of bytes/commands permitted while `AlarmLocked`:
/// `$X`, `$H`, soft reset, and status query.
const ALARM_ALLOWED_REALTIME: [u8; 2] = [0x3F, 0x18]; // ? and soft reset

impl Gate {
    pub fn new() -> Self {
        Self { lock: Mutex::new(()) }
    }

    /// Checks whether `request` is allowed given the current stream state,
    /// without acquiring the mutex (cheap pre-check so callers can reject
    /// fast without contending).
    pub fn check(&self, state: StreamState, request: &GateRequest) -> Result<(), GateError> {
        if state == StreamState::AlarmLocked {
            return match request {
                GateRequest::RealTime(b) if ALARM_ALLOWED_REALTIME.contains(b) => Ok(()),
                GateRequest::Manual(text) if is_alarm_allowed_line(text) => Ok(()),
                _ => Err(GateError::BlockedByAlarm),
            };
        }
        match request {
            GateRequest::RealTime(_) => Ok(()),
            GateRequest::Manual(_) => {
                if matches!(state, StreamState::Running | StreamState::Paused) {
                    Err(GateError::BlockedByStreaming)
                } else {
                    Ok(())
                }
            }
            GateRequest::Macro(_) => {
                if matches!(state, StreamState::Running | StreamState::Paused) {
                    Err(GateError::BlockedByStreaming)
                } else {
                    Ok(())
                }
            }
        }
    }

    /// Acquires the gate mutex for a manual or macro send after `check` has
    /// passed. Real-time bytes bypass the mutex entirely: they don't consume
    /// `RX_WINDOW`, so they never wait on this gate either.
    pub async fn acquire(&self) -> GatePermit<'_> {
        GatePermit {
            _guard: self.lock.lock().await,
        }
    }
}

impl Default for Gate {
    fn default() -> Self {
        Self::new()
    }
}

fn is_alarm_allowed_line(text: &str) -> bool {
    let trimmed = text.trim();
    trimmed.eq_ignore_ascii_case("$X") || trimmed.eq_ignore_ascii_case("$H")
}
