//! Black box recorder: logs stream-state transitions and status snapshots for
//! diagnosing multi-hour run defects. One JSONL file per session; the
//! controller worker (or a subscriber task) feeds `StreamState` transitions
//! and periodic `ControllerStatus` snapshots.
//!
//! # Example
//!
//! ```ignore
//! let mut recorder = SessionRecorder::start_session(log_dir)?;
//! let mut events = controller_event_rx;
//! while let Ok(event) = events.recv().await {
//!     match event {
//!         ControllerEvent::StateChanged(s) => recorder.record_state(s)?,
//!         ControllerEvent::Status(status) => recorder.record_status(status_snapshot_from(&status))?,
//!         _ => {}
//!     }
//! }
//! recorder.finish()?;
//! ```

use crate::machines::grbl::{ControllerStatus, Position, StreamState};
use serde::Serialize;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

/// Snapshot of machine status for position-over-time logging (throttled by
/// the caller, e.g. once per second or on state change).
#[derive(Clone, Debug, Serialize)]
pub struct StatusSnapshot {
    pub state: String,
    pub work_pos: Position,
    pub machine_pos: Position,
    pub feed_rate: f64,
    pub spindle_speed: f64,
    /// Unix timestamp (seconds since epoch, fractional).
    pub ts_secs: f64,
}

/// JSONL line variant: one of these per line in the log.
#[derive(Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SessionEvent {
    StateChange {
        state: String,
        ts_secs: f64,
    },
    Status {
        state: String,
        work_pos: Position,
        machine_pos: Position,
        feed_rate: f64,
        spindle_speed: f64,
        ts_secs: f64,
    },
    LineErrored {
        line_number: u32,
        code: u32,
        ts_secs: f64,
    },
}

/// Errors from session recorder.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("failed to open session file {path}: {source}")]
    OpenFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write: {0}")]
    WriteFailed(#[from] std::io::Error),
}

fn now_secs() -> f64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs_f64()
}

/// Session recorder: append-only JSONL log of state transitions, status
/// snapshots, and line errors.
pub struct SessionRecorder {
    writer: BufWriter<File>,
    path: PathBuf,
}

impl SessionRecorder {
    /// Start a new session: create a timestamped log file in `log_dir`.
    /// File name: `session_YYYY-MM-DDTHH-MM-SS.jsonl`.
    pub fn start_session(log_dir: &Path) -> Result<Self, SessionError> {
        let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap();
        let secs = now.as_secs();
        let (mins, s) = (secs / 60, secs % 60);
        let (hours, m) = (mins / 60, mins % 60);
        let (days, h) = (hours / 24, hours % 24);
        let (y, m_d) = days_to_year_month_day(days as u32);
        let name = format!(
            "session_{:04}-{:02}-{:02}T{:02}-{:02}-{:02}.jsonl",
            y, m_d.0, m_d.1, h, m, s
        );
        let path = log_dir.join(name);
        let file = File::options()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| SessionError::OpenFailed {
                path: path.clone(),
                source: e,
            })?;
        let writer = BufWriter::new(file);
        Ok(SessionRecorder { writer, path })
    }

    /// Record a `StreamState` transition (append one JSON line).
    pub fn record_state(&mut self, state: StreamState) -> Result<(), SessionError> {
        self.write_event(SessionEvent::StateChange {
            state: format!("{:?}", state),
            ts_secs: now_secs(),
        })
    }

    /// Record one status snapshot (append one JSON line).
    pub fn record_status(&mut self, snapshot: StatusSnapshot) -> Result<(), SessionError> {
        self.write_event(SessionEvent::Status {
            state: snapshot.state,
            work_pos: snapshot.work_pos,
            machine_pos: snapshot.machine_pos,
            feed_rate: snapshot.feed_rate,
            spindle_speed: snapshot.spindle_speed,
            ts_secs: snapshot.ts_secs,
        })
    }

    /// Record a latched `error:N` event for a job line: the UI surfaces a
    /// single, latched last-error fact rather than a full history.
    pub fn record_line_errored(&mut self, line_number: u32, code: u32) -> Result<(), SessionError> {
        self.write_event(SessionEvent::LineErrored {
            line_number,
            code,
            ts_secs: now_secs(),
        })
    }

    fn write_event(&mut self, event: SessionEvent) -> Result<(), SessionError> {
        let line = serde_json::to_string(&event).map_err(|e| {
            SessionError::WriteFailed(std::io::Error::new(std::io::ErrorKind::InvalidData, e))
        })?;
        writeln!(self.writer, "{}", line)?;
        Ok(())
    }

    /// Flush and close the log file.
    pub fn finish(mut self) -> Result<(), SessionError> {
        self.writer.flush()?;
        Ok(())
    }

    /// Path to the current session log file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Convert days since Unix epoch to (year, (month, day)); simplified.
fn days_to_year_month_day(days: u32) -> (u32, (u32, u32)) {
    // 1970-01-01 = day 0
    let d = days as i64;
    let (y, m, day) = unix_days_to_ymd(d);
    (y as u32, (m as u32, day as u32))
}

fn unix_days_to_ymd(days: i64) -> (i32, i32, i32) {
    const EPOCH: i64 = 719163; // days from year 0 to 1970-01-01 (proleptic Gregorian)
    let d = days + EPOCH;
    date_from_ordinal(d)
}

fn date_from_ordinal(n: i64) -> (i32, i32, i32) {
    let n = n as i32;
    let a = n + 68569;
    let b = (4 * a) / 146097;
    let c = a - (146097 * b + 3) / 4;
    let d = (4000 * (c + 1)) / 1461001;
    let e = c - (1461 * d) / 4 + 31;
    let m = (80 * e) / 2447;
    let day = e - (2447 * m) / 80;
    let mut y = 100 * (b - 49) + d + e / 2447;
    let month = m - (m / 14);
    if month <= 0 {
        y -= 1;
    }
    let month = if month <= 0 { month + 12 } else { month };
    (y, month, day)
}

/// Builds a `StatusSnapshot` from a `ControllerStatus` (state formatted as a
/// string; no `Instant`, which doesn't serialize).
pub fn status_snapshot_from(status: &ControllerStatus) -> StatusSnapshot {
    StatusSnapshot {
        state: format!("{:?}", status.state),
        work_pos: status.work_pos,
        machine_pos: status.machine_pos,
        feed_rate: status.feed_rate,
        spindle_speed: status.spindle_speed,
        ts_secs: now_secs(),
    }
}
