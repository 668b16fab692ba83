//! Error kinds shared across the streaming core.
//!
//! Each variant is distinguishable so the UI can react differently (abort a
//! load, latch a stream error, reject a manual send without touching stream
//! state, etc.). Protocol events that are part of normal operation (ack,
//! error:N, alarm) are *handled* by the controller as state transitions, not
//! raised as `ProtocolError` — that variant is reserved for I/O-level faults.

use thiserror::Error;

/// Errors while loading and validating a job file (§4.B).
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("non-ASCII byte in job file at byte offset {offset}")]
    NonAscii { offset: usize },
    #[error("line {line} is over 80 bytes and cannot be split")]
    OverlongUnsplittable { line: u32 },
    #[error("line {line} begins with '$' (system commands are not allowed in job files)")]
    SystemCommandInJob { line: u32 },
    #[error("I/O error loading job: {0}")]
    IoError(#[from] std::io::Error),
    #[error("temp directory is not writable for streaming materialization: {0}")]
    NotWritableForTemp(std::io::Error),
}

/// Errors surfaced from the wire protocol / connection layer (§4.A, §4.D, §4.F).
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("grbl reported error:{0}")]
    GrblError(u32),
    #[error("grbl reported ALARM:{0:?}")]
    GrblAlarm(crate::machines::grbl::AlarmCode),
    #[error("connection closed unexpectedly")]
    UnexpectedClose,
    #[error("write timed out")]
    WriteTimeout,
    #[error("malformed framing on read: {0}")]
    ReadFramingError(String),
}

/// Errors from the Macro/Manual Gate's mutual-exclusion rules (§4.G).
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum GateError {
    #[error("blocked: a job is streaming")]
    BlockedByStreaming,
    #[error("blocked: controller is alarm-locked")]
    BlockedByAlarm,
    #[error("blocked: not connected")]
    BlockedByDisconnect,
}

/// Errors from macro execution (§4.G, §9).
#[derive(Debug, Error)]
pub enum MacroError {
    #[error("scripting is disabled; only plain g-code and directives are accepted")]
    ScriptingDisabled,
    #[error("macro compile error at line {0}")]
    CompileError(u32),
    #[error("macro timed out waiting for a condition")]
    Timeout,
    #[error("alarm raised during macro execution at line {0}")]
    AlarmDuringMacro(u32),
}

/// Errors from send-time validation of manual/macro/job lines (§4.D).
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ValidationError {
    #[error("line exceeds 80 bytes including the line terminator")]
    LineTooLong,
    #[error("line contains a byte outside the ASCII 0x09/0x20..0x7E + LF set")]
    NonAsciiLine,
}
