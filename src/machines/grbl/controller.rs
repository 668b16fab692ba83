//! Streaming Controller.
//!
//! Owns `StreamState` and the `pending` FIFO exclusively; everything else
//! reaches it through intents. Character-counting flow control keeps the sum
//! of unacked line lengths under a Bf-informed `RX_WINDOW`.

use super::commands::RealtimeCommand;
use super::errors::ValidationError;
use super::parser::InboundEvent;
use super::source::{Job, MAX_LINE_LEN};
use super::state::{AlarmCode, MachineState};
use std::collections::VecDeque;
use tracing::{debug, info, warn};

/// RX window floor.
pub const RX_WINDOW_FLOOR: u32 = 64;
/// RX window cap absent better information from the firmware reporting
/// higher availability.
pub const RX_WINDOW_DEFAULT_CAP: u32 = 128;

/// The controller's state machine.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamState {
    Idle,
    Armed,
    Running,
    Paused,
    Stopping,
    Errored,
    AlarmLocked,
}

/// Source of an outbound line, carried on its `PendingEntry` so the
/// controller can react differently to acks/errors depending on origin.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LineClass {
    JobLine,
    ManualLine,
    MacroLine,
}

/// How `stop()` behaves. Neither mode synthesizes a jog cancel (`0x85`):
/// soft reset already aborts any in-flight motion, jogs included.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopMode {
    SoftResetOnly,
    StopStreamThenReset,
}

/// One outbound line awaiting an `ok`/`error:N` response.
#[derive(Clone, Debug)]
pub struct PendingEntry {
    pub line_number: u32,
    pub byte_length: u32,
    pub class: LineClass,
    /// Set for lines whose leading word is M0/M1/M6 (auto-pause).
    pub pause_after_ack: bool,
}

/// The errored job line recorded for the UI and Resume-From default.
#[derive(Clone, Debug)]
pub struct ErroredLine {
    pub line_number: u32,
    pub code: u32,
    pub class: LineClass,
}

/// Validates a line against the send-time contract: `<= 80` bytes including
/// the LF terminator, ASCII 0x09/0x20..0x7E plus LF only.
pub fn validate_line_bytes(line: &str) -> Result<(), ValidationError> {
    let with_newline_len = line.len() + 1;
    if with_newline_len > MAX_LINE_LEN {
        return Err(ValidationError::LineTooLong);
    }
    if !line
        .bytes()
        .all(|b| b == 0x09 || (0x20..=0x7E).contains(&b))
    {
        return Err(ValidationError::NonAsciiLine);
    }
    Ok(())
}

/// Returns true if the line contains M0, M1, or M6 as a leading word after
/// word parsing (the auto-pause directives).
fn is_auto_pause_line(text: &str) -> bool {
    super::source::tokenize_words(text)
        .iter()
        .any(|(letter, value)| *letter == 'M' && matches!(value.as_str(), "0" | "00" | "1" | "01" | "6" | "06"))
}

/// Single-threaded owner of `StreamState` and `pending`. Dispatch decisions and ack/error/alarm
/// handling are pure methods; the I/O loop in [`run_controller`] wires this
/// to the link and channels.
pub struct StreamingController {
    state: StreamState,
    pending: VecDeque<PendingEntry>,
    rx_window: u32,
    hard_cap: u32,
    job: Option<Job>,
    next_dispatch_index: usize,
    last_sent_index: Option<usize>,
    last_error: Option<ErroredLine>,
    /// The most recently acked entry, surfaced so `run_controller` can emit
    /// `LineAcked` for whichever line (job, manual, or macro) it belonged to.
    last_acked: Option<PendingEntry>,
    stop_mode: StopMode,
    /// Set when a `$X`/`$H` clear has been sent while `AlarmLocked`; consumed
    /// by the next `Idle` status report, which is what actually clears the
    /// lockout (not the bare `ok` to the clear command itself).
    awaiting_alarm_clear: bool,
}

impl StreamingController {
    pub fn new(stop_mode: StopMode) -> Self {
        Self {
            state: StreamState::Idle,
            pending: VecDeque::new(),
            rx_window: RX_WINDOW_DEFAULT_CAP,
            hard_cap: RX_WINDOW_DEFAULT_CAP,
            job: None,
            next_dispatch_index: 0,
            last_sent_index: None,
            last_error: None,
            last_acked: None,
            stop_mode,
            awaiting_alarm_clear: false,
        }
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    pub fn last_error(&self) -> Option<&ErroredLine> {
        self.last_error.as_ref()
    }

    /// The entry consumed by the most recent `ok`, regardless of its origin.
    pub fn last_acked(&self) -> Option<&PendingEntry> {
        self.last_acked.as_ref()
    }

    pub fn pending_byte_total(&self) -> u32 {
        self.pending.iter().map(|p| p.byte_length).sum()
    }

    /// Current `RX_WINDOW` estimate. Invariant: for all reachable states,
    /// `Σ pending.byte_length <= RX_WINDOW`.
    pub fn rx_window(&self) -> u32 {
        self.rx_window
    }

    /// Arms a job for streaming, starting dispatch at `start_index` (0-based).
    /// `Idle --arm(job)--> Armed`.
    pub fn arm(&mut self, job: Job, start_index: usize) {
        self.job = Some(job);
        self.next_dispatch_index = start_index;
        self.last_sent_index = None;
        self.last_error = None;
        self.pending.clear();
        self.state = StreamState::Armed;
    }

    /// `Armed --run--> Running`.
    pub fn run(&mut self) {
        if self.state == StreamState::Armed {
            self.state = StreamState::Running;
        }
    }

    /// `Running --pause--> Paused`. Returns the realtime byte to send.
    pub fn pause(&mut self) -> Option<RealtimeCommand> {
        if self.state == StreamState::Running {
            self.state = StreamState::Paused;
            Some(RealtimeCommand::FeedHold)
        } else {
            None
        }
    }

    /// `Paused --resume--> Running`. Returns the realtime byte to send.
    pub fn resume(&mut self) -> Option<RealtimeCommand> {
        if self.state == StreamState::Paused {
            self.state = StreamState::Running;
            Some(RealtimeCommand::CycleStart)
        } else {
            None
        }
    }

    /// `Running|Paused --stop--> Stopping --drain/reset--> Idle`. Returns the
    /// realtime bytes to send, in order.
    pub fn stop(&mut self) -> Vec<RealtimeCommand> {
        if !matches!(self.state, StreamState::Running | StreamState::Paused) {
            return Vec::new();
        }
        self.state = StreamState::Stopping;
        // Both modes clear `pending` before the reset; "stop-stream-then-reset" differs
        // only in that the dispatch index is left where it is rather than rewound, so
        // the drain is visible to the caller before the reset byte goes out. Neither
        // mode synthesizes a jog cancel (0x85): GRBL's soft reset already aborts jogs.
        let bytes = match self.stop_mode {
            StopMode::SoftResetOnly => vec![RealtimeCommand::SoftReset],
            StopMode::StopStreamThenReset => vec![RealtimeCommand::SoftReset],
        };
        self.pending.clear();
        self.state = StreamState::Idle;
        bytes
    }

    /// `Errored --clear--> Idle`.
    pub fn clear_error(&mut self) {
        if self.state == StreamState::Errored {
            self.state = StreamState::Idle;
            self.pending.clear();
        }
    }

    /// Records that a `$X`/`$H` unlock/home command was just sent while
    /// `AlarmLocked`. The actual `AlarmLocked --> Idle` transition waits for
    /// the next `Idle` status report (see [`Self::handle_inbound`]).
    pub fn note_alarm_clear_sent(&mut self, text: &str) {
        let trimmed = text.trim();
        if self.state == StreamState::AlarmLocked
            && (trimmed.eq_ignore_ascii_case("$X") || trimmed.eq_ignore_ascii_case("$H"))
        {
            self.awaiting_alarm_clear = true;
        }
    }

    /// Whether a line may be dispatched right now given current state and
    /// window occupancy.
    fn can_dispatch(&self, next_len: u32) -> bool {
        self.state == StreamState::Running
            && self.pending_byte_total() + next_len <= self.rx_window
    }

    /// Pulls the next job line to send, if the window and state allow it.
    /// Returns `(line_number, text, class, pause_after_ack)`.
    pub fn next_to_dispatch(&mut self) -> Option<(u32, String, LineClass, bool)> {
        let job = self.job.as_ref()?;
        if self.next_dispatch_index >= job.len() {
            return None;
        }
        let line = job.get(self.next_dispatch_index)?;
        let byte_len = line.byte_len() as u32;
        if !self.can_dispatch(byte_len) {
            return None;
        }
        let pause_after = is_auto_pause_line(line.text());
        self.pending.push_back(PendingEntry {
            line_number: line.line_number,
            byte_length: byte_len,
            class: LineClass::JobLine,
            pause_after_ack: pause_after,
        });
        self.last_sent_index = Some(self.next_dispatch_index);
        self.next_dispatch_index += 1;
        debug!(line = line.line_number, bytes = byte_len, "dispatching job line");
        Some((line.line_number, line.text().to_string(), LineClass::JobLine, pause_after))
    }

    /// Registers a manual/macro line as pending (used by the Gate after it
    /// has already validated and written the bytes).
    pub fn register_non_job_pending(&mut self, line_number: u32, byte_length: u32, class: LineClass) {
        self.pending.push_back(PendingEntry {
            line_number,
            byte_length,
            class,
            pause_after_ack: false,
        });
    }

    /// Handles an inbound classified event. Returns `true` if the event was
    /// consumed as a protocol event (ack/error/alarm/status), `false` if it
    /// should be surfaced to the UI untouched.
    pub fn handle_inbound(&mut self, event: &InboundEvent) -> bool {
        match event {
            InboundEvent::Ok => {
                self.pop_ack();
                true
            }
            InboundEvent::Error(code) => {
                self.pop_error(*code);
                true
            }
            InboundEvent::Alarm(code) => {
                self.enter_alarm(*code);
                true
            }
            InboundEvent::Status(status) => {
                if let Some(rx_avail) = status.rx_available {
                    self.update_rx_window(rx_avail);
                }
                if status.state.is_alarm() {
                    if let MachineState::Alarm(code) = status.state {
                        self.enter_alarm(code);
                    }
                } else if self.state == StreamState::AlarmLocked
                    && self.awaiting_alarm_clear
                    && status.state == MachineState::Idle
                {
                    self.state = StreamState::Idle;
                    self.awaiting_alarm_clear = false;
                    info!("alarm cleared, Idle status confirms recovery");
                }
                false
            }
            InboundEvent::Message(m) if m == "[MSG:Reset to continue]" => {
                self.enter_alarm(AlarmCode::Unknown(0));
                true
            }
            _ => false,
        }
    }

    fn pop_ack(&mut self) {
        if let Some(entry) = self.pending.pop_front() {
            if entry.pause_after_ack && self.state == StreamState::Running {
                self.state = StreamState::Paused;
                info!(line = entry.line_number, "auto-pause on M0/M1/M6 ack");
            }
            if self.pending.is_empty()
                && self.job.as_ref().map(|j| self.next_dispatch_index >= j.len()).unwrap_or(false)
                && self.state == StreamState::Running
            {
                self.state = StreamState::Idle;
                info!("stream complete");
            }
            self.last_acked = Some(entry);
        }
    }

    fn pop_error(&mut self, code: u32) {
        if let Some(entry) = self.pending.pop_front() {
            self.last_error = Some(ErroredLine {
                line_number: entry.line_number,
                code,
                class: entry.class,
            });
            warn!(line = entry.line_number, code, "grbl error response");
        }
        self.pending.clear();
        self.state = StreamState::Errored;
    }

    fn enter_alarm(&mut self, code: AlarmCode) {
        warn!(?code, "alarm");
        self.pending.clear();
        self.state = StreamState::AlarmLocked;
    }

    /// Recomputes `RX_WINDOW` from a fresh `Bf:` rx_avail reading:
    /// `max(min_safe, min(rx_avail + pending_total, hard_cap))`.
    fn update_rx_window(&mut self, rx_avail: u32) {
        self.hard_cap = self.hard_cap.max(rx_avail);
        let candidate = rx_avail + self.pending_byte_total();
        self.rx_window = RX_WINDOW_FLOOR.max(candidate.min(self.hard_cap));
    }

    /// Resume-From target index for the UI default: the errored line.
    pub fn resume_from_default(&self) -> Option<usize> {
        self.last_error
            .as_ref()
            .map(|e| e.line_number as usize - 1)
            .or(self.last_sent_index)
    }
}

/// Intents the UI/macro layer sends to the controller worker.
/// `Arm` carries the loaded job itself (not `Clone`: a streaming job owns a
/// temp-file handle) rather than a reference, since the controller worker
/// owns its `StreamingController` privately and has no other way to receive it.
/// (Not `Debug`/`Clone`: `Job` isn't either, for the same reason.)
pub enum ControllerIntent {
    Arm { job: Job, start_index: usize },
    Run,
    Pause,
    Resume,
    Stop,
    ClearError,
    Manual(String),
    /// A line sent by the macro executor rather than the UI's manual-entry
    /// box. Distinguished from `Manual` only so the Gate applies
    /// `GateRequest::Macro` (currently the same allow-list as `Manual`, kept
    /// separate because the spec names them as distinct send origins) and so
    /// acked/errored lines are tagged `LineClass::MacroLine` for the UI.
    MacroLine(String),
    RealTime(RealtimeCommand),
}

/// Events the controller worker broadcasts out to UI subscribers.
#[derive(Clone, Debug)]
pub enum ControllerEvent {
    StateChanged(StreamState),
    LineAcked { line_number: u32, class: LineClass },
    LineErrored(ErroredLine),
    AlarmEntered(AlarmCode),
    Status(Box<super::state::ControllerStatus>),
    /// A GRBL startup banner line (`Grbl 1.1h ...`), surfaced so a connection
    /// manager driven off this same event bus can satisfy the handshake's
    /// banner-or-status step without its own copy of the reader worker.
    Banner(String),
}

/// Commands the writer worker executes against the link: reads from an
/// outbound queue and performs `write_line` / `write_realtime_byte`.
#[derive(Clone, Debug)]
enum WriterCommand {
    Line(String),
    RealTime(u8),
}

/// Spawns the Reader/Writer/Controller worker topology over `link`. Blocking
/// serial I/O runs on `spawn_blocking`, keeping the async runtime free of
/// blocking syscalls; `link` is shared behind a `tokio::sync::Mutex` so
/// the reader and writer tasks can each borrow it independently. `gate`
/// enforces the alarm-lockout and streaming-exclusion allow-list on manual
/// sends and realtime bytes arriving through this same intent channel — the
/// same `Gate` a macro executor acquires before sending.
pub fn run_controller<L>(
    link: std::sync::Arc<tokio::sync::Mutex<L>>,
    mut intent_rx: tokio::sync::mpsc::Receiver<ControllerIntent>,
    event_tx: tokio::sync::broadcast::Sender<ControllerEvent>,
    gate: std::sync::Arc<super::gate::Gate>,
    stop_mode: StopMode,
) -> tokio::task::JoinHandle<()>
where
    L: super::port::SerialLink + Send + 'static,
{
    let (writer_tx, mut writer_rx) = tokio::sync::mpsc::channel::<WriterCommand>(256);
    let reader_link = std::sync::Arc::clone(&link);
    let (inbound_tx, mut inbound_rx) = tokio::sync::mpsc::channel::<String>(256);

    // Reader worker: blocks on serial reads, frames lines, forwards raw text.
    tokio::task::spawn_blocking(move || loop {
        let lines = {
            let mut link = reader_link.blocking_lock();
            link.try_read_lines()
        };
        match lines {
            Ok(lines) => {
                for line in lines {
                    if inbound_tx.blocking_send(line).is_err() {
                        return;
                    }
                }
            }
            Err(_) => std::thread::sleep(std::time::Duration::from_millis(20)),
        }
        std::thread::sleep(std::time::Duration::from_millis(20));
    });

    // Writer worker: serializes outbound writes in dispatch order.
    let writer_link = std::sync::Arc::clone(&link);
    tokio::task::spawn(async move {
        while let Some(cmd) = writer_rx.recv().await {
            let writer_link = std::sync::Arc::clone(&writer_link);
            let _ = tokio::task::spawn_blocking(move || {
                let mut link = writer_link.blocking_lock();
                match cmd {
                    WriterCommand::Line(text) => {
                        let bytes = format!("{}\n", text);
                        link.write_line(bytes.as_bytes(), std::time::Duration::from_secs(5))
                    }
                    WriterCommand::RealTime(b) => link.write_realtime_byte(b),
                }
            })
            .await;
        }
    });

    // Controller worker: single-threaded owner of StreamState/pending.
    tokio::task::spawn(async move {
        let mut controller = StreamingController::new(stop_mode);
        let mut last_state = controller.state();
        loop {
            tokio::select! {
                Some(intent) = intent_rx.recv() => {
                    match intent {
                        ControllerIntent::Run => controller.run(),
                        ControllerIntent::Pause => {
                            if let Some(rt) = controller.pause() {
                                let _ = writer_tx.send(WriterCommand::RealTime(rt.as_byte())).await;
                            }
                        }
                        ControllerIntent::Resume => {
                            if let Some(rt) = controller.resume() {
                                let _ = writer_tx.send(WriterCommand::RealTime(rt.as_byte())).await;
                            }
                        }
                        ControllerIntent::Stop => {
                            for rt in controller.stop() {
                                let _ = writer_tx.send(WriterCommand::RealTime(rt.as_byte())).await;
                            }
                        }
                        ControllerIntent::ClearError => controller.clear_error(),
                        ControllerIntent::Manual(text) => {
                            let allowed = gate
                                .check(controller.state(), &super::gate::GateRequest::Manual(&text))
                                .is_ok();
                            if allowed && validate_line_bytes(&text).is_ok() {
                                controller.note_alarm_clear_sent(&text);
                                controller.register_non_job_pending(0, text.len() as u32 + 1, LineClass::ManualLine);
                                let _ = writer_tx.send(WriterCommand::Line(text)).await;
                            }
                        }
                        ControllerIntent::MacroLine(text) => {
                            let allowed = gate
                                .check(controller.state(), &super::gate::GateRequest::Macro(&text))
                                .is_ok();
                            if allowed && validate_line_bytes(&text).is_ok() {
                                controller.note_alarm_clear_sent(&text);
                                controller.register_non_job_pending(0, text.len() as u32 + 1, LineClass::MacroLine);
                                let _ = writer_tx.send(WriterCommand::Line(text)).await;
                            }
                        }
                        ControllerIntent::RealTime(rt) => {
                            let byte = rt.as_byte();
                            let allowed = gate
                                .check(controller.state(), &super::gate::GateRequest::RealTime(byte))
                                .is_ok();
                            if allowed {
                                let _ = writer_tx.send(WriterCommand::RealTime(byte)).await;
                            }
                        }
                        ControllerIntent::Arm { job, start_index } => {
                            controller.arm(job, start_index);
                        }
                    }
                }
                Some(line) = inbound_rx.recv() => {
                    let event = super::parser::classify_inbound(&line, std::time::Instant::now());
                    let consumed = controller.handle_inbound(&event);
                    if let super::parser::InboundEvent::Status(status) = &event {
                        let _ = event_tx.send(ControllerEvent::Status(Box::new(status.clone())));
                    }
                    if let super::parser::InboundEvent::Banner(text) = &event {
                        let _ = event_tx.send(ControllerEvent::Banner(text.clone()));
                    }
                    if consumed {
                        match event {
                            super::parser::InboundEvent::Ok => {
                                if let Some(acked) = controller.last_acked() {
                                    let _ = event_tx.send(ControllerEvent::LineAcked {
                                        line_number: acked.line_number,
                                        class: acked.class,
                                    });
                                }
                            }
                            super::parser::InboundEvent::Error(code) => {
                                if let Some(errored) = controller.last_error() {
                                    let _ = event_tx.send(ControllerEvent::LineErrored(errored.clone()));
                                }
                                let _ = code;
                            }
                            super::parser::InboundEvent::Alarm(code) => {
                                let _ = event_tx.send(ControllerEvent::AlarmEntered(code));
                            }
                            _ => {}
                        }
                    }
                }
                else => break,
            }

            while let Some((_, text, _, _)) = controller.next_to_dispatch() {
                if writer_tx.send(WriterCommand::Line(text)).await.is_err() {
                    break;
                }
            }

            let state = controller.state();
            if state != last_state {
                let _ = event_tx.send(ControllerEvent::StateChanged(state));
                last_state = state;
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::machines::grbl::source::{load_job, LoadOptions};
    use std::io::Write as _;

    fn job_from(content: &str) -> Job {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("job.nc");
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(content.as_bytes()).unwrap();
        load_job(&path, &LoadOptions::default()).unwrap()
    }

    #[test]
    fn test_validate_line_bytes_ok() {
        assert!(validate_line_bytes("G1X10").is_ok());
    }

    #[test]
    fn test_validate_line_bytes_too_long() {
        let long = "X".repeat(80);
        assert_eq!(validate_line_bytes(&long), Err(ValidationError::LineTooLong));
    }

    #[test]
    fn test_validate_line_bytes_non_ascii() {
        assert_eq!(validate_line_bytes("G1Xé"), Err(ValidationError::NonAsciiLine));
    }

    #[test]
    fn test_arm_run_dispatch_and_ack_drains_to_idle() {
        let job = job_from("G1X1\nG1X2\n");
        let mut c = StreamingController::new(StopMode::SoftResetOnly);
        c.arm(job, 0);
        assert_eq!(c.state(), StreamState::Armed);
        c.run();
        assert_eq!(c.state(), StreamState::Running);

        let (n1, _, _, _) = c.next_to_dispatch().unwrap();
        assert_eq!(n1, 1);
        let (n2, _, _, _) = c.next_to_dispatch().unwrap();
        assert_eq!(n2, 2);
        assert!(c.next_to_dispatch().is_none());

        c.handle_inbound(&InboundEvent::Ok);
        assert_eq!(c.state(), StreamState::Running);
        c.handle_inbound(&InboundEvent::Ok);
        assert_eq!(c.state(), StreamState::Idle);
    }

    #[test]
    fn test_window_invariant_blocks_dispatch_when_full() {
        let job = job_from("G1X1\nG1X2\nG1X3\n");
        let mut c = StreamingController::new(StopMode::SoftResetOnly);
        c.rx_window = 5;
        c.hard_cap = 5;
        c.arm(job, 0);
        c.run();
        assert!(c.next_to_dispatch().is_some());
        assert!(c.next_to_dispatch().is_none());
        assert!(c.pending_byte_total() <= c.rx_window);
    }

    #[test]
    fn test_error_mid_stream_clears_pending_and_records_line() {
        let job = job_from("G1X1\nG1X2\nG1X3\n");
        let mut c = StreamingController::new(StopMode::SoftResetOnly);
        c.arm(job, 0);
        c.run();
        c.next_to_dispatch();
        c.next_to_dispatch();
        c.handle_inbound(&InboundEvent::Error(20));
        assert_eq!(c.state(), StreamState::Errored);
        assert_eq!(c.pending_byte_total(), 0);
        assert_eq!(c.last_error().unwrap().line_number, 1);
        assert_eq!(c.last_error().unwrap().code, 20);
    }

    #[test]
    fn test_alarm_locks_and_clears_pending() {
        let job = job_from("G1X1\nG1X2\n");
        let mut c = StreamingController::new(StopMode::SoftResetOnly);
        c.arm(job, 0);
        c.run();
        c.next_to_dispatch();
        c.handle_inbound(&InboundEvent::Alarm(AlarmCode::HardLimit));
        assert_eq!(c.state(), StreamState::AlarmLocked);
        assert_eq!(c.pending_byte_total(), 0);
    }

    #[test]
    fn test_alarm_unlock_requires_both_clear_command_and_idle_status() {
        use super::super::parser::parse_status;
        use std::time::Instant;

        let job = job_from("G1X1\n");
        let mut c = StreamingController::new(StopMode::SoftResetOnly);
        c.arm(job, 0);
        c.run();
        c.next_to_dispatch();
        c.handle_inbound(&InboundEvent::Alarm(AlarmCode::HardLimit));
        assert_eq!(c.state(), StreamState::AlarmLocked);

        // A status report alone, with no clear command sent yet, does not recover.
        let run_status = parse_status("<Idle|MPos:0,0,0|FS:0,0>", Instant::now()).unwrap();
        c.handle_inbound(&InboundEvent::Status(run_status.clone()));
        assert_eq!(c.state(), StreamState::AlarmLocked);

        c.note_alarm_clear_sent("$X");
        c.handle_inbound(&InboundEvent::Status(run_status));
        assert_eq!(c.state(), StreamState::Idle);
    }

    #[test]
    fn test_auto_pause_on_m0_ack() {
        let job = job_from("G1X1\nM0\nG1X2\n");
        let mut c = StreamingController::new(StopMode::SoftResetOnly);
        c.arm(job, 0);
        c.run();
        c.next_to_dispatch(); // G1X1
        c.handle_inbound(&InboundEvent::Ok);
        assert_eq!(c.state(), StreamState::Running);

        let (_, text, _, pause_after) = c.next_to_dispatch().unwrap(); // M0
        assert_eq!(text, "M0");
        assert!(pause_after);
        c.handle_inbound(&InboundEvent::Ok);
        assert_eq!(c.state(), StreamState::Paused);

        c.resume();
        assert_eq!(c.state(), StreamState::Running);
        c.next_to_dispatch(); // G1X2
        c.handle_inbound(&InboundEvent::Ok);
        assert_eq!(c.state(), StreamState::Idle);
    }

    #[test]
    fn test_pause_resume_realtime_bytes() {
        let job = job_from("G1X1\n");
        let mut c = StreamingController::new(StopMode::SoftResetOnly);
        c.arm(job, 0);
        c.run();
        assert_eq!(c.pause(), Some(RealtimeCommand::FeedHold));
        assert_eq!(c.state(), StreamState::Paused);
        assert_eq!(c.resume(), Some(RealtimeCommand::CycleStart));
        assert_eq!(c.state(), StreamState::Running);
    }

    #[test]
    fn test_stop_stream_then_reset_drains_pending_and_soft_resets() {
        let job = job_from("G1X1\nG1X2\n");
        let mut c = StreamingController::new(StopMode::StopStreamThenReset);
        c.arm(job, 0);
        c.run();
        c.next_to_dispatch();
        let bytes = c.stop();
        assert_eq!(bytes, vec![RealtimeCommand::SoftReset]);
        assert_eq!(c.state(), StreamState::Idle);
        assert_eq!(c.pending_byte_total(), 0);
    }

    #[test]
    fn test_rx_window_updates_from_bf_and_respects_floor_and_cap() {
        let mut c = StreamingController::new(StopMode::SoftResetOnly);
        c.update_rx_window(10);
        assert_eq!(c.rx_window, RX_WINDOW_FLOOR);
        c.update_rx_window(200);
        assert_eq!(c.rx_window, 200);
        assert_eq!(c.hard_cap, 200);
    }

    #[test]
    fn test_clear_error_returns_to_idle() {
        let job = job_from("G1X1\n");
        let mut c = StreamingController::new(StopMode::SoftResetOnly);
        c.arm(job, 0);
        c.run();
        c.next_to_dispatch();
        c.handle_inbound(&InboundEvent::Error(1));
        assert_eq!(c.state(), StreamState::Errored);
        c.clear_error();
        assert_eq!(c.state(), StreamState::Idle);
    }

    #[test]
    fn test_resume_from_default_after_error() {
        let job = job_from("G1X1\nG1X2\nG1X3\n");
        let mut c = StreamingController::new(StopMode::SoftResetOnly);
        c.arm(job, 0);
        c.run();
        c.next_to_dispatch();
        c.next_to_dispatch();
        c.handle_inbound(&InboundEvent::Error(20));
        assert_eq!(c.resume_from_default(), Some(0));
    }
}
