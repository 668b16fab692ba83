//! Macro Executor.
//!
//! Runs a parsed macro body against the gate + link: plain G-code lines are
//! sent and awaited like any manual send; directive lines (`%wait`, `%msg`,
//! `%update`, `%if`, `%state_return`) drive cooperative suspension on status
//! freshness; bracketed `[...]` expressions are evaluated against a typed
//! variable map. Full Python-style scripting from the original tool is
//! re-architected as this small sandboxed evaluator.

use super::commands::RealtimeCommand;
use super::controller::{ControllerEvent, ControllerIntent, LineClass, StreamState};
use super::errors::MacroError;
use super::gate::Gate;
use super::state::{AlarmCode, MachineState, ModalSnapshot};
use std::collections::HashMap;
use std::future::Future;
use std::ops::ControlFlow;
use std::pin::Pin;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc};

/// A macro-scoped variable value.
#[derive(Clone, Debug, PartialEq)]
pub enum MacroValue {
    Number(f64),
    Bool(bool),
    Text(String),
}

impl MacroValue {
    fn as_number(&self) -> Option<f64> {
        match self {
            MacroValue::Number(n) => Some(*n),
            MacroValue::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            MacroValue::Text(_) => None,
        }
    }

    fn truthy(&self) -> bool {
        match self {
            MacroValue::Number(n) => *n != 0.0,
            MacroValue::Bool(b) => *b,
            MacroValue::Text(s) => !s.is_empty(),
        }
    }
}

/// Typed variable map a macro body reads/writes: floats, bools, strings,
/// and a nested record for `macro.state`.
#[derive(Clone, Debug, Default)]
pub struct MacroVars {
    vars: HashMap<String, MacroValue>,
    /// The `macro.state` nested record: a small fixed set of machine-derived
    /// readonly fields refreshed before each directive evaluation.
    pub state: MacroStateSnapshot,
}

#[derive(Clone, Debug, Default)]
pub struct MacroStateSnapshot {
    pub running: bool,
    pub paused: bool,
}

impl MacroVars {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, name: &str, value: MacroValue) {
        self.vars.insert(name.to_string(), value);
    }

    pub fn get(&self, name: &str) -> Option<&MacroValue> {
        self.vars.get(name)
    }
}

/// A line in a parsed macro body.
#[derive(Clone, Debug, PartialEq)]
pub enum MacroLine {
    Gcode(String),
    Wait,
    Msg(String),
    Update,
    IfRunning(Vec<MacroLine>),
    IfPaused(Vec<MacroLine>),
    IfNotRunning(Vec<MacroLine>),
    StateReturn,
    Assign { name: String, expr: String },
    ForExpr { var: String, count_expr: String, body: Vec<MacroLine> },
}

/// Compiles macro source text into a `MacroLine` sequence. Scripting
/// (assignments, `if`/`for`) is only accepted when `scripting_enabled`;
/// otherwise only plain g-code and the recognized directives are accepted,
/// and anything else is a `ScriptingDisabled` error.
pub fn compile(source: &str, scripting_enabled: bool) -> Result<Vec<MacroLine>, MacroError> {
    let lines: Vec<&str> = source.lines().collect();
    let mut cursor = 0usize;
    compile_block(&lines, &mut cursor, scripting_enabled, None)
}

fn compile_block(
    lines: &[&str],
    cursor: &mut usize,
    scripting_enabled: bool,
    closing: Option<&str>,
) -> Result<Vec<MacroLine>, MacroError> {
    let mut out = Vec::new();
    while *cursor < lines.len() {
        let raw = lines[*cursor].trim();
        if let Some(close) = closing {
            if raw == close {
                *cursor += 1;
                return Ok(out);
            }
        }
        *cursor += 1;
        if raw.is_empty() || raw.starts_with('#') {
            continue;
        }
        if raw == "%wait" {
            out.push(MacroLine::Wait);
        } else if let Some(msg) = raw.strip_prefix("%msg ") {
            out.push(MacroLine::Msg(msg.trim().to_string()));
        } else if raw == "%update" {
            out.push(MacroLine::Update);
        } else if raw == "%state_return" {
            out.push(MacroLine::StateReturn);
        } else if raw == "%if running" {
            if !scripting_enabled {
                return Err(MacroError::ScriptingDisabled);
            }
            let body = compile_block(lines, cursor, scripting_enabled, Some("%endif"))?;
            out.push(MacroLine::IfRunning(body));
        } else if raw == "%if paused" {
            if !scripting_enabled {
                return Err(MacroError::ScriptingDisabled);
            }
            let body = compile_block(lines, cursor, scripting_enabled, Some("%endif"))?;
            out.push(MacroLine::IfPaused(body));
        } else if raw == "%if not running" {
            if !scripting_enabled {
                return Err(MacroError::ScriptingDisabled);
            }
            let body = compile_block(lines, cursor, scripting_enabled, Some("%endif"))?;
            out.push(MacroLine::IfNotRunning(body));
        } else if let Some(rest) = raw.strip_prefix("for ") {
            if !scripting_enabled {
                return Err(MacroError::ScriptingDisabled);
            }
            let (var, count_expr) = rest
                .split_once(" in ")
                .ok_or(MacroError::CompileError(*cursor as u32))?;
            let body = compile_block(lines, cursor, scripting_enabled, Some("%endfor"))?;
            out.push(MacroLine::ForExpr {
                var: var.trim().to_string(),
                count_expr: count_expr.trim().to_string(),
                body,
            });
        } else if let Some((name, expr)) = raw.split_once('=') {
            if name.trim().chars().all(|c| c.is_ascii_alphanumeric() || c == '_') && !name.trim().is_empty() {
                if !scripting_enabled {
                    return Err(MacroError::ScriptingDisabled);
                }
                out.push(MacroLine::Assign {
                    name: name.trim().to_string(),
                    expr: expr.trim().to_string(),
                });
            } else {
                out.push(MacroLine::Gcode(raw.to_string()));
            }
        } else {
            out.push(MacroLine::Gcode(raw.to_string()));
        }
    }
    if closing.is_some() {
        return Err(MacroError::CompileError(*cursor as u32));
    }
    Ok(out)
}

/// Evaluates a `[...]`-bracketed or bare arithmetic expression against
/// `vars`. Supports `+ - * /`, parentheses, numeric literals, and variable
/// references; intentionally small rather than a general sandboxed
/// scripting engine.
pub fn eval_expr(expr: &str, vars: &MacroVars) -> Result<MacroValue, MacroError> {
    let expr = expr.trim().trim_start_matches('[').trim_end_matches(']').trim();
    let tokens = tokenize_expr(expr);
    let mut pos = 0;
    let value = parse_additive(&tokens, &mut pos, vars)?;
    Ok(MacroValue::Number(value))
}

#[derive(Clone, Debug, PartialEq)]
enum ExprToken {
    Num(f64),
    Ident(String),
    Plus,
    Minus,
    Star,
    Slash,
    LParen,
    RParen,
}

fn tokenize_expr(s: &str) -> Vec<ExprToken> {
    let chars: Vec<char> = s.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match c {
            ' ' | '\t' => i += 1,
            '+' => {
                tokens.push(ExprToken::Plus);
                i += 1;
            }
            '-' => {
                tokens.push(ExprToken::Minus);
                i += 1;
            }
            '*' => {
                tokens.push(ExprToken::Star);
                i += 1;
            }
            '/' => {
                tokens.push(ExprToken::Slash);
                i += 1;
            }
            '(' => {
                tokens.push(ExprToken::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(ExprToken::RParen);
                i += 1;
            }
            c if c.is_ascii_digit() || c == '.' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let s: String = chars[start..i].iter().collect();
                tokens.push(ExprToken::Num(s.parse().unwrap_or(0.0)));
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_' || chars[i] == '.') {
                    i += 1;
                }
                tokens.push(ExprToken::Ident(chars[start..i].iter().collect()));
            }
            _ => i += 1,
        }
    }
    tokens
}

fn parse_additive(tokens: &[ExprToken], pos: &mut usize, vars: &MacroVars) -> Result<f64, MacroError> {
    let mut value = parse_multiplicative(tokens, pos, vars)?;
    loop {
        match tokens.get(*pos) {
            Some(ExprToken::Plus) => {
                *pos += 1;
                value += parse_multiplicative(tokens, pos, vars)?;
            }
            Some(ExprToken::Minus) => {
                *pos += 1;
                value -= parse_multiplicative(tokens, pos, vars)?;
            }
            _ => break,
        }
    }
    Ok(value)
}

fn parse_multiplicative(tokens: &[ExprToken], pos: &mut usize, vars: &MacroVars) -> Result<f64, MacroError> {
    let mut value = parse_unary(tokens, pos, vars)?;
    loop {
        match tokens.get(*pos) {
            Some(ExprToken::Star) => {
                *pos += 1;
                value *= parse_unary(tokens, pos, vars)?;
            }
            Some(ExprToken::Slash) => {
                *pos += 1;
                value /= parse_unary(tokens, pos, vars)?;
            }
            _ => break,
        }
    }
    Ok(value)
}

fn parse_unary(tokens: &[ExprToken], pos: &mut usize, vars: &MacroVars) -> Result<f64, MacroError> {
    if matches!(tokens.get(*pos), Some(ExprToken::Minus)) {
        *pos += 1;
        return Ok(-parse_unary(tokens, pos, vars)?);
    }
    parse_primary(tokens, pos, vars)
}

fn parse_primary(tokens: &[ExprToken], pos: &mut usize, vars: &MacroVars) -> Result<f64, MacroError> {
    match tokens.get(*pos).cloned() {
        Some(ExprToken::Num(n)) => {
            *pos += 1;
            Ok(n)
        }
        Some(ExprToken::Ident(name)) => {
            *pos += 1;
            vars.get(&name)
                .and_then(MacroValue::as_number)
                .ok_or(MacroError::CompileError(0))
        }
        Some(ExprToken::LParen) => {
            *pos += 1;
            let value = parse_additive(tokens, pos, vars)?;
            if !matches!(tokens.get(*pos), Some(ExprToken::RParen)) {
                return Err(MacroError::CompileError(0));
            }
            *pos += 1;
            Ok(value)
        }
        _ => Err(MacroError::CompileError(0)),
    }
}

/// Captures the modal state before a macro run and restores it afterward,
/// yielding the preamble lines needed to put modal state back.
pub struct ModalGuard {
    saved: ModalSnapshot,
}

impl ModalGuard {
    pub fn capture(modal: &ModalSnapshot) -> Self {
        Self { saved: modal.clone() }
    }

    /// Preamble lines that restore the captured snapshot, via the same
    /// synthesis the resume planner uses.
    pub fn restore_lines(&self) -> Vec<String> {
        super::modal_scan::build_preamble(&self.saved)
    }
}

/// Evaluates the `%if running|paused|not running` directive gate against
/// the current stream state.
pub fn directive_condition_met(kind: &MacroLine, state: StreamState) -> bool {
    match kind {
        MacroLine::IfRunning(_) => state == StreamState::Running,
        MacroLine::IfPaused(_) => state == StreamState::Paused,
        MacroLine::IfNotRunning(_) => state != StreamState::Running,
        _ => false,
    }
}

/// Polling parameters for `%wait`: polls status for up to 30s at 100ms
/// intervals.
pub const WAIT_TIMEOUT: Duration = Duration::from_secs(30);
pub const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(100);

fn alarm_code_to_u32(code: AlarmCode) -> u32 {
    match code {
        AlarmCode::HardLimit => 1,
        AlarmCode::SoftLimit => 2,
        AlarmCode::AbortCycle => 3,
        AlarmCode::ProbeFailInitial => 4,
        AlarmCode::ProbeFailContact => 5,
        AlarmCode::HomingFailReset => 6,
        AlarmCode::HomingFailDoor => 7,
        AlarmCode::FailPulloff => 8,
        AlarmCode::HomingFailApproach => 9,
        AlarmCode::Unknown(n) => n as u32,
    }
}

/// Drives a compiled macro body against the live controller worker. Acquires
/// `gate` for the whole run (spec: "macro execution acquires the gate"),
/// captures the current modal state, runs the body, then restores it. Each
/// plain g-code line is sent one at a time: the runner waits for that line's
/// own `ok` and a subsequent `Idle` status sample before sending the next,
/// rather than the streaming core's character-counting look-ahead — a macro
/// is a handful of setup/teardown lines, not a job.
///
/// `on_msg` receives `%msg` text as it's encountered; `current_state` seeds
/// the `%if running|paused|not running` gate and is kept in sync from
/// `StateChanged` events observed while waiting on other things.
pub async fn run_macro<F>(
    body: &[MacroLine],
    vars: &mut MacroVars,
    modal: &ModalSnapshot,
    current_state: StreamState,
    intent_tx: &mpsc::Sender<ControllerIntent>,
    events: &mut broadcast::Receiver<ControllerEvent>,
    gate: &Gate,
    on_msg: &mut F,
) -> Result<(), MacroError>
where
    F: FnMut(&str) + Send,
{
    let _permit = gate.acquire().await;
    let restore = ModalGuard::capture(modal);
    let mut state = current_state;
    run_block(body, vars, &mut state, intent_tx, events, on_msg).await?;
    for line in restore.restore_lines() {
        send_gcode_line(&line, intent_tx, events, &mut state).await?;
    }
    Ok(())
}

/// Recursive block runner, manually boxed since `async fn` cannot recurse
/// directly. `ControlFlow::Break` propagates a `%state_return` up through
/// nested `%if`/`for` blocks to end the macro early without an error.
fn run_block<'a, F>(
    body: &'a [MacroLine],
    vars: &'a mut MacroVars,
    state: &'a mut StreamState,
    intent_tx: &'a mpsc::Sender<ControllerIntent>,
    events: &'a mut broadcast::Receiver<ControllerEvent>,
    on_msg: &'a mut F,
) -> Pin<Box<dyn Future<Output = Result<ControlFlow<()>, MacroError>> + Send + 'a>>
where
    F: FnMut(&str) + Send,
{
    Box::pin(async move {
        for item in body {
            match item {
                MacroLine::Gcode(text) => {
                    send_gcode_line(text, intent_tx, events, state).await?;
                }
                MacroLine::Wait => {
                    await_idle_status(intent_tx, events, state).await?;
                }
                MacroLine::Msg(text) => on_msg(text),
                MacroLine::Update => {
                    update_state(intent_tx, events, vars, state).await?;
                }
                MacroLine::StateReturn => return Ok(ControlFlow::Break(())),
                MacroLine::IfRunning(inner) => {
                    if *state == StreamState::Running
                        && run_block(inner, vars, state, intent_tx, events, on_msg).await?.is_break()
                    {
                        return Ok(ControlFlow::Break(()));
                    }
                }
                MacroLine::IfPaused(inner) => {
                    if *state == StreamState::Paused
                        && run_block(inner, vars, state, intent_tx, events, on_msg).await?.is_break()
                    {
                        return Ok(ControlFlow::Break(()));
                    }
                }
                MacroLine::IfNotRunning(inner) => {
                    if *state != StreamState::Running
                        && run_block(inner, vars, state, intent_tx, events, on_msg).await?.is_break()
                    {
                        return Ok(ControlFlow::Break(()));
                    }
                }
                MacroLine::Assign { name, expr } => {
                    let value = eval_expr(expr, vars)?;
                    vars.set(name, value);
                }
                MacroLine::ForExpr { var, count_expr, body: inner } => {
                    let count = eval_expr(count_expr, vars)?.as_number().unwrap_or(0.0);
                    let iterations = count.max(0.0).round() as i64;
                    for i in 0..iterations {
                        vars.set(var, MacroValue::Number(i as f64));
                        if run_block(inner, vars, state, intent_tx, events, on_msg).await?.is_break() {
                            return Ok(ControlFlow::Break(()));
                        }
                    }
                }
            }
        }
        Ok(ControlFlow::Continue(()))
    })
}

/// Sends one macro line and waits for its own `ok` (tagged
/// `LineClass::MacroLine` so a concurrently-streaming job's acks can't be
/// mistaken for it) followed by an `Idle` status sample.
async fn send_gcode_line(
    text: &str,
    intent_tx: &mpsc::Sender<ControllerIntent>,
    events: &mut broadcast::Receiver<ControllerEvent>,
    state: &mut StreamState,
) -> Result<(), MacroError> {
    if *state == StreamState::AlarmLocked {
        return Err(MacroError::AlarmDuringMacro(0));
    }
    intent_tx
        .send(ControllerIntent::MacroLine(text.to_string()))
        .await
        .map_err(|_| MacroError::Timeout)?;

    let deadline = tokio::time::Instant::now() + WAIT_TIMEOUT;
    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            return Err(MacroError::Timeout);
        }
        match tokio::time::timeout(remaining, events.recv()).await {
            Ok(Ok(ControllerEvent::LineAcked { class: LineClass::MacroLine, .. })) => break,
            Ok(Ok(ControllerEvent::LineErrored(errored))) if errored.class == LineClass::MacroLine => {
                return Err(MacroError::AlarmDuringMacro(errored.code));
            }
            Ok(Ok(ControllerEvent::AlarmEntered(code))) => {
                return Err(MacroError::AlarmDuringMacro(alarm_code_to_u32(code)));
            }
            Ok(Ok(ControllerEvent::StateChanged(s))) => *state = s,
            Ok(Ok(_)) => continue,
            Ok(Err(RecvError::Lagged(_))) => continue,
            Ok(Err(RecvError::Closed)) => return Err(MacroError::Timeout),
            Err(_) => return Err(MacroError::Timeout),
        }
    }
    await_idle_status(intent_tx, events, state).await
}

/// Polls `?` at `WAIT_POLL_INTERVAL` until a status report shows `Idle`, up
/// to `WAIT_TIMEOUT` total. Used both after every macro line and for the
/// explicit `%wait` directive.
async fn await_idle_status(
    intent_tx: &mpsc::Sender<ControllerIntent>,
    events: &mut broadcast::Receiver<ControllerEvent>,
    state: &mut StreamState,
) -> Result<(), MacroError> {
    let deadline = tokio::time::Instant::now() + WAIT_TIMEOUT;
    loop {
        let _ = intent_tx.send(ControllerIntent::RealTime(RealtimeCommand::StatusQuery)).await;
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            return Err(MacroError::Timeout);
        }
        match tokio::time::timeout(WAIT_POLL_INTERVAL.min(remaining), events.recv()).await {
            Ok(Ok(ControllerEvent::Status(status))) if status.state == MachineState::Idle => return Ok(()),
            Ok(Ok(ControllerEvent::StateChanged(s))) => *state = s,
            Ok(Ok(ControllerEvent::AlarmEntered(code))) => {
                return Err(MacroError::AlarmDuringMacro(alarm_code_to_u32(code)));
            }
            Ok(Ok(_)) => {}
            Ok(Err(RecvError::Lagged(_))) => {}
            Ok(Err(RecvError::Closed)) => return Err(MacroError::Timeout),
            Err(_) => {} // one poll interval elapsed with no reply; resend `?`
        }
    }
}

/// `%update`: requests a fresh status sample and, once it arrives, refreshes
/// `vars.state` from the stream state observed so far.
async fn update_state(
    intent_tx: &mpsc::Sender<ControllerIntent>,
    events: &mut broadcast::Receiver<ControllerEvent>,
    vars: &mut MacroVars,
    state: &mut StreamState,
) -> Result<(), MacroError> {
    intent_tx
        .send(ControllerIntent::RealTime(RealtimeCommand::StatusQuery))
        .await
        .map_err(|_| MacroError::Timeout)?;
    let deadline = tokio::time::Instant::now() + WAIT_TIMEOUT;
    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            return Err(MacroError::Timeout);
        }
        match tokio::time::timeout(remaining, events.recv()).await {
            Ok(Ok(ControllerEvent::Status(_))) => break,
            Ok(Ok(ControllerEvent::StateChanged(s))) => *state = s,
            Ok(Ok(ControllerEvent::AlarmEntered(code))) => {
                return Err(MacroError::AlarmDuringMacro(alarm_code_to_u32(code)));
            }
            Ok(Ok(_)) => continue,
            Ok(Err(RecvError::Lagged(_))) => continue,
            Ok(Err(RecvError::Closed)) => return Err(MacroError::Timeout),
            Err(_) => return Err(MacroError::Timeout),
        }
    }
    vars.state.running = *state == StreamState::Running;
    vars.state.paused = *state == StreamState::Paused;
    Ok(())
}
