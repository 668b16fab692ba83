//! Pure parsing for GRBL 1.1h responses.
//!
//! No async, no I/O — only string/line parsing. Used by the reader worker and
//! the controller to turn serial bytes into typed events.

use super::state::*;
use std::collections::HashMap;
use std::time::Instant;
use thiserror::Error;

/// Errors produced when parsing GRBL 1.1h response strings.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("invalid status line: {0}")]
    InvalidStatus(String),
    #[error("invalid position: {0}")]
    InvalidPosition(String),
    #[error("invalid settings line: {0}")]
    InvalidSettingsLine(String),
    #[error("invalid alarm message: {0}")]
    InvalidAlarm(String),
}

/// Parses a single real-time status line (response to `?`).
///
/// Format: `<State|MPos:x,y,z|WPos:x,y,z|WCO:x,y,z|Bf:rx,planner|FS:f,s|Pn:flags|Ov:f,r,s>`.
/// Angle brackets are optional (some callers strip them while framing lines).
/// `WPos` is derived as `MPos - WCO` when only `WCO` is reported (GRBL 1.1h
/// reports one or the other depending on the `$10` status report mask).
pub fn parse_status(line: &str, last_updated: Instant) -> Result<ControllerStatus, ParseError> {
    let s = line.trim();
    let s = s.strip_prefix('<').unwrap_or(s).strip_suffix('>').unwrap_or(s);
    let parts: Vec<&str> = s.split('|').collect();
    let state_token = parts.first().map(|p| p.trim()).unwrap_or("");
    if state_token.is_empty() {
        return Err(ParseError::InvalidStatus("empty status".into()));
    }

    let state = parse_state(state_token)?;
    let mut machine_pos = Position::default();
    let mut reported_work_pos: Option<Position> = None;
    let mut wco: Option<Position> = None;
    let mut feed_rate = 0.0_f64;
    let mut spindle_speed = 0.0_f64;
    let mut rx_available = None;
    let mut planner_available = None;
    let mut input_pins = PinState::default();
    let mut overrides = Overrides::default();

    for part in parts.iter().skip(1) {
        let part = part.trim();
        if let Some(pos_str) = part.strip_prefix("MPos:") {
            machine_pos = parse_position(pos_str)?;
        } else if let Some(pos_str) = part.strip_prefix("WPos:") {
            reported_work_pos = Some(parse_position(pos_str)?);
        } else if let Some(pos_str) = part.strip_prefix("WCO:") {
            wco = Some(parse_position(pos_str)?);
        } else if let Some(bf_str) = part.strip_prefix("Bf:") {
            let (rx, planner) = parse_bf(bf_str)?;
            rx_available = Some(rx);
            planner_available = Some(planner);
        } else if let Some(fs_str) = part.strip_prefix("FS:") {
            let (feed, spindle) = parse_fs(fs_str)?;
            feed_rate = feed;
            spindle_speed = spindle;
        } else if let Some(f_str) = part.strip_prefix("F:") {
            // Older status reports carry a bare feed field with no spindle.
            feed_rate = f_str.trim().parse().unwrap_or(feed_rate);
        } else if let Some(pn_str) = part.strip_prefix("Pn:") {
            input_pins = PinState::from_flags(pn_str);
        } else if let Some(ov_str) = part.strip_prefix("Ov:") {
            overrides = parse_ov(ov_str)?;
        }
        // Ln:, A:, SD: and other 1.1h fields are not consumed; ControllerStatus
        // does not model them.
    }

    let work_pos = match (reported_work_pos, wco) {
        (Some(wp), _) => wp,
        (None, Some(offset)) => machine_pos.sub(offset),
        (None, None) => Position::default(),
    };

    Ok(ControllerStatus {
        state,
        machine_pos,
        work_pos,
        wco,
        feed_rate,
        spindle_speed,
        rx_available,
        planner_available,
        input_pins,
        overrides,
        freshness_stamp: 0,
        last_updated,
    })
}

/// Parses the state token (first segment), e.g. `Hold:0` or `Alarm:1`.
fn parse_state(s: &str) -> Result<MachineState, ParseError> {
    let s = s.trim();
    let (base, rest) = match s.find(':') {
        Some(i) => (&s[..i], Some(&s[i + 1..])),
        None => (s, None),
    };
    let base = base.trim();
    match base {
        "Idle" => Ok(MachineState::Idle),
        "Run" => Ok(MachineState::Run),
        "Hold" => {
            let reason = match rest.and_then(|r| r.trim().parse::<u8>().ok()) {
                Some(1) => HoldReason::SafetyDoor,
                _ => HoldReason::FeedHold,
            };
            Ok(MachineState::Hold(reason))
        }
        "Jog" => Ok(MachineState::Jog),
        "Alarm" => {
            let code = rest
                .and_then(|r| r.trim().parse::<u8>().ok())
                .map(AlarmCode::from)
                .unwrap_or(AlarmCode::Unknown(0));
            Ok(MachineState::Alarm(code))
        }
        "Door" => Ok(MachineState::Door),
        "Check" => Ok(MachineState::Check),
        "Home" => Ok(MachineState::Home),
        "Sleep" => Ok(MachineState::Sleep),
        _ => Ok(MachineState::Unknown(s.to_string())),
    }
}

/// Parses "x,y,z" into a `Position` (X/Y/Z only; no rotary axis).
fn parse_position(s: &str) -> Result<Position, ParseError> {
    let parts: Vec<&str> = s.split(',').map(str::trim).collect();
    if parts.len() < 3 {
        return Err(ParseError::InvalidPosition(format!(
            "expected x,y,z, got: {}",
            s
        )));
    }
    let x: f64 = parts[0]
        .parse()
        .map_err(|_| ParseError::InvalidPosition(format!("invalid x: {}", parts[0])))?;
    let y: f64 = parts[1]
        .parse()
        .map_err(|_| ParseError::InvalidPosition(format!("invalid y: {}", parts[1])))?;
    let z: f64 = parts[2]
        .parse()
        .map_err(|_| ParseError::InvalidPosition(format!("invalid z: {}", parts[2])))?;
    Ok(Position { x, y, z })
}

/// Parses "feed,spindle" (the `FS:` field).
fn parse_fs(s: &str) -> Result<(f64, f64), ParseError> {
    let parts: Vec<&str> = s.split(',').map(str::trim).collect();
    if parts.len() < 2 {
        return Err(ParseError::InvalidStatus(format!(
            "FS expected feed,spindle: {}",
            s
        )));
    }
    let feed: f64 = parts[0]
        .parse()
        .map_err(|_| ParseError::InvalidStatus(format!("invalid feed: {}", parts[0])))?;
    let spindle: f64 = parts[1]
        .parse()
        .map_err(|_| ParseError::InvalidStatus(format!("invalid spindle: {}", parts[1])))?;
    Ok((feed, spindle))
}

/// Parses "rx_avail,planner_avail" (the `Bf:` field driving the RX window).
fn parse_bf(s: &str) -> Result<(u32, u32), ParseError> {
    let parts: Vec<&str> = s.split(',').map(str::trim).collect();
    if parts.len() < 2 {
        return Err(ParseError::InvalidStatus(format!("Bf expected rx,planner: {}", s)));
    }
    let rx: u32 = parts[0]
        .parse()
        .map_err(|_| ParseError::InvalidStatus(format!("invalid Bf rx: {}", parts[0])))?;
    let planner: u32 = parts[1]
        .parse()
        .map_err(|_| ParseError::InvalidStatus(format!("invalid Bf planner: {}", parts[1])))?;
    Ok((rx, planner))
}

/// Parses "f,r,s" (the `Ov:` override-percent field).
fn parse_ov(s: &str) -> Result<Overrides, ParseError> {
    let parts: Vec<&str> = s.split(',').map(str::trim).collect();
    if parts.len() < 3 {
        return Err(ParseError::InvalidStatus(format!("Ov expected f,r,s: {}", s)));
    }
    let feed_pct = parts[0]
        .parse()
        .map_err(|_| ParseError::InvalidStatus(format!("invalid Ov feed: {}", parts[0])))?;
    let rapid_pct = parts[1]
        .parse()
        .map_err(|_| ParseError::InvalidStatus(format!("invalid Ov rapid: {}", parts[1])))?;
    let spindle_pct = parts[2]
        .parse()
        .map_err(|_| ParseError::InvalidStatus(format!("invalid Ov spindle: {}", parts[2])))?;
    Ok(Overrides {
        feed_pct,
        rapid_pct,
        spindle_pct,
    })
}

/// Parses an alarm message string into an alarm code.
///
/// Accepts `ALARM:n` (with or without a space after the colon).
pub fn parse_alarm_code(s: &str) -> Result<AlarmCode, ParseError> {
    let s = s.trim();
    let num_str = s
        .strip_prefix("ALARM:")
        .or_else(|| s.strip_prefix("ALARM: "))
        .map(str::trim)
        .unwrap_or(s);
    let n: u8 = num_str
        .parse()
        .map_err(|_| ParseError::InvalidAlarm(s.to_string()))?;
    Ok(AlarmCode::from(n))
}

/// Parses a `error:N` line into its numeric code.
pub fn parse_error_code(s: &str) -> Result<u32, ParseError> {
    let s = s.trim();
    let num_str = s
        .strip_prefix("error:")
        .or_else(|| s.strip_prefix("error: "))
        .map(str::trim)
        .ok_or_else(|| ParseError::InvalidAlarm(s.to_string()))?;
    num_str
        .parse()
        .map_err(|_| ParseError::InvalidAlarm(s.to_string()))
}

/// One classified inbound record from the serial line. Produced by the
/// reader worker for every terminated line; the
/// controller reacts to `Ok`/`Error`/`Alarm`/`Status`, everything else is
/// surfaced to the UI/log as-is.
#[derive(Clone, Debug)]
pub enum InboundEvent {
    Ok,
    Error(u32),
    Alarm(AlarmCode),
    Status(ControllerStatus),
    /// `[MSG:...]`, `[GC:...]`, settings responses, and other bracketed replies.
    Message(String),
    /// The GRBL startup banner (`Grbl 1.1h ['$' for help]`).
    Banner(String),
    /// Anything that doesn't match a known shape.
    Other(String),
}

/// Classifies one already-terminator-stripped inbound line.
pub fn classify_inbound(line: &str, now: Instant) -> InboundEvent {
    let trimmed = line.trim();
    if trimmed.eq_ignore_ascii_case("ok") {
        return InboundEvent::Ok;
    }
    if let Some(rest) = trimmed.strip_prefix("error:") {
        if let Ok(n) = rest.trim().parse() {
            return InboundEvent::Error(n);
        }
        return InboundEvent::Other(trimmed.to_string());
    }
    if trimmed.starts_with("ALARM:") {
        if let Ok(code) = parse_alarm_code(trimmed) {
            return InboundEvent::Alarm(code);
        }
        return InboundEvent::Other(trimmed.to_string());
    }
    if trimmed.starts_with('<') && trimmed.ends_with('>') {
        if let Ok(status) = parse_status(trimmed, now) {
            if status.state.is_alarm() {
                if let MachineState::Alarm(code) = status.state {
                    return InboundEvent::Alarm(code);
                }
            }
            return InboundEvent::Status(status);
        }
        return InboundEvent::Other(trimmed.to_string());
    }
    if trimmed == "[MSG:Reset to continue]" {
        return InboundEvent::Message(trimmed.to_string());
    }
    if trimmed.starts_with('[') && trimmed.ends_with(']') {
        return InboundEvent::Message(trimmed.to_string());
    }
    if trimmed.starts_with("Grbl ") {
        return InboundEvent::Banner(trimmed.to_string());
    }
    InboundEvent::Other(trimmed.to_string())
}

/// Parsed settings from a `$$` response: setting number -> value string.
#[derive(Clone, Debug, Default)]
pub struct GrblSettings {
    pub raw: HashMap<u32, String>,
}

/// Parses the lines of a `$$` settings response. Malformed lines are skipped
/// rather than erroring, so occasional garbage (a mid-stream status report
/// interleaved in the response) doesn't abort the whole parse.
pub fn parse_settings(lines: &str) -> Result<GrblSettings, ParseError> {
    let mut raw = HashMap::new();
    for line in lines.lines() {
        let line = line.trim();
        if line.is_empty() || line.eq_ignore_ascii_case("ok") {
            continue;
        }
        if let Some(rest) = line.strip_prefix('$') {
            if let Some((num_str, value)) = rest.split_once('=') {
                if let Ok(n) = num_str.trim().parse::<u32>() {
                    raw.insert(n, value.trim().to_string());
                }
            }
        }
    }
    Ok(GrblSettings { raw })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_status_idle_bare() {
        let line = "Idle|MPos:0,0,0|WPos:0,0,0|FS:0,0";
        let st = parse_status(line, Instant::now()).unwrap();
        assert!(matches!(st.state, MachineState::Idle));
        assert_eq!(st.machine_pos.x, 0.0);
        assert_eq!(st.work_pos.z, 0.0);
    }

    #[test]
    fn test_parse_status_with_angle_brackets_and_bf() {
        let line = "<Run|MPos:1.0,2.0,3.0|WCO:0.5,0.5,0.0|Bf:100,15|FS:800,12000|Ov:100,100,100>";
        let st = parse_status(line, Instant::now()).unwrap();
        assert!(matches!(st.state, MachineState::Run));
        assert_eq!(st.rx_available, Some(100));
        assert_eq!(st.planner_available, Some(15));
        assert_eq!(st.work_pos.x, 0.5);
        assert_eq!(st.overrides.feed_pct, 100);
    }

    #[test]
    fn test_parse_status_derives_work_pos_from_wco() {
        let line = "Idle|MPos:10.0,0,0|WCO:2.0,0,0|FS:0,0";
        let st = parse_status(line, Instant::now()).unwrap();
        assert_eq!(st.work_pos.x, 8.0);
    }

    #[test]
    fn test_parse_status_pin_flags() {
        let line = "Hold:0|MPos:0,0,0|Pn:XYP|FS:0,0";
        let st = parse_status(line, Instant::now()).unwrap();
        assert!(st.input_pins.x && st.input_pins.y && st.input_pins.p);
        assert!(matches!(st.state, MachineState::Hold(HoldReason::FeedHold)));
    }

    #[test]
    fn test_parse_status_door_hold() {
        let line = "Hold:1|MPos:0,0,0|FS:0,0";
        let st = parse_status(line, Instant::now()).unwrap();
        assert!(matches!(st.state, MachineState::Hold(HoldReason::SafetyDoor)));
    }

    #[test]
    fn test_parse_status_alarm() {
        let line = "Alarm:1|MPos:0,0,0|FS:0,0";
        let st = parse_status(line, Instant::now()).unwrap();
        assert!(matches!(st.state, MachineState::Alarm(AlarmCode::HardLimit)));
    }

    #[test]
    fn test_parse_status_invalid_empty() {
        let err = parse_status("", Instant::now()).unwrap_err();
        assert!(matches!(err, ParseError::InvalidStatus(_)));
    }

    #[test]
    fn test_parse_status_invalid_position() {
        let err = parse_status("Idle|MPos:bad,0,0|FS:0,0", Instant::now()).unwrap_err();
        assert!(matches!(err, ParseError::InvalidPosition(_)));
    }

    #[test]
    fn test_parse_alarm_code() {
        assert_eq!(parse_alarm_code("ALARM:1").unwrap(), AlarmCode::HardLimit);
        assert_eq!(parse_alarm_code("ALARM: 2").unwrap(), AlarmCode::SoftLimit);
        assert!(matches!(parse_alarm_code("ALARM:99").unwrap(), AlarmCode::Unknown(99)));
        assert!(parse_alarm_code("not a number").is_err());
    }

    #[test]
    fn test_parse_error_code() {
        assert_eq!(parse_error_code("error:20").unwrap(), 20);
        assert!(parse_error_code("garbage").is_err());
    }

    #[test]
    fn test_classify_inbound_variants() {
        let now = Instant::now();
        assert!(matches!(classify_inbound("ok", now), InboundEvent::Ok));
        assert!(matches!(classify_inbound("error:20", now), InboundEvent::Error(20)));
        assert!(matches!(classify_inbound("ALARM:1", now), InboundEvent::Alarm(AlarmCode::HardLimit)));
        assert!(matches!(
            classify_inbound("<Idle|MPos:0,0,0|FS:0,0>", now),
            InboundEvent::Status(_)
        ));
        assert!(matches!(
            classify_inbound("<Alarm:2|MPos:0,0,0|FS:0,0>", now),
            InboundEvent::Alarm(AlarmCode::SoftLimit)
        ));
        assert!(matches!(
            classify_inbound("[MSG:Reset to continue]", now),
            InboundEvent::Message(_)
        ));
        assert!(matches!(
            classify_inbound("Grbl 1.1h ['$' for help]", now),
            InboundEvent::Banner(_)
        ));
        assert!(matches!(classify_inbound("$N0=", now), InboundEvent::Other(_)));
    }

    #[test]
    fn test_parse_settings() {
        let lines = "$0=10\n$1=25\n$21=0\nok\n";
        let settings = parse_settings(lines).unwrap();
        assert_eq!(settings.raw.get(&0), Some(&"10".to_string()));
        assert_eq!(settings.raw.get(&21), Some(&"0".to_string()));
    }
}
