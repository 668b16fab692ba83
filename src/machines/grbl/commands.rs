//! Typed GRBL 1.1h commands.
//!
//! Line-based commands implement `Display` to produce the exact string sent
//! over serial (the port adds newline). Real-time commands are single bytes
//! with no newline; use `as_byte()` for the wire format.

use std::fmt;

/// Line-based GRBL command. Format with `Display` (e.g. `.to_string()`) to get
/// the serial string. The port layer adds the line terminator.
#[derive(Clone, Debug, PartialEq)]
pub enum GrblCommand {
    /// Request all settings (sends `$$`).
    SettingsRequest,
    /// Run homing cycle (sends `$H`).
    Home,
    /// Unlock after alarm (sends `$X`).
    Unlock,
    /// Jog: `$J=<gcode>`. Pass the full gcode part, e.g. `G21G91X10F500`.
    Jog(String),
    /// Probe cycle: G38.2 or G38.3 with axis, distance, feed. Stored as raw gcode line.
    ProbeCycle(String),
    /// Set work coordinate system zero: G10 L20 Pn X Y Z.
    SetWcsZero { p: u8, x: f64, y: f64, z: f64 },
    /// Activate WCS: G54..G59 (P1..P6; grblHAL's .1/.2/.3 extensions are out of scope).
    ActivateWcs(u8),
    /// Raw g-code line (e.g. a job line, manual send, or macro line). Sent as-is.
    GcodeLine(String),
}

impl fmt::Display for GrblCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GrblCommand::SettingsRequest => write!(f, "$$"),
            GrblCommand::Home => write!(f, "$H"),
            GrblCommand::Unlock => write!(f, "$X"),
            GrblCommand::Jog(gcode) => write!(f, "$J={}", gcode),
            GrblCommand::ProbeCycle(line) => write!(f, "{}", line),
            GrblCommand::SetWcsZero { p, x, y, z } => {
                write!(f, "G10 L20 P{} X{} Y{} Z{}", p, x, y, z)
            }
            GrblCommand::ActivateWcs(n) => {
                let s = match *n {
                    1 => "G54",
                    2 => "G55",
                    3 => "G56",
                    4 => "G57",
                    5 => "G58",
                    6 => "G59",
                    _ => return write!(f, "G54"),
                };
                write!(f, "{}", s)
            }
            GrblCommand::GcodeLine(line) => write!(f, "{}", line),
        }
    }
}

/// Real-time single-byte command. Sent without a newline or line-terminator;
/// use `as_byte()` when writing to the port. Bypasses the RX-window accounting
/// entirely: real-time bytes never consume RX_WINDOW.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RealtimeCommand {
    /// Status report request. Byte 0x3F (`?`).
    StatusQuery,
    /// Feed hold. Byte 0x21 (`!`).
    FeedHold,
    /// Cycle start / resume. Byte 0x7E (`~`).
    CycleStart,
    /// Soft reset (Ctrl-X). Byte 0x18.
    SoftReset,
    /// Jog cancel. Byte 0x85.
    JogCancel,
    /// Feed override reset to 100%. Byte 0x90.
    FeedOverride100,
    /// Feed override +10%. Byte 0x91.
    FeedOverridePlus10,
    /// Feed override -10%. Byte 0x92.
    FeedOverrideMinus10,
    /// Rapid override 100%. Byte 0x95.
    RapidOverride100,
    /// Rapid override 50%. Byte 0x96.
    RapidOverride50,
    /// Rapid override 25%. Byte 0x97.
    RapidOverride25,
    /// Spindle override reset to 100%. Byte 0x99.
    SpindleOverride100,
    /// Spindle override +10%. Byte 0x9A.
    SpindleOverridePlus10,
    /// Spindle override -10%. Byte 0x9B.
    SpindleOverrideMinus10,
}

impl RealtimeCommand {
    /// Returns the single byte to send on the serial line (no newline).
    pub fn as_byte(self) -> u8 {
        match self {
            RealtimeCommand::StatusQuery => 0x3F,
            RealtimeCommand::FeedHold => 0x21,
            RealtimeCommand::CycleStart => 0x7E,
            RealtimeCommand::SoftReset => 0x18,
            RealtimeCommand::JogCancel => 0x85,
            RealtimeCommand::FeedOverride100 => 0x90,
            RealtimeCommand::FeedOverridePlus10 => 0x91,
            RealtimeCommand::FeedOverrideMinus10 => 0x92,
            RealtimeCommand::RapidOverride100 => 0x95,
            RealtimeCommand::RapidOverride50 => 0x96,
            RealtimeCommand::RapidOverride25 => 0x97,
            RealtimeCommand::SpindleOverride100 => 0x99,
            RealtimeCommand::SpindleOverridePlus10 => 0x9A,
            RealtimeCommand::SpindleOverrideMinus10 => 0x9B,
        }
    }
}

impl fmt::Display for RealtimeCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:02X}", self.as_byte())
    }
}

/// Computes the `±10%`-step byte sequence a feed-override slider must emit to
/// move from `current_pct` to `target_pct`: the needed count of ±10% bytes
/// toward the target, then a reset if requested. `target_pct == 100` emits a
/// single reset byte instead of stepping. Percentages are clamped to GRBL's
/// 10-220 supported range before stepping.
pub fn feed_override_steps(current_pct: i32, target_pct: i32) -> Vec<RealtimeCommand> {
    override_steps(
        current_pct,
        target_pct,
        RealtimeCommand::FeedOverride100,
        RealtimeCommand::FeedOverridePlus10,
        RealtimeCommand::FeedOverrideMinus10,
    )
}

/// Same stepping computation as [`feed_override_steps`] for the spindle override.
pub fn spindle_override_steps(current_pct: i32, target_pct: i32) -> Vec<RealtimeCommand> {
    override_steps(
        current_pct,
        target_pct,
        RealtimeCommand::SpindleOverride100,
        RealtimeCommand::SpindleOverridePlus10,
        RealtimeCommand::SpindleOverrideMinus10,
    )
}

fn override_steps(
    current_pct: i32,
    target_pct: i32,
    reset: RealtimeCommand,
    plus10: RealtimeCommand,
    minus10: RealtimeCommand,
) -> Vec<RealtimeCommand> {
    if target_pct == 100 {
        return vec![reset];
    }
    let delta = target_pct - current_pct;
    let steps = delta / 10;
    let step_cmd = if steps >= 0 { plus10 } else { minus10 };
    std::iter::repeat(step_cmd).take(steps.unsigned_abs() as usize).collect()
}

/// Maps a rapid-override percentage request to the nearest supported GRBL
/// rapid override byte (100/50/25 are the only firmware-defined steps).
pub fn rapid_override_command(target_pct: u8) -> RealtimeCommand {
    if target_pct >= 88 {
        RealtimeCommand::RapidOverride100
    } else if target_pct >= 38 {
        RealtimeCommand::RapidOverride50
    } else {
        RealtimeCommand::RapidOverride25
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_request_display() {
        assert_eq!(GrblCommand::SettingsRequest.to_string(), "$$");
    }

    #[test]
    fn test_home_display() {
        assert_eq!(GrblCommand::Home.to_string(), "$H");
    }

    #[test]
    fn test_unlock_display() {
        assert_eq!(GrblCommand::Unlock.to_string(), "$X");
    }

    #[test]
    fn test_jog_display() {
        assert_eq!(
            GrblCommand::Jog("G21G91X10F500".into()).to_string(),
            "$J=G21G91X10F500"
        );
    }

    #[test]
    fn test_probe_cycle_display() {
        assert_eq!(
            GrblCommand::ProbeCycle("G38.2 Z-10 F50".into()).to_string(),
            "G38.2 Z-10 F50"
        );
    }

    #[test]
    fn test_set_wcs_zero_display() {
        assert_eq!(
            GrblCommand::SetWcsZero { p: 1, x: 0.0, y: 0.0, z: 0.0 }.to_string(),
            "G10 L20 P1 X0 Y0 Z0"
        );
    }

    #[test]
    fn test_activate_wcs_display() {
        assert_eq!(GrblCommand::ActivateWcs(1).to_string(), "G54");
        assert_eq!(GrblCommand::ActivateWcs(6).to_string(), "G59");
    }

    #[test]
    fn test_gcode_line_display() {
        assert_eq!(
            GrblCommand::GcodeLine("G0 X10 Y20".into()).to_string(),
            "G0 X10 Y20"
        );
    }

    #[test]
    fn test_realtime_bytes() {
        assert_eq!(RealtimeCommand::StatusQuery.as_byte(), 0x3F);
        assert_eq!(RealtimeCommand::FeedHold.as_byte(), 0x21);
        assert_eq!(RealtimeCommand::CycleStart.as_byte(), 0x7E);
        assert_eq!(RealtimeCommand::SoftReset.as_byte(), 0x18);
        assert_eq!(RealtimeCommand::JogCancel.as_byte(), 0x85);
        assert_eq!(RealtimeCommand::RapidOverride100.as_byte(), 0x95);
        assert_eq!(RealtimeCommand::RapidOverride50.as_byte(), 0x96);
        assert_eq!(RealtimeCommand::RapidOverride25.as_byte(), 0x97);
        assert_eq!(RealtimeCommand::SpindleOverride100.as_byte(), 0x99);
        assert_eq!(RealtimeCommand::SpindleOverridePlus10.as_byte(), 0x9A);
        assert_eq!(RealtimeCommand::SpindleOverrideMinus10.as_byte(), 0x9B);
    }

    #[test]
    fn test_feed_override_steps_up() {
        let steps = feed_override_steps(100, 130);
        assert_eq!(steps, vec![RealtimeCommand::FeedOverridePlus10; 3]);
    }

    #[test]
    fn test_feed_override_steps_down() {
        let steps = feed_override_steps(100, 70);
        assert_eq!(steps, vec![RealtimeCommand::FeedOverrideMinus10; 3]);
    }

    #[test]
    fn test_feed_override_steps_to_100_resets() {
        let steps = feed_override_steps(70, 100);
        assert_eq!(steps, vec![RealtimeCommand::FeedOverride100]);
    }

    #[test]
    fn test_rapid_override_command_mapping() {
        assert_eq!(rapid_override_command(100), RealtimeCommand::RapidOverride100);
        assert_eq!(rapid_override_command(50), RealtimeCommand::RapidOverride50);
        assert_eq!(rapid_override_command(25), RealtimeCommand::RapidOverride25);
    }
}
