//! Machine state types for GRBL 1.1h.
//!
//! Types only — no logic. Used by the parser, controller, connection manager,
//! and anything that holds or broadcasts machine status.

use serde::{Deserialize, Serialize};
use std::time::Instant;

/// Position in machine or work coordinates (X/Y/Z only; no rotary axis).
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Position {
    pub fn sub(self, other: Position) -> Position {
        Position {
            x: self.x - other.x,
            y: self.y - other.y,
            z: self.z - other.z,
        }
    }
}

/// Reason for Hold state (e.g. feed hold, safety door).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum HoldReason {
    FeedHold,
    SafetyDoor,
    Other(String),
}

/// Alarm code from GRBL 1.1h (codes 1–9 per the firmware's alarm table).
/// Unknown codes map to `Unknown(n)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AlarmCode {
    HardLimit,          // 1
    SoftLimit,          // 2
    AbortCycle,         // 3
    ProbeFailInitial,   // 4
    ProbeFailContact,   // 5
    HomingFailReset,    // 6
    HomingFailDoor,     // 7
    FailPulloff,        // 8
    HomingFailApproach, // 9
    Unknown(u8),
}

impl From<u8> for AlarmCode {
    fn from(n: u8) -> Self {
        match n {
            1 => AlarmCode::HardLimit,
            2 => AlarmCode::SoftLimit,
            3 => AlarmCode::AbortCycle,
            4 => AlarmCode::ProbeFailInitial,
            5 => AlarmCode::ProbeFailContact,
            6 => AlarmCode::HomingFailReset,
            7 => AlarmCode::HomingFailDoor,
            8 => AlarmCode::FailPulloff,
            9 => AlarmCode::HomingFailApproach,
            _ => AlarmCode::Unknown(n),
        }
    }
}

/// Input pin flags reported in a status line's `Pn:` field.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PinState {
    pub x: bool,
    pub y: bool,
    pub z: bool,
    pub p: bool,
    pub d: bool,
    pub h: bool,
    pub r: bool,
    pub s: bool,
}

impl PinState {
    /// Parses the `Pn:` flag string (e.g. "XYZ" or "PD").
    pub fn from_flags(s: &str) -> Self {
        let mut pins = PinState::default();
        for c in s.chars() {
            match c {
                'X' => pins.x = true,
                'Y' => pins.y = true,
                'Z' => pins.z = true,
                'P' => pins.p = true,
                'D' => pins.d = true,
                'H' => pins.h = true,
                'R' => pins.r = true,
                'S' => pins.s = true,
                _ => {}
            }
        }
        pins
    }
}

/// Override percentages reported in a status line's `Ov:` field (feed, rapid, spindle).
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Overrides {
    pub feed_pct: u16,
    pub rapid_pct: u16,
    pub spindle_pct: u16,
}

impl Default for Overrides {
    fn default() -> Self {
        Self {
            feed_pct: 100,
            rapid_pct: 100,
            spindle_pct: 100,
        }
    }
}

/// High-level machine state from a status report's leading token.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum MachineState {
    Idle,
    Run,
    Hold(HoldReason),
    Jog,
    Alarm(AlarmCode),
    Door,
    Check,
    Home,
    Sleep,
    Unknown(String),
}

impl MachineState {
    pub fn is_alarm(&self) -> bool {
        matches!(self, MachineState::Alarm(_))
    }
}

/// Full machine status parsed from a single `<...>` status response.
#[derive(Clone, Debug, Serialize)]
pub struct ControllerStatus {
    pub state: MachineState,
    pub machine_pos: Position,
    /// Work position. Derived as `machine_pos - wco` when `wco` is present,
    /// or taken directly from a reported `WPos:` field otherwise.
    pub work_pos: Position,
    /// Work coordinate offset, if the report carried one.
    pub wco: Option<Position>,
    pub feed_rate: f64,
    pub spindle_speed: f64,
    /// RX buffer bytes available, from `Bf:rx,planner`.
    pub rx_available: Option<u32>,
    /// Planner blocks available, from `Bf:rx,planner`.
    pub planner_available: Option<u32>,
    pub input_pins: PinState,
    pub overrides: Overrides,
    /// Monotonic counter incremented on every successful parse; lets waiters
    /// detect "a new status has arrived" without comparing full structs.
    pub freshness_stamp: u64,
    #[serde(skip_serializing)]
    pub last_updated: Instant,
}

impl ControllerStatus {
    /// Initial status before any poll response has been received.
    pub fn idle() -> Self {
        Self {
            state: MachineState::Idle,
            machine_pos: Position::default(),
            work_pos: Position::default(),
            wco: None,
            feed_rate: 0.0,
            spindle_speed: 0.0,
            rx_available: None,
            planner_available: None,
            input_pins: PinState::default(),
            overrides: Overrides::default(),
            freshness_stamp: 0,
            last_updated: Instant::now(),
        }
    }
}

/// Sticky modal state tracked by the pre-scanner and saved/restored around macros.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ModalSnapshot {
    pub motion: MotionMode,
    pub plane: Plane,
    pub units: Units,
    pub distance: Distance,
    pub arc_distance: Distance,
    pub feed_mode: FeedMode,
    pub wcs: Wcs,
    pub spindle: SpindleMode,
    pub coolant: CoolantMode,
    pub feed: Option<f64>,
    pub spindle_speed: Option<f64>,
    pub tool: Option<u32>,
    /// Whether a `G92` coordinate offset was set anywhere before the scan point.
    pub saw_g92: bool,
}

impl Default for ModalSnapshot {
    fn default() -> Self {
        Self {
            motion: MotionMode::G0,
            plane: Plane::G17,
            units: Units::G21,
            distance: Distance::G90,
            arc_distance: Distance::G90,
            feed_mode: FeedMode::G94,
            wcs: Wcs::G54,
            spindle: SpindleMode::Off,
            coolant: CoolantMode::Off,
            feed: None,
            spindle_speed: None,
            tool: None,
            saw_g92: false,
        }
    }
}

/// Sticky motion mode (G0/G1/G2/G3). Arcs (G2/G3) are tracked for modal
/// completeness; the source pipeline only ever splits G0/G1 moves.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum MotionMode {
    G0,
    G1,
    G2,
    G3,
}

impl MotionMode {
    pub fn as_gcode(self) -> &'static str {
        match self {
            MotionMode::G0 => "G0",
            MotionMode::G1 => "G1",
            MotionMode::G2 => "G2",
            MotionMode::G3 => "G3",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Plane {
    G17,
    G18,
    G19,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Units {
    G20,
    G21,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Distance {
    G90,
    G91,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FeedMode {
    G93,
    G94,
    G95,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Wcs {
    G54,
    G55,
    G56,
    G57,
    G58,
    G59,
}

impl Wcs {
    pub fn as_gcode(self) -> &'static str {
        match self {
            Wcs::G54 => "G54",
            Wcs::G55 => "G55",
            Wcs::G56 => "G56",
            Wcs::G57 => "G57",
            Wcs::G58 => "G58",
            Wcs::G59 => "G59",
        }
    }

    /// Parses a `G54`..`G59` word value (e.g. "54") into a `Wcs`. Returns
    /// `None` for anything outside that range.
    pub fn from_word_value(value: &str) -> Option<Self> {
        match value {
            "54" => Some(Wcs::G54),
            "55" => Some(Wcs::G55),
            "56" => Some(Wcs::G56),
            "57" => Some(Wcs::G57),
            "58" => Some(Wcs::G58),
            "59" => Some(Wcs::G59),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SpindleMode {
    Off,
    Cw,
    Ccw,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CoolantMode {
    Off,
    Mist,
    Flood,
    Both,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alarm_code_from_known() {
        assert_eq!(AlarmCode::from(1), AlarmCode::HardLimit);
        assert_eq!(AlarmCode::from(9), AlarmCode::HomingFailApproach);
    }

    #[test]
    fn test_alarm_code_from_unknown() {
        assert_eq!(AlarmCode::from(200), AlarmCode::Unknown(200));
    }

    #[test]
    fn test_pin_state_from_flags() {
        let pins = PinState::from_flags("XYZP");
        assert!(pins.x && pins.y && pins.z && pins.p);
        assert!(!pins.d && !pins.h && !pins.r && !pins.s);
    }

    #[test]
    fn test_position_sub() {
        let a = Position { x: 10.0, y: 5.0, z: 1.0 };
        let b = Position { x: 2.0, y: 1.0, z: 0.5 };
        let c = a.sub(b);
        assert_eq!(c, Position { x: 8.0, y: 4.0, z: 0.5 });
    }

    #[test]
    fn test_modal_snapshot_default() {
        let m = ModalSnapshot::default();
        assert_eq!(m.units, Units::G21);
        assert_eq!(m.distance, Distance::G90);
        assert!(!m.saw_g92);
    }

    #[test]
    fn test_wcs_as_gcode() {
        assert_eq!(Wcs::G54.as_gcode(), "G54");
        assert_eq!(Wcs::G59.as_gcode(), "G59");
    }
}
