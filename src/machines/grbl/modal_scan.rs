//! Modal Pre-Scanner.
//!
//! Walks the processed job prefix before a Resume-From target, folding every
//! modal word into a [`ModalSnapshot`], and synthesizes the preamble lines
//! that restore that state before the resume line is sent.

use super::source::{tokenize_words, Job, Word};
use super::state::*;

const MAX_PREAMBLE_LINE_LEN: usize = super::source::MAX_LINE_LEN;

/// Scans processed lines `[0..target_index)` (0-based), folding every modal
/// word into a [`ModalSnapshot`]. `saw_g92` is set the first time a `G92`
/// word is seen anywhere in the prefix.
pub fn scan_prefix(job: &Job, target_index: usize) -> ModalSnapshot {
    let mut modal = ModalSnapshot::default();
    for line in job.iter_from(0).take(target_index) {
        let words = tokenize_words(line.text());
        apply_words(&mut modal, &words);
    }
    modal
}

fn apply_words(modal: &mut ModalSnapshot, words: &[Word]) {
    for (letter, value) in words {
        match (letter, value.as_str()) {
            ('G', "0") | ('G', "00") => modal.motion = MotionMode::G0,
            ('G', "1") | ('G', "01") => modal.motion = MotionMode::G1,
            ('G', "2") | ('G', "02") => modal.motion = MotionMode::G2,
            ('G', "3") | ('G', "03") => modal.motion = MotionMode::G3,
            ('G', "17") => modal.plane = Plane::G17,
            ('G', "18") => modal.plane = Plane::G18,
            ('G', "19") => modal.plane = Plane::G19,
            ('G', "20") => modal.units = Units::G20,
            ('G', "21") => modal.units = Units::G21,
            ('G', "90") => modal.distance = Distance::G90,
            ('G', "91") => modal.distance = Distance::G91,
            ('G', "90.1") => modal.arc_distance = Distance::G90,
            ('G', "91.1") => modal.arc_distance = Distance::G91,
            ('G', "93") => modal.feed_mode = FeedMode::G93,
            ('G', "94") => modal.feed_mode = FeedMode::G94,
            ('G', "95") => modal.feed_mode = FeedMode::G95,
            ('G', "92") => modal.saw_g92 = true,
            ('G', v) => {
                if let Some(wcs) = Wcs::from_word_value(v) {
                    modal.wcs = wcs;
                }
            }
            ('M', "3") | ('M', "03") => modal.spindle = SpindleMode::Cw,
            ('M', "4") | ('M', "04") => modal.spindle = SpindleMode::Ccw,
            ('M', "5") | ('M', "05") => modal.spindle = SpindleMode::Off,
            ('M', "7") | ('M', "07") => {
                modal.coolant = match modal.coolant {
                    CoolantMode::Flood | CoolantMode::Both => CoolantMode::Both,
                    _ => CoolantMode::Mist,
                }
            }
            ('M', "8") | ('M', "08") => {
                modal.coolant = match modal.coolant {
                    CoolantMode::Mist | CoolantMode::Both => CoolantMode::Both,
                    _ => CoolantMode::Flood,
                }
            }
            ('M', "9") | ('M', "09") => modal.coolant = CoolantMode::Off,
            ('F', v) => modal.feed = v.parse().ok(),
            ('S', v) => modal.spindle_speed = v.parse().ok(),
            ('T', v) => modal.tool = v.parse().ok(),
            _ => {}
        }
    }
}

/// Synthesizes the preamble that restores `modal` before sending the resume
/// line. Each line is `<= 80` bytes (motion/modal words alone never approach
/// that limit, so no further grouping is needed).
pub fn build_preamble(modal: &ModalSnapshot) -> Vec<String> {
    let mut lines = Vec::new();

    lines.push(plane_word(modal.plane).to_string());
    lines.push(units_word(modal.units).to_string());
    lines.push(distance_word(modal.distance).to_string());
    lines.push(arc_word(modal.arc_distance).to_string());
    lines.push(format!("G{}", wcs_number(modal.wcs)));

    lines.push(match modal.spindle {
        SpindleMode::Off => "M5".to_string(),
        SpindleMode::Cw => match modal.spindle_speed {
            Some(s) => format!("M3 S{}", format_plain(s)),
            None => "M3".to_string(),
        },
        SpindleMode::Ccw => match modal.spindle_speed {
            Some(s) => format!("M4 S{}", format_plain(s)),
            None => "M4".to_string(),
        },
    });

    match modal.coolant {
        CoolantMode::Off => lines.push("M9".to_string()),
        CoolantMode::Mist => lines.push("M7".to_string()),
        CoolantMode::Flood => lines.push("M8".to_string()),
        CoolantMode::Both => {
            lines.push("M7".to_string());
            lines.push("M8".to_string());
        }
    }

    if let Some(tool) = modal.tool {
        lines.push(format!("T{}", tool));
    }

    if let Some(feed) = modal.feed {
        lines.push(format!("{} F{}", motion_word(modal.motion), format_plain(feed)));
    }

    for line in &lines {
        debug_assert!(line.len() + 1 <= MAX_PREAMBLE_LINE_LEN);
    }

    lines
}

fn plane_word(p: Plane) -> &'static str {
    match p {
        Plane::G17 => "G17",
        Plane::G18 => "G18",
        Plane::G19 => "G19",
    }
}

fn units_word(u: Units) -> &'static str {
    match u {
        Units::G20 => "G20",
        Units::G21 => "G21",
    }
}

fn distance_word(d: Distance) -> &'static str {
    match d {
        Distance::G90 => "G90",
        Distance::G91 => "G91",
    }
}

fn arc_word(d: Distance) -> &'static str {
    match d {
        Distance::G90 => "G90.1",
        Distance::G91 => "G91.1",
    }
}

fn motion_word(m: MotionMode) -> &'static str {
    m.as_gcode()
}

fn wcs_number(w: Wcs) -> &'static str {
    match w {
        Wcs::G54 => "54",
        Wcs::G55 => "55",
        Wcs::G56 => "56",
        Wcs::G57 => "57",
        Wcs::G58 => "58",
        Wcs::G59 => "59",
    }
}

/// Formats a float the way a human-authored g-code line would (no trailing
/// `.0` for whole numbers), for preamble synthesis only — job lines use
/// `source::normalize_number` on the original text instead.
fn format_plain(v: f64) -> String {
    if v.fract() == 0.0 {
        format!("{}", v as i64)
    } else {
        let s = format!("{:.4}", v);
        s.trim_end_matches('0').trim_end_matches('.').to_string()
    }
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
    fn test_scan_prefix_tracks_modal_words() {
        let job = job_from("G21\nG90\nG54\nM3 S12000\nG1 F800\nG1 X1\nG1 X2\n");
        let modal = scan_prefix(&job, job.len() - 1);
        assert_eq!(modal.units, Units::G21);
        assert_eq!(modal.distance, Distance::G90);
        assert_eq!(modal.wcs, Wcs::G54);
        assert_eq!(modal.spindle, SpindleMode::Cw);
        assert_eq!(modal.spindle_speed, Some(12000.0));
        assert_eq!(modal.feed, Some(800.0));
        assert_eq!(modal.motion, MotionMode::G1);
    }

    #[test]
    fn test_build_preamble_matches_scenario_s5() {
        let job = job_from("G21\nG90\nG54\nM3 S12000\nG1 F800\nG1 X1\n");
        let modal = scan_prefix(&job, job.len());
        let preamble = build_preamble(&modal);
        assert!(preamble.contains(&"G21".to_string()));
        assert!(preamble.contains(&"G90".to_string()));
        assert!(preamble.contains(&"G54".to_string()));
        assert!(preamble.contains(&"M3 S12000".to_string()));
        assert!(preamble.contains(&"G1 F800".to_string()));
        for line in &preamble {
            assert!(line.len() + 1 <= MAX_PREAMBLE_LINE_LEN);
        }
    }

    #[test]
    fn test_scan_prefix_tracks_g92_flag() {
        let job = job_from("G92 X0 Y0\nG1 X1\n");
        let modal = scan_prefix(&job, job.len());
        assert!(modal.saw_g92);
    }

    #[test]
    fn test_scan_prefix_coolant_both() {
        let job = job_from("M7\nM8\nG1 X1\n");
        let modal = scan_prefix(&job, job.len());
        assert_eq!(modal.coolant, CoolantMode::Both);
    }
}
