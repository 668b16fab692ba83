//! Macro file discovery.
//!
//! Plain-text files `Macro-1`..`Macro-8` (optional `.txt` suffix), located in
//! one of three search paths (leftmost wins). Header lines: label, tooltip,
//! optional background color, optional text color; body thereafter.

use std::path::{Path, PathBuf};

/// Parsed header fields preceding a macro's g-code body.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MacroHeader {
    pub label: Option<String>,
    pub tooltip: Option<String>,
    pub bg_color: Option<String>,
    pub fg_color: Option<String>,
}

/// A discovered and parsed macro file.
#[derive(Clone, Debug)]
pub struct MacroFile {
    pub slot: u8,
    pub path: PathBuf,
    pub header: MacroHeader,
    pub body: String,
}

/// Returns the three search paths in priority order (leftmost wins): the
/// user's macro directory under the config dir, a `macros` directory next to
/// the executable, then a bundled default set shipped alongside the binary.
pub fn search_paths(config_dir: &Path, exe_dir: &Path, bundled_dir: &Path) -> Vec<PathBuf> {
    vec![
        config_dir.join("macros"),
        exe_dir.join("macros"),
        bundled_dir.join("macros"),
    ]
}

/// Discovers and parses all macro slots (1..=8) across `paths`, taking the
/// first match per slot across paths in order.
pub fn discover_macros(paths: &[PathBuf]) -> Vec<MacroFile> {
    let mut found = Vec::new();
    for slot in 1..=8u8 {
        for dir in paths {
            if let Some(path) = find_slot_file(dir, slot) {
                if let Ok(content) = std::fs::read_to_string(&path) {
                    let (header, body) = parse_macro_file(&content);
                    found.push(MacroFile {
                        slot,
                        path,
                        header,
                        body,
                    });
                    break;
                }
            }
        }
    }
    found
}

fn find_slot_file(dir: &Path, slot: u8) -> Option<PathBuf> {
    let bare = dir.join(format!("Macro-{}", slot));
    if bare.is_file() {
        return Some(bare);
    }
    let txt = dir.join(format!("Macro-{}.txt", slot));
    if txt.is_file() {
        return Some(txt);
    }
    None
}

/// Splits a macro file into its (up to four) header lines and body, read
/// positionally: line 1 is the label, line 2 the tooltip, then an optional
/// background color line and an optional text color line (each recognized
/// by being a valid color token), body thereafter.
fn parse_macro_file(content: &str) -> (MacroHeader, String) {
    let lines: Vec<&str> = content.lines().collect();
    let mut header = MacroHeader::default();
    let mut idx = 0;

    if idx < lines.len() {
        header.label = Some(lines[idx].trim().to_string());
        idx += 1;
    }
    if idx < lines.len() {
        header.tooltip = Some(lines[idx].trim().to_string());
        idx += 1;
    }
    if idx < lines.len() && validate_color(lines[idx].trim()) {
        header.bg_color = Some(lines[idx].trim().to_string());
        idx += 1;
    }
    if idx < lines.len() && validate_color(lines[idx].trim()) {
        header.fg_color = Some(lines[idx].trim().to_string());
        idx += 1;
    }
    let body = lines[idx..].join("\n");
    (header, body)
}

const NAMED_COLORS: &[&str] = &[
    "red", "green", "blue", "yellow", "orange", "purple", "black", "white", "gray", "grey",
];

/// Validates a color token: `#RGB`, `#RRGGBB`, or a known named color
/// (case-insensitive).
pub fn validate_color(s: &str) -> bool {
    if let Some(hex) = s.strip_prefix('#') {
        return (hex.len() == 3 || hex.len() == 6) && hex.chars().all(|c| c.is_ascii_hexdigit());
    }
    NAMED_COLORS.contains(&s.to_ascii_lowercase().as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    #[test]
    fn test_validate_color_hex_forms() {
        assert!(validate_color("#FFF"));
        assert!(validate_color("#112233"));
        assert!(!validate_color("#GG0011"));
        assert!(!validate_color("#ABCD"));
    }

    #[test]
    fn test_validate_color_named() {
        assert!(validate_color("red"));
        assert!(validate_color("Blue"));
        assert!(!validate_color("mauve"));
    }

    #[test]
    fn test_parse_macro_file_header_and_body() {
        let content = "Zero X\nZero the X axis\n#00ff00\n#ffffff\nG38.2 Z-10 F50\nG1 Z1\n";
        let (header, body) = parse_macro_file(content);
        assert_eq!(header.label.as_deref(), Some("Zero X"));
        assert_eq!(header.tooltip.as_deref(), Some("Zero the X axis"));
        assert_eq!(header.bg_color.as_deref(), Some("#00ff00"));
        assert_eq!(header.fg_color.as_deref(), Some("#ffffff"));
        assert_eq!(body, "G38.2 Z-10 F50\nG1 Z1");
    }

    #[test]
    fn test_parse_macro_file_without_colors() {
        let content = "Probe Z\nTouch off Z\nG38.2 Z-10 F50\nG1 Z1\n";
        let (header, body) = parse_macro_file(content);
        assert_eq!(header.label.as_deref(), Some("Probe Z"));
        assert_eq!(header.tooltip.as_deref(), Some("Touch off Z"));
        assert_eq!(header.bg_color, None);
        assert_eq!(header.fg_color, None);
        assert_eq!(body, "G38.2 Z-10 F50\nG1 Z1");
    }

    #[test]
    fn test_discover_macros_prefers_leftmost_path() {
        let dir_a = tempfile::tempdir().unwrap();
        let dir_b = tempfile::tempdir().unwrap();
        std::fs::File::create(dir_a.path().join("Macro-1"))
            .unwrap()
            .write_all(b"From A\nTooltip A\nG1X1\n")
            .unwrap();
        std::fs::File::create(dir_b.path().join("Macro-1"))
            .unwrap()
            .write_all(b"From B\nTooltip B\nG1X2\n")
            .unwrap();
        let paths = vec![dir_a.path().to_path_buf(), dir_b.path().to_path_buf()];
        let macros = discover_macros(&paths);
        let slot1 = macros.iter().find(|m| m.slot == 1).unwrap();
        assert_eq!(slot1.header.label.as_deref(), Some("From A"));
    }

    #[test]
    fn test_discover_macros_accepts_txt_suffix() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::File::create(dir.path().join("Macro-2.txt"))
            .unwrap()
            .write_all(b"Label\nTooltip\nG1X1\n")
            .unwrap();
        let macros = discover_macros(&[dir.path().to_path_buf()]);
        assert!(macros.iter().any(|m| m.slot == 2));
    }
}
