//! G-code Source Pipeline.
//!
//! Loads a job file, strips comments/BOM, enforces the 80-byte-with-newline
//! line policy (compacting, splitting overlong linear moves, or rejecting),
//! and exposes an indexed, seekable line feed. Large jobs are materialized to
//! a temp file with a line-offset index instead of held fully in memory.

use super::errors::LoadError;
use super::state::{Distance, FeedMode, MotionMode};
use std::collections::VecDeque;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Maximum line length including the trailing `\n`, treated as a fixed,
/// conservative contract rather than a firmware-queried value.
pub const MAX_LINE_LEN: usize = 80;

/// Above this many raw input lines, the loader materializes to a temp file
/// instead of holding the processed job in memory.
pub const STREAMING_LINE_THRESHOLD: usize = 20_000;

/// Above this many raw input bytes, the loader materializes to a temp file
/// regardless of line count.
pub const STREAMING_BYTE_THRESHOLD: u64 = 8 * 1024 * 1024;

/// Upper bound on how many linear sub-segments a single overlong move may be
/// split into before the loader gives up and rejects the line.
const MAX_SPLIT_SEGMENTS: u32 = 32;

/// Number of decimal places used for intermediate split waypoints. The final
/// waypoint of a split always reuses the original line's exact digit string,
/// so this only affects how tightly intermediate points are rounded.
const SPLIT_INTERMEDIATE_DECIMALS: usize = 3;

/// A single processed job line, immutable after load.
#[derive(Clone, Debug, PartialEq)]
pub struct Line {
    /// Raw bytes to send, including the trailing `\n`. Always `<= MAX_LINE_LEN`.
    pub raw: String,
    /// 1-based position in the processed job.
    pub line_number: u32,
    /// 1-based line number in the original input file, if known. Shared by
    /// every sub-segment emitted from a split line.
    pub source_line: Option<u32>,
}

impl Line {
    /// The line text without the trailing newline.
    pub fn text(&self) -> &str {
        self.raw.trim_end_matches('\n')
    }

    pub fn byte_len(&self) -> usize {
        self.raw.len()
    }
}

/// How a loaded job is held.
pub enum JobSource {
    /// Entire processed job held in memory.
    InMemory(Vec<Line>),
    /// Job persisted as a processed temp file with a line-offset index, plus
    /// a small recently-used cache (avoids mmap'ing the whole file).
    StreamingFile(StreamingWindow),
}

/// An external line-offset index over a materialized temp file.
pub struct StreamingWindow {
    path: PathBuf,
    /// Byte offset of the start of each line, plus a trailing sentinel at EOF.
    offsets: Vec<u64>,
    cache: Mutex<LineCache>,
    _keep_alive: Option<tempfile::NamedTempFile>,
}

struct LineCache {
    entries: VecDeque<(usize, Line)>,
    capacity: usize,
}

impl LineCache {
    fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    fn get(&self, index: usize) -> Option<Line> {
        self.entries.iter().find(|(i, _)| *i == index).map(|(_, l)| l.clone())
    }

    fn insert(&mut self, index: usize, line: Line) {
        if self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back((index, line));
    }
}

impl StreamingWindow {
    const CACHE_CAPACITY: usize = 256;

    fn len(&self) -> usize {
        self.offsets.len().saturating_sub(1)
    }

    fn get(&self, index: usize) -> Option<Line> {
        if index >= self.len() {
            return None;
        }
        if let Some(line) = self.cache.lock().unwrap().get(index) {
            return Some(line);
        }
        let start = self.offsets[index];
        let end = self.offsets[index + 1];
        let mut file = File::open(&self.path).ok()?;
        file.seek(SeekFrom::Start(start)).ok()?;
        let mut buf = vec![0u8; (end - start) as usize];
        file.read_exact(&mut buf).ok()?;
        let raw = String::from_utf8(buf).ok()?;
        let line_number = (index + 1) as u32;
        let line = Line {
            raw,
            line_number,
            source_line: None, // source_line is reconstructed from a sidecar index below
        };
        self.cache.lock().unwrap().insert(index, line.clone());
        Some(line)
    }
}

/// An ordered, loaded job: a sequence of processed `Line`s ready to dispatch.
pub struct Job {
    pub source: JobSource,
    pub file_name: Option<String>,
    /// Parallel to the processed line sequence: original file line number for
    /// each processed line (shared across split sub-segments). Always held in
    /// memory (it's one u32 per line, far smaller than the line text) even for
    /// streaming jobs, so Resume-From / error reporting works without a disk read.
    source_lines: Vec<Option<u32>>,
}

impl Job {
    pub fn len(&self) -> usize {
        match &self.source {
            JobSource::InMemory(lines) => lines.len(),
            JobSource::StreamingFile(w) => w.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fetches the line at 0-based `index`.
    pub fn get(&self, index: usize) -> Option<Line> {
        match &self.source {
            JobSource::InMemory(lines) => lines.get(index).cloned(),
            JobSource::StreamingFile(w) => w.get(index).map(|mut l| {
                l.source_line = self.source_lines.get(index).copied().flatten();
                l
            }),
        }
    }

    /// Source (original file) line number for 0-based `index`, if known.
    pub fn source_line_at(&self, index: usize) -> Option<u32> {
        self.source_lines.get(index).copied().flatten()
    }

    /// Iterates processed lines starting at 0-based `index`.
    pub fn iter_from(&self, index: usize) -> impl Iterator<Item = Line> + '_ {
        (index..self.len()).filter_map(move |i| self.get(i))
    }
}

/// Tunables for [`load_job`].
#[derive(Clone, Debug)]
pub struct LoadOptions {
    pub streaming_line_threshold: usize,
    pub streaming_byte_threshold: u64,
    /// Directory used for temp-file materialization; `None` uses the platform default.
    pub temp_dir: Option<PathBuf>,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            streaming_line_threshold: STREAMING_LINE_THRESHOLD,
            streaming_byte_threshold: STREAMING_BYTE_THRESHOLD,
            temp_dir: None,
        }
    }
}

/// Running modal state tracked while walking the raw file top to bottom,
/// used only to decide split eligibility and compute split geometry. This is
/// a loader-local best-effort tracker, not the pre-scanner's ModalSnapshot
/// (it only needs motion/feed-mode/distance-mode/cursor, not the full set).
#[derive(Clone, Debug)]
struct LoaderCursor {
    motion: MotionMode,
    feed_mode: FeedMode,
    distance: Distance,
    pos: [f64; 3],
}

impl Default for LoaderCursor {
    fn default() -> Self {
        Self {
            motion: MotionMode::G0,
            feed_mode: FeedMode::G94,
            distance: Distance::G90,
            pos: [0.0; 3],
        }
    }
}

/// Loads and validates a job file, returning an in-memory or streaming
/// [`Job`] depending on its size.
pub fn load_job(path: &Path, opts: &LoadOptions) -> Result<Job, LoadError> {
    let bytes = std::fs::read(path)?;
    let bytes = strip_bom(&bytes);
    check_ascii(bytes)?;
    // Safe: check_ascii guarantees every byte is < 0x80, which is valid UTF-8.
    let text = std::str::from_utf8(bytes).expect("ascii-checked bytes are valid utf8");

    let raw_lines: Vec<&str> = text.lines().collect();
    let use_streaming =
        raw_lines.len() > opts.streaming_line_threshold || bytes.len() as u64 > opts.streaming_byte_threshold;

    let mut cursor = LoaderCursor::default();
    let mut processed: Vec<Line> = Vec::new();
    let mut next_line_number: u32 = 1;

    for (file_idx, raw_line) in raw_lines.iter().enumerate() {
        let file_line_no = (file_idx + 1) as u32;
        let stripped = strip_comments(raw_line);
        let trimmed = stripped.trim_end().to_string();
        let trimmed = trimmed.trim_start();

        if trimmed.is_empty() || trimmed == "%" {
            continue;
        }
        if trimmed.starts_with('$') {
            return Err(LoadError::SystemCommandInJob { line: file_line_no });
        }

        let words = tokenize_words(trimmed);
        let cursor_before = cursor.clone();
        update_cursor_pre_split(&mut cursor, &words);
        let compacted = compact_words(&words);
        let candidate = format!("{}\n", compacted);

        if candidate.len() <= MAX_LINE_LEN {
            processed.push(Line {
                raw: candidate,
                line_number: next_line_number,
                source_line: Some(file_line_no),
            });
            next_line_number += 1;
            continue;
        }

        let segments = split_overlong_line(&cursor_before, &words, file_line_no)?;
        for raw in segments {
            processed.push(Line {
                raw,
                line_number: next_line_number,
                source_line: Some(file_line_no),
            });
            next_line_number += 1;
        }
    }

    let file_name = path.file_name().map(|s| s.to_string_lossy().into_owned());

    if !use_streaming {
        return Ok(Job {
            source_lines: processed.iter().map(|l| l.source_line).collect(),
            source: JobSource::InMemory(processed),
            file_name,
        });
    }

    materialize_streaming(processed, opts, file_name)
}

fn materialize_streaming(
    processed: Vec<Line>,
    opts: &LoadOptions,
    file_name: Option<String>,
) -> Result<Job, LoadError> {
    let mut builder = tempfile::Builder::new();
    builder.prefix("grbl-job-").suffix(".nc");
    let mut tmp = match &opts.temp_dir {
        Some(dir) => builder.tempfile_in(dir),
        None => builder.tempfile(),
    }
    .map_err(LoadError::NotWritableForTemp)?;

    let mut offsets = Vec::with_capacity(processed.len() + 1);
    let mut source_lines = Vec::with_capacity(processed.len());
    let mut offset: u64 = 0;
    for line in &processed {
        offsets.push(offset);
        tmp.write_all(line.raw.as_bytes()).map_err(LoadError::NotWritableForTemp)?;
        offset += line.raw.len() as u64;
        source_lines.push(line.source_line);
    }
    offsets.push(offset);
    tmp.flush().map_err(LoadError::NotWritableForTemp)?;

    let path = tmp.path().to_path_buf();
    let window = StreamingWindow {
        path,
        offsets,
        cache: Mutex::new(LineCache::new(StreamingWindow::CACHE_CAPACITY)),
        _keep_alive: Some(tmp),
    };

    Ok(Job {
        source: JobSource::StreamingFile(window),
        file_name,
        source_lines,
    })
}

fn strip_bom(bytes: &[u8]) -> &[u8] {
    const BOM: [u8; 3] = [0xEF, 0xBB, 0xBF];
    if bytes.starts_with(&BOM) {
        &bytes[3..]
    } else {
        bytes
    }
}

fn check_ascii(bytes: &[u8]) -> Result<(), LoadError> {
    for (offset, &b) in bytes.iter().enumerate() {
        if b >= 0x80 {
            return Err(LoadError::NonAscii { offset });
        }
    }
    Ok(())
}

/// Strips `(...)` block comments (non-nesting, per GRBL) and `;...` line
/// comments.
fn strip_comments(line: &str) -> String {
    let no_semicolon = match line.find(';') {
        Some(i) => &line[..i],
        None => line,
    };
    let mut out = String::with_capacity(no_semicolon.len());
    let mut depth = 0u32;
    for c in no_semicolon.chars() {
        match c {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            _ if depth == 0 => out.push(c),
            _ => {}
        }
    }
    out
}

/// One `(letter, value)` word, e.g. `('G', "1")` or `('X', "-10.500")`.
pub type Word = (char, String);

/// Splits a line into letter/value words, dropping whitespace and any
/// non-alphanumeric stray characters (e.g. a trailing `*` checksum).
pub fn tokenize_words(line: &str) -> Vec<Word> {
    let chars: Vec<char> = line.chars().collect();
    let mut words = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c.is_ascii_whitespace() {
            i += 1;
            continue;
        }
        if c.is_ascii_alphabetic() {
            let letter = c.to_ascii_uppercase();
            i += 1;
            let start = i;
            if i < chars.len() && (chars[i] == '+' || chars[i] == '-') {
                i += 1;
            }
            while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                i += 1;
            }
            let value: String = chars[start..i].iter().collect();
            words.push((letter, value));
        } else {
            i += 1;
        }
    }
    words
}

/// Joins words back into a compacted line: drops `N` (line number) words and
/// normalizes each remaining word's numeric formatting. No separators between
/// words between tokens.
fn compact_words(words: &[Word]) -> String {
    words
        .iter()
        .filter(|(letter, _)| *letter != 'N')
        .map(|(letter, value)| format!("{}{}", letter, normalize_number(value)))
        .collect()
}

/// Normalizes a numeric token: strips trailing zeros after the decimal point,
/// drops a leading zero before the point, preserves sign. Idempotent: running
/// it twice on its own output is a no-op (required for property 5, round-trip
/// idempotence).
pub fn normalize_number(v: &str) -> String {
    if v.is_empty() {
        return v.to_string();
    }
    let negative = v.starts_with('-');
    let body = v.trim_start_matches(['+', '-']);
    let (int_part, frac_part) = match body.split_once('.') {
        Some((i, f)) => (i, f),
        None => (body, ""),
    };
    let frac_trimmed = frac_part.trim_end_matches('0');

    let mut out = String::new();
    if negative {
        out.push('-');
    }
    if frac_trimmed.is_empty() {
        out.push_str(if int_part.is_empty() { "0" } else { int_part });
    } else if int_part.is_empty() || int_part == "0" {
        out.push('.');
        out.push_str(frac_trimmed);
    } else {
        out.push_str(int_part);
        out.push('.');
        out.push_str(frac_trimmed);
    }
    out
}

/// Advances the loader's modal cursor using a line's words, *before*
/// deciding whether to split it. Mirrors what the machine's interpreter would
/// do, well enough to compute start/end positions for splitting.
fn update_cursor_pre_split(cursor: &mut LoaderCursor, words: &[Word]) {
    for (letter, value) in words {
        match (letter, value.as_str()) {
            ('G', "0") => cursor.motion = MotionMode::G0,
            ('G', "1") => cursor.motion = MotionMode::G1,
            ('G', "2") => cursor.motion = MotionMode::G2,
            ('G', "3") => cursor.motion = MotionMode::G3,
            ('G', "90") => cursor.distance = Distance::G90,
            ('G', "91") => cursor.distance = Distance::G91,
            ('G', "93") => cursor.feed_mode = FeedMode::G93,
            ('G', "94") => cursor.feed_mode = FeedMode::G94,
            ('G', "95") => cursor.feed_mode = FeedMode::G95,
            _ => {}
        }
    }
    for (letter, value) in words {
        let axis = match letter {
            'X' => 0,
            'Y' => 1,
            'Z' => 2,
            _ => continue,
        };
        if let Ok(v) = value.parse::<f64>() {
            cursor.pos[axis] = match cursor.distance {
                Distance::G90 => v,
                Distance::G91 => cursor.pos[axis] + v,
            };
        }
    }
}

/// Attempts to split an overlong line into linear sub-segments.
/// Eligible iff: motion is G0/G1 (explicit on this line or carried modally),
/// feed mode is G94, distance mode is G90 (absolute) both before and after
/// this line's own words, and every non-G word is in {X, Y, Z, F, S} (no M
/// words: an overlong line's spindle/coolant words have no sub-segment to
/// land on and would otherwise be silently dropped).
fn split_overlong_line(
    cursor_before: &LoaderCursor,
    words: &[Word],
    source_line: u32,
) -> Result<Vec<String>, LoadError> {
    let effective_motion = explicit_motion(words).unwrap_or(cursor_before.motion);

    // Pre-split modal words (G90/G91/G94/etc. that appeared on this very
    // overlong line) must still take effect before the moved axes: apply
    // them to a scratch cursor to get the post-word distance mode used for
    // interpreting this line's own axis deltas.
    let mut scratch = cursor_before.clone();
    update_cursor_pre_split(&mut scratch, words);

    let eligible = matches!(effective_motion, MotionMode::G0 | MotionMode::G1)
        && cursor_before.feed_mode == FeedMode::G94
        && cursor_before.distance == Distance::G90
        && scratch.distance == Distance::G90
        && words.iter().all(|(l, _)| matches!(l, 'G' | 'X' | 'Y' | 'Z' | 'F' | 'S'));

    if !eligible {
        return Err(LoadError::OverlongUnsplittable { line: source_line });
    }

    let start = cursor_before.pos;
    // end = scratch.pos already reflects this line's axis words applied
    // under the (possibly just-changed) distance mode.
    let end = scratch.pos;

    let axis_words: Vec<(usize, &str)> = words
        .iter()
        .filter_map(|(l, v)| match l {
            'X' => Some((0usize, v.as_str())),
            'Y' => Some((1usize, v.as_str())),
            'Z' => Some((2usize, v.as_str())),
            _ => None,
        })
        .collect();
    let feed_word = words.iter().find(|(l, _)| *l == 'F').map(|(_, v)| v.clone());
    let spindle_word = words.iter().find(|(l, _)| *l == 'S').map(|(_, v)| v.clone());
    let motion_gcode = effective_motion.as_gcode();

    for n in 2..=MAX_SPLIT_SEGMENTS {
        if let Some(segments) = try_split_into(
            n,
            start,
            end,
            &axis_words,
            feed_word.as_deref(),
            spindle_word.as_deref(),
            motion_gcode,
        ) {
            return Ok(segments);
        }
    }

    Err(LoadError::OverlongUnsplittable { line: source_line })
}

fn explicit_motion(words: &[Word]) -> Option<MotionMode> {
    words.iter().find_map(|(l, v)| {
        if *l != 'G' {
            return None;
        }
        match v.as_str() {
            "0" | "00" => Some(MotionMode::G0),
            "1" | "01" => Some(MotionMode::G1),
            "2" | "02" => Some(MotionMode::G2),
            "3" | "03" => Some(MotionMode::G3),
            _ => None,
        }
    })
}

/// Tries to render `n` linear sub-segments from `start` to `end`, each
/// `<= MAX_LINE_LEN`. The last segment reuses the original axis-word strings
/// verbatim so the final position is bit-exact with the unsplit line.
fn try_split_into(
    n: u32,
    start: [f64; 3],
    end: [f64; 3],
    axis_words: &[(usize, &str)],
    feed_word: Option<&str>,
    spindle_word: Option<&str>,
    motion_gcode: &str,
) -> Option<Vec<String>> {
    let axis_letters = ['X', 'Y', 'Z'];
    let mut out = Vec::with_capacity(n as usize);

    for k in 1..=n {
        let mut line = String::new();
        line.push_str(motion_gcode);
        if k == n {
            // Final segment: reuse the original, exact strings.
            for (axis, value) in axis_words {
                line.push(axis_letters[*axis]);
                line.push_str(&normalize_number(value));
            }
        } else {
            let t = k as f64 / n as f64;
            for (axis, _) in axis_words {
                let v = start[*axis] + (end[*axis] - start[*axis]) * t;
                let formatted = format!("{:.*}", SPLIT_INTERMEDIATE_DECIMALS, v);
                line.push(axis_letters[*axis]);
                line.push_str(&normalize_number(&formatted));
            }
        }
        if k == 1 {
            if let Some(f) = feed_word {
                line.push('F');
                line.push_str(&normalize_number(f));
            }
            if let Some(s) = spindle_word {
                line.push('S');
                line.push_str(&normalize_number(s));
            }
        }
        line.push('\n');
        if line.len() > MAX_LINE_LEN {
            return None;
        }
        out.push(line);
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    #[test]
    fn test_normalize_number_variants() {
        assert_eq!(normalize_number("10.500"), "10.5");
        assert_eq!(normalize_number("10.000"), "10");
        assert_eq!(normalize_number("0.500"), ".5");
        assert_eq!(normalize_number("-0.500"), "-.5");
        assert_eq!(normalize_number("010"), "010"); // leading zeros in the integer part are untouched
        assert_eq!(normalize_number("-10"), "-10");
    }

    #[test]
    fn test_normalize_number_idempotent() {
        for v in ["10.500", "0.5", "-0.500", "10.000", "-10"] {
            let once = normalize_number(v);
            let twice = normalize_number(&once);
            assert_eq!(once, twice);
        }
    }

    #[test]
    fn test_tokenize_and_compact_drops_spaces_and_line_numbers() {
        let words = tokenize_words("N10 G1 X10.500 Y20.000 F500");
        let compacted = compact_words(&words);
        assert_eq!(compacted, "G1X10.5Y20F500");
    }

    #[test]
    fn test_strip_comments() {
        assert_eq!(strip_comments("G1 X10 (move to start)"), "G1 X10 ");
        assert_eq!(strip_comments("G1 X10 ; trailing comment"), "G1 X10 ");
    }

    fn write_job(dir: &Path, name: &str, content: &str) -> PathBuf {
        let path = dir.join(name);
        let mut f = File::create(&path).unwrap();
        f.write_all(content.as_bytes()).unwrap();
        path
    }

    #[test]
    fn test_load_job_in_memory_basic() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_job(
            dir.path(),
            "job.nc",
            "N10 G1 X10.500 Y20.000 F500\n; comment line\nG1 X11\n",
        );
        let job = load_job(&path, &LoadOptions::default()).unwrap();
        assert_eq!(job.len(), 2);
        assert_eq!(job.get(0).unwrap().text(), "G1X10.5Y20F500");
        assert_eq!(job.get(0).unwrap().source_line, Some(1));
        assert_eq!(job.get(1).unwrap().source_line, Some(3));
    }

    #[test]
    fn test_load_job_rejects_system_command() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_job(dir.path(), "job.nc", "G1 X10\n$H\n");
        let err = load_job(&path, &LoadOptions::default()).unwrap_err();
        assert!(matches!(err, LoadError::SystemCommandInJob { line: 2 }));
    }

    #[test]
    fn test_load_job_rejects_non_ascii() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("job.nc");
        let mut f = File::create(&path).unwrap();
        f.write_all(b"G1 X10\xC3\xA9\n").unwrap();
        let err = load_job(&path, &LoadOptions::default()).unwrap_err();
        assert!(matches!(err, LoadError::NonAscii { .. }));
    }

    #[test]
    fn test_load_job_strips_bom_and_percent_frame() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("job.nc");
        let mut f = File::create(&path).unwrap();
        f.write_all(b"\xEF\xBB\xBF%\nG1 X10\n%\n").unwrap();
        let job = load_job(&path, &LoadOptions::default()).unwrap();
        assert_eq!(job.len(), 1);
        assert_eq!(job.get(0).unwrap().text(), "G1X10");
    }

    #[test]
    fn test_split_overlong_linear_move() {
        let dir = tempfile::tempdir().unwrap();
        // Pad with many decimal places so the line exceeds 80 bytes but stays
        // within {G, X, Y, Z, F} only.
        let long_line = "G1 X123.123456789012 Y456.234567890123 Z-78.345678901234 F1200\n";
        assert!(long_line.len() > MAX_LINE_LEN);
        let path = write_job(dir.path(), "job.nc", long_line);
        let job = load_job(&path, &LoadOptions::default()).unwrap();
        assert!(job.len() >= 2);
        for i in 0..job.len() {
            let line = job.get(i).unwrap();
            assert!(line.byte_len() <= MAX_LINE_LEN);
            assert_eq!(line.source_line, Some(1));
        }
        // First segment carries F, later ones don't repeat it.
        assert!(job.get(0).unwrap().text().contains('F'));
        if job.len() > 1 {
            assert!(!job.get(1).unwrap().text().contains('F'));
        }
        // Last segment reuses the exact original digits.
        let last = job.get(job.len() - 1).unwrap();
        assert!(last.text().contains("X123.123456789012"));
        assert!(last.text().contains("Y456.234567890123"));
        assert!(last.text().contains("Z-78.345678901234"));
    }

    #[test]
    fn test_overlong_non_splittable_rejected() {
        let dir = tempfile::tempdir().unwrap();
        // G2 (arc) is never splittable per spec.
        let long_line =
            "G2 X123.123456789012 Y456.234567890123 I10.123456789012 J5.123456789012 F1200\n";
        assert!(long_line.len() > MAX_LINE_LEN);
        let path = write_job(dir.path(), "job.nc", long_line);
        let err = load_job(&path, &LoadOptions::default()).unwrap_err();
        assert!(matches!(err, LoadError::OverlongUnsplittable { line: 1 }));
    }

    #[test]
    fn test_overlong_line_with_m_word_rejected_not_silently_dropped() {
        let dir = tempfile::tempdir().unwrap();
        // An M word has no sub-segment to land on; must be rejected rather
        // than split with the spindle/coolant word silently lost.
        let long_line =
            "G1 X123.123456789012 Y456.234567890123 Z-78.345678901234 F1200 M8\n";
        assert!(long_line.len() > MAX_LINE_LEN);
        let path = write_job(dir.path(), "job.nc", long_line);
        let err = load_job(&path, &LoadOptions::default()).unwrap_err();
        assert!(matches!(err, LoadError::OverlongUnsplittable { line: 1 }));
    }

    #[test]
    fn test_overlong_line_under_g91_rejected() {
        let dir = tempfile::tempdir().unwrap();
        // Under G91 the intermediate waypoints split() would compute are
        // absolute positions, not the incremental deltas G91 requires, so
        // splitting is unsound; reject instead of emitting divergent moves.
        let content = "G91\nG1 X123.123456789012 Y456.234567890123 Z-78.345678901234 F1200\n";
        let path = write_job(dir.path(), "job.nc", content);
        let err = load_job(&path, &LoadOptions::default()).unwrap_err();
        assert!(matches!(err, LoadError::OverlongUnsplittable { line: 2 }));
    }

    #[test]
    fn test_streaming_materialization_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let mut content = String::new();
        for i in 0..50 {
            content.push_str(&format!("G1 X{} Y{}\n", i, i));
        }
        let path = write_job(dir.path(), "job.nc", &content);
        let opts = LoadOptions {
            streaming_line_threshold: 10,
            ..Default::default()
        };
        let job = load_job(&path, &opts).unwrap();
        assert!(matches!(job.source, JobSource::StreamingFile(_)));
        assert_eq!(job.len(), 50);
        assert_eq!(job.get(0).unwrap().text(), "G1X0Y0");
        assert_eq!(job.get(49).unwrap().text(), "G1X49Y49");
        assert_eq!(job.get(49).unwrap().source_line, Some(50));
    }

    #[test]
    fn test_round_trip_idempotent_on_second_pass() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_job(dir.path(), "job.nc", "G1X10.5Y20F500\nG1X11\n");
        let job1 = load_job(&path, &LoadOptions::default()).unwrap();
        let mut out = String::new();
        for i in 0..job1.len() {
            out.push_str(&job1.get(i).unwrap().raw);
        }
        let path2 = write_job(dir.path(), "job2.nc", &out);
        let job2 = load_job(&path2, &LoadOptions::default()).unwrap();
        assert_eq!(job1.len(), job2.len());
        for i in 0..job1.len() {
            assert_eq!(job1.get(i).unwrap().raw, job2.get(i).unwrap().raw);
        }
    }
}
