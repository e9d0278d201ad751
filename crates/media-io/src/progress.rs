//! Line-level parsing of ffmpeg's diagnostic and `-progress` output.

use once_cell::sync::Lazy;
use regex::Regex;

static DURATION_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"Duration: (\d{2,}):(\d{2}):(\d{2}(?:\.\d+)?)").expect("duration pattern")
});

static OUT_TIME_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"out_time=(\d{2,}):(\d{2}):(\d{2}(?:\.\d+)?)").expect("out_time pattern")
});

/// What a single line of tool output tells us, if anything.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ProgressLine {
    /// Total media duration in seconds, from the banner on stderr.
    Duration(f64),
    /// Position reached by the encoder in seconds, from the progress stream.
    CurrentTime(f64),
}

/// Parse one line of ffmpeg output. Lines that carry neither a duration nor
/// an `out_time` yield `None`.
pub fn parse_line(line: &str) -> Option<ProgressLine> {
    if let Some(caps) = DURATION_RE.captures(line) {
        return hms_to_seconds(&caps[1], &caps[2], &caps[3]).map(ProgressLine::Duration);
    }
    if let Some(caps) = OUT_TIME_RE.captures(line) {
        return hms_to_seconds(&caps[1], &caps[2], &caps[3]).map(ProgressLine::CurrentTime);
    }
    None
}

/// Convert `HH:MM:SS.ff` into seconds. Fractional seconds are optional.
pub fn parse_timestamp(s: &str) -> Option<f64> {
    let mut parts = s.trim().splitn(3, ':');
    let h = parts.next()?;
    let m = parts.next()?;
    let sec = parts.next()?;
    if h.is_empty() || !h.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    if m.len() != 2 || !m.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    if sec.is_empty() || !sec.bytes().all(|b| b.is_ascii_digit() || b == b'.') {
        return None;
    }
    hms_to_seconds(h, m, sec)
}

fn hms_to_seconds(h: &str, m: &str, s: &str) -> Option<f64> {
    // Hours can be any width; f64 keeps huge values from overflowing.
    let hours: f64 = h.parse().ok()?;
    let minutes: f64 = m.parse().ok()?;
    let seconds: f64 = s.parse().ok()?;
    Some(hours * 3600.0 + minutes * 60.0 + seconds)
}

/// Percent of `duration` covered by `current`, floored and capped at 99.
///
/// 100 is reserved for a confirmed successful exit, so an encoder that
/// reports a position at or past the end still reads as 99 here.
pub fn progress_percent(current: f64, duration: f64) -> u8 {
    if !(duration > 0.0) || !(current > 0.0) {
        return 0;
    }
    let pct = (current / duration * 100.0).floor();
    pct.min(99.0) as u8
}
