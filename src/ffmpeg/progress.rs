use regex::Regex;
use std::sync::LazyLock;

/// Matches both ffmpeg stderr shapes we care about: the header line
/// `Duration: HH:MM:SS.ff, ...` (group 1 set) and status lines carrying a bare
/// `HH:MM:SS.ff` timestamp (group 1 unset). The greedy `.*` picks the last
/// timestamp on the line.
static PROGRESS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(.*Duration:)?.*(\d{2}):(\d{2}):(\d{2}.\d{2}).*").expect("invalid progress regex")
});

/// Outcome of feeding one stderr line to a [`ProgressTracker`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ProgressUpdate {
    /// Expected duration captured, in seconds.
    Duration(f64),
    /// Integer percent complete, floored and capped at 100.
    Percent(u8),
    /// A timestamp line seen before any usable duration.
    NoDuration,
    /// Line carries no timestamp.
    Unmatched,
}

/// Per-job progress state. One tracker is created for each process run and
/// dropped with it, so nothing leaks between jobs.
#[derive(Debug, Default, Clone)]
pub struct ProgressTracker {
    duration: Option<f64>,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn duration(&self) -> Option<f64> {
        self.duration
    }

    pub fn feed(&mut self, line: &str) -> ProgressUpdate {
        let Some(caps) = PROGRESS_RE.captures(line) else {
            return ProgressUpdate::Unmatched;
        };
        let Some(secs) = hms_to_seconds(&caps[2], &caps[3], &caps[4]) else {
            return ProgressUpdate::Unmatched;
        };

        if caps.get(1).is_some() {
            self.duration = Some(secs);
            return ProgressUpdate::Duration(secs);
        }

        match self.duration {
            Some(total) if total > 0.0 => {
                let done = (secs * 100.0 / total).floor().clamp(0.0, 100.0);
                ProgressUpdate::Percent(done as u8)
            }
            // TODO: fall back to the probed duration once the queue passes it in.
            _ => ProgressUpdate::NoDuration,
        }
    }
}

fn hms_to_seconds(hours: &str, minutes: &str, seconds: &str) -> Option<f64> {
    let h: u64 = hours.parse().ok()?;
    let m: u64 = minutes.parse().ok()?;
    let s: f64 = seconds.parse().ok()?;
    Some((h * 3600 + m * 60) as f64 + s)
}

/// `HH:MM:SS` for ffmpeg `-ss`/`-t` arguments. Fractions are truncated.
pub fn format_hms(secs: f64) -> String {
    let total = if secs.is_finite() && secs > 0.0 {
        secs as u64
    } else {
        0
    };
    format!(
        "{:02}:{:02}:{:02}",
        (total / 3600) % 24,
        (total / 60) % 60,
        total % 60
    )
}

/// Display label for a queue row, e.g. `1:02:03` or `0:00:07`.
pub fn format_duration_label(secs: f64) -> String {
    let total = if secs.is_finite() && secs > 0.0 {
        secs as u64
    } else {
        0
    };
    format!("{}:{:02}:{:02}", total / 3600, (total / 60) % 60, total % 60)
}
