#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use ffqueue_core::supervisor::{EventSink, RunEvent};
use parking_lot::Mutex;

pub const DURATION_100S: &str = "  Duration: 00:01:40.00, start: 0.000000, bitrate: 1205 kb/s";

pub fn time_line(hms: &str) -> String {
    format!(
        "frame=  250 fps=0.0 q=28.0 size=    1024kB time={} bitrate= 838.9kbits/s speed=10x",
        hms
    )
}

/// Scratch directory with fake `ffmpeg`/`ffprobe` scripts. Every fake ffmpeg
/// invocation appends its arguments to `calls.log`.
pub struct IntegrationEnv {
    dir: tempfile::TempDir,
}

impl IntegrationEnv {
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().expect("tempdir"),
        }
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    pub fn calls_log(&self) -> PathBuf {
        self.path("calls.log")
    }

    /// Recorded ffmpeg argument lines, one per invocation.
    pub fn calls(&self) -> Vec<String> {
        fs::read_to_string(self.calls_log())
            .map(|s| s.lines().map(str::to_string).collect())
            .unwrap_or_default()
    }

    /// Writes a fake ffmpeg that prints `stderr_lines` (joined with `sep`)
    /// to stderr, then runs `tail` (e.g. `exit 0` or `exec sleep 30`).
    pub fn fake_ffmpeg(&self, stderr_lines: &[String], sep: &str, tail: &str) -> PathBuf {
        let mut body = format!(
            "#!/bin/sh\necho \"$@\" >> '{}'\n",
            self.calls_log().display()
        );
        for line in stderr_lines {
            body.push_str(&format!("printf '%s{}' '{}' >&2\n", sep, line));
        }
        body.push_str(tail);
        body.push('\n');
        self.write_script("ffmpeg", &body)
    }

    /// Fake ffprobe answering `-show_format` with the given duration, and
    /// `-help` with success.
    pub fn fake_ffprobe(&self, duration_secs: f64) -> PathBuf {
        let body = format!(
            "#!/bin/sh\nfor a in \"$@\"; do\n  if [ \"$a\" = \"-help\" ]; then exit 0; fi\ndone\n\
             printf '{{\"format\": {{\"filename\": \"%s\", \"duration\": \"{:.6}\", \"format_name\": \"mov,mp4\"}}}}' \"$2\"\n",
            duration_secs
        );
        self.write_script("ffprobe", &body)
    }

    fn write_script(&self, name: &str, body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let path = self.path(name);
        fs::write(&path, body).expect("write script");
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).expect("chmod script");
        path
    }

    pub fn touch(&self, name: &str) -> PathBuf {
        let path = self.path(name);
        fs::write(&path, b"").expect("touch");
        path
    }
}

/// Collects every event a run emits.
#[derive(Clone, Default)]
pub struct EventLog {
    events: Arc<Mutex<Vec<RunEvent>>>,
}

impl EventLog {
    pub fn sink(&self) -> EventSink {
        let events = Arc::clone(&self.events);
        Arc::new(move |e| events.lock().push(e))
    }

    pub fn snapshot(&self) -> Vec<RunEvent> {
        self.events.lock().clone()
    }

    pub fn contains(&self, event: &RunEvent) -> bool {
        self.events.lock().contains(event)
    }

    /// Polls until `pred` holds for some event, panicking after 10s.
    pub fn wait_for(&self, what: &str, pred: impl Fn(&RunEvent) -> bool) {
        let deadline = Instant::now() + Duration::from_secs(10);
        while Instant::now() < deadline {
            if self.events.lock().iter().any(&pred) {
                return;
            }
            std::thread::sleep(Duration::from_millis(20));
        }
        panic!("timed out waiting for {}: {:?}", what, self.snapshot());
    }

    pub fn progress_for(&self, row: ffqueue_core::queue::RowId) -> Vec<u8> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                RunEvent::RowProgress { row_id, percent } if *row_id == row => Some(*percent),
                _ => None,
            })
            .collect()
    }
}

pub fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}
