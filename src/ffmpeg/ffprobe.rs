//! ffprobe container metadata (`-show_format` only) and single-frame grabs for
//! crop previews.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::{Map, Value};

use super::error::parse_ffmpeg_error;
use crate::error::AppError;
use crate::path_to_string;

const METADATA_CACHE_MAX_ENTRIES: usize = 10;
const FRAME_GRAB_SIZE: &str = "360x240";

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    format: Option<Map<String, Value>>,
}

/// The `format` object of ffprobe's JSON. Kept untyped so every key ffprobe
/// reports can be shown in the info view.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize)]
#[serde(transparent)]
pub struct FormatMetadata {
    fields: Map<String, Value>,
}

impl FormatMetadata {
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.fields.get(key).and_then(Value::as_str)
    }

    /// Duration in seconds. ffprobe reports it as a decimal string.
    pub fn duration(&self) -> Option<f64> {
        match self.fields.get("duration")? {
            Value::String(s) => s.trim().parse().ok(),
            Value::Number(n) => n.as_f64(),
            _ => None,
        }
    }

    pub fn filename(&self) -> Option<&str> {
        self.get_str("filename")
    }

    pub fn format_name(&self) -> Option<&str> {
        self.get_str("format_name")
    }

    /// One `Key name: value` line per string-valued field, sorted by key.
    pub fn info_lines(&self) -> Vec<String> {
        self.fields
            .iter()
            .filter_map(|(k, v)| v.as_str().map(|v| format!("{}: {}", humanize_key(k), v)))
            .collect()
    }
}

fn humanize_key(key: &str) -> String {
    let spaced = key.replace('_', " ").to_lowercase();
    let mut chars = spaced.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

pub fn parse_ffprobe_json(json: &str) -> Result<FormatMetadata, AppError> {
    let output: FfprobeOutput = serde_json::from_str(json)?;
    Ok(FormatMetadata {
        fields: output.format.unwrap_or_default(),
    })
}

/// Runs `ffprobe -i <path> -v quiet -print_format json -show_format`.
pub fn probe_format(ffprobe: &Path, path: &Path) -> Result<FormatMetadata, AppError> {
    let path_str = path_to_string(path);
    log::debug!(
        target: "ffqueue::ffmpeg::ffprobe",
        "probe: path={}",
        path_str
    );

    let output = Command::new(ffprobe)
        .args(["-i", &path_str, "-v", "quiet", "-print_format", "json", "-show_format"])
        .stdin(Stdio::null())
        .output()
        .map_err(|e| AppError::from(format!("Failed to run ffprobe: {}", e)))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(AppError::ffmpeg_failed(
            output.status.code().unwrap_or(-1),
            stderr.trim(),
        ));
    }

    parse_ffprobe_json(&String::from_utf8_lossy(&output.stdout))
}

/// Small LRU over probe results keyed by path. Failed probes are not cached.
pub struct MetadataCache {
    ffprobe: PathBuf,
    entries: Mutex<VecDeque<(PathBuf, FormatMetadata)>>,
}

impl MetadataCache {
    pub fn new(ffprobe: impl Into<PathBuf>) -> Self {
        Self {
            ffprobe: ffprobe.into(),
            entries: Mutex::new(VecDeque::with_capacity(METADATA_CACHE_MAX_ENTRIES)),
        }
    }

    /// Cached metadata, probing on a miss. Probe failures are logged and yield
    /// an empty record.
    pub fn get(&self, path: &Path) -> FormatMetadata {
        {
            let mut entries = self.entries.lock();
            if let Some(pos) = entries.iter().position(|(p, _)| p == path) {
                if let Some(hit) = entries.remove(pos) {
                    let meta = hit.1.clone();
                    entries.push_back(hit);
                    return meta;
                }
            }
        }

        match probe_format(&self.ffprobe, path) {
            Ok(meta) => {
                let mut entries = self.entries.lock();
                if entries.len() >= METADATA_CACHE_MAX_ENTRIES {
                    entries.pop_front();
                }
                entries.push_back((path.to_path_buf(), meta.clone()));
                meta
            }
            Err(e) => {
                let detail = match &e {
                    AppError::FfmpegFailed { code, stderr } => {
                        parse_ffmpeg_error(stderr, Some(*code)).summary
                    }
                    other => other.to_string(),
                };
                log::error!(
                    target: "ffqueue::ffmpeg::ffprobe",
                    "probe failed for {}: {}",
                    path.display(),
                    detail
                );
                FormatMetadata::default()
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

/// One scaled frame at `position` (`HH:MM:SS`), as image bytes on stdout.
pub fn grab_frame(ffmpeg: &Path, path: &Path, position: &str) -> Result<Vec<u8>, AppError> {
    let path_str = path_to_string(path);
    let output = Command::new(ffmpeg)
        .args([
            "-ss",
            position,
            "-i",
            &path_str,
            "-v",
            "quiet",
            "-frames:v",
            "1",
            "-s",
            FRAME_GRAB_SIZE,
            "-f",
            "image2",
            "pipe:1",
        ])
        .stdin(Stdio::null())
        .output()?;

    if !output.status.success() {
        let code = output.status.code().unwrap_or(-1);
        log::error!(
            target: "ffqueue::ffmpeg::ffprobe",
            "frame grab failed at {} for {} (code={})",
            position,
            path_str,
            code
        );
        return Err(AppError::ffmpeg_failed(
            code,
            String::from_utf8_lossy(&output.stderr).trim(),
        ));
    }
    Ok(output.stdout)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "format": {
            "filename": "/media/clip.mkv",
            "nb_streams": 2,
            "format_name": "matroska,webm",
            "format_long_name": "Matroska / WebM",
            "duration": "125.400000",
            "bit_rate": "1205000",
            "tags": { "ENCODER": "Lavf60.3.100" }
        }
    }"#;

    #[test]
    fn parses_duration_and_filename() {
        let meta = parse_ffprobe_json(SAMPLE).unwrap();
        assert_eq!(meta.duration(), Some(125.4));
        assert_eq!(meta.filename(), Some("/media/clip.mkv"));
        assert_eq!(meta.format_name(), Some("matroska,webm"));
    }

    #[test]
    fn info_lines_only_string_fields() {
        let meta = parse_ffprobe_json(SAMPLE).unwrap();
        let lines = meta.info_lines();
        assert!(lines.contains(&"Format long name: Matroska / WebM".to_string()));
        assert!(lines.contains(&"Bit rate: 1205000".to_string()));
        assert!(!lines.iter().any(|l| l.starts_with("Nb streams")));
        assert!(!lines.iter().any(|l| l.starts_with("Tags")));
    }

    #[test]
    fn missing_format_is_empty() {
        let meta = parse_ffprobe_json("{}").unwrap();
        assert!(meta.is_empty());
        assert_eq!(meta.duration(), None);
    }

    #[test]
    fn invalid_json_is_error() {
        assert!(matches!(parse_ffprobe_json("not json"), Err(AppError::Json(_))));
    }

    #[test]
    fn cache_returns_empty_record_when_probe_cannot_start() {
        let dir = tempfile::tempdir().unwrap();
        let cache = MetadataCache::new(dir.path().join("missing-ffprobe"));
        let meta = cache.get(Path::new("/media/clip.mkv"));
        assert!(meta.is_empty());
        assert!(cache.is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn cache_probes_once_per_path() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let counter = dir.path().join("calls");
        let script = dir.path().join("ffprobe");
        std::fs::write(
            &script,
            format!(
                "#!/bin/sh\necho x >> '{}'\necho '{{\"format\": {{\"duration\": \"5.0\"}}}}'\n",
                counter.display()
            ),
        )
        .unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let cache = MetadataCache::new(&script);
        assert_eq!(cache.get(Path::new("/a.mp4")).duration(), Some(5.0));
        assert_eq!(cache.get(Path::new("/a.mp4")).duration(), Some(5.0));
        assert_eq!(cache.len(), 1);
        let calls = std::fs::read_to_string(&counter).unwrap();
        assert_eq!(calls.lines().count(), 1);
    }
}
