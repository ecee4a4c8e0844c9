//! Locating the `ffmpeg` and `ffprobe` binaries, and the startup availability probe.

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::OnceLock;

use crate::error::AppError;

/// Resolved binaries used for every spawned process. Tests build this directly
/// to point the supervisor at fake scripts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolPaths {
    pub ffmpeg: PathBuf,
    pub ffprobe: PathBuf,
}

impl ToolPaths {
    pub fn new(ffmpeg: impl Into<PathBuf>, ffprobe: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            ffprobe: ffprobe.into(),
        }
    }

    /// Discovered paths, or the bare program names so that spawning fails with
    /// a normal "not found" I/O error when nothing is installed.
    pub fn discover_or_default() -> Self {
        match get_ffmpeg_path() {
            Ok(ffmpeg) => {
                let ffprobe = get_ffprobe_path().unwrap_or_else(|_| PathBuf::from("ffprobe"));
                Self::new(ffmpeg, ffprobe)
            }
            Err(_) => Self::new("ffmpeg", "ffprobe"),
        }
    }
}

fn find_in_path(program: &str) -> Option<PathBuf> {
    let finder = if cfg!(windows) { "where" } else { "which" };
    let output = Command::new(finder).arg(program).output().ok()?;
    if !output.status.success() {
        return None;
    }
    let stdout = String::from_utf8_lossy(&output.stdout);
    let first = stdout.lines().next()?.trim();
    if first.is_empty() {
        None
    } else {
        Some(PathBuf::from(first))
    }
}

fn common_paths() -> Vec<PathBuf> {
    #[cfg(target_os = "macos")]
    {
        vec![
            PathBuf::from("/opt/homebrew/bin/ffmpeg"),
            PathBuf::from("/usr/local/bin/ffmpeg"),
            PathBuf::from("/opt/local/bin/ffmpeg"),
        ]
    }

    #[cfg(target_os = "windows")]
    {
        vec![
            PathBuf::from("C:\\ffmpeg\\bin\\ffmpeg.exe"),
            PathBuf::from("C:\\Program Files\\ffmpeg\\bin\\ffmpeg.exe"),
        ]
    }

    #[cfg(all(unix, not(target_os = "macos")))]
    {
        vec![
            PathBuf::from("/usr/bin/ffmpeg"),
            PathBuf::from("/usr/local/bin/ffmpeg"),
        ]
    }

    #[cfg(not(any(target_os = "macos", target_os = "windows", unix)))]
    {
        vec![]
    }
}

static FFMPEG_PATH_CACHE: OnceLock<PathBuf> = OnceLock::new();

fn resolve_ffmpeg_path() -> Result<PathBuf, AppError> {
    if let Ok(env_path) = std::env::var("FFMPEG_PATH") {
        let p = PathBuf::from(&env_path);
        if p.exists() {
            log::debug!(
                target: "ffqueue::ffmpeg::discovery",
                "FFmpeg path from FFMPEG_PATH env: {}",
                p.display()
            );
            return Ok(p);
        }
        log::warn!(
            target: "ffqueue::ffmpeg::discovery",
            "FFMPEG_PATH={} does not exist, falling back to search",
            env_path
        );
    }

    if let Some(path) = common_paths().into_iter().find(|p| p.exists()) {
        log::debug!(
            target: "ffqueue::ffmpeg::discovery",
            "FFmpeg found in common path: {}",
            path.display()
        );
        return Ok(path);
    }

    if let Some(p) = find_in_path("ffmpeg").filter(|p| p.exists()) {
        log::debug!(
            target: "ffqueue::ffmpeg::discovery",
            "FFmpeg found in PATH: {}",
            p.display()
        );
        return Ok(p);
    }

    log::error!(
        target: "ffqueue::ffmpeg::discovery",
        "FFmpeg not found in PATH or common locations"
    );
    Err(AppError::FfmpegNotFound(
        "FFmpeg not found. Please install FFmpeg on your system:\n  - macOS: brew install ffmpeg\n  - Linux: sudo apt install ffmpeg\n  - Windows: Download from https://ffmpeg.org/download.html"
            .to_string(),
    ))
}

/// FFmpeg path, cached for the process lifetime. `FFMPEG_PATH` takes precedence,
/// then common install locations, then `PATH`.
pub fn get_ffmpeg_path() -> Result<&'static Path, AppError> {
    if let Some(path) = FFMPEG_PATH_CACHE.get() {
        return Ok(path.as_path());
    }
    let path = resolve_ffmpeg_path()?;
    Ok(FFMPEG_PATH_CACHE.get_or_init(|| path).as_path())
}

/// ffprobe candidates next to an ffmpeg binary: a suffixed name first
/// (`ffmpeg-x86_64` → `ffprobe-x86_64`), then the plain name.
pub fn ffprobe_candidates(ffmpeg_path: &Path) -> Vec<PathBuf> {
    let Some(parent) = ffmpeg_path.parent() else {
        return vec![];
    };
    let exe = if cfg!(windows) { ".exe" } else { "" };
    let mut candidates = Vec::with_capacity(2);
    if let Some(suffix) = ffmpeg_path
        .file_stem()
        .and_then(|s| s.to_str())
        .and_then(|stem| stem.strip_prefix("ffmpeg"))
        .filter(|suffix| !suffix.is_empty())
    {
        candidates.push(parent.join(format!("ffprobe{suffix}{exe}")));
    }
    candidates.push(parent.join(format!("ffprobe{exe}")));
    candidates
}

pub fn get_ffprobe_path() -> Result<PathBuf, AppError> {
    let ffmpeg = get_ffmpeg_path()?;
    if let Some(found) = ffprobe_candidates(ffmpeg).into_iter().find(|c| c.exists()) {
        return Ok(found);
    }
    find_in_path("ffprobe").ok_or_else(|| {
        AppError::FfmpegNotFound(format!(
            "ffprobe not found next to {} or in PATH",
            ffmpeg.display()
        ))
    })
}

/// Startup check: runs `ffprobe -help`. Only a failure to spawn counts as
/// missing; the exit status of `-help` is irrelevant.
pub fn check_ffprobe(ffprobe: &Path) -> Result<(), AppError> {
    match Command::new(ffprobe)
        .arg("-help")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
    {
        Ok(_) => Ok(()),
        Err(e) => {
            log::error!(
                target: "ffqueue::ffmpeg::discovery",
                "ffprobe probe failed ({}): {}",
                ffprobe.display(),
                e
            );
            Err(AppError::FfmpegNotFound(format!(
                "Error. {} Check if FFmpeg is installed!",
                e
            )))
        }
    }
}
