//! App error type for queue, preset and FFmpeg operations. Display strings are
//! the messages shown to the user; Serialize emits the same text for the sidecar.

use crate::ffmpeg::parse_ffmpeg_error;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("{0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid preset XML: {0}")]
    Xml(String),

    #[error("{0}")]
    FfmpegNotFound(String),

    #[error("FFmpeg failed (code {code}): {stderr}")]
    FfmpegFailed { code: i32, stderr: String },

    #[error("Aborted")]
    Aborted,

    #[error("Error. Check the settings!")]
    CheckSettings,

    #[error("Error. Output folder is not set!")]
    OutputFolderNotSet,

    #[error("No file selected!")]
    NoFileSelected,

    #[error("No category selected!")]
    NoCategorySelected,

    #[error("No profile selected!")]
    NoProfileSelected,

    #[error("Category with this name already exists!")]
    CategoryExists,

    #[error("Profile with this name already exists!")]
    ProfileExists,

    #[error("Name must not be empty!")]
    EmptyName,

    #[error("Invalid preset parameters: {0}")]
    InvalidParams(String),

    #[error("Crop end ({end:.2}s) must be after start ({start:.2}s)")]
    InvalidCropRange { start: f64, end: f64 },

    #[error("Another task is already running")]
    Busy,

    #[error("This operation is not allowed during the conversion process!")]
    NotAllowedWhileRunning,

    #[error("Adding files is disabled: FFmpeg was not found")]
    AddFilesDisabled,
}

impl AppError {
    pub fn aborted() -> Self {
        Self::Aborted
    }

    pub fn ffmpeg_failed(code: i32, stderr: impl Into<String>) -> Self {
        Self::FfmpegFailed {
            code,
            stderr: stderr.into(),
        }
    }

    /// True for errors caused by user input rather than the environment.
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            Self::CheckSettings
                | Self::OutputFolderNotSet
                | Self::NoFileSelected
                | Self::NoCategorySelected
                | Self::NoProfileSelected
                | Self::CategoryExists
                | Self::ProfileExists
                | Self::EmptyName
                | Self::NotAllowedWhileRunning
                | Self::InvalidParams(_)
                | Self::InvalidCropRange { .. }
        )
    }
}

impl serde::Serialize for AppError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        match self {
            AppError::FfmpegFailed { code, stderr } => {
                let payload = parse_ffmpeg_error(stderr, Some(*code));
                let json =
                    serde_json::json!({ "summary": payload.summary, "detail": payload.detail });
                serializer.serialize_str(&json.to_string())
            }
            _ => serializer.serialize_str(&self.to_string()),
        }
    }
}

impl From<quick_xml::Error> for AppError {
    fn from(e: quick_xml::Error) -> Self {
        AppError::Xml(e.to_string())
    }
}

impl From<String> for AppError {
    fn from(s: String) -> Self {
        if s == "Aborted" {
            AppError::Aborted
        } else {
            AppError::FfmpegFailed {
                code: -1,
                stderr: s,
            }
        }
    }
}

impl From<&str> for AppError {
    fn from(s: &str) -> Self {
        s.to_string().into()
    }
}
