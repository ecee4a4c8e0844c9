//! Persisted front-end settings (`config.json`) and the config directory
//! layout.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::AppError;

const APP_DIR_NAME: &str = "ffqueue";
const CONFIG_DIR_ENV: &str = "FFQUEUE_CONFIG_DIR";
const CONFIG_FILE: &str = "config.json";
const PRESETS_FILE: &str = "presets.json";
const LOG_FILE: &str = "ffqueue.log";

/// Where settings, user presets and the optional log file live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppPaths {
    pub config_dir: PathBuf,
}

impl AppPaths {
    pub fn new(config_dir: impl Into<PathBuf>) -> Self {
        Self {
            config_dir: config_dir.into(),
        }
    }

    /// `$FFQUEUE_CONFIG_DIR`, else `<platform config dir>/ffqueue`, else
    /// `./.ffqueue`.
    pub fn from_env() -> Self {
        if let Some(dir) = std::env::var_os(CONFIG_DIR_ENV).filter(|d| !d.is_empty()) {
            return Self::new(dir);
        }
        match dirs::config_dir() {
            Some(dir) => Self::new(dir.join(APP_DIR_NAME)),
            None => Self::new(PathBuf::from(".").join(format!(".{}", APP_DIR_NAME))),
        }
    }

    pub fn config_file(&self) -> PathBuf {
        self.config_dir.join(CONFIG_FILE)
    }

    pub fn presets_file(&self) -> PathBuf {
        self.config_dir.join(PRESETS_FILE)
    }

    pub fn log_file(&self) -> PathBuf {
        self.config_dir.join(LOG_FILE)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub main_window_size: [u32; 2],
    /// Index of the active category; -1 for none.
    pub category: i64,
    /// Index of the active profile within the category; -1 for none.
    pub profile: i64,
    pub output_folder: String,
    pub use_source_folder: bool,
    pub overwrite_existing: bool,
    /// Keys written by other front-ends, kept as-is.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            main_window_size: [560, 320],
            category: -1,
            profile: -1,
            output_folder: String::new(),
            use_source_folder: false,
            overwrite_existing: false,
            extra: Map::new(),
        }
    }
}

impl AppConfig {
    /// Reads `path`; a missing, empty or malformed file yields defaults.
    pub fn load(path: &Path) -> Self {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) => {
                if e.kind() != std::io::ErrorKind::NotFound {
                    log::warn!(
                        target: "ffqueue::config",
                        "Cannot read settings {}: {}",
                        path.display(),
                        e
                    );
                }
                return Self::default();
            }
        };
        if content.trim().is_empty() {
            return Self::default();
        }
        serde_json::from_str(&content).unwrap_or_else(|e| {
            log::warn!(
                target: "ffqueue::config",
                "Ignoring malformed settings {}: {}",
                path.display(),
                e
            );
            Self::default()
        })
    }

    pub fn save(&self, path: &Path) -> Result<(), AppError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        log::debug!(target: "ffqueue::config", "Saved settings to {}", path.display());
        Ok(())
    }

    /// The output folder, `None` when unset.
    pub fn output_folder(&self) -> Option<&Path> {
        if self.output_folder.is_empty() {
            None
        } else {
            Some(Path::new(&self.output_folder))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn defaults() {
        let c = AppConfig::default();
        assert_eq!(c.main_window_size, [560, 320]);
        assert_eq!(c.category, -1);
        assert_eq!(c.profile, -1);
        assert!(c.output_folder().is_none());
        assert!(!c.use_source_folder);
        assert!(!c.overwrite_existing);
    }

    #[test]
    fn partial_file_fills_defaults_and_keeps_unknown_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{"output_folder": "/tmp/out", "overwrite_existing": true, "theme": "dark"}"#,
        )
        .unwrap();

        let c = AppConfig::load(&path);
        assert_eq!(c.output_folder(), Some(Path::new("/tmp/out")));
        assert!(c.overwrite_existing);
        assert_eq!(c.category, -1);
        assert_eq!(c.extra.get("theme"), Some(&Value::from("dark")));

        c.save(&path).unwrap();
        let saved: Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(saved["theme"], "dark");
        assert_eq!(saved["main_window_size"], serde_json::json!([560, 320]));
    }

    #[test]
    fn malformed_or_missing_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        assert_eq!(AppConfig::load(&path), AppConfig::default());
        std::fs::write(&path, "[1, 2").unwrap();
        assert_eq!(AppConfig::load(&path), AppConfig::default());
    }

    #[test]
    #[serial]
    fn config_dir_from_env() {
        let dir = tempfile::tempdir().unwrap();
        unsafe { std::env::set_var(CONFIG_DIR_ENV, dir.path()) };
        let paths = AppPaths::from_env();
        unsafe { std::env::remove_var(CONFIG_DIR_ENV) };
        assert_eq!(paths.config_file(), dir.path().join("config.json"));
        assert_eq!(paths.presets_file(), dir.path().join("presets.json"));
    }
}
