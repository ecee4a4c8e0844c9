//! Front-end facing controller: owns settings, presets, the queue and the
//! supervisor, and turns user actions into core calls. Every GUI or protocol
//! adapter drives the application through this type.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::{AppConfig, AppPaths};
use crate::error::AppError;
use crate::ffmpeg::{
    MetadataCache, OutputTarget, ToolPaths, build_convert_commands, build_crop_command,
    check_ffprobe, format_duration_label, format_hms, grab_frame,
};
use crate::presets::{Preset, PresetCatalog, import_winff_xml};
use crate::queue::{MediaKind, Row, RowId, SharedQueue, new_shared_queue};
use crate::supervisor::{EventSink, RunEvent, Supervisor};

pub const PROFILE_ADDED_MESSAGE: &str = "Profile successfully added!";

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AppStatus {
    pub ffmpeg_path: String,
    pub ffprobe_path: String,
    pub can_add_files: bool,
    pub running: bool,
    pub config_dir: String,
}

/// What the info view and crop tool show for one file.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaInfo {
    pub path: PathBuf,
    pub duration: Option<f64>,
    pub duration_label: String,
    pub kind: Option<MediaKind>,
    pub lines: Vec<String>,
}

/// The file loaded into the crop tool.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CropSource {
    pub path: PathBuf,
    pub duration: f64,
    pub is_video: bool,
}

/// Settings fields to change; `None` leaves a field as it is.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsPatch {
    pub main_window_size: Option<[u32; 2]>,
    pub category: Option<String>,
    pub profile: Option<String>,
    pub output_folder: Option<String>,
    pub use_source_folder: Option<bool>,
    pub overwrite_existing: Option<bool>,
}

/// Current settings with the preset selection resolved to names.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsView {
    #[serde(flatten)]
    pub config: AppConfig,
    pub category_name: Option<String>,
    pub profile_name: Option<String>,
}

pub struct App {
    paths: AppPaths,
    tools: ToolPaths,
    config: AppConfig,
    presets: PresetCatalog,
    queue: SharedQueue,
    supervisor: Supervisor,
    metadata: MetadataCache,
    crop_source: Option<CropSource>,
    can_add_files: bool,
    sink: EventSink,
}

impl App {
    /// Loads settings and presets from `paths`. Call [`App::startup`] before
    /// adding files.
    pub fn new(paths: AppPaths, tools: ToolPaths, sink: EventSink) -> Self {
        let config = AppConfig::load(&paths.config_file());
        let presets = PresetCatalog::load(&paths.presets_file());
        log::info!(
            target: "ffqueue::app",
            "Loaded {} preset categories, config dir {}",
            presets.categories().count(),
            paths.config_dir.display()
        );
        Self {
            metadata: MetadataCache::new(&tools.ffprobe),
            supervisor: Supervisor::new(&tools.ffmpeg),
            paths,
            tools,
            config,
            presets,
            queue: new_shared_queue(),
            crop_source: None,
            can_add_files: true,
            sink,
        }
    }

    /// Checks that ffprobe can be started. When it cannot, file adding is
    /// disabled and an error banner is emitted; presets stay editable.
    pub fn startup(&mut self) -> bool {
        match check_ffprobe(&self.tools.ffprobe) {
            Ok(()) => self.can_add_files = true,
            Err(e) => {
                log::error!(target: "ffqueue::app", "{}", e);
                self.emit(RunEvent::error(e.to_string()));
                self.can_add_files = false;
            }
        }
        self.can_add_files
    }

    /// Cancels any run and persists settings and presets.
    pub fn shutdown(&mut self) -> Result<(), AppError> {
        if self.supervisor.cancel() {
            self.supervisor.wait();
        }
        self.config.save(&self.paths.config_file())?;
        self.presets.save(&self.paths.presets_file())?;
        log::info!(target: "ffqueue::app", "Settings and presets saved");
        Ok(())
    }

    pub fn status(&self) -> AppStatus {
        AppStatus {
            ffmpeg_path: crate::path_to_string(&self.tools.ffmpeg),
            ffprobe_path: crate::path_to_string(&self.tools.ffprobe),
            can_add_files: self.can_add_files,
            running: self.supervisor.is_running(),
            config_dir: crate::path_to_string(&self.paths.config_dir),
        }
    }

    pub fn queue(&self) -> &SharedQueue {
        &self.queue
    }

    pub fn presets(&self) -> &PresetCatalog {
        &self.presets
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn is_running(&self) -> bool {
        self.supervisor.is_running()
    }

    /// Blocks until the active run, if any, has finished.
    pub fn wait_for_run(&self) {
        self.supervisor.wait();
    }

    fn emit(&self, event: RunEvent) {
        (self.sink)(event)
    }

    // Queue

    pub fn rows(&self) -> Vec<Row> {
        self.queue.lock().rows().to_vec()
    }

    /// Adds the audio and video files among `paths`; others are skipped.
    pub fn add_files(&self, paths: Vec<PathBuf>) -> Result<Vec<RowId>, AppError> {
        if !self.can_add_files {
            return Err(AppError::AddFilesDisabled);
        }
        let mut added = Vec::with_capacity(paths.len());
        for path in paths {
            // Probe outside the queue lock.
            if MediaKind::sniff(&path).is_none() {
                self.queue.lock().add_file(path, |_| String::new());
                continue;
            }
            let label = self.duration_label(&path);
            if let Some(id) = self.queue.lock().add_file(path, |_| label) {
                added.push(id);
            }
        }
        Ok(added)
    }

    pub fn remove_rows(&self, ids: &[RowId]) -> Result<usize, AppError> {
        if self.supervisor.is_running() {
            return Err(AppError::NotAllowedWhileRunning);
        }
        Ok(self.queue.lock().remove(ids))
    }

    pub fn set_selected(&self, ids: &[RowId], selected: bool) {
        let mut queue = self.queue.lock();
        for &id in ids {
            queue.set_selected(id, selected);
        }
    }

    pub fn toggle_selected(&self, id: RowId) -> Option<bool> {
        self.queue.lock().toggle_selected(id)
    }

    pub fn select_all(&self) {
        self.queue.lock().select_all();
    }

    pub fn unselect(&self, ids: &[RowId]) {
        self.queue.lock().unselect(ids);
    }

    // Media

    fn duration_label(&self, path: &Path) -> String {
        format_duration_label(self.metadata.get(path).duration().unwrap_or(0.0))
    }

    pub fn media_info(&self, path: &Path) -> MediaInfo {
        let meta = self.metadata.get(path);
        let duration = meta.duration();
        MediaInfo {
            path: path.to_path_buf(),
            duration,
            duration_label: format_duration_label(duration.unwrap_or(0.0)),
            kind: MediaKind::sniff(path),
            lines: meta.info_lines(),
        }
    }

    /// Loads `path` into the crop tool. Files the probe cannot read are
    /// rejected.
    pub fn open_crop_file(&mut self, path: &Path) -> Result<CropSource, AppError> {
        let meta = self.metadata.get(path);
        let (Some(duration), Some(filename)) = (meta.duration(), meta.filename()) else {
            self.crop_source = None;
            return Err(AppError::NoFileSelected);
        };
        let path = PathBuf::from(filename);
        let source = CropSource {
            is_video: MediaKind::sniff(&path) == Some(MediaKind::Video),
            path,
            duration,
        };
        self.crop_source = Some(source.clone());
        Ok(source)
    }

    pub fn crop_source(&self) -> Option<&CropSource> {
        self.crop_source.as_ref()
    }

    /// Preview frame of the crop file at `position_secs`.
    pub fn crop_frame(&self, position_secs: f64) -> Result<Vec<u8>, AppError> {
        let source = self.crop_source.as_ref().ok_or(AppError::NoFileSelected)?;
        grab_frame(&self.tools.ffmpeg, &source.path, &format_hms(position_secs))
    }

    // Runs

    fn output_target(&self) -> Result<OutputTarget, AppError> {
        OutputTarget::resolve(self.config.use_source_folder, self.config.output_folder())
    }

    /// Converts every selected row with the active preset.
    pub fn start_convert(&self) -> Result<(), AppError> {
        if self.supervisor.is_running() {
            return Err(AppError::Busy);
        }
        self.emit(RunEvent::OutputCleared);
        let target = self.output_target()?;
        let (category, profile) = self.selected_preset();
        let jobs = {
            let queue = self.queue.lock();
            if !queue.has_selected() {
                return Err(AppError::NoFileSelected);
            }
            build_convert_commands(
                &self.presets,
                category,
                profile,
                queue.rows(),
                &target,
                self.config.overwrite_existing,
            )?
        };
        self.supervisor
            .start_convert(jobs, Arc::clone(&self.queue), Arc::clone(&self.sink))
    }

    /// Cuts `[start_secs, end_secs)` out of the crop file.
    pub fn start_crop(&self, start_secs: f64, end_secs: f64) -> Result<(), AppError> {
        if self.supervisor.is_running() {
            return Err(AppError::Busy);
        }
        self.emit(RunEvent::OutputCleared);
        let target = self.output_target()?;
        let source = self.crop_source.as_ref().ok_or(AppError::NoFileSelected)?;
        let command = build_crop_command(
            &source.path,
            start_secs,
            end_secs,
            &target,
            self.config.overwrite_existing,
        )?;
        self.supervisor.start_crop(command, Arc::clone(&self.sink))
    }

    pub fn cancel(&self) -> bool {
        self.supervisor.cancel()
    }

    // Settings

    /// Active category and profile names from the stored indices.
    pub fn selected_preset(&self) -> (Option<&str>, Option<&str>) {
        let category = self.presets.category_at(self.config.category);
        let profile = category.and_then(|c| self.presets.profile_at(c, self.config.profile));
        (category, profile)
    }

    pub fn settings(&self) -> SettingsView {
        let (category, profile) = self.selected_preset();
        SettingsView {
            config: self.config.clone(),
            category_name: category.map(str::to_string),
            profile_name: profile.map(str::to_string),
        }
    }

    /// Applies `patch` as a whole: an unknown category or profile rejects
    /// the patch before anything changes.
    pub fn update_settings(&mut self, patch: SettingsPatch) -> Result<SettingsView, AppError> {
        let (category, profile) =
            self.resolve_selection(patch.category.as_deref(), patch.profile.as_deref())?;
        self.config.category = category;
        self.config.profile = profile;
        if let Some(size) = patch.main_window_size {
            self.config.main_window_size = size;
        }
        if let Some(folder) = patch.output_folder {
            self.config.output_folder = folder;
        }
        if let Some(v) = patch.use_source_folder {
            self.config.use_source_folder = v;
        }
        if let Some(v) = patch.overwrite_existing {
            self.config.overwrite_existing = v;
        }
        Ok(self.settings())
    }

    /// Category and profile indices after selecting the given names, starting
    /// from the current selection. An empty name clears that level.
    fn resolve_selection(
        &self,
        category: Option<&str>,
        profile: Option<&str>,
    ) -> Result<(i64, i64), AppError> {
        let (mut cat_index, mut profile_index) = (self.config.category, self.config.profile);
        match category {
            Some("") => {
                cat_index = -1;
                profile_index = -1;
            }
            Some(name) => {
                let index = self
                    .presets
                    .category_index(name)
                    .ok_or(AppError::NoCategorySelected)? as i64;
                if index != cat_index {
                    cat_index = index;
                    profile_index = -1;
                }
            }
            None => {}
        }
        match profile {
            Some("") => profile_index = -1,
            Some(name) => {
                let category = self
                    .presets
                    .category_at(cat_index)
                    .ok_or(AppError::NoCategorySelected)?;
                profile_index = self
                    .presets
                    .profile_index(category, name)
                    .ok_or(AppError::NoProfileSelected)? as i64;
            }
            None => {}
        }
        Ok((cat_index, profile_index))
    }

    /// Re-points the stored indices after the catalog changed.
    fn reselect(&mut self, category: Option<&str>, profile: Option<&str>) {
        self.config.category = category
            .and_then(|c| self.presets.category_index(c))
            .map_or(-1, |i| i as i64);
        self.config.profile = match (category, profile) {
            (Some(c), Some(p)) => self.presets.profile_index(c, p).map_or(-1, |i| i as i64),
            _ => -1,
        };
    }

    fn owned_selection(&self) -> (Option<String>, Option<String>) {
        let (c, p) = self.selected_preset();
        (c.map(str::to_string), p.map(str::to_string))
    }

    // Presets

    pub fn add_category(&mut self, name: &str) -> Result<(), AppError> {
        self.presets.add_category(name)?;
        self.reselect(Some(name.trim()), None);
        Ok(())
    }

    pub fn rename_category(&mut self, current: &str, new_name: &str) -> Result<(), AppError> {
        if current.is_empty() {
            return Err(AppError::NoCategorySelected);
        }
        let (_, profile) = self.owned_selection();
        self.presets.rename_category(current, new_name)?;
        self.reselect(Some(new_name.trim()), profile.as_deref());
        Ok(())
    }

    pub fn remove_category(&mut self, name: &str) -> Result<(), AppError> {
        if name.is_empty() {
            return Err(AppError::NoCategorySelected);
        }
        let (category, profile) = self.owned_selection();
        self.presets.remove_category(name)?;
        self.reselect(category.as_deref(), profile.as_deref());
        Ok(())
    }

    pub fn add_profile(&mut self, category: &str, label: &str, preset: Preset) -> Result<(), AppError> {
        if category.is_empty() {
            return Err(AppError::NoCategorySelected);
        }
        self.presets.add_profile(category, label, preset)?;
        self.reselect(Some(category), Some(label.trim()));
        self.emit(RunEvent::info(PROFILE_ADDED_MESSAGE));
        Ok(())
    }

    pub fn edit_profile(
        &mut self,
        category: &str,
        current: &str,
        new_label: &str,
        preset: Preset,
    ) -> Result<(), AppError> {
        if category.is_empty() {
            return Err(AppError::NoCategorySelected);
        }
        if current.is_empty() {
            return Err(AppError::NoProfileSelected);
        }
        self.presets.edit_profile(category, current, new_label, preset)?;
        self.reselect(Some(category), Some(new_label.trim()));
        Ok(())
    }

    pub fn remove_profile(&mut self, category: &str, label: &str) -> Result<(), AppError> {
        if label.is_empty() {
            return Err(AppError::NoProfileSelected);
        }
        let (selected_category, selected_profile) = self.owned_selection();
        self.presets.remove_profile(category, label)?;
        self.reselect(selected_category.as_deref(), selected_profile.as_deref());
        Ok(())
    }

    pub fn restore_default_presets(&mut self) -> Result<(), AppError> {
        let (category, profile) = self.owned_selection();
        self.presets.restore_defaults()?;
        self.reselect(category.as_deref(), profile.as_deref());
        self.emit(RunEvent::info(crate::supervisor::DONE_MESSAGE));
        Ok(())
    }

    /// Merges a WinFF `presets.xml` into the catalog. Returns the number of
    /// profiles imported.
    pub fn import_presets_xml(&mut self, path: &Path) -> Result<usize, AppError> {
        let xml = std::fs::read_to_string(path)?;
        let imported = import_winff_xml(&xml)?;
        let (category, profile) = self.owned_selection();
        let count = self.presets.merge(imported);
        self.reselect(category.as_deref(), profile.as_deref());
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    fn test_app(dir: &Path) -> (App, Arc<Mutex<Vec<RunEvent>>>) {
        let events: Arc<Mutex<Vec<RunEvent>>> = Arc::default();
        let sink_events = Arc::clone(&events);
        let sink: EventSink = Arc::new(move |e| sink_events.lock().push(e));
        let app = App::new(
            AppPaths::new(dir.join("config")),
            ToolPaths::new(dir.join("no-ffmpeg"), dir.join("no-ffprobe")),
            sink,
        );
        (app, events)
    }

    #[test]
    fn startup_without_ffprobe_disables_adding() {
        let dir = tempfile::tempdir().unwrap();
        let (mut app, events) = test_app(dir.path());
        assert!(!app.startup());
        assert!(matches!(
            app.add_files(vec![PathBuf::from("/x/a.mp4")]),
            Err(AppError::AddFilesDisabled)
        ));
        let events = events.lock();
        assert!(matches!(
            events.first(),
            Some(RunEvent::Message { text, .. }) if text.ends_with("Check if FFmpeg is installed!")
        ));
        app.add_category("Mine").unwrap();
    }

    #[test]
    fn add_files_skips_unknown_and_labels_unprobed_as_zero() {
        let dir = tempfile::tempdir().unwrap();
        let (app, _) = test_app(dir.path());
        let ids = app
            .add_files(vec![PathBuf::from("/x/a.mp4"), PathBuf::from("/x/b.txt")])
            .unwrap();
        assert_eq!(ids.len(), 1);
        let rows = app.rows();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].duration, "0:00:00");
    }

    #[test]
    fn convert_needs_output_folder_and_preset() {
        let dir = tempfile::tempdir().unwrap();
        let (mut app, events) = test_app(dir.path());
        app.add_files(vec![PathBuf::from("/x/a.mp4")]).unwrap();

        assert!(matches!(app.start_convert(), Err(AppError::OutputFolderNotSet)));
        assert_eq!(events.lock().first(), Some(&RunEvent::OutputCleared));

        app.update_settings(SettingsPatch {
            use_source_folder: Some(true),
            ..Default::default()
        })
        .unwrap();
        assert!(matches!(app.start_convert(), Err(AppError::CheckSettings)));
        assert!(!app.is_running());
    }

    #[test]
    fn selection_follows_names_through_edits() {
        let dir = tempfile::tempdir().unwrap();
        let (mut app, events) = test_app(dir.path());
        app.update_settings(SettingsPatch {
            category: Some("Audio".into()),
            profile: Some("FLAC Lossless".into()),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(app.selected_preset(), (Some("Audio"), Some("FLAC Lossless")));

        app.add_category("AAA").unwrap();
        app.add_profile(
            "AAA",
            "Copy",
            Preset {
                params: "-c copy".into(),
                extension: "mkv".into(),
            },
        )
        .unwrap();
        assert_eq!(app.selected_preset(), (Some("AAA"), Some("Copy")));
        assert!(events.lock().contains(&RunEvent::info(PROFILE_ADDED_MESSAGE)));

        app.rename_category("AAA", "Zed").unwrap();
        assert_eq!(app.selected_preset(), (Some("Zed"), Some("Copy")));

        app.remove_category("Zed").unwrap();
        assert_eq!(app.selected_preset(), (None, None));
        assert_eq!(app.config().category, -1);
    }

    #[test]
    fn preset_errors_use_banner_text() {
        let dir = tempfile::tempdir().unwrap();
        let (mut app, _) = test_app(dir.path());
        assert!(matches!(app.remove_category(""), Err(AppError::NoCategorySelected)));
        assert!(matches!(
            app.add_profile("", "x", Preset::default()),
            Err(AppError::NoCategorySelected)
        ));
        assert!(matches!(
            app.edit_profile("Audio", "", "x", Preset::default()),
            Err(AppError::NoProfileSelected)
        ));
        assert!(matches!(app.add_category("Audio"), Err(AppError::CategoryExists)));
    }

    #[test]
    fn rejected_settings_patch_changes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let (mut app, _) = test_app(dir.path());
        app.update_settings(SettingsPatch {
            category: Some("Audio".into()),
            profile: Some("FLAC Lossless".into()),
            ..Default::default()
        })
        .unwrap();
        let before = app.config().clone();

        let err = app
            .update_settings(SettingsPatch {
                main_window_size: Some([900, 700]),
                output_folder: Some("/tmp/out".into()),
                overwrite_existing: Some(true),
                category: Some("DVD".into()),
                profile: Some("No such profile".into()),
                ..Default::default()
            })
            .unwrap_err();
        assert!(matches!(err, AppError::NoProfileSelected));
        assert_eq!(app.config(), &before);
        assert_eq!(app.selected_preset(), (Some("Audio"), Some("FLAC Lossless")));

        assert!(matches!(
            app.update_settings(SettingsPatch {
                output_folder: Some("/tmp/out".into()),
                category: Some("Nope".into()),
                ..Default::default()
            }),
            Err(AppError::NoCategorySelected)
        ));
        assert_eq!(app.config(), &before);
    }

    #[test]
    fn shutdown_persists_settings_and_presets() {
        let dir = tempfile::tempdir().unwrap();
        let (mut app, _) = test_app(dir.path());
        app.add_category("Mine").unwrap();
        app.update_settings(SettingsPatch {
            overwrite_existing: Some(true),
            ..Default::default()
        })
        .unwrap();
        app.shutdown().unwrap();

        let (app, _) = test_app(dir.path());
        assert!(app.presets().contains_category("Mine"));
        assert!(app.config().overwrite_existing);
        assert_eq!(app.selected_preset().0, Some("Mine"));
    }

    #[test]
    fn crop_without_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let (mut app, _) = test_app(dir.path());
        app.update_settings(SettingsPatch {
            use_source_folder: Some(true),
            ..Default::default()
        })
        .unwrap();
        assert!(matches!(app.start_crop(0.0, 5.0), Err(AppError::NoFileSelected)));
        assert!(matches!(
            app.open_crop_file(Path::new("/x/a.mp4")),
            Err(AppError::NoFileSelected)
        ));
        assert!(app.crop_source().is_none());
    }
}
