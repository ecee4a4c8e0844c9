//! The file queue shown in the main list: one [`Row`] per added media file.
//!
//! Rows are never persisted. Ids are monotonic and survive removals, so a
//! running conversion can keep addressing its row while the list changes.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Queue shared between the front-end and the conversion thread.
pub type SharedQueue = Arc<Mutex<JobQueue>>;

pub fn new_shared_queue() -> SharedQueue {
    Arc::new(Mutex::new(JobQueue::default()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RowId(pub u64);

impl std::fmt::Display for RowId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

const VIDEO_EXTENSIONS: &[&str] = &[
    "3g2", "3gp", "asf", "avi", "divx", "dv", "f4v", "flv", "m1v", "m2t", "m2ts", "m2v", "m4v",
    "mkv", "mov", "mp4", "mpe", "mpeg", "mpg", "mts", "mxf", "nut", "ogv", "qt", "rm", "rmvb",
    "ts", "vob", "webm", "wmv", "y4m",
];

const AUDIO_EXTENSIONS: &[&str] = &[
    "aac", "ac3", "aif", "aifc", "aiff", "amr", "ape", "au", "caf", "dts", "flac", "m4a", "m4b",
    "mka", "mp2", "mp3", "mpga", "oga", "ogg", "opus", "ra", "snd", "spx", "tta", "wav", "weba",
    "wma", "wv",
];

/// Icon kind of a queued file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Video,
    Audio,
}

impl MediaKind {
    /// Media kind from the file extension, `None` when the type is unknown.
    pub fn sniff(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        if VIDEO_EXTENSIONS.contains(&ext.as_str()) {
            Some(Self::Video)
        } else if AUDIO_EXTENSIONS.contains(&ext.as_str()) {
            Some(Self::Audio)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Row {
    pub id: RowId,
    pub kind: MediaKind,
    pub path: PathBuf,
    /// `H:MM:SS`, from the probe at add time.
    pub duration: String,
    /// Percent complete; unset until the first progress line.
    pub progress: Option<u8>,
    pub selected: bool,
    pub in_progress: bool,
}

impl Row {
    pub fn new(id: RowId, kind: MediaKind, path: PathBuf, duration: String) -> Self {
        Self {
            id,
            kind,
            path,
            duration,
            progress: None,
            selected: true,
            in_progress: false,
        }
    }

    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

#[derive(Debug, Default)]
pub struct JobQueue {
    rows: Vec<Row>,
    next_id: u64,
}

impl JobQueue {
    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn get(&self, id: RowId) -> Option<&Row> {
        self.rows.iter().find(|r| r.id == id)
    }

    fn get_mut(&mut self, id: RowId) -> Option<&mut Row> {
        self.rows.iter_mut().find(|r| r.id == id)
    }

    /// Appends `path` if its media kind is recognised. `duration` is only
    /// asked for files that are accepted.
    pub fn add_file(&mut self, path: PathBuf, duration: impl FnOnce(&Path) -> String) -> Option<RowId> {
        let Some(kind) = MediaKind::sniff(&path) else {
            log::info!(
                target: "ffqueue::queue",
                "Skipping {}: not an audio or video file",
                path.display()
            );
            return None;
        };
        let label = duration(&path);
        self.next_id += 1;
        let id = RowId(self.next_id);
        log::debug!(
            target: "ffqueue::queue",
            "Added {} {:?} {} ({})",
            id,
            kind,
            path.display(),
            label
        );
        self.rows.push(Row::new(id, kind, path, label));
        Some(id)
    }

    /// Removes the given rows; unknown ids are ignored. Returns how many went.
    pub fn remove(&mut self, ids: &[RowId]) -> usize {
        let before = self.rows.len();
        self.rows.retain(|r| !ids.contains(&r.id));
        before - self.rows.len()
    }

    pub fn set_selected(&mut self, id: RowId, selected: bool) -> bool {
        match self.get_mut(id) {
            Some(row) => {
                row.selected = selected;
                true
            }
            None => false,
        }
    }

    pub fn toggle_selected(&mut self, id: RowId) -> Option<bool> {
        let row = self.get_mut(id)?;
        row.selected = !row.selected;
        Some(row.selected)
    }

    pub fn select_all(&mut self) {
        for row in &mut self.rows {
            row.selected = true;
        }
    }

    pub fn unselect(&mut self, ids: &[RowId]) {
        for row in self.rows.iter_mut().filter(|r| ids.contains(&r.id)) {
            row.selected = false;
        }
    }

    pub fn has_selected(&self) -> bool {
        self.rows.iter().any(|r| r.selected)
    }

    /// Whether a job for `id` should run now: the row still exists and is
    /// selected.
    pub fn is_runnable(&self, id: RowId) -> bool {
        self.get(id).is_some_and(|r| r.selected)
    }

    pub fn begin_job(&mut self, id: RowId) -> bool {
        match self.get_mut(id) {
            Some(row) => {
                row.in_progress = true;
                true
            }
            None => false,
        }
    }

    /// Stores `percent` for the row; returns false when the row is gone or the
    /// value did not change.
    pub fn set_progress(&mut self, id: RowId, percent: u8) -> bool {
        match self.get_mut(id) {
            Some(row) if row.progress != Some(percent) => {
                row.progress = Some(percent);
                true
            }
            _ => false,
        }
    }

    /// Ends a job. A completed job reads 100% and leaves the selection; an
    /// aborted one keeps both.
    pub fn finish_job(&mut self, id: RowId, completed: bool) -> Option<&Row> {
        let row = self.get_mut(id)?;
        row.in_progress = false;
        if completed {
            row.progress = Some(100);
            row.selected = false;
        }
        Some(row)
    }
}
