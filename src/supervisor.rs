//! Runs conversion and crop jobs one at a time on a background thread and
//! reports back through an [`EventSink`].
//!
//! Cancellation is cooperative: [`Supervisor::cancel`] clears the
//! `in_progress` flag, which the run loop checks between jobs, and kills the
//! active ffmpeg so the current job ends right away.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;
use serde::Serialize;

use crate::error::AppError;
use crate::ffmpeg::{
    ConvertJob, FfmpegCommand, ProcessSlot, ProgressTracker, ProgressUpdate,
    format_args_for_display_multiline, new_process_slot, run_ffmpeg_blocking, terminate,
};
use crate::queue::{RowId, SharedQueue};

/// Banner level, mirroring the front-end's info bar types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageLevel {
    Info,
    Warning,
    Error,
}

/// Everything the worker tells the front-end. Serialises as
/// `{"event": "<name>", "payload": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(
    tag = "event",
    content = "payload",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum RunEvent {
    /// Start/cancel controls: `false` while a run is active.
    ControlsActive { active: bool },
    JobStarted {
        row_id: Option<RowId>,
        command: String,
    },
    RowProgress { row_id: RowId, percent: u8 },
    JobFinished {
        row_id: Option<RowId>,
        exit_code: Option<i32>,
        cancelled: bool,
    },
    OutputLine { line: String },
    OutputCleared,
    Message { text: String, level: MessageLevel },
}

impl RunEvent {
    pub fn info(text: impl Into<String>) -> Self {
        Self::Message {
            text: text.into(),
            level: MessageLevel::Info,
        }
    }

    pub fn warning(text: impl Into<String>) -> Self {
        Self::Message {
            text: text.into(),
            level: MessageLevel::Warning,
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self::Message {
            text: text.into(),
            level: MessageLevel::Error,
        }
    }
}

pub type EventSink = Arc<dyn Fn(RunEvent) + Send + Sync>;

pub const DONE_MESSAGE: &str = "Done!";
pub const CANCELED_MESSAGE: &str = "Task canceled.";

/// Clears `running` when the worker exits, however it exits.
struct RunGuard(Arc<AtomicBool>);

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

enum JobOutcome {
    Completed(Option<i32>),
    Aborted,
    Failed(AppError),
}

pub struct Supervisor {
    ffmpeg: PathBuf,
    slot: ProcessSlot,
    /// Cleared by `cancel`; the run loop stops before the next job.
    in_progress: Arc<AtomicBool>,
    /// Set from start until the worker thread exits.
    running: Arc<AtomicBool>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Supervisor {
    pub fn new(ffmpeg: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            slot: new_process_slot(),
            in_progress: Arc::new(AtomicBool::new(false)),
            running: Arc::new(AtomicBool::new(false)),
            worker: Mutex::new(None),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Converts `jobs` in order. Rows that are unselected or gone when their
    /// turn comes are skipped.
    pub fn start_convert(
        &self,
        jobs: Vec<ConvertJob>,
        queue: SharedQueue,
        sink: EventSink,
    ) -> Result<(), AppError> {
        let ctx = self.begin()?;
        log::info!(
            target: "ffqueue::supervisor",
            "Starting conversion run with {} job(s)",
            jobs.len()
        );
        self.spawn("ffqueue-convert", move || {
            let _guard = RunGuard(Arc::clone(&ctx.running));
            sink(RunEvent::ControlsActive { active: false });
            let mut failed = false;

            for job in jobs {
                if !ctx.in_progress.load(Ordering::SeqCst) {
                    break;
                }
                let row_id = job.row_id;
                if !queue.lock().is_runnable(row_id) {
                    log::debug!(
                        target: "ffqueue::supervisor",
                        "Skipping {}: not selected or removed",
                        row_id
                    );
                    continue;
                }
                queue.lock().begin_job(row_id);
                if !ctx.in_progress.load(Ordering::SeqCst) {
                    queue.lock().finish_job(row_id, false);
                    break;
                }

                let outcome = ctx.run_job(&job.command, Some(row_id), &sink, |percent| {
                    if queue.lock().set_progress(row_id, percent) {
                        sink(RunEvent::RowProgress { row_id, percent });
                    }
                });

                match outcome {
                    JobOutcome::Completed(_) => {
                        queue.lock().finish_job(row_id, true);
                        sink(RunEvent::RowProgress {
                            row_id,
                            percent: 100,
                        });
                    }
                    JobOutcome::Aborted => {
                        queue.lock().finish_job(row_id, false);
                    }
                    JobOutcome::Failed(e) => {
                        queue.lock().finish_job(row_id, false);
                        sink(RunEvent::error(e.to_string()));
                        failed = true;
                        break;
                    }
                }
            }

            ctx.finish(&sink, failed);
        })
    }

    /// Runs a single crop command. Its stderr goes to the output view only.
    pub fn start_crop(&self, command: FfmpegCommand, sink: EventSink) -> Result<(), AppError> {
        let ctx = self.begin()?;
        log::info!(
            target: "ffqueue::supervisor",
            "Starting crop: {:?}",
            command.output()
        );
        self.spawn("ffqueue-crop", move || {
            let _guard = RunGuard(Arc::clone(&ctx.running));
            sink(RunEvent::ControlsActive { active: false });
            let failed = match ctx.run_job(&command, None, &sink, |_| {}) {
                JobOutcome::Failed(e) => {
                    sink(RunEvent::error(e.to_string()));
                    true
                }
                JobOutcome::Completed(_) | JobOutcome::Aborted => false,
            };
            ctx.finish(&sink, failed);
        })
    }

    /// Stops the active run. Returns whether one was in progress.
    pub fn cancel(&self) -> bool {
        if !self.in_progress.swap(false, Ordering::SeqCst) {
            return false;
        }
        log::info!(target: "ffqueue::supervisor", "Cancel requested");
        terminate(&self.slot);
        true
    }

    /// Blocks until the current worker thread, if any, has exited.
    pub fn wait(&self) {
        let handle = self.worker.lock().take();
        if let Some(handle) = handle
            && handle.join().is_err()
        {
            log::error!(target: "ffqueue::supervisor", "Worker thread panicked");
        }
    }

    fn begin(&self) -> Result<RunContext, AppError> {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(AppError::Busy);
        }
        // The previous worker has already cleared `running`; reap it.
        if let Some(handle) = self.worker.lock().take() {
            let _ = handle.join();
        }
        self.in_progress.store(true, Ordering::SeqCst);
        Ok(RunContext {
            ffmpeg: self.ffmpeg.clone(),
            slot: Arc::clone(&self.slot),
            in_progress: Arc::clone(&self.in_progress),
            running: Arc::clone(&self.running),
        })
    }

    fn spawn(&self, name: &str, body: impl FnOnce() + Send + 'static) -> Result<(), AppError> {
        match thread::Builder::new().name(name.to_string()).spawn(body) {
            Ok(handle) => {
                *self.worker.lock() = Some(handle);
                Ok(())
            }
            Err(e) => {
                self.in_progress.store(false, Ordering::SeqCst);
                self.running.store(false, Ordering::SeqCst);
                Err(AppError::Io(e))
            }
        }
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        self.cancel();
        self.wait();
    }
}

/// State a worker thread carries for one run.
struct RunContext {
    ffmpeg: PathBuf,
    slot: ProcessSlot,
    in_progress: Arc<AtomicBool>,
    running: Arc<AtomicBool>,
}

impl RunContext {
    fn run_job(
        &self,
        command: &FfmpegCommand,
        row_id: Option<RowId>,
        sink: &EventSink,
        mut on_percent: impl FnMut(u8),
    ) -> JobOutcome {
        sink(RunEvent::JobStarted {
            row_id,
            command: format_args_for_display_multiline(&command.argv),
        });

        let mut tracker = ProgressTracker::new();
        let active = &self.in_progress;
        let result = run_ffmpeg_blocking(&self.ffmpeg, command, &self.slot, active, |line| {
            match tracker.feed(line) {
                ProgressUpdate::Percent(percent) => on_percent(percent),
                ProgressUpdate::NoDuration => log::trace!(
                    target: "ffqueue::supervisor",
                    "Progress line before any duration: {}",
                    line
                ),
                ProgressUpdate::Duration(_) | ProgressUpdate::Unmatched => {}
            }
            sink(RunEvent::OutputLine {
                line: line.to_string(),
            });
        });

        let (outcome, exit_code, cancelled) = match result {
            Ok(code) => (JobOutcome::Completed(code), code, false),
            Err(AppError::Aborted) => (JobOutcome::Aborted, None, true),
            Err(e) => {
                log::error!(
                    target: "ffqueue::supervisor",
                    "Job {:?} failed to run: {}",
                    row_id,
                    e
                );
                (JobOutcome::Failed(e), None, false)
            }
        };
        sink(RunEvent::JobFinished {
            row_id,
            exit_code,
            cancelled,
        });
        outcome
    }

    fn finish(&self, sink: &EventSink, failed: bool) {
        let cancelled = !self.in_progress.swap(false, Ordering::SeqCst);
        sink(RunEvent::ControlsActive { active: true });
        if cancelled {
            log::info!(target: "ffqueue::supervisor", "Run canceled");
            sink(RunEvent::warning(CANCELED_MESSAGE));
        } else if !failed {
            log::info!(target: "ffqueue::supervisor", "Run finished");
            sink(RunEvent::info(DONE_MESSAGE));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn events_serialize_as_event_and_payload() {
        let v = serde_json::to_value(RunEvent::RowProgress {
            row_id: RowId(3),
            percent: 42,
        })
        .unwrap();
        assert_eq!(
            v,
            json!({ "event": "rowProgress", "payload": { "rowId": 3, "percent": 42 } })
        );

        let v = serde_json::to_value(RunEvent::warning(CANCELED_MESSAGE)).unwrap();
        assert_eq!(
            v,
            json!({ "event": "message", "payload": { "text": "Task canceled.", "level": "warning" } })
        );

        let v = serde_json::to_value(RunEvent::OutputCleared).unwrap();
        assert_eq!(v, json!({ "event": "outputCleared" }));
    }

    #[test]
    fn cancel_without_run_is_noop() {
        let sup = Supervisor::new("ffmpeg");
        assert!(!sup.is_running());
        assert!(!sup.cancel());
    }

    #[test]
    fn missing_binary_reports_error_and_keeps_selection() {
        let dir = tempfile::tempdir().unwrap();
        let sup = Supervisor::new(dir.path().join("no-ffmpeg"));
        let queue = crate::queue::new_shared_queue();
        let id = queue
            .lock()
            .add_file(PathBuf::from("/x/a.mp4"), |_| "0:00:01".into())
            .unwrap();
        let events: Arc<Mutex<Vec<RunEvent>>> = Arc::default();
        let sink_events = Arc::clone(&events);
        let sink: EventSink = Arc::new(move |e| sink_events.lock().push(e));

        let job = ConvertJob {
            row_id: id,
            command: FfmpegCommand {
                argv: vec!["ffmpeg".into(), "-i".into(), "/x/a.mp4".into(), "/x/a.mkv".into()],
            },
        };
        sup.start_convert(vec![job], Arc::clone(&queue), sink).unwrap();
        sup.wait();

        assert!(!sup.is_running());
        let row = queue.lock().get(id).cloned().unwrap();
        assert!(row.selected);
        assert!(!row.in_progress);
        let events = events.lock();
        assert!(events.iter().any(|e| matches!(
            e,
            RunEvent::Message { level: MessageLevel::Error, text } if text.contains("Failed to spawn FFmpeg")
        )));
        assert!(!events.contains(&RunEvent::info(DONE_MESSAGE)));
        assert_eq!(events.last(), Some(&RunEvent::ControlsActive { active: true }));
    }
}
