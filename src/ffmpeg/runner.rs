//! FFmpeg process spawning and stderr streaming.
//!
//! The child is parked in a [`ProcessSlot`] while its stderr is drained on the
//! calling thread, so another thread can terminate it without waiting on a
//! lock. Once stderr closes, the runner takes the child back out to reap it;
//! an empty slot at that point means the process was terminated.

use std::io::{BufRead, BufReader, Read};
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

#[cfg(windows)]
use std::os::windows::process::CommandExt;

use parking_lot::Mutex;

use super::builder::{FfmpegCommand, format_args_for_display_multiline};
use crate::error::AppError;

/// Holder for the single active child process of a supervisor.
pub type ProcessSlot = Arc<Mutex<Option<Child>>>;

pub fn new_process_slot() -> ProcessSlot {
    Arc::new(Mutex::new(None))
}

/// Calls `on_line` for every line of `reader`. `\n`, `\r` and `\r\n` all end a
/// line; ffmpeg redraws its status line with bare `\r`.
pub fn for_each_line<R: Read>(reader: R, mut on_line: impl FnMut(&str)) -> std::io::Result<()> {
    let mut reader = BufReader::new(reader);
    let mut line_buf: Vec<u8> = Vec::with_capacity(256);
    let mut after_cr = false;

    loop {
        let chunk = reader.fill_buf()?;
        if chunk.is_empty() {
            break;
        }
        let consumed = chunk.len();
        for &b in chunk {
            match b {
                b'\n' if after_cr => {
                    after_cr = false;
                }
                b'\n' | b'\r' => {
                    on_line(&String::from_utf8_lossy(&line_buf));
                    line_buf.clear();
                    after_cr = b == b'\r';
                }
                _ => {
                    after_cr = false;
                    line_buf.push(b);
                }
            }
        }
        reader.consume(consumed);
    }

    if !line_buf.is_empty() {
        on_line(&String::from_utf8_lossy(&line_buf));
    }
    Ok(())
}

/// Runs one ffmpeg command to completion, feeding each stderr line to
/// `on_line`. Returns the exit code (`None` when killed by a signal);
/// [`AppError::Aborted`] when the child was taken by [`terminate`] or `active`
/// was already cleared by the time the child was parked.
pub fn run_ffmpeg_blocking(
    ffmpeg: &Path,
    command: &FfmpegCommand,
    slot: &ProcessSlot,
    active: &AtomicBool,
    on_line: impl FnMut(&str),
) -> Result<Option<i32>, AppError> {
    log::debug!(
        target: "ffqueue::ffmpeg::runner",
        "Spawning FFmpeg: path={}, input={:?}, output={:?}",
        ffmpeg.display(),
        command.input(),
        command.output()
    );
    log::trace!(
        target: "ffqueue::ffmpeg::runner",
        "{}",
        format_args_for_display_multiline(&command.argv)
    );

    let mut cmd = Command::new(ffmpeg);
    cmd.args(command.args())
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped());
    #[cfg(windows)]
    cmd.creation_flags(0x08000000); // CREATE_NO_WINDOW
    let mut child = cmd
        .spawn()
        .map_err(|e| AppError::from(format!("Failed to spawn FFmpeg: {}", e)))?;

    let Some(stderr) = child.stderr.take() else {
        let _ = child.kill();
        let _ = child.wait();
        return Err(AppError::from("Failed to capture stderr"));
    };

    {
        // A cancel that cleared `active` before the child was parked found
        // an empty slot; kill here instead.
        let mut parked = slot.lock();
        if !active.load(Ordering::SeqCst) {
            drop(parked);
            log::info!(
                target: "ffqueue::ffmpeg::runner",
                "Cancelled before start, terminating FFmpeg process pid={}",
                child.id()
            );
            let _ = child.kill();
            let _ = child.wait();
            return Err(AppError::aborted());
        }
        *parked = Some(child);
    }

    if let Err(e) = for_each_line(stderr, on_line) {
        log::warn!(
            target: "ffqueue::ffmpeg::runner",
            "Reading FFmpeg stderr failed: {}",
            e
        );
    }

    let child = slot.lock().take();
    let Some(mut child) = child else {
        log::warn!(
            target: "ffqueue::ffmpeg::runner",
            "FFmpeg process was terminated"
        );
        return Err(AppError::aborted());
    };

    let status = child.wait()?;
    let code = status.code();
    match code {
        Some(0) => log::info!(
            target: "ffqueue::ffmpeg::runner",
            "FFmpeg completed successfully"
        ),
        other => log::warn!(
            target: "ffqueue::ffmpeg::runner",
            "FFmpeg exited with code {:?}",
            other
        ),
    }
    Ok(code)
}

/// Kills and reaps the child parked in `slot`, if any. Returns whether a
/// process was running.
pub fn terminate(slot: &ProcessSlot) -> bool {
    let child = slot.lock().take();
    match child {
        Some(mut child) => {
            log::info!(
                target: "ffqueue::ffmpeg::runner",
                "Terminating FFmpeg process pid={}",
                child.id()
            );
            let _ = child.kill();
            let _ = child.wait();
            true
        }
        None => false,
    }
}
