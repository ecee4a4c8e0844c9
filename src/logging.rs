//! Logger setup for the binary: `DD-MM-YY HH:MM:SS message` lines on stderr,
//! optionally copied to a log file. Stdout stays free for the sidecar
//! protocol.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;

use env_logger::{Builder, Env, Target};
use time::OffsetDateTime;
use time::macros::format_description;

use crate::error::AppError;

/// Writes every log line to stderr and, when present, the log file.
struct TeeWriter {
    file: Option<File>,
}

impl Write for TeeWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        io::stderr().write_all(buf)?;
        if let Some(file) = self.file.as_mut() {
            file.write_all(buf)?;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        io::stderr().flush()?;
        if let Some(file) = self.file.as_mut() {
            file.flush()?;
        }
        Ok(())
    }
}

pub fn format_timestamp(now: OffsetDateTime) -> String {
    let fmt = format_description!("[day]-[month]-[year repr:last_two] [hour]:[minute]:[second]");
    now.format(&fmt)
        .unwrap_or_else(|_| "??-??-?? ??:??:??".into())
}

/// Installs the global logger. Level comes from `RUST_LOG`, default `info`.
/// With `log_file`, lines are also appended there.
pub fn init_logger(log_file: Option<&Path>) -> Result<(), AppError> {
    let file = match log_file {
        Some(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            Some(OpenOptions::new().create(true).append(true).open(path)?)
        }
        None => None,
    };

    let result = Builder::from_env(Env::default().default_filter_or("info"))
        .format(|buf, record| {
            let now = OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc());
            writeln!(buf, "{} {}", format_timestamp(now), record.args())
        })
        .target(Target::Pipe(Box::new(TeeWriter { file })))
        .try_init();

    if let Err(e) = result {
        // Tests and embedders may have installed a logger already.
        log::debug!(target: "ffqueue::logging", "Logger already set: {}", e);
    }
    if let Some(path) = log_file {
        log::info!(target: "ffqueue::logging", "Logging to {}", path.display());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn timestamp_is_day_month_short_year() {
        assert_eq!(
            format_timestamp(datetime!(2024-03-07 09:05:01 UTC)),
            "07-03-24 09:05:01"
        );
    }

    #[test]
    fn tee_writes_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ffqueue.log");
        let file = OpenOptions::new().create(true).append(true).open(&path).unwrap();
        let mut tee = TeeWriter { file: Some(file) };
        tee.write_all(b"hello\n").unwrap();
        tee.flush().unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "hello\n");
    }
}
