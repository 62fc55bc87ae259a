//! Local log persistence: one file per crash, one metrics file per day.
//!
//! Metrics files are append-only; nothing in this crate rewrites or
//! truncates them.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local, NaiveDate, TimeZone};

use crate::error::MonitorError;
use crate::telemetry::PerformanceSnapshot;

pub const CRASH_DIR_NAME: &str = "crash_logs";
pub const METRICS_DIR_NAME: &str = "perf_logs";

const MAX_NAME_COLLISIONS: u32 = 100;

/// Contents of one persisted crash report.
#[derive(Debug, Clone)]
pub struct CrashRecord {
    pub thread_name: String,
    pub message: String,
    pub stack_trace: String,
    pub timestamp_ms: u64,
}

fn local_time(timestamp_ms: u64) -> DateTime<Local> {
    Local
        .timestamp_millis_opt(timestamp_ms as i64)
        .single()
        .unwrap_or_else(Local::now)
}

fn write_error(path: &Path, err: std::io::Error) -> MonitorError {
    MonitorError::LogWrite {
        path: path.display().to_string(),
        reason: err.to_string(),
    }
}

/// `crash_<yyyy-MM-dd_HH-mm-ss>` for the given epoch milliseconds.
pub fn crash_file_stem(timestamp_ms: u64) -> String {
    format!(
        "crash_{}",
        local_time(timestamp_ms).format("%Y-%m-%d_%H-%M-%S")
    )
}

/// Write `record` to a new file under `dir`, returning its path.
///
/// Two crashes within the same second get `_1`, `_2`, ... suffixes so no
/// record overwrites another.
pub fn write_crash_record(dir: &Path, record: &CrashRecord) -> Result<PathBuf, MonitorError> {
    fs::create_dir_all(dir).map_err(|err| write_error(dir, err))?;

    let stem = crash_file_stem(record.timestamp_ms);
    let human_time = local_time(record.timestamp_ms).format("%Y-%m-%d %H:%M:%S%.3f");
    let body = format!(
        "Thread: {}\nTime: {}\nMessage: {}\n\n{}\n",
        record.thread_name, human_time, record.message, record.stack_trace
    );

    for attempt in 0..MAX_NAME_COLLISIONS {
        let name = if attempt == 0 {
            format!("{}.log", stem)
        } else {
            format!("{}_{}.log", stem, attempt)
        };
        let path = dir.join(name);

        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(mut file) => {
                file.write_all(body.as_bytes())
                    .and_then(|_| file.flush())
                    .map_err(|err| write_error(&path, err))?;
                return Ok(path);
            }
            Err(err) if err.kind() == ErrorKind::AlreadyExists => continue,
            Err(err) => return Err(write_error(&path, err)),
        }
    }

    Err(MonitorError::LogWrite {
        path: dir.join(format!("{}.log", stem)).display().to_string(),
        reason: "too many crash records within one second".to_string(),
    })
}

/// Daily, append-only metrics log.
#[derive(Debug, Clone)]
pub struct MetricsLog {
    dir: PathBuf,
}

impl MetricsLog {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// `perf_<yyyy-MM-dd>.log` for the given calendar day.
    pub fn file_for(&self, date: NaiveDate) -> PathBuf {
        self.dir.join(format!("perf_{}.log", date.format("%Y-%m-%d")))
    }

    /// Append one line for `snapshot` to the file of its calendar day.
    pub fn append(&self, snapshot: &PerformanceSnapshot) -> Result<PathBuf, MonitorError> {
        fs::create_dir_all(&self.dir).map_err(|err| write_error(&self.dir, err))?;

        let path = self.file_for(local_time(snapshot.timestamp).date_naive());
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|err| write_error(&path, err))?;
        writeln!(file, "{}", snapshot.to_log_line()).map_err(|err| write_error(&path, err))?;
        Ok(path)
    }
}
