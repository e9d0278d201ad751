use anyhow::{Context, Result};
use chrono::{Local, NaiveDate};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Daily append-only record of finished conversions.
///
/// The file is picked once, when the log is opened, and kept for the life of
/// the process. Each write opens it in append mode and closes it again.
#[derive(Debug, Clone)]
pub struct ConversionLog {
    path: PathBuf,
    log_failures: bool,
}

impl ConversionLog {
    pub fn open(dir: &Path, log_failures: bool) -> Result<Self> {
        fs::create_dir_all(dir).with_context(|| format!("create log dir {}", dir.display()))?;
        Ok(Self::for_date(dir, Local::now().date_naive(), log_failures))
    }

    pub fn for_date(dir: &Path, date: NaiveDate, log_failures: bool) -> Self {
        Self {
            path: dir.join(format!("{}.log", date.format("%Y-%m-%d"))),
            log_failures,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn record_completed(&self, source: &Path, destination: &Path) -> Result<()> {
        self.append(&format!(
            "{}: {} -> {}",
            timestamp(),
            source.display(),
            destination.display()
        ))
    }

    /// Returns whether a line was written; failures are only recorded when
    /// the log was opened with `log_failures`.
    pub fn record_failed(&self, source: &Path, destination: &Path, reason: &str) -> Result<bool> {
        if !self.log_failures {
            return Ok(false);
        }
        self.append(&format!(
            "{}: {} -> {} FAILED: {}",
            timestamp(),
            source.display(),
            destination.display(),
            reason
        ))?;
        Ok(true)
    }

    /// Whole log for the day; empty when nothing has been written yet.
    pub fn read(&self) -> Result<String> {
        match fs::read_to_string(&self.path) {
            Ok(text) => Ok(text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
            Err(e) => Err(e).with_context(|| format!("read log {}", self.path.display())),
        }
    }

    fn append(&self, line: &str) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("open log {}", self.path.display()))?;
        writeln!(file, "{line}")?;
        Ok(())
    }
}

fn timestamp() -> String {
    Local::now().format("%Y-%m-%d %H:%M:%S%.6f").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_named_after_day() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 9).unwrap();
        let log = ConversionLog::for_date(Path::new("/var/logs"), date, false);
        assert_eq!(log.path(), Path::new("/var/logs/2024-03-09.log"));
    }

    #[test]
    fn test_completed_lines_append() {
        let dir = tempfile::tempdir().unwrap();
        let log = ConversionLog::open(&dir.path().join("logs"), false).unwrap();
        assert_eq!(log.read().unwrap(), "");

        log.record_completed(Path::new("/m/a.mp4"), Path::new("/m/a.mkv"))
            .unwrap();
        log.record_completed(Path::new("/m/b.wav"), Path::new("/m/b.mp3"))
            .unwrap();

        let text = log.read().unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with(": /m/a.mp4 -> /m/a.mkv"));
        assert!(lines[1].ends_with(": /m/b.wav -> /m/b.mp3"));
        // "YYYY-MM-DD HH:MM:SS.ffffff"
        assert_eq!(lines[0].find(": /m/"), Some(26));
    }

    #[test]
    fn test_failures_only_when_enabled() {
        let dir = tempfile::tempdir().unwrap();
        let quiet = ConversionLog::open(dir.path(), false).unwrap();
        assert!(!quiet
            .record_failed(Path::new("a.mp4"), Path::new("a.mkv"), "exit code 1")
            .unwrap());
        assert_eq!(quiet.read().unwrap(), "");

        let loud = ConversionLog::open(dir.path(), true).unwrap();
        assert!(loud
            .record_failed(Path::new("a.mp4"), Path::new("a.mkv"), "exit code 1")
            .unwrap());
        assert!(loud.read().unwrap().contains("a.mp4 -> a.mkv FAILED: exit code 1"));
    }
}
