use crossbeam_channel::{bounded, Receiver, Sender};
use std::io::{BufRead, BufReader, Read};
use std::path::PathBuf;
use std::process::ExitStatus;
use std::thread;

use media_io::{conversion_command, parse_line, progress_percent, ProgressLine};

use crate::{
    JobId, ProgressEvent, ProgressKind, STATUS_COMPLETED, STATUS_CONVERTING, STATUS_ERROR,
    STATUS_STARTING,
};

/// Drives one ffmpeg invocation and reports what happens on `tx`.
///
/// Every run ends with exactly one `Completed` or `Failed` event.
pub struct Runner {
    job_id: JobId,
    source: PathBuf,
    destination: PathBuf,
    tool: PathBuf,
    tx: Sender<ProgressEvent>,
}

impl Runner {
    pub fn new(
        job_id: JobId,
        source: PathBuf,
        destination: PathBuf,
        tool: PathBuf,
        tx: Sender<ProgressEvent>,
    ) -> Self {
        Self {
            job_id,
            source,
            destination,
            tool,
            tx,
        }
    }

    pub fn spawn(self) -> std::io::Result<thread::JoinHandle<()>> {
        thread::Builder::new()
            .name(format!("job-{}", self.job_id))
            .spawn(move || self.run())
    }

    pub fn run(self) {
        self.emit(ProgressKind::StatusChanged(STATUS_STARTING.into()));

        let mut cmd = conversion_command(&self.tool, &self.source, &self.destination);
        let mut child = match cmd.spawn() {
            Ok(c) => c,
            Err(e) => {
                self.fail(format!("failed to start {}: {e}", self.tool.display()));
                return;
            }
        };

        let (tx_duration, rx_duration) = bounded::<f64>(1);
        let diagnostics = child.stderr.take().map(|stderr| {
            let tx = self.tx.clone();
            let job_id = self.job_id;
            thread::spawn(move || scan_diagnostics(stderr, job_id, tx, tx_duration))
        });

        if let Some(stdout) = child.stdout.take() {
            self.follow_progress(stdout, rx_duration);
        }

        let last_line = diagnostics.and_then(|h| h.join().ok()).flatten();
        match child.wait() {
            Ok(status) if status.success() => {
                self.emit(ProgressKind::StatusChanged(STATUS_COMPLETED.into()));
                self.emit(ProgressKind::Completed {
                    source: self.source.clone(),
                    destination: self.destination.clone(),
                });
            }
            Ok(status) => self.fail(exit_reason(status, last_line.as_deref())),
            Err(e) => self.fail(format!("failed to wait for ffmpeg: {e}")),
        }
    }

    // Positions read before the duration is known are held back and reported
    // once it arrives. stdout keeps draining meanwhile so ffmpeg never stalls
    // on a full pipe. At EOF the reader waits for stderr to settle the
    // duration; if it closes without one, the held positions are dropped.
    fn follow_progress<R: Read>(&self, stdout: R, rx_duration: Receiver<f64>) {
        let mut reader = BufReader::new(stdout);
        let mut buf = Vec::new();
        let mut duration: Option<f64> = None;
        let mut held: Vec<f64> = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf) {
                Ok(0) => break,
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!("[job {}] progress stream read failed: {e}", self.job_id);
                    break;
                }
            }
            let line = String::from_utf8_lossy(&buf);
            let Some(ProgressLine::CurrentTime(seconds)) = parse_line(line.trim()) else {
                continue;
            };
            if duration.is_none() {
                duration = rx_duration.try_recv().ok();
            }
            match duration {
                Some(total) => {
                    self.release(&mut held, total);
                    self.advance(seconds, total);
                }
                None => held.push(seconds),
            }
        }

        if duration.is_none() {
            duration = rx_duration.recv().ok();
        }
        match duration {
            Some(total) => self.release(&mut held, total),
            None if !held.is_empty() => {
                tracing::debug!(
                    "[job {}] no duration reported, {} progress line(s) ignored",
                    self.job_id,
                    held.len()
                );
            }
            None => {}
        }
    }

    fn release(&self, held: &mut Vec<f64>, total: f64) {
        for seconds in held.drain(..) {
            self.advance(seconds, total);
        }
    }

    fn advance(&self, seconds: f64, total: f64) {
        self.emit(ProgressKind::TimeAdvanced {
            seconds,
            percent: progress_percent(seconds, total),
        });
    }

    fn fail(&self, reason: String) {
        self.emit(ProgressKind::StatusChanged(STATUS_ERROR.into()));
        self.emit(ProgressKind::Failed(reason));
    }

    fn emit(&self, kind: ProgressKind) {
        let _ = self.tx.send(ProgressEvent {
            job_id: self.job_id,
            kind,
        });
    }
}

/// Read stderr to the end, reporting the first `Duration:` banner. Returns
/// the last non-empty line for failure messages.
fn scan_diagnostics<R: Read>(
    stderr: R,
    job_id: JobId,
    tx: Sender<ProgressEvent>,
    tx_duration: Sender<f64>,
) -> Option<String> {
    let mut reader = BufReader::new(stderr);
    let mut buf = Vec::new();
    let mut tx_duration = Some(tx_duration);
    let mut last = None;
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf) {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                tracing::warn!("[job {job_id}] diagnostic stream read failed: {e}");
                break;
            }
        }
        let line = String::from_utf8_lossy(&buf);
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if tx_duration.is_some() {
            if let Some(ProgressLine::Duration(secs)) = parse_line(line) {
                tracing::debug!("[job {job_id}] media duration {secs:.2}s");
                let _ = tx.send(ProgressEvent {
                    job_id,
                    kind: ProgressKind::DurationDiscovered(secs),
                });
                let _ = tx.send(ProgressEvent {
                    job_id,
                    kind: ProgressKind::StatusChanged(STATUS_CONVERTING.into()),
                });
                if let Some(d) = tx_duration.take() {
                    let _ = d.send(secs);
                }
            }
        }
        last = Some(line.to_string());
    }
    last
}

fn exit_reason(status: ExitStatus, last_line: Option<&str>) -> String {
    let head = match status.code() {
        Some(code) => format!("ffmpeg exited with code {code}"),
        None => "ffmpeg was terminated by a signal".to_string(),
    };
    match last_line {
        Some(line) => format!("{head}: {line}"),
        None => head,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::unbounded;
    use std::io::Cursor;

    fn runner(tx: Sender<ProgressEvent>) -> Runner {
        Runner::new(
            JobId::new(),
            "in.mp4".into(),
            "in.mkv".into(),
            "ffmpeg".into(),
            tx,
        )
    }

    #[test]
    fn test_scan_reports_first_duration_only() {
        let (tx, rx) = unbounded();
        let (tx_d, rx_d) = bounded(1);
        let text = "ffmpeg version 6\n  Duration: 00:02:00.00, start: 0\n  Duration: 00:09:00.00\nlast words\n";
        let last = scan_diagnostics(Cursor::new(text), JobId::new(), tx, tx_d);
        assert_eq!(last.as_deref(), Some("last words"));
        assert_eq!(rx_d.try_recv().ok(), Some(120.0));
        let kinds: Vec<ProgressKind> = rx.try_iter().map(|e| e.kind).collect();
        assert_eq!(
            kinds,
            vec![
                ProgressKind::DurationDiscovered(120.0),
                ProgressKind::StatusChanged(STATUS_CONVERTING.into()),
            ]
        );
    }

    #[test]
    fn test_follow_progress_computes_percent() {
        let (tx, rx) = unbounded();
        let (tx_d, rx_d) = bounded(1);
        tx_d.send(120.0).unwrap();
        let text = "frame=1\nout_time=00:00:00.00\nout_time=00:01:00.00\nprogress=continue\nout_time=00:01:59.00\nout_time=00:02:00.00\nprogress=end\n";
        runner(tx).follow_progress(Cursor::new(text), rx_d);
        let pct: Vec<u8> = rx
            .try_iter()
            .filter_map(|e| match e.kind {
                ProgressKind::TimeAdvanced { percent, .. } => Some(percent),
                _ => None,
            })
            .collect();
        assert_eq!(pct, vec![0, 50, 99, 99]);
    }

    #[test]
    fn test_follow_progress_holds_positions_until_duration_arrives() {
        let (tx, rx) = unbounded();
        let (tx_d, rx_d) = bounded(1);
        let late = thread::spawn(move || {
            thread::sleep(std::time::Duration::from_millis(50));
            tx_d.send(120.0).unwrap();
        });
        let text = "out_time=00:01:00.00\nprogress=continue\nout_time=00:01:30.00\nprogress=end\n";
        runner(tx).follow_progress(Cursor::new(text), rx_d);
        late.join().unwrap();
        let pct: Vec<u8> = rx
            .try_iter()
            .filter_map(|e| match e.kind {
                ProgressKind::TimeAdvanced { percent, .. } => Some(percent),
                _ => None,
            })
            .collect();
        assert_eq!(pct, vec![50, 75]);
    }

    #[test]
    fn test_follow_progress_without_duration_is_silent() {
        let (tx, rx) = unbounded();
        let (tx_d, rx_d) = bounded::<f64>(1);
        drop(tx_d);
        runner(tx).follow_progress(Cursor::new("out_time=00:00:10.00\n"), rx_d);
        assert_eq!(rx.try_iter().count(), 0);
    }

    #[test]
    fn test_spawn_failure_reports_failed() {
        let (tx, rx) = unbounded();
        Runner::new(
            JobId::new(),
            "in.mp4".into(),
            "in.mkv".into(),
            "/definitely/not/a/real/ffmpeg".into(),
            tx,
        )
        .run();
        let kinds: Vec<ProgressKind> = rx.try_iter().map(|e| e.kind).collect();
        assert_eq!(kinds.len(), 3);
        assert_eq!(kinds[1], ProgressKind::StatusChanged(STATUS_ERROR.into()));
        assert!(matches!(&kinds[2], ProgressKind::Failed(r) if r.starts_with("failed to start")));
    }
}
