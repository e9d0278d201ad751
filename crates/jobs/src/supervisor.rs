use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use serde::Serialize;
use std::collections::HashMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use crate::{
    ConversionLog, Job, JobId, JobStatus, ProgressEvent, ProgressKind, Runner, SubmitError,
    STATUS_WAITING,
};

const IDLE_POLL: Duration = Duration::from_millis(250);

/// What observers of the supervisor get to see.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SupervisorEvent {
    Submitted {
        id: JobId,
        source: PathBuf,
        destination: PathBuf,
    },
    Progress {
        id: JobId,
        percent: u8,
    },
    Status {
        id: JobId,
        text: String,
    },
    Finished {
        id: JobId,
        outcome: JobOutcome,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum JobOutcome {
    Completed {
        source: PathBuf,
        destination: PathBuf,
    },
    Failed {
        source: PathBuf,
        reason: String,
    },
}

struct ActiveJob {
    job: Job,
    runner: Option<thread::JoinHandle<()>>,
}

/// Owns every running conversion and routes runner events to observers.
///
/// Each submitted job gets its own runner thread straight away. Runner events
/// come back over one channel and are handled by whichever thread calls
/// [`Supervisor::pump`], [`Supervisor::wait_event`] or
/// [`Supervisor::run_until_idle`]; that thread is the only one touching the
/// active set and the log.
pub struct Supervisor {
    tool: Option<PathBuf>,
    active: HashMap<JobId, ActiveJob>,
    tx_events: Sender<ProgressEvent>,
    rx_events: Receiver<ProgressEvent>,
    observers: Vec<Sender<SupervisorEvent>>,
    log: ConversionLog,
}

impl Supervisor {
    pub fn new(tool: Option<PathBuf>, log: ConversionLog) -> Self {
        let (tx_events, rx_events) = unbounded::<ProgressEvent>();
        Self {
            tool,
            active: HashMap::new(),
            tx_events,
            rx_events,
            observers: Vec::new(),
            log,
        }
    }

    pub fn subscribe(&mut self) -> Receiver<SupervisorEvent> {
        let (tx, rx) = unbounded();
        self.observers.push(tx);
        rx
    }

    pub fn is_tool_available(&self) -> bool {
        self.tool.is_some()
    }

    pub fn log(&self) -> &ConversionLog {
        &self.log
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    pub fn job(&self, id: &JobId) -> Option<&Job> {
        self.active.get(id).map(|a| &a.job)
    }

    /// Start converting `source` into a sibling file with `extension`.
    ///
    /// The destination name is settled here, against the disk and the jobs
    /// still in flight, and not checked again: another process creating the
    /// same file before ffmpeg does is not guarded against.
    pub fn submit(&mut self, source: &Path, extension: &str) -> Result<JobId, SubmitError> {
        let Some(tool) = self.tool.clone() else {
            return Err(SubmitError::ToolUnavailable);
        };
        let destination = unique_destination(source, extension, |p| {
            p.exists() || self.active.values().any(|a| a.job.destination.as_path() == p)
        })?;

        let mut job = Job::new(source.to_path_buf(), destination.clone());
        let id = job.id;
        tracing::info!(
            "[job {id}] converting {} -> {}",
            source.display(),
            destination.display()
        );
        self.notify(SupervisorEvent::Submitted {
            id,
            source: job.source.clone(),
            destination: destination.clone(),
        });
        self.notify(SupervisorEvent::Status {
            id,
            text: STATUS_WAITING.into(),
        });

        let runner = Runner::new(
            id,
            job.source.clone(),
            destination,
            tool,
            self.tx_events.clone(),
        );
        let handle = match runner.spawn() {
            Ok(handle) => {
                job.status = JobStatus::Running;
                Some(handle)
            }
            Err(e) => {
                let _ = self.tx_events.send(ProgressEvent {
                    job_id: id,
                    kind: ProgressKind::Failed(format!("failed to start runner thread: {e}")),
                });
                None
            }
        };
        self.active.insert(
            id,
            ActiveJob {
                job,
                runner: handle,
            },
        );
        Ok(id)
    }

    /// Handle every event already waiting, without blocking. Returns how many
    /// were handled.
    pub fn pump(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(ev) = self.rx_events.try_recv() {
            self.handle(ev);
            handled += 1;
        }
        handled
    }

    /// Block for at most `timeout` waiting for one event.
    pub fn wait_event(&mut self, timeout: Duration) -> bool {
        match self.rx_events.recv_timeout(timeout) {
            Ok(ev) => {
                self.handle(ev);
                true
            }
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => false,
        }
    }

    /// Wait up to `timeout` for progress, handle whatever arrived and clear out
    /// runners that died without reporting. Returns the number of jobs still
    /// active.
    pub fn step(&mut self, timeout: Duration) -> usize {
        let exited = self.exited_runners();
        self.wait_event(timeout);
        self.pump();
        self.reap_silent(exited);
        self.active.len()
    }

    /// Keep handling events until no job is left.
    pub fn run_until_idle(&mut self) {
        while self.step(IDLE_POLL) > 0 {}
    }

    fn handle(&mut self, ev: ProgressEvent) {
        let Some(active) = self.active.get_mut(&ev.job_id) else {
            tracing::debug!("[job {}] event for unknown job dropped", ev.job_id);
            return;
        };
        let changed = active.job.apply(&ev.kind);
        let source = active.job.source.clone();
        let destination = active.job.destination.clone();
        let id = ev.job_id;
        match ev.kind {
            ProgressKind::DurationDiscovered(_) => {}
            ProgressKind::TimeAdvanced { .. } => {
                if let Some(percent) = changed {
                    self.notify(SupervisorEvent::Progress { id, percent });
                }
            }
            ProgressKind::StatusChanged(text) => {
                self.notify(SupervisorEvent::Status { id, text });
            }
            ProgressKind::Completed { .. } => {
                self.notify(SupervisorEvent::Progress { id, percent: 100 });
                tracing::info!(
                    "conversion finished: {} -> {}",
                    source.display(),
                    destination.display()
                );
                if let Err(e) = self.log.record_completed(&source, &destination) {
                    tracing::error!("failed to write conversion log: {e:?}");
                }
                self.finish(
                    id,
                    JobOutcome::Completed {
                        source,
                        destination,
                    },
                );
            }
            ProgressKind::Failed(reason) => {
                tracing::warn!("error converting {}: {reason}", source.display());
                if let Err(e) = self.log.record_failed(&source, &destination, &reason) {
                    tracing::error!("failed to write conversion log: {e:?}");
                }
                self.finish(id, JobOutcome::Failed { source, reason });
            }
        }
    }

    fn finish(&mut self, id: JobId, outcome: JobOutcome) {
        if let Some(active) = self.active.remove(&id) {
            if let Some(handle) = active.runner {
                if handle.join().is_err() {
                    tracing::error!("[job {id}] runner thread panicked");
                }
            }
        }
        self.notify(SupervisorEvent::Finished { id, outcome });
    }

    fn exited_runners(&self) -> Vec<JobId> {
        self.active
            .iter()
            .filter(|(_, a)| a.runner.as_ref().is_some_and(|h| h.is_finished()))
            .map(|(id, _)| *id)
            .collect()
    }

    // A runner thread that ended without a terminal event panicked. Only
    // called after draining the channel, so anything it did send is handled.
    fn reap_silent(&mut self, exited: Vec<JobId>) {
        for id in exited {
            if self.active.contains_key(&id) {
                self.handle(ProgressEvent {
                    job_id: id,
                    kind: ProgressKind::Failed("runner exited without reporting".into()),
                });
            }
        }
    }

    fn notify(&mut self, ev: SupervisorEvent) {
        self.observers.retain(|tx| tx.send(ev.clone()).is_ok());
    }
}

/// `source` with its extension swapped for `extension`, adding `_1`, `_2`
/// and so on to the stem until `taken` says the name is free.
pub fn unique_destination(
    source: &Path,
    extension: &str,
    taken: impl Fn(&Path) -> bool,
) -> Result<PathBuf, SubmitError> {
    let ext = extension.trim().trim_start_matches('.');
    if ext.is_empty() {
        return Err(SubmitError::MissingExtension);
    }
    let stem = source
        .file_stem()
        .ok_or_else(|| SubmitError::InvalidSource(source.to_path_buf()))?;
    let parent = source.parent().unwrap_or_else(|| Path::new(""));

    let named = |suffix: String| {
        let mut name = OsString::from(stem);
        name.push(suffix);
        parent.join(name)
    };

    let first = named(format!(".{ext}"));
    if !taken(&first) {
        return Ok(first);
    }
    let mut n: u64 = 1;
    loop {
        let candidate = named(format!("_{n}.{ext}"));
        if !taken(&candidate) {
            return Ok(candidate);
        }
        n += 1;
    }
}
