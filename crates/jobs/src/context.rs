use anyhow::Result;
use std::path::{Path, PathBuf};
use thiserror::Error;

use settings::{extension_of, Settings};

use crate::{ConversionLog, ConversionQueue, JobId, QueueError, SubmitError, Supervisor};

#[derive(Debug, Error)]
pub enum ConvertError {
    #[error("please select an output format")]
    NoOutputFormat,
    #[error("please select an input format")]
    NoInputFormat,
    #[error(transparent)]
    Submit(#[from] SubmitError),
}

/// Everything a front end needs: settings, the waiting queue and the
/// supervisor running conversions.
pub struct AppContext {
    settings: Settings,
    queue: ConversionQueue,
    supervisor: Supervisor,
}

impl AppContext {
    /// Resolve ffmpeg and open today's log under `base_dir`. A missing ffmpeg
    /// is not an error here; conversions are refused later instead.
    pub fn init(settings: Settings, base_dir: &Path) -> Result<Self> {
        let tool = match media_io::resolve_tool(settings.tool_path.as_deref(), base_dir) {
            Ok(path) => Some(path),
            Err(e) => {
                tracing::warn!("{e}");
                None
            }
        };
        let log = ConversionLog::open(&settings.log_dir_or(base_dir), settings.log_failures)?;
        Ok(Self::with_parts(settings, tool, log))
    }

    pub fn with_parts(settings: Settings, tool: Option<PathBuf>, log: ConversionLog) -> Self {
        Self {
            settings,
            queue: ConversionQueue::new(),
            supervisor: Supervisor::new(tool, log),
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn queue(&self) -> &ConversionQueue {
        &self.queue
    }

    pub fn supervisor(&self) -> &Supervisor {
        &self.supervisor
    }

    pub fn supervisor_mut(&mut self) -> &mut Supervisor {
        &mut self.supervisor
    }

    pub fn enqueue(&mut self, path: &Path) -> Result<bool, QueueError> {
        self.queue.add(&self.settings, path)
    }

    /// Output extensions offered for a file.
    pub fn targets_for(&self, path: &Path) -> Vec<String> {
        extension_of(path)
            .map(|ext| self.settings.targets_for(&ext))
            .unwrap_or_default()
    }

    /// Submit every queued file with `input_ext`, converting to `output_ext`.
    /// Files are taken off the queue once submitted.
    ///
    /// Nothing is dequeued when an extension is missing or ffmpeg is not
    /// available.
    pub fn convert(
        &mut self,
        input_ext: &str,
        output_ext: &str,
    ) -> Result<Vec<JobId>, ConvertError> {
        if output_ext.trim().is_empty() {
            return Err(ConvertError::NoOutputFormat);
        }
        if input_ext.trim().is_empty() {
            return Err(ConvertError::NoInputFormat);
        }
        if !self.supervisor.is_tool_available() {
            return Err(SubmitError::ToolUnavailable.into());
        }

        let mut ids = Vec::new();
        for file in self.queue.take_matching(input_ext) {
            match self.supervisor.submit(&file, output_ext) {
                Ok(id) => ids.push(id),
                Err(e) => tracing::warn!("skipping {}: {e}", file.display()),
            }
        }
        Ok(ids)
    }
}
