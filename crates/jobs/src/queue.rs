use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use thiserror::Error;

use settings::{extension_of, normalize_extension, Settings};

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("the file format '{0}' is not supported")]
    Unsupported(String),
    #[error("file has no extension: {0}")]
    NoExtension(PathBuf),
}

/// Files waiting to be converted, in the order they were added.
#[derive(Debug, Default, Clone)]
pub struct ConversionQueue {
    files: Vec<PathBuf>,
}

impl ConversionQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a file whose extension one of the configured families accepts.
    /// Returns `false` when the file was already queued.
    pub fn add(&mut self, settings: &Settings, path: &Path) -> Result<bool, QueueError> {
        let ext = extension_of(path).ok_or_else(|| QueueError::NoExtension(path.to_path_buf()))?;
        if !settings.is_supported(path) {
            return Err(QueueError::Unsupported(ext));
        }
        if self.files.iter().any(|f| f == path) {
            return Ok(false);
        }
        self.files.push(path.to_path_buf());
        Ok(true)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    /// Distinct input extensions currently queued.
    pub fn input_extensions(&self) -> BTreeSet<String> {
        self.files.iter().filter_map(|f| extension_of(f)).collect()
    }

    /// Remove and return every queued file with the given extension.
    pub fn take_matching(&mut self, extension: &str) -> Vec<PathBuf> {
        let ext = normalize_extension(extension);
        let (taken, kept): (Vec<PathBuf>, Vec<PathBuf>) = self
            .files
            .drain(..)
            .partition(|f| extension_of(f).as_deref() == Some(ext.as_str()));
        self.files = kept;
        taken
    }
}
