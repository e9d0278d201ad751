use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const SETTINGS_FILE: &str = "settings.json";

pub fn app_data_dir() -> PathBuf {
    let base = dirs::data_local_dir().unwrap_or_else(std::env::temp_dir);
    base.join("media_converter")
}

/// `./settings.json` when present, else the copy under the app data dir.
pub fn default_settings_path(cwd: &Path) -> PathBuf {
    let local = cwd.join(SETTINGS_FILE);
    if local.is_file() {
        local
    } else {
        app_data_dir().join(SETTINGS_FILE)
    }
}

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("read settings {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("parse settings: {0}")]
    Parse(#[from] serde_json::Error),
}

/// One family of formats, e.g. "video": what it accepts and what it can become.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormatFamily {
    #[serde(default)]
    pub extensions: Vec<String>,
    #[serde(default)]
    pub convertible_to: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub media_formats: BTreeMap<String, FormatFamily>,
    /// Explicit ffmpeg location; platform lookup is used when unset.
    #[serde(default)]
    pub tool_path: Option<PathBuf>,
    /// Directory for the daily conversion logs; `<cwd>/logs` when unset.
    #[serde(default)]
    pub log_dir: Option<PathBuf>,
    /// Also record failed conversions in the daily log.
    #[serde(default)]
    pub log_failures: bool,
}

impl Settings {
    pub fn from_json(text: &str) -> Result<Self, SettingsError> {
        let mut settings: Settings = serde_json::from_str(text)?;
        settings.normalize();
        Ok(settings)
    }

    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        let text = fs::read_to_string(path).map_err(|source| SettingsError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&text)
    }

    /// Load settings, falling back to empty defaults when the file is
    /// missing or malformed.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(settings) => settings,
            Err(e) => {
                tracing::warn!("error loading settings: {e}");
                Self::default()
            }
        }
    }

    // Extensions are compared lowercase with a leading dot.
    fn normalize(&mut self) {
        for family in self.media_formats.values_mut() {
            for ext in family
                .extensions
                .iter_mut()
                .chain(family.convertible_to.iter_mut())
            {
                *ext = normalize_extension(ext);
            }
        }
    }

    pub fn supported_extensions(&self) -> BTreeSet<String> {
        self.media_formats
            .values()
            .flat_map(|f| f.extensions.iter().cloned())
            .collect()
    }

    pub fn is_supported(&self, path: &Path) -> bool {
        match extension_of(path) {
            Some(ext) => self
                .media_formats
                .values()
                .any(|f| f.extensions.contains(&ext)),
            None => false,
        }
    }

    /// Candidate target extensions for a source extension, in family order,
    /// without repeats.
    pub fn targets_for(&self, extension: &str) -> Vec<String> {
        let ext = normalize_extension(extension);
        let mut out: Vec<String> = Vec::new();
        for family in self.media_formats.values() {
            if !family.extensions.contains(&ext) {
                continue;
            }
            for target in &family.convertible_to {
                if !out.contains(target) {
                    out.push(target.clone());
                }
            }
        }
        out
    }

    pub fn log_dir_or(&self, base_dir: &Path) -> PathBuf {
        self.log_dir
            .clone()
            .unwrap_or_else(|| base_dir.join("logs"))
    }
}

/// `.ext` in lowercase, or `None` when the file name has no extension.
pub fn extension_of(path: &Path) -> Option<String> {
    let ext = path.extension()?.to_str()?;
    if ext.is_empty() {
        return None;
    }
    Some(format!(".{}", ext.to_lowercase()))
}

pub fn normalize_extension(ext: &str) -> String {
    let trimmed = ext.trim().trim_start_matches('.');
    format!(".{}", trimmed.to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "media_formats": {
            "audio": {
                "extensions": [".mp3", ".wav", ".flac"],
                "convertible_to": [".mp3", ".ogg"]
            },
            "video": {
                "extensions": [".mp4", ".MKV", "avi"],
                "convertible_to": [".mkv", ".mp4", ".mp3"]
            }
        }
    }"#;

    #[test]
    fn test_parse_and_normalize() {
        let s = Settings::from_json(SAMPLE).unwrap();
        assert_eq!(s.media_formats.len(), 2);
        assert_eq!(
            s.media_formats["video"].extensions,
            vec![".mp4", ".mkv", ".avi"]
        );
        assert!(!s.log_failures);
        assert!(s.tool_path.is_none());
    }

    #[test]
    fn test_supported_extensions() {
        let s = Settings::from_json(SAMPLE).unwrap();
        let exts = s.supported_extensions();
        assert!(exts.contains(".flac"));
        assert!(exts.contains(".avi"));
        assert!(s.is_supported(Path::new("/media/Clip.MP4")));
        assert!(!s.is_supported(Path::new("/media/notes.txt")));
        assert!(!s.is_supported(Path::new("/media/README")));
    }

    #[test]
    fn test_targets_for_dedups_across_families() {
        let s = Settings::from_json(SAMPLE).unwrap();
        assert_eq!(s.targets_for(".mp4"), vec![".mkv", ".mp4", ".mp3"]);
        assert_eq!(s.targets_for("WAV"), vec![".mp3", ".ogg"]);
        assert!(s.targets_for(".txt").is_empty());
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let s = Settings::load_or_default(&dir.path().join(SETTINGS_FILE));
        assert!(s.media_formats.is_empty());

        let bad = dir.path().join("bad.json");
        fs::write(&bad, "{ not json").unwrap();
        assert!(matches!(Settings::load(&bad), Err(SettingsError::Parse(_))));
        assert!(Settings::load_or_default(&bad).media_formats.is_empty());
    }

    #[test]
    fn test_extension_of() {
        assert_eq!(extension_of(Path::new("a/b/Movie.Mp4")).as_deref(), Some(".mp4"));
        assert_eq!(extension_of(Path::new("a/b/noext")), None);
        assert_eq!(normalize_extension("MKV"), ".mkv");
        assert_eq!(normalize_extension(".ogg"), ".ogg");
    }

    #[test]
    fn test_log_dir_default() {
        let s = Settings::default();
        assert_eq!(s.log_dir_or(Path::new("/work")), PathBuf::from("/work/logs"));
    }
}
