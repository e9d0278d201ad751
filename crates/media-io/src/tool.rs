use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("ffmpeg not found; please install FFmpeg or set tool_path in settings")]
    Missing,
    #[error("bundled ffmpeg not found at {0}")]
    BundleMissing(PathBuf),
    #[error("unsupported platform: {0}")]
    UnsupportedPlatform(&'static str),
}

/// Locate the ffmpeg executable.
///
/// An explicit override wins when it exists. Otherwise Windows expects the
/// bundled `ffmpeg/ffmpeg.exe` under `base_dir`, and Linux/macOS look the
/// bare command up on `PATH`.
pub fn resolve_tool(override_path: Option<&Path>, base_dir: &Path) -> Result<PathBuf, ToolError> {
    let resolved = match override_path {
        Some(path) if path.is_file() => Ok(path.to_path_buf()),
        Some(path) => which::which(path).map_err(|_| ToolError::Missing),
        None => platform_tool(base_dir),
    }?;
    tracing::debug!("using ffmpeg at {}", resolved.display());
    Ok(resolved)
}

cfg_if::cfg_if! {
    if #[cfg(windows)] {
        fn platform_tool(base_dir: &Path) -> Result<PathBuf, ToolError> {
            let bundled = base_dir.join("ffmpeg").join("ffmpeg.exe");
            if bundled.is_file() {
                Ok(bundled)
            } else {
                Err(ToolError::BundleMissing(bundled))
            }
        }
    } else if #[cfg(any(target_os = "linux", target_os = "macos"))] {
        fn platform_tool(_base_dir: &Path) -> Result<PathBuf, ToolError> {
            which::which("ffmpeg").map_err(|_| ToolError::Missing)
        }
    } else {
        fn platform_tool(_base_dir: &Path) -> Result<PathBuf, ToolError> {
            Err(ToolError::UnsupportedPlatform(std::env::consts::OS))
        }
    }
}

/// Arguments for one conversion: progress as `key=value` lines on stdout,
/// no periodic stats line on stderr.
pub fn conversion_args(source: &Path, destination: &Path) -> Vec<OsString> {
    vec![
        "-i".into(),
        source.as_os_str().to_owned(),
        "-progress".into(),
        "pipe:1".into(),
        "-nostats".into(),
        destination.as_os_str().to_owned(),
    ]
}

/// Build the child command with stdin closed and both output streams piped.
pub fn conversion_command(tool: &Path, source: &Path, destination: &Path) -> Command {
    let mut cmd = Command::new(tool);
    cmd.args(conversion_args(source, destination));
    cmd.stdin(Stdio::null());
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());
    cmd
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conversion_args_order() {
        let args = conversion_args(Path::new("/in/foo.mp4"), Path::new("/in/foo.mkv"));
        let args: Vec<String> = args
            .iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert_eq!(
            args,
            vec!["-i", "/in/foo.mp4", "-progress", "pipe:1", "-nostats", "/in/foo.mkv"]
        );
    }

    #[test]
    fn test_override_must_exist() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("no-such-ffmpeg-binary");
        assert!(resolve_tool(Some(&missing), dir.path()).is_err());

        let present = dir.path().join("ffmpeg-custom");
        std::fs::write(&present, b"").unwrap();
        assert_eq!(resolve_tool(Some(&present), dir.path()).unwrap(), present);
    }

    #[cfg(windows)]
    #[test]
    fn test_windows_requires_bundle() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            resolve_tool(None, dir.path()),
            Err(ToolError::BundleMissing(_))
        ));
    }
}
