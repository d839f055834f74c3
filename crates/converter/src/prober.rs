use std::path::{Path, PathBuf};
use std::process::Command;
use log::debug;
use serde::Serialize;
use crate::error::MediaProbeError;

/// Duration and container information reported by the prober
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MediaInfo {
    /// Duration in seconds
    pub duration: f64,
    /// Container/format tag, e.g. "mpeg" or "mov,mp4,m4a,3gp,3g2,mj2"
    pub format_name: String,
}

/// Runs the external prober against media files
#[derive(Debug, Clone)]
pub struct Prober {
    path: PathBuf,
}

impl Prober {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Arguments requesting duration and format as plain key=value lines
    pub fn probe_args(file_path: &Path) -> Vec<String> {
        vec![
            "-v".to_string(),
            "error".to_string(),
            "-show_entries".to_string(),
            "format=duration,format_name".to_string(),
            "-of".to_string(),
            "default=noprint_wrappers=1".to_string(),
            file_path.to_string_lossy().to_string(),
        ]
    }

    /// Probe one file, blocking until the prober exits
    pub fn probe(&self, file_path: &Path) -> Result<MediaInfo, MediaProbeError> {
        debug!("Probing {} with {}", file_path.display(), self.path.display());

        let output = Command::new(&self.path)
            .args(Self::probe_args(file_path))
            .output()
            .map_err(|source| MediaProbeError::ProbeUnavailable {
                path: file_path.to_path_buf(),
                source,
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        match parse_probe_output(&stdout) {
            Some(info) => Ok(info),
            None => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                let reason = match stderr.lines().last() {
                    Some(line) if !line.trim().is_empty() => line.trim().to_string(),
                    _ => format!(
                        "no duration/format reported (exit code {})",
                        output.status.code().unwrap_or(-1)
                    ),
                };
                Err(MediaProbeError::InvalidMediaFile {
                    path: file_path.to_path_buf(),
                    reason,
                })
            }
        }
    }
}

/// Parse the prober's key=value lines. Both keys must be present and the
/// duration must be a positive number of seconds.
pub fn parse_probe_output(text: &str) -> Option<MediaInfo> {
    let mut duration = None;
    let mut format_name = None;

    for line in text.lines() {
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        match key.trim() {
            "duration" => duration = value.trim().parse::<f64>().ok(),
            "format_name" => {
                let value = value.trim();
                if !value.is_empty() && value != "N/A" {
                    format_name = Some(value.to_string());
                }
            }
            _ => {}
        }
    }

    match (duration, format_name) {
        (Some(duration), Some(format_name)) if duration.is_finite() && duration > 0.0 => {
            Some(MediaInfo { duration, format_name })
        }
        _ => None,
    }
}
