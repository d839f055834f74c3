use std::path::{Path, PathBuf};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// What to do when the computed output path already exists
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollisionPolicy {
    /// Let the converter overwrite the existing file
    #[default]
    Overwrite,
    /// Mark the item as failed without starting the converter
    Fail,
}

/// Per-run conversion switches handed to the driver
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionOptions {
    pub output_dir: PathBuf,
    pub subtitles: bool,
    pub tagged_output: bool,
    pub collision_policy: CollisionPolicy,
}

/// Configuration for the conversion front-end
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConverterConfig {
    /// Explicit converter binary, checked before the install directories
    pub converter_bin: Option<PathBuf>,
    /// Explicit prober binary, checked before the install directories
    pub prober_bin: Option<PathBuf>,
    /// Installation directories probed in order before falling back to PATH
    pub install_dirs: Vec<PathBuf>,
    /// Directory where converted files are written
    pub output_dir: PathBuf,
    /// User-writable profile catalog, merged with the bundled presets
    pub profiles_path: PathBuf,
    /// Append the fixed tag to output names
    pub tagged_output: bool,
    /// Burn sibling subtitle files into the output
    pub subtitles: bool,
    pub collision_policy: CollisionPolicy,
    /// Milliseconds to wait for a graceful converter exit before killing it
    pub stop_grace_ms: u64,
}

impl Default for ConverterConfig {
    fn default() -> Self {
        Self::default_config()
    }
}

impl ConverterConfig {
    /// Create a default configuration with sensible values
    pub fn default_config() -> Self {
        Self {
            converter_bin: None,
            prober_bin: None,
            install_dirs: vec![
                PathBuf::from("/usr/bin"),
                PathBuf::from("/usr/local/bin"),
                PathBuf::from("/opt/homebrew/bin"),
                PathBuf::from("/opt/local/bin"),
            ],
            output_dir: PathBuf::from("."),
            profiles_path: default_profiles_path(),
            tagged_output: false,
            subtitles: false,
            collision_policy: CollisionPolicy::Overwrite,
            stop_grace_ms: 3000,
        }
    }

    /// Load configuration from a file, or return defaults if path is None or file doesn't exist
    pub fn load_config(path: Option<&Path>) -> Result<Self> {
        let mut config = Self::default_config();

        if let Some(config_path) = path {
            if config_path.exists() {
                let content = std::fs::read_to_string(config_path)
                    .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

                if config_path.extension().and_then(|s| s.to_str()) == Some("toml") {
                    config = toml::from_str(&content)
                        .with_context(|| format!("Failed to parse TOML config: {}", config_path.display()))?;
                } else {
                    config = serde_json::from_str(&content)
                        .with_context(|| format!("Failed to parse JSON config: {}", config_path.display()))?;
                }
            }
        }

        Ok(config)
    }

    /// Conversion switches derived from this configuration
    pub fn conversion_options(&self) -> ConversionOptions {
        ConversionOptions {
            output_dir: self.output_dir.clone(),
            subtitles: self.subtitles,
            tagged_output: self.tagged_output,
            collision_policy: self.collision_policy,
        }
    }
}

fn default_profiles_path() -> PathBuf {
    match std::env::var_os("HOME") {
        Some(home) => PathBuf::from(home).join(".mediamorph").join("profiles.xml"),
        None => PathBuf::from("profiles.xml"),
    }
}
