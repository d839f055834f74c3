//! Conversion profile catalog.
//!
//! Presets are grouped by target format family ("MP4", "FLV", ...). The
//! bundled catalog ships with the library; presets added by the user live in
//! a separate writable document that is merged after the bundled ones.

use std::io::Write;
use std::path::{Path, PathBuf};

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::error::{ProfileError, ProfileValidationError};

const BUNDLED_PROFILES: &str = include_str!("../data/profiles.xml");

/// A named set of converter parameters for one target quality.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Preset {
    #[serde(rename = "@name")]
    pub name: String,
    pub params: String,
    pub extension: String,
}

impl Preset {
    /// Parameter string split into converter argument tokens.
    pub fn tokens(&self) -> Vec<String> {
        self.params.split_whitespace().map(str::to_string).collect()
    }
}

/// All presets of one target format family.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileGroup {
    #[serde(rename = "@name")]
    pub name: String,
    #[serde(rename = "preset", default)]
    pub presets: Vec<Preset>,
}

/// On-disk document shape.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename = "profiles")]
pub struct ProfileCatalog {
    #[serde(rename = "profile", default)]
    pub groups: Vec<ProfileGroup>,
}

impl ProfileCatalog {
    pub fn from_xml(xml: &str) -> Result<Self, ProfileError> {
        Ok(quick_xml::de::from_str(xml)?)
    }

    pub fn to_xml(&self) -> Result<String, ProfileError> {
        let body = quick_xml::se::to_string(self)?;
        Ok(format!("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n{}\n", body))
    }

    fn find(&self, preset: &str) -> Option<&Preset> {
        self.groups
            .iter()
            .flat_map(|g| g.presets.iter())
            .find(|p| p.name == preset)
    }

    fn find_mut(&mut self, preset: &str) -> Option<&mut Preset> {
        self.groups
            .iter_mut()
            .flat_map(|g| g.presets.iter_mut())
            .find(|p| p.name == preset)
    }

    fn remove(&mut self, preset: &str) -> Option<Preset> {
        for group in &mut self.groups {
            if let Some(pos) = group.presets.iter().position(|p| p.name == preset) {
                let removed = group.presets.remove(pos);
                self.groups.retain(|g| !g.presets.is_empty());
                return Some(removed);
            }
        }
        None
    }
}

/// Check the fields of a preset before any catalog mutation.
///
/// Fields are checked in order (name, preset, params, extension) and the first
/// offending one is reported.
pub fn validate(
    name: &str,
    preset: &str,
    params: &str,
    extension: &str,
) -> Result<(), ProfileValidationError> {
    if name.trim().is_empty() {
        return Err(ProfileValidationError::NameBlank);
    }
    if preset.trim().is_empty() {
        return Err(ProfileValidationError::PresetBlank);
    }
    if params.trim().is_empty() {
        return Err(ProfileValidationError::ParamsBlank);
    }
    validate_extension(extension)
}

fn validate_extension(extension: &str) -> Result<(), ProfileValidationError> {
    let ext = extension.trim();
    if ext.len() < 2 || !ext.starts_with('.') {
        return Err(ProfileValidationError::ExtensionInvalid);
    }
    Ok(())
}

/// Bundled presets merged with the user's own.
pub struct ProfileStore {
    user_path: PathBuf,
    bundled: ProfileCatalog,
    user: ProfileCatalog,
}

impl ProfileStore {
    /// Create an empty store backed by the given user document. Nothing is
    /// read until [`ProfileStore::load`].
    pub fn new(user_path: impl Into<PathBuf>) -> Self {
        Self {
            user_path: user_path.into(),
            bundled: ProfileCatalog::default(),
            user: ProfileCatalog::default(),
        }
    }

    /// Read the bundled and user catalogs, creating an empty user document if
    /// none exists yet.
    pub fn load(&mut self) -> Result<(), ProfileError> {
        self.bundled = ProfileCatalog::from_xml(BUNDLED_PROFILES)?;

        if self.user_path.exists() {
            let content = std::fs::read_to_string(&self.user_path).map_err(|source| ProfileError::Io {
                path: self.user_path.clone(),
                source,
            })?;
            self.user = ProfileCatalog::from_xml(&content)?;
            debug!("Loaded user profiles from {}", self.user_path.display());
        } else {
            self.user = ProfileCatalog::default();
            self.save()?;
            info!("Created profile catalog at {}", self.user_path.display());
        }

        Ok(())
    }

    pub fn user_path(&self) -> &Path {
        &self.user_path
    }

    fn groups(&self) -> impl Iterator<Item = &ProfileGroup> {
        self.bundled.groups.iter().chain(self.user.groups.iter())
    }

    /// Format family names in catalog order, bundled first.
    pub fn profiles(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::new();
        for group in self.groups() {
            if !names.contains(&group.name.as_str()) {
                names.push(&group.name);
            }
        }
        names
    }

    /// Quality names available for one format family.
    pub fn presets(&self, profile: &str) -> Vec<&str> {
        self.groups()
            .filter(|g| g.name == profile)
            .flat_map(|g| g.presets.iter().map(|p| p.name.as_str()))
            .collect()
    }

    pub fn preset(&self, preset: &str) -> Result<&Preset, ProfileError> {
        self.user
            .find(preset)
            .or_else(|| self.bundled.find(preset))
            .ok_or_else(|| ProfileError::UnknownPreset(preset.to_string()))
    }

    /// Converter parameter tokens of a preset.
    pub fn parameters(&self, preset: &str) -> Result<Vec<String>, ProfileError> {
        Ok(self.preset(preset)?.tokens())
    }

    pub fn extension(&self, preset: &str) -> Result<&str, ProfileError> {
        Ok(&self.preset(preset)?.extension)
    }

    /// Add a user preset under the `name` format family.
    pub fn add_profile(
        &mut self,
        name: &str,
        preset: &str,
        params: &str,
        extension: &str,
    ) -> Result<(), ProfileError> {
        validate(name, preset, params, extension)?;
        let (name, preset) = (name.trim(), preset.trim());
        if self.preset(preset).is_ok() {
            return Err(ProfileValidationError::DuplicatePreset(preset.to_string()).into());
        }

        let entry = Preset {
            name: preset.to_string(),
            params: params.trim().to_string(),
            extension: extension.trim().to_string(),
        };
        match self.user.groups.iter_mut().find(|g| g.name == name) {
            Some(group) => group.presets.push(entry),
            None => self.user.groups.push(ProfileGroup {
                name: name.to_string(),
                presets: vec![entry],
            }),
        }

        info!("Added preset {:?} to profile {:?}", preset, name);
        Ok(())
    }

    /// Replace the parameters and extension of a user preset.
    pub fn update_profile(&mut self, preset: &str, params: &str, extension: &str) -> Result<(), ProfileError> {
        if params.trim().is_empty() {
            return Err(ProfileValidationError::ParamsBlank.into());
        }
        validate_extension(extension)?;
        self.ensure_user_owned(preset)?;

        if let Some(entry) = self.user.find_mut(preset) {
            entry.params = params.trim().to_string();
            entry.extension = extension.trim().to_string();
        }
        Ok(())
    }

    /// Remove a user preset, dropping its family if it becomes empty.
    pub fn delete_profile(&mut self, preset: &str) -> Result<Preset, ProfileError> {
        self.ensure_user_owned(preset)?;
        self.user
            .remove(preset)
            .ok_or_else(|| ProfileError::UnknownPreset(preset.to_string()))
    }

    fn ensure_user_owned(&self, preset: &str) -> Result<(), ProfileError> {
        if self.user.find(preset).is_some() {
            Ok(())
        } else if self.bundled.find(preset).is_some() {
            Err(ProfileError::ReadOnlyPreset(preset.to_string()))
        } else {
            Err(ProfileError::UnknownPreset(preset.to_string()))
        }
    }

    /// Persist the user catalog. The document is written to a temporary file
    /// next to the target and renamed over it, so a failure leaves the previous
    /// document intact.
    pub fn save(&self) -> Result<(), ProfileError> {
        let xml = self.user.to_xml()?;
        let dir = match self.user_path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let io_err = |source| ProfileError::Io { path: self.user_path.clone(), source };

        std::fs::create_dir_all(&dir).map_err(io_err)?;
        let mut tmp = tempfile::NamedTempFile::new_in(&dir).map_err(io_err)?;
        tmp.write_all(xml.as_bytes()).map_err(io_err)?;
        tmp.as_file().sync_all().map_err(io_err)?;
        tmp.persist(&self.user_path)?;

        debug!("Saved profile catalog to {}", self.user_path.display());
        Ok(())
    }
}
