use std::path::PathBuf;
use thiserror::Error;

/// Rejections raised while validating the fields of a new or updated preset.
///
/// These are meant to be handled by whoever collected the fields (re-prompt,
/// refocus the offending input) and never travel further than that.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProfileValidationError {
    #[error("profile name can't be left blank")]
    NameBlank,
    #[error("target quality name can't be left blank")]
    PresetBlank,
    #[error("command line parameters can't be left blank")]
    ParamsBlank,
    #[error("output file extension can't be left blank and must begin with a \".\"")]
    ExtensionInvalid,
    #[error("a preset named {0:?} already exists")]
    DuplicatePreset(String),
}

/// Errors from the profile catalog.
#[derive(Error, Debug)]
pub enum ProfileError {
    #[error(transparent)]
    Validation(#[from] ProfileValidationError),
    #[error("unknown preset: {0:?}")]
    UnknownPreset(String),
    #[error("preset {0:?} is bundled and can't be modified")]
    ReadOnlyPreset(String),
    #[error("failed to access profile catalog {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse profile catalog: {0}")]
    XmlParse(#[from] quick_xml::DeError),
    #[error("failed to write profile catalog: {0}")]
    XmlWrite(#[from] quick_xml::SeError),
    #[error("failed to replace profile catalog: {0}")]
    Persist(#[from] tempfile::PersistError),
}

/// Errors from probing a media file.
#[derive(Error, Debug)]
pub enum MediaProbeError {
    #[error("invalid media file {path}: {reason}")]
    InvalidMediaFile { path: PathBuf, reason: String },
    #[error("prober could not be started for {path}: {source}")]
    ProbeUnavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors from the conversion library.
#[derive(Error, Debug)]
pub enum ConverterError {
    #[error("{0} binary not found in the install directories or PATH")]
    NotFound(String),
    #[error("a converter process is already running")]
    AlreadyRunning,
    #[error("converter reported: {0}")]
    LibraryReportedFailure(String),
    #[error("failed to spawn {path}: {source}")]
    Spawn {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("unrecognised converter version output: {0:?}")]
    Version(String),
}

/// Positional access outside the queue.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueueError {
    #[error("position {position} out of range for queue of length {len}")]
    IndexOutOfRange { position: usize, len: usize },
}
