//! Ordered conversion queue.

use std::path::{Path, PathBuf};

use log::{debug, warn};
use serde::Serialize;

use crate::error::QueueError;
use crate::media::{ConversionStatus, MediaItem};
use crate::prober::Prober;

/// What happened to one path during population.
#[derive(Debug, Clone, PartialEq)]
pub enum PopulateOutcome {
    Added,
    /// Already queued; left untouched
    Duplicate,
    /// Probing failed; recorded in the invalid-files list
    Invalid(String),
}

/// Progress report yielded once per path by [`MediaQueue::populate`].
#[derive(Debug, Clone, PartialEq)]
pub struct PopulateEvent {
    pub path: PathBuf,
    /// Paths handled so far, including this one
    pub done: usize,
    pub total: usize,
    pub outcome: PopulateOutcome,
}

/// A file rejected during population.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InvalidFile {
    pub path: PathBuf,
    pub reason: String,
}

pub struct MediaQueue {
    prober: Prober,
    items: Vec<MediaItem>,
    /// Normalised input paths, parallel to `items`
    keys: Vec<PathBuf>,
    total_duration: f64,
    invalid: Vec<InvalidFile>,
}

impl MediaQueue {
    pub fn new(prober: Prober) -> Self {
        Self {
            prober,
            items: Vec::new(),
            keys: Vec::new(),
            total_duration: 0.0,
            invalid: Vec::new(),
        }
    }

    /// Probe and append each path, one per call to `next()`.
    ///
    /// Nothing happens until the returned iterator is driven, so callers can
    /// render feedback between files. Invalid files never stop the batch; they
    /// accumulate until drained with [`MediaQueue::take_invalid_files`].
    pub fn populate<I, P>(&mut self, paths: I) -> Populate<'_>
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        let paths: Vec<PathBuf> = paths.into_iter().map(Into::into).collect();
        Populate {
            total: paths.len(),
            done: 0,
            paths: paths.into_iter(),
            queue: self,
        }
    }

    /// Append an already probed item. Returns false if the same file is
    /// already queued, however its path was spelled.
    pub fn push(&mut self, item: MediaItem) -> bool {
        let key = normalize(&item.input_path);
        if self.keys.contains(&key) {
            return false;
        }
        self.total_duration += item.duration();
        self.items.push(item);
        self.keys.push(key);
        true
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.position_of(path).is_some()
    }

    pub fn position_of(&self, path: &Path) -> Option<usize> {
        let key = normalize(path);
        self.keys.iter().position(|k| *k == key)
    }

    /// Drain the files rejected since the last call
    pub fn take_invalid_files(&mut self) -> Vec<InvalidFile> {
        std::mem::take(&mut self.invalid)
    }

    pub fn get_file(&self, position: usize) -> Result<&MediaItem, QueueError> {
        let len = self.items.len();
        self.items
            .get(position)
            .ok_or(QueueError::IndexOutOfRange { position, len })
    }

    pub fn get_file_mut(&mut self, position: usize) -> Result<&mut MediaItem, QueueError> {
        let len = self.items.len();
        self.items
            .get_mut(position)
            .ok_or(QueueError::IndexOutOfRange { position, len })
    }

    pub fn remove_file(&mut self, position: usize) -> Result<MediaItem, QueueError> {
        if position >= self.items.len() {
            return Err(QueueError::IndexOutOfRange { position, len: self.items.len() });
        }
        let item = self.items.remove(position);
        self.keys.remove(position);
        self.total_duration -= item.duration();
        if self.items.is_empty() {
            self.total_duration = 0.0;
        }
        Ok(item)
    }

    pub fn clear(&mut self) {
        self.items.clear();
        self.keys.clear();
        self.invalid.clear();
        self.total_duration = 0.0;
    }

    pub fn length(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Sum of item durations in seconds
    pub fn duration(&self) -> f64 {
        self.total_duration
    }

    pub fn iter(&self) -> impl Iterator<Item = &MediaItem> {
        self.items.iter()
    }

    /// First item still waiting to be converted
    pub fn next_runnable(&self) -> Option<usize> {
        self.items.iter().position(|i| i.status == ConversionStatus::Todo)
    }

    /// Requeue every item for another run
    pub fn reset_statuses(&mut self) {
        for item in &mut self.items {
            item.reset();
        }
    }
}

/// Comparison key for an input path: the canonical path when the file
/// exists, otherwise the lexically absolute one.
fn normalize(path: &Path) -> PathBuf {
    std::fs::canonicalize(path)
        .or_else(|_| std::path::absolute(path))
        .unwrap_or_else(|_| path.to_path_buf())
}

/// Lazy population sequence returned by [`MediaQueue::populate`].
pub struct Populate<'a> {
    queue: &'a mut MediaQueue,
    paths: std::vec::IntoIter<PathBuf>,
    done: usize,
    total: usize,
}

impl Iterator for Populate<'_> {
    type Item = PopulateEvent;

    fn next(&mut self) -> Option<PopulateEvent> {
        let path = self.paths.next()?;
        self.done += 1;

        let outcome = if self.queue.contains(&path) {
            debug!("Already queued: {}", path.display());
            PopulateOutcome::Duplicate
        } else {
            match MediaItem::probe(&self.queue.prober, &path) {
                Ok(item) => {
                    debug!(
                        "Queued {} ({:.2}s, {})",
                        path.display(),
                        item.duration(),
                        item.format_name()
                    );
                    self.queue.push(item);
                    PopulateOutcome::Added
                }
                Err(e) => {
                    warn!("Skipping {}: {}", path.display(), e);
                    let reason = e.to_string();
                    self.queue.invalid.push(InvalidFile {
                        path: path.clone(),
                        reason: reason.clone(),
                    });
                    PopulateOutcome::Invalid(reason)
                }
            }
        };

        Some(PopulateEvent {
            path,
            done: self.done,
            total: self.total,
            outcome,
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.paths.size_hint()
    }
}
