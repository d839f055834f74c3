//! Sequential conversion of a queue.
//!
//! The driver converts one item at a time in queue order. It runs as a
//! single future; controls arrive through a [`DriverHandle`] and progress is
//! published as [`DriverEvent`]s on an unbounded channel.

use log::{debug, info, warn};
use serde::Serialize;
use tokio::sync::mpsc;

use crate::config::{CollisionPolicy, ConversionOptions};
use crate::error::ConverterError;
use crate::library::{ConversionLib, ConverterState, LibraryEvent, RunId};
use crate::media::ConversionStatus;
use crate::profile::Preset;
use crate::queue::MediaQueue;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DriverState {
    Ready,
    Converting,
    /// The current item keeps converting; the next one waits for a resume
    Paused,
    Finished,
    Stopped,
    Error,
}

/// Control requests from the front-end
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverCommand {
    Pause,
    Resume,
    /// Stop the current item and continue with the next
    SkipCurrent,
    /// Stop the current item and skip the rest of the queue
    Stop,
    /// Like `Stop`, and remove the partial output of the current item
    Cancel,
}

/// Progress of the item being converted
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Progress {
    pub position: usize,
    /// Seconds of media encoded so far
    pub encoded_time: f64,
    pub item_percent: f64,
    /// Across the whole queue, weighted by duration
    pub total_percent: f64,
    pub speed: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DriverEvent {
    StateChanged(DriverState),
    ItemStarted { position: usize },
    Progress(Progress),
    ItemFinished {
        position: usize,
        status: ConversionStatus,
        reason: Option<String>,
    },
}

/// Cloneable control surface for a running driver
#[derive(Debug, Clone)]
pub struct DriverHandle {
    tx: mpsc::UnboundedSender<DriverCommand>,
}

impl DriverHandle {
    pub fn send(&self, command: DriverCommand) {
        let _ = self.tx.send(command);
    }

    pub fn pause(&self) {
        self.send(DriverCommand::Pause);
    }

    pub fn resume(&self) {
        self.send(DriverCommand::Resume);
    }

    pub fn skip_current(&self) {
        self.send(DriverCommand::SkipCurrent);
    }

    pub fn stop(&self) {
        self.send(DriverCommand::Stop);
    }

    pub fn cancel(&self) {
        self.send(DriverCommand::Cancel);
    }
}

enum Flow {
    Next,
    Halt { cancel: bool },
}

pub struct ConversionDriver<'a> {
    lib: &'a mut ConversionLib,
    queue: &'a mut MediaQueue,
    preset: Preset,
    options: ConversionOptions,
    state: DriverState,
    paused: bool,
    handle: DriverHandle,
    commands: mpsc::UnboundedReceiver<DriverCommand>,
    events: mpsc::UnboundedSender<DriverEvent>,
}

impl<'a> ConversionDriver<'a> {
    /// Create a driver and the receiving end of its event channel
    pub fn new(
        lib: &'a mut ConversionLib,
        queue: &'a mut MediaQueue,
        preset: Preset,
        options: ConversionOptions,
    ) -> (Self, mpsc::UnboundedReceiver<DriverEvent>) {
        let (command_tx, commands) = mpsc::unbounded_channel();
        let (events, event_rx) = mpsc::unbounded_channel();
        let driver = Self {
            lib,
            queue,
            preset,
            options,
            state: DriverState::Ready,
            paused: false,
            handle: DriverHandle { tx: command_tx },
            commands,
            events,
        };
        (driver, event_rx)
    }

    pub fn handle(&self) -> DriverHandle {
        self.handle.clone()
    }

    pub fn state(&self) -> DriverState {
        self.state
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn queue(&self) -> &MediaQueue {
        self.queue
    }

    /// Convert every runnable item.
    ///
    /// Returns the state the driver settled in: `Finished` when the queue ran
    /// out, `Ready` after a stop or cancel. Failing to start the converter is
    /// fatal: the driver moves to `Error` and the error is returned.
    pub async fn run(&mut self) -> Result<DriverState, ConverterError> {
        self.paused = false;
        self.set_state(DriverState::Converting);
        info!(
            "Converting {} item(s) with {:?}",
            self.queue.iter().filter(|i| i.status == ConversionStatus::Todo).count(),
            self.preset.name
        );

        while let Some(position) = self.queue.next_runnable() {
            if let Some(Flow::Halt { .. }) = self.drain_commands() {
                return Ok(self.halt(None));
            }
            if self.paused {
                if let Flow::Halt { .. } = self.wait_while_paused().await {
                    return Ok(self.halt(None));
                }
            }

            if let Flow::Halt { cancel } = self.convert_item(position).await? {
                if cancel {
                    self.remove_partial_output(position);
                }
                return Ok(self.halt(Some(position)));
            }
        }

        info!("Queue finished");
        self.set_state(DriverState::Finished);
        Ok(DriverState::Finished)
    }

    async fn convert_item(&mut self, position: usize) -> Result<Flow, ConverterError> {
        let (args, output_path) = match self.queue.get_file(position) {
            Ok(item) => (
                item.build_conversion_cmd(
                    &self.options.output_dir,
                    &self.preset,
                    self.options.subtitles,
                    self.options.tagged_output,
                ),
                item.output_path(&self.options.output_dir, &self.preset, self.options.tagged_output),
            ),
            Err(_) => return Ok(Flow::Next),
        };

        if self.options.collision_policy == CollisionPolicy::Fail && output_path.exists() {
            let reason = format!("output already exists: {}", output_path.display());
            warn!("Item {}: {}", position, reason);
            self.finish_item(position, ConversionStatus::Failed, Some(reason));
            return Ok(Flow::Next);
        }

        if let Ok(item) = self.queue.get_file_mut(position) {
            item.start();
            info!("Item {}: converting {}", position, item.input_path.display());
        }
        self.emit(DriverEvent::ItemStarted { position });

        let run = match self.lib.start_converter(&args) {
            Ok(run) => run,
            Err(e) => {
                self.finish_item(position, ConversionStatus::Failed, Some(e.to_string()));
                self.set_state(DriverState::Error);
                return Err(e);
            }
        };

        loop {
            tokio::select! {
                event = self.lib.next_event() => {
                    match event {
                        Some(LibraryEvent::OutputArrived { run: r }) if r == run => {
                            if let Some(phrase) = self.inspect_output(position) {
                                self.lib.stop_converter().await;
                                self.finish_item(position, ConversionStatus::Failed, Some(reported(phrase)));
                                return Ok(Flow::Next);
                            }
                        }
                        Some(LibraryEvent::StateChanged { run: r, state }) if r == run => {
                            if let Some(flow) = self.on_converter_state(position, run, state).await {
                                return Ok(flow);
                            }
                        }
                        Some(stale) => debug!("Ignoring event from an earlier run: {:?}", stale),
                        None => {
                            self.finish_item(position, ConversionStatus::Failed, Some("converter events closed".to_string()));
                            return Ok(Flow::Next);
                        }
                    }
                }
                Some(command) = self.commands.recv() => {
                    if let Some(flow) = self.on_command(position, command).await {
                        return Ok(flow);
                    }
                }
            }
        }
    }

    /// Feed new output to the reader; returns a matched fatal phrase
    fn inspect_output(&mut self, position: usize) -> Option<&'static str> {
        let text = self.lib.read_converter_output();
        if text.is_empty() {
            return None;
        }
        self.lib.reader.update_read(text);

        if let Some(phrase) = self.lib.check_library_error() {
            return Some(phrase);
        }
        self.report_progress(position);
        None
    }

    async fn on_converter_state(&mut self, position: usize, run: RunId, state: ConverterState) -> Option<Flow> {
        match state {
            ConverterState::Finished => {
                if let Some(phrase) = self.inspect_output(position) {
                    self.finish_item(position, ConversionStatus::Failed, Some(reported(phrase)));
                } else {
                    self.finish_item(position, ConversionStatus::Done, None);
                }
            }
            ConverterState::ErrorOccurred => {
                let phrase = self.inspect_output(position).or_else(|| self.lib.reader.catch_library_error());
                self.lib.stop_converter().await;
                let reason = phrase
                    .map(reported)
                    .unwrap_or_else(|| match self.lib.last_exit_code() {
                        Some(code) => format!("converter exited with code {}", code),
                        None => "converter terminated abnormally".to_string(),
                    });
                self.finish_item(position, ConversionStatus::Failed, Some(reason));
            }
            ConverterState::Stopped => {
                self.finish_item(position, ConversionStatus::Stopped, Some("converter stopped".to_string()));
            }
            ConverterState::Idle | ConverterState::Starting | ConverterState::Running => {
                debug!("Run {} is {:?}", run, state);
                return None;
            }
        }
        Some(Flow::Next)
    }

    async fn on_command(&mut self, position: usize, command: DriverCommand) -> Option<Flow> {
        debug!("Command while converting item {}: {:?}", position, command);
        match command {
            DriverCommand::Pause => {
                if !self.paused {
                    self.paused = true;
                    self.set_state(DriverState::Paused);
                }
                None
            }
            DriverCommand::Resume => {
                if self.paused {
                    self.paused = false;
                    self.set_state(DriverState::Converting);
                }
                None
            }
            DriverCommand::SkipCurrent => {
                self.lib.stop_converter().await;
                self.finish_item(position, ConversionStatus::Stopped, Some("skipped by user".to_string()));
                Some(Flow::Next)
            }
            DriverCommand::Stop => {
                self.lib.stop_converter().await;
                Some(Flow::Halt { cancel: false })
            }
            DriverCommand::Cancel => {
                self.lib.stop_converter().await;
                Some(Flow::Halt { cancel: true })
            }
        }
    }

    /// Apply controls that arrived while no converter was running
    fn drain_commands(&mut self) -> Option<Flow> {
        while let Ok(command) = self.commands.try_recv() {
            match command {
                DriverCommand::Pause if !self.paused => {
                    self.paused = true;
                    self.set_state(DriverState::Paused);
                }
                DriverCommand::Resume if self.paused => {
                    self.paused = false;
                    self.set_state(DriverState::Converting);
                }
                DriverCommand::Stop => return Some(Flow::Halt { cancel: false }),
                DriverCommand::Cancel => return Some(Flow::Halt { cancel: true }),
                _ => {}
            }
        }
        None
    }

    /// Block between items until resumed, stopped or cancelled
    async fn wait_while_paused(&mut self) -> Flow {
        info!("Paused; waiting before the next item");
        while let Some(command) = self.commands.recv().await {
            match command {
                DriverCommand::Resume => {
                    self.paused = false;
                    self.set_state(DriverState::Converting);
                    return Flow::Next;
                }
                DriverCommand::Stop => return Flow::Halt { cancel: false },
                DriverCommand::Cancel => return Flow::Halt { cancel: true },
                DriverCommand::Pause | DriverCommand::SkipCurrent => {}
            }
        }
        Flow::Halt { cancel: false }
    }

    /// Mark the interrupted item stopped and the rest skipped, then go back to Ready
    fn halt(&mut self, current: Option<usize>) -> DriverState {
        if let Some(position) = current {
            self.finish_item(position, ConversionStatus::Stopped, Some("stopped by user".to_string()));
        }

        let remaining: Vec<usize> = self
            .queue
            .iter()
            .enumerate()
            .filter(|(_, item)| item.status == ConversionStatus::Todo)
            .map(|(position, _)| position)
            .collect();
        for position in remaining {
            self.finish_item(position, ConversionStatus::Skipped, None);
        }

        self.paused = false;
        self.set_state(DriverState::Stopped);
        self.set_state(DriverState::Ready);
        DriverState::Ready
    }

    fn remove_partial_output(&mut self, position: usize) {
        let Ok(item) = self.queue.get_file(position) else {
            return;
        };
        match item.delete_output(&self.options.output_dir, &self.preset, self.options.tagged_output) {
            Ok(true) => info!("Removed partial output of item {}", position),
            Ok(false) => {}
            Err(e) => warn!("Failed to remove partial output of item {}: {}", position, e),
        }
    }

    fn report_progress(&self, position: usize) {
        let Some(encoded_time) = self.lib.reader.encoded_time() else {
            return;
        };
        let Ok(item) = self.queue.get_file(position) else {
            return;
        };

        let duration = item.duration();
        let item_percent = percent(encoded_time, duration);
        let processed: f64 = self
            .queue
            .iter()
            .filter(|i| i.status.is_finished())
            .map(|i| i.duration())
            .sum();
        let total_percent = percent(processed + encoded_time.min(duration), self.queue.duration());

        self.emit(DriverEvent::Progress(Progress {
            position,
            encoded_time,
            item_percent,
            total_percent,
            speed: self.lib.reader.speed(),
        }));
    }

    fn finish_item(&mut self, position: usize, status: ConversionStatus, reason: Option<String>) {
        if let Ok(item) = self.queue.get_file_mut(position) {
            item.finish(status, reason.clone());
            match status {
                ConversionStatus::Done => info!("✅ Item {}: {} done", position, item.file_name()),
                ConversionStatus::Failed => warn!(
                    "❌ Item {}: {} failed: {}",
                    position,
                    item.file_name(),
                    reason.as_deref().unwrap_or("unknown error")
                ),
                _ => debug!("Item {}: {:?}", position, status),
            }
        }
        self.emit(DriverEvent::ItemFinished { position, status, reason });
    }

    fn set_state(&mut self, state: DriverState) {
        if self.state != state {
            debug!("Driver state {:?} -> {:?}", self.state, state);
            self.state = state;
            self.emit(DriverEvent::StateChanged(state));
        }
    }

    fn emit(&self, event: DriverEvent) {
        let _ = self.events.send(event);
    }
}

fn reported(phrase: &str) -> String {
    ConverterError::LibraryReportedFailure(phrase.to_string()).to_string()
}

fn percent(part: f64, whole: f64) -> f64 {
    if whole > 0.0 {
        (part / whole * 100.0).clamp(0.0, 100.0)
    } else {
        0.0
    }
}
