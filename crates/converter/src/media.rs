use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::MediaProbeError;
use crate::profile::Preset;
use crate::prober::{MediaInfo, Prober};

/// Fixed suffix appended to output names when tagged output is requested
pub const OUTPUT_TAG: &str = "converted";

/// Flags passed to the converter ahead of everything else
const GLOBAL_FLAGS: &[&str] = &["-hide_banner", "-y"];

/// Preset flags that carry a video filter chain
const VIDEO_FILTER_FLAGS: &[&str] = &["-vf", "-filter:v"];

/// Quote a path for use as a filter option value inside a filter graph.
///
/// Two levels apply: the option value escapes `\`, `:` and `'` with a
/// backslash, then the graph level wraps it in single quotes, where a literal
/// quote has to be written as `'\''`.
fn escape_filter_path(path: &Path) -> String {
    let mut value = String::new();
    for c in path.to_string_lossy().chars() {
        if matches!(c, '\\' | ':' | '\'') {
            value.push('\\');
        }
        value.push(c);
    }
    format!("'{}'", value.replace('\'', "'\\''"))
}

/// Conversion status of a queued item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ConversionStatus {
    Todo,
    Running,
    Done,
    Stopped,
    Skipped,
    Failed,
}

impl ConversionStatus {
    /// Whether the item reached an outcome in the current run
    pub fn is_finished(&self) -> bool {
        !matches!(self, ConversionStatus::Todo | ConversionStatus::Running)
    }
}

/// One source file in the queue
#[derive(Debug, Clone, Serialize)]
pub struct MediaItem {
    pub input_path: PathBuf,
    pub info: MediaInfo,
    /// Sibling `<stem>.srt` found next to the input
    pub subtitle_path: Option<PathBuf>,
    pub status: ConversionStatus,
    /// Why the item failed or stopped, if it did
    pub reason: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl MediaItem {
    pub fn new(input_path: PathBuf, info: MediaInfo) -> Self {
        let subtitle_path = Some(input_path.with_extension("srt")).filter(|p| p.is_file());
        Self {
            input_path,
            info,
            subtitle_path,
            status: ConversionStatus::Todo,
            reason: None,
            started_at: None,
            finished_at: None,
        }
    }

    /// Probe `input_path` and wrap it as a queue item
    pub fn probe(prober: &Prober, input_path: &Path) -> Result<Self, MediaProbeError> {
        let info = prober.probe(input_path)?;
        Ok(Self::new(input_path.to_path_buf(), info))
    }

    pub fn duration(&self) -> f64 {
        self.info.duration
    }

    pub fn format_name(&self) -> &str {
        &self.info.format_name
    }

    pub fn file_name(&self) -> String {
        self.input_path
            .file_name()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "Unknown".to_string())
    }

    /// `<output_dir>/<input-stem>[-tag]<extension>`
    pub fn output_path(&self, output_dir: &Path, preset: &Preset, tagged_output: bool) -> PathBuf {
        let stem = self
            .input_path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
        let name = if tagged_output {
            format!("{}-{}{}", stem, OUTPUT_TAG, preset.extension)
        } else {
            format!("{}{}", stem, preset.extension)
        };
        output_dir.join(name)
    }

    /// Assemble the converter argument vector for this item.
    ///
    /// Layout: global flags, input, preset tokens, output path. When burning
    /// subtitles (only if requested and a subtitle file was found) the
    /// subtitle filter is appended to the preset's own video filter chain, or
    /// given as a separate `-vf` ahead of the preset tokens if it has none.
    pub fn build_conversion_cmd(
        &self,
        output_dir: &Path,
        preset: &Preset,
        subtitle: bool,
        tagged_output: bool,
    ) -> Vec<String> {
        let mut args: Vec<String> = GLOBAL_FLAGS.iter().map(|s| s.to_string()).collect();

        args.push("-i".to_string());
        args.push(self.input_path.to_string_lossy().to_string());

        let mut tokens = preset.tokens();
        if let Some(srt) = self.subtitle_path.as_ref().filter(|_| subtitle) {
            let burn = format!("subtitles={}", escape_filter_path(srt));
            let chain = tokens
                .iter()
                .position(|t| VIDEO_FILTER_FLAGS.contains(&t.as_str()))
                .map(|flag| flag + 1)
                .filter(|&value| value < tokens.len());
            match chain {
                Some(value) => tokens[value] = format!("{},{}", tokens[value], burn),
                None => {
                    args.push("-vf".to_string());
                    args.push(burn);
                }
            }
        }

        args.extend(tokens);
        args.push(
            self.output_path(output_dir, preset, tagged_output)
                .to_string_lossy()
                .to_string(),
        );

        args
    }

    /// Remove the file a previous conversion produced. Returns whether a file
    /// was removed; a missing file is not an error.
    pub fn delete_output(&self, output_dir: &Path, preset: &Preset, tagged_output: bool) -> std::io::Result<bool> {
        let path = self.output_path(output_dir, preset, tagged_output);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Mark the item as converting
    pub fn start(&mut self) {
        self.status = ConversionStatus::Running;
        self.reason = None;
        self.started_at = Some(Utc::now());
        self.finished_at = None;
    }

    /// Record the item's outcome
    pub fn finish(&mut self, status: ConversionStatus, reason: Option<String>) {
        self.status = status;
        self.reason = reason;
        self.finished_at = Some(Utc::now());
    }

    /// Put the item back in the runnable state
    pub fn reset(&mut self) {
        self.status = ConversionStatus::Todo;
        self.reason = None;
        self.started_at = None;
        self.finished_at = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn item(path: &str) -> MediaItem {
        MediaItem::new(
            PathBuf::from(path),
            MediaInfo { duration: 30.0, format_name: "mpeg".to_string() },
        )
    }

    fn flv() -> Preset {
        Preset {
            name: "FLV Fullscreen 320x240 (4:3)".to_string(),
            params: "-f flv -vcodec flv -s 320x240 -b:v 400k".to_string(),
            extension: ".flv".to_string(),
        }
    }

    #[test]
    fn test_output_path() {
        let it = item("/videos/Dad.mpg");
        assert_eq!(it.output_path(Path::new("/out"), &flv(), false), PathBuf::from("/out/Dad.flv"));
        assert_eq!(
            it.output_path(Path::new("/out"), &flv(), true),
            PathBuf::from("/out/Dad-converted.flv")
        );
    }

    #[test]
    fn test_conversion_cmd_layout() {
        let cmd = item("/videos/Dad.mpg").build_conversion_cmd(Path::new("."), &flv(), false, true);
        assert_eq!(&cmd[..4], &["-hide_banner", "-y", "-i", "/videos/Dad.mpg"]);
        assert_eq!(&cmd[4..6], &["-f", "flv"]);
        assert_eq!(cmd.last().map(String::as_str), Some("./Dad-converted.flv"));
    }

    #[test]
    fn test_subtitle_flags_need_subtitle_file() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("clip.mpg");
        std::fs::write(&input, b"").unwrap();
        std::fs::write(dir.path().join("clip.srt"), b"1\n00:00:00,000 --> 00:00:01,000\nhi\n").unwrap();

        let with_srt = item(input.to_str().unwrap());
        let cmd = with_srt.build_conversion_cmd(dir.path(), &flv(), true, false);
        let vf = cmd.iter().position(|a| a == "-vf").unwrap();
        assert!(cmd[vf + 1].starts_with("subtitles='"));
        assert!(vf < cmd.iter().position(|a| a == "flv").unwrap());

        let without_srt = item("/videos/none.mpg");
        let cmd = without_srt.build_conversion_cmd(dir.path(), &flv(), true, false);
        assert!(!cmd.contains(&"-vf".to_string()));
    }

    #[test]
    fn test_subtitle_path_is_escaped() {
        assert_eq!(escape_filter_path(Path::new("/v/clip.srt")), "'/v/clip.srt'");
        assert_eq!(
            escape_filter_path(Path::new("/v/Ep 1: Pilot's.srt")),
            r"'/v/Ep 1\: Pilot\'\''s.srt'"
        );
        assert_eq!(escape_filter_path(Path::new(r"C:\v\a.srt")), r"'C\:\\v\\a.srt'");
    }

    #[test]
    fn test_subtitles_join_preset_filter_chain() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("Ep 1: Pilot's.mpg");
        std::fs::write(&input, b"").unwrap();
        std::fs::write(dir.path().join("Ep 1: Pilot's.srt"), b"").unwrap();
        let it = item(input.to_str().unwrap());
        let srt = escape_filter_path(&dir.path().join("Ep 1: Pilot's.srt"));

        let scaled = Preset {
            name: "Scaled".to_string(),
            params: "-vf scale=320:240 -f flv".to_string(),
            extension: ".flv".to_string(),
        };
        let cmd = it.build_conversion_cmd(dir.path(), &scaled, true, false);
        let vfs: Vec<usize> = cmd.iter().enumerate().filter(|(_, a)| *a == "-vf").map(|(i, _)| i).collect();
        assert_eq!(vfs.len(), 1);
        assert_eq!(cmd[vfs[0] + 1], format!("scale=320:240,subtitles={}", srt));

        let filtered = Preset {
            params: "-filter:v fps=25 -f flv".to_string(),
            ..scaled.clone()
        };
        let cmd = it.build_conversion_cmd(dir.path(), &filtered, true, false);
        assert!(!cmd.contains(&"-vf".to_string()));
        let fv = cmd.iter().position(|a| a == "-filter:v").unwrap();
        assert_eq!(cmd[fv + 1], format!("fps=25,subtitles={}", srt));

        let plain = it.build_conversion_cmd(dir.path(), &scaled, false, false);
        assert!(plain.contains(&"scale=320:240".to_string()));
    }

    #[test]
    fn test_delete_output() {
        let dir = tempfile::tempdir().unwrap();
        let it = item("/videos/Dad.mpg");
        assert!(!it.delete_output(dir.path(), &flv(), true).unwrap());

        let produced = it.output_path(dir.path(), &flv(), true);
        std::fs::write(&produced, b"flv").unwrap();
        assert!(it.delete_output(dir.path(), &flv(), true).unwrap());
        assert!(!produced.exists());
    }

    #[test]
    fn test_status_lifecycle() {
        let mut it = item("/videos/Dad.mpg");
        assert!(!it.status.is_finished());
        it.start();
        assert_eq!(it.status, ConversionStatus::Running);
        it.finish(ConversionStatus::Failed, Some("Unknown encoder".to_string()));
        assert!(it.status.is_finished());
        assert!(it.finished_at.is_some());
        it.reset();
        assert_eq!(it.status, ConversionStatus::Todo);
        assert!(it.reason.is_none());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// Same inputs give the same vector; tagging changes only the output path
        #[test]
        fn test_conversion_cmd_is_deterministic(
            stem in "[A-Za-z0-9_]{1,12}",
            params in prop::collection::vec("-?[a-z0-9:]{1,6}", 1..10),
            subtitle in prop::bool::ANY,
        ) {
            let it = item(&format!("/media/{}.avi", stem));
            let preset = Preset {
                name: "Custom".to_string(),
                params: params.join(" "),
                extension: ".mkv".to_string(),
            };
            let out = Path::new("/out");

            let plain = it.build_conversion_cmd(out, &preset, subtitle, false);
            prop_assert_eq!(&plain, &it.build_conversion_cmd(out, &preset, subtitle, false));

            let tagged = it.build_conversion_cmd(out, &preset, subtitle, true);
            prop_assert_eq!(plain.len(), tagged.len());
            let last = plain.len() - 1;
            prop_assert_eq!(&plain[..last], &tagged[..last]);
            prop_assert_ne!(&plain[last], &tagged[last]);
        }
    }
}
