//! Shell stand-ins for the converter and prober binaries.
//!
//! Behavior is keyed on markers in the file names passed to them:
//! `__broken__` fails probing, `__bad__` makes the converter report an
//! unknown encoder, `__slow__` keeps it running until it reads 'q', and
//! `__nostdin__` ignores 'q' but exits on SIGTERM, `__stubborn__` ignores
//! both, and `__orphan__` exits while a background child keeps the output
//! pipes open and writes to them later.

#![allow(dead_code)]

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use converter::{ConverterConfig, MediaQueue, Preset};
use tempfile::TempDir;

const FAKE_CONVERTER: &str = r#"#!/bin/sh
if [ "$1" = "-version" ]; then
    echo "ffmpeg version 6.1.1-fake Copyright (c) 2000-2023 the FFmpeg developers"
    exit 0
fi
for last; do :; done
case "$*" in
    *__bad__*)
        echo "[NULL @ 0x5581a0] Unknown encoder 'libnope'" >&2
        exit 1
        ;;
    *__stubborn__*)
        trap '' TERM
        exec sleep 30
        ;;
    *__nostdin__*)
        trap 'exit 143' TERM
        while :; do sleep 0.1; done
        ;;
    *__orphan__*)
        ( sleep 2; echo "Unknown encoder 'late'" >&2 ) &
        echo "frame=   25 fps=0.0 q=2.0 size=      64kB time=00:00:01.00 bitrate= 524.3kbits/s speed=5x" >&2
        exit 0
        ;;
    *__slow__*)
        echo "frame=   12 fps=0.0 q=2.0 size=      64kB time=00:00:00.40 bitrate=1310.7kbits/s speed=0.8x" >&2
        echo partial > "$last"
        cat > /dev/null
        exit 255
        ;;
esac
echo "frame=  250 fps=0.0 q=2.0 size=     512kB time=00:00:05.00 bitrate= 838.9kbits/s speed=10x" >&2
echo "frame=  500 fps=0.0 q=2.0 size=    1024kB time=00:00:10.00 bitrate= 838.9kbits/s speed=10x" >&2
echo converted > "$last"
exit 0
"#;

const FAKE_PROBER: &str = r#"#!/bin/sh
for last; do :; done
case "$last" in
    *__broken__*)
        echo "$last: Invalid data found when processing input" >&2
        exit 1
        ;;
esac
echo "duration=10.000000"
echo "format_name=mpeg"
"#;

pub struct Fixture {
    pub dir: TempDir,
    pub cfg: ConverterConfig,
}

impl Fixture {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let bin = dir.path().join("bin");
        let out = dir.path().join("out");
        std::fs::create_dir(&bin).unwrap();
        std::fs::create_dir(&out).unwrap();

        let converter_bin = install_script(&bin, "ffmpeg", FAKE_CONVERTER);
        let prober_bin = install_script(&bin, "ffprobe", FAKE_PROBER);

        let cfg = ConverterConfig {
            converter_bin: Some(converter_bin),
            prober_bin: Some(prober_bin),
            install_dirs: Vec::new(),
            output_dir: out,
            profiles_path: dir.path().join("profiles.xml"),
            stop_grace_ms: 500,
            ..ConverterConfig::default()
        };
        Self { dir, cfg }
    }

    pub fn input(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    pub fn output(&self, stem: &str) -> PathBuf {
        self.cfg.output_dir.join(format!("{}.flv", stem))
    }

    /// Queue probed through the fake prober
    pub fn queue(&self, names: &[&str]) -> MediaQueue {
        let prober = converter::Prober::new(self.cfg.prober_bin.clone().unwrap());
        let mut queue = MediaQueue::new(prober);
        let paths: Vec<PathBuf> = names.iter().map(|n| self.input(n)).collect();
        for event in queue.populate(paths) {
            assert_eq!(event.outcome, converter::PopulateOutcome::Added, "{:?}", event.path);
        }
        queue
    }
}

pub fn preset() -> Preset {
    Preset {
        name: "FLV Fullscreen 320x240 (4:3)".to_string(),
        params: "-f flv -vcodec flv -s 320x240 -b:v 400k".to_string(),
        extension: ".flv".to_string(),
    }
}

/// Argument vector shaped like a real conversion of `input` to `output`
pub fn conversion_args(input: &Path, output: &Path) -> Vec<String> {
    let mut args = vec!["-hide_banner".to_string(), "-y".to_string(), "-i".to_string()];
    args.push(input.to_string_lossy().to_string());
    args.extend(preset().tokens());
    args.push(output.to_string_lossy().to_string());
    args
}

fn install_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, body).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}
