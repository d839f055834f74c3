use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use converter::{
    config::{CollisionPolicy, ConverterConfig},
    scan, ConversionDriver, ConversionLib, ConversionStatus, DriverEvent, DriverHandle, DriverState,
    MediaQueue, PopulateOutcome, Preset, ProfileStore,
};
use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use serde::Serialize;
use std::io::Write;
use std::path::PathBuf;
use tokio::sync::mpsc::UnboundedReceiver;

/// Batch media conversion through ffmpeg presets
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file (JSON or TOML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Convert files (or every media file under the given directories)
    Convert {
        /// Preset (target quality) name, e.g. "MP4 High Quality"
        #[arg(short, long)]
        preset: String,

        /// Directory that receives converted files
        #[arg(short, long)]
        output_dir: Option<PathBuf>,

        /// Burn in a sibling .srt subtitle file when one exists
        #[arg(long)]
        subtitles: bool,

        /// Append "-converted" to output file names
        #[arg(long)]
        tag: bool,

        /// Fail items whose output file already exists instead of overwriting
        #[arg(long)]
        no_overwrite: bool,

        /// Print the final summary as JSON
        #[arg(long)]
        json: bool,

        #[arg(required = true)]
        inputs: Vec<PathBuf>,
    },
    /// Report duration and container of media files
    Probe {
        #[arg(long)]
        json: bool,

        #[arg(required = true)]
        inputs: Vec<PathBuf>,
    },
    /// Manage conversion presets
    Profiles {
        #[command(subcommand)]
        command: ProfilesCommand,
    },
    /// Show the resolved converter binaries and version
    Version,
}

#[derive(Subcommand, Debug)]
enum ProfilesCommand {
    /// List format families, or the presets of one family
    List { profile: Option<String> },
    /// Add a user preset
    Add {
        /// Format family, e.g. "MP4"
        name: String,
        /// Preset (target quality) name
        preset: String,
        /// Converter parameters
        params: String,
        /// Output file extension, including the leading dot
        extension: String,
    },
    /// Remove a user preset
    Remove { preset: String },
}

/// One row of the final report
#[derive(Debug, Serialize)]
struct ItemSummary {
    input: PathBuf,
    output: PathBuf,
    status: ConversionStatus,
    reason: Option<String>,
    duration_secs: f64,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
struct RunSummary {
    preset: String,
    state: Option<DriverState>,
    items: Vec<ItemSummary>,
    invalid: Vec<converter::InvalidFile>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();

    // RUST_LOG wins; otherwise info, or debug with --verbose
    let default_level = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .format_timestamp_secs()
        .init();

    let cfg = ConverterConfig::load_config(args.config.as_deref())
        .context("Failed to load configuration")?;
    debug!("Configuration: {:?}", cfg);

    match args.command {
        Command::Convert { preset, output_dir, subtitles, tag, no_overwrite, json, inputs } => {
            let mut cfg = cfg;
            if let Some(dir) = output_dir {
                cfg.output_dir = dir;
            }
            cfg.subtitles |= subtitles;
            cfg.tagged_output |= tag;
            if no_overwrite {
                cfg.collision_policy = CollisionPolicy::Fail;
            }
            convert(&cfg, &preset, &inputs, json).await
        }
        Command::Probe { json, inputs } => probe(&cfg, &inputs, json),
        Command::Profiles { command } => profiles(&cfg, command),
        Command::Version => version(&cfg).await,
    }
}

fn load_store(cfg: &ConverterConfig) -> Result<ProfileStore> {
    let mut store = ProfileStore::new(&cfg.profiles_path);
    store
        .load()
        .with_context(|| format!("Failed to load profiles from {}", cfg.profiles_path.display()))?;
    Ok(store)
}

async fn convert(cfg: &ConverterConfig, preset_name: &str, inputs: &[PathBuf], json: bool) -> Result<()> {
    let store = load_store(cfg)?;
    let preset: Preset = store.preset(preset_name)?.clone();

    let mut lib = ConversionLib::new(cfg);
    let prober = lib.prober().context("Cannot probe input files")?;
    info!("Converter: {}", lib.library_path()?.display());

    let files = scan::collect_media_files(inputs);
    let mut queue = MediaQueue::new(prober);
    for event in queue.populate(files) {
        match &event.outcome {
            PopulateOutcome::Added => {
                info!("[{}/{}] Queued {}", event.done, event.total, event.path.display())
            }
            PopulateOutcome::Duplicate => {
                debug!("[{}/{}] Already queued {}", event.done, event.total, event.path.display())
            }
            PopulateOutcome::Invalid(_) => {}
        }
    }
    let invalid = queue.take_invalid_files();
    for file in &invalid {
        warn!("⚠️  Not a usable media file: {} ({})", file.path.display(), file.reason);
    }
    if queue.is_empty() {
        bail!("No convertible files among {} input(s)", inputs.len());
    }

    std::fs::create_dir_all(&cfg.output_dir)
        .with_context(|| format!("Failed to create output directory: {}", cfg.output_dir.display()))?;

    info!(
        "Converting {} file(s) ({:.0}s of media) with {:?} into {}",
        queue.length(),
        queue.duration(),
        preset.name,
        cfg.output_dir.display()
    );

    let options = cfg.conversion_options();
    let (mut driver, events) = ConversionDriver::new(&mut lib, &mut queue, preset.clone(), options.clone());
    let handle = driver.handle();
    let (result, state) = tokio::join!(driver.run(), render(events, handle));
    drop(driver);

    let summary = RunSummary {
        preset: preset.name.clone(),
        state,
        items: queue
            .iter()
            .map(|item| ItemSummary {
                input: item.input_path.clone(),
                output: item.output_path(&options.output_dir, &preset, options.tagged_output),
                status: item.status,
                reason: item.reason.clone(),
                duration_secs: item.duration(),
                started_at: item.started_at,
                finished_at: item.finished_at,
            })
            .collect(),
        invalid,
    };
    print_summary(&summary, json)?;

    result.context("Conversion aborted")?;
    if summary.items.iter().any(|i| i.status == ConversionStatus::Failed) {
        bail!("Some files failed to convert");
    }
    Ok(())
}

/// Show driver progress until it settles; Ctrl-C cancels the queue.
async fn render(mut events: UnboundedReceiver<DriverEvent>, handle: DriverHandle) -> Option<DriverState> {
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut cancelled = false;

    loop {
        tokio::select! {
            event = events.recv() => {
                let event = event?;
                match event {
                    DriverEvent::StateChanged(state) => {
                        debug!("Driver is {:?}", state);
                        if matches!(state, DriverState::Finished | DriverState::Ready | DriverState::Error) {
                            eprintln!();
                            return Some(state);
                        }
                    }
                    DriverEvent::ItemStarted { position } => debug!("Started item {}", position),
                    DriverEvent::Progress(p) => {
                        let speed = p.speed.map(|s| format!(" {:.2}x", s)).unwrap_or_default();
                        eprint!(
                            "\r  item {}: {:5.1}%  total: {:5.1}%{}   ",
                            p.position, p.item_percent, p.total_percent, speed
                        );
                        let _ = std::io::stderr().flush();
                    }
                    DriverEvent::ItemFinished { position, status, reason } => {
                        eprintln!();
                        match status {
                            ConversionStatus::Failed => {
                                error!("❌ Item {} failed: {}", position, reason.as_deref().unwrap_or("unknown error"))
                            }
                            _ => debug!("Item {} finished: {:?}", position, status),
                        }
                    }
                }
            }
            res = &mut ctrl_c, if !cancelled => {
                cancelled = true;
                match res {
                    Ok(()) => {
                        warn!("Interrupted, cancelling the queue");
                        handle.cancel();
                    }
                    Err(e) => warn!("Cannot listen for Ctrl-C: {}", e),
                }
            }
        }
    }
}

fn print_summary(summary: &RunSummary, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(summary)?);
        return Ok(());
    }

    println!("Preset: {}", summary.preset);
    for item in &summary.items {
        let took = match (item.started_at, item.finished_at) {
            (Some(start), Some(end)) => format!(" in {}s", (end - start).num_seconds()),
            _ => String::new(),
        };
        println!(
            "  {:<8} {} -> {}{}",
            format!("{:?}", item.status),
            item.input.display(),
            item.output.display(),
            took
        );
        if let Some(reason) = &item.reason {
            println!("           {}", reason);
        }
    }
    for file in &summary.invalid {
        println!("  {:<8} {} ({})", "Invalid", file.path.display(), file.reason);
    }

    let done = summary.items.iter().filter(|i| i.status == ConversionStatus::Done).count();
    println!("{} of {} file(s) converted", done, summary.items.len());
    Ok(())
}

fn probe(cfg: &ConverterConfig, inputs: &[PathBuf], json: bool) -> Result<()> {
    let prober = ConversionLib::new(cfg).prober().context("Cannot probe input files")?;

    let mut queue = MediaQueue::new(prober);
    queue.populate(scan::collect_media_files(inputs)).for_each(drop);
    let invalid = queue.take_invalid_files();

    if json {
        let probed: Vec<_> = queue.iter().map(|i| (&i.input_path, &i.info)).collect();
        let report = serde_json::json!({ "files": probed, "invalid": invalid });
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    for item in queue.iter() {
        println!("{}: {:.2}s, {}", item.input_path.display(), item.duration(), item.format_name());
    }
    for file in &invalid {
        println!("{}: invalid ({})", file.path.display(), file.reason);
    }
    Ok(())
}

fn profiles(cfg: &ConverterConfig, command: ProfilesCommand) -> Result<()> {
    let mut store = load_store(cfg)?;

    match command {
        ProfilesCommand::List { profile: Some(profile) } => {
            let presets = store.presets(&profile);
            if presets.is_empty() {
                bail!("Unknown profile: {}", profile);
            }
            for name in presets {
                let preset = store.preset(name)?;
                println!("{}  [{}]  {}", preset.name, preset.extension, preset.params);
            }
        }
        ProfilesCommand::List { profile: None } => {
            for profile in store.profiles() {
                println!("{}", profile);
                for name in store.presets(profile) {
                    println!("  {}", name);
                }
            }
        }
        ProfilesCommand::Add { name, preset, params, extension } => {
            store.add_profile(&name, &preset, &params, &extension)?;
            store.save()?;
            info!("✅ Added {:?} to {}", preset, store.user_path().display());
        }
        ProfilesCommand::Remove { preset } => {
            store.delete_profile(&preset)?;
            store.save()?;
            info!("Removed {:?}", preset);
        }
    }
    Ok(())
}

async fn version(cfg: &ConverterConfig) -> Result<()> {
    let lib = ConversionLib::new(cfg);
    let path = lib.library_path()?;
    let v = lib.library_version().await?;
    println!("converter: {} ({}.{}.{})", path.display(), v.major, v.minor, v.patch);
    match lib.prober_path() {
        Ok(p) => println!("prober:    {}", p.display()),
        Err(e) => println!("prober:    {}", e),
    }
    Ok(())
}
