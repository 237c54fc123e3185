use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use nanoenc::{
    cleanup::{self, RemovalMode},
    health::{self, FfmpegSsim, SampleMode},
    scan, Dispatcher, FfmpegEncoder, FfprobeProbe, NanoConfig, NanoError, Preset, Tune,
};
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use chrono::Local;
use log::{error, info, warn, LevelFilter};

/// Batch-transcode a video library to HEVC, verify it, then replace the originals
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
    /// Encode every original that has no optimized version yet
    Optimize {
        directory: PathBuf,

        /// Constant rate factor (0-51, lower is better quality)
        #[arg(long, value_parser = clap::value_parser!(u8).range(0..=51))]
        crf: Option<u8>,

        /// x265 speed preset
        #[arg(long)]
        preset: Option<Preset>,

        /// x265 tuning profile
        #[arg(long)]
        tune: Option<Tune>,

        /// Scale to this height, keeping the aspect ratio
        #[arg(long)]
        downscale: Option<u32>,

        /// Encoder thread count (0 lets the encoder decide)
        #[arg(long)]
        threads: Option<u32>,

        /// Number of files encoded in parallel
        #[arg(short, long)]
        workers: Option<usize>,

        /// Encode sources that are already HEVC
        #[arg(long)]
        force: bool,

        /// Stop starting new encodes once an output is larger than its input
        #[arg(long)]
        halt_on_increase: bool,
    },
    /// Compare a random sample of originals with their optimized versions
    Health {
        directory: PathBuf,

        /// Fraction of pairs to check
        #[arg(long)]
        sample_ratio: Option<f64>,

        /// Check every pair
        #[arg(long, conflicts_with = "sample_ratio")]
        all: bool,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Remove originals that have an optimized version
    Purge {
        directory: PathBuf,

        /// Delete instead of moving to the trash
        #[arg(short, long)]
        permanent: bool,

        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
    /// Strip the optimized marker from finished files
    Untag {
        directory: PathBuf,

        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
}

impl Command {
    fn directory(&self) -> &Path {
        match self {
            Command::Optimize { directory, .. }
            | Command::Health { directory, .. }
            | Command::Purge { directory, .. }
            | Command::Untag { directory, .. } => directory,
        }
    }

    /// Commands that race Ctrl-C against their ffmpeg children.
    ///
    /// The others prompt on stdin and keep the default SIGINT handler.
    fn spawns_ffmpeg(&self) -> bool {
        matches!(self, Command::Optimize { .. } | Command::Health { .. })
    }

    /// Fold command-line overrides into the loaded configuration
    fn apply(&self, cfg: &mut NanoConfig) {
        match self {
            Command::Optimize {
                crf,
                preset,
                tune,
                downscale,
                threads,
                workers,
                force,
                halt_on_increase,
                ..
            } => {
                if let Some(crf) = crf {
                    cfg.encode.crf = *crf;
                }
                if let Some(preset) = preset {
                    cfg.encode.preset = *preset;
                }
                if tune.is_some() {
                    cfg.encode.tune = *tune;
                }
                if downscale.is_some() {
                    cfg.encode.downscale = *downscale;
                }
                if let Some(threads) = threads {
                    cfg.encode.threads = *threads;
                }
                if let Some(workers) = workers {
                    cfg.workers = *workers;
                }
                cfg.force_encode |= *force;
                cfg.halt_on_regression |= *halt_on_increase;
            }
            Command::Health { sample_ratio: Some(ratio), .. } => cfg.sample_ratio = *ratio,
            _ => {}
        }
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();

    // RUST_LOG wins unless --verbose is given
    let mut logger = env_logger::Builder::from_default_env();
    logger.format_timestamp_secs();
    if std::env::var_os("RUST_LOG").is_none() {
        logger.filter_level(LevelFilter::Info);
    }
    if args.verbose {
        logger.filter_level(LevelFilter::Debug);
    }
    logger.init();

    let mut cfg = NanoConfig::load_config(args.config.as_deref())
        .context("Failed to load configuration")?;
    args.command.apply(&mut cfg);
    cfg.validate().context("Invalid configuration")?;

    let directory = args.command.directory();
    scan::validate_directory(directory)?;

    if args.command.spawns_ffmpeg() {
        tokio::select! {
            code = run(&args.command, &cfg, directory) => code,
            _ = tokio::signal::ctrl_c() => {
                warn!("Interrupted, stopping running ffmpeg processes");
                Ok(ExitCode::from(130))
            }
        }
    } else {
        run(&args.command, &cfg, directory).await
    }
}

async fn run(command: &Command, cfg: &NanoConfig, directory: &Path) -> Result<ExitCode> {
    let scan = scan::scan_directory(cfg, directory)?;

    match command {
        Command::Optimize { .. } => {
            let encoder = Arc::new(FfmpegEncoder::new(cfg));
            let probe = Arc::new(FfprobeProbe::new(&cfg.ffprobe_bin));
            let summary = Dispatcher::new(cfg, encoder, Some(probe)).run(&scan).await;
            println!("{}", summary.render());
            for (identity, e) in summary.failures() {
                error!("{}: {}", identity, e);
            }
            Ok(exit_code(summary.is_success()))
        }
        Command::Health { all, json, .. } => {
            let mode = if *all { SampleMode::All } else { SampleMode::Ratio(cfg.sample_ratio) };
            let analyzer = FfmpegSsim::new(&cfg.ffmpeg_bin);
            let probe = FfprobeProbe::new(&cfg.ffprobe_bin);
            let mut rng = rand::thread_rng();
            let report = health::check_health(&scan, mode, &analyzer, Some(&probe), &mut rng).await?;
            if *json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!(
                    "Health check of {} at {}",
                    scan.root.display(),
                    report.generated_at.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S")
                );
                println!("{}", report.render());
            }
            Ok(exit_code(report.unmeasured() == 0))
        }
        Command::Purge { permanent, yes, .. } => {
            let mode = if *permanent { RemovalMode::Permanent } else { RemovalMode::Trash };
            let remover = mode.remover();
            let result = cleanup::purge(&scan, mode, *yes, remover.as_ref(), |plan| {
                confirm(plan.prompt(), &plan.listing())
            });
            match result {
                Ok(report) => Ok(exit_code(report.is_success())),
                Err(e) => declined_or_fatal(e),
            }
        }
        Command::Untag { yes, .. } => {
            let result = cleanup::untag(&scan, *yes, |plan| {
                confirm("Remove the optimized marker from these files?", &plan.listing())
            });
            match result {
                Ok(report) => Ok(exit_code(report.is_success())),
                Err(e) => declined_or_fatal(e),
            }
        }
    }
}

fn exit_code(success: bool) -> ExitCode {
    if success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

fn declined_or_fatal(e: NanoError) -> Result<ExitCode> {
    match e {
        NanoError::ConfirmationDeclined => {
            info!("Nothing was changed");
            Ok(ExitCode::FAILURE)
        }
        NanoError::PreconditionViolation(_) => {
            error!("{}", e);
            Ok(ExitCode::FAILURE)
        }
        other => Err(other.into()),
    }
}

/// Show `items` and ask a [y/N] question on stdin
fn confirm(prompt: &str, items: &[String]) -> bool {
    for item in items {
        println!("  {}", item);
    }
    print!("{} [y/N] ", prompt);
    if io::stdout().flush().is_err() {
        return false;
    }
    let mut answer = String::new();
    match io::stdin().lock().read_line(&mut answer) {
        Ok(_) => matches!(answer.trim().to_lowercase().as_str(), "y" | "yes"),
        Err(_) => false,
    }
}
