//! Rewind - replay validation tool
//!
//! # Usage
//!
//! ```bash
//! # Record a demo replay with the reference simulation
//! rewind --record-demo skirmish --frames 3000
//!
//! # Validate one replay without pacing
//! rewind --headless --replay skirmish.rep
//!
//! # Validate every replay, four worker processes at a time
//! rewind --headless --jobs 4 --replay '*.rep'
//!
//! # Inspect
//! rewind --info --replay skirmish.rep
//! rewind --analyze --replay skirmish.rep
//! ```
//!
//! Exits with 0 when every replay played back in sync, 1 otherwise.

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser};
use std::io::{IsTerminal, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use rewind_core::batch::{BatchOptions, BatchOrchestrator, SelfLauncher, resolve_wildcards};
use rewind_core::config;
use rewind_core::replay::{REPLAY_EXTENSION, RecorderSession, ReplayRunner, SessionConfig};
use rewind_player::inspect;
use rewind_player::{DemoOptions, ReferenceSimulation, record_demo, version};

/// Rewind - record, inspect and validate replays
#[derive(Parser, Debug)]
#[command(name = "rewind")]
#[command(about = "Record, inspect and validate deterministic replays")]
#[command(version)]
struct Cli {
    /// Replay to play; repeatable, `*` and `?` allowed in the file name
    #[arg(long = "replay", value_name = "FILE", value_parser = parse_replay_name)]
    replays: Vec<String>,

    /// Worker processes for a batch; omitted or -1 plays in this process
    #[arg(long, value_name = "N", allow_negative_numbers = true)]
    jobs: Option<i32>,

    /// Logic-only playback with progress lines
    #[arg(long)]
    headless: bool,

    /// Run windowed (passed on to worker processes)
    #[arg(long)]
    windowed: bool,

    /// Directory replays are read from and written to
    #[arg(long, value_name = "DIR")]
    replay_dir: Option<PathBuf>,

    /// Configuration file (default: platform config dir)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Print replay headers
    #[arg(long, conflicts_with_all = ["analyze", "record_demo"])]
    info: bool,

    /// Decode and list every command of the replays
    #[arg(long, conflicts_with = "record_demo")]
    analyze: bool,

    /// Record a demo replay with the reference simulation
    #[arg(long, value_name = "NAME")]
    record_demo: Option<String>,

    /// Frames to simulate for --record-demo
    #[arg(long, default_value_t = 1800, requires = "record_demo")]
    frames: u32,

    /// Seed for --record-demo
    #[arg(long, default_value_t = 1, requires = "record_demo")]
    seed: u32,

    /// Record the demo as a networked game
    #[arg(long, requires = "record_demo")]
    multiplayer: bool,

    /// Corrupt the first recorded checksum at or after FRAME
    #[arg(long, value_name = "FRAME", requires = "record_demo")]
    inject_desync: Option<u32>,
}

fn parse_replay_name(value: &str) -> Result<String, String> {
    let has_extension = std::path::Path::new(value)
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case(REPLAY_EXTENSION));
    if has_extension {
        Ok(value.to_string())
    } else {
        Err(format!("replay files must end in .{REPLAY_EXTENSION}"))
    }
}

fn main() -> Result<ExitCode> {
    // Logs go to stderr; stdout carries replay output
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .with_ansi(std::io::stderr().is_terminal())
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => config::load_from(path),
        None => config::load(),
    };
    let replay_dir = cli
        .replay_dir
        .clone()
        .unwrap_or_else(|| config.replay.replay_dir.clone());

    let session_config = SessionConfig {
        replay_dir: replay_dir.clone(),
        instance_id: config.replay.instance_id,
        version: version::current(&config),
    };
    let recorder = RecorderSession::new(session_config);
    let mut stdout = std::io::stdout().lock();

    if let Some(name) = &cli.record_demo {
        let options = DemoOptions {
            frames: cli.frames,
            seed: cli.seed,
            multiplayer: cli.multiplayer,
            inject_desync: cli.inject_desync,
            ..DemoOptions::default()
        };
        let (_, path) = record_demo(recorder, name, &options)
            .with_context(|| format!("recording demo {name}"))?;
        writeln!(stdout, "{}", path.display())?;
        return Ok(ExitCode::SUCCESS);
    }

    if cli.replays.is_empty() {
        Cli::command().print_help()?;
        return Ok(ExitCode::from(2));
    }

    if cli.info {
        return print_info(&recorder, &cli.replays, &mut stdout);
    }

    let mut runner = ReplayRunner::new(
        recorder,
        ReferenceSimulation::new(),
        config.batch.runner_config(cli.headless),
    );

    if cli.analyze {
        let mut failed = false;
        for name in resolve_wildcards(&cli.replays, &replay_dir) {
            writeln!(stdout, "{name}")?;
            match runner.analyze(&name) {
                Ok(commands) => inspect::write_commands(&mut stdout, &commands)?,
                Err(e) => {
                    tracing::error!(replay = %name, "cannot analyze replay: {:#}", e);
                    writeln!(stdout, "Cannot open replay")?;
                    failed = true;
                }
            }
        }
        return Ok(exit_code(failed));
    }

    let mut launcher = SelfLauncher::current(cli.windowed, cli.headless)
        .context("locating the running executable")?;
    launcher.replay_dir = Some(replay_dir.clone());
    launcher.config = cli.config.clone();

    let orchestrator = BatchOrchestrator::new(BatchOptions {
        concurrency: config.batch.concurrency(cli.jobs),
        poll_interval: config.batch.poll_interval(),
        replay_dir,
    });
    let summary = orchestrator.run(&cli.replays, &mut runner, &launcher, &mut stdout)?;
    Ok(ExitCode::from(summary.exit_code() as u8))
}

fn print_info(
    recorder: &RecorderSession,
    names: &[String],
    out: &mut dyn Write,
) -> Result<ExitCode> {
    let mut failed = false;
    for name in resolve_wildcards(names, recorder.replay_dir()) {
        let path = recorder.resolve_replay_path(&name);
        match RecorderSession::read_replay_header(&path) {
            Ok(header) => inspect::write_header(out, &name, &header)?,
            Err(e) => {
                writeln!(out, "{name}: {e}")?;
                failed = true;
            }
        }
    }
    Ok(exit_code(failed))
}

fn exit_code(failed: bool) -> ExitCode {
    if failed {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}
