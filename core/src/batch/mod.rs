//! Batch replay validation
//!
//! Runs a list of replays either one after another in this process, or
//! fanned out over a bounded pool of worker processes that each re-invoke
//! this executable on a single replay. Worker output is reported in launch
//! order, whatever order the workers finish in.

mod wildcard;


pub use wildcard::{has_wildcards, resolve_wildcards, wildcard_match};

use anyhow::Result;
use std::collections::VecDeque;
use std::io::{self, Write};
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::process::Command;
use std::time::{Duration, Instant};

use crate::replay::runtime::ReplayOutcome;
use crate::worker::WorkerProcess;

/// Default delay between worker polls
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// How replays of a batch are distributed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Concurrency {
    /// Run every replay in this process
    Sequential,
    /// Run each replay in its own worker process, at most N at a time
    Workers(NonZeroUsize),
}

impl Concurrency {
    /// Interpret a `--jobs` value; missing or below 1 means sequential.
    pub fn from_jobs(jobs: Option<i32>) -> Self {
        jobs.and_then(|j| usize::try_from(j).ok())
            .and_then(NonZeroUsize::new)
            .map_or(Self::Sequential, Self::Workers)
    }
}

/// Runs one replay inside this process.
pub trait ReplaySimulator {
    /// Play `name`, writing user-facing progress to `out`.
    fn run_replay(&mut self, name: &str, out: &mut dyn Write) -> Result<ReplayOutcome>;

    /// The simulator wants the rest of the batch skipped.
    fn stop_requested(&self) -> bool {
        false
    }
}

/// Builds the command line of a worker process for one replay.
pub trait WorkerLauncher {
    fn command(&self, replay: &str) -> Command;
}

impl<F> WorkerLauncher for F
where
    F: Fn(&str) -> Command,
{
    fn command(&self, replay: &str) -> Command {
        self(replay)
    }
}

/// Re-invokes the running executable with the flags it was started with.
///
/// Workers always run their replay in-process, whatever the configuration
/// file says about jobs.
#[derive(Debug, Clone)]
pub struct SelfLauncher {
    pub program: PathBuf,
    pub windowed: bool,
    pub headless: bool,
    pub replay_dir: Option<PathBuf>,
    pub config: Option<PathBuf>,
}

impl SelfLauncher {
    /// Launcher for the current executable.
    pub fn current(windowed: bool, headless: bool) -> io::Result<Self> {
        Ok(Self {
            program: std::env::current_exe()?,
            windowed,
            headless,
            replay_dir: None,
            config: None,
        })
    }
}

impl WorkerLauncher for SelfLauncher {
    fn command(&self, replay: &str) -> Command {
        let mut command = Command::new(&self.program);
        if self.windowed {
            command.arg("--windowed");
        }
        if self.headless {
            command.arg("--headless");
        }
        command.arg("--jobs").arg("-1");
        if let Some(config) = &self.config {
            command.arg("--config").arg(config);
        }
        if let Some(dir) = &self.replay_dir {
            command.arg("--replay-dir").arg(dir);
        }
        command.arg("--replay").arg(replay);
        command
    }
}

/// Batch configuration
#[derive(Debug, Clone)]
pub struct BatchOptions {
    pub concurrency: Concurrency,
    /// Delay between worker polls
    pub poll_interval: Duration,
    /// Directory wildcard entries are expanded against
    pub replay_dir: PathBuf,
}

impl BatchOptions {
    pub fn new(replay_dir: impl Into<PathBuf>) -> Self {
        Self {
            concurrency: Concurrency::Sequential,
            poll_interval: DEFAULT_POLL_INTERVAL,
            replay_dir: replay_dir.into(),
        }
    }
}

/// Totals of a finished batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchSummary {
    /// Replays that were run (or failed to launch)
    pub completed: usize,
    pub errors: usize,
}

impl BatchSummary {
    /// Process exit code: 0 when nothing failed, 1 otherwise
    pub fn exit_code(&self) -> i32 {
        if self.errors == 0 { 0 } else { 1 }
    }
}

/// A worker in launch order, possibly one that never started.
struct Slot {
    replay: String,
    worker: WorkerProcess,
    launch_error: Option<io::Error>,
}

impl Slot {
    fn is_finished(&self) -> bool {
        self.launch_error.is_some() || self.worker.is_done()
    }
}

/// Drives a batch of replays to completion.
pub struct BatchOrchestrator {
    options: BatchOptions,
}

impl BatchOrchestrator {
    pub fn new(options: BatchOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &BatchOptions {
        &self.options
    }

    /// Expand wildcards once, then run with the configured concurrency.
    pub fn run(
        &self,
        names: &[String],
        simulator: &mut dyn ReplaySimulator,
        launcher: &dyn WorkerLauncher,
        out: &mut dyn Write,
    ) -> Result<BatchSummary> {
        let replays = resolve_wildcards(names, &self.options.replay_dir);
        tracing::info!(
            replays = replays.len(),
            concurrency = ?self.options.concurrency,
            "starting replay batch"
        );
        match self.options.concurrency {
            Concurrency::Sequential => self.run_sequential(&replays, simulator, out),
            Concurrency::Workers(limit) => self.run_parallel(&replays, limit, launcher, out),
        }
    }

    /// Run every replay in this process, one after another.
    pub fn run_sequential(
        &self,
        replays: &[String],
        simulator: &mut dyn ReplaySimulator,
        out: &mut dyn Write,
    ) -> Result<BatchSummary> {
        let started = Instant::now();
        let mut summary = BatchSummary {
            completed: 0,
            errors: 0,
        };

        for replay in replays {
            let failed = match simulator.run_replay(replay, out) {
                Ok(outcome) => outcome.is_error(),
                Err(e) => {
                    tracing::error!(replay = %replay, "replay run failed: {:#}", e);
                    true
                }
            };
            summary.completed += 1;
            summary.errors += usize::from(failed);

            if simulator.stop_requested() {
                tracing::info!("batch stopped after {}", replay);
                break;
            }
        }

        if replays.len() > 1 {
            writeln!(
                out,
                "Simulation of all replays completed. Errors occurred: {}",
                summary.errors
            )?;
            writeln!(out, "Total Time: {}", hms(started.elapsed()))?;
            out.flush()?;
        }
        Ok(summary)
    }

    /// Run each replay in a worker process, at most `limit` at a time.
    pub fn run_parallel(
        &self,
        replays: &[String],
        limit: NonZeroUsize,
        launcher: &dyn WorkerLauncher,
        out: &mut dyn Write,
    ) -> Result<BatchSummary> {
        let started = Instant::now();
        let total = replays.len();
        let mut pending = replays.iter();
        let mut slots: VecDeque<Slot> = VecDeque::new();
        let mut summary = BatchSummary {
            completed: 0,
            errors: 0,
        };

        loop {
            for slot in &mut slots {
                slot.worker.poll();
            }

            // Report finished workers from the front only, to keep launch order
            while slots.front().is_some_and(Slot::is_finished) {
                let Some(slot) = slots.pop_front() else {
                    break;
                };
                summary.completed += 1;
                let failed = report_slot(out, &slot, summary.completed, total)?;
                summary.errors += usize::from(failed);
            }

            let mut running = slots.iter().filter(|s| s.worker.is_running()).count();
            while running < limit.get()
                && let Some(replay) = pending.next()
            {
                let mut worker = WorkerProcess::new();
                let launch_error = worker.start(launcher.command(replay)).err();
                match &launch_error {
                    Some(e) => tracing::error!(replay = %replay, "cannot start worker: {}", e),
                    None => running += 1,
                }
                slots.push_back(Slot {
                    replay: replay.clone(),
                    worker,
                    launch_error,
                });
            }

            if slots.is_empty() {
                break;
            }
            std::thread::sleep(self.options.poll_interval);
        }

        debug_assert_eq!(summary.completed, total);
        writeln!(
            out,
            "Simulation of all replays completed. Errors occurred: {}",
            summary.errors
        )?;
        writeln!(out, "Total Wall Time: {}", hms(started.elapsed()))?;
        out.flush()?;
        Ok(summary)
    }
}

/// Print one finished worker; returns whether it counts as an error.
fn report_slot(out: &mut dyn Write, slot: &Slot, index: usize, total: usize) -> io::Result<bool> {
    if let Some(e) = &slot.launch_error {
        writeln!(
            out,
            "{index}/{total} Cannot start worker for \"{}\": {e}",
            slot.replay
        )?;
        writeln!(out, "Error!")?;
        out.flush()?;
        return Ok(true);
    }

    let output = slot.worker.captured_output();
    write!(out, "{index}/{total} {output}")?;
    if !output.ends_with('\n') {
        writeln!(out)?;
    }
    let failed = slot.worker.exit_code() != Some(0);
    if failed {
        writeln!(out, "Error!")?;
    }
    out.flush()?;
    Ok(failed)
}

/// `H:MM:SS`
fn hms(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    format!("{}:{:02}:{:02}", secs / 3600, secs / 60 % 60, secs % 60)
}
