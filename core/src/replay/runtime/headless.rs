//! Replay execution against a simulation backend
//!
//! Provides three passes over a replay file: a logic-only headless pass for
//! batch validation, a paced pass running at game speed, and an analysis pass
//! that decodes commands without simulating.

use anyhow::Result;
use std::io::Write;
use std::time::{Duration, Instant};

use crate::batch::ReplaySimulator;
use crate::command::{Command, CommandList, HandlerChain, HandlerId};
use crate::replay::desync::DesyncReport;
use crate::replay::session::RecorderSession;
use crate::replay::setup::GameSetup;
use crate::replay::types::LOGIC_FRAMES_PER_SECOND;

use super::{CHECKSUM_VERIFIER_PRIORITY, ChecksumVerifier, SessionContext};

/// Frames between headless progress lines (ten minutes of game time)
pub const DEFAULT_PROGRESS_INTERVAL: u32 = 10 * 60 * LOGIC_FRAMES_PER_SECOND;

/// Replay runner configuration
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Run the logic-only loop instead of the paced one
    pub headless: bool,
    /// Frames between progress lines in headless runs (0 disables them)
    pub progress_interval: u32,
    /// Game speed multiplier for paced runs; 0 or less runs unthrottled
    pub playback_speed: f32,
    /// Maximum delta time clamp for paced runs
    pub max_delta: Duration,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            headless: true,
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
            playback_speed: 1.0,
            max_delta: Duration::from_millis(100),
        }
    }
}

/// The simulation a replay is fed into.
pub trait SimulationBackend {
    /// Prepare a fresh game for the setup of the replay about to play.
    fn load_setup(&mut self, setup: &GameSetup) -> Result<()>;

    /// Execute the commands queued for `frame` and advance one frame.
    ///
    /// Executed commands are removed from the list. Returns the state
    /// checksum if one was computed on this frame.
    fn step(&mut self, frame: u32, commands: &mut CommandList) -> Result<Option<u32>>;

    /// Whether some UI surface currently owns input focus.
    fn input_focus_held(&self) -> bool {
        false
    }

    fn set_paused(&mut self, _paused: bool) {}

    fn is_paused(&self) -> bool {
        false
    }
}

/// Result of one pass over a replay.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplayOutcome {
    /// The replay file was opened and its header accepted
    pub opened: bool,
    /// Last frame reached
    pub frames: u32,
    /// First checksum mismatch, if any
    pub desync: Option<DesyncReport>,
}

impl ReplayOutcome {
    pub fn is_error(&self) -> bool {
        !self.opened || self.desync.is_some()
    }
}

/// Drives a [`RecorderSession`] and a [`SimulationBackend`] in lockstep.
pub struct ReplayRunner<B: SimulationBackend> {
    ctx: SessionContext,
    chain: HandlerChain<SessionContext>,
    backend: B,
    config: RunnerConfig,
    verifier: HandlerId,
    stop_requested: bool,
}

impl<B: SimulationBackend> ReplayRunner<B> {
    /// Create a runner with the checksum verifier registered.
    pub fn new(recorder: RecorderSession, backend: B, config: RunnerConfig) -> Self {
        let mut chain: HandlerChain<SessionContext> = HandlerChain::new();
        let verifier = chain.register(CHECKSUM_VERIFIER_PRIORITY, Box::new(ChecksumVerifier));
        Self {
            ctx: SessionContext::new(recorder),
            chain,
            backend,
            config,
            verifier,
            stop_requested: false,
        }
    }

    pub fn context(&self) -> &SessionContext {
        &self.ctx
    }

    pub fn recorder(&self) -> &RecorderSession {
        &self.ctx.recorder
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    /// Handler chain, for registering additional handlers
    pub fn chain_mut(&mut self) -> &mut HandlerChain<SessionContext> {
        &mut self.chain
    }

    /// Registration handle of the built-in checksum verifier
    pub fn verifier_id(&self) -> HandlerId {
        self.verifier
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// Advance the session by one frame.
    ///
    /// Does nothing while the backend is paused.
    pub fn tick(&mut self) -> Result<()> {
        if self.backend.is_paused() {
            return Ok(());
        }
        let frame = self.ctx.frame;
        self.ctx.input_focus_held = self.backend.input_focus_held();

        let mut commands = std::mem::take(&mut self.ctx.commands);
        self.ctx.recorder.update_playback(frame, &mut commands);
        self.chain.dispatch(&mut self.ctx, &mut commands);

        if std::mem::take(&mut self.ctx.pause_requested) {
            tracing::info!(frame, "pausing simulation after checksum mismatch");
            self.backend.set_paused(true);
            self.ctx.commands = commands;
            return Ok(());
        }

        let checksum = self.backend.step(frame, &mut commands);
        self.ctx.commands = commands;
        if let Some(checksum) = checksum? {
            self.ctx.recorder.push_local_checksum(checksum);
        }
        self.ctx.frame += 1;
        Ok(())
    }

    fn begin(&mut self) {
        self.ctx.reset();
        self.backend.set_paused(false);
    }

    /// Hand anything still queued (typically `ClearGameData`) to the backend.
    fn drain(&mut self) -> Result<()> {
        if self.ctx.commands.is_empty() || self.backend.is_paused() {
            return Ok(());
        }
        let mut commands = std::mem::take(&mut self.ctx.commands);
        let result = self.backend.step(self.ctx.frame, &mut commands);
        self.ctx.commands = commands;
        result.map(|_| ())
    }

    fn finish(&mut self) -> ReplayOutcome {
        let outcome = ReplayOutcome {
            opened: true,
            frames: self.ctx.frame,
            desync: self
                .ctx
                .recorder
                .desync_detector()
                .and_then(|d| d.first_mismatch()),
        };
        self.ctx.recorder.reset();
        outcome
    }

    /// Logic-only playback with progress lines written to `out`.
    pub fn simulate(&mut self, name: &str, out: &mut dyn Write) -> Result<ReplayOutcome> {
        writeln!(out, "Simulating Replay \"{}\"", name)?;
        out.flush()?;
        self.begin();

        if let Err(e) = self
            .ctx
            .recorder
            .simulate_replay(name, &mut self.ctx.commands)
        {
            tracing::warn!(replay = name, "simulation not started: {}", e);
            writeln!(out, "Cannot open replay")?;
            out.flush()?;
            return Ok(ReplayOutcome::default());
        }
        self.backend.load_setup(self.ctx.recorder.game_setup())?;

        let started = Instant::now();
        let total_secs = self.ctx.recorder.playback_frame_count() / LOGIC_FRAMES_PER_SECOND;
        let interval = self.config.progress_interval;

        while self.ctx.recorder.is_playback_in_progress() {
            let frame = self.ctx.frame;
            if interval != 0 && frame != 0 && frame % interval == 0 {
                write_progress(out, started, frame, total_secs)?;
            }

            self.tick()?;
            if let Some(report) = self.ctx.last_desync.take() {
                writeln!(out, "CRC Mismatch in Frame {}", report.frame)?;
            }
            if self.ctx.recorder.saw_desync() {
                break;
            }
        }
        if !self.ctx.recorder.saw_desync() {
            self.drain()?;
        }
        write_progress(out, started, self.ctx.frame, total_secs)?;

        let outcome = self.finish();
        tracing::info!(
            replay = name,
            frames = outcome.frames,
            desync = outcome.desync.is_some(),
            "replay simulated"
        );
        Ok(outcome)
    }

    /// Playback at game speed.
    ///
    /// A desync pauses the backend; with no UI to resume from, the run ends
    /// there and further replays are cancelled.
    pub fn play(&mut self, name: &str) -> Result<ReplayOutcome> {
        self.begin();
        if let Err(e) = self
            .ctx
            .recorder
            .playback_file(name, &mut self.ctx.commands)
        {
            tracing::error!(replay = name, "cannot play replay: {}", e);
            return Ok(ReplayOutcome::default());
        }
        self.backend.load_setup(self.ctx.recorder.game_setup())?;

        let speed = self.config.playback_speed;
        let tick_duration = (speed > 0.0)
            .then(|| Duration::from_secs_f64(1.0 / (LOGIC_FRAMES_PER_SECOND as f64 * speed as f64)));
        let mut accumulator = Duration::ZERO;
        let mut last_update = Instant::now();

        while self.ctx.recorder.is_playback_in_progress() {
            match tick_duration {
                None => self.tick()?,
                Some(tick_duration) => {
                    let now = Instant::now();
                    accumulator += (now - last_update).min(self.config.max_delta);
                    last_update = now;
                    while accumulator >= tick_duration
                        && self.ctx.recorder.is_playback_in_progress()
                        && !self.backend.is_paused()
                    {
                        self.tick()?;
                        accumulator -= tick_duration;
                    }
                    if let Some(wait) = tick_duration.checked_sub(accumulator) {
                        std::thread::sleep(wait);
                    }
                }
            }

            if let Some(report) = self.ctx.last_desync.take() {
                tracing::warn!(
                    replay = name,
                    "checksum mismatch in frame {} (local {:08X}, recorded {:08X})",
                    report.frame,
                    report.local_checksum,
                    report.recorded_checksum
                );
            }
            if self.backend.is_paused() {
                tracing::warn!(replay = name, "playback paused; stopping");
                self.stop_requested = true;
                break;
            }
        }
        self.drain()?;
        Ok(self.finish())
    }

    /// Decode every command of a replay without simulating it.
    pub fn analyze(&mut self, name: &str) -> Result<Vec<Command>> {
        self.begin();
        self.ctx
            .recorder
            .analyze_replay(name, &mut self.ctx.commands)?;
        while self.ctx.recorder.is_playback_in_progress() {
            self.ctx
                .recorder
                .update_playback(self.ctx.frame, &mut self.ctx.commands);
        }
        let commands = self.ctx.recorder.take_analysis();
        self.ctx.recorder.reset();
        Ok(commands)
    }
}

impl<B: SimulationBackend> ReplaySimulator for ReplayRunner<B> {
    fn run_replay(&mut self, name: &str, out: &mut dyn Write) -> Result<ReplayOutcome> {
        if self.config.headless {
            self.simulate(name, out)
        } else {
            self.play(name)
        }
    }

    fn stop_requested(&self) -> bool {
        self.stop_requested
    }
}

fn write_progress(
    out: &mut dyn Write,
    started: Instant,
    frame: u32,
    total_secs: u32,
) -> std::io::Result<()> {
    let game_secs = frame / LOGIC_FRAMES_PER_SECOND;
    let real_secs = started.elapsed().as_secs() as u32;
    writeln!(
        out,
        "Elapsed Time: {} Game Time: {}/{}",
        clock(real_secs),
        clock(game_secs),
        clock(total_secs)
    )?;
    out.flush()
}

/// `MM:SS`
fn clock(secs: u32) -> String {
    format!("{:02}:{:02}", secs / 60, secs % 60)
}
