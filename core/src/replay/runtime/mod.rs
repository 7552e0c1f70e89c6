//! Replay runtime
//!
//! This module wires a [`RecorderSession`] to a running simulation:
//! - **Context**: the per-session state handlers operate on
//! - **Handlers**: checksum verification and recording taps for the command chain
//! - **Runner**: headless, paced and analysis passes over a replay file

mod headless;

pub use headless::{
    DEFAULT_PROGRESS_INTERVAL, ReplayOutcome, ReplayRunner, RunnerConfig, SimulationBackend,
};

use crate::command::{Command, CommandHandler, CommandList, CommandType, Disposition};
use crate::error::ReplayError;
use crate::replay::desync::{ChecksumVerdict, DesyncReport};
use crate::replay::session::RecorderSession;

/// Dispatch priority of [`ChecksumVerifier`]; runs before gameplay handlers.
pub const CHECKSUM_VERIFIER_PRIORITY: i32 = 100;

/// Dispatch priority of [`RecordingTap`]; sees commands after every filter.
pub const RECORDING_TAP_PRIORITY: i32 = -100;

/// State shared by the command handlers of one session.
///
/// Created when a session starts and dropped with it; nothing here is global.
pub struct SessionContext {
    pub recorder: RecorderSession,
    /// Commands queued for the frame being advanced
    pub commands: CommandList,
    /// Frame being advanced
    pub frame: u32,
    /// Some UI surface holds input focus; desyncs do not pause the game
    pub input_focus_held: bool,
    /// Set by handlers that want the simulation paused
    pub pause_requested: bool,
    /// First desync of the session, until the runner reports it
    pub last_desync: Option<DesyncReport>,
    /// Recording failure raised inside a handler
    pub record_error: Option<ReplayError>,
}

impl SessionContext {
    pub fn new(recorder: RecorderSession) -> Self {
        Self {
            recorder,
            commands: CommandList::new(),
            frame: 0,
            input_focus_held: false,
            pause_requested: false,
            last_desync: None,
            record_error: None,
        }
    }

    /// Clear per-run state; the recorder is left untouched.
    pub fn reset(&mut self) {
        self.commands.reset();
        self.frame = 0;
        self.input_focus_held = false;
        self.pause_requested = false;
        self.last_desync = None;
        self.record_error = None;
    }
}

/// Routes recorded `LogicChecksum` commands into the desync detector.
///
/// Without a playback detector (e.g. while recording) checksums pass through
/// untouched so they can be recorded.
#[derive(Debug, Default)]
pub struct ChecksumVerifier;

impl CommandHandler<SessionContext> for ChecksumVerifier {
    fn name(&self) -> &str {
        "checksum-verifier"
    }

    fn handle(&mut self, ctx: &mut SessionContext, command: &Command) -> Disposition {
        if command.ty != CommandType::LogicChecksum || ctx.recorder.desync_detector().is_none() {
            return Disposition::Continue;
        }

        let verdict =
            ctx.recorder
                .handle_checksum_command(ctx.frame, command, ctx.input_focus_held);
        if let ChecksumVerdict::Mismatch {
            report,
            notify,
            pause,
        } = verdict
        {
            if notify {
                ctx.last_desync = Some(report);
            }
            if pause {
                ctx.pause_requested = true;
            }
        }
        Disposition::Consume
    }
}

/// Feeds every command that reaches it into the recorder.
#[derive(Debug, Default)]
pub struct RecordingTap;

impl CommandHandler<SessionContext> for RecordingTap {
    fn name(&self) -> &str {
        "recording-tap"
    }

    fn handle(&mut self, ctx: &mut SessionContext, command: &Command) -> Disposition {
        if ctx.record_error.is_none()
            && let Err(e) = ctx.recorder.record_command(ctx.frame, command)
        {
            tracing::error!(frame = ctx.frame, "recording failed: {}", e);
            ctx.record_error = Some(e);
        }
        Disposition::Continue
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{Argument, HandlerChain};
    use crate::replay::session::SessionConfig;
    use crate::replay::types::{GameMode, RecorderMode, VersionInfo};
    use tempfile::TempDir;

    fn context(dir: &TempDir) -> SessionContext {
        let version = VersionInfo {
            version: "test".into(),
            build_time: "now".into(),
            version_number: 1 << 16,
            exe_checksum: 0,
            ini_checksum: 0,
        };
        SessionContext::new(RecorderSession::new(SessionConfig::new(dir.path(), version)))
    }

    fn chain() -> HandlerChain<SessionContext> {
        let mut chain: HandlerChain<SessionContext> = HandlerChain::new();
        chain.register(RECORDING_TAP_PRIORITY, Box::new(RecordingTap));
        chain.register(CHECKSUM_VERIFIER_PRIORITY, Box::new(ChecksumVerifier));
        chain
    }

    #[test]
    fn test_verifier_order() {
        assert_eq!(chain().names(), vec!["checksum-verifier", "recording-tap"]);
    }

    #[test]
    fn test_checksums_pass_through_when_recording() {
        let dir = TempDir::new().unwrap();
        let mut ctx = context(&dir);
        let mut chain = chain();

        let mut list = CommandList::new();
        list.append(
            Command::new(CommandType::NewGame, -1)
                .with_arg(Argument::Integer(GameMode::Skirmish as i32)),
        );
        list.append(Command::logic_checksum(5, 0));
        assert_eq!(chain.dispatch(&mut ctx, &mut list), 0);

        assert_eq!(ctx.recorder.mode(), RecorderMode::Recording);
        assert_eq!(list.len(), 2);
        assert!(ctx.record_error.is_none());
    }

    #[test]
    fn test_verifier_consumes_during_playback() {
        let dir = TempDir::new().unwrap();
        let mut ctx = context(&dir);
        let mut chain = chain();

        // Record a single-player game whose checksum on frame 3 is 0x10
        ctx.frame = 0;
        let mut list = CommandList::new();
        list.append(
            Command::new(CommandType::NewGame, -1)
                .with_arg(Argument::Integer(GameMode::Skirmish as i32)),
        );
        chain.dispatch(&mut ctx, &mut list);
        ctx.frame = 3;
        let mut list = CommandList::new();
        list.append(Command::logic_checksum(0x10, 0));
        list.append(Command::new(CommandType::ClearGameData, -1));
        chain.dispatch(&mut ctx, &mut list);
        assert!(!ctx.recorder.is_recording());

        let mut commands = CommandList::new();
        ctx.recorder
            .simulate_replay("00000000.rep", &mut commands)
            .unwrap();
        ctx.recorder.push_local_checksum(0x11);
        ctx.recorder.update_playback(3, &mut commands);

        let consumed = chain.dispatch(&mut ctx, &mut commands);
        assert_eq!(consumed, 1);
        assert!(!commands.contains(CommandType::LogicChecksum));
        assert!(ctx.pause_requested);
        assert_eq!(ctx.last_desync.map(|r| r.frame), Some(2));
        assert!(ctx.recorder.saw_desync());
    }

    #[test]
    fn test_focus_suppresses_pause() {
        let dir = TempDir::new().unwrap();
        let mut ctx = context(&dir);
        ctx.recorder.start_recording(Default::default()).unwrap();
        ctx.recorder.stop_recording(0).unwrap();

        let mut commands = CommandList::new();
        ctx.recorder
            .simulate_replay("00000000.rep", &mut commands)
            .unwrap();
        ctx.recorder.push_local_checksum(1);
        ctx.frame = 7;
        ctx.input_focus_held = true;

        let mut verifier = ChecksumVerifier;
        let disposition = verifier.handle(&mut ctx, &Command::logic_checksum(2, 0));
        assert_eq!(disposition, Disposition::Consume);
        assert!(!ctx.pause_requested);
        assert!(ctx.last_desync.is_some());
    }
}
