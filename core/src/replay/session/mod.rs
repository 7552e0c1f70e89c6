//! Recorder session
//!
//! Drives recording, playback, logic-only simulation and offline analysis of
//! replay files. A session owns at most one open replay file at a time and is
//! advanced synchronously with the caller's simulation step; the only state
//! carried between steps is the one-record lookahead.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use crate::command::{Argument, Command, CommandList, CommandType};
use crate::error::ReplayError;
use crate::replay::binary::{ReplayReader, ReplayWriter};
use crate::replay::desync::{ChecksumVerdict, DesyncDetector};
use crate::replay::setup::GameSetup;
use crate::replay::types::*;

#[cfg(test)]
mod tests;

/// Display name written into freshly recorded replays
pub const LAST_REPLAY_DISPLAY_NAME: &str = "Last Replay";

/// Base name of the replay being recorded
const LAST_REPLAY_BASE_NAME: &str = "00000000";

/// Static configuration of a session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Directory replays are written to and resolved against
    pub replay_dir: PathBuf,
    /// Instance number when several copies run side by side (1 = first)
    pub instance_id: u32,
    /// Identity of the running build, written to and compared with headers
    pub version: VersionInfo,
}

impl SessionConfig {
    pub fn new(replay_dir: impl Into<PathBuf>, version: VersionInfo) -> Self {
        Self {
            replay_dir: replay_dir.into(),
            instance_id: 1,
            version,
        }
    }
}

/// The session's single file handle.
enum ReplayFile {
    Closed,
    Writing(ReplayWriter<BufWriter<File>>),
    Reading(ReplayReader<BufReader<File>>),
}

/// Record/playback state machine.
pub struct RecorderSession {
    config: SessionConfig,
    mode: RecorderMode,
    file: ReplayFile,
    game_setup: GameSetup,
    local_slot: i32,
    /// Frame of the next unread record; `None` once the stream is exhausted
    lookahead: Option<u32>,
    header: Option<ReplayHeader>,
    current_path: Option<PathBuf>,
    detector: Option<DesyncDetector>,
    analysis: Vec<Command>,
}

impl RecorderSession {
    /// Create an idle session.
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config,
            mode: RecorderMode::Idle,
            file: ReplayFile::Closed,
            game_setup: GameSetup::single_player("", 0),
            local_slot: 0,
            lookahead: None,
            header: None,
            current_path: None,
            detector: None,
            analysis: Vec::new(),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn mode(&self) -> RecorderMode {
        self.mode
    }

    /// Return to `Idle`, closing any open file without finalizing it.
    ///
    /// The desync detector of the last playback is kept so callers can still
    /// query it after the replay ended.
    pub fn reset(&mut self) {
        if !matches!(self.file, ReplayFile::Closed) {
            tracing::debug!(path = ?self.current_path, "closing replay file");
        }
        self.file = ReplayFile::Closed;
        self.mode = RecorderMode::Idle;
        self.lookahead = None;
        self.current_path = None;
    }

    /// Setup and local slot used by the next recording.
    pub fn set_game_setup(&mut self, setup: GameSetup, local_slot: i32) {
        self.game_setup = setup;
        self.local_slot = local_slot;
    }

    /// Setup of the current recording or playback
    pub fn game_setup(&self) -> &GameSetup {
        &self.game_setup
    }

    pub fn local_slot(&self) -> i32 {
        self.local_slot
    }

    /// Header of the replay being recorded or played back
    pub fn header(&self) -> Option<&ReplayHeader> {
        self.header.as_ref()
    }

    pub fn replay_dir(&self) -> &Path {
        &self.config.replay_dir
    }

    /// File stem of the replay being recorded, e.g. `00000000_Instance02`.
    pub fn last_replay_file_name(&self) -> String {
        if self.config.instance_id > 1 {
            format!("{LAST_REPLAY_BASE_NAME}_Instance{:02}", self.config.instance_id)
        } else {
            LAST_REPLAY_BASE_NAME.to_string()
        }
    }

    /// Full path of the replay being recorded
    pub fn last_replay_path(&self) -> PathBuf {
        self.config
            .replay_dir
            .join(format!("{}.{REPLAY_EXTENSION}", self.last_replay_file_name()))
    }

    /// Resolve a replay name against the replay directory.
    pub fn resolve_replay_path(&self, name: &str) -> PathBuf {
        let path = Path::new(name);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.config.replay_dir.join(path)
        }
    }

    // ------------------------------------------------------------------
    // Recording
    // ------------------------------------------------------------------

    pub fn is_recording(&self) -> bool {
        matches!(self.file, ReplayFile::Writing(_))
    }

    /// Open a new replay file and write its header.
    pub fn start_recording(&mut self, options: RecordingOptions) -> Result<(), ReplayError> {
        if !matches!(self.file, ReplayFile::Closed) {
            tracing::warn!("start_recording called while a replay file is open");
            return Err(ReplayError::AlreadyRecording);
        }
        self.reset();
        self.detector = None;

        fs::create_dir_all(&self.config.replay_dir)?;
        let path = self.last_replay_path();
        let mut writer = ReplayWriter::new(BufWriter::new(File::create(&path)?));

        let header = ReplayHeader {
            start_time: unix_time_now(),
            end_time: 0,
            frame_count: 0,
            desync: false,
            quit_early: false,
            player_disconnects: [false; MAX_SLOTS],
            display_name: LAST_REPLAY_DISPLAY_NAME.to_string(),
            time_snapshot: TimeSnapshot::now(),
            version: self.config.version.clone(),
            game_setup: self.game_setup.clone(),
            local_slot: self.local_slot,
            difficulty: options.difficulty as i32,
            original_mode: options.mode as i32,
            rank_points: options.rank_points,
            max_fps: options.max_fps,
        };
        writer.write_header(&header)?;

        tracing::info!(
            path = %path.display(),
            setup = %self.game_setup,
            local_slot = self.local_slot,
            "recording started (difficulty={:?}, mode={:?}, max_fps={})",
            options.difficulty,
            options.mode,
            options.max_fps
        );

        self.file = ReplayFile::Writing(writer);
        self.mode = RecorderMode::Recording;
        self.header = Some(header);
        self.current_path = Some(path);
        Ok(())
    }

    /// Finalize and close the recording; `frame` is the last simulated frame.
    pub fn stop_recording(&mut self, frame: u32) -> Result<(), ReplayError> {
        if !self.is_recording() {
            return Ok(());
        }
        let ReplayFile::Writing(mut writer) = std::mem::replace(&mut self.file, ReplayFile::Closed)
        else {
            return Ok(());
        };
        self.mode = RecorderMode::Idle;
        self.current_path = None;

        let end_time = unix_time_now();
        let result = writer
            .patch_end_time(end_time)
            .and_then(|_| writer.patch_frame_count(frame))
            .and_then(|_| writer.flush());
        if let Some(header) = &mut self.header {
            header.end_time = end_time;
            header.frame_count = frame;
        }
        tracing::info!(frames = frame, "recording stopped");
        result.map_err(ReplayError::from)
    }

    /// Feed one frame's worth of commands to the recorder.
    ///
    /// Starts a recording on a recordable `NewGame`, finalizes it on
    /// `ClearGameData`, and appends every network command in between.
    pub fn update_record(&mut self, frame: u32, commands: &CommandList) -> Result<(), ReplayError> {
        if self.mode.is_playback_family() {
            return Ok(());
        }
        let mut written = false;
        for command in commands {
            written |= self.record_command(frame, command)?;
        }
        if written {
            self.flush_recording()?;
        }
        Ok(())
    }

    /// Offer a single command to the recorder.
    ///
    /// Returns true if a record was appended to an open file that is still
    /// open afterwards.
    pub fn record_command(&mut self, frame: u32, command: &Command) -> Result<bool, ReplayError> {
        if self.mode.is_playback_family() {
            return Ok(false);
        }
        match command.ty {
            CommandType::NewGame => {
                let mode = command
                    .integer_arg(0)
                    .and_then(GameMode::from_i32)
                    .unwrap_or(GameMode::None);
                if !mode.is_recordable() {
                    return Ok(false);
                }
                if self.is_recording() {
                    tracing::warn!("new game while already recording; keeping current file");
                    return Ok(false);
                }
                let options = RecordingOptions {
                    difficulty: command
                        .integer_arg(1)
                        .and_then(Difficulty::from_i32)
                        .unwrap_or_default(),
                    mode,
                    rank_points: command.integer_arg(2).unwrap_or(0),
                    max_fps: command.integer_arg(3).unwrap_or(0),
                };
                self.start_recording(options)?;
                Ok(false)
            }
            CommandType::ClearGameData => {
                if let ReplayFile::Writing(writer) = &mut self.file {
                    writer.write_command(&stamped(command, frame))?;
                    self.stop_recording(frame)?;
                }
                Ok(false)
            }
            ty if ty.is_network() => match &mut self.file {
                ReplayFile::Writing(writer) => {
                    writer.write_command(&stamped(command, frame))?;
                    Ok(true)
                }
                _ => Ok(false),
            },
            _ => Ok(false),
        }
    }

    /// Push buffered records of the open recording to disk.
    pub fn flush_recording(&mut self) -> Result<(), ReplayError> {
        self.with_writer(|w| w.flush())
    }

    /// Record the moment the game actually started (after loading).
    pub fn log_game_start(&mut self, start_time: u32) -> Result<(), ReplayError> {
        if let Some(header) = &mut self.header {
            header.start_time = start_time;
        }
        self.with_writer(|w| w.patch_start_time(start_time))
    }

    pub fn log_player_disconnect(&mut self, slot: usize) -> Result<(), ReplayError> {
        if let Some(flag) = self
            .header
            .as_mut()
            .and_then(|h| h.player_disconnects.get_mut(slot))
        {
            *flag = true;
        }
        tracing::info!(slot, "player disconnected");
        self.with_writer(|w| w.patch_disconnect(slot, true))
    }

    pub fn log_checksum_mismatch(&mut self) -> Result<(), ReplayError> {
        if let Some(header) = &mut self.header {
            header.desync = true;
        }
        self.with_writer(|w| w.patch_desync(true))
    }

    pub fn log_quit_early(&mut self) -> Result<(), ReplayError> {
        if let Some(header) = &mut self.header {
            header.quit_early = true;
        }
        self.with_writer(|w| w.patch_quit_early(true))
    }

    fn with_writer<F>(&mut self, patch: F) -> Result<(), ReplayError>
    where
        F: FnOnce(&mut ReplayWriter<BufWriter<File>>) -> std::io::Result<()>,
    {
        match &mut self.file {
            ReplayFile::Writing(writer) => Ok(patch(writer)?),
            _ => Ok(()),
        }
    }

    /// Copy the last finished recording to `<replay dir>/<name>.rep`.
    pub fn archive_replay(&self, name: &str) -> Result<PathBuf, ReplayError> {
        if self.is_recording() {
            return Err(ReplayError::Busy(self.mode));
        }
        let target = self
            .config
            .replay_dir
            .join(Path::new(name).with_extension(REPLAY_EXTENSION));
        fs::copy(self.last_replay_path(), &target)?;
        tracing::info!(target = %target.display(), "archived replay");
        Ok(target)
    }

    // ------------------------------------------------------------------
    // Playback
    // ------------------------------------------------------------------

    /// Read only the header of a replay file.
    pub fn read_replay_header(path: &Path) -> Result<ReplayHeader, ReplayError> {
        let file = File::open(path)?;
        ReplayReader::new(BufReader::new(file)).read_header()
    }

    /// Start paced playback of a replay.
    pub fn playback_file(
        &mut self,
        name: &str,
        commands: &mut CommandList,
    ) -> Result<(), ReplayError> {
        self.open_playback(name, RecorderMode::Playback, commands)
    }

    /// Start logic-only playback for headless validation.
    pub fn simulate_replay(
        &mut self,
        name: &str,
        commands: &mut CommandList,
    ) -> Result<(), ReplayError> {
        self.open_playback(name, RecorderMode::SimulationPlayback, commands)
    }

    /// Start an offline decode pass. Nothing is added to `commands`.
    pub fn analyze_replay(
        &mut self,
        name: &str,
        commands: &mut CommandList,
    ) -> Result<(), ReplayError> {
        self.open_playback(name, RecorderMode::Analysis, commands)
    }

    fn open_playback(
        &mut self,
        name: &str,
        mode: RecorderMode,
        commands: &mut CommandList,
    ) -> Result<(), ReplayError> {
        if self.is_recording() {
            return Err(ReplayError::Busy(self.mode));
        }
        // Restarting a playback is allowed; drop whatever was open, along
        // with what the last replay left behind
        self.reset();
        self.header = None;
        self.detector = None;
        self.analysis.clear();

        let path = self.resolve_replay_path(name);
        let mut reader = ReplayReader::new(BufReader::new(File::open(&path)?));
        let header = reader.read_header().inspect_err(|e| {
            tracing::warn!(path = %path.display(), "cannot open replay: {}", e);
        })?;

        self.check_version(&header);

        let multiplayer = header.is_multiplayer();
        if let Some(slot) = usize::try_from(header.local_slot)
            .ok()
            .and_then(|i| header.game_setup.slot(i))
        {
            tracing::debug!(
                "local player is {} (slot {}, ip {:08X})",
                slot.name(),
                header.local_slot,
                slot.ip()
            );
        }
        tracing::debug!(
            original_mode = header.original_mode,
            checksum_interval = header.game_setup.checksum_interval,
            "replay opened"
        );

        self.detector = Some(DesyncDetector::new(header.local_slot, multiplayer));
        self.game_setup = header.game_setup.clone();
        self.local_slot = header.local_slot;

        // A restarted replay must not see commands left over from the last run
        commands.reset();
        if mode != RecorderMode::Analysis {
            let mut new_game = Command::new(CommandType::NewGame, -1)
                .with_arg(Argument::Integer(GameMode::Replay as i32))
                .with_arg(Argument::Integer(header.difficulty))
                .with_arg(Argument::Integer(header.rank_points));
            if header.max_fps != 0 {
                new_game = new_game.with_arg(Argument::Integer(header.max_fps));
            }
            commands.append(new_game);
        }

        self.file = ReplayFile::Reading(reader);
        self.mode = mode;
        self.header = Some(header);
        self.current_path = Some(path);
        self.read_next_frame(commands);
        Ok(())
    }

    /// Log differences between the replay's build and ours. Never fatal.
    fn check_version(&self, header: &ReplayHeader) {
        let diffs = self.config.version.differences(&header.version);
        if diffs.is_empty() {
            return;
        }
        if header.version.schema_version() != crate::command::COMMAND_SCHEMA_VERSION {
            tracing::warn!(
                "replay uses command schema {} (ours is {})",
                header.version.schema_version(),
                crate::command::COMMAND_SCHEMA_VERSION
            );
        }
        tracing::warn!("replay was written by a different build: {}", diffs.join("; "));
    }

    /// Whether commands are still being fed from a replay file.
    pub fn is_playback_in_progress(&self) -> bool {
        self.mode.is_playback_family() && self.lookahead.is_some()
    }

    /// Frame count stored in the header of the current playback
    pub fn playback_frame_count(&self) -> u32 {
        self.header.as_ref().map_or(0, |h| h.frame_count)
    }

    /// Path of the replay currently open
    pub fn current_path(&self) -> Option<&Path> {
        self.current_path.as_deref()
    }

    /// Frame of the next unread record
    pub fn next_frame(&self) -> Option<u32> {
        self.lookahead
    }

    /// Advance playback by one simulation step.
    ///
    /// Culls commands the local side is not allowed to inject, then appends
    /// every record tagged with `frame` to `commands`.
    pub fn update_playback(&mut self, frame: u32, commands: &mut CommandList) {
        if !self.mode.is_playback_family() {
            return;
        }
        if self.cull_commands(commands) {
            // The game is about to end this frame; nothing more may be appended
            return;
        }
        let Some(next) = self.lookahead else {
            return;
        };

        let current = if self.mode == RecorderMode::Analysis {
            next
        } else {
            frame
        };
        if next < current {
            tracing::warn!(
                record_frame = next,
                frame = current,
                "replay record is behind the simulation; ending playback"
            );
            self.end_of_stream(commands);
            return;
        }

        while self.lookahead == Some(current) {
            self.append_next_command(current, commands);
            self.read_next_frame(commands);
        }
    }

    /// Drop commands that must not be injected during playback.
    ///
    /// Returns true when a `ClearGameData` command is pending.
    fn cull_commands(&mut self, commands: &mut CommandList) -> bool {
        let has_clear = commands.contains(CommandType::ClearGameData);
        let before = commands.len();
        commands.retain(|c| !c.ty.is_network() || c.ty == CommandType::LogicChecksum);
        let culled = before - commands.len();
        if culled > 0 {
            tracing::debug!(culled, "removed local commands during playback");
        }
        has_clear
    }

    fn append_next_command(&mut self, frame: u32, commands: &mut CommandList) {
        let ReplayFile::Reading(reader) = &mut self.file else {
            return;
        };
        match reader.read_command_body(frame) {
            Ok(Some(command)) if command.ty == CommandType::ClearGameData => {
                tracing::debug!(frame, "skipping recorded ClearGameData");
            }
            Ok(Some(command)) => {
                if self.mode == RecorderMode::Analysis {
                    log_analyzed(&command);
                    self.analysis.push(command);
                } else {
                    tracing::trace!(frame, ty = %command.ty, player = command.player_index, "replaying command");
                    commands.append(command);
                }
            }
            Ok(None) => tracing::debug!(frame, "replay ended inside a record"),
            Err(e) => {
                tracing::warn!(frame, "stopping playback: {}", e);
                self.end_of_stream(commands);
            }
        }
    }

    fn read_next_frame(&mut self, commands: &mut CommandList) {
        let ReplayFile::Reading(reader) = &mut self.file else {
            self.lookahead = None;
            return;
        };
        match reader.read_frame() {
            Some(frame) => self.lookahead = Some(frame),
            None => self.end_of_stream(commands),
        }
    }

    /// Close the file and mark the stream exhausted.
    fn end_of_stream(&mut self, commands: &mut CommandList) {
        self.file = ReplayFile::Closed;
        self.lookahead = None;
        if self.mode == RecorderMode::Analysis {
            tracing::debug!(commands = self.analysis.len(), "analysis finished");
            return;
        }
        tracing::debug!("replay playback finished");
        commands.append(Command::new(CommandType::ClearGameData, -1));
        self.mode = RecorderMode::Idle;
        self.current_path = None;
    }

    /// Commands decoded by an analysis pass
    pub fn take_analysis(&mut self) -> Vec<Command> {
        std::mem::take(&mut self.analysis)
    }

    // ------------------------------------------------------------------
    // Desync detection
    // ------------------------------------------------------------------

    /// Queue a checksum computed by the local simulation.
    pub fn push_local_checksum(&mut self, checksum: u32) {
        if let Some(detector) = &mut self.detector {
            detector.push_local(checksum);
        }
    }

    /// Compare a recorded `LogicChecksum` command against the local queue.
    pub fn handle_checksum_command(
        &mut self,
        frame: u32,
        command: &Command,
        focus_held: bool,
    ) -> ChecksumVerdict {
        let (Some(detector), Some(recorded)) = (&mut self.detector, command.checksum()) else {
            return ChecksumVerdict::Skipped;
        };
        detector.check(frame, command.player_index, recorded, focus_held)
    }

    /// Whether the current (or last) playback went out of sync
    pub fn saw_desync(&self) -> bool {
        self.detector.as_ref().is_some_and(DesyncDetector::saw_mismatch)
    }

    pub fn desync_detector(&self) -> Option<&DesyncDetector> {
        self.detector.as_ref()
    }
}

/// Copy of `command` tagged with the frame it is recorded on.
fn stamped(command: &Command, frame: u32) -> Command {
    Command {
        frame,
        ..command.clone()
    }
}

fn log_analyzed(command: &Command) {
    let args: Vec<String> = command.args.iter().map(ToString::to_string).collect();
    tracing::info!(
        "frame {} player {} {}{}{}",
        command.frame,
        command.player_index,
        command.ty,
        if args.is_empty() { "" } else { ": " },
        args.join(", ")
    );
}
