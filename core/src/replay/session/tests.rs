use super::*;
use crate::command::{Argument, Command, CommandList, CommandType};
use crate::replay::desync::ChecksumVerdict;
use crate::replay::setup::Slot;
use glam::Vec3;
use tempfile::TempDir;

fn version() -> VersionInfo {
    VersionInfo {
        version: "0.1.0".into(),
        build_time: "test".into(),
        version_number: crate::command::COMMAND_SCHEMA_VERSION << 16,
        exe_checksum: 0x1234,
        ini_checksum: 0x5678,
    }
}

fn session(dir: &TempDir) -> RecorderSession {
    RecorderSession::new(SessionConfig::new(dir.path(), version()))
}

fn new_game(mode: GameMode) -> Command {
    Command::new(CommandType::NewGame, -1)
        .with_arg(Argument::Integer(mode as i32))
        .with_arg(Argument::Integer(Difficulty::Hard as i32))
        .with_arg(Argument::Integer(250))
        .with_arg(Argument::Integer(60))
}

fn move_to(player: i32, x: f32) -> Command {
    Command::new(CommandType::MoveTo, player).with_arg(Argument::Location(Vec3::new(x, 0.0, 0.0)))
}

fn list(commands: impl IntoIterator<Item = Command>) -> CommandList {
    let mut list = CommandList::new();
    for command in commands {
        list.append(command);
    }
    list
}

/// Record a skirmish with commands on frames 0, 2 and 5, ending on frame 8.
fn record_sample(session: &mut RecorderSession) {
    session
        .update_record(0, &list([new_game(GameMode::Skirmish), move_to(0, 1.0)]))
        .unwrap();
    assert!(session.is_recording());
    assert_eq!(session.mode(), RecorderMode::Recording);

    session.update_record(1, &CommandList::new()).unwrap();
    session
        .update_record(2, &list([move_to(0, 2.0), Command::logic_checksum(0xAB, 0)]))
        .unwrap();
    session
        .update_record(5, &list([move_to(1, 3.0)]))
        .unwrap();
    session
        .update_record(8, &list([Command::new(CommandType::ClearGameData, -1)]))
        .unwrap();
    assert!(!session.is_recording());
    assert_eq!(session.mode(), RecorderMode::Idle);
}

#[test]
fn test_record_then_simulate() {
    let dir = TempDir::new().unwrap();
    let mut session = session(&dir);
    record_sample(&mut session);

    let header = RecorderSession::read_replay_header(&session.last_replay_path()).unwrap();
    assert_eq!(header.frame_count, 8);
    assert!(header.end_time >= header.start_time);
    assert_eq!(header.difficulty, Difficulty::Hard as i32);
    assert_eq!(header.original_mode, GameMode::Skirmish as i32);
    assert_eq!(header.rank_points, 250);
    assert_eq!(header.max_fps, 60);
    assert_eq!(header.display_name, LAST_REPLAY_DISPLAY_NAME);

    let mut commands = CommandList::new();
    session.simulate_replay("00000000.rep", &mut commands).unwrap();
    assert_eq!(session.mode(), RecorderMode::SimulationPlayback);
    assert!(session.is_playback_in_progress());

    // The session announces the replay as a new game
    let first: Vec<_> = commands.drain().collect();
    assert_eq!(first.len(), 1);
    assert_eq!(first[0].ty, CommandType::NewGame);
    assert_eq!(first[0].integer_arg(0), Some(GameMode::Replay as i32));
    assert_eq!(first[0].integer_arg(3), Some(60));

    let mut replayed = Vec::new();
    let mut frame = 0;
    while session.is_playback_in_progress() {
        session.update_playback(frame, &mut commands);
        replayed.extend(commands.drain().map(|c| (frame, c.ty, c.player_index)));
        frame += 1;
    }

    assert_eq!(
        replayed,
        vec![
            (0, CommandType::MoveTo, 0),
            (2, CommandType::MoveTo, 0),
            (2, CommandType::LogicChecksum, 0),
            (5, CommandType::MoveTo, 1),
            (8, CommandType::ClearGameData, -1),
        ]
    );
    assert_eq!(session.mode(), RecorderMode::Idle);
}

#[test]
fn test_bad_magic_leaves_session_idle() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("broken.rep"), b"NOTREP and some more bytes here").unwrap();

    let mut session = session(&dir);
    let mut commands = CommandList::new();
    let err = session.playback_file("broken.rep", &mut commands).unwrap_err();

    assert!(err.is_format_error());
    assert_eq!(session.mode(), RecorderMode::Idle);
    assert!(!session.is_playback_in_progress());
    assert!(commands.is_empty());
}

#[test]
fn test_failed_open_discards_previous_replay() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("broken.rep"), b"NOTREP and some more bytes here").unwrap();
    let mut session = session(&dir);
    record_sample(&mut session);

    // Play the good replay into a desync so there is state to lose
    let mut commands = CommandList::new();
    session.simulate_replay("00000000.rep", &mut commands).unwrap();
    session.push_local_checksum(0x01);
    let verdict = session.handle_checksum_command(2, &Command::logic_checksum(0xAB, 0), false);
    assert!(matches!(verdict, ChecksumVerdict::Mismatch { .. }));
    assert!(session.saw_desync());
    assert!(session.header().is_some());

    let err = session.playback_file("broken.rep", &mut commands).unwrap_err();
    assert!(err.is_format_error());
    assert_eq!(session.mode(), RecorderMode::Idle);
    assert!(session.header().is_none());
    assert!(session.desync_detector().is_none());
    assert!(!session.saw_desync());
}

#[test]
fn test_invalid_setup_is_format_error() {
    let dir = TempDir::new().unwrap();
    let mut session = session(&dir);
    record_sample(&mut session);

    // Rename the seed key so the setup string no longer has one
    let path = session.last_replay_path();
    let mut bytes = std::fs::read(&path).unwrap();
    let pos = bytes.windows(4).position(|w| w == b";SD=").unwrap();
    bytes[pos + 1] = b'?';
    std::fs::write(&path, bytes).unwrap();

    let mut commands = CommandList::new();
    let err = session.simulate_replay("00000000.rep", &mut commands).unwrap_err();
    assert!(matches!(err, ReplayError::InvalidGameSetup(_)));
    assert_eq!(session.mode(), RecorderMode::Idle);
}

#[test]
fn test_menu_games_are_not_recorded() {
    let dir = TempDir::new().unwrap();
    let mut session = session(&dir);

    for mode in [GameMode::Shell, GameMode::SinglePlayer, GameMode::None] {
        session.update_record(0, &list([new_game(mode)])).unwrap();
        assert!(!session.is_recording(), "{mode:?} must not record");
    }
    assert!(!session.last_replay_path().exists());
}

#[test]
fn test_start_recording_refuses_open_file() {
    let dir = TempDir::new().unwrap();
    let mut session = session(&dir);
    session.start_recording(RecordingOptions::default()).unwrap();

    let err = session
        .start_recording(RecordingOptions::default())
        .unwrap_err();
    assert!(matches!(err, ReplayError::AlreadyRecording));
    assert!(session.is_recording());
}

#[test]
fn test_patch_logs() {
    let dir = TempDir::new().unwrap();
    let mut session = session(&dir);
    session.start_recording(RecordingOptions::default()).unwrap();

    session.update_record(3, &list([move_to(0, 1.0)])).unwrap();
    session.log_game_start(1_000).unwrap();
    session.log_player_disconnect(2).unwrap();
    session.log_quit_early().unwrap();
    session.log_checksum_mismatch().unwrap();
    session.update_record(4, &list([move_to(0, 2.0)])).unwrap();
    session.stop_recording(10).unwrap();

    let header = RecorderSession::read_replay_header(&session.last_replay_path()).unwrap();
    assert_eq!(header.start_time, 1_000);
    assert!(header.player_disconnects[2]);
    assert!(header.quit_early);
    assert!(header.desync);
    assert_eq!(header.frame_count, 10);

    // Records written after the patches are still intact
    let mut commands = CommandList::new();
    session.analyze_replay("00000000.rep", &mut commands).unwrap();
    while session.is_playback_in_progress() {
        session.update_playback(0, &mut commands);
    }
    let frames: Vec<u32> = session.take_analysis().iter().map(|c| c.frame).collect();
    assert_eq!(frames, vec![3, 4]);
}

#[test]
fn test_analysis_injects_nothing() {
    let dir = TempDir::new().unwrap();
    let mut session = session(&dir);
    record_sample(&mut session);

    let mut commands = CommandList::new();
    session.analyze_replay("00000000.rep", &mut commands).unwrap();
    assert!(commands.is_empty());

    let mut ticks = 0;
    while session.is_playback_in_progress() {
        // Analysis follows the file, not the caller's frame
        session.update_playback(999, &mut commands);
        ticks += 1;
    }
    assert!(commands.is_empty());
    assert_eq!(ticks, 4);
    assert_eq!(session.mode(), RecorderMode::Analysis);

    let analyzed = session.take_analysis();
    let types: Vec<_> = analyzed.iter().map(|c| c.ty).collect();
    assert_eq!(
        types,
        vec![
            CommandType::MoveTo,
            CommandType::MoveTo,
            CommandType::LogicChecksum,
            CommandType::MoveTo
        ]
    );
}

#[test]
fn test_local_commands_culled_during_playback() {
    let dir = TempDir::new().unwrap();
    let mut session = session(&dir);
    record_sample(&mut session);

    let mut commands = CommandList::new();
    session.playback_file("00000000.rep", &mut commands).unwrap();
    commands.reset();

    // A stray local order and a local checksum before frame 0 is processed
    commands.append(move_to(3, 9.0));
    commands.append(Command::logic_checksum(1, 3));
    session.update_playback(0, &mut commands);

    let types: Vec<_> = commands.iter().map(|c| (c.ty, c.player_index)).collect();
    assert_eq!(
        types,
        vec![
            (CommandType::LogicChecksum, 3),
            (CommandType::MoveTo, 0)
        ]
    );
}

#[test]
fn test_clear_game_data_stops_appending() {
    let dir = TempDir::new().unwrap();
    let mut session = session(&dir);
    record_sample(&mut session);

    let mut commands = CommandList::new();
    session.playback_file("00000000.rep", &mut commands).unwrap();
    commands.reset();
    commands.append(Command::new(CommandType::ClearGameData, -1));

    session.update_playback(0, &mut commands);
    assert_eq!(commands.len(), 1);
    assert_eq!(session.next_frame(), Some(0));
}

#[test]
fn test_restart_resets_command_list() {
    let dir = TempDir::new().unwrap();
    let mut session = session(&dir);
    record_sample(&mut session);

    let mut commands = CommandList::new();
    session.simulate_replay("00000000.rep", &mut commands).unwrap();
    session.update_playback(0, &mut commands);
    commands.append(Command::logic_checksum(7, 0));

    session.simulate_replay("00000000.rep", &mut commands).unwrap();
    assert_eq!(commands.len(), 1);
    assert_eq!(commands.iter().next().unwrap().ty, CommandType::NewGame);
}

#[test]
fn test_header_only_replay_ends_immediately() {
    let dir = TempDir::new().unwrap();
    let mut session = session(&dir);
    session.start_recording(RecordingOptions::default()).unwrap();
    session.stop_recording(0).unwrap();

    let mut commands = CommandList::new();
    session.simulate_replay("00000000.rep", &mut commands).unwrap();
    let types: Vec<_> = commands.iter().map(|c| c.ty).collect();
    assert_eq!(types, vec![CommandType::NewGame, CommandType::ClearGameData]);
    assert!(!session.is_playback_in_progress());
    assert_eq!(session.mode(), RecorderMode::Idle);
}

#[test]
fn test_multiplayer_replay_drops_first_local_checksum() {
    let dir = TempDir::new().unwrap();
    let mut session = session(&dir);
    let mut setup = GameSetup::single_player("maps/lan", 9);
    setup.slots[0] = Slot::Human {
        name: "Alice".into(),
        ip: 0x0A00_0001,
        team: 0,
    };
    setup.slots[1] = Slot::Human {
        name: "Bob".into(),
        ip: 0x0A00_0002,
        team: 1,
    };
    session.set_game_setup(setup, 0);
    session.update_record(0, &list([new_game(GameMode::Lan)])).unwrap();
    session
        .update_record(9, &list([Command::new(CommandType::ClearGameData, -1)]))
        .unwrap();

    let mut commands = CommandList::new();
    session.simulate_replay("00000000.rep", &mut commands).unwrap();
    assert!(session.header().unwrap().is_multiplayer());

    session.push_local_checksum(0x11);
    session.push_local_checksum(0x22);
    let verdict = session.handle_checksum_command(5, &Command::logic_checksum(0x22, 0), false);
    assert_eq!(verdict, ChecksumVerdict::Match);

    // Checksums from the other player are not ours to compare
    let verdict = session.handle_checksum_command(5, &Command::logic_checksum(0x99, 1), false);
    assert_eq!(verdict, ChecksumVerdict::Skipped);
    assert!(!session.saw_desync());
}

#[test]
fn test_instance_file_names() {
    let dir = TempDir::new().unwrap();
    let mut config = SessionConfig::new(dir.path(), version());
    assert_eq!(
        RecorderSession::new(config.clone()).last_replay_file_name(),
        "00000000"
    );
    config.instance_id = 3;
    let session = RecorderSession::new(config);
    assert_eq!(session.last_replay_file_name(), "00000000_Instance03");
    assert!(
        session
            .last_replay_path()
            .ends_with("00000000_Instance03.rep")
    );
}

#[test]
fn test_archive_replay() {
    let dir = TempDir::new().unwrap();
    let mut session = session(&dir);
    record_sample(&mut session);

    let archived = session.archive_replay("my match").unwrap();
    assert!(archived.ends_with("my match.rep"));
    let header = RecorderSession::read_replay_header(&archived).unwrap();
    assert_eq!(header.frame_count, 8);
}
