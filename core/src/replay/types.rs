//! Core types for the replay system
//!
//! Constants for the on-disk layout plus the in-memory header representation.

use chrono::{Datelike, Local, Timelike};

use super::setup::GameSetup;

/// File magic, written without a terminator
pub const REPLAY_MAGIC: &[u8; 6] = b"GENREP";

/// Replay file extension (without the dot)
pub const REPLAY_EXTENSION: &str = "rep";

/// Maximum number of player slots in a game setup
pub const MAX_SLOTS: usize = 8;

/// Longest string (in code units) read from a header before truncation
pub const MAX_HEADER_STRING: usize = 1024;

/// Logic frames simulated per second of game time
pub const LOGIC_FRAMES_PER_SECOND: u32 = 30;

// Byte offsets of the fixed-size trailer. The writer patches these in place
// after the variable-length fields have been appended, so they must never move
// without a format change.
pub const START_TIME_OFFSET: u64 = 6;
pub const END_TIME_OFFSET: u64 = 10;
pub const FRAME_COUNT_OFFSET: u64 = 14;
pub const DESYNC_OFFSET: u64 = 18;
pub const QUIT_EARLY_OFFSET: u64 = 19;
pub const DISCONNECT_OFFSET: u64 = 20;
/// Length of magic plus fixed trailer
pub const FIXED_HEADER_LEN: u64 = 28;

const _: () = assert!(START_TIME_OFFSET == REPLAY_MAGIC.len() as u64);
const _: () = assert!(END_TIME_OFFSET == START_TIME_OFFSET + 4);
const _: () = assert!(FRAME_COUNT_OFFSET == END_TIME_OFFSET + 4);
const _: () = assert!(DESYNC_OFFSET == FRAME_COUNT_OFFSET + 4);
const _: () = assert!(QUIT_EARLY_OFFSET == DESYNC_OFFSET + 1);
const _: () = assert!(DISCONNECT_OFFSET == QUIT_EARLY_OFFSET + 1);
const _: () = assert!(DISCONNECT_OFFSET + MAX_SLOTS as u64 == FIXED_HEADER_LEN);

/// Game modes as stored in the header and in `NewGame` commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum GameMode {
    None = -1,
    Shell = 0,
    SinglePlayer = 1,
    Lan = 2,
    Skirmish = 3,
    Replay = 4,
    Internet = 5,
}

impl GameMode {
    pub fn from_i32(value: i32) -> Option<Self> {
        Some(match value {
            -1 => Self::None,
            0 => Self::Shell,
            1 => Self::SinglePlayer,
            2 => Self::Lan,
            3 => Self::Skirmish,
            4 => Self::Replay,
            5 => Self::Internet,
            _ => return None,
        })
    }

    /// Whether starting a game in this mode produces a replay.
    ///
    /// Menus, campaign, "no game" and replays themselves never record.
    pub fn is_recordable(self) -> bool {
        !matches!(
            self,
            Self::Shell | Self::SinglePlayer | Self::None | Self::Replay
        )
    }
}

/// AI / campaign difficulty
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(i32)]
pub enum Difficulty {
    Easy = 0,
    #[default]
    Normal = 1,
    Hard = 2,
}

impl Difficulty {
    pub fn from_i32(value: i32) -> Option<Self> {
        Some(match value {
            0 => Self::Easy,
            1 => Self::Normal,
            2 => Self::Hard,
            _ => return None,
        })
    }
}

/// Recorder session state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum RecorderMode {
    #[default]
    Idle,
    Recording,
    /// Paced playback driven by the full client loop
    Playback,
    /// Logic-only playback for headless validation
    SimulationPlayback,
    /// Offline decode pass; nothing is injected
    Analysis,
}

impl RecorderMode {
    /// Whether this mode reads commands from a replay file
    pub fn is_playback_family(self) -> bool {
        matches!(
            self,
            Self::Playback | Self::SimulationPlayback | Self::Analysis
        )
    }
}

/// Parameters of `start_recording`, mirroring the `NewGame` command arguments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordingOptions {
    pub difficulty: Difficulty,
    pub mode: GameMode,
    pub rank_points: i32,
    pub max_fps: i32,
}

impl Default for RecordingOptions {
    fn default() -> Self {
        Self {
            difficulty: Difficulty::Normal,
            mode: GameMode::Skirmish,
            rank_points: 0,
            max_fps: 0,
        }
    }
}

/// Local wall-clock snapshot written once per replay (informational).
///
/// Stored as eight little-endian `u16`s.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TimeSnapshot {
    pub year: u16,
    pub month: u16,
    /// 0 = Sunday
    pub day_of_week: u16,
    pub day: u16,
    pub hour: u16,
    pub minute: u16,
    pub second: u16,
    pub millisecond: u16,
}

impl TimeSnapshot {
    /// Capture the current local time
    pub fn now() -> Self {
        let now = Local::now();
        Self {
            year: now.year().clamp(0, u16::MAX as i32) as u16,
            month: now.month() as u16,
            day_of_week: now.weekday().num_days_from_sunday() as u16,
            day: now.day() as u16,
            hour: now.hour() as u16,
            minute: now.minute() as u16,
            second: now.second() as u16,
            millisecond: (now.timestamp_subsec_millis().min(999)) as u16,
        }
    }

    pub fn to_fields(self) -> [u16; 8] {
        [
            self.year,
            self.month,
            self.day_of_week,
            self.day,
            self.hour,
            self.minute,
            self.second,
            self.millisecond,
        ]
    }

    pub fn from_fields(f: [u16; 8]) -> Self {
        Self {
            year: f[0],
            month: f[1],
            day_of_week: f[2],
            day: f[3],
            hour: f[4],
            minute: f[5],
            second: f[6],
            millisecond: f[7],
        }
    }
}

/// Identity of the build that wrote (or is reading) a replay.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct VersionInfo {
    /// Human-readable version, e.g. "1.4.0"
    pub version: String,
    /// Build timestamp string
    pub build_time: String,
    /// Packed version number; the upper 16 bits carry the command schema version
    pub version_number: u32,
    /// Checksum of the executable
    pub exe_checksum: u32,
    /// Checksum of the loaded configuration
    pub ini_checksum: u32,
}

impl VersionInfo {
    /// Command schema version packed into `version_number`.
    pub fn schema_version(&self) -> u32 {
        self.version_number >> 16
    }

    /// Describe every field that differs from `other`; empty when identical.
    pub fn differences(&self, other: &VersionInfo) -> Vec<String> {
        let mut diffs = Vec::new();
        if self.version != other.version {
            diffs.push(format!("version [{}] vs [{}]", self.version, other.version));
        }
        if self.build_time != other.build_time {
            diffs.push(format!(
                "build time [{}] vs [{}]",
                self.build_time, other.build_time
            ));
        }
        if self.version_number != other.version_number {
            diffs.push(format!(
                "version number {:08X} vs {:08X}",
                self.version_number, other.version_number
            ));
        }
        if self.exe_checksum != other.exe_checksum {
            diffs.push(format!(
                "exe checksum {:08X} vs {:08X}",
                self.exe_checksum, other.exe_checksum
            ));
        }
        if self.ini_checksum != other.ini_checksum {
            diffs.push(format!(
                "ini checksum {:08X} vs {:08X}",
                self.ini_checksum, other.ini_checksum
            ));
        }
        diffs
    }
}

/// Complete replay header.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplayHeader {
    /// Unix seconds when the game started
    pub start_time: u32,
    /// Unix seconds when recording stopped (0 while in progress)
    pub end_time: u32,
    /// Number of logic frames recorded
    pub frame_count: u32,
    /// Set when a checksum mismatch was observed while recording
    pub desync: bool,
    /// Set when the local player left before the game ended
    pub quit_early: bool,
    /// Per-slot disconnect flags
    pub player_disconnects: [bool; MAX_SLOTS],
    pub display_name: String,
    pub time_snapshot: TimeSnapshot,
    pub version: VersionInfo,
    pub game_setup: GameSetup,
    /// Slot of the recording player, or -1 for an observer
    pub local_slot: i32,
    pub difficulty: i32,
    pub original_mode: i32,
    pub rank_points: i32,
    pub max_fps: i32,
}

impl ReplayHeader {
    /// Whether the recording player was connected to other humans.
    pub fn is_multiplayer(&self) -> bool {
        usize::try_from(self.local_slot)
            .ok()
            .and_then(|slot| self.game_setup.slot(slot))
            .is_some_and(|slot| slot.ip() != 0)
    }

    /// Length of the recording in seconds of game time
    pub fn game_time_secs(&self) -> u32 {
        self.frame_count / LOGIC_FRAMES_PER_SECOND
    }
}

/// Current Unix time truncated to the 32-bit header field.
pub fn unix_time_now() -> u32 {
    chrono::Utc::now().timestamp().clamp(0, u32::MAX as i64) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recordable_modes() {
        assert!(GameMode::Skirmish.is_recordable());
        assert!(GameMode::Lan.is_recordable());
        assert!(GameMode::Internet.is_recordable());
        assert!(!GameMode::Shell.is_recordable());
        assert!(!GameMode::SinglePlayer.is_recordable());
        assert!(!GameMode::None.is_recordable());
        assert!(!GameMode::Replay.is_recordable());
    }

    #[test]
    fn test_version_differences() {
        let a = VersionInfo {
            version: "1.0.0".into(),
            build_time: "2025-01-01".into(),
            version_number: 0x0001_0100,
            exe_checksum: 1,
            ini_checksum: 2,
        };
        assert!(a.differences(&a.clone()).is_empty());

        let mut b = a.clone();
        b.exe_checksum = 9;
        b.ini_checksum = 7;
        let diffs = b.differences(&a);
        assert_eq!(diffs.len(), 2);
        assert!(diffs[0].starts_with("exe checksum"));
        assert_eq!(a.schema_version(), 1);
    }

    #[test]
    fn test_time_snapshot_fields() {
        let snap = TimeSnapshot::now();
        assert_eq!(TimeSnapshot::from_fields(snap.to_fields()), snap);
        assert!((1..=12).contains(&snap.month));
        assert!(snap.day_of_week < 7);
    }
}
