//! Error types for the replay subsystem

use std::io;

use crate::command::CommandType;
use crate::replay::setup::SetupError;

/// Errors raised while recording, reading or playing back replays.
#[derive(Debug, thiserror::Error)]
pub enum ReplayError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("not a replay file (bad magic)")]
    BadMagic,

    #[error("replay header is truncated")]
    TruncatedHeader,

    #[error("replay game setup is invalid: {0}")]
    InvalidGameSetup(#[from] SetupError),

    #[error("local slot index `{0}` is out of range")]
    InvalidLocalSlot(String),

    #[error("a replay file is already open")]
    AlreadyRecording,

    #[error("recorder is busy ({0:?})")]
    Busy(crate::replay::RecorderMode),

    #[error("{ty} arguments do not match the command schema")]
    ArgumentShape { ty: CommandType },

    #[error("{field} is {len} bytes, too long for a replay header")]
    HeaderFieldTooLong { field: &'static str, len: usize },

    #[error("command has {0} argument groups, more than a record can hold")]
    TooManyGroups(usize),

    #[error("unknown command type {0}")]
    UnknownCommandType(u32),

    #[error("unknown argument type tag {0}")]
    UnknownArgumentType(u8),
}

impl ReplayError {
    /// Whether this error means the file is not a usable replay.
    pub fn is_format_error(&self) -> bool {
        matches!(
            self,
            ReplayError::BadMagic
                | ReplayError::TruncatedHeader
                | ReplayError::InvalidGameSetup(_)
                | ReplayError::InvalidLocalSlot(_)
        )
    }
}
