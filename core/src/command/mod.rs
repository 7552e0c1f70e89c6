//! Command model
//!
//! Frame-tagged, typed commands with a heterogeneous argument list. Commands are
//! produced by the simulation's input translators, recorded verbatim into replay
//! files, and injected back into the live [`CommandList`] during playback.

mod handler;
pub mod schema;

pub use handler::{CommandHandler, Disposition, HandlerChain, HandlerId};
pub use schema::{COMMAND_SCHEMA_VERSION, CommandShape};

use glam::{IVec2, Vec3};
use smallvec::SmallVec;
use std::fmt;

/// First id of the network command range (exclusive).
pub const NETWORK_RANGE_START: u32 = 1000;
/// Last id of the network command range (exclusive).
pub const NETWORK_RANGE_END: u32 = 1999;

/// Command type identifiers as stored on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum CommandType {
    /// Starts a new game: [mode, difficulty?, rank points?, max fps?]
    NewGame = 1,
    /// Tears down the running game
    ClearGameData = 2,

    /// Periodic state checksum computed by the sending player
    LogicChecksum = 1001,
    SelectUnits = 1002,
    MoveTo = 1003,
    AttackObject = 1004,
    AttackDrawable = 1005,
    SetRallyPoint = 1006,
    AreaSelect = 1007,
    PlaceBeacon = 1008,
    SendChat = 1009,
    SetTeam = 1010,
    UseSpecialPower = 1011,
    SetGameSpeed = 1012,
    PlayerQuit = 1013,
    Surrender = 1014,
}

impl CommandType {
    /// Every known command type, in id order.
    pub const ALL: [CommandType; 16] = [
        CommandType::NewGame,
        CommandType::ClearGameData,
        CommandType::LogicChecksum,
        CommandType::SelectUnits,
        CommandType::MoveTo,
        CommandType::AttackObject,
        CommandType::AttackDrawable,
        CommandType::SetRallyPoint,
        CommandType::AreaSelect,
        CommandType::PlaceBeacon,
        CommandType::SendChat,
        CommandType::SetTeam,
        CommandType::UseSpecialPower,
        CommandType::SetGameSpeed,
        CommandType::PlayerQuit,
        CommandType::Surrender,
    ];

    /// Numeric id written to replay files
    pub fn id(self) -> u32 {
        self as u32
    }

    /// Look up a command type by its on-disk id
    pub fn from_id(id: u32) -> Option<Self> {
        Self::ALL.iter().copied().find(|ty| ty.id() == id)
    }

    /// Whether this command travels over the network during a live session.
    pub fn is_network(self) -> bool {
        let id = self.id();
        id > NETWORK_RANGE_START && id < NETWORK_RANGE_END
    }
}

impl fmt::Display for CommandType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Argument type tags as stored in the per-record group table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ArgumentType {
    Integer = 0,
    Real = 1,
    Boolean = 2,
    ObjectId = 3,
    DrawableId = 4,
    TeamId = 5,
    Location = 6,
    Pixel = 7,
    PixelRegion = 8,
    Timestamp = 9,
    WideChar = 10,
}

impl ArgumentType {
    /// Decode an on-disk tag
    pub fn from_tag(tag: u8) -> Option<Self> {
        Some(match tag {
            0 => Self::Integer,
            1 => Self::Real,
            2 => Self::Boolean,
            3 => Self::ObjectId,
            4 => Self::DrawableId,
            5 => Self::TeamId,
            6 => Self::Location,
            7 => Self::Pixel,
            8 => Self::PixelRegion,
            9 => Self::Timestamp,
            10 => Self::WideChar,
            _ => return None,
        })
    }

    /// On-disk tag
    pub fn tag(self) -> u8 {
        self as u8
    }

    /// Encoded width of one value of this type in bytes
    pub fn encoded_size(self) -> usize {
        match self {
            Self::Integer | Self::Real | Self::ObjectId | Self::DrawableId | Self::TeamId => 4,
            Self::Timestamp => 4,
            Self::Boolean => 1,
            Self::Location => 12,
            Self::Pixel => 8,
            Self::PixelRegion => 16,
            Self::WideChar => 2,
        }
    }
}

/// Screen-space rectangle given by two corners.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelRegion {
    pub lo: IVec2,
    pub hi: IVec2,
}

/// One command argument.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Argument {
    Integer(i32),
    Real(f32),
    Boolean(bool),
    ObjectId(u32),
    DrawableId(u32),
    TeamId(u32),
    Location(Vec3),
    Pixel(IVec2),
    PixelRegion(PixelRegion),
    Timestamp(u32),
    WideChar(u16),
}

impl Argument {
    /// Tag of this argument
    pub fn ty(&self) -> ArgumentType {
        match self {
            Argument::Integer(_) => ArgumentType::Integer,
            Argument::Real(_) => ArgumentType::Real,
            Argument::Boolean(_) => ArgumentType::Boolean,
            Argument::ObjectId(_) => ArgumentType::ObjectId,
            Argument::DrawableId(_) => ArgumentType::DrawableId,
            Argument::TeamId(_) => ArgumentType::TeamId,
            Argument::Location(_) => ArgumentType::Location,
            Argument::Pixel(_) => ArgumentType::Pixel,
            Argument::PixelRegion(_) => ArgumentType::PixelRegion,
            Argument::Timestamp(_) => ArgumentType::Timestamp,
            Argument::WideChar(_) => ArgumentType::WideChar,
        }
    }

    pub fn as_integer(&self) -> Option<i32> {
        match *self {
            Argument::Integer(v) => Some(v),
            _ => None,
        }
    }
}

impl fmt::Display for Argument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Argument::Integer(v) => write!(f, "Integer {v}"),
            Argument::Real(v) => write!(f, "Real {v:.3}"),
            Argument::Boolean(v) => write!(f, "Boolean {v}"),
            Argument::ObjectId(v) => write!(f, "ObjectId {v}"),
            Argument::DrawableId(v) => write!(f, "DrawableId {v}"),
            Argument::TeamId(v) => write!(f, "TeamId {v}"),
            Argument::Location(v) => write!(f, "Location ({:.2}, {:.2}, {:.2})", v.x, v.y, v.z),
            Argument::Pixel(v) => write!(f, "Pixel ({}, {})", v.x, v.y),
            Argument::PixelRegion(r) => write!(
                f,
                "PixelRegion ({}, {})-({}, {})",
                r.lo.x, r.lo.y, r.hi.x, r.hi.y
            ),
            Argument::Timestamp(v) => write!(f, "Timestamp {v}"),
            Argument::WideChar(v) => match char::from_u32(u32::from(*v)) {
                Some(c) => write!(f, "WideChar {c:?}"),
                None => write!(f, "WideChar {v:#06x}"),
            },
        }
    }
}

/// Argument storage; most commands carry four or fewer.
pub type Arguments = SmallVec<[Argument; 4]>;

/// A frame-tagged command issued by one player.
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    /// Frame the command executes on
    pub frame: u32,
    /// Command type
    pub ty: CommandType,
    /// Issuing player slot (-1 for the local/system player)
    pub player_index: i32,
    /// Arguments in declared order
    pub args: Arguments,
}

impl Command {
    /// Create a command with no arguments
    pub fn new(ty: CommandType, player_index: i32) -> Self {
        Self {
            frame: 0,
            ty,
            player_index,
            args: Arguments::new(),
        }
    }

    /// Builder-style argument append
    pub fn with_arg(mut self, arg: Argument) -> Self {
        self.args.push(arg);
        self
    }

    /// Set the frame tag
    pub fn at_frame(mut self, frame: u32) -> Self {
        self.frame = frame;
        self
    }

    /// Checksum value carried by a [`CommandType::LogicChecksum`] command.
    pub fn checksum(&self) -> Option<u32> {
        if self.ty != CommandType::LogicChecksum {
            return None;
        }
        self.args.first().and_then(Argument::as_integer).map(|v| v as u32)
    }

    /// Build a checksum command for the given player.
    pub fn logic_checksum(checksum: u32, player_index: i32) -> Self {
        Self::new(CommandType::LogicChecksum, player_index)
            .with_arg(Argument::Integer(checksum as i32))
    }

    /// Integer argument at `index`, if present and of that type.
    pub fn integer_arg(&self, index: usize) -> Option<i32> {
        self.args.get(index).and_then(Argument::as_integer)
    }
}

/// Ordered queue of commands awaiting execution by the simulation.
#[derive(Debug, Clone, Default)]
pub struct CommandList {
    commands: Vec<Command>,
}

impl CommandList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a command at the back
    pub fn append(&mut self, command: Command) {
        self.commands.push(command);
    }

    /// Drop every pending command
    pub fn reset(&mut self) {
        self.commands.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Command> {
        self.commands.iter()
    }

    /// Whether any pending command has the given type
    pub fn contains(&self, ty: CommandType) -> bool {
        self.commands.iter().any(|c| c.ty == ty)
    }

    /// Keep only commands matching the predicate, preserving order
    pub fn retain<F: FnMut(&Command) -> bool>(&mut self, f: F) {
        self.commands.retain(f);
    }

    /// Take every pending command, leaving the list empty
    pub fn drain(&mut self) -> std::vec::Drain<'_, Command> {
        self.commands.drain(..)
    }
}

impl<'a> IntoIterator for &'a CommandList {
    type Item = &'a Command;
    type IntoIter = std::slice::Iter<'a, Command>;

    fn into_iter(self) -> Self::IntoIter {
        self.commands.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_network_range() {
        assert!(!CommandType::NewGame.is_network());
        assert!(!CommandType::ClearGameData.is_network());
        assert!(CommandType::LogicChecksum.is_network());
        assert!(CommandType::Surrender.is_network());
    }

    #[test]
    fn test_type_ids_roundtrip() {
        for ty in CommandType::ALL {
            assert_eq!(CommandType::from_id(ty.id()), Some(ty));
        }
        assert_eq!(CommandType::from_id(0), None);
        assert_eq!(CommandType::from_id(1999), None);
    }

    #[test]
    fn test_argument_tags() {
        for tag in 0..=10u8 {
            let ty = ArgumentType::from_tag(tag).unwrap();
            assert_eq!(ty.tag(), tag);
        }
        assert_eq!(ArgumentType::from_tag(11), None);
        assert_eq!(ArgumentType::Location.encoded_size(), 12);
        assert_eq!(ArgumentType::PixelRegion.encoded_size(), 16);
        assert_eq!(ArgumentType::WideChar.encoded_size(), 2);
    }

    #[test]
    fn test_checksum_accessor() {
        let cmd = Command::logic_checksum(0xDEAD_BEEF, 2);
        assert_eq!(cmd.checksum(), Some(0xDEAD_BEEF));
        assert_eq!(cmd.player_index, 2);

        let other = Command::new(CommandType::MoveTo, 0);
        assert_eq!(other.checksum(), None);
    }

    #[test]
    fn test_command_list_order() {
        let mut list = CommandList::new();
        list.append(Command::new(CommandType::MoveTo, 0));
        list.append(Command::new(CommandType::SetTeam, 1));
        list.append(Command::new(CommandType::PlayerQuit, 2));

        list.retain(|c| c.ty != CommandType::SetTeam);
        let types: Vec<_> = list.iter().map(|c| c.ty).collect();
        assert_eq!(types, vec![CommandType::MoveTo, CommandType::PlayerQuit]);

        assert!(list.contains(CommandType::PlayerQuit));
        list.reset();
        assert!(list.is_empty());
    }
}
