//! Command shape table
//!
//! Replay records carry only a compact `(type, count)` table for their
//! arguments, so the argument layout of every command type is fixed here and
//! checked on both the write and the read side. Any change to a shape must bump
//! [`COMMAND_SCHEMA_VERSION`].

use super::{ArgumentType, CommandType};

/// Version of the shape table below.
pub const COMMAND_SCHEMA_VERSION: u32 = 1;

/// Expected argument layout for one command type.
///
/// `fixed` arguments come first, in order; `repeat` allows any number of
/// trailing arguments of one type (including none).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandShape {
    pub fixed: &'static [ArgumentType],
    pub repeat: Option<ArgumentType>,
}

impl CommandShape {
    const fn fixed(fixed: &'static [ArgumentType]) -> Self {
        Self {
            fixed,
            repeat: None,
        }
    }

    const fn repeating(fixed: &'static [ArgumentType], repeat: ArgumentType) -> Self {
        Self {
            fixed,
            repeat: Some(repeat),
        }
    }

    /// Shape registered for a command type
    pub fn of(ty: CommandType) -> Self {
        use ArgumentType::*;
        match ty {
            CommandType::NewGame => Self::repeating(&[Integer], Integer),
            CommandType::ClearGameData => Self::fixed(&[]),
            CommandType::LogicChecksum => Self::fixed(&[Integer]),
            CommandType::SelectUnits => Self::repeating(&[Boolean], ObjectId),
            CommandType::MoveTo => Self::fixed(&[Location]),
            CommandType::AttackObject => Self::fixed(&[ObjectId]),
            CommandType::AttackDrawable => Self::fixed(&[DrawableId]),
            CommandType::SetRallyPoint => Self::fixed(&[ObjectId, Location]),
            CommandType::AreaSelect => Self::fixed(&[PixelRegion]),
            CommandType::PlaceBeacon => Self::fixed(&[Location, Pixel]),
            CommandType::SendChat => Self::repeating(&[Integer], WideChar),
            CommandType::SetTeam => Self::fixed(&[TeamId]),
            CommandType::UseSpecialPower => Self::fixed(&[Integer, Real, Timestamp]),
            CommandType::SetGameSpeed => Self::fixed(&[Real]),
            CommandType::PlayerQuit => Self::fixed(&[]),
            CommandType::Surrender => Self::fixed(&[TeamId]),
        }
    }

    /// Check an argument type sequence against this shape.
    pub fn accepts<I>(&self, types: I) -> bool
    where
        I: IntoIterator<Item = ArgumentType>,
    {
        let mut types = types.into_iter();
        for expected in self.fixed {
            if types.next() != Some(*expected) {
                return false;
            }
        }
        match self.repeat {
            Some(repeat) => types.all(|ty| ty == repeat),
            None => types.next().is_none(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ArgumentType::*;

    #[test]
    fn test_fixed_shape() {
        let shape = CommandShape::of(CommandType::SetRallyPoint);
        assert!(shape.accepts([ObjectId, Location]));
        assert!(!shape.accepts([ObjectId]));
        assert!(!shape.accepts([ObjectId, Location, Location]));
        assert!(!shape.accepts([Location, ObjectId]));
    }

    #[test]
    fn test_repeating_shape() {
        let shape = CommandShape::of(CommandType::SendChat);
        assert!(shape.accepts([Integer]));
        assert!(shape.accepts([Integer, WideChar, WideChar, WideChar]));
        assert!(!shape.accepts([Integer, WideChar, Integer]));
        assert!(!shape.accepts([WideChar]));
    }

    #[test]
    fn test_empty_shape() {
        let shape = CommandShape::of(CommandType::ClearGameData);
        assert!(shape.accepts([]));
        assert!(!shape.accepts([Integer]));
    }
}
