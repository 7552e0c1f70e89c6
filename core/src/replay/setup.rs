//! Game setup snapshot
//!
//! The setup of a session (map, seed, slot list) is stored inside the replay
//! header as a compact `key=value;` string:
//!
//! ```text
//! M=maps/alpine;SD=12345;C=100;S=HAlice,C0A80102,0:CN,1:O:X:X:X:X:X;
//! ```
//!
//! Slots are separated by `:` and take one of the forms `H<name>,<ip hex>,<team>`
//! (human), `C<E|N|H>,<team>` (computer), `O` (open) or `X` (closed).

use std::fmt;
use std::str::FromStr;

use super::types::{Difficulty, MAX_SLOTS};

/// Default checksum interval in frames
pub const DEFAULT_CHECKSUM_INTERVAL: u32 = 100;

/// Game setup string parse errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SetupError {
    #[error("missing `{0}` entry")]
    MissingKey(&'static str),
    #[error("malformed entry `{0}`")]
    MalformedEntry(String),
    #[error("wrong number of slots: {0}")]
    SlotCount(usize),
    #[error("malformed slot `{0}`")]
    MalformedSlot(String),
    #[error("setup has no occupied slot")]
    NoPlayers,
}

/// One seat in the game setup
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Slot {
    Open,
    Closed,
    Human { name: String, ip: u32, team: i32 },
    Computer { difficulty: Difficulty, team: i32 },
}

impl Slot {
    /// Network address of a human player; 0 for local or non-human slots.
    pub fn ip(&self) -> u32 {
        match self {
            Slot::Human { ip, .. } => *ip,
            _ => 0,
        }
    }

    pub fn is_occupied(&self) -> bool {
        matches!(self, Slot::Human { .. } | Slot::Computer { .. })
    }

    pub fn is_human(&self) -> bool {
        matches!(self, Slot::Human { .. })
    }

    /// Display name of the slot
    pub fn name(&self) -> &str {
        match self {
            Slot::Human { name, .. } => name,
            Slot::Computer { .. } => "Computer",
            Slot::Open => "Open",
            Slot::Closed => "Closed",
        }
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Slot::Open => f.write_str("O"),
            Slot::Closed => f.write_str("X"),
            Slot::Human { name, ip, team } => write!(f, "H{},{ip:X},{team}", sanitize(name)),
            Slot::Computer { difficulty, team } => {
                let d = match difficulty {
                    Difficulty::Easy => 'E',
                    Difficulty::Normal => 'N',
                    Difficulty::Hard => 'H',
                };
                write!(f, "C{d},{team}")
            }
        }
    }
}

impl FromStr for Slot {
    type Err = SetupError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = || SetupError::MalformedSlot(s.to_string());
        match s.chars().next() {
            Some('O') if s.len() == 1 => Ok(Slot::Open),
            Some('X') if s.len() == 1 => Ok(Slot::Closed),
            Some('H') => {
                let mut parts = s[1..].split(',');
                let name = parts.next().filter(|n| !n.is_empty()).ok_or_else(bad)?;
                let ip = parts
                    .next()
                    .and_then(|v| u32::from_str_radix(v, 16).ok())
                    .ok_or_else(bad)?;
                let team = parts.next().and_then(|v| v.parse().ok()).ok_or_else(bad)?;
                if parts.next().is_some() {
                    return Err(bad());
                }
                Ok(Slot::Human {
                    name: name.to_string(),
                    ip,
                    team,
                })
            }
            Some('C') => {
                let (level, team) = s[1..].split_once(',').ok_or_else(bad)?;
                let difficulty = match level {
                    "E" => Difficulty::Easy,
                    "N" => Difficulty::Normal,
                    "H" => Difficulty::Hard,
                    _ => return Err(bad()),
                };
                let team = team.parse().map_err(|_| bad())?;
                Ok(Slot::Computer { difficulty, team })
            }
            _ => Err(bad()),
        }
    }
}

/// Replace separator characters so free text cannot break the setup string.
fn sanitize(text: &str) -> String {
    text.chars()
        .map(|c| if matches!(c, ',' | ':' | ';' | '=') { '_' } else { c })
        .collect()
}

/// Map, seed and slot layout of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GameSetup {
    pub map: String,
    pub seed: u32,
    /// Frames between logic checksums
    pub checksum_interval: u32,
    pub slots: [Slot; MAX_SLOTS],
}

impl GameSetup {
    /// One local human against nobody; used when no setup was provided.
    pub fn single_player(map: impl Into<String>, seed: u32) -> Self {
        let mut slots: [Slot; MAX_SLOTS] = std::array::from_fn(|_| Slot::Closed);
        slots[0] = Slot::Human {
            name: "Player".to_string(),
            ip: 0,
            team: -1,
        };
        Self {
            map: map.into(),
            seed,
            checksum_interval: DEFAULT_CHECKSUM_INTERVAL,
            slots,
        }
    }

    pub fn slot(&self, index: usize) -> Option<&Slot> {
        self.slots.get(index)
    }

    /// Indices of occupied slots
    pub fn occupied(&self) -> impl Iterator<Item = usize> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, s)| s.is_occupied())
            .map(|(i, _)| i)
    }
}

impl fmt::Display for GameSetup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "M={};SD={};C={};S=",
            sanitize(&self.map),
            self.seed,
            self.checksum_interval
        )?;
        for (i, slot) in self.slots.iter().enumerate() {
            if i > 0 {
                f.write_str(":")?;
            }
            write!(f, "{slot}")?;
        }
        f.write_str(";")
    }
}

impl FromStr for GameSetup {
    type Err = SetupError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut map = None;
        let mut seed = None;
        let mut checksum_interval = DEFAULT_CHECKSUM_INTERVAL;
        let mut slots = None;

        for entry in s.split(';').filter(|e| !e.is_empty()) {
            let (key, value) = entry
                .split_once('=')
                .ok_or_else(|| SetupError::MalformedEntry(entry.to_string()))?;
            let malformed = || SetupError::MalformedEntry(entry.to_string());
            match key {
                "M" => map = Some(value.to_string()),
                "SD" => seed = Some(value.parse().map_err(|_| malformed())?),
                "C" => checksum_interval = value.parse().map_err(|_| malformed())?,
                "S" => {
                    let parsed = value
                        .split(':')
                        .map(Slot::from_str)
                        .collect::<Result<Vec<_>, _>>()?;
                    let count = parsed.len();
                    let array: [Slot; MAX_SLOTS] = parsed
                        .try_into()
                        .map_err(|_| SetupError::SlotCount(count))?;
                    slots = Some(array);
                }
                // Unknown keys are tolerated so newer writers stay readable
                _ => tracing::debug!(key, "ignoring unknown game setup key"),
            }
        }

        let setup = GameSetup {
            map: map.ok_or(SetupError::MissingKey("M"))?,
            seed: seed.ok_or(SetupError::MissingKey("SD"))?,
            checksum_interval,
            slots: slots.ok_or(SetupError::MissingKey("S"))?,
        };
        if setup.occupied().next().is_none() {
            return Err(SetupError::NoPlayers);
        }
        Ok(setup)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lan_setup() -> GameSetup {
        let mut setup = GameSetup::single_player("maps/alpine", 12345);
        setup.slots[0] = Slot::Human {
            name: "Alice".into(),
            ip: 0xC0A8_0102,
            team: 0,
        };
        setup.slots[1] = Slot::Computer {
            difficulty: Difficulty::Hard,
            team: 1,
        };
        setup.slots[2] = Slot::Open;
        setup
    }

    #[test]
    fn test_setup_string_format() {
        let text = lan_setup().to_string();
        assert_eq!(
            text,
            "M=maps/alpine;SD=12345;C=100;S=HAlice,C0A80102,0:CH,1:O:X:X:X:X:X;"
        );
        assert_eq!(text.parse::<GameSetup>().unwrap(), lan_setup());
    }

    #[test]
    fn test_parse_rejects_bad_slot_count() {
        let err = "M=x;SD=1;S=HBob,0,0:O;".parse::<GameSetup>().unwrap_err();
        assert_eq!(err, SetupError::SlotCount(2));
    }

    #[test]
    fn test_parse_rejects_missing_keys() {
        let err = "SD=1;S=HBob,0,0:O:O:O:O:O:O:O;"
            .parse::<GameSetup>()
            .unwrap_err();
        assert_eq!(err, SetupError::MissingKey("M"));
    }

    #[test]
    fn test_parse_rejects_empty_setup() {
        let err = "M=x;SD=1;S=O:O:O:O:O:O:O:O;"
            .parse::<GameSetup>()
            .unwrap_err();
        assert_eq!(err, SetupError::NoPlayers);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!("not a setup".parse::<GameSetup>().is_err());
        assert!("M=x;SD=1;S=Q:O:O:O:O:O:O:O;".parse::<GameSetup>().is_err());
        assert!("M=x;SD=abc;S=HBob,0,0:O:O:O:O:O:O:O;"
            .parse::<GameSetup>()
            .is_err());
    }

    #[test]
    fn test_slot_ip() {
        let setup = lan_setup();
        assert_eq!(setup.slot(0).unwrap().ip(), 0xC0A8_0102);
        assert_eq!(setup.slot(1).unwrap().ip(), 0);
        assert_eq!(setup.occupied().collect::<Vec<_>>(), vec![0, 1]);
    }
}
