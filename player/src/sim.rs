//! Deterministic reference simulation
//!
//! Stands in for a real game: the state is a running xxh3 digest over the
//! setup and every gameplay command applied, so two runs agree exactly when
//! they were fed the same commands on the same frames.

use anyhow::Result;
use xxhash_rust::xxh3::Xxh3;

use rewind_core::command::{Argument, Command, CommandList, CommandType};
use rewind_core::replay::{GameSetup, SimulationBackend};

/// Simulation whose whole state is one hash.
#[derive(Debug, Clone, Default)]
pub struct ReferenceSimulation {
    state: u64,
    checksum_interval: u32,
    in_game: bool,
    applied: u64,
    paused: bool,
}

impl ReferenceSimulation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state digest
    pub fn state(&self) -> u64 {
        self.state
    }

    /// Gameplay commands applied since the last `load_setup`
    pub fn applied(&self) -> u64 {
        self.applied
    }

    /// Between `NewGame` and `ClearGameData`
    pub fn in_game(&self) -> bool {
        self.in_game
    }

    /// Checksum reported for the current state
    pub fn checksum(&self) -> u32 {
        (self.state as u32) ^ ((self.state >> 32) as u32)
    }

    fn apply(&mut self, hasher: &mut Xxh3, command: &Command) {
        match command.ty {
            CommandType::NewGame => self.in_game = true,
            CommandType::ClearGameData => self.in_game = false,
            // Checksums describe the state; they never change it
            CommandType::LogicChecksum => {}
            ty => {
                hasher.update(&ty.id().to_le_bytes());
                hasher.update(&command.player_index.to_le_bytes());
                for arg in &command.args {
                    hash_argument(hasher, arg);
                }
                self.applied += 1;
            }
        }
    }
}

impl SimulationBackend for ReferenceSimulation {
    fn load_setup(&mut self, setup: &GameSetup) -> Result<()> {
        let mut hasher = Xxh3::new();
        hasher.update(&setup.seed.to_le_bytes());
        hasher.update(setup.map.as_bytes());
        for index in setup.occupied() {
            hasher.update(&(index as u32).to_le_bytes());
        }
        self.state = hasher.digest();
        self.checksum_interval = setup.checksum_interval.max(1);
        self.in_game = false;
        self.applied = 0;
        tracing::debug!(seed = setup.seed, map = %setup.map, "reference simulation loaded");
        Ok(())
    }

    fn step(&mut self, frame: u32, commands: &mut CommandList) -> Result<Option<u32>> {
        let mut hasher = Xxh3::new();
        hasher.update(&self.state.to_le_bytes());
        hasher.update(&frame.to_le_bytes());
        let pending: Vec<Command> = commands.drain().collect();
        for command in &pending {
            self.apply(&mut hasher, command);
        }
        self.state = hasher.digest();

        let due = (frame + 1) % self.checksum_interval == 0;
        Ok((due && self.in_game).then(|| self.checksum()))
    }

    fn set_paused(&mut self, paused: bool) {
        self.paused = paused;
    }

    fn is_paused(&self) -> bool {
        self.paused
    }
}

fn hash_argument(hasher: &mut Xxh3, arg: &Argument) {
    hasher.update(&[arg.ty().tag()]);
    match *arg {
        Argument::Integer(v) => hasher.update(&v.to_le_bytes()),
        Argument::Real(v) => hasher.update(&v.to_bits().to_le_bytes()),
        Argument::Boolean(v) => hasher.update(&[u8::from(v)]),
        Argument::ObjectId(v) | Argument::DrawableId(v) | Argument::TeamId(v) => {
            hasher.update(&v.to_le_bytes())
        }
        Argument::Timestamp(v) => hasher.update(&v.to_le_bytes()),
        Argument::Location(v) => {
            for c in v.to_array() {
                hasher.update(&c.to_bits().to_le_bytes());
            }
        }
        Argument::Pixel(v) => {
            hasher.update(&v.x.to_le_bytes());
            hasher.update(&v.y.to_le_bytes());
        }
        Argument::PixelRegion(r) => {
            for c in [r.lo.x, r.lo.y, r.hi.x, r.hi.y] {
                hasher.update(&c.to_le_bytes());
            }
        }
        Argument::WideChar(v) => hasher.update(&v.to_le_bytes()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;

    fn move_to(player: i32, x: f32) -> Command {
        Command::new(CommandType::MoveTo, player).with_arg(Argument::Location(Vec3::new(x, 0.0, 1.0)))
    }

    fn new_game(mode: i32, difficulty: i32) -> Command {
        Command::new(CommandType::NewGame, -1)
            .with_arg(Argument::Integer(mode))
            .with_arg(Argument::Integer(difficulty))
    }

    fn run(frames: &[Vec<Command>]) -> (ReferenceSimulation, Vec<Option<u32>>) {
        let mut setup = GameSetup::single_player("Plains", 42);
        setup.checksum_interval = 2;
        let mut sim = ReferenceSimulation::new();
        sim.load_setup(&setup).unwrap();
        let mut checksums = Vec::new();
        for (frame, batch) in frames.iter().enumerate() {
            let mut list = CommandList::new();
            for command in batch {
                list.append(command.clone());
            }
            checksums.push(sim.step(frame as u32, &mut list).unwrap());
            assert!(list.is_empty());
        }
        (sim, checksums)
    }

    #[test]
    fn test_same_commands_same_checksums() {
        let frames = vec![vec![new_game(3, 1)], vec![move_to(0, 1.0)], vec![], vec![]];
        let (a, sums_a) = run(&frames);
        let (b, sums_b) = run(&frames);
        assert_eq!(a.state(), b.state());
        assert_eq!(sums_a, sums_b);
        assert_eq!(a.applied(), 1);
        assert!(sums_a[0].is_none());
        assert!(sums_a[1].is_some());
        assert!(sums_a[3].is_some());
    }

    #[test]
    fn test_gameplay_changes_state() {
        let (a, _) = run(&[vec![new_game(3, 1)], vec![move_to(0, 1.0)]]);
        let (b, _) = run(&[vec![new_game(3, 1)], vec![move_to(0, 2.0)]]);
        let (c, _) = run(&[vec![new_game(3, 1)], vec![], vec![move_to(0, 1.0)]]);
        assert_ne!(a.state(), b.state());
        assert_ne!(a.checksum(), c.checksum());
    }

    #[test]
    fn test_control_commands_do_not_change_state() {
        let (recorded, _) = run(&[
            vec![new_game(3, 1)],
            vec![move_to(0, 1.0), Command::logic_checksum(7, 0)],
        ]);
        let (replayed, _) = run(&[vec![new_game(4, 2)], vec![move_to(0, 1.0)]]);
        assert_eq!(recorded.state(), replayed.state());
    }

    #[test]
    fn test_no_checksums_outside_a_game() {
        let (sim, sums) = run(&[vec![], vec![], vec![], vec![]]);
        assert!(!sim.in_game());
        assert!(sums.iter().all(Option::is_none));
    }
}
