//! Demo replay recording
//!
//! Plays a scripted match through the reference simulation with the
//! recorder tapped into the command chain, producing replays that later
//! validate cleanly (or, on request, with a planted checksum mismatch).

use anyhow::{Context, Result, bail};
use glam::{IVec2, Vec3};
use std::path::PathBuf;
use xxhash_rust::xxh3::xxh3_64_with_seed;

use rewind_core::command::{Argument, Command, CommandType, HandlerChain, PixelRegion};
use rewind_core::replay::runtime::RECORDING_TAP_PRIORITY;
use rewind_core::replay::{
    GameMode, GameSetup, RecorderSession, RecordingTap, SessionContext, SimulationBackend, Slot,
};

use crate::sim::ReferenceSimulation;

/// Local player's slot in demo games
const LOCAL_SLOT: i32 = 0;

/// What to record.
#[derive(Debug, Clone, PartialEq)]
pub struct DemoOptions {
    /// Frames to simulate before the game is torn down
    pub frames: u32,
    pub seed: u32,
    /// Record as a networked game against a remote human
    pub multiplayer: bool,
    /// Corrupt the first recorded checksum computed on or after this frame
    pub inject_desync: Option<u32>,
    pub map: String,
}

impl Default for DemoOptions {
    fn default() -> Self {
        Self {
            frames: 600,
            seed: 1,
            multiplayer: false,
            inject_desync: None,
            map: "Tournament Desert".to_string(),
        }
    }
}

impl DemoOptions {
    fn setup(&self) -> GameSetup {
        let mut setup = GameSetup::single_player(self.map.clone(), self.seed);
        if self.multiplayer {
            setup.slots[0] = Slot::Human {
                name: "Host".to_string(),
                ip: 0x0A00_0001,
                team: 0,
            };
            setup.slots[1] = Slot::Human {
                name: "Guest".to_string(),
                ip: 0x0A00_0002,
                team: 1,
            };
        } else {
            setup.slots[1] = Slot::Computer {
                difficulty: Default::default(),
                team: 1,
            };
        }
        setup
    }

    fn mode(&self) -> GameMode {
        if self.multiplayer {
            GameMode::Lan
        } else {
            GameMode::Skirmish
        }
    }
}

/// Record a demo match and archive it as `<replay dir>/<name>.rep`.
///
/// Returns the recorder (idle again) and the archived path.
pub fn record_demo(
    recorder: RecorderSession,
    name: &str,
    options: &DemoOptions,
) -> Result<(RecorderSession, PathBuf)> {
    if options.frames == 0 {
        bail!("a demo needs at least one frame");
    }
    let setup = options.setup();
    let mut sim = ReferenceSimulation::new();
    sim.load_setup(&setup)?;

    let mut ctx = SessionContext::new(recorder);
    ctx.recorder.set_game_setup(setup.clone(), LOCAL_SLOT);
    let mut chain: HandlerChain<SessionContext> = HandlerChain::new();
    chain.register(RECORDING_TAP_PRIORITY, Box::new(RecordingTap));

    ctx.commands.append(
        Command::new(CommandType::NewGame, -1)
            .with_arg(Argument::Integer(options.mode() as i32))
            .with_arg(Argument::Integer(1))
            .with_arg(Argument::Integer(0)),
    );

    let mut pending_checksum: Option<(u32, u32)> = None;
    let mut first_checksum = true;
    let mut desync_planted = false;

    for frame in 0..=options.frames {
        ctx.frame = frame;

        if let Some((source_frame, mut checksum)) = pending_checksum.take() {
            if options
                .inject_desync
                .is_some_and(|at| source_frame >= at && !desync_planted)
            {
                tracing::info!(frame = source_frame, "planting checksum mismatch");
                checksum ^= 0xDEAD_BEEF;
                desync_planted = true;
            }
            ctx.commands
                .append(Command::logic_checksum(checksum, LOCAL_SLOT));
        }

        if frame == options.frames {
            ctx.commands
                .append(Command::new(CommandType::ClearGameData, -1));
        } else {
            scripted_commands(options.seed, frame, options.multiplayer, &mut ctx);
        }

        let mut commands = std::mem::take(&mut ctx.commands);
        chain.dispatch(&mut ctx, &mut commands);
        if let Some(e) = ctx.record_error.take() {
            return Err(e).context("recording demo");
        }
        ctx.recorder.flush_recording()?;

        if let Some(checksum) = sim.step(frame, &mut commands)? {
            // Networked games never send their first checksum
            if options.multiplayer && first_checksum {
                first_checksum = false;
            } else {
                pending_checksum = Some((frame, checksum));
            }
        }
    }

    if ctx.recorder.is_recording() {
        bail!("demo recording was not finalized");
    }
    let path = ctx.recorder.archive_replay(name)?;
    tracing::info!(
        path = %path.display(),
        frames = options.frames,
        applied = sim.applied(),
        "demo recorded"
    );
    Ok((ctx.recorder, path))
}

/// Gameplay commands issued on `frame`, derived from the seed alone.
fn scripted_commands(seed: u32, frame: u32, multiplayer: bool, ctx: &mut SessionContext) {
    let roll = xxh3_64_with_seed(&frame.to_le_bytes(), u64::from(seed));
    let players: &[i32] = if multiplayer { &[0, 1] } else { &[0] };
    let player = players[(roll as usize >> 8) % players.len()];
    let coord = |shift: u32| ((roll >> shift) & 0x3FF) as f32;

    let command = match roll % 29 {
        0..=3 => Command::new(CommandType::MoveTo, player)
            .with_arg(Argument::Location(Vec3::new(coord(10), coord(20), 0.0))),
        4 => Command::new(CommandType::SelectUnits, player)
            .with_arg(Argument::Boolean(roll & 0x40 != 0))
            .with_arg(Argument::ObjectId((roll >> 16) as u32 & 0xFFF))
            .with_arg(Argument::ObjectId((roll >> 28) as u32 & 0xFFF)),
        5 => Command::new(CommandType::AttackObject, player)
            .with_arg(Argument::ObjectId((roll >> 12) as u32 & 0xFFF)),
        6 => Command::new(CommandType::SetRallyPoint, player)
            .with_arg(Argument::ObjectId((roll >> 12) as u32 & 0xFF))
            .with_arg(Argument::Location(Vec3::new(coord(24), coord(34), 0.0))),
        7 => {
            let x = (roll >> 16) as i32 & 0x1FF;
            let y = (roll >> 26) as i32 & 0x1FF;
            Command::new(CommandType::AreaSelect, player).with_arg(Argument::PixelRegion(
                PixelRegion {
                    lo: IVec2::new(x, y),
                    hi: IVec2::new(x + 64, y + 48),
                },
            ))
        }
        8 if frame % 5 == 0 => {
            let mut chat = Command::new(CommandType::SendChat, player)
                .with_arg(Argument::Integer(-1));
            for c in "gg".encode_utf16() {
                chat = chat.with_arg(Argument::WideChar(c));
            }
            chat
        }
        _ => return,
    };
    ctx.commands.append(command);
}
