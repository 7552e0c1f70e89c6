//! Binary replay format reader
//!
//! Header problems are reported as format errors. A stream that ends partway
//! through a command record is ordinary end-of-replay.

use byteorder::{LittleEndian, ReadBytesExt};
use std::io::{self, Read};

use crate::command::{
    Argument, ArgumentType, Arguments, Command, CommandShape, CommandType, PixelRegion,
};
use crate::error::ReplayError;
use crate::replay::setup::GameSetup;
use crate::replay::types::*;
use glam::{IVec2, Vec3};

/// Reader for the binary replay format
pub struct ReplayReader<R: Read> {
    reader: R,
}

impl<R: Read> ReplayReader<R> {
    /// Create a new binary reader
    pub fn new(reader: R) -> Self {
        Self { reader }
    }

    pub fn into_inner(self) -> R {
        self.reader
    }

    /// Read and validate the header, leaving the stream at the first record.
    pub fn read_header(&mut self) -> Result<ReplayHeader, ReplayError> {
        self.read_header_inner().map_err(|e| match e {
            ReplayError::Io(io) if io.kind() == io::ErrorKind::UnexpectedEof => {
                ReplayError::TruncatedHeader
            }
            other => other,
        })
    }

    fn read_header_inner(&mut self) -> Result<ReplayHeader, ReplayError> {
        let r = &mut self.reader;

        let mut magic = [0u8; 6];
        r.read_exact(&mut magic)?;
        if &magic != REPLAY_MAGIC {
            return Err(ReplayError::BadMagic);
        }

        let start_time = r.read_u32::<LittleEndian>()?;
        let end_time = r.read_u32::<LittleEndian>()?;
        let frame_count = r.read_u32::<LittleEndian>()?;
        let desync = r.read_u8()? != 0;
        let quit_early = r.read_u8()? != 0;
        let mut player_disconnects = [false; MAX_SLOTS];
        for flag in &mut player_disconnects {
            *flag = r.read_u8()? != 0;
        }

        let display_name = read_wide(r)?;
        let mut fields = [0u16; 8];
        for field in &mut fields {
            *field = r.read_u16::<LittleEndian>()?;
        }
        let time_snapshot = TimeSnapshot::from_fields(fields);

        let version = VersionInfo {
            version: read_wide(r)?,
            build_time: read_wide(r)?,
            version_number: r.read_u32::<LittleEndian>()?,
            exe_checksum: r.read_u32::<LittleEndian>()?,
            ini_checksum: r.read_u32::<LittleEndian>()?,
        };

        let game_setup: GameSetup = read_narrow(r)?.parse()?;

        let slot_text = read_narrow(r)?;
        let local_slot = slot_text
            .trim()
            .parse::<i32>()
            .ok()
            .filter(|slot| (-1..MAX_SLOTS as i32).contains(slot))
            .ok_or_else(|| ReplayError::InvalidLocalSlot(slot_text.clone()))?;

        let difficulty = r.read_i32::<LittleEndian>()?;
        let original_mode = r.read_i32::<LittleEndian>()?;
        let rank_points = r.read_i32::<LittleEndian>()?;
        let max_fps = r.read_i32::<LittleEndian>()?;

        Ok(ReplayHeader {
            start_time,
            end_time,
            frame_count,
            desync,
            quit_early,
            player_disconnects,
            display_name,
            time_snapshot,
            version,
            game_setup,
            local_slot,
            difficulty,
            original_mode,
            rank_points,
            max_fps,
        })
    }

    /// Read the frame number that starts the next record.
    ///
    /// `None` means the stream has no further records.
    pub fn read_frame(&mut self) -> Option<u32> {
        match self.reader.read_u32::<LittleEndian>() {
            Ok(frame) => Some(frame),
            Err(e) => {
                if e.kind() != io::ErrorKind::UnexpectedEof {
                    tracing::warn!("replay read failed: {}", e);
                }
                None
            }
        }
    }

    /// Read the rest of a record whose frame was already consumed.
    ///
    /// Returns `Ok(None)` if the stream ends inside the record.
    pub fn read_command_body(&mut self, frame: u32) -> Result<Option<Command>, ReplayError> {
        match self.read_body(frame) {
            Ok(command) => Ok(Some(command)),
            Err(ReplayError::Io(e)) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Read one whole record.
    pub fn read_command(&mut self) -> Result<Option<Command>, ReplayError> {
        match self.read_frame() {
            Some(frame) => self.read_command_body(frame),
            None => Ok(None),
        }
    }

    fn read_body(&mut self, frame: u32) -> Result<Command, ReplayError> {
        let r = &mut self.reader;
        let type_id = r.read_u32::<LittleEndian>()?;
        let ty = CommandType::from_id(type_id).ok_or(ReplayError::UnknownCommandType(type_id))?;
        let player_index = r.read_i32::<LittleEndian>()?;

        let group_count = r.read_u8()?;
        let mut layout = Vec::new();
        for _ in 0..group_count {
            let tag = r.read_u8()?;
            let count = r.read_u8()?;
            let arg_ty = ArgumentType::from_tag(tag).ok_or(ReplayError::UnknownArgumentType(tag))?;
            layout.extend(std::iter::repeat_n(arg_ty, count as usize));
        }

        if !CommandShape::of(ty).accepts(layout.iter().copied()) {
            return Err(ReplayError::ArgumentShape { ty });
        }

        let mut args = Arguments::with_capacity(layout.len());
        for arg_ty in layout {
            args.push(read_argument(r, arg_ty)?);
        }

        Ok(Command {
            frame,
            ty,
            player_index,
            args,
        })
    }
}

fn read_argument<R: Read>(r: &mut R, ty: ArgumentType) -> io::Result<Argument> {
    Ok(match ty {
        ArgumentType::Integer => Argument::Integer(r.read_i32::<LittleEndian>()?),
        ArgumentType::Real => Argument::Real(r.read_f32::<LittleEndian>()?),
        ArgumentType::Boolean => Argument::Boolean(r.read_u8()? != 0),
        ArgumentType::ObjectId => Argument::ObjectId(r.read_u32::<LittleEndian>()?),
        ArgumentType::DrawableId => Argument::DrawableId(r.read_u32::<LittleEndian>()?),
        ArgumentType::TeamId => Argument::TeamId(r.read_u32::<LittleEndian>()?),
        ArgumentType::Location => Argument::Location(Vec3::new(
            r.read_f32::<LittleEndian>()?,
            r.read_f32::<LittleEndian>()?,
            r.read_f32::<LittleEndian>()?,
        )),
        ArgumentType::Pixel => Argument::Pixel(read_ivec2(r)?),
        ArgumentType::PixelRegion => Argument::PixelRegion(PixelRegion {
            lo: read_ivec2(r)?,
            hi: read_ivec2(r)?,
        }),
        ArgumentType::Timestamp => Argument::Timestamp(r.read_u32::<LittleEndian>()?),
        ArgumentType::WideChar => Argument::WideChar(r.read_u16::<LittleEndian>()?),
    })
}

fn read_ivec2<R: Read>(r: &mut R) -> io::Result<IVec2> {
    let x = r.read_i32::<LittleEndian>()?;
    let y = r.read_i32::<LittleEndian>()?;
    Ok(IVec2::new(x, y))
}

/// Read a NUL-terminated UTF-16 string of at most [`MAX_HEADER_STRING`] units.
fn read_wide<R: Read>(r: &mut R) -> io::Result<String> {
    let mut units = Vec::new();
    while units.len() < MAX_HEADER_STRING {
        match r.read_u16::<LittleEndian>()? {
            0 => break,
            unit => units.push(unit),
        }
    }
    Ok(String::from_utf16_lossy(&units))
}

/// Read a NUL-terminated byte string of at most [`MAX_HEADER_STRING`] bytes.
fn read_narrow<R: Read>(r: &mut R) -> io::Result<String> {
    let mut bytes = Vec::new();
    while bytes.len() < MAX_HEADER_STRING {
        match r.read_u8()? {
            0 => break,
            byte => bytes.push(byte),
        }
    }
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}
