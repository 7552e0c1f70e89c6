//! Binary replay format writer
//!
//! Writes the header skeleton, appends command records, and patches the fixed
//! trailer fields in place once their final values are known.

use byteorder::{LittleEndian, WriteBytesExt};
use std::io::{self, Seek, SeekFrom, Write};

use super::argument_groups;
use crate::command::{Argument, Command, CommandShape};
use crate::error::ReplayError;
use crate::replay::types::*;

/// Writer for the binary replay format
pub struct ReplayWriter<W: Write + Seek> {
    writer: W,
}

impl<W: Write + Seek> ReplayWriter<W> {
    /// Create a new binary writer
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Current append position
    pub fn position(&mut self) -> io::Result<u64> {
        self.writer.stream_position()
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }

    pub fn into_inner(self) -> W {
        self.writer
    }

    /// Write the complete header; the stream is left at the first record.
    ///
    /// A game setup string too long for the reader to accept is rejected
    /// before anything is written.
    pub fn write_header(&mut self, header: &ReplayHeader) -> Result<(), ReplayError> {
        let setup = header.game_setup.to_string();
        if setup.len() >= MAX_HEADER_STRING {
            return Err(ReplayError::HeaderFieldTooLong {
                field: "game setup",
                len: setup.len(),
            });
        }

        let w = &mut self.writer;
        w.write_all(REPLAY_MAGIC)?;
        w.write_u32::<LittleEndian>(header.start_time)?;
        w.write_u32::<LittleEndian>(header.end_time)?;
        w.write_u32::<LittleEndian>(header.frame_count)?;
        w.write_u8(header.desync as u8)?;
        w.write_u8(header.quit_early as u8)?;
        for disconnected in header.player_disconnects {
            w.write_u8(disconnected as u8)?;
        }

        write_wide(w, &header.display_name)?;
        for field in header.time_snapshot.to_fields() {
            w.write_u16::<LittleEndian>(field)?;
        }
        write_wide(w, &header.version.version)?;
        write_wide(w, &header.version.build_time)?;
        w.write_u32::<LittleEndian>(header.version.version_number)?;
        w.write_u32::<LittleEndian>(header.version.exe_checksum)?;
        w.write_u32::<LittleEndian>(header.version.ini_checksum)?;
        write_narrow(w, &setup)?;
        write_narrow(w, &header.local_slot.to_string())?;
        w.write_i32::<LittleEndian>(header.difficulty)?;
        w.write_i32::<LittleEndian>(header.original_mode)?;
        w.write_i32::<LittleEndian>(header.rank_points)?;
        w.write_i32::<LittleEndian>(header.max_fps)?;
        Ok(())
    }

    /// Append one command record.
    ///
    /// The record is rejected before anything is written if its arguments do
    /// not match the command's registered shape.
    pub fn write_command(&mut self, command: &Command) -> Result<(), ReplayError> {
        if !CommandShape::of(command.ty).accepts(command.args.iter().map(Argument::ty)) {
            return Err(ReplayError::ArgumentShape { ty: command.ty });
        }
        let groups = argument_groups(&command.args)?;

        let mut record = Vec::with_capacity(16 + groups.len() * 2 + command.args.len() * 4);
        record.write_u32::<LittleEndian>(command.frame)?;
        record.write_u32::<LittleEndian>(command.ty.id())?;
        record.write_i32::<LittleEndian>(command.player_index)?;
        record.write_u8(groups.len() as u8)?;
        for (ty, count) in &groups {
            record.write_u8(ty.tag())?;
            record.write_u8(*count)?;
        }
        for arg in &command.args {
            write_argument(&mut record, arg)?;
        }

        self.writer.write_all(&record)?;
        Ok(())
    }

    pub fn patch_start_time(&mut self, time: u32) -> io::Result<()> {
        self.patch(START_TIME_OFFSET, |w| w.write_u32::<LittleEndian>(time))
    }

    pub fn patch_end_time(&mut self, time: u32) -> io::Result<()> {
        self.patch(END_TIME_OFFSET, |w| w.write_u32::<LittleEndian>(time))
    }

    pub fn patch_frame_count(&mut self, frames: u32) -> io::Result<()> {
        self.patch(FRAME_COUNT_OFFSET, |w| w.write_u32::<LittleEndian>(frames))
    }

    pub fn patch_desync(&mut self, desync: bool) -> io::Result<()> {
        self.patch(DESYNC_OFFSET, |w| w.write_u8(desync as u8))
    }

    pub fn patch_quit_early(&mut self, quit: bool) -> io::Result<()> {
        self.patch(QUIT_EARLY_OFFSET, |w| w.write_u8(quit as u8))
    }

    /// Set the disconnect flag of one slot. Out-of-range slots are ignored.
    pub fn patch_disconnect(&mut self, slot: usize, disconnected: bool) -> io::Result<()> {
        if slot >= MAX_SLOTS {
            tracing::warn!(slot, "ignoring disconnect patch for out-of-range slot");
            return Ok(());
        }
        self.patch(DISCONNECT_OFFSET + slot as u64, |w| {
            w.write_u8(disconnected as u8)
        })
    }

    /// Overwrite bytes at a fixed offset, then return to the end of the stream.
    ///
    /// The cursor is restored even when the write fails; later appends would
    /// otherwise land inside the header.
    fn patch<F>(&mut self, offset: u64, write: F) -> io::Result<()>
    where
        F: FnOnce(&mut W) -> io::Result<()>,
    {
        let end = self.writer.stream_position()?;
        debug_assert!(end >= FIXED_HEADER_LEN, "patch before header was written");
        self.writer.seek(SeekFrom::Start(offset))?;
        let result = write(&mut self.writer);
        self.writer.seek(SeekFrom::Start(end))?;
        result
    }
}

fn write_argument(w: &mut Vec<u8>, arg: &Argument) -> io::Result<()> {
    match *arg {
        Argument::Integer(v) => w.write_i32::<LittleEndian>(v),
        Argument::Real(v) => w.write_f32::<LittleEndian>(v),
        Argument::Boolean(v) => w.write_u8(v as u8),
        Argument::ObjectId(v) | Argument::DrawableId(v) | Argument::TeamId(v) => {
            w.write_u32::<LittleEndian>(v)
        }
        Argument::Location(v) => {
            w.write_f32::<LittleEndian>(v.x)?;
            w.write_f32::<LittleEndian>(v.y)?;
            w.write_f32::<LittleEndian>(v.z)
        }
        Argument::Pixel(p) => {
            w.write_i32::<LittleEndian>(p.x)?;
            w.write_i32::<LittleEndian>(p.y)
        }
        Argument::PixelRegion(r) => {
            w.write_i32::<LittleEndian>(r.lo.x)?;
            w.write_i32::<LittleEndian>(r.lo.y)?;
            w.write_i32::<LittleEndian>(r.hi.x)?;
            w.write_i32::<LittleEndian>(r.hi.y)
        }
        Argument::Timestamp(v) => w.write_u32::<LittleEndian>(v),
        Argument::WideChar(c) => w.write_u16::<LittleEndian>(c),
    }
}

/// UTF-16 string plus NUL, truncated to what the reader accepts.
///
/// Truncation happens on a character boundary, never inside a surrogate pair.
fn write_wide<W: Write>(w: &mut W, text: &str) -> io::Result<()> {
    let mut written = 0;
    let mut buf = [0u16; 2];
    for c in text.chars().filter(|&c| c != '\0') {
        let units = c.encode_utf16(&mut buf);
        if written + units.len() > MAX_HEADER_STRING - 1 {
            break;
        }
        for &unit in units.iter() {
            w.write_u16::<LittleEndian>(unit)?;
        }
        written += units.len();
    }
    w.write_u16::<LittleEndian>(0)
}

/// Byte string plus NUL, truncated to what the reader accepts.
fn write_narrow<W: Write>(w: &mut W, text: &str) -> io::Result<()> {
    let bytes: Vec<u8> = text
        .bytes()
        .filter(|&b| b != 0)
        .take(MAX_HEADER_STRING - 1)
        .collect();
    w.write_all(&bytes)?;
    w.write_u8(0)
}
