//! Binary replay format (.rep)
//!
//! All integers are little-endian.
//!
//! # File Structure
//!
//! ```text
//! ┌──────────────────────────────────────────────────┐
//! │ Fixed trailer (28 bytes, patched in place)       │
//! │ ├─ magic: "GENREP" (6 bytes, no terminator)      │
//! │ ├─ start_time: u32            @ 6                │
//! │ ├─ end_time: u32              @ 10               │
//! │ ├─ frame_count: u32           @ 14               │
//! │ ├─ desync: u8                 @ 18               │
//! │ ├─ quit_early: u8             @ 19               │
//! │ └─ disconnects: [u8; 8]       @ 20               │
//! ├──────────────────────────────────────────────────┤
//! │ Variable header                                  │
//! │ ├─ display name (UTF-16, NUL-terminated)         │
//! │ ├─ local date/time (8 x u16)                     │
//! │ ├─ version, build time (UTF-16, NUL-terminated)  │
//! │ ├─ version number, exe checksum, ini checksum    │
//! │ ├─ game setup (ASCII, NUL-terminated)            │
//! │ ├─ local slot index (ASCII, NUL-terminated)      │
//! │ └─ difficulty, mode, rank points, max fps (i32)  │
//! ├──────────────────────────────────────────────────┤
//! │ Command records until end of file                │
//! │ ├─ frame: u32, type: u32, player: i32            │
//! │ ├─ group count: u8, [(arg type, count): u8 x 2]  │
//! │ └─ raw argument values                           │
//! └──────────────────────────────────────────────────┘
//! ```

mod reader;
mod writer;

pub use reader::ReplayReader;
pub use writer::ReplayWriter;

use smallvec::SmallVec;

use crate::command::{Argument, ArgumentType};
use crate::error::ReplayError;

/// Compact `(type, count)` table describing a record's arguments.
pub type ArgumentGroups = SmallVec<[(ArgumentType, u8); 4]>;

/// Collapse runs of equally-typed arguments into groups.
///
/// Runs longer than 255 are split into several groups of the same type.
pub fn argument_groups(args: &[Argument]) -> Result<ArgumentGroups, ReplayError> {
    let mut groups = ArgumentGroups::new();
    for arg in args {
        let ty = arg.ty();
        match groups.last_mut() {
            Some((last, count)) if *last == ty && *count < u8::MAX => *count += 1,
            _ => groups.push((ty, 1)),
        }
    }
    if groups.len() > u8::MAX as usize {
        return Err(ReplayError::TooManyGroups(groups.len()));
    }
    Ok(groups)
}
