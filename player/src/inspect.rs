//! Human-readable replay listings for `--info` and `--analyze`

use chrono::DateTime;
use std::io::{self, Write};

use rewind_core::command::Command;
use rewind_core::replay::ReplayHeader;
use rewind_core::replay::types::LOGIC_FRAMES_PER_SECOND;

/// Print the header of one replay.
pub fn write_header(out: &mut dyn Write, name: &str, header: &ReplayHeader) -> io::Result<()> {
    let secs = header.game_time_secs();
    writeln!(out, "{name}")?;
    writeln!(out, "  Name:        {}", header.display_name)?;
    writeln!(
        out,
        "  Version:     {} ({}, {:08X})",
        header.version.version, header.version.build_time, header.version.version_number
    )?;
    writeln!(out, "  Started:     {}", timestamp(header.start_time))?;
    writeln!(out, "  Ended:       {}", timestamp(header.end_time))?;
    writeln!(
        out,
        "  Length:      {} frames ({:02}:{:02})",
        header.frame_count,
        secs / 60,
        secs % 60
    )?;
    writeln!(out, "  Map:         {}", header.game_setup.map)?;
    writeln!(out, "  Seed:        {}", header.game_setup.seed)?;
    writeln!(
        out,
        "  Checksums:   every {} frames",
        header.game_setup.checksum_interval
    )?;
    writeln!(
        out,
        "  Local slot:  {}{}",
        header.local_slot,
        if header.is_multiplayer() { " (multiplayer)" } else { "" }
    )?;
    for index in header.game_setup.occupied() {
        let slot = &header.game_setup.slots[index];
        let disconnected = header.player_disconnects[index];
        writeln!(
            out,
            "  Slot {index}:      {}{}",
            slot.name(),
            if disconnected { " (disconnected)" } else { "" }
        )?;
    }
    if header.desync {
        writeln!(out, "  Desync was detected while recording")?;
    }
    if header.quit_early {
        writeln!(out, "  Local player quit early")?;
    }
    Ok(())
}

/// Print decoded commands, one per line.
pub fn write_commands(out: &mut dyn Write, commands: &[Command]) -> io::Result<()> {
    for command in commands {
        let secs = command.frame / LOGIC_FRAMES_PER_SECOND;
        write!(
            out,
            "[{:02}:{:02}] frame {:>6} player {:>2} {}",
            secs / 60,
            secs % 60,
            command.frame,
            command.player_index,
            command.ty
        )?;
        for (i, arg) in command.args.iter().enumerate() {
            write!(out, "{}{arg}", if i == 0 { ": " } else { ", " })?;
        }
        writeln!(out)?;
    }
    writeln!(out, "{} commands", commands.len())
}

fn timestamp(secs: u32) -> String {
    if secs == 0 {
        return "-".to_string();
    }
    DateTime::from_timestamp(i64::from(secs), 0)
        .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| secs.to_string())
}
