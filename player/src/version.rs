//! Identity of the running build, as stamped into replay headers

use std::path::Path;
use xxhash_rust::xxh3::xxh3_64;

use rewind_core::command::COMMAND_SCHEMA_VERSION;
use rewind_core::config::RewindConfig;
use rewind_core::replay::VersionInfo;

/// Build timestamp, when the packager provides one
const BUILD_TIME: Option<&str> = option_env!("REWIND_BUILD_TIME");

/// `schema << 16 | major << 8 | minor`
pub fn version_number() -> u32 {
    let major: u32 = env!("CARGO_PKG_VERSION_MAJOR").parse().unwrap_or(0);
    let minor: u32 = env!("CARGO_PKG_VERSION_MINOR").parse().unwrap_or(0);
    (COMMAND_SCHEMA_VERSION << 16) | (major.min(0xFF) << 8) | minor.min(0xFF)
}

/// Version info for this executable and the configuration it loaded.
pub fn current(config: &RewindConfig) -> VersionInfo {
    let exe_checksum = std::env::current_exe()
        .ok()
        .and_then(|path| file_checksum(&path))
        .unwrap_or(0);
    VersionInfo {
        version: env!("CARGO_PKG_VERSION").to_string(),
        build_time: BUILD_TIME.unwrap_or("unknown").to_string(),
        version_number: version_number(),
        exe_checksum,
        ini_checksum: config_checksum(config),
    }
}

/// Low 32 bits of the xxh3 digest of a file.
pub fn file_checksum(path: &Path) -> Option<u32> {
    match std::fs::read(path) {
        Ok(bytes) => Some(xxh3_64(&bytes) as u32),
        Err(e) => {
            tracing::warn!(path = %path.display(), "cannot checksum file: {}", e);
            None
        }
    }
}

/// Checksum of the settings that can influence a simulation.
pub fn config_checksum(config: &RewindConfig) -> u32 {
    match toml::to_string(&config.batch) {
        Ok(text) => xxh3_64(text.as_bytes()) as u32,
        Err(e) => {
            tracing::warn!("cannot serialize config for checksum: {}", e);
            0
        }
    }
}
