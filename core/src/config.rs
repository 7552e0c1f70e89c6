//! Configuration management (`config.toml`)
//!
//! Settings are stored in TOML format in the platform-specific config
//! directory, or at an explicit path given on the command line. Every field
//! has a default so partial files are accepted.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::batch::Concurrency;
use crate::replay::runtime::{DEFAULT_PROGRESS_INTERVAL, RunnerConfig};

const CONFIG_FILE: &str = "config.toml";

/// Application configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct RewindConfig {
    /// Replay storage settings
    #[serde(default)]
    pub replay: ReplayConfig,
    /// Batch validation settings
    #[serde(default)]
    pub batch: BatchConfig,
}

/// Replay storage configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplayConfig {
    /// Directory replays are written to and looked up in
    /// (default: `<data dir>/replays`)
    #[serde(default = "default_replay_dir")]
    pub replay_dir: PathBuf,
    /// Instance number when several copies share a replay directory (default: 1)
    #[serde(default = "default_instance_id")]
    pub instance_id: u32,
}

/// Batch validation configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Worker processes used when `--jobs` is not given (default: -1, sequential)
    #[serde(default = "default_jobs")]
    pub jobs: i32,
    /// Delay between worker polls in milliseconds (default: 100)
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Frames between headless progress lines (default: 18000)
    #[serde(default = "default_progress_interval_frames")]
    pub progress_interval_frames: u32,
    /// Speed multiplier for windowed playback; 0 runs unthrottled (default: 1.0)
    #[serde(default = "default_playback_speed")]
    pub playback_speed: f32,
}

fn default_replay_dir() -> PathBuf {
    data_dir()
        .map(|dir| dir.join("replays"))
        .unwrap_or_else(|| PathBuf::from("replays"))
}
fn default_instance_id() -> u32 {
    1
}

fn default_jobs() -> i32 {
    -1
}
fn default_poll_interval_ms() -> u64 {
    100
}
fn default_progress_interval_frames() -> u32 {
    DEFAULT_PROGRESS_INTERVAL
}
fn default_playback_speed() -> f32 {
    1.0
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            replay_dir: default_replay_dir(),
            instance_id: default_instance_id(),
        }
    }
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            jobs: default_jobs(),
            poll_interval_ms: default_poll_interval_ms(),
            progress_interval_frames: default_progress_interval_frames(),
            playback_speed: default_playback_speed(),
        }
    }
}

impl BatchConfig {
    /// Concurrency for a batch, preferring an explicit `--jobs` value.
    pub fn concurrency(&self, jobs: Option<i32>) -> Concurrency {
        Concurrency::from_jobs(jobs.or(Some(self.jobs)))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    /// Runner settings for one replay.
    pub fn runner_config(&self, headless: bool) -> RunnerConfig {
        RunnerConfig {
            headless,
            progress_interval: self.progress_interval_frames,
            playback_speed: self.playback_speed,
            ..RunnerConfig::default()
        }
    }
}

/// Returns the platform-specific configuration directory.
///
/// On Linux: `~/.config/rewind`
///
/// Returns `None` if the home directory cannot be determined.
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("io", "rewind", "rewind")
        .map(|dirs| dirs.config_dir().to_path_buf())
}

/// Returns the platform-specific data directory.
///
/// On Linux: `~/.local/share/rewind`
pub fn data_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("io", "rewind", "rewind")
        .map(|dirs| dirs.data_dir().to_path_buf())
}

/// Default location of `config.toml`.
pub fn default_config_path() -> Option<PathBuf> {
    config_dir().map(|dir| dir.join(CONFIG_FILE))
}

/// Loads the configuration from the default location.
///
/// Returns default values if the file doesn't exist or cannot be parsed.
pub fn load() -> RewindConfig {
    match default_config_path() {
        Some(path) => load_from(&path),
        None => RewindConfig::default(),
    }
}

/// Loads the configuration from `path`, falling back to defaults.
pub fn load_from(path: &Path) -> RewindConfig {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            return RewindConfig::default();
        }
        Err(e) => {
            tracing::warn!(path = %path.display(), "cannot read config: {}", e);
            return RewindConfig::default();
        }
    };
    toml::from_str(&content).unwrap_or_else(|e| {
        tracing::warn!(path = %path.display(), "invalid config, using defaults: {}", e);
        RewindConfig::default()
    })
}

/// Saves the configuration to `path`, creating parent directories.
///
/// # Errors
///
/// Returns an error if the directory cannot be created, the configuration
/// cannot be serialized or the file cannot be written.
pub fn save_to(config: &RewindConfig, path: &Path) -> anyhow::Result<()> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content)?;
    Ok(())
}

/// Saves the configuration to the default location.
pub fn save(config: &RewindConfig) -> anyhow::Result<()> {
    match default_config_path() {
        Some(path) => save_to(config, &path),
        None => anyhow::bail!("cannot determine the configuration directory"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::num::NonZeroUsize;
    use tempfile::TempDir;

    #[test]
    fn test_config_default() {
        let config = RewindConfig::default();
        assert_eq!(config.replay.instance_id, 1);
        assert!(config.replay.replay_dir.ends_with("replays"));
        assert_eq!(config.batch.jobs, -1);
        assert_eq!(config.batch.poll_interval_ms, 100);
        assert_eq!(config.batch.progress_interval_frames, 18_000);
        assert!((config.batch.playback_speed - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn test_config_deserialize_empty() {
        let config: RewindConfig = toml::from_str("").unwrap();
        assert_eq!(config, RewindConfig::default());
    }

    #[test]
    fn test_config_deserialize_partial() {
        let toml_str = r#"
[batch]
jobs = 4
"#;
        let config: RewindConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.batch.jobs, 4);
        assert_eq!(config.batch.poll_interval_ms, 100); // default
        assert_eq!(config.replay, ReplayConfig::default());
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join(CONFIG_FILE);

        let mut config = RewindConfig::default();
        config.replay.replay_dir = PathBuf::from("/srv/replays");
        config.replay.instance_id = 3;
        config.batch.playback_speed = 0.0;
        save_to(&config, &path).unwrap();

        assert_eq!(load_from(&path), config);
    }

    #[test]
    fn test_load_invalid_falls_back() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        std::fs::write(&path, "[batch]\njobs = \"many\"\n").unwrap();
        assert_eq!(load_from(&path), RewindConfig::default());

        assert_eq!(
            load_from(&dir.path().join("missing.toml")),
            RewindConfig::default()
        );
    }

    #[test]
    fn test_concurrency_prefers_flag() {
        let batch = BatchConfig {
            jobs: 2,
            ..BatchConfig::default()
        };
        assert_eq!(
            batch.concurrency(None),
            Concurrency::Workers(NonZeroUsize::new(2).unwrap())
        );
        assert_eq!(batch.concurrency(Some(-1)), Concurrency::Sequential);
        assert_eq!(BatchConfig::default().concurrency(None), Concurrency::Sequential);
    }

    #[test]
    fn test_runner_config() {
        let batch = BatchConfig {
            progress_interval_frames: 600,
            playback_speed: 2.0,
            ..BatchConfig::default()
        };
        let runner = batch.runner_config(false);
        assert!(!runner.headless);
        assert_eq!(runner.progress_interval, 600);
        assert!((runner.playback_speed - 2.0).abs() < f32::EPSILON);
    }
}
