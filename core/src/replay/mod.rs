//! Rewind replay system
//!
//! Records a simulation as a frame-tagged command log and plays it back
//! frame-accurately, comparing the simulation's periodic state checksums
//! against the ones captured during the original run.
//!
//! # Architecture
//!
//! ```text
//! Recording:  command list -> RecorderSession -> ReplayWriter -> .rep
//! Playback:   .rep -> ReplayReader -> RecorderSession -> command list
//! Validation: LogicChecksum commands -> HandlerChain -> DesyncDetector
//! ```
//!
//! # Usage
//!
//! ## Recording
//!
//! ```ignore
//! use rewind_core::replay::{RecorderSession, SessionConfig};
//!
//! let mut session = RecorderSession::new(SessionConfig::new(replay_dir, version));
//!
//! // Every simulation step, after the command list for the frame is final:
//! session.update_record(frame, &commands)?;
//! ```
//!
//! A recordable `NewGame` command opens `00000000.rep`; `ClearGameData`
//! finalizes and closes it.
//!
//! ## Headless validation
//!
//! ```ignore
//! use rewind_core::replay::{ReplayRunner, RunnerConfig};
//!
//! let mut runner = ReplayRunner::new(session, backend, RunnerConfig::default());
//! let outcome = runner.simulate("match.rep", &mut std::io::stdout())?;
//! assert!(outcome.desync.is_none());
//! ```

pub mod binary;
pub mod desync;
pub mod runtime;
pub mod session;
pub mod setup;
pub mod types;

pub use types::{
    Difficulty, GameMode, RecorderMode, RecordingOptions, ReplayHeader, TimeSnapshot,
    VersionInfo, MAX_SLOTS, REPLAY_EXTENSION,
};

pub use binary::{ReplayReader, ReplayWriter};
pub use desync::{ChecksumVerdict, DesyncDetector, DesyncReport};
pub use session::{RecorderSession, SessionConfig};
pub use setup::{GameSetup, SetupError, Slot};

pub use runtime::{
    ChecksumVerifier, RecordingTap, ReplayOutcome, ReplayRunner, RunnerConfig, SessionContext,
    SimulationBackend,
};
