//! Rewind Core - replay recording, playback and batch validation
//!
//! This crate provides the replay subsystem of a deterministic lockstep
//! simulation: everything needed to record a session as a command log,
//! play it back frame-accurately, and detect divergence between runs.
//!
//! # Architecture
//!
//! - [`command`] - Commands, their argument schema and the handler chain
//! - [`RecorderSession`] - Recording/playback state machine over one `.rep` file
//! - [`DesyncDetector`] - Checksum reconciliation during playback
//! - [`ReplayRunner`] - Feeds a replay into a [`SimulationBackend`]
//! - [`WorkerProcess`] - Isolated child process with captured output
//! - [`BatchOrchestrator`] - Sequential or multi-process validation of many replays

pub mod batch;
pub mod command;
pub mod config;
pub mod error;
pub mod replay;
pub mod worker;

// Re-export core types
pub use command::{
    Argument, ArgumentType, Command, CommandHandler, CommandList, CommandType, Disposition,
    HandlerChain, HandlerId,
};
pub use error::ReplayError;

// Re-export replay types
pub use replay::{
    ChecksumVerifier, DesyncDetector, DesyncReport, GameMode, GameSetup, RecorderMode,
    RecorderSession, RecordingTap, ReplayHeader, ReplayOutcome, ReplayRunner, RunnerConfig,
    SessionConfig, SessionContext, SimulationBackend, VersionInfo,
};

// Re-export process and batch types
pub use batch::{
    BatchOptions, BatchOrchestrator, BatchSummary, Concurrency, ReplaySimulator, SelfLauncher,
    WorkerLauncher,
};
pub use config::RewindConfig;
pub use worker::{PollStatus, WorkerProcess};
