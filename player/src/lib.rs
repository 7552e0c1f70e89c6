//! Rewind Player - reference simulation and replay tooling
//!
//! Hosts the pieces the `rewind` binary puts on top of `rewind-core`:
//!
//! - [`sim::ReferenceSimulation`] - Deterministic stand-in simulation
//! - [`demo`] - Records scripted demo matches
//! - [`inspect`] - Header and command listings
//! - [`version`] - Build identity stamped into replay headers

pub mod demo;
pub mod inspect;
pub mod sim;
pub mod version;

pub use demo::{DemoOptions, record_demo};
pub use sim::ReferenceSimulation;
