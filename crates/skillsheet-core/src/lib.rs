//! skillsheet-core — Session state machine, timer, and scoring.
//!
//! This crate defines the fundamental data model, traits, and scoring logic
//! that the entire skillsheet system builds on: immutable template snapshots,
//! the exam-session state machine, elapsed-time accounting, and the pure
//! pass/fail scoring engine.

pub mod engine;
pub mod error;
pub mod model;
pub mod parser;
pub mod result;
pub mod scoring;
pub mod session;
pub mod snapshot;
pub mod timer;
pub mod traits;
