//! Core domain types
//!
//! This module contains the structures shared between the engine (which
//! produces them while running a pipeline) and the CLI (which renders the
//! persisted report).

pub mod cache;
pub mod profile;
pub mod report;
pub mod result;
pub mod stage;
