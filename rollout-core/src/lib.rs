//! Rollout Core
//!
//! Core types for the Rollout deployment pipeline engine.
//!
//! This crate contains:
//! - Domain types: environment profiles, stages, stage results, cache entries
//!   and the pipeline report
//! - DTOs: condensed views of the report for display and transfer

pub mod domain;
pub mod dto;
