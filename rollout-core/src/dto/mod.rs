//! Data Transfer Objects
//!
//! Views derived from domain types for display or machine consumption.

pub mod report;
