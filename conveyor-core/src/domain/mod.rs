//! Core domain types
//!
//! This module contains the core domain structures used across Conveyor crates.
//! Definitions are plain data: they are constructed once, validated once and
//! never mutated afterwards. A changed topology is a new definition version.

pub mod approval;
pub mod artifact;
pub mod changeset;
pub mod execution;
pub mod log;
pub mod pipeline;
