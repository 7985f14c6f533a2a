//! Conveyor Core
//!
//! Core types and abstractions for the Conveyor deployment pipeline engine.
//!
//! This crate contains:
//! - Domain types: Pipeline, Stage, Action, Artifact, Execution, ApprovalGate
//! - DTOs: Data transfer objects for the orchestrator HTTP API
//! - Validation: Pure checks that turn a definition into a validated pipeline

pub mod domain;
pub mod dto;
pub mod error;
pub mod validation;

pub use error::{ApplyError, BuildError, PermissionError, PreviewError, ValidationError};
pub use validation::{ValidatedPipeline, validate};
