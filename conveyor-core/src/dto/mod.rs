//! Data Transfer Objects for the orchestrator API
//!
//! DTOs are the request/response shapes exchanged between the orchestrator,
//! the client crate and the CLI. They are lighter than the domain records.

pub mod approval;
pub mod execution;
pub mod pipeline;
pub mod stack;
