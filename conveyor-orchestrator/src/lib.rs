//! Conveyor Orchestrator
//!
//! Runs pipeline executions and serves the HTTP API used by the client and
//! CLI. All state is held in memory for the lifetime of the process.

pub mod api;
pub mod config;
pub mod db;
pub mod engine;
pub mod repository;
pub mod service;
