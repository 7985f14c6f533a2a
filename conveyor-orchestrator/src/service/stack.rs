//! Stack Service
//!
//! Read-only view of the stacks deployed by the change-set engine.

use conveyor_core::dto::stack::StackSummary;

use crate::engine::Engine;

/// List deployed stacks by name
pub async fn list_stacks(engine: &Engine) -> Vec<StackSummary> {
    engine
        .stacks()
        .await
        .into_iter()
        .map(StackSummary::from)
        .collect()
}
