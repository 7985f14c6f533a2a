//! Change-set and stack domain types

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Handle to a computed change-set
///
/// Pinned to the stack revision it was computed against; applying it after
/// the stack moved is drift.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeSetHandle {
    pub id: Uuid,
    pub stack_name: String,
    pub change_set_name: String,
    pub base_revision: u64,
    pub template_digest: String,
    pub changes: Vec<ResourceChange>,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

impl ChangeSetHandle {
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }
}

/// One resource-level change in a change-set
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceChange {
    pub logical_id: String,
    pub action: ChangeAction,
    pub resource_type: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangeAction {
    Add,
    Modify,
    Remove,
}

/// Live state of a deployed stack
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackState {
    pub name: String,
    /// Incremented by every applied change-set
    pub revision: u64,
    pub template_digest: Option<String>,
    /// Logical id -> resource digest
    pub resources: BTreeMap<String, String>,
    pub last_change_set: Option<Uuid>,
    pub updated_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl StackState {
    pub fn empty(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            revision: 0,
            template_digest: None,
            resources: BTreeMap::new(),
            last_change_set: None,
            updated_at: None,
        }
    }
}
