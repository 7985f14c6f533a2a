//! Stack DTOs

use serde::{Deserialize, Serialize};

use crate::domain::changeset::StackState;

/// Live stack summary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StackSummary {
    pub name: String,
    pub revision: u64,
    pub resource_count: usize,
    pub updated_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl From<StackState> for StackSummary {
    fn from(stack: StackState) -> Self {
        Self {
            name: stack.name,
            revision: stack.revision,
            resource_count: stack.resources.len(),
            updated_at: stack.updated_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stack_summary_conversion() {
        let mut stack = StackState::empty("SQSStack2");
        stack.revision = 3;
        stack
            .resources
            .insert("Queue".to_string(), "abc".to_string());

        let summary: StackSummary = stack.into();
        assert_eq!(summary.name, "SQSStack2");
        assert_eq!(summary.revision, 3);
        assert_eq!(summary.resource_count, 1);
    }
}
