//! Local credential issuer
//!
//! Grants a role only when every required capability tag is allowed and the
//! role pattern stays inside the configured account.

use async_trait::async_trait;
use conveyor_core::PermissionError;
use std::collections::HashSet;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::engine::collaborators::{CredentialIssuer, Credentials};

pub struct LocalCredentialIssuer {
    account: String,
    allowed_tags: HashSet<String>,
    ttl: Duration,
}

impl LocalCredentialIssuer {
    pub fn new(account: impl Into<String>, allowed_tags: HashSet<String>) -> Self {
        Self {
            account: account.into(),
            allowed_tags,
            ttl: Duration::from_secs(3600),
        }
    }
}

/// Account field of an ARN-shaped role pattern (`arn:<partition>:iam::<account>:role/<name>`)
fn pattern_account(pattern: &str) -> Option<&str> {
    let mut parts = pattern.splitn(6, ':');
    if parts.next()? != "arn" {
        return None;
    }
    parts.nth(3)
}

#[async_trait]
impl CredentialIssuer for LocalCredentialIssuer {
    async fn assume(
        &self,
        role_pattern: &str,
        required_tags: &[String],
    ) -> Result<Credentials, PermissionError> {
        let missing: Vec<String> = required_tags
            .iter()
            .filter(|tag| !self.allowed_tags.contains(*tag))
            .cloned()
            .collect();

        if !missing.is_empty() {
            warn!(role = role_pattern, ?missing, "Refusing role with unallowed tags");
            return Err(PermissionError::MissingTags {
                role: role_pattern.to_string(),
                missing,
            });
        }

        if let Some(account) = pattern_account(role_pattern)
            && account != self.account
        {
            return Err(PermissionError::WrongAccount {
                role: role_pattern.to_string(),
                account: self.account.clone(),
            });
        }

        if role_pattern.contains('*') {
            warn!(role = role_pattern, "Issuing credentials for a wildcard role pattern");
        }

        debug!(role = role_pattern, "Issued credentials");

        Ok(Credentials {
            role: role_pattern.to_string(),
            tags: required_tags.to_vec(),
            token: Uuid::new_v4().to_string(),
            expires_at: chrono::Utc::now()
                + chrono::Duration::from_std(self.ttl).unwrap_or(chrono::Duration::hours(1)),
        })
    }
}
