//! Orchestrator configuration
//!
//! The recognized options with a direct effect on resource addressing are
//! the target account, the target region and the source branch. The rest
//! are operational settings for the local server and engine.

use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

/// Orchestrator configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Target account identifier (`${ACCOUNT}` in definitions)
    pub account: String,

    /// Target region (`${REGION}` in definitions)
    pub region: String,

    /// Branch whose pushes trigger executions
    pub source_branch: String,

    /// Address the HTTP API binds to
    pub bind_addr: String,

    /// Default maximum pending duration of an approval gate
    pub approval_timeout: Duration,

    /// Upper bound on concurrently running actions within one partition
    pub max_parallel_actions: usize,

    /// Capability tags the local credential issuer will grant
    pub allowed_role_tags: HashSet<String>,

    /// Local checkout snapshotted when a trigger carries no inline files
    pub source_dir: Option<PathBuf>,
}

impl Config {
    /// Creates a new configuration with defaults
    pub fn new(account: String, region: String) -> Self {
        Self {
            account,
            region,
            source_branch: "main".to_string(),
            bind_addr: "0.0.0.0:8080".to_string(),
            approval_timeout: Duration::from_secs(7 * 24 * 60 * 60),
            max_parallel_actions: 4,
            allowed_role_tags: ["image-publishing", "file-publishing", "deploy"]
                .into_iter()
                .map(String::from)
                .collect(),
            source_dir: None,
        }
    }

    /// Creates configuration from environment variables
    ///
    /// Expected environment variables:
    /// - CONVEYOR_ACCOUNT (required)
    /// - CONVEYOR_REGION (required)
    /// - CONVEYOR_SOURCE_BRANCH (optional, default: main)
    /// - ORCHESTRATOR_BIND_ADDR (optional, default: 0.0.0.0:8080)
    /// - APPROVAL_TIMEOUT (optional, seconds, default: 7 days)
    /// - MAX_PARALLEL_ACTIONS (optional, default: 4)
    /// - ALLOWED_ROLE_TAGS (optional, comma separated)
    /// - SOURCE_DIR (optional)
    pub fn from_env() -> anyhow::Result<Self> {
        let account = std::env::var("CONVEYOR_ACCOUNT")
            .map_err(|_| anyhow::anyhow!("CONVEYOR_ACCOUNT environment variable not set"))?;

        let region = std::env::var("CONVEYOR_REGION")
            .map_err(|_| anyhow::anyhow!("CONVEYOR_REGION environment variable not set"))?;

        let mut config = Self::new(account, region);

        if let Ok(branch) = std::env::var("CONVEYOR_SOURCE_BRANCH") {
            config.source_branch = branch;
        }

        if let Ok(addr) = std::env::var("ORCHESTRATOR_BIND_ADDR") {
            config.bind_addr = addr;
        }

        if let Some(timeout) = std::env::var("APPROVAL_TIMEOUT")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
        {
            config.approval_timeout = Duration::from_secs(timeout);
        }

        if let Some(max) = std::env::var("MAX_PARALLEL_ACTIONS")
            .ok()
            .and_then(|s| s.parse::<usize>().ok())
        {
            config.max_parallel_actions = max;
        }

        if let Ok(tags) = std::env::var("ALLOWED_ROLE_TAGS") {
            config.allowed_role_tags = parse_tags(&tags);
        }

        config.source_dir = std::env::var("SOURCE_DIR").ok().map(PathBuf::from);

        Ok(config)
    }

    /// Overrides the source branch
    pub fn with_source_branch(mut self, branch: impl Into<String>) -> Self {
        self.source_branch = branch.into();
        self
    }

    /// Overrides the default approval timeout
    pub fn with_approval_timeout(mut self, timeout: Duration) -> Self {
        self.approval_timeout = timeout;
        self
    }

    /// Validates the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.account.trim().is_empty() {
            anyhow::bail!("account cannot be empty");
        }

        if !self.account.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
            anyhow::bail!("account must be alphanumeric");
        }

        if self.region.trim().is_empty() {
            anyhow::bail!("region cannot be empty");
        }

        if self.source_branch.trim().is_empty() {
            anyhow::bail!("source_branch cannot be empty");
        }

        if self.approval_timeout.is_zero() {
            anyhow::bail!("approval_timeout must be greater than 0");
        }

        if self.max_parallel_actions == 0 {
            anyhow::bail!("max_parallel_actions must be greater than 0");
        }

        if let Some(dir) = &self.source_dir
            && !dir.is_dir()
        {
            anyhow::bail!("source_dir '{}' is not a directory", dir.display());
        }

        Ok(())
    }

    /// Expands `${ACCOUNT}` and `${REGION}` placeholders
    pub fn expand(&self, value: &str) -> String {
        value
            .replace("${ACCOUNT}", &self.account)
            .replace("${REGION}", &self.region)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new("000000000000".to_string(), "local-1".to_string())
    }
}

fn parse_tags(raw: &str) -> HashSet<String> {
    raw.split(',')
        .map(|t| t.trim())
        .filter(|t| !t.is_empty())
        .map(String::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.source_branch, "main");
        assert_eq!(config.max_parallel_actions, 4);
        assert!(config.allowed_role_tags.contains("deploy"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();
        assert!(config.validate().is_ok());

        config.account = String::new();
        assert!(config.validate().is_err());

        config.account = "1234:5678".to_string();
        assert!(config.validate().is_err());

        config.account = "123456789012".to_string();
        config.max_parallel_actions = 0;
        assert!(config.validate().is_err());

        config.max_parallel_actions = 1;
        config.approval_timeout = Duration::ZERO;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_expand_placeholders() {
        let config = Config::new("123456789012".to_string(), "eu-west-1".to_string());
        assert_eq!(
            config.expand("cdk-hnb659fds-cfn-exec-role-${ACCOUNT}-${REGION}"),
            "cdk-hnb659fds-cfn-exec-role-123456789012-eu-west-1"
        );
    }

    #[test]
    fn test_parse_tags() {
        let tags = parse_tags("deploy, file-publishing,,");
        assert_eq!(tags.len(), 2);
        assert!(tags.contains("file-publishing"));
    }
}
