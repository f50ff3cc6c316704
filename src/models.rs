//! Shared data model
//!
//! Value types exchanged between the monitoring and deployment services:
//! commit observations, change events, per-tick trigger plans and
//! deployment reports.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::ExecutionStrategy;

/// Commit information returned by a hosting API
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitInfo {
    /// Opaque commit identifier (compared for equality only)
    pub sha: String,
    /// Commit message (first line for platforms that split it)
    pub message: String,
    /// Author display name
    pub author: String,
    /// Author timestamp
    pub timestamp: DateTime<Utc>,
    /// Web URL of the commit
    pub url: String,
}

/// A detected change on one monitored branch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepoChangeEvent {
    pub repo: String,
    pub branch: String,
    pub old_sha: String,
    pub new_sha: String,
}

/// A triggered group deployment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupTrigger {
    pub group: String,
    /// Full declared membership of the group, in declaration order
    pub members: Vec<String>,
    /// First changed repository (declaration order) that caused the trigger
    pub trigger_repo: String,
    pub trigger_time: DateTime<Utc>,
}

/// Per-tick decision of which groups and individuals to deploy
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TriggerPlan {
    pub groups: BTreeMap<String, GroupTrigger>,
    pub individuals: Vec<String>,
}

impl TriggerPlan {
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty() && self.individuals.is_empty()
    }
}

/// Result of a single repository deployment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeployResult {
    pub repo_name: String,
    /// Workspace the QA repository was cloned into
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clone_path: Option<String>,
    /// Commands attempted, in order, up to and including a failing one
    pub commands_run: Vec<String>,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_ms: u64,
}

impl DeployResult {
    /// Report for a member that never started (deadline elapsed before
    /// admission)
    pub fn not_started(repo_name: &str, error: &str) -> Self {
        Self {
            repo_name: repo_name.to_string(),
            clone_path: None,
            commands_run: Vec::new(),
            success: false,
            error: Some(error.to_string()),
            duration_ms: 0,
        }
    }
}

/// Result of a group deployment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupDeployResult {
    pub group_name: String,
    pub strategy: ExecutionStrategy,
    /// Per-member reports; members skipped after a fail-fast stop are absent
    pub results: HashMap<String, DeployResult>,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_ms: u64,
}

/// Truncated fingerprint for log lines
pub fn short_fingerprint(sha: &str) -> &str {
    sha.get(..8).unwrap_or(sha)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_fingerprint_truncates_long_shas() {
        assert_eq!(short_fingerprint("0123456789abcdef"), "01234567");
    }

    #[test]
    fn short_fingerprint_keeps_short_values() {
        assert_eq!(short_fingerprint("abc"), "abc");
        assert_eq!(short_fingerprint(""), "");
    }

    #[test]
    fn empty_plan_is_empty() {
        let plan = TriggerPlan::default();
        assert!(plan.is_empty());
    }
}
