//! Persisted records: the active session and the deployment log.

use std::path::PathBuf;

use jiff::Timestamp;
use serde::{Deserialize, Serialize};

use super::{Details, SetupAttempt, StrategyKind};

/// The scratch record written on successful setup and removed on cleanup.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub strategy: StrategyKind,
    pub timestamp: Timestamp,
    pub is_primary: bool,
    pub environment_id: String,
    pub details: Details,
    #[serde(default)]
    pub failed_attempts: Vec<SetupAttempt>,
}

/// How a deployment session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeploymentOutcome {
    Completed,
    RolledBack,
}

/// A deployed file and the digest of what landed in production.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployedDigest {
    pub path: PathBuf,
    pub sha256: String,
}

/// One line of the append-only deployment log.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentLogEntry {
    pub timestamp: Timestamp,
    pub session_id: String,
    pub file_count: usize,
    pub outcome: DeploymentOutcome,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<DeployedDigest>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}
