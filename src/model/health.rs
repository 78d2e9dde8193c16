//! Health reports: non-mutating re-verification of a strategy's state.

use serde::{Deserialize, Serialize};

use super::StrategyKind;

/// Aggregate health of the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,

    /// No strategy is active.
    Inactive,
}

/// A single named check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheck {
    pub name: String,
    pub passed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl HealthCheck {
    pub fn pass(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            passed: true,
            message: None,
        }
    }

    pub fn fail(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            passed: false,
            message: Some(message.into()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub strategy: Option<StrategyKind>,
    pub checks: Vec<HealthCheck>,
}

impl HealthReport {
    pub fn inactive() -> Self {
        Self {
            status: HealthStatus::Inactive,
            strategy: None,
            checks: Vec::new(),
        }
    }

    /// Any failing check makes the whole strategy unhealthy.
    pub fn from_checks(strategy: StrategyKind, checks: Vec<HealthCheck>) -> Self {
        let status = if checks.iter().all(|c| c.passed) {
            HealthStatus::Healthy
        } else {
            HealthStatus::Unhealthy
        };
        Self {
            status,
            strategy: Some(strategy),
            checks,
        }
    }
}
