//! Test execution options and results.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Options passed through to the test runner.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunOptions {
    /// A cucumber tag expression, e.g. `@smoke and not @wip`.
    pub tags: Option<String>,
}

/// Pass/fail for a single artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactResult {
    pub artifact: PathBuf,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ArtifactResult {
    pub fn passed(artifact: impl Into<PathBuf>) -> Self {
        Self {
            artifact: artifact.into(),
            success: true,
            error: None,
        }
    }

    pub fn failed(artifact: impl Into<PathBuf>, error: impl Into<String>) -> Self {
        Self {
            artifact: artifact.into(),
            success: false,
            error: Some(error.into()),
        }
    }
}

/// The aggregate of one test execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestRun {
    pub success: bool,
    pub results: Vec<ArtifactResult>,
}

impl TestRun {
    /// A run succeeds when it ran something and nothing failed.
    pub fn from_results(results: Vec<ArtifactResult>) -> Self {
        let success = !results.is_empty() && results.iter().all(|r| r.success);
        Self { success, results }
    }

    pub fn failures(&self) -> usize {
        self.results.iter().filter(|r| !r.success).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_run_is_not_a_success() {
        assert!(!TestRun::from_results(vec![]).success);
    }

    #[test]
    fn one_failure_fails_the_run() {
        let run = TestRun::from_results(vec![
            ArtifactResult::passed("a.feature"),
            ArtifactResult::failed("b.feature", "exit code 1"),
        ]);
        assert!(!run.success);
        assert_eq!(run.failures(), 1);
    }
}
