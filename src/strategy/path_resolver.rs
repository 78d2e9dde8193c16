//! Path resolution: verify production paths exist, touch nothing.
//!
//! Artifacts are expected to reach production through relative imports, so
//! setup is pure verification.

use std::{
    fs,
    path::{Path, PathBuf},
};

use crate::model::{
    Artifact, Details, HealthCheck, ReferenceContext, RunOptions, StrategyKind, TestRun,
};
use crate::runner::Runner;

use super::{Result, Strategy, StrategyError};

/// The outcome of checking every expected path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathValidation {
    pub valid: bool,
    pub missing: Vec<PathBuf>,
}

pub struct PathResolverStrategy {
    staging_root: PathBuf,
    expected: Vec<PathBuf>,
    runner: Runner,
}

impl PathResolverStrategy {
    pub fn new(staging_root: PathBuf, expected: Vec<PathBuf>, runner: Runner) -> Self {
        Self {
            staging_root,
            expected,
            runner,
        }
    }

    /// Check every expected path for existence and readability.
    pub fn validate(&self) -> PathValidation {
        let missing: Vec<PathBuf> = self
            .expected
            .iter()
            .filter(|p| !is_readable(p))
            .cloned()
            .collect();
        PathValidation {
            valid: missing.is_empty(),
            missing,
        }
    }
}

/// Files must open; directories must list.
fn is_readable(path: &Path) -> bool {
    if path.is_dir() {
        fs::read_dir(path).is_ok()
    } else {
        fs::File::open(path).is_ok()
    }
}

impl Strategy for PathResolverStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::PathResolver
    }

    fn setup(&mut self, _context: &ReferenceContext) -> Result<Details> {
        let validation = self.validate();
        if !validation.valid {
            return Err(StrategyError::MissingPaths(validation.missing));
        }
        Ok(Details::from([(
            "validatedPaths".to_string(),
            self.expected.len().to_string(),
        )]))
    }

    fn execute(&mut self, artifacts: &[Artifact], options: &RunOptions) -> Result<TestRun> {
        Ok(self.runner.run_artifacts(&self.staging_root, artifacts, options))
    }

    fn health_check(&self) -> Vec<HealthCheck> {
        self.expected
            .iter()
            .map(|p| {
                let name = format!("path {}", p.display());
                if is_readable(p) {
                    HealthCheck::pass(name)
                } else {
                    HealthCheck::fail(name, "missing or unreadable")
                }
            })
            .collect()
    }

    fn teardown(&mut self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    use tempfile::TempDir;

    use crate::model::{PerformanceMode, Platform};

    fn strategy(root: &Path, expected: &[&str]) -> PathResolverStrategy {
        PathResolverStrategy::new(
            root.join("staging"),
            expected.iter().map(|p| root.join(p)).collect(),
            Runner::new(vec!["true".into()], Duration::from_secs(1)),
        )
    }

    fn context() -> ReferenceContext {
        ReferenceContext {
            platform: Platform::current(),
            has_elevated_privileges: true,
            staged_artifact_count: 0,
            performance_mode: PerformanceMode::Balanced,
            environment_id: "test".into(),
            user_preferred_strategy: None,
        }
    }

    #[test]
    fn valid_when_everything_exists() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("support")).unwrap();
        fs::write(dir.path().join("BasePage.js"), "class BasePage {}").unwrap();

        let mut s = strategy(dir.path(), &["support", "BasePage.js"]);
        assert!(s.validate().valid);
        let details = s.setup(&context()).unwrap();
        assert_eq!(details["validatedPaths"], "2");
    }

    #[test]
    fn reports_exactly_the_missing_paths() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("support")).unwrap();

        let mut s = strategy(dir.path(), &["support", "BasePage.js", "hooks"]);
        let validation = s.validate();
        assert!(!validation.valid);
        assert_eq!(
            validation.missing,
            vec![dir.path().join("BasePage.js"), dir.path().join("hooks")]
        );

        let err = s.setup(&context()).unwrap_err();
        assert!(matches!(err, StrategyError::MissingPaths(ref m) if m.len() == 2));
    }

    #[test]
    fn validation_has_no_side_effects() {
        let dir = TempDir::new().unwrap();
        let s = strategy(dir.path(), &["support"]);
        s.validate();
        assert!(fs::read_dir(dir.path()).unwrap().next().is_none());
    }

    #[test]
    fn health_check_one_entry_per_path() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("support")).unwrap();

        let s = strategy(dir.path(), &["support", "BasePage.js"]);
        let checks = s.health_check();
        assert_eq!(checks.len(), 2);
        assert!(checks[0].passed);
        assert!(!checks[1].passed);
    }
}
