//! Copy-deployment: move validated artifacts into production, reversibly.
//!
//! One call to [`DeployStrategy::deploy_and_test`] is one deployment session:
//!
//! 1. validate every staged artifact (nothing is touched on failure)
//! 2. back up every production file about to be overwritten
//! 3. copy the artifacts into production
//! 4. re-check what landed there
//! 5. keep it, or roll back to exactly what was there before
//!
//! The session and its backups are discarded when the call returns. Only the
//! deployment log remembers it.

mod validate;

use std::{
    fs, io,
    path::{Path, PathBuf},
    process,
    sync::atomic::{AtomicU64, Ordering},
};

use jiff::Timestamp;
use sha2::{Digest, Sha256};

use crate::config::Config;
use crate::model::{
    Artifact, ArtifactResult, ArtifactType, DeployedDigest, DeploymentLogEntry,
    DeploymentOutcome, Details, HealthCheck, ReferenceContext, RunOptions, StrategyKind, TestRun,
};
use crate::runner::{self, Runner};
use crate::storage::Storage;

use super::{Result, Strategy, StrategyError};

use validate::ArtifactRules;

/// Compression level for backups. Favors speed; backups are short-lived.
const BACKUP_COMPRESSION_LEVEL: i32 = 3;

static SESSION_SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// The result of one deploy-and-test call.
#[derive(Debug, Clone)]
pub struct DeploymentReport {
    pub success: bool,

    /// Every failure found, not just the first.
    pub errors: Vec<String>,
    pub session_id: String,
}

pub struct DeployStrategy {
    staging_root: PathBuf,
    production_root: PathBuf,
    rules: ArtifactRules,
    syntax_check: Option<Vec<String>>,
    runner: Runner,
    storage: Storage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionStatus {
    Ready,
    Completed,
    RolledBack,
}

#[derive(Debug)]
struct DeployedFile {
    staging_path: PathBuf,
    production_path: PathBuf,
    kind: ArtifactType,
    backed_up: bool,
}

#[derive(Debug)]
struct BackedUpFile {
    original_path: PathBuf,
    backup_path: PathBuf,
}

/// One deployment, owned by a single `deploy_and_test` call.
#[derive(Debug)]
struct DeploymentSession {
    id: String,
    deployed: Vec<DeployedFile>,
    backed_up: Vec<BackedUpFile>,
    status: SessionStatus,
}

impl DeployStrategy {
    pub fn new(config: &Config, storage: Storage, runner: Runner) -> Result<Self> {
        Ok(Self {
            staging_root: config.staging_root.clone(),
            production_root: config.production_root.clone(),
            rules: ArtifactRules::compile(&config.validation)?,
            syntax_check: config.runner.syntax_check.clone(),
            runner,
            storage,
        })
    }

    /// Validate, back up, deploy, re-check, and keep or roll back.
    pub fn deploy_and_test(&self, artifacts: &[Artifact]) -> DeploymentReport {
        let mut session = DeploymentSession::new();

        let mut errors = Vec::new();
        let mut targets = Vec::new();
        if artifacts.is_empty() {
            errors.push("no artifacts to deploy".to_string());
        }
        for artifact in artifacts {
            match self.production_path(artifact) {
                Ok(p) => targets.push((artifact, p)),
                Err(e) => errors.push(e),
            }
            errors.extend(self.rules.check(artifact, &artifact.path));
        }
        if !errors.is_empty() {
            tracing::warn!(
                session = %session.id,
                errors = errors.len(),
                "artifacts failed validation"
            );
            return DeploymentReport {
                success: false,
                errors,
                session_id: session.id,
            };
        }

        let backup_dir = self.storage.backups_dir().join(&session.id);
        match session.apply(&targets, &backup_dir) {
            Ok(()) => errors.extend(self.post_deploy_errors(&session)),
            Err(e) => errors.push(e),
        }

        let outcome = if errors.is_empty() {
            session.status = SessionStatus::Completed;
            DeploymentOutcome::Completed
        } else {
            tracing::warn!(session = %session.id, "rolling back deployment");
            errors.extend(session.rollback());
            DeploymentOutcome::RolledBack
        };

        self.log(&session, outcome, &errors);
        if let Err(e) = fs::remove_dir_all(&backup_dir)
            && e.kind() != io::ErrorKind::NotFound
        {
            tracing::warn!(dir = %backup_dir.display(), error = %e, "failed to discard backups");
        }

        DeploymentReport {
            success: outcome == DeploymentOutcome::Completed,
            errors,
            session_id: session.id,
        }
    }

    fn production_path(&self, artifact: &Artifact) -> core::result::Result<PathBuf, String> {
        artifact
            .path
            .strip_prefix(&self.staging_root)
            .map(|rel| self.production_root.join(rel))
            .map_err(|_| {
                format!(
                    "{}: artifact is outside the staging root {}",
                    artifact.path.display(),
                    self.staging_root.display()
                )
            })
    }

    fn post_deploy_errors(&self, session: &DeploymentSession) -> Vec<String> {
        let mut errors = Vec::new();
        for file in &session.deployed {
            match file.kind {
                ArtifactType::Feature => {
                    let deployed = Artifact::new(&file.production_path, file.kind);
                    errors.extend(self.rules.check(&deployed, &file.production_path));
                }
                ArtifactType::Steps | ArtifactType::Page => {
                    if let Some(cmd) = &self.syntax_check
                        && let Err(e) = runner::run_check(cmd, &file.production_path)
                    {
                        errors.push(format!(
                            "{}: syntax check failed: {e}",
                            file.production_path.display()
                        ));
                    }
                }
            }
        }
        errors
    }

    fn log(&self, session: &DeploymentSession, outcome: DeploymentOutcome, errors: &[String]) {
        let files = if outcome == DeploymentOutcome::Completed {
            session
                .deployed
                .iter()
                .filter_map(|f| {
                    let bytes = fs::read(&f.production_path).ok()?;
                    Some(DeployedDigest {
                        path: f.production_path.clone(),
                        sha256: hex::encode(Sha256::digest(&bytes)),
                    })
                })
                .collect()
        } else {
            Vec::new()
        };

        let entry = DeploymentLogEntry {
            timestamp: Timestamp::now(),
            session_id: session.id.clone(),
            file_count: session.deployed.len(),
            outcome,
            files,
            errors: errors.to_vec(),
        };
        if let Err(e) = self.storage.append_deployment(&entry) {
            tracing::warn!(session = %session.id, error = %e, "failed to append deployment log");
        }
    }

    /// Which reported errors concern `artifact`, either as staged or as deployed.
    fn errors_for(&self, artifact: &Artifact, errors: &[String]) -> Vec<String> {
        let staged = artifact.path.display().to_string();
        let deployed = self
            .production_path(artifact)
            .map(|p| p.display().to_string())
            .unwrap_or_default();
        errors
            .iter()
            .filter(|e| {
                e.starts_with(&staged) || (!deployed.is_empty() && e.starts_with(&deployed))
            })
            .cloned()
            .collect()
    }
}

impl DeploymentSession {
    fn new() -> Self {
        let seq = SESSION_SEQUENCE.fetch_add(1, Ordering::Relaxed);
        Self {
            id: format!("{}-{seq}", Timestamp::now().as_millisecond()),
            deployed: Vec::new(),
            backed_up: Vec::new(),
            status: SessionStatus::Ready,
        }
    }

    /// Back up everything that exists, then copy everything in.
    ///
    /// Each file is recorded before it is touched so rollback sees partial work.
    fn apply(
        &mut self,
        targets: &[(&Artifact, PathBuf)],
        backup_dir: &Path,
    ) -> core::result::Result<(), String> {
        for (_, production) in targets {
            if production.exists() {
                let backup_path = backup_dir.join(format!("{}.zst", self.backed_up.len()));
                backup(production, &backup_path).map_err(|e| {
                    format!("{}: backup failed: {e}", production.display())
                })?;
                self.backed_up.push(BackedUpFile {
                    original_path: production.clone(),
                    backup_path,
                });
            }
        }
        tracing::debug!(session = %self.id, backups = self.backed_up.len(), "backups taken");

        for (artifact, production) in targets {
            let backed_up = self.backed_up.iter().any(|b| b.original_path == *production);
            self.deployed.push(DeployedFile {
                staging_path: artifact.path.clone(),
                production_path: production.clone(),
                kind: artifact.kind,
                backed_up,
            });
            copy_into_place(&artifact.path, production)
                .map_err(|e| format!("{}: copy failed: {e}", artifact.path.display()))?;
        }
        tracing::info!(session = %self.id, files = self.deployed.len(), "artifacts deployed");
        Ok(())
    }

    /// Restore every backup and delete every newly introduced file.
    fn rollback(&mut self) -> Vec<String> {
        let mut errors = Vec::new();
        for b in &self.backed_up {
            if let Err(e) = restore(&b.backup_path, &b.original_path) {
                errors.push(format!("{}: restore failed: {e}", b.original_path.display()));
            }
        }
        for f in self.deployed.iter().filter(|f| !f.backed_up) {
            // A copy that never landed leaves nothing to remove.
            if let Err(e) = fs::remove_file(&f.production_path)
                && f.production_path.symlink_metadata().is_ok()
            {
                errors.push(format!(
                    "{}: removing deployed copy of {} failed: {e}",
                    f.production_path.display(),
                    f.staging_path.display()
                ));
            }
        }
        self.status = SessionStatus::RolledBack;
        tracing::info!(session = %self.id, status = ?self.status, "deployment rolled back");
        errors
    }
}

fn backup(original: &Path, backup_path: &Path) -> io::Result<()> {
    if let Some(parent) = backup_path.parent() {
        fs::create_dir_all(parent)?;
    }
    let bytes = fs::read(original)?;
    let compressed = zstd::encode_all(bytes.as_slice(), BACKUP_COMPRESSION_LEVEL)?;
    fs::write(backup_path, compressed)
}

fn restore(backup_path: &Path, original: &Path) -> io::Result<()> {
    let compressed = fs::read(backup_path)?;
    let bytes = zstd::decode_all(compressed.as_slice())?;
    fs::write(original, bytes)
}

fn copy_into_place(from: &Path, to: &Path) -> io::Result<()> {
    if let Some(parent) = to.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::copy(from, to).map(|_| ())
}

impl Strategy for DeployStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Deploy
    }

    fn setup(&mut self, _context: &ReferenceContext) -> Result<Details> {
        let missing: Vec<PathBuf> = [&self.staging_root, &self.production_root]
            .into_iter()
            .filter(|p| !p.is_dir())
            .cloned()
            .collect();
        if !missing.is_empty() {
            return Err(StrategyError::MissingPaths(missing));
        }

        let probe = self
            .production_root
            .join(format!(".stagelink-write-probe-{}", process::id()));
        fs::write(&probe, b"").map_err(|e| {
            StrategyError::Capability(format!(
                "production root {} is not writable: {e}",
                self.production_root.display()
            ))
        })?;
        fs::remove_file(&probe)?;

        Ok(Details::from([
            (
                "productionRoot".to_string(),
                self.production_root.display().to_string(),
            ),
            (
                "backupsDir".to_string(),
                self.storage.backups_dir().display().to_string(),
            ),
        ]))
    }

    fn execute(&mut self, artifacts: &[Artifact], options: &RunOptions) -> Result<TestRun> {
        let report = self.deploy_and_test(artifacts);
        if !report.success {
            let results = artifacts
                .iter()
                .map(|a| {
                    let mine = self.errors_for(a, &report.errors);
                    let message = if mine.is_empty() {
                        format!("deployment {} did not complete", report.session_id)
                    } else {
                        mine.join("; ")
                    };
                    ArtifactResult::failed(&a.path, message)
                })
                .collect();
            return Ok(TestRun::from_results(results));
        }

        let mut results = Vec::new();
        for artifact in artifacts {
            // Steps and pages have nothing to run on their own; passing the
            // post-deploy checks is their result.
            if !artifact.is_feature() {
                results.push(ArtifactResult::passed(&artifact.path));
                continue;
            }
            let deployed = self
                .production_path(artifact)
                .map_err(StrategyError::Execution)?;
            results.push(self.runner.run_one(
                &self.production_root,
                &deployed,
                &artifact.path,
                options,
                &[],
            ));
        }
        Ok(TestRun::from_results(results))
    }

    fn health_check(&self) -> Vec<HealthCheck> {
        let mut checks = Vec::new();
        for (name, root) in [
            ("staging root", &self.staging_root),
            ("production root", &self.production_root),
        ] {
            checks.push(if root.is_dir() {
                HealthCheck::pass(name)
            } else {
                HealthCheck::fail(name, format!("{} is not a directory", root.display()))
            });
        }
        let writable = fs::metadata(&self.production_root)
            .map(|m| !m.permissions().readonly())
            .unwrap_or(false);
        checks.push(if writable {
            HealthCheck::pass("production root writable")
        } else {
            HealthCheck::fail("production root writable", "read-only or missing")
        });
        checks
    }

    fn teardown(&mut self) -> Result<()> {
        // Deployed files stay in production; that is what deploying means.
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    use tempfile::TempDir;

    const PAGE: &str = "\
class LoginPage extends BasePage {
  constructor(page) { super(page); }
}
";
    const STEPS: &str = "\
import { Given } from '@cucumber/cucumber';
import { expect } from '@playwright/test';
";
    const FEATURE: &str = "@login\nFeature: Login\n  Scenario: ok\n    Given x\n";

    struct Fixture {
        _dir: TempDir,
        staging: PathBuf,
        production: PathBuf,
        storage: Storage,
        config: Config,
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let config = Config::default().anchored(dir.path()).unwrap();
        fs::create_dir_all(&config.staging_root).unwrap();
        let storage = Storage::new(&config.scratch_dir).unwrap();
        Fixture {
            staging: config.staging_root.clone(),
            production: config.production_root.clone(),
            _dir: dir,
            storage,
            config,
        }
    }

    fn strategy(f: &Fixture) -> DeployStrategy {
        DeployStrategy::new(
            &f.config,
            f.storage.clone(),
            Runner::new(vec!["true".into()], Duration::from_secs(5)),
        )
        .unwrap()
    }

    fn stage(f: &Fixture, rel: &str, kind: ArtifactType, content: &str) -> Artifact {
        let path = f.staging.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, content).unwrap();
        Artifact::new(path, kind)
    }

    #[test]
    fn deploys_valid_artifacts_and_logs_completion() {
        let f = fixture();
        let artifacts = vec![
            stage(&f, "pages/login.page.js", ArtifactType::Page, PAGE),
            stage(&f, "steps/login.steps.js", ArtifactType::Steps, STEPS),
            stage(&f, "features/login.feature", ArtifactType::Feature, FEATURE),
        ];

        let report = strategy(&f).deploy_and_test(&artifacts);
        assert!(report.success, "{:?}", report.errors);
        assert_eq!(
            fs::read_to_string(f.production.join("pages/login.page.js")).unwrap(),
            PAGE
        );

        let log = f.storage.load_deployments().unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].outcome, DeploymentOutcome::Completed);
        assert_eq!(log[0].file_count, 3);
        assert_eq!(log[0].files.len(), 3);
        assert_eq!(log[0].files[0].sha256.len(), 64);

        // Backups do not outlive the session.
        assert!(!f.storage.backups_dir().join(&report.session_id).exists());
    }

    #[test]
    fn page_without_base_fails_and_copies_nothing() {
        let f = fixture();
        let page = stage(
            &f,
            "pages/login.page.js",
            ArtifactType::Page,
            "class LoginPage {\n  constructor(page) {}\n}\n",
        );

        let report = strategy(&f).deploy_and_test(&[page]);
        assert!(!report.success);
        assert_eq!(report.errors.len(), 1);
        assert!(report.errors[0].contains("page must extend BasePage"));
        assert!(!f.production.join("pages/login.page.js").exists());
        assert!(f.storage.load_deployments().unwrap().is_empty());
    }

    #[test]
    fn reports_every_validation_failure() {
        let f = fixture();
        let artifacts = vec![
            stage(&f, "pages/a.page.js", ArtifactType::Page, "nothing"),
            stage(&f, "features/a.feature", ArtifactType::Feature, ""),
        ];

        let report = strategy(&f).deploy_and_test(&artifacts);
        // Two page rules plus the empty feature.
        assert_eq!(report.errors.len(), 3);
    }

    #[test]
    fn rejects_artifacts_outside_staging() {
        let f = fixture();
        let outside = f.production.join("elsewhere.feature");
        fs::write(&outside, FEATURE).unwrap();

        let artifact = Artifact::new(&outside, ArtifactType::Feature);
        let report = strategy(&f).deploy_and_test(&[artifact]);
        assert!(!report.success);
        assert!(report.errors[0].contains("outside the staging root"));
    }

    #[cfg(unix)]
    #[test]
    fn failed_post_deploy_check_rolls_back_byte_for_byte() {
        let mut f = fixture();
        f.config.runner.syntax_check = Some(vec!["false".into()]);

        // One file replaces an existing production file, one is new.
        let existing = f.production.join("pages/login.page.js");
        fs::create_dir_all(existing.parent().unwrap()).unwrap();
        let original: Vec<u8> = (0u8..=255).cycle().take(4096).collect();
        fs::write(&existing, &original).unwrap();

        let artifacts = vec![
            stage(&f, "pages/login.page.js", ArtifactType::Page, PAGE),
            stage(&f, "steps/login.steps.js", ArtifactType::Steps, STEPS),
        ];

        let report = strategy(&f).deploy_and_test(&artifacts);
        assert!(!report.success);
        assert!(report.errors.iter().any(|e| e.contains("syntax check failed")));

        assert_eq!(fs::read(&existing).unwrap(), original);
        assert!(!f.production.join("steps/login.steps.js").exists());

        let log = f.storage.load_deployments().unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].outcome, DeploymentOutcome::RolledBack);
        assert!(!f.storage.backups_dir().join(&report.session_id).exists());
    }

    #[test]
    fn failed_copy_rolls_back_earlier_files() {
        let f = fixture();
        let existing = f.production.join("pages/login.page.js");
        fs::create_dir_all(existing.parent().unwrap()).unwrap();
        fs::write(&existing, b"original page\n").unwrap();
        // A file where a directory must go makes the steps copy fail.
        fs::write(f.production.join("steps"), b"not a directory").unwrap();

        let artifacts = vec![
            stage(&f, "pages/login.page.js", ArtifactType::Page, PAGE),
            stage(&f, "features/login.feature", ArtifactType::Feature, FEATURE),
            stage(&f, "steps/login.steps.js", ArtifactType::Steps, STEPS),
        ];

        let report = strategy(&f).deploy_and_test(&artifacts);
        assert!(!report.success);
        assert_eq!(report.errors.len(), 1, "{:?}", report.errors);
        assert!(report.errors[0].contains("copy failed"));

        assert_eq!(fs::read(&existing).unwrap(), b"original page\n");
        assert!(!f.production.join("features/login.feature").exists());
        assert_eq!(fs::read(f.production.join("steps")).unwrap(), b"not a directory");

        let log = f.storage.load_deployments().unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].outcome, DeploymentOutcome::RolledBack);
    }

    #[cfg(unix)]
    #[test]
    fn execute_reports_every_deployed_artifact() {
        let f = fixture();
        let artifacts = vec![
            stage(&f, "pages/login.page.js", ArtifactType::Page, PAGE),
            stage(&f, "steps/login.steps.js", ArtifactType::Steps, STEPS),
            stage(&f, "features/login.feature", ArtifactType::Feature, FEATURE),
        ];

        let run = strategy(&f).execute(&artifacts, &RunOptions::default()).unwrap();

        assert!(run.success);
        let reported: Vec<_> = run.results.iter().map(|r| r.artifact.clone()).collect();
        let expected: Vec<_> = artifacts.iter().map(|a| a.path.clone()).collect();
        assert_eq!(reported, expected);
    }

    #[test]
    fn overwrite_keeps_new_content_on_success() {
        let f = fixture();
        let existing = f.production.join("features/login.feature");
        fs::create_dir_all(existing.parent().unwrap()).unwrap();
        fs::write(&existing, "old").unwrap();

        let feature = stage(&f, "features/login.feature", ArtifactType::Feature, FEATURE);
        let report = strategy(&f).deploy_and_test(&[feature]);

        assert!(report.success, "{:?}", report.errors);
        assert_eq!(fs::read_to_string(&existing).unwrap(), FEATURE);
    }

    #[test]
    fn session_ids_are_unique() {
        let a = DeploymentSession::new();
        let b = DeploymentSession::new();
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn setup_requires_both_roots() {
        let f = fixture();
        fs::remove_dir_all(&f.staging).unwrap();
        let mut s = strategy(&f);

        let context = ReferenceContext {
            platform: crate::model::Platform::current(),
            has_elevated_privileges: true,
            staged_artifact_count: 0,
            performance_mode: crate::model::PerformanceMode::Safe,
            environment_id: "t".into(),
            user_preferred_strategy: None,
        };
        let err = s.setup(&context).unwrap_err();
        assert!(matches!(err, StrategyError::MissingPaths(ref m) if m == &vec![f.staging.clone()]));
    }

    #[cfg(unix)]
    #[test]
    fn execute_reports_per_artifact_errors_after_failed_deploy() {
        let f = fixture();
        let good = stage(&f, "features/good.feature", ArtifactType::Feature, FEATURE);
        let bad = stage(
            &f,
            "features/bad.feature",
            ArtifactType::Feature,
            "Feature: x\n",
        );

        let run = strategy(&f)
            .execute(&[good.clone(), bad.clone()], &RunOptions::default())
            .unwrap();

        assert!(!run.success);
        assert_eq!(run.results.len(), 2);
        assert!(run.results[0].error.as_deref().unwrap().contains("did not complete"));
        assert!(run.results[1].error.as_deref().unwrap().contains("Scenario"));
    }
}
