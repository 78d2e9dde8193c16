//! Symbolic links from staging subpaths to production subpaths.
//!
//! Only link endpoints in staging are ever written. Anything at a target path
//! that is not itself a symbolic link belongs to someone else and is never
//! replaced or removed.

use std::{
    fs, io,
    path::{Path, PathBuf},
    process,
};

use crate::model::{
    Artifact, Details, HealthCheck, LinkKind, Platform, ReferenceContext, RunOptions,
    StrategyKind, SymlinkMapping, TestRun,
};
use crate::runner::Runner;

use super::{Result, Strategy, StrategyError};

pub struct SymlinkStrategy {
    staging_root: PathBuf,
    mappings: Vec<SymlinkMapping>,
    runner: Runner,
    platform: Platform,
}

impl SymlinkStrategy {
    pub fn new(staging_root: PathBuf, mappings: Vec<SymlinkMapping>, runner: Runner) -> Self {
        Self {
            staging_root,
            mappings,
            runner,
            platform: Platform::current(),
        }
    }

    /// Create and verify every link.
    ///
    /// Idempotent: links left by a previous setup are replaced. If any mapping
    /// fails, every link this call created is removed again.
    pub fn create_links(&self) -> Result<Details> {
        self.ensure_capability()?;

        let missing: Vec<PathBuf> = self
            .mappings
            .iter()
            .filter(|m| !m.source_path.exists())
            .map(|m| m.source_path.clone())
            .collect();
        if !missing.is_empty() {
            return Err(StrategyError::MissingPaths(missing));
        }

        let mut created = Vec::new();
        for mapping in &self.mappings {
            if let Err(e) = link_one(mapping) {
                tracing::warn!(link = %mapping.target_path.display(), error = %e, "link failed");
                remove_all(&created);
                return Err(e);
            }
            created.push(mapping.target_path.clone());
        }

        let failures: Vec<String> = self
            .verify()
            .into_iter()
            .filter(|c| !c.passed)
            .map(|c| format!("{}: {}", c.name, c.message.unwrap_or_default()))
            .collect();
        if !failures.is_empty() {
            remove_all(&created);
            return Err(StrategyError::Mutation(format!(
                "link verification failed: {}",
                failures.join("; ")
            )));
        }

        tracing::info!(links = created.len(), "symbolic links ready");
        Ok(Details::from([
            ("links".to_string(), created.len().to_string()),
            (
                "stagingRoot".to_string(),
                self.staging_root.display().to_string(),
            ),
        ]))
    }

    /// Verify every mapping without touching anything. One check per link.
    pub fn verify(&self) -> Vec<HealthCheck> {
        self.mappings
            .iter()
            .map(|m| {
                let name = format!("link {}", m.target_path.display());
                match verify_one(m) {
                    Ok(()) => HealthCheck::pass(name),
                    Err(msg) => HealthCheck::fail(name, msg),
                }
            })
            .collect()
    }

    /// Tear everything down, set it up again, and re-verify.
    pub fn relink(&self) -> Result<Details> {
        self.remove_links()?;
        self.create_links()
    }

    /// Remove every target that is still a symbolic link. Returns how many were removed.
    pub fn remove_links(&self) -> Result<usize> {
        let mut removed = 0;
        for mapping in &self.mappings {
            let target = &mapping.target_path;
            match fs::symlink_metadata(target) {
                Ok(meta) if meta.file_type().is_symlink() => {
                    remove_link(target)?;
                    removed += 1;
                }
                Ok(_) => {
                    tracing::warn!(
                        link = %target.display(),
                        "not a symbolic link, leaving in place"
                    );
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        tracing::info!(removed, "symbolic links removed");
        Ok(removed)
    }

    fn ensure_capability(&self) -> Result<()> {
        if !cfg!(any(unix, windows)) {
            return Err(StrategyError::Capability(
                "symbolic links are not supported on this platform".into(),
            ));
        }
        if self.platform.links_need_privileges() {
            fs::create_dir_all(&self.staging_root)?;
            probe_link_capability(&self.staging_root).map_err(|e| {
                StrategyError::Capability(format!(
                    "cannot create symbolic links ({e}); enable Developer Mode or run elevated"
                ))
            })?;
        }
        Ok(())
    }
}

/// Create and delete a throwaway link inside `dir`.
pub fn probe_link_capability(dir: &Path) -> io::Result<()> {
    let probe = dir.join(format!(".stagelink-probe-{}", process::id()));
    create_link(dir, &probe, LinkKind::Directory)?;
    remove_link(&probe)
}

fn link_one(mapping: &SymlinkMapping) -> Result<()> {
    let target = &mapping.target_path;
    match fs::symlink_metadata(target) {
        Ok(meta) if meta.file_type().is_symlink() => remove_link(target)?,
        Ok(_) => return Err(StrategyError::Conflict(target.clone())),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)?;
    }
    create_link(&mapping.source_path, target, mapping.kind).map_err(|e| {
        StrategyError::Mutation(format!(
            "failed to link {} -> {}: {e}",
            target.display(),
            mapping.source_path.display()
        ))
    })?;
    tracing::debug!(
        link = %target.display(),
        source = %mapping.source_path.display(),
        "linked"
    );
    Ok(())
}

fn verify_one(mapping: &SymlinkMapping) -> core::result::Result<(), String> {
    let target = &mapping.target_path;
    let meta = fs::symlink_metadata(target).map_err(|_| "missing".to_string())?;
    if !meta.file_type().is_symlink() {
        return Err("not a symbolic link".into());
    }
    let points_to = fs::read_link(target).map_err(|e| format!("unreadable link: {e}"))?;
    if points_to != mapping.source_path {
        return Err(format!(
            "points to {}, expected {}",
            points_to.display(),
            mapping.source_path.display()
        ));
    }
    let resolved = fs::metadata(target).map_err(|_| "dangling link".to_string())?;
    match mapping.kind {
        LinkKind::Directory if !resolved.is_dir() => Err("expected a directory".into()),
        LinkKind::File if !resolved.is_file() => Err("expected a file".into()),
        LinkKind::Directory => fs::read_dir(target)
            .map(|_| ())
            .map_err(|e| format!("not listable: {e}")),
        LinkKind::File => Ok(()),
    }
}

fn remove_all(targets: &[PathBuf]) {
    for target in targets {
        if let Err(e) = remove_link(target) {
            tracing::warn!(link = %target.display(), error = %e, "failed to remove partial link");
        }
    }
}

#[cfg(unix)]
fn create_link(source: &Path, target: &Path, _kind: LinkKind) -> io::Result<()> {
    std::os::unix::fs::symlink(source, target)
}

#[cfg(windows)]
fn create_link(source: &Path, target: &Path, kind: LinkKind) -> io::Result<()> {
    match kind {
        LinkKind::Directory => std::os::windows::fs::symlink_dir(source, target),
        LinkKind::File => std::os::windows::fs::symlink_file(source, target),
    }
}

#[cfg(not(any(unix, windows)))]
fn create_link(_source: &Path, _target: &Path, _kind: LinkKind) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "symbolic links are not supported on this platform",
    ))
}

/// Directory links on Windows are directories as far as removal goes.
fn remove_link(path: &Path) -> io::Result<()> {
    #[cfg(windows)]
    if fs::remove_dir(path).is_ok() {
        return Ok(());
    }
    fs::remove_file(path)
}

impl Strategy for SymlinkStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Symlink
    }

    fn setup(&mut self, _context: &ReferenceContext) -> Result<Details> {
        self.create_links()
    }

    fn execute(&mut self, artifacts: &[Artifact], options: &RunOptions) -> Result<TestRun> {
        Ok(self.runner.run_artifacts(&self.staging_root, artifacts, options))
    }

    fn health_check(&self) -> Vec<HealthCheck> {
        self.verify()
    }

    fn teardown(&mut self) -> Result<()> {
        self.remove_links().map(|_| ())
    }

    fn repair(&mut self, _context: &ReferenceContext) -> Result<Details> {
        self.relink()
    }
}
