//! Resolution strategies: the four ways staged artifacts reach production.
//!
//! Every strategy implements [`Strategy`]. The orchestrator only ever sees
//! that trait and a [`StrategyFactory`] that builds one per kind.

mod deploy;
mod path_resolver;
mod symlink;
mod virtual_env;

use std::{io, path::PathBuf};

pub use deploy::DeployStrategy;
pub use path_resolver::PathResolverStrategy;
pub use symlink::{SymlinkStrategy, probe_link_capability};
pub use virtual_env::{ResolveError, VirtualEnvStrategy};

use crate::config::Config;
use crate::model::{
    Artifact, Details, HealthCheck, ReferenceContext, RunOptions, StrategyKind, TestRun,
};
use crate::runner::Runner;
use crate::storage::Storage;

/// Errors a strategy can raise.
///
/// The variants follow how the orchestrator treats them: a capability or
/// missing-path error just means "try the next strategy", validation errors
/// are reported as a list, conflicts are never resolved by guessing.
#[derive(Debug, thiserror::Error)]
pub enum StrategyError {
    #[error("capability unavailable: {0}")]
    Capability(String),

    #[error("missing production paths: {}", display_paths(.0))]
    MissingPaths(Vec<PathBuf>),

    #[error("validation failed: {}", .0.join("; "))]
    Validation(Vec<String>),

    #[error("refusing to replace {}: it is not a symbolic link", .0.display())]
    Conflict(PathBuf),

    #[error("{0}")]
    Mutation(String),

    #[error("execution failed: {0}")]
    Execution(String),

    #[error("staging root {} overlaps environment '{other}'", root.display())]
    OverlappingRoots { root: PathBuf, other: String },

    #[error("no environment named '{0}'")]
    UnknownEnvironment(String),

    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error("invalid pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

pub type Result<T> = core::result::Result<T, StrategyError>;

fn display_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// The uniform contract every strategy implements.
pub trait Strategy {
    fn kind(&self) -> StrategyKind;

    /// Make staging able to reach production. Returns details for the session record.
    fn setup(&mut self, context: &ReferenceContext) -> Result<Details>;

    /// Run the artifacts through this strategy.
    fn execute(&mut self, artifacts: &[Artifact], options: &RunOptions) -> Result<TestRun>;

    /// Re-verify whatever setup created, without changing it.
    fn health_check(&self) -> Vec<HealthCheck>;

    /// Undo whatever setup created.
    fn teardown(&mut self) -> Result<()>;

    /// Rebuild whatever setup created: a full teardown then setup.
    fn repair(&mut self, context: &ReferenceContext) -> Result<Details> {
        self.teardown()?;
        self.setup(context)
    }

    /// Re-adopt state a previous process set up.
    ///
    /// Most strategies keep their state on disk and need nothing here.
    fn resume(&mut self, context: &ReferenceContext) -> Result<()> {
        let _ = context;
        Ok(())
    }
}

/// Builds a fresh strategy for a kind.
pub trait StrategyFactory {
    fn build(&self, kind: StrategyKind) -> Result<Box<dyn Strategy>>;
}

/// The production factory: strategies configured from `stagelink.toml`.
pub struct ConfiguredStrategies {
    config: Config,
    storage: Storage,
}

impl ConfiguredStrategies {
    pub fn new(config: Config, storage: Storage) -> Self {
        Self { config, storage }
    }
}

impl StrategyFactory for ConfiguredStrategies {
    fn build(&self, kind: StrategyKind) -> Result<Box<dyn Strategy>> {
        let runner = Runner::from_config(&self.config.runner);
        let strategy: Box<dyn Strategy> = match kind {
            StrategyKind::PathResolver => Box::new(PathResolverStrategy::new(
                self.config.staging_root.clone(),
                self.config.expected_production_paths(),
                runner,
            )),
            StrategyKind::Deploy => Box::new(DeployStrategy::new(
                &self.config,
                self.storage.clone(),
                runner,
            )?),
            StrategyKind::Symlink => Box::new(SymlinkStrategy::new(
                self.config.staging_root.clone(),
                self.config.symlink_mappings(),
                runner,
            )),
            StrategyKind::VirtualEnv => {
                let mappings = self
                    .config
                    .import_mappings()
                    .map_err(|e| StrategyError::Capability(e.to_string()))?;
                Box::new(VirtualEnvStrategy::new(
                    self.storage.envs_dir(),
                    self.config.staging_root.clone(),
                    self.config.production_root.clone(),
                    mappings,
                    runner,
                ))
            }
        };
        Ok(strategy)
    }
}
