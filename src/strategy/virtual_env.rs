//! Virtual environments: per-environment import redirection.
//!
//! Each environment owns an [`ImportResolver`] and a scratch directory under
//! `envs/<id>/`. The environment record, mapping table included, is written
//! there as `resolver.json`, next to a `register.cjs` preload that applies the
//! table inside the runner. The runner child loads the preload through
//! `NODE_OPTIONS`. Nothing outside that scratch directory is ever written.

mod resolver;

use std::{
    collections::BTreeMap,
    env,
    ffi::OsString,
    fs, io,
    path::{Path, PathBuf},
};

use jiff::Timestamp;
use serde::{Deserialize, Serialize};

use crate::model::{
    Artifact, ArtifactResult, Details, HealthCheck, ImportMapping, Matcher, ReferenceContext,
    RunOptions, StrategyKind, TestRun,
};
use crate::runner::Runner;

use super::{Result, Strategy, StrategyError};

pub use resolver::{ImportResolver, Resolution, ResolveError};

const RESOLVER_FILE: &str = "resolver.json";
const HOOK_FILE: &str = "register.cjs";

const ENV_ID_VAR: &str = "STAGELINK_ENV_ID";
const STAGING_ROOT_VAR: &str = "STAGELINK_STAGING_ROOT";
const PRODUCTION_ROOT_VAR: &str = "STAGELINK_PRODUCTION_ROOT";
const RESOLVER_VAR: &str = "STAGELINK_RESOLVER";
const NODE_OPTIONS_VAR: &str = "NODE_OPTIONS";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EnvironmentState {
    Active,
}

/// One environment's persisted record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VirtualEnvironment {
    pub id: String,

    /// The environment's scratch directory.
    pub root_path: PathBuf,
    pub staging_root: PathBuf,
    pub production_root: PathBuf,

    /// Ordered; targets relative to `production_root`.
    pub mappings: Vec<ImportMapping>,
    pub status: EnvironmentState,
    pub created_at: Timestamp,
}

impl VirtualEnvironment {
    pub fn resolver_path(&self) -> PathBuf {
        self.root_path.join(RESOLVER_FILE)
    }

    pub fn hook_path(&self) -> PathBuf {
        self.root_path.join(HOOK_FILE)
    }

    /// Variables for the runner child: the preload, plus where to find the table.
    ///
    /// Any `NODE_OPTIONS` already set are kept after the preload.
    fn child_env(&self) -> Vec<(&'static str, OsString)> {
        let mut node_options =
            OsString::from(format!("--require \"{}\"", self.hook_path().display()));
        if let Some(existing) = env::var_os(NODE_OPTIONS_VAR)
            && !existing.is_empty()
        {
            node_options.push(" ");
            node_options.push(existing);
        }
        vec![
            (NODE_OPTIONS_VAR, node_options),
            (ENV_ID_VAR, OsString::from(&self.id)),
            (STAGING_ROOT_VAR, self.staging_root.clone().into_os_string()),
            (PRODUCTION_ROOT_VAR, self.production_root.clone().into_os_string()),
            (RESOLVER_VAR, self.resolver_path().into_os_string()),
        ]
    }
}

/// Combined output of one feature run inside an environment.
#[derive(Debug, Clone)]
pub struct EnvironmentOutput {
    pub success: bool,
    pub output: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvironmentStatus {
    pub active_count: usize,

    /// Mapping count per environment id.
    pub mappings: BTreeMap<String, usize>,
}

struct Environment {
    record: VirtualEnvironment,
    resolver: ImportResolver,
}

pub struct VirtualEnvStrategy {
    envs_dir: PathBuf,
    staging_root: PathBuf,
    production_root: PathBuf,
    mappings: Vec<ImportMapping>,
    runner: Runner,
    environments: BTreeMap<String, Environment>,

    /// The environment `execute` runs in, chosen by setup or resume.
    current: Option<String>,
}

impl VirtualEnvStrategy {
    pub fn new(
        envs_dir: PathBuf,
        staging_root: PathBuf,
        production_root: PathBuf,
        mappings: Vec<ImportMapping>,
        runner: Runner,
    ) -> Self {
        Self {
            envs_dir,
            staging_root,
            production_root,
            mappings,
            runner,
            environments: BTreeMap::new(),
            current: None,
        }
    }

    /// Set up `id` over the configured staging root.
    pub fn setup_environment(&mut self, id: &str) -> Result<&VirtualEnvironment> {
        let staging_root = self.staging_root.clone();
        self.setup_environment_at(id, staging_root)
    }

    /// Set up `id` over `staging_root`.
    ///
    /// Setting up an existing id again replaces it. A staging root nested in
    /// (or containing) another environment's root is rejected, since a caller
    /// there would have two resolvers.
    pub fn setup_environment_at(
        &mut self,
        id: &str,
        staging_root: PathBuf,
    ) -> Result<&VirtualEnvironment> {
        if id.is_empty() || id.contains(['/', '\\']) || id == "." || id == ".." {
            return Err(StrategyError::Validation(vec![format!(
                "invalid environment id '{id}'"
            )]));
        }
        if let Some((other, _)) = self.environments.iter().find(|(other, env)| {
            other.as_str() != id
                && (staging_root.starts_with(&env.record.staging_root)
                    || env.record.staging_root.starts_with(&staging_root))
        }) {
            return Err(StrategyError::OverlappingRoots {
                root: staging_root,
                other: other.clone(),
            });
        }
        if !staging_root.is_dir() {
            return Err(StrategyError::MissingPaths(vec![staging_root]));
        }

        let resolver = ImportResolver::new(
            staging_root.clone(),
            self.production_root.clone(),
            &self.mappings,
        )?;
        let record = VirtualEnvironment {
            id: id.to_string(),
            root_path: self.envs_dir.join(id),
            staging_root,
            production_root: self.production_root.clone(),
            mappings: self.mappings.clone(),
            status: EnvironmentState::Active,
            created_at: Timestamp::now(),
        };

        let encode = |e: serde_json::Error| {
            StrategyError::Mutation(format!("failed to encode resolver table: {e}"))
        };
        let json = serde_json::to_string_pretty(&record).map_err(encode)?;
        let hook = resolver.register_hook(id).map_err(encode)?;
        fs::create_dir_all(&record.root_path)?;
        fs::write(record.resolver_path(), json)?;
        fs::write(record.hook_path(), hook)?;

        tracing::info!(env = id, mappings = record.mappings.len(), "environment ready");
        self.environments
            .insert(id.to_string(), Environment { record, resolver });
        Ok(&self.environment(id)?.record)
    }

    /// Run one feature inside environment `id`.
    pub fn run_test_in_environment(
        &self,
        id: &str,
        feature: &Path,
        options: &RunOptions,
    ) -> Result<EnvironmentOutput> {
        let env = self.environment(id)?;
        let vars = env.record.child_env();
        let out = self
            .runner
            .run_feature(&env.record.staging_root, feature, options, &vars)
            .map_err(|e| StrategyError::Execution(e.to_string()))?;
        Ok(EnvironmentOutput {
            success: out.success,
            output: out.output,
        })
    }

    pub fn status(&self) -> EnvironmentStatus {
        EnvironmentStatus {
            active_count: self.environments.len(),
            mappings: self
                .environments
                .iter()
                .map(|(id, env)| (id.clone(), env.record.mappings.len()))
                .collect(),
        }
    }

    /// Destroy environment `id`: its resolver and scratch directory only.
    pub fn teardown_environment(&mut self, id: &str) -> Result<()> {
        let env = self
            .environments
            .remove(id)
            .ok_or_else(|| StrategyError::UnknownEnvironment(id.to_string()))?;
        if self.current.as_deref() == Some(id) {
            self.current = None;
        }
        match fs::remove_dir_all(&env.record.root_path) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => return Err(e.into()),
            _ => {}
        }
        tracing::info!(env = id, "environment removed");
        Ok(())
    }

    #[cfg(test)]
    fn resolver(&self, id: &str) -> Option<&ImportResolver> {
        self.environments.get(id).map(|env| &env.resolver)
    }

    fn environment(&self, id: &str) -> Result<&Environment> {
        self.environments
            .get(id)
            .ok_or_else(|| StrategyError::UnknownEnvironment(id.to_string()))
    }

    /// Re-read every environment recorded under the envs directory.
    fn load_environments(&mut self) -> Result<()> {
        let entries = match fs::read_dir(&self.envs_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        for entry in entries {
            let path = entry?.path().join(RESOLVER_FILE);
            let json = match fs::read_to_string(&path) {
                Ok(json) => json,
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            let record: VirtualEnvironment = serde_json::from_str(&json).map_err(|e| {
                StrategyError::Mutation(format!("unreadable {}: {e}", path.display()))
            })?;
            let resolver = ImportResolver::new(
                record.staging_root.clone(),
                record.production_root.clone(),
                &record.mappings,
            )?;
            tracing::debug!(env = %record.id, "environment reloaded");
            self.environments
                .insert(record.id.clone(), Environment { record, resolver });
        }
        Ok(())
    }

    fn current(&self) -> Result<&Environment> {
        let id = self
            .current
            .as_deref()
            .ok_or_else(|| StrategyError::Execution("no environment selected".into()))?;
        self.environment(id)
    }
}

fn last_line(output: &str) -> String {
    output
        .lines()
        .rev()
        .find(|l| !l.trim().is_empty())
        .map_or_else(|| "runner failed".to_string(), |l| l.trim().to_string())
}

fn check_environment(env: &Environment) -> HealthCheck {
    let record = &env.record;
    let mut problems = Vec::new();
    if !record.root_path.is_dir() {
        problems.push(format!("{} is missing", record.root_path.display()));
    }
    for file in [record.resolver_path(), record.hook_path()] {
        if !file.is_file() {
            problems.push(format!("{} is missing", file.display()));
        }
    }
    // Literal targets must redirect from anywhere under the staging root.
    let probe = record.staging_root.join("stagelink-health-probe.js");
    for mapping in &record.mappings {
        if let Matcher::Literal(request) = &mapping.matcher {
            match env.resolver.resolve(&probe, request) {
                Ok(Resolution::Redirected(_) | Resolution::Passthrough) => {}
                Ok(Resolution::Original(found)) => problems.push(format!(
                    "'{request}' target is missing; resolves to {} instead",
                    found.display()
                )),
                Err(e) => problems.push(e.to_string()),
            }
        }
    }

    let name = format!("environment {}", record.id);
    if problems.is_empty() {
        HealthCheck::pass(name)
    } else {
        HealthCheck::fail(name, problems.join("; "))
    }
}

impl Strategy for VirtualEnvStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::VirtualEnv
    }

    fn setup(&mut self, context: &ReferenceContext) -> Result<Details> {
        let env = self.setup_environment(&context.environment_id)?;
        let mut details = Details::from([
            ("environmentId".to_string(), env.id.clone()),
            ("resolver".to_string(), env.resolver_path().display().to_string()),
            ("mappings".to_string(), env.mappings.len().to_string()),
        ]);
        details.insert(
            "activeEnvironments".to_string(),
            self.status().active_count.to_string(),
        );
        self.current = Some(context.environment_id.clone());
        Ok(details)
    }

    fn execute(&mut self, artifacts: &[Artifact], options: &RunOptions) -> Result<TestRun> {
        let id = self.current()?.record.id.clone();
        let results: Vec<ArtifactResult> = artifacts
            .iter()
            .filter(|a| a.is_feature())
            .map(|a| match self.run_test_in_environment(&id, &a.path, options) {
                Ok(out) if out.success => ArtifactResult::passed(&a.path),
                Ok(out) => ArtifactResult::failed(&a.path, last_line(&out.output)),
                Err(e) => ArtifactResult::failed(&a.path, e.to_string()),
            })
            .collect();
        Ok(TestRun::from_results(results))
    }

    fn health_check(&self) -> Vec<HealthCheck> {
        if self.environments.is_empty() {
            return vec![HealthCheck::fail("environments", "no active environment")];
        }
        self.environments.values().map(check_environment).collect()
    }

    fn teardown(&mut self) -> Result<()> {
        let ids: Vec<String> = self.environments.keys().cloned().collect();
        for id in ids {
            self.teardown_environment(&id)?;
        }
        Ok(())
    }

    fn resume(&mut self, context: &ReferenceContext) -> Result<()> {
        self.load_environments()?;
        if !self.environments.contains_key(&context.environment_id) {
            return Err(StrategyError::UnknownEnvironment(
                context.environment_id.clone(),
            ));
        }
        self.current = Some(context.environment_id.clone());
        Ok(())
    }
}
