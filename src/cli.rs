//! CLI interface for stagelink.
//!
//! Every command is non-interactive. Reports go to stdout, logs to stderr.
//! State that must outlive one invocation (the active strategy, metrics,
//! virtual environments) lives under the scratch directory, so
//! `stagelink setup` followed by `stagelink test` picks up where setup left off.

mod format;

use std::{
    env,
    path::{Path, PathBuf},
};

use clap::{Parser, Subcommand, ValueEnum};
use jiff::Timestamp;
use uuid::Uuid;

use crate::config::Config;
use crate::discover::discover_artifacts;
use crate::model::{
    HealthStatus, PerformanceMode, Platform, ReferenceContext, RunOptions, SessionInfo,
    SetupOutcome, StrategyKind,
};
use crate::orchestrator::Orchestrator;
use crate::storage::Storage;
use crate::strategy::{ConfiguredStrategies, StrategyFactory, probe_link_capability};

use format::{
    format_deployments, format_health, format_metrics, format_result, format_setup,
    format_summary,
};

/// stagelink: run staged test artifacts against a shared production tree.
#[derive(Debug, Parser)]
#[command(name = "stagelink", after_long_help = WORKFLOW_HELP)]
pub struct Cli {
    /// Strategy to try first.
    #[arg(long, global = true, value_name = "STRATEGY", value_parser = parse_strategy)]
    solution: Option<StrategyKind>,

    /// Speed/safety trade-off used when no strategy is given.
    #[arg(long, global = true, value_enum, default_value_t = ModeArg::Balanced)]
    mode: ModeArg,

    /// Environment id. Defaults to the active session's, or a fresh one.
    #[arg(long, global = true)]
    env: Option<String>,

    /// Cucumber tag expression passed to the runner.
    #[arg(long, global = true)]
    tags: Option<String>,

    /// Directory to discover artifacts in. Defaults to the staging root.
    #[arg(long, global = true)]
    path: Option<PathBuf>,

    /// Config file. Defaults to ./stagelink.toml, then ~/.stagelink/config.toml.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

const WORKFLOW_HELP: &str = r"Workflow:
  1. stagelink setup --mode fast
     → prints the active strategy and any fallbacks tried
  2. stagelink test --tags @smoke
  3. stagelink health
  4. stagelink cleanup

Strategies: path-resolver, auto-deploy, symlink, virtual.
Set STAGELINK_LOG=debug for detailed logs on stderr.";

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Select and set up a strategy, falling back along the chain on failure.
    Setup,

    /// Run staged features through the active strategy.
    ///
    /// Sets up first when no session is active.
    Test,

    /// Re-verify the active strategy without changing anything.
    Health,

    /// Show per-strategy setup metrics and recommendations.
    Metrics,

    /// Tear down the active strategy and forget the session.
    Cleanup,

    /// Rebuild the active strategy's resources.
    Repair,
}

/// CLI-facing performance mode, mapped to the domain `PerformanceMode`.
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum ModeArg {
    /// Prefer symbolic links.
    Fast,
    /// Prefer plain path resolution.
    Balanced,
    /// Prefer copy deployment with rollback.
    Safe,
}

impl ModeArg {
    fn to_domain(self) -> PerformanceMode {
        match self {
            Self::Fast => PerformanceMode::Fast,
            Self::Balanced => PerformanceMode::Balanced,
            Self::Safe => PerformanceMode::Safe,
        }
    }
}

fn parse_strategy(s: &str) -> Result<StrategyKind, String> {
    s.parse()
}

type App = Orchestrator<ConfiguredStrategies>;

/// Run the CLI, returning an error message on failure.
pub fn run(cli: Cli, config: &Config, storage: &Storage) -> Result<(), String> {
    let session = storage
        .load_session()
        .map_err(|e| format!("failed to read session: {e}"))?;
    let context = build_context(&cli, config, session.as_ref());
    let mut app = build_orchestrator(config, storage)?;

    match cli.command {
        Command::Setup => {
            // Whatever the previous session set up is torn down first.
            if let Err(e) = resume(&mut app, &context, session) {
                tracing::warn!(error = %e, "previous session could not be resumed");
            }
            cmd_setup(&mut app, storage, &context)
        }
        Command::Test => cmd_test(&mut app, storage, &cli, config, &context, session),
        Command::Health => cmd_health(&mut app, &context, session),
        Command::Metrics => cmd_metrics(&mut app, storage, &context, session),
        Command::Cleanup => cmd_cleanup(&mut app, storage, &context, session),
        Command::Repair => cmd_repair(&mut app, storage, &context, session),
    }
}

fn build_orchestrator(config: &Config, storage: &Storage) -> Result<App, String> {
    let ledger = storage
        .load_ledger()
        .map_err(|e| format!("failed to read metrics: {e}"))?;
    Ok(Orchestrator::new(
        ConfiguredStrategies::new(config.clone(), storage.clone()),
        ledger,
        config.large_artifact_threshold,
    ))
}

fn build_context(cli: &Cli, config: &Config, session: Option<&SessionInfo>) -> ReferenceContext {
    let environment_id = cli
        .env
        .clone()
        .or_else(|| session.map(|s| s.environment_id.clone()))
        .unwrap_or_else(|| Uuid::new_v4().to_string()[..8].to_string());
    let platform = Platform::current();

    ReferenceContext {
        platform,
        has_elevated_privileges: has_elevated_privileges(platform),
        staged_artifact_count: discover_artifacts(artifact_root(cli, config)).len(),
        performance_mode: cli.mode.to_domain(),
        environment_id,
        user_preferred_strategy: cli.solution,
    }
}

/// Whether this process can create symbolic links, where that needs privileges.
fn has_elevated_privileges(platform: Platform) -> bool {
    if !platform.links_need_privileges() {
        return true;
    }
    probe_link_capability(&env::temp_dir()).is_ok()
}

fn artifact_root<'a>(cli: &'a Cli, config: &'a Config) -> &'a Path {
    cli.path.as_deref().unwrap_or(&config.staging_root)
}

/// Re-adopt the session's strategy. `false` when there is no session.
fn resume(
    app: &mut App,
    context: &ReferenceContext,
    session: Option<SessionInfo>,
) -> Result<bool, String> {
    let Some(session) = session else {
        return Ok(false);
    };
    let outcome = SetupOutcome {
        success: true,
        strategy: session.strategy,
        is_primary_choice: session.is_primary,
        details: session.details,
    };
    app.resume(outcome, context)
        .map_err(|e| format!("failed to resume session: {e}"))?;
    Ok(true)
}

fn cmd_setup<F: StrategyFactory>(
    app: &mut Orchestrator<F>,
    storage: &Storage,
    context: &ReferenceContext,
) -> Result<(), String> {
    let result = app.setup_reference_system(context);
    storage
        .save_ledger(app.ledger())
        .map_err(|e| format!("failed to save metrics: {e}"))?;
    let report = match result {
        Ok(report) => report,
        Err(e) => {
            // A previous strategy that failed to tear down is still active,
            // and `cleanup` needs its record to find it.
            if app.active_strategy().is_none()
                && let Err(clear) = storage.clear_session()
            {
                tracing::warn!(error = %clear, "failed to clear stale session");
            }
            return Err(e.to_string());
        }
    };

    storage
        .save_session(&SessionInfo {
            strategy: report.solution,
            timestamp: Timestamp::now(),
            is_primary: report.is_primary,
            environment_id: context.environment_id.clone(),
            details: report.outcome.details.clone(),
            failed_attempts: report.failed_attempts.clone(),
        })
        .map_err(|e| format!("failed to save session: {e}"))?;

    println!("{}", format_setup(&report));
    Ok(())
}

fn cmd_test(
    app: &mut App,
    storage: &Storage,
    cli: &Cli,
    config: &Config,
    context: &ReferenceContext,
    session: Option<SessionInfo>,
) -> Result<(), String> {
    if !resume(app, context, session)? {
        cmd_setup(app, storage, context)?;
    }

    let root = artifact_root(cli, config);
    let artifacts = discover_artifacts(root);
    if artifacts.is_empty() {
        return Err(format!("no artifacts found under {}", root.display()));
    }

    let options = RunOptions {
        tags: cli.tags.clone(),
    };
    let run = app
        .execute_tests(&artifacts, &options)
        .map_err(|e| e.to_string())?;

    for result in &run.results {
        println!("{}", format_result(result));
    }
    println!("{}", format_summary(&run));

    if run.success {
        Ok(())
    } else {
        Err("tests failed".to_string())
    }
}

fn cmd_health(
    app: &mut App,
    context: &ReferenceContext,
    session: Option<SessionInfo>,
) -> Result<(), String> {
    resume(app, context, session)?;
    let report = app.health_check();
    println!("{}", format_health(&report));

    match report.status {
        HealthStatus::Unhealthy => Err("health check failed".to_string()),
        HealthStatus::Healthy | HealthStatus::Inactive => Ok(()),
    }
}

fn cmd_metrics(
    app: &mut App,
    storage: &Storage,
    context: &ReferenceContext,
    session: Option<SessionInfo>,
) -> Result<(), String> {
    // The active strategy only shapes recommendations; a broken session
    // should not hide the numbers.
    if let Err(e) = resume(app, context, session) {
        tracing::warn!(error = %e, "reporting metrics without an active strategy");
    }
    println!("{}", format_metrics(&app.metrics_report()));

    let deployments = storage
        .load_deployments()
        .map_err(|e| format!("failed to read deployment log: {e}"))?;
    if let Some(line) = format_deployments(&deployments) {
        println!("{line}");
    }
    Ok(())
}

fn cmd_cleanup(
    app: &mut App,
    storage: &Storage,
    context: &ReferenceContext,
    session: Option<SessionInfo>,
) -> Result<(), String> {
    if !resume(app, context, session)? {
        println!("Nothing to clean up");
        return Ok(());
    }
    let strategy = app
        .active_strategy()
        .map(|outcome| outcome.strategy)
        .ok_or("session resumed without an active strategy")?;
    app.cleanup().map_err(|e| e.to_string())?;
    storage
        .clear_session()
        .map_err(|e| format!("failed to clear session: {e}"))?;

    println!("cleaned up {strategy}");
    Ok(())
}

fn cmd_repair(
    app: &mut App,
    storage: &Storage,
    context: &ReferenceContext,
    session: Option<SessionInfo>,
) -> Result<(), String> {
    let Some(mut info) = session.clone() else {
        return Err("no active session; run setup first".to_string());
    };
    resume(app, context, session)?;
    let details = app.repair(context).map_err(|e| e.to_string())?;

    info.details = details;
    info.timestamp = Timestamp::now();
    storage
        .save_session(&info)
        .map_err(|e| format!("failed to save session: {e}"))?;

    println!("repaired {}", info.strategy);
    for (key, value) in &info.details {
        println!("  {key}: {value}");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::metrics::MetricsLedger;
    use crate::model::{Artifact, Details, HealthCheck, TestRun};
    use crate::storage::test_storage;
    use crate::strategy::{Strategy, StrategyError};

    /// Sets up fine but can never be torn down.
    struct Stuck;

    impl Strategy for Stuck {
        fn kind(&self) -> StrategyKind {
            StrategyKind::Symlink
        }

        fn setup(&mut self, _context: &ReferenceContext) -> crate::strategy::Result<Details> {
            Ok(Details::new())
        }

        fn execute(
            &mut self,
            _artifacts: &[Artifact],
            _options: &RunOptions,
        ) -> crate::strategy::Result<TestRun> {
            Ok(TestRun::from_results(Vec::new()))
        }

        fn health_check(&self) -> Vec<HealthCheck> {
            Vec::new()
        }

        fn teardown(&mut self) -> crate::strategy::Result<()> {
            Err(StrategyError::Mutation("link busy".into()))
        }
    }

    struct StuckFactory;

    impl StrategyFactory for StuckFactory {
        fn build(&self, _kind: StrategyKind) -> crate::strategy::Result<Box<dyn Strategy>> {
            Ok(Box::new(Stuck))
        }
    }

    struct NothingWorks;

    impl StrategyFactory for NothingWorks {
        fn build(&self, kind: StrategyKind) -> crate::strategy::Result<Box<dyn Strategy>> {
            Err(StrategyError::Capability(format!("{kind} unavailable")))
        }
    }

    fn context() -> ReferenceContext {
        ReferenceContext {
            platform: Platform::Linux,
            has_elevated_privileges: true,
            staged_artifact_count: 1,
            performance_mode: PerformanceMode::Fast,
            environment_id: "e1".into(),
            user_preferred_strategy: None,
        }
    }

    #[test]
    fn failed_teardown_keeps_the_session() {
        let (_dir, storage) = test_storage();
        let mut app = Orchestrator::new(StuckFactory, MetricsLedger::default(), 50);

        cmd_setup(&mut app, &storage, &context()).unwrap();
        assert!(storage.load_session().unwrap().is_some());

        let err = cmd_setup(&mut app, &storage, &context()).unwrap_err();
        assert!(err.contains("link busy"), "{err}");
        assert!(app.active_strategy().is_some());
        assert_eq!(
            storage.load_session().unwrap().map(|s| s.strategy),
            Some(StrategyKind::Symlink)
        );
    }

    #[test]
    fn exhausted_fallback_clears_the_session() {
        let (_dir, storage) = test_storage();
        storage
            .save_session(&SessionInfo {
                strategy: StrategyKind::Deploy,
                timestamp: Timestamp::now(),
                is_primary: true,
                environment_id: "e1".into(),
                details: Details::new(),
                failed_attempts: Vec::new(),
            })
            .unwrap();
        let mut app = Orchestrator::new(NothingWorks, MetricsLedger::default(), 50);

        let err = cmd_setup(&mut app, &storage, &context()).unwrap_err();
        assert!(err.starts_with("all strategies failed"), "{err}");
        assert!(storage.load_session().unwrap().is_none());
    }
}
