//! Strategy selection, fallback, and the lifecycle of the active strategy.
//!
//! The orchestrator is either uninitialized or holds exactly one active
//! strategy. A new setup tears down whatever was active first.

use std::time::Instant;

use crate::metrics::{MetricsLedger, MetricsReport};
use crate::model::{
    Artifact, Details, HealthReport, PerformanceMode, ReferenceContext, RunOptions, SetupAttempt,
    SetupOutcome, SetupReport, StrategyKind, TestRun,
};
use crate::strategy::{Strategy, StrategyError, StrategyFactory};

/// Default artifact count above which the virtual strategy is preferred.
pub const DEFAULT_LARGE_ARTIFACT_THRESHOLD: usize = 50;

#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("no strategy is active; run setup first")]
    NotActive,

    #[error("all strategies failed (last: {})", describe_last(attempts))]
    AllStrategiesFailed { attempts: Vec<SetupAttempt> },

    #[error("{strategy} failed: {source}")]
    Strategy {
        strategy: StrategyKind,
        #[source]
        source: StrategyError,
    },
}

fn describe_last(attempts: &[SetupAttempt]) -> String {
    attempts
        .last()
        .map_or_else(
            || "none attempted".to_string(),
            |a| format!("{}: {}", a.strategy, a.error),
        )
}

pub type Result<T> = core::result::Result<T, OrchestratorError>;

struct Active {
    strategy: Box<dyn Strategy>,
    outcome: SetupOutcome,
}

pub struct Orchestrator<F> {
    factory: F,
    active: Option<Active>,
    ledger: MetricsLedger,
    large_artifact_threshold: usize,
}

impl<F: StrategyFactory> Orchestrator<F> {
    pub fn new(factory: F, ledger: MetricsLedger, large_artifact_threshold: usize) -> Self {
        Self {
            factory,
            active: None,
            ledger,
            large_artifact_threshold,
        }
    }

    /// Pick a strategy for `context`. An explicit preference always wins.
    pub fn select_optimal_strategy(&self, context: &ReferenceContext) -> StrategyKind {
        if let Some(preferred) = context.user_preferred_strategy {
            return preferred;
        }
        if context.platform.links_need_privileges() && !context.has_elevated_privileges {
            return StrategyKind::PathResolver;
        }
        if context.staged_artifact_count > self.large_artifact_threshold {
            return StrategyKind::VirtualEnv;
        }
        match context.performance_mode {
            PerformanceMode::Fast => StrategyKind::Symlink,
            PerformanceMode::Safe => StrategyKind::Deploy,
            PerformanceMode::Balanced => StrategyKind::PathResolver,
        }
    }

    /// Select, then set up with fallback.
    pub fn setup_reference_system(&mut self, context: &ReferenceContext) -> Result<SetupReport> {
        let preferred = self.select_optimal_strategy(context);
        tracing::debug!(%preferred, "selected strategy");
        self.setup_with_fallback(preferred, context)
    }

    /// Try `preferred`, then the rest of the default chain, until one sets up.
    ///
    /// Every attempt is timed and recorded in the metrics ledger.
    pub fn setup_with_fallback(
        &mut self,
        preferred: StrategyKind,
        context: &ReferenceContext,
    ) -> Result<SetupReport> {
        if self.active.is_some() {
            self.cleanup()?;
        }

        let mut failed_attempts = Vec::new();
        for kind in StrategyKind::attempt_order(preferred) {
            let start = Instant::now();
            let attempt = self.factory.build(kind).and_then(|mut strategy| {
                strategy
                    .setup(context)
                    .map(|details| (strategy, details))
            });
            let duration_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);
            self.record_metrics(kind, attempt.is_ok(), duration_ms);

            match attempt {
                Ok((strategy, details)) => {
                    let outcome = SetupOutcome {
                        success: true,
                        strategy: kind,
                        is_primary_choice: kind == preferred,
                        details,
                    };
                    tracing::info!(
                        strategy = %kind,
                        primary = outcome.is_primary_choice,
                        "strategy active"
                    );
                    self.active = Some(Active {
                        strategy,
                        outcome: outcome.clone(),
                    });
                    return Ok(SetupReport {
                        success: true,
                        solution: kind,
                        is_primary: outcome.is_primary_choice,
                        outcome,
                        failed_attempts,
                    });
                }
                Err(e) => {
                    tracing::warn!(strategy = %kind, error = %e, "setup failed, falling back");
                    failed_attempts.push(SetupAttempt {
                        strategy: kind,
                        error: e.to_string(),
                    });
                }
            }
        }

        Err(OrchestratorError::AllStrategiesFailed {
            attempts: failed_attempts,
        })
    }

    /// Re-adopt a strategy a previous process set up, without setting it up again.
    pub fn resume(&mut self, outcome: SetupOutcome, context: &ReferenceContext) -> Result<()> {
        let kind = outcome.strategy;
        let wrap = |source| OrchestratorError::Strategy {
            strategy: kind,
            source,
        };
        let mut strategy = self.factory.build(kind).map_err(wrap)?;
        strategy.resume(context).map_err(wrap)?;
        tracing::debug!(strategy = %strategy.kind(), "resumed session");
        self.active = Some(Active { strategy, outcome });
        Ok(())
    }

    /// Run `artifacts` through the active strategy.
    pub fn execute_tests(
        &mut self,
        artifacts: &[Artifact],
        options: &RunOptions,
    ) -> Result<TestRun> {
        let active = self.active.as_mut().ok_or(OrchestratorError::NotActive)?;
        let kind = active.outcome.strategy;
        let run = active
            .strategy
            .execute(artifacts, options)
            .map_err(|source| OrchestratorError::Strategy {
                strategy: kind,
                source,
            })?;
        tracing::info!(
            strategy = %kind,
            results = run.results.len(),
            failures = run.failures(),
            "tests finished"
        );
        Ok(run)
    }

    pub fn health_check(&self) -> HealthReport {
        match &self.active {
            Some(active) => {
                HealthReport::from_checks(active.outcome.strategy, active.strategy.health_check())
            }
            None => HealthReport::inactive(),
        }
    }

    /// Rebuild the active strategy's resources in place.
    pub fn repair(&mut self, context: &ReferenceContext) -> Result<Details> {
        let active = self.active.as_mut().ok_or(OrchestratorError::NotActive)?;
        let kind = active.outcome.strategy;
        let details = active
            .strategy
            .repair(context)
            .map_err(|source| OrchestratorError::Strategy {
                strategy: kind,
                source,
            })?;
        active.outcome.details.clone_from(&details);
        Ok(details)
    }

    pub fn record_metrics(&mut self, strategy: StrategyKind, success: bool, duration_ms: u64) {
        self.ledger.record(strategy, success, duration_ms);
    }

    pub fn metrics_report(&self) -> MetricsReport {
        self.ledger.report(self.active.as_ref().map(|a| a.outcome.strategy))
    }

    pub fn ledger(&self) -> &MetricsLedger {
        &self.ledger
    }

    pub fn active_strategy(&self) -> Option<&SetupOutcome> {
        self.active.as_ref().map(|a| &a.outcome)
    }

    /// Tear down the active strategy. A no-op when nothing is active.
    ///
    /// If teardown fails the strategy stays active so cleanup can be retried.
    pub fn cleanup(&mut self) -> Result<()> {
        let Some(mut active) = self.active.take() else {
            return Ok(());
        };
        let kind = active.outcome.strategy;
        if let Err(source) = active.strategy.teardown() {
            self.active = Some(active);
            return Err(OrchestratorError::Strategy {
                strategy: kind,
                source,
            });
        }
        tracing::info!(strategy = %kind, "strategy torn down");
        Ok(())
    }
}
