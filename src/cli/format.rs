//! Output formatting for CLI display.

use crate::metrics::MetricsReport;
use crate::model::{
    ArtifactResult, DeploymentLogEntry, DeploymentOutcome, HealthReport, HealthStatus,
    SetupReport, TestRun,
};

pub(super) fn format_setup(report: &SetupReport) -> String {
    let choice = if report.is_primary { "primary" } else { "fallback" };
    let mut lines = vec![format!("active: {} ({choice})", report.solution)];
    for attempt in &report.failed_attempts {
        lines.push(format!("  tried {}: {}", attempt.strategy, attempt.error));
    }
    for (key, value) in &report.outcome.details {
        lines.push(format!("  {key}: {value}"));
    }
    lines.join("\n")
}

pub(super) fn format_result(result: &ArtifactResult) -> String {
    let path = result.artifact.display();
    match (&result.error, result.success) {
        (_, true) => format!("PASS  {path}"),
        (Some(error), false) => format!("FAIL  {path}: {error}"),
        (None, false) => format!("FAIL  {path}"),
    }
}

pub(super) fn format_summary(run: &TestRun) -> String {
    let failed = run.failures();
    format!("{} passed, {failed} failed", run.results.len() - failed)
}

pub(super) fn format_health(report: &HealthReport) -> String {
    let status = match report.status {
        HealthStatus::Healthy => "healthy",
        HealthStatus::Unhealthy => "unhealthy",
        HealthStatus::Inactive => return "status: inactive (no strategy set up)".to_string(),
    };
    let mut lines = vec![match report.strategy {
        Some(strategy) => format!("status: {status} ({strategy})"),
        None => format!("status: {status}"),
    }];
    for check in &report.checks {
        lines.push(match (&check.message, check.passed) {
            (_, true) => format!("  ok    {}", check.name),
            (Some(message), false) => format!("  FAIL  {}: {message}", check.name),
            (None, false) => format!("  FAIL  {}", check.name),
        });
    }
    lines.join("\n")
}

pub(super) fn format_metrics(report: &MetricsReport) -> String {
    if report.usage.is_empty() {
        return "No metrics recorded".to_string();
    }
    let mut lines = Vec::new();
    for (kind, rate) in &report.success_rates {
        let avg = report.average_duration_ms.get(kind).copied().unwrap_or_default();
        lines.push(format!(
            "{:<14}used {:<4}success {} ({}/{})  avg {avg} ms",
            kind.name(),
            rate.attempts,
            rate.rate,
            rate.successes,
            rate.attempts,
        ));
    }
    for rec in &report.recommendations {
        lines.push(format!("- {rec}"));
    }
    lines.join("\n")
}

/// One line summarizing the deployment log. `None` when nothing was deployed.
pub(super) fn format_deployments(entries: &[DeploymentLogEntry]) -> Option<String> {
    let last = entries.last()?;
    let rolled_back = entries
        .iter()
        .filter(|e| e.outcome == DeploymentOutcome::RolledBack)
        .count();
    let outcome = match last.outcome {
        DeploymentOutcome::Completed => "completed",
        DeploymentOutcome::RolledBack => "rolled back",
    };
    Some(format!(
        "deployments: {} completed, {rolled_back} rolled back (last: {} {outcome} at {})",
        entries.len() - rolled_back,
        last.session_id,
        last.timestamp,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::metrics::MetricsLedger;
    use crate::model::{
        Details, HealthCheck, SetupAttempt, SetupOutcome, StrategyKind,
    };

    #[test]
    fn format_primary_setup() {
        let report = SetupReport {
            success: true,
            solution: StrategyKind::Symlink,
            is_primary: true,
            outcome: SetupOutcome {
                success: true,
                strategy: StrategyKind::Symlink,
                is_primary_choice: true,
                details: Details::from([("links".to_string(), "2".to_string())]),
            },
            failed_attempts: vec![],
        };
        assert_eq!(format_setup(&report), "active: symlink (primary)\n  links: 2");
    }

    #[test]
    fn format_fallback_setup_lists_attempts() {
        let report = SetupReport {
            success: true,
            solution: StrategyKind::Deploy,
            is_primary: false,
            outcome: SetupOutcome {
                success: true,
                strategy: StrategyKind::Deploy,
                is_primary_choice: false,
                details: Details::new(),
            },
            failed_attempts: vec![SetupAttempt {
                strategy: StrategyKind::Symlink,
                error: "capability unavailable: no links".into(),
            }],
        };
        assert_eq!(
            format_setup(&report),
            "active: auto-deploy (fallback)\n  tried symlink: capability unavailable: no links"
        );
    }

    #[test]
    fn format_results_and_summary() {
        let run = TestRun::from_results(vec![
            ArtifactResult::passed("features/a.feature"),
            ArtifactResult::failed("features/b.feature", "exit code 1: boom"),
        ]);
        assert_eq!(format_result(&run.results[0]), "PASS  features/a.feature");
        assert_eq!(
            format_result(&run.results[1]),
            "FAIL  features/b.feature: exit code 1: boom"
        );
        assert_eq!(format_summary(&run), "1 passed, 1 failed");
    }

    #[test]
    fn format_health_reports() {
        assert_eq!(
            format_health(&HealthReport::inactive()),
            "status: inactive (no strategy set up)"
        );

        let report = HealthReport::from_checks(
            StrategyKind::Symlink,
            vec![
                HealthCheck::pass("link support"),
                HealthCheck::fail("link pages/BasePage.js", "dangling link"),
            ],
        );
        assert_eq!(
            format_health(&report),
            "status: unhealthy (symlink)\n  ok    link support\n  FAIL  link pages/BasePage.js: dangling link"
        );
    }

    #[test]
    fn format_deployment_log() {
        assert_eq!(format_deployments(&[]), None);

        let entry = |id: &str, outcome| DeploymentLogEntry {
            timestamp: "2026-01-02T03:04:05Z".parse().unwrap(),
            session_id: id.to_string(),
            file_count: 2,
            outcome,
            files: vec![],
            errors: vec![],
        };
        let entries = [
            entry("1-0", DeploymentOutcome::Completed),
            entry("2-1", DeploymentOutcome::RolledBack),
        ];
        assert_eq!(
            format_deployments(&entries).unwrap(),
            "deployments: 1 completed, 1 rolled back (last: 2-1 rolled back at 2026-01-02T03:04:05Z)"
        );
    }

    #[test]
    fn format_empty_metrics() {
        assert_eq!(
            format_metrics(&MetricsLedger::default().report(None)),
            "No metrics recorded"
        );
    }

    #[test]
    fn format_metrics_rows() {
        let mut ledger = MetricsLedger::default();
        ledger.record(StrategyKind::Symlink, true, 10);
        ledger.record(StrategyKind::Symlink, false, 20);

        let out = format_metrics(&ledger.report(None));
        assert_eq!(out, "symlink       used 2   success 50.0% (1/2)  avg 15 ms");
    }
}
