//! Child-process execution: the BDD test runner and the syntax check.
//!
//! The runner is the only operation with a timeout. Output is drained on
//! background threads so a chatty child can't fill a pipe and stall. On unix
//! the runner leads its own process group, and a timeout kills the group:
//! `npx` and friends leave grandchildren holding the pipes otherwise.

use std::{
    ffi::OsString,
    io::Read,
    path::Path,
    process::{Child, Command, ExitStatus, Stdio},
    sync::mpsc,
    thread,
    time::{Duration, Instant},
};

use crate::config::RunnerConfig;
use crate::model::{Artifact, ArtifactResult, RunOptions, TestRun};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// How long output is still collected once the child is gone.
const DRAIN_GRACE: Duration = Duration::from_millis(500);

/// Errors from spawning or supervising a child process.
#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    #[error("runner command is empty")]
    EmptyCommand,

    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} timed out after {timeout:?}")]
    Timeout { program: String, timeout: Duration },

    #[error("failed to wait for {program}: {source}")]
    Wait {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

/// What a finished child reported.
#[derive(Debug, Clone)]
pub struct RunnerOutput {
    pub success: bool,
    pub exit_code: Option<i32>,

    /// Stdout followed by stderr.
    pub output: String,
}

/// The BDD test runner command.
#[derive(Debug, Clone)]
pub struct Runner {
    command: Vec<String>,
    timeout: Duration,
}

impl Runner {
    pub fn new(command: Vec<String>, timeout: Duration) -> Self {
        Self { command, timeout }
    }

    pub fn from_config(config: &RunnerConfig) -> Self {
        Self::new(
            config.command.clone(),
            Duration::from_secs(config.timeout_secs),
        )
    }

    /// Run one feature file with `cwd` as the working directory.
    ///
    /// `envs` are added to the child's environment.
    pub fn run_feature(
        &self,
        cwd: &Path,
        feature: &Path,
        options: &RunOptions,
        envs: &[(&str, OsString)],
    ) -> Result<RunnerOutput, RunnerError> {
        let (program, leading) = self
            .command
            .split_first()
            .ok_or(RunnerError::EmptyCommand)?;

        let mut cmd = Command::new(program);
        cmd.args(leading).arg(feature).current_dir(cwd);
        if let Some(tags) = &options.tags {
            cmd.args(["--tags", tags]);
        }
        for (key, value) in envs {
            cmd.env(key, value);
        }

        tracing::debug!(program, feature = %feature.display(), "running feature");
        run_with_timeout(cmd, program, self.timeout)
    }

    /// The shared default executor: run every feature artifact under `cwd`.
    ///
    /// Features are run one at a time so one failure never hides another.
    /// Steps and page artifacts are exercised by the features that use them.
    pub fn run_artifacts(
        &self,
        cwd: &Path,
        artifacts: &[Artifact],
        options: &RunOptions,
    ) -> TestRun {
        let results = artifacts
            .iter()
            .filter(|a| a.is_feature())
            .map(|a| self.run_one(cwd, &a.path, &a.path, options, &[]))
            .collect();
        TestRun::from_results(results)
    }

    /// Run `feature` and report the result against `reported_as`.
    pub fn run_one(
        &self,
        cwd: &Path,
        feature: &Path,
        reported_as: &Path,
        options: &RunOptions,
        envs: &[(&str, OsString)],
    ) -> ArtifactResult {
        match self.run_feature(cwd, feature, options, envs) {
            Ok(out) if out.success => ArtifactResult::passed(reported_as),
            Ok(out) => ArtifactResult::failed(reported_as, failure_message(&out)),
            Err(e) => ArtifactResult::failed(reported_as, e.to_string()),
        }
    }
}

/// Run a check command against `file`, returning its output on failure.
///
/// Used after deployment to catch syntax-level defects.
pub fn run_check(command: &[String], file: &Path) -> Result<(), String> {
    let (program, leading) = command
        .split_first()
        .ok_or_else(|| RunnerError::EmptyCommand.to_string())?;

    let output = Command::new(program)
        .args(leading)
        .arg(file)
        .output()
        .map_err(|e| format!("failed to run {program}: {e}"))?;

    if output.status.success() {
        return Ok(());
    }
    let stderr = String::from_utf8_lossy(&output.stderr);
    Err(format!(
        "{} failed{}",
        program,
        if stderr.trim().is_empty() {
            String::new()
        } else {
            format!(": {}", stderr.trim())
        }
    ))
}

fn run_with_timeout(
    mut cmd: Command,
    program: &str,
    timeout: Duration,
) -> Result<RunnerOutput, RunnerError> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    #[cfg(unix)]
    std::os::unix::process::CommandExt::process_group(&mut cmd, 0);

    let mut child = cmd.spawn().map_err(|source| RunnerError::Spawn {
        program: program.to_string(),
        source,
    })?;

    let stdout = drain(child.stdout.take());
    let stderr = drain(child.stderr.take());

    let start = Instant::now();
    let status: ExitStatus = loop {
        let waited = child.try_wait().map_err(|source| RunnerError::Wait {
            program: program.to_string(),
            source,
        })?;
        if let Some(status) = waited {
            break status;
        }
        if start.elapsed() > timeout {
            kill_tree(&mut child);
            // Whatever survived the kill may still hold the pipes.
            let deadline = Instant::now() + DRAIN_GRACE;
            collect(&stdout, deadline);
            collect(&stderr, deadline);
            tracing::warn!(program, ?timeout, "runner timed out");
            return Err(RunnerError::Timeout {
                program: program.to_string(),
                timeout,
            });
        }
        thread::sleep(POLL_INTERVAL);
    };

    let deadline = Instant::now() + DRAIN_GRACE;
    let mut output = collect(&stdout, deadline);
    output.extend(collect(&stderr, deadline));

    tracing::debug!(program, code = ?status.code(), "runner exited");
    Ok(RunnerOutput {
        success: status.success(),
        exit_code: status.code(),
        output: String::from_utf8_lossy(&output).into_owned(),
    })
}

/// Kill the child and, on unix, every process in its group.
fn kill_tree(child: &mut Child) {
    #[cfg(unix)]
    {
        let group = format!("-{}", child.id());
        let killed = Command::new("kill")
            .args(["-KILL", "--", &group])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();
        if let Err(e) = killed {
            tracing::debug!(error = %e, "failed to signal runner process group");
        }
    }
    let _ = child.kill();
    let _ = child.wait();
}

/// Read `pipe` on a background thread, sending chunks as they arrive.
fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> mpsc::Receiver<Vec<u8>> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let Some(mut pipe) = pipe else {
            return;
        };
        let mut buf = [0u8; 8192];
        loop {
            match pipe.read(&mut buf) {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if tx.send(buf[..n].to_vec()).is_err() {
                        break;
                    }
                }
            }
        }
    });
    rx
}

/// Gather drained chunks until the pipe closes or `deadline` passes.
fn collect(rx: &mpsc::Receiver<Vec<u8>>, deadline: Instant) -> Vec<u8> {
    let mut out = Vec::new();
    while let Ok(chunk) = rx.recv_timeout(deadline.saturating_duration_since(Instant::now())) {
        out.extend(chunk);
    }
    out
}

/// A short failure line: the exit code and the last line of output.
fn failure_message(out: &RunnerOutput) -> String {
    let code = out.exit_code.map_or_else(
        || "killed by signal".to_string(),
        |c| format!("exit code {c}"),
    );
    match out.output.lines().rev().find(|l| !l.trim().is_empty()) {
        Some(last) => format!("{code}: {}", last.trim()),
        None => code,
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    use tempfile::TempDir;

    use crate::model::ArtifactType;

    fn run(runner: &Runner, dir: &TempDir) -> Result<RunnerOutput, RunnerError> {
        runner.run_feature(
            dir.path(),
            Path::new("a.feature"),
            &RunOptions::default(),
            &[],
        )
    }

    fn sh(script: &str) -> Runner {
        Runner::new(
            vec!["sh".into(), "-c".into(), script.into(), "runner".into()],
            Duration::from_secs(10),
        )
    }

    #[test]
    fn passing_feature_reports_success_and_output() {
        let dir = TempDir::new().unwrap();
        let runner = sh("echo ran $1");
        let out = run(&runner, &dir).unwrap();

        assert!(out.success);
        assert_eq!(out.exit_code, Some(0));
        assert!(out.output.contains("ran a.feature"));
    }

    #[test]
    fn passes_tags_and_env() {
        let dir = TempDir::new().unwrap();
        let runner = sh(r#"echo "$STAGELINK_ENV_ID $2 $3""#);
        let options = RunOptions {
            tags: Some("@smoke".into()),
        };
        let out = runner
            .run_feature(
                dir.path(),
                Path::new("a.feature"),
                &options,
                &[("STAGELINK_ENV_ID", OsString::from("env-1"))],
            )
            .unwrap();

        assert!(out.output.contains("env-1 --tags @smoke"));
    }

    #[test]
    fn captures_stderr_and_exit_code() {
        let dir = TempDir::new().unwrap();
        let runner = sh("echo boom >&2; exit 3");
        let out = run(&runner, &dir).unwrap();

        assert!(!out.success);
        assert_eq!(out.exit_code, Some(3));
        assert_eq!(failure_message(&out), "exit code 3: boom");
    }

    #[test]
    fn kills_child_after_timeout() {
        let dir = TempDir::new().unwrap();
        let runner = Runner::new(
            vec!["sh".into(), "-c".into(), "exec sleep 5".into()],
            Duration::from_millis(200),
        );
        let err = run(&runner, &dir).unwrap_err();

        assert!(matches!(err, RunnerError::Timeout { .. }));
        assert_eq!(err.to_string(), "sh timed out after 200ms");
    }

    #[test]
    fn timeout_is_not_held_up_by_grandchildren() {
        let dir = TempDir::new().unwrap();
        // The shell forks sleep instead of exec'ing it, so the pipes have a
        // second holder.
        let runner = Runner::new(
            vec!["sh".into(), "-c".into(), "sleep 5; true".into()],
            Duration::from_millis(200),
        );
        let start = Instant::now();
        let err = run(&runner, &dir).unwrap_err();

        assert!(matches!(err, RunnerError::Timeout { .. }));
        assert!(start.elapsed() < Duration::from_secs(2), "took {:?}", start.elapsed());
    }

    #[test]
    fn missing_program_is_a_spawn_error() {
        let dir = TempDir::new().unwrap();
        let runner = Runner::new(
            vec!["stagelink-no-such-runner".into()],
            Duration::from_secs(1),
        );
        let err = run(&runner, &dir).unwrap_err();

        assert!(matches!(err, RunnerError::Spawn { .. }));
    }

    #[test]
    fn default_executor_runs_only_features_and_keeps_going() {
        let dir = TempDir::new().unwrap();
        let runner = sh(r#"case "$1" in *bad*) exit 1;; esac"#);
        let artifacts = [
            Artifact::new("good.feature", ArtifactType::Feature),
            Artifact::new("bad.feature", ArtifactType::Feature),
            Artifact::new("login.steps.js", ArtifactType::Steps),
        ];

        let run = runner.run_artifacts(dir.path(), &artifacts, &RunOptions::default());

        assert!(!run.success);
        assert_eq!(run.results.len(), 2);
        assert!(run.results[0].success);
        assert!(!run.results[1].success);
    }

    #[test]
    fn check_command_failure_carries_stderr() {
        let err = run_check(
            &["sh".into(), "-c".into(), "echo 'SyntaxError' >&2; exit 1".into(), "check".into()],
            Path::new("x.js"),
        )
        .unwrap_err();
        assert_eq!(err, "sh failed: SyntaxError");
    }
}
