//! Check execution
//!
//! Runs one configured check command to completion and classifies its exit
//! status against the check's accepted codes.

use crate::manifest::CheckSpec;
use std::fmt;
use std::io;
use std::os::unix::process::ExitStatusExt;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

/// How a check command ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckOutcome {
    /// The command ran and exited with a code
    Exited(i32),
    /// The command was killed by a signal
    Signaled(i32),
    /// The command could not be launched at all
    LaunchFailed { kind: io::ErrorKind, message: String },
}

impl fmt::Display for CheckOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CheckOutcome::Exited(code) => write!(f, "exit code {}", code),
            CheckOutcome::Signaled(signal) => write!(f, "killed by signal {}", signal),
            CheckOutcome::LaunchFailed { kind, message } => {
                write!(f, "could not run ({}): {}", kind, message)
            }
        }
    }
}

/// Result of a single check execution
#[derive(Debug, Clone)]
pub struct CheckResult {
    /// The check that ran
    pub spec: CheckSpec,
    /// How it ended
    pub outcome: CheckOutcome,
    /// Whether it counts as healthy
    pub passed: bool,
    /// Execution duration
    pub duration: Duration,
    /// Output (stdout/stderr combined)
    pub output: String,
}

impl CheckResult {
    /// Classify an outcome against the check's accepted codes
    pub fn classify(spec: &CheckSpec, outcome: CheckOutcome) -> Self {
        // A signal N counts as code -N
        let passed = match outcome {
            CheckOutcome::Exited(code) => spec.accepts(code),
            CheckOutcome::Signaled(signal) => spec.accepts(-signal),
            CheckOutcome::LaunchFailed { .. } => false,
        };

        Self {
            spec: spec.clone(),
            outcome,
            passed,
            duration: Duration::ZERO,
            output: String::new(),
        }
    }

    fn with_output(mut self, output: String, duration: Duration) -> Self {
        self.output = output;
        self.duration = duration;
        self
    }

    /// Exit code, if the command ran to an exit
    pub fn exit_code(&self) -> Option<i32> {
        match self.outcome {
            CheckOutcome::Exited(code) => Some(code),
            _ => None,
        }
    }

    /// Get a summary string for this check result
    pub fn summary(&self) -> String {
        let status = if self.passed { "ok" } else { "fail" };
        format!(
            "{}:{} ({}, {}ms)",
            self.spec.command,
            status,
            self.outcome,
            self.duration.as_millis()
        )
    }
}

/// Executes a check and reports how it went
///
/// Implementations never fail: every failure mode ends up in the result.
pub trait CheckRunner {
    fn run(&self, spec: &CheckSpec) -> CheckResult;
}

/// Shell that interprets check command lines
pub const SHELL: &str = "/bin/sh";

/// Runs checks as child processes
///
/// Each command line is handed to [`SHELL`] with `-c`, so pipes, `||` and
/// variable expansion work as written. There is no timeout: a hanging check
/// hangs its request.
#[derive(Debug, Default, Clone, Copy)]
pub struct CommandRunner;

impl CheckRunner for CommandRunner {
    fn run(&self, spec: &CheckSpec) -> CheckResult {
        let start = Instant::now();

        let output = Command::new(SHELL)
            .arg("-c")
            .arg(&spec.command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output();

        match output {
            Ok(output) => {
                let outcome = match (output.status.code(), output.status.signal()) {
                    (Some(code), _) => CheckOutcome::Exited(code),
                    (None, Some(signal)) => CheckOutcome::Signaled(signal),
                    (None, None) => CheckOutcome::Exited(-1),
                };
                let combined = format!(
                    "{}{}",
                    String::from_utf8_lossy(&output.stdout),
                    String::from_utf8_lossy(&output.stderr)
                );
                CheckResult::classify(spec, outcome).with_output(combined, start.elapsed())
            }
            Err(e) => CheckResult::classify(
                spec,
                CheckOutcome::LaunchFailed {
                    kind: e.kind(),
                    message: e.to_string(),
                },
            )
            .with_output(String::new(), start.elapsed()),
        }
    }
}
