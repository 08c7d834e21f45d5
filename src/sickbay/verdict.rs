//! Aggregate health verdicts
//!
//! Runs the ordered check list and stops at the first failure.

use crate::manifest::CheckSpec;
use crate::sickbay::checker::{CheckResult, CheckRunner, CommandRunner};
use log::debug;

/// Aggregate result of one evaluation
#[derive(Debug, Clone)]
pub struct Verdict {
    /// True when every executed check passed
    pub healthy: bool,
    /// The earliest failing check, if any
    pub first_failure: Option<CheckResult>,
    /// Number of checks actually run
    pub executed: usize,
}

/// Evaluates check lists with a runner
#[derive(Debug, Default, Clone)]
pub struct HealthEvaluator<R = CommandRunner> {
    runner: R,
}

impl<R: CheckRunner> HealthEvaluator<R> {
    pub fn new(runner: R) -> Self {
        Self { runner }
    }

    /// Run `checks` in order, short-circuiting on the first failure
    pub fn evaluate(&self, checks: &[CheckSpec]) -> Verdict {
        let mut executed = 0;

        for spec in checks {
            let result = self.runner.run(spec);
            executed += 1;
            debug!("{}", result.summary());

            if !result.passed {
                return Verdict {
                    healthy: false,
                    first_failure: Some(result),
                    executed,
                };
            }
        }

        Verdict {
            healthy: true,
            first_failure: None,
            executed,
        }
    }
}

#[cfg(test)]
impl<R> HealthEvaluator<R> {
    pub fn runner(&self) -> &R {
        &self.runner
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sickbay::checker::CheckOutcome;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Answers with scripted exit codes and records every command it runs
    struct ScriptedRunner {
        codes: HashMap<String, i32>,
        calls: Mutex<Vec<String>>,
    }

    impl ScriptedRunner {
        fn new(codes: &[(&str, i32)]) -> Self {
            Self {
                codes: codes.iter().map(|(c, code)| (c.to_string(), *code)).collect(),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl CheckRunner for ScriptedRunner {
        fn run(&self, spec: &CheckSpec) -> CheckResult {
            self.calls.lock().unwrap().push(spec.command.clone());
            let code = self.codes.get(&spec.command).copied().unwrap_or(0);
            CheckResult::classify(spec, CheckOutcome::Exited(code))
        }
    }

    #[test]
    fn test_all_passing_is_healthy() {
        let runner = ScriptedRunner::new(&[("a", 0), ("b", 5)]);
        let evaluator = HealthEvaluator::new(runner);
        let checks = vec![CheckSpec::new("a"), CheckSpec::new("b").with_codes([0, 5])];

        let verdict = evaluator.evaluate(&checks);
        assert!(verdict.healthy);
        assert!(verdict.first_failure.is_none());
        assert_eq!(verdict.executed, 2);
    }

    #[test]
    fn test_empty_list_is_healthy() {
        let evaluator = HealthEvaluator::new(ScriptedRunner::new(&[]));
        let verdict = evaluator.evaluate(&[]);
        assert!(verdict.healthy);
        assert_eq!(verdict.executed, 0);
    }

    #[test]
    fn test_short_circuits_on_first_failure() {
        let runner = ScriptedRunner::new(&[("first", 0), ("second", 1), ("third", 1)]);
        let evaluator = HealthEvaluator::new(runner);
        let checks = vec![
            CheckSpec::new("first"),
            CheckSpec::new("second"),
            CheckSpec::new("third"),
            CheckSpec::new("fourth"),
        ];

        let verdict = evaluator.evaluate(&checks);
        assert!(!verdict.healthy);
        let failure = verdict.first_failure.unwrap();
        assert_eq!(failure.spec.command, "second");
        assert_eq!(failure.exit_code(), Some(1));
        assert_eq!(verdict.executed, 2);
        assert_eq!(evaluator.runner.calls(), vec!["first", "second"]);
    }

    #[test]
    fn test_empty_codes_mean_zero() {
        let runner = ScriptedRunner::new(&[("zero", 0), ("three", 3)]);
        let evaluator = HealthEvaluator::new(runner);

        assert!(evaluator.evaluate(&[CheckSpec::new("zero")]).healthy);
        assert!(
            evaluator
                .evaluate(&[CheckSpec::new("zero").with_codes([0])])
                .healthy
        );
        assert!(!evaluator.evaluate(&[CheckSpec::new("three")]).healthy);
    }

    #[test]
    fn test_real_commands_stop_after_failure() {
        let dir = tempfile::TempDir::new().unwrap();
        let marker = dir.path().join("ran");
        let checks = vec![
            CheckSpec::new("/bin/true"),
            CheckSpec::new("/bin/false"),
            CheckSpec::new(format!("/usr/bin/env touch {}", marker.display())),
        ];

        let verdict = HealthEvaluator::new(CommandRunner).evaluate(&checks);
        assert!(!verdict.healthy);
        assert_eq!(verdict.first_failure.unwrap().spec.command, "/bin/false");
        assert!(!marker.exists());
    }

    #[test]
    fn test_evaluation_is_repeatable() {
        let evaluator = HealthEvaluator::new(CommandRunner);
        let checks = vec![CheckSpec::new("/bin/true")];
        assert!(evaluator.evaluate(&checks).healthy);
        assert!(evaluator.evaluate(&checks).healthy);
    }
}
