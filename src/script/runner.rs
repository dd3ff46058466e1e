//! Sandbox facade
//!
//! Runs one script through parse, guard, interpreter and formatter. Each
//! execution gets a fresh [`ExecutionState`] on its own thread; only the
//! policy and limits are shared.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tracing::{debug, warn};

use crate::config::{Limits, SandboxConfig};
use crate::engine::{ExecutionState, Interpreter};
use crate::error::{ExceptionKind, Result, SandboxError};
use crate::output::result::{ExecutionResult, FailureKind};
use crate::parser::{parse_program_with_depth, Program};
use crate::security::guard::check_program;
use crate::security::policy::PolicySet;

/// Stack for the interpreter thread; the tree walker recurses per nested
/// call and expression.
const INTERPRETER_STACK_SIZE: usize = 64 * 1024 * 1024;

/// A configured sandbox. Cheap to clone and safe to share between threads.
#[derive(Debug, Clone)]
pub struct Sandbox {
    policy: Arc<PolicySet>,
    limits: Limits,
    timeout: Option<Duration>,
}

impl Default for Sandbox {
    fn default() -> Self {
        Self::new(PolicySet::standard(), Limits::default())
    }
}

impl Sandbox {
    pub fn new(policy: PolicySet, limits: Limits) -> Self {
        Self {
            policy: Arc::new(policy),
            limits,
            timeout: None,
        }
    }

    pub fn from_config(config: &SandboxConfig) -> Self {
        Self {
            policy: Arc::new(PolicySet::standard_with_plotting(config.enable_plotting)),
            limits: config.limits,
            timeout: config.timeout(),
        }
    }

    /// Apply a wall-clock budget to every [`execute`](Self::execute).
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn policy(&self) -> &PolicySet {
        &self.policy
    }

    pub fn limits(&self) -> &Limits {
        &self.limits
    }

    /// Parse and guard a script without running it.
    pub fn check(&self, source: &str) -> Result<()> {
        let program = parse_program_with_depth(source, self.limits.max_nesting_depth)?;
        check_program(&program, &self.policy, &self.limits)
    }

    /// Run a script to completion, under the configured timeout if any.
    pub fn execute(&self, source: &str) -> ExecutionResult {
        if let Some(budget) = self.timeout {
            return self.execute_with_timeout(source, budget);
        }
        let cancel = Arc::new(AtomicBool::new(false));
        match self.spawn(source.to_string(), cancel) {
            Ok(handle) => handle.join().unwrap_or_else(|_| self.crashed()),
            Err(result) => result,
        }
    }

    /// Run a script, cancelling it once `budget` has elapsed.
    pub fn execute_with_timeout(&self, source: &str, budget: Duration) -> ExecutionResult {
        let cancel = Arc::new(AtomicBool::new(false));
        let (tx, rx) = mpsc::channel();
        let sandbox = self.clone();
        let source = source.to_string();
        let flag = cancel.clone();
        let spawned = thread::Builder::new()
            .name("sandpit-exec".to_string())
            .stack_size(INTERPRETER_STACK_SIZE)
            .spawn(move || {
                let _ = tx.send(sandbox.run(&source, flag));
            });
        if let Err(err) = spawned {
            return self.spawn_failed(&err);
        }
        match rx.recv_timeout(budget) {
            Ok(result) => result,
            Err(mpsc::RecvTimeoutError::Timeout) => {
                cancel.store(true, Ordering::Relaxed);
                warn!(?budget, "execution timed out");
                timed_out(budget)
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => self.crashed(),
        }
    }

    /// Run a script on the blocking pool, under the configured timeout if any.
    #[cfg(feature = "async")]
    pub async fn execute_async(&self, source: impl Into<String>) -> ExecutionResult {
        let sandbox = self.clone();
        let source = source.into();
        let cancel = Arc::new(AtomicBool::new(false));
        let flag = cancel.clone();
        let task = tokio::task::spawn_blocking(move || match sandbox.spawn(source, flag) {
            Ok(handle) => handle.join().unwrap_or_else(|_| sandbox.crashed()),
            Err(result) => result,
        });
        let joined = match self.timeout {
            Some(budget) => match tokio::time::timeout(budget, task).await {
                Ok(joined) => joined,
                Err(_) => {
                    cancel.store(true, Ordering::Relaxed);
                    warn!(?budget, "execution timed out");
                    return timed_out(budget);
                }
            },
            None => task.await,
        };
        joined.unwrap_or_else(|_| self.crashed())
    }

    fn spawn(
        &self,
        source: String,
        cancel: Arc<AtomicBool>,
    ) -> std::result::Result<thread::JoinHandle<ExecutionResult>, ExecutionResult> {
        let sandbox = self.clone();
        thread::Builder::new()
            .name("sandpit-exec".to_string())
            .stack_size(INTERPRETER_STACK_SIZE)
            .spawn(move || sandbox.run(&source, cancel))
            .map_err(|err| self.spawn_failed(&err))
    }

    /// Parse, guard and interpret on the current thread.
    fn run(&self, source: &str, cancel: Arc<AtomicBool>) -> ExecutionResult {
        let max_message = self.limits.max_message_length;
        let program = match self.prepare(source) {
            Ok(program) => program,
            Err(err) => {
                if matches!(err, SandboxError::Policy(_)) {
                    warn!(error = %err, "script rejected by guard");
                }
                return ExecutionResult::from_error(&err, String::new(), max_message);
            }
        };

        let state = ExecutionState::new(self.limits, cancel);
        let mut interpreter = Interpreter::new(&self.policy, state);
        let outcome = interpreter.run(&program);
        let state = interpreter.into_state();
        let operations = state.operations();
        let (text, images, truncated) = state.output.into_parts();

        match outcome {
            Ok(()) => {
                debug!(operations, images = images.len(), truncated, "execution succeeded");
                ExecutionResult::success(text, images, truncated)
            }
            Err(err) => {
                match &err {
                    SandboxError::Policy(_) => warn!(error = %err, "policy violation at runtime"),
                    _ => debug!(operations, error = %err, "execution failed"),
                }
                ExecutionResult::from_error(&err, text, max_message)
            }
        }
    }

    fn prepare(&self, source: &str) -> Result<Program> {
        let program = parse_program_with_depth(source, self.limits.max_nesting_depth)?;
        check_program(&program, &self.policy, &self.limits)?;
        Ok(program)
    }

    fn crashed(&self) -> ExecutionResult {
        warn!("interpreter thread panicked");
        let err = SandboxError::runtime(ExceptionKind::RuntimeError, "internal interpreter error");
        ExecutionResult::from_error(&err, String::new(), self.limits.max_message_length)
    }

    fn spawn_failed(&self, err: &std::io::Error) -> ExecutionResult {
        warn!(error = %err, "could not start interpreter thread");
        let err = SandboxError::runtime(ExceptionKind::RuntimeError, "could not start execution");
        ExecutionResult::from_error(&err, String::new(), self.limits.max_message_length)
    }
}

fn timed_out(budget: Duration) -> ExecutionResult {
    ExecutionResult::failure(
        FailureKind::OperationLimitExceeded,
        format!("execution timed out after {:?}", budget),
        String::new(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn sandbox() -> Sandbox {
        Sandbox::new(PolicySet::standard(), Limits::default().with_max_operations(100_000))
    }

    #[test]
    fn test_print_sum() {
        let result = sandbox().execute("print(1+1)");
        assert_eq!(result, ExecutionResult::success("2\n".to_string(), Vec::new(), false));
    }

    #[test]
    fn test_syntax_error_is_runtime_failure() {
        let result = sandbox().execute("def f(:\n    pass");
        assert_eq!(result.failure_kind(), Some(FailureKind::RuntimeError));
        let ExecutionResult::Failure { message, .. } = result else {
            panic!("expected failure");
        };
        assert!(message.starts_with("SyntaxError"), "{}", message);
    }

    #[test]
    fn test_check_does_not_run() {
        let sandbox = sandbox();
        assert!(sandbox.check("print('hi')").is_ok());
        let err = sandbox.check("import os").unwrap_err();
        assert_eq!(err.to_string(), "import of module 'os' is not permitted");
    }

    #[test]
    fn test_timeout_cancels_runaway_loop() {
        let sandbox = Sandbox::new(
            PolicySet::standard(),
            Limits::default()
                .with_max_operations(u64::MAX)
                .with_max_loop_iterations(u64::MAX),
        );
        let result = sandbox.execute_with_timeout("while True:\n    pass", Duration::from_millis(100));
        assert_eq!(result.failure_kind(), Some(FailureKind::OperationLimitExceeded));
        let ExecutionResult::Failure { message, .. } = result else {
            panic!("expected failure");
        };
        assert!(message.starts_with("execution timed out after"), "{}", message);
    }

    #[test]
    fn test_from_config_honours_plotting_flag() {
        let config = SandboxConfig {
            enable_plotting: false,
            ..SandboxConfig::default()
        };
        let sandbox = Sandbox::from_config(&config);
        let result = sandbox.execute("import matplotlib.pyplot as plt");
        assert_eq!(result.failure_kind(), Some(FailureKind::PolicyViolation));
    }
}
