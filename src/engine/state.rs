//! Per-execution state
//!
//! Owns every counter and buffer of a single execution. Nothing in here is
//! shared: a fresh `ExecutionState` is created for each run and dropped when
//! it ends.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::config::Limits;
use crate::error::{ExceptionKind, Result, SandboxError};
use crate::output::collector::OutputCollector;
use crate::parser::ast::LoopSite;
use crate::plot::FigureRegistry;

#[derive(Debug)]
pub struct ExecutionState {
    limits: Limits,
    operations: u64,
    iterations: HashMap<u32, u64>,
    call_depth: usize,
    cancel: Arc<AtomicBool>,
    started: Instant,
    pub output: OutputCollector,
    pub rng: StdRng,
    pub figures: FigureRegistry,
}

impl ExecutionState {
    pub fn new(limits: Limits, cancel: Arc<AtomicBool>) -> Self {
        Self {
            limits,
            operations: 0,
            iterations: HashMap::new(),
            call_depth: 0,
            cancel,
            started: Instant::now(),
            output: OutputCollector::new(limits.max_output_length),
            rng: StdRng::from_entropy(),
            figures: FigureRegistry::new(),
        }
    }

    pub fn limits(&self) -> &Limits {
        &self.limits
    }

    pub fn operations(&self) -> u64 {
        self.operations
    }

    /// Count one operation. Also the cancellation poll point.
    pub fn tick(&mut self) -> Result<()> {
        if self.cancel.load(Ordering::Relaxed) {
            return Err(SandboxError::Cancelled);
        }
        self.operations += 1;
        if self.operations > self.limits.max_operations {
            return Err(SandboxError::OperationLimit {
                limit: self.limits.max_operations,
            });
        }
        Ok(())
    }

    /// Count one iteration of the loop at `site`.
    pub fn enter_iteration(&mut self, site: LoopSite) -> Result<()> {
        let count = self.iterations.entry(site.id).or_insert(0);
        *count += 1;
        if *count > self.limits.max_loop_iterations {
            return Err(SandboxError::IterationLimit {
                limit: self.limits.max_loop_iterations,
                line: Some(site.line),
            });
        }
        Ok(())
    }

    pub fn iteration_count(&self, site_id: u32) -> u64 {
        self.iterations.get(&site_id).copied().unwrap_or(0)
    }

    pub fn enter_call(&mut self) -> Result<()> {
        if self.call_depth >= self.limits.max_call_depth {
            return Err(SandboxError::runtime(
                ExceptionKind::RecursionError,
                "maximum recursion depth exceeded",
            ));
        }
        self.call_depth += 1;
        Ok(())
    }

    pub fn exit_call(&mut self) {
        self.call_depth = self.call_depth.saturating_sub(1);
    }

    /// Refuse to build a container or string longer than the limit.
    pub fn check_sequence_len(&self, len: usize) -> Result<()> {
        if len > self.limits.max_sequence_length {
            return Err(SandboxError::runtime(
                ExceptionKind::MemoryError,
                format!(
                    "sequence of length {} exceeds the maximum of {}",
                    len, self.limits.max_sequence_length
                ),
            ));
        }
        Ok(())
    }

    pub fn reseed(&mut self, seed: u64) {
        self.rng = StdRng::seed_from_u64(seed);
    }

    /// Seconds since the execution started.
    pub fn elapsed(&self) -> f64 {
        self.started.elapsed().as_secs_f64()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(limits: Limits) -> ExecutionState {
        ExecutionState::new(limits, Arc::new(AtomicBool::new(false)))
    }

    #[test]
    fn test_operation_limit() {
        let mut state = state(Limits::default().with_max_operations(3));
        for _ in 0..3 {
            state.tick().unwrap();
        }
        assert_eq!(state.tick(), Err(SandboxError::OperationLimit { limit: 3 }));
    }

    #[test]
    fn test_iteration_limit_is_per_site() {
        let mut state = state(Limits::default().with_max_loop_iterations(2));
        let a = LoopSite { id: 0, line: 1 };
        let b = LoopSite { id: 1, line: 5 };
        state.enter_iteration(a).unwrap();
        state.enter_iteration(a).unwrap();
        state.enter_iteration(b).unwrap();
        assert_eq!(
            state.enter_iteration(a),
            Err(SandboxError::IterationLimit {
                limit: 2,
                line: Some(1)
            })
        );
        assert_eq!(state.iteration_count(1), 1);
    }

    #[test]
    fn test_cancellation_is_observed_on_tick() {
        let cancel = Arc::new(AtomicBool::new(false));
        let mut state = ExecutionState::new(Limits::default(), cancel.clone());
        state.tick().unwrap();
        cancel.store(true, Ordering::Relaxed);
        assert_eq!(state.tick(), Err(SandboxError::Cancelled));
    }

    #[test]
    fn test_call_depth() {
        let mut state = state(Limits::default().with_max_call_depth(1));
        state.enter_call().unwrap();
        assert!(state.enter_call().is_err());
        state.exit_call();
        state.enter_call().unwrap();
    }
}
