//! Shared helpers for scenario tests: a scripted scheduler and a sandbox
//! working directory.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::path::Path;

use htcondor_client::{Result, SchedulerExec};
use rstest::fixture;
use tempfile::TempDir;

/// A scheduler whose textual responses are scripted in advance. Records
/// every invocation for later assertions.
pub struct FakeScheduler {
    responses: RefCell<VecDeque<(String, String)>>,
    pub calls: RefCell<Vec<Vec<String>>>,
}

impl FakeScheduler {
    pub fn new(responses: &[(&str, &str)]) -> Self {
        Self {
            responses: RefCell::new(
                responses
                    .iter()
                    .map(|(out, err)| (out.to_string(), err.to_string()))
                    .collect(),
            ),
            calls: RefCell::new(Vec::new()),
        }
    }

    /// The recorded argv of call number `index`.
    pub fn call(&self, index: usize) -> Vec<String> {
        self.calls.borrow()[index].clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.borrow().len()
    }
}

impl SchedulerExec for FakeScheduler {
    fn execute(&self, args: &[String], _cwd: &Path) -> Result<(String, String)> {
        self.calls.borrow_mut().push(args.to_vec());
        Ok(self
            .responses
            .borrow_mut()
            .pop_front()
            .unwrap_or_default())
    }
}

/// A throwaway working directory for file-writing scenarios.
#[fixture]
pub fn sandbox() -> TempDir {
    let _ = env_logger::builder().is_test(true).try_init();
    tempfile::tempdir().expect("failed to create sandbox directory")
}
