//! Scripted fake executor for tests
//!
//! Records every script it receives and replays queued responses in order,
//! falling back to a default value when the queue runs dry. Dispatch, bridge
//! and cache tests all run against this; nothing in the test suite shells
//! out to a real host.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use super::{Executor, ScriptError};

pub struct MockExecutor {
    responses: Mutex<VecDeque<Result<Value, ScriptError>>>,
    default: Value,
    scripts: Mutex<Vec<String>>,
}

impl MockExecutor {
    pub fn new() -> Self {
        Self {
            responses: Mutex::new(VecDeque::new()),
            default: Value::Null,
            scripts: Mutex::new(Vec::new()),
        }
    }

    /// Set the value returned once the queued responses are exhausted
    pub fn with_default(mut self, value: Value) -> Self {
        self.default = value;
        self
    }

    /// Queue a successful response
    pub fn push_ok(&self, value: Value) {
        self.responses.lock().unwrap().push_back(Ok(value));
    }

    /// Queue a failure
    pub fn push_err(&self, err: ScriptError) {
        self.responses.lock().unwrap().push_back(Err(err));
    }

    /// Every script executed so far, in order
    pub fn scripts(&self) -> Vec<String> {
        self.scripts.lock().unwrap().clone()
    }

    /// The most recent script, if any
    pub fn last_script(&self) -> Option<String> {
        self.scripts.lock().unwrap().last().cloned()
    }

    pub fn call_count(&self) -> usize {
        self.scripts.lock().unwrap().len()
    }
}

impl Default for MockExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Executor for MockExecutor {
    async fn run(&self, script: &str, _timeout: Option<Duration>) -> Result<Value, ScriptError> {
        self.scripts.lock().unwrap().push(script.to_string());
        match self.responses.lock().unwrap().pop_front() {
            Some(result) => result,
            None => Ok(self.default.clone()),
        }
    }
}
