//! Scripted command runner
//!
//! Answers commands from a list of substring rules and records every call,
//! so tests can assert on exactly what would have been executed.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

use vlan_tag_common::{CommandRunner, ExecResult, VlanTagResult};

#[derive(Debug, Clone)]
struct Rule {
    pattern: String,
    result: ExecResult,
}

/// Command runner that replays scripted results and records calls
#[derive(Debug, Clone, Default)]
pub struct RecordingRunner {
    rules: Arc<Mutex<Vec<Rule>>>,
    log: Arc<Mutex<Vec<String>>>,
    delay: Option<Duration>,
}

impl RecordingRunner {
    /// Create a runner where every command succeeds with empty output
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep for `delay` inside every call, after recording it
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Answer every command containing `pattern` with `result`
    pub fn respond(&self, pattern: impl Into<String>, result: ExecResult) -> &Self {
        self.rules.lock().push(Rule {
            pattern: pattern.into(),
            result,
        });
        self
    }

    /// All commands received so far, in call order
    pub fn commands(&self) -> Vec<String> {
        self.log.lock().clone()
    }

    fn answer(&self, cmd: &str) -> ExecResult {
        // First matching rule wins.
        self.rules
            .lock()
            .iter()
            .find(|r| cmd.contains(&r.pattern))
            .map(|r| r.result.clone())
            .unwrap_or_else(|| ExecResult::ok(""))
    }
}

#[async_trait]
impl CommandRunner for RecordingRunner {
    async fn run(&self, cmd: &str) -> VlanTagResult<ExecResult> {
        self.log.lock().push(cmd.to_string());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        Ok(self.answer(cmd))
    }
}
