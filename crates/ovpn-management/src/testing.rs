//! In-process command-writer stub for middleware unit tests.

use std::sync::Mutex;

use async_trait::async_trait;

use crate::channel::CommandError;
use crate::middleware::CommandWriter;

/// Records every issued command and replies with canned responses.
#[derive(Default)]
pub(crate) struct MockCommandWriter {
    /// Commands in issue order.
    pub written: Mutex<Vec<String>>,

    /// Payload returned by `single_line_command`.
    pub single_response: String,

    /// Lines returned by `multi_line_command`.
    pub multi_response: Vec<String>,
}

impl MockCommandWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_multi_response(lines: &[&str]) -> Self {
        Self {
            multi_response: lines.iter().map(|l| l.to_string()).collect(),
            ..Self::default()
        }
    }

    pub fn last_command(&self) -> Option<String> {
        self.written
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .last()
            .cloned()
    }

    pub fn command_count(&self) -> usize {
        self.written
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }
}

#[async_trait]
impl CommandWriter for MockCommandWriter {
    async fn single_line_command(&self, command: &str) -> Result<String, CommandError> {
        self.written
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(command.to_string());
        Ok(self.single_response.clone())
    }

    async fn multi_line_command(&self, command: &str) -> Result<Vec<String>, CommandError> {
        self.written
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(command.to_string());
        Ok(self.multi_response.clone())
    }
}
