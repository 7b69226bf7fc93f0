//! Traffic-counter middleware.
//!
//! Enables periodic `>BYTECOUNT:` notifications at a configured interval
//! and reports each parsed [`TrafficCounters`] to a recorder callback.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use ovpn_core::{ParseError, TrafficCounters};

use crate::middleware::{CommandWriter, Middleware, MiddlewareError};

const BYTECOUNT_PREFIX: &str = ">BYTECOUNT:";

/// Callback receiving each parsed counters record.
pub type StatsRecorder = Box<dyn Fn(TrafficCounters) + Send + Sync>;

/// Middleware reporting periodic traffic counts.
pub struct BytecountMiddleware {
    recorder: StatsRecorder,
    interval: Duration,
}

impl BytecountMiddleware {
    /// Creates the middleware; `interval` is how often the daemon should
    /// report counters (whole seconds).
    pub fn new(recorder: impl Fn(TrafficCounters) + Send + Sync + 'static, interval: Duration) -> Self {
        Self {
            recorder: Box::new(recorder),
            interval,
        }
    }
}

#[async_trait]
impl Middleware for BytecountMiddleware {
    async fn start(&self, commands: Arc<dyn CommandWriter>) -> Result<(), MiddlewareError> {
        let command = format!("bytecount {}", self.interval.as_secs());
        commands.single_line_command(&command).await?;
        Ok(())
    }

    async fn stop(&self, commands: Arc<dyn CommandWriter>) -> Result<(), MiddlewareError> {
        commands.single_line_command("bytecount 0").await?;
        Ok(())
    }

    fn consume_line(&self, line: &str) -> Result<bool, MiddlewareError> {
        let Some(body) = line.strip_prefix(BYTECOUNT_PREFIX) else {
            return Ok(false);
        };
        (self.recorder)(parse_counters(body)?);
        Ok(true)
    }
}

/// Parses `<received>,<sent>`, both base-10 unsigned integers.
fn parse_counters(body: &str) -> Result<TrafficCounters, ParseError> {
    let (received, sent) = body
        .split_once(',')
        .ok_or_else(|| ParseError::malformed("bytecount", "expected two comma-separated fields"))?;

    let bytes_received = received
        .parse::<u64>()
        .map_err(|e| ParseError::malformed("bytes received", e.to_string()))?;
    let bytes_sent = sent
        .parse::<u64>()
        .map_err(|e| ParseError::malformed("bytes sent", e.to_string()))?;

    Ok(TrafficCounters {
        bytes_received,
        bytes_sent,
    })
}
