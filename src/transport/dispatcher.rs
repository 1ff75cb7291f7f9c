//! Command dispatcher
//!
//! Writes one command, then waits for the next queued response. There is no
//! framing on the wire: the first line queued after a command is taken as
//! its response. An editor that answers with several chunks, or a response
//! that arrives after its command timed out, shifts later pairings; call
//! [`CommandDispatcher::drain_stale`] before a command whose answer matters.

use std::time::{Duration, Instant};

use crossbeam_channel::RecvTimeoutError;

use crate::error::{PubliCastError, Result};
use crate::logging::SharedSink;
use crate::transport::command::Command;
use crate::transport::connection::Connection;

/// Substrings that mark a response as a failure reported by the editor
pub const FAILURE_MARKERS: [&str; 2] = ["Error:", "FileNotFound"];

/// Upper bound on one wait on the queue
const POLL_SLICE: Duration = Duration::from_millis(100);

/// Sends commands over a connection and classifies the answers
///
/// `run_command` takes `&mut self`, so one dispatcher never has two commands
/// in flight.
pub struct CommandDispatcher {
    connection: Option<Connection>,
    timeout: Duration,
    sink: SharedSink,
}

impl CommandDispatcher {
    pub fn new(timeout: Duration, sink: SharedSink) -> Self {
        Self {
            connection: None,
            timeout,
            sink,
        }
    }

    /// Use `connection` for subsequent commands, closing any previous one
    pub fn set_connection(&mut self, connection: Connection) {
        if let Some(old) = self.connection.replace(connection) {
            old.close();
        }
    }

    pub fn connection(&self) -> Option<&Connection> {
        self.connection.as_ref()
    }

    pub fn is_connected(&self) -> bool {
        self.connection.as_ref().is_some_and(Connection::is_open)
    }

    /// Run `command` with the dispatcher's default timeout
    pub fn run_command(&mut self, command: &Command) -> Result<String> {
        self.run_command_with_timeout(command, self.timeout)
    }

    /// Send `command` and wait up to `timeout` for its response
    ///
    /// # Errors
    /// * `NotConnected` - no connection has been set
    /// * `InvalidCommand` - the command does not fit on one line
    /// * `Timeout` - nothing arrived in time; the command was still sent
    /// * `Rejected` - the editor answered with a failure marker
    /// * `ChannelClosed` - the editor closed the pipe
    pub fn run_command_with_timeout(&mut self, command: &Command, timeout: Duration) -> Result<String> {
        let result = self.exchange(command, timeout);
        match &result {
            Ok(response) => self
                .sink
                .info(&format!("Command '{}' -> {}", command, response)),
            Err(e) => self
                .sink
                .error(&format!("Command '{}' failed [{}]: {}", command, e.error_code(), e)),
        }
        result
    }

    fn exchange(&self, command: &Command, timeout: Duration) -> Result<String> {
        let connection = self
            .connection
            .as_ref()
            .ok_or_else(|| PubliCastError::NotConnected {
                command: command.to_string(),
            })?;
        let line = command.to_line()?;

        self.sink.info(&format!("Executing command: {}", line));
        connection.send(&line)?;

        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(PubliCastError::Timeout {
                    command: line,
                    timeout_ms: timeout.as_millis() as u64,
                });
            }

            match connection.recv_timeout(remaining.min(POLL_SLICE)) {
                Ok(response) => return classify(line, response),
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => return Err(PubliCastError::ChannelClosed),
            }
        }
    }

    /// Discard responses left over from earlier commands
    pub fn drain_stale(&mut self) -> Vec<String> {
        let stale = self
            .connection
            .as_ref()
            .map(Connection::drain)
            .unwrap_or_default();
        if !stale.is_empty() {
            self.sink.warning(&format!(
                "Discarded {} stale response(s): {}",
                stale.len(),
                stale.join(" | ")
            ));
        }
        stale
    }

    /// Close the connection, if any
    pub fn close(&mut self) {
        if let Some(connection) = self.connection.take() {
            connection.close();
        }
    }
}

fn classify(command: String, response: String) -> Result<String> {
    if FAILURE_MARKERS.iter().any(|m| response.contains(m)) {
        Err(PubliCastError::Rejected { command, response })
    } else {
        Ok(response)
    }
}
