//! An open channel together with its reader and response queue

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError};

use crate::error::Result;
use crate::logging::SharedSink;
use crate::transport::channel::Channel;
use crate::transport::reader::{ReaderOptions, ResponseReader};

/// Owns one channel for its whole lifetime
///
/// Closing stops the reader first and only then releases the channel's
/// handles, so the reader never touches a released handle.
pub struct Connection {
    channel: Arc<dyn Channel>,
    reader: ResponseReader,
    responses: Receiver<String>,
    closed: AtomicBool,
    sink: SharedSink,
}

impl Connection {
    /// Start a reader on an already open channel
    pub fn start(channel: Arc<dyn Channel>, options: ReaderOptions, sink: SharedSink) -> Result<Self> {
        let (tx, rx) = unbounded();
        let reader = match ResponseReader::start(channel.clone(), tx, options, sink.clone()) {
            Ok(reader) => reader,
            Err(e) => {
                channel.close();
                return Err(e);
            }
        };
        sink.info(&format!("Connected to {}", channel.describe()));

        Ok(Self {
            channel,
            reader,
            responses: rx,
            closed: AtomicBool::new(false),
            sink,
        })
    }

    pub fn describe(&self) -> String {
        self.channel.describe()
    }

    pub fn is_open(&self) -> bool {
        !self.closed.load(Ordering::Acquire) && self.channel.is_open()
    }

    pub fn send(&self, line: &str) -> Result<()> {
        self.channel.write_line(line)
    }

    pub fn recv_timeout(&self, timeout: Duration) -> std::result::Result<String, RecvTimeoutError> {
        self.responses.recv_timeout(timeout)
    }

    /// Everything currently queued, oldest first
    pub fn drain(&self) -> Vec<String> {
        self.responses.try_iter().collect()
    }

    /// Stop the reader, then close the channel; later calls do nothing
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.reader.stop();
        self.channel.close();
        self.sink.info(&format!("Closed {}", self.channel.describe()));
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.close();
    }
}
