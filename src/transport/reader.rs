//! Background response reader
//!
//! One thread per connection drains the read side of the channel and pushes
//! every non-empty chunk into the response queue.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};

use crate::config::SessionConfig;
use crate::error::{PubliCastError, Result};
use crate::logging::SharedSink;
use crate::transport::channel::{Channel, ReadOutcome};

/// Tuning of the reader loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReaderOptions {
    /// Maximum bytes per read
    pub chunk_size: usize,
    /// Sleep after a read that returned nothing
    pub idle: Duration,
    /// How long `stop` waits for the thread
    pub join_timeout: Duration,
}

impl Default for ReaderOptions {
    fn default() -> Self {
        Self::from(&SessionConfig::default())
    }
}

impl From<&SessionConfig> for ReaderOptions {
    fn from(config: &SessionConfig) -> Self {
        Self {
            chunk_size: config.read_chunk_size.max(1),
            idle: config.reader_idle(),
            join_timeout: config.reader_join_timeout(),
        }
    }
}

/// Handle to a running reader thread
pub struct ResponseReader {
    running: Arc<AtomicBool>,
    handle: Mutex<Option<JoinHandle<()>>>,
    done_rx: Receiver<()>,
    join_timeout: Duration,
    sink: SharedSink,
}

impl ResponseReader {
    /// Spawn the reader for `channel`, feeding `queue`
    pub fn start(
        channel: Arc<dyn Channel>,
        queue: Sender<String>,
        options: ReaderOptions,
        sink: SharedSink,
    ) -> Result<Self> {
        let running = Arc::new(AtomicBool::new(true));
        let (done_tx, done_rx) = bounded(1);

        let thread_running = running.clone();
        let thread_sink = sink.clone();
        let handle = thread::Builder::new()
            .name("publicast-reader".to_string())
            .spawn(move || {
                read_loop(&*channel, &queue, &thread_running, options, &thread_sink);
                thread_running.store(false, Ordering::Release);
                let _ = done_tx.send(());
            })
            .map_err(PubliCastError::Io)?;

        Ok(Self {
            running,
            handle: Mutex::new(Some(handle)),
            done_rx,
            join_timeout: options.join_timeout,
            sink,
        })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Ask the loop to finish and wait up to the join timeout
    ///
    /// Returns `true` if the thread has exited. Once this returns nothing
    /// more is enqueued except, at most, the chunk of a read that was
    /// already in flight and is dropped by the loop's running check. Safe to
    /// call from any thread and more than once.
    pub fn stop(&self) -> bool {
        self.running.store(false, Ordering::Release);

        let handle = match self.handle.lock() {
            Ok(mut handle) => handle.take(),
            Err(_) => None,
        };
        let Some(handle) = handle else {
            return true;
        };

        match self.done_rx.recv_timeout(self.join_timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if handle.join().is_err() {
                    self.sink.error("Response reader thread panicked");
                }
                true
            }
            Err(RecvTimeoutError::Timeout) => {
                self.sink.warning(&format!(
                    "Response reader did not stop within {} ms; detaching it",
                    self.join_timeout.as_millis()
                ));
                false
            }
        }
    }
}

impl Drop for ResponseReader {
    fn drop(&mut self) {
        self.stop();
    }
}

fn read_loop(
    channel: &dyn Channel,
    queue: &Sender<String>,
    running: &AtomicBool,
    options: ReaderOptions,
    sink: &SharedSink,
) {
    let mut buf = vec![0u8; options.chunk_size.max(1)];

    while running.load(Ordering::Acquire) {
        match channel.read_chunk(&mut buf) {
            ReadOutcome::Data(n) => {
                let text = String::from_utf8_lossy(&buf[..n]);
                let response = text.trim();
                if response.is_empty() {
                    continue;
                }
                if !running.load(Ordering::Acquire) {
                    break;
                }
                sink.debug(&format!("Received: {}", response));
                if queue.send(response.to_string()).is_err() {
                    // Nobody is listening any more
                    break;
                }
            }
            ReadOutcome::Idle => thread::sleep(options.idle),
            ReadOutcome::Closed => break,
            ReadOutcome::Failed(e) => {
                if !channel.is_open() || !running.load(Ordering::Acquire) {
                    break;
                }
                sink.error(&format!(
                    "Error reading from {}: {}",
                    channel.describe(),
                    e
                ));
                thread::sleep(options.idle);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::MemorySink;
    use crate::transport::channel::MemoryChannel;
    use crossbeam_channel::unbounded;
    use std::io;
    use std::sync::atomic::AtomicUsize;
    use std::time::Instant;

    fn options() -> ReaderOptions {
        ReaderOptions {
            chunk_size: 4096,
            idle: Duration::from_millis(2),
            join_timeout: Duration::from_secs(1),
        }
    }

    #[test]
    fn test_enqueues_trimmed_chunks_in_order() {
        let channel = Arc::new(MemoryChannel::new());
        channel.push_response("  first\n");
        channel.push_response("\n\n");
        channel.push_response("second\r\n");

        let (tx, rx) = unbounded();
        let reader =
            ResponseReader::start(channel.clone(), tx, options(), Arc::new(MemorySink::new())).unwrap();

        assert_eq!(rx.recv_timeout(Duration::from_secs(1)).unwrap(), "first");
        assert_eq!(rx.recv_timeout(Duration::from_secs(1)).unwrap(), "second");
        assert!(reader.stop());
    }

    #[test]
    fn test_exits_silently_when_channel_closes() {
        let channel = Arc::new(MemoryChannel::new());
        let sink = Arc::new(MemorySink::new());
        let (tx, rx) = unbounded();
        let reader = ResponseReader::start(channel.clone(), tx, options(), sink.clone()).unwrap();

        channel.hang_up();
        // The sender is dropped when the loop ends
        assert!(matches!(
            rx.recv_timeout(Duration::from_secs(1)),
            Err(RecvTimeoutError::Disconnected)
        ));
        assert!(!reader.is_running());
        assert!(sink.messages_at(crate::logging::LogLevel::Error).is_empty());
    }

    #[test]
    fn test_stop_is_prompt_and_idempotent() {
        let channel = Arc::new(MemoryChannel::new());
        let (tx, _rx) = unbounded();
        let reader =
            ResponseReader::start(channel, tx, options(), Arc::new(MemorySink::new())).unwrap();

        let start = Instant::now();
        assert!(reader.stop());
        assert!(reader.stop());
        assert!(start.elapsed() < Duration::from_millis(500));
    }

    #[test]
    fn test_nothing_enqueued_after_stop() {
        let channel = Arc::new(MemoryChannel::new());
        let (tx, rx) = unbounded();
        let reader =
            ResponseReader::start(channel.clone(), tx, options(), Arc::new(MemorySink::new())).unwrap();
        reader.stop();

        channel.push_response("late");
        std::thread::sleep(Duration::from_millis(20));
        assert!(rx.try_recv().is_err());
    }

    /// Fails a fixed number of reads, then answers once
    struct FlakyChannel {
        failures: AtomicUsize,
        answered: AtomicBool,
    }

    impl Channel for FlakyChannel {
        fn write_line(&self, _line: &str) -> Result<()> {
            Ok(())
        }

        fn read_chunk(&self, buf: &mut [u8]) -> ReadOutcome {
            if self.failures.load(Ordering::SeqCst) > 0 {
                self.failures.fetch_sub(1, Ordering::SeqCst);
                return ReadOutcome::Failed(io::Error::new(io::ErrorKind::Other, "glitch"));
            }
            if self.answered.swap(true, Ordering::SeqCst) {
                return ReadOutcome::Idle;
            }
            buf[..2].copy_from_slice(b"OK");
            ReadOutcome::Data(2)
        }

        fn is_open(&self) -> bool {
            true
        }

        fn close(&self) {}

        fn describe(&self) -> String {
            "flaky".to_string()
        }
    }

    #[test]
    fn test_transient_errors_are_logged_and_survived() {
        let channel = Arc::new(FlakyChannel {
            failures: AtomicUsize::new(3),
            answered: AtomicBool::new(false),
        });
        let sink = Arc::new(MemorySink::new());
        let (tx, rx) = unbounded();
        let reader = ResponseReader::start(channel, tx, options(), sink.clone()).unwrap();

        assert_eq!(rx.recv_timeout(Duration::from_secs(1)).unwrap(), "OK");
        assert_eq!(sink.messages_at(crate::logging::LogLevel::Error).len(), 3);
        assert!(reader.stop());
    }
}
