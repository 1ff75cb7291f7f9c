//! Transport channels
//!
//! A channel is the write side and read side of one endpoint pair. Pipe
//! handles are owned exclusively by the channel; callers only see
//! `write_line` / `read_chunk`.

use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use rand::Rng;

use crate::config::Eol;
use crate::error::{PubliCastError, Result};
use crate::transport::endpoint::EndpointPair;

/// Windows `ERROR_BROKEN_PIPE`
const ERROR_BROKEN_PIPE: i32 = 109;

/// Result of one bounded read
#[derive(Debug)]
pub enum ReadOutcome {
    /// `n` bytes were placed at the start of the buffer
    Data(usize),
    /// Nothing available yet
    Idle,
    /// The other side went away or the channel was closed
    Closed,
    /// Any other I/O error
    Failed(io::Error),
}

/// A bidirectional line-oriented link to the editor
pub trait Channel: Send + Sync {
    /// Send one line followed by the EOL marker, flushed before returning
    fn write_line(&self, line: &str) -> Result<()>;

    /// Read whatever is available, up to `buf.len()` bytes
    fn read_chunk(&self, buf: &mut [u8]) -> ReadOutcome;

    fn is_open(&self) -> bool;

    /// Release the handles; safe to call repeatedly
    fn close(&self);

    /// Human-readable endpoint description for logs
    fn describe(&self) -> String;
}

/// Opens channels for endpoint pairs
pub trait ChannelFactory: Send + Sync {
    fn open(&self, pair: &EndpointPair) -> Result<Arc<dyn Channel>>;
}

// ============================================================================
// Named pipes
// ============================================================================

/// Channel backed by the two OS named pipes of an endpoint pair
#[derive(Debug)]
pub struct PipeChannel {
    pair: EndpointPair,
    eol: Eol,
    writer: Mutex<Option<File>>,
    reader: Mutex<Option<File>>,
    closed: AtomicBool,
    writer_seen: AtomicBool,
}

impl PipeChannel {
    /// Open the write side, then the read side
    ///
    /// If the read side fails the write handle is released before the error
    /// is returned; no handle outlives a failed open.
    pub fn open(pair: &EndpointPair, eol: Eol) -> Result<Self> {
        let writer = open_write_side(&pair.write_path).map_err(|e| connect_error(pair, &pair.write_path, e))?;
        let reader = match open_read_side(&pair.read_path) {
            Ok(reader) => reader,
            Err(e) => {
                drop(writer);
                return Err(connect_error(pair, &pair.read_path, e));
            }
        };

        Ok(Self {
            pair: pair.clone(),
            eol,
            writer: Mutex::new(Some(writer)),
            reader: Mutex::new(Some(reader)),
            closed: AtomicBool::new(false),
            writer_seen: AtomicBool::new(false),
        })
    }

    pub fn pair(&self) -> &EndpointPair {
        &self.pair
    }

    fn write_error(&self, e: io::Error) -> PubliCastError {
        if is_broken_pipe(&e) {
            PubliCastError::ChannelClosed
        } else {
            PubliCastError::IoFailure {
                endpoint: self.pair.write_path.display().to_string(),
                source: e,
            }
        }
    }
}

fn connect_error(pair: &EndpointPair, path: &Path, e: io::Error) -> PubliCastError {
    PubliCastError::ConnectFailed {
        reason: format!("cannot open {}: {}", path.display(), e),
        tried: pair.names().to_vec(),
        visible: Vec::new(),
    }
}

fn is_broken_pipe(e: &io::Error) -> bool {
    e.kind() == io::ErrorKind::BrokenPipe || e.raw_os_error() == Some(ERROR_BROKEN_PIPE)
}

#[cfg(unix)]
fn open_write_side(path: &Path) -> io::Result<File> {
    use std::os::unix::fs::OpenOptionsExt;
    use std::os::unix::io::AsRawFd;

    // Non-blocking open fails with ENXIO instead of hanging when nobody
    // reads the pipe yet.
    let file = OpenOptions::new()
        .write(true)
        .custom_flags(libc::O_NONBLOCK)
        .open(path)?;

    // Writes go back to blocking so every command is sent in full.
    let fd = file.as_raw_fd();
    // SAFETY: fd is a valid descriptor owned by `file` for this whole block
    unsafe {
        let flags = libc::fcntl(fd, libc::F_GETFL);
        if flags < 0 || libc::fcntl(fd, libc::F_SETFL, flags & !libc::O_NONBLOCK) < 0 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(file)
}

#[cfg(unix)]
fn open_read_side(path: &Path) -> io::Result<File> {
    use std::os::unix::fs::OpenOptionsExt;

    OpenOptions::new()
        .read(true)
        .custom_flags(libc::O_NONBLOCK)
        .open(path)
}

#[cfg(not(unix))]
fn open_write_side(path: &Path) -> io::Result<File> {
    OpenOptions::new().write(true).open(path)
}

#[cfg(not(unix))]
fn open_read_side(path: &Path) -> io::Result<File> {
    OpenOptions::new().read(true).open(path)
}

impl Channel for PipeChannel {
    fn write_line(&self, line: &str) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(PubliCastError::ChannelClosed);
        }
        let mut guard = self
            .writer
            .lock()
            .map_err(|_| PubliCastError::ChannelClosed)?;
        let writer = guard.as_mut().ok_or(PubliCastError::ChannelClosed)?;

        let mut bytes = Vec::with_capacity(line.len() + 3);
        bytes.extend_from_slice(line.as_bytes());
        bytes.extend_from_slice(self.eol.as_bytes());

        writer.write_all(&bytes).map_err(|e| self.write_error(e))?;
        writer.flush().map_err(|e| self.write_error(e))?;
        Ok(())
    }

    fn read_chunk(&self, buf: &mut [u8]) -> ReadOutcome {
        let mut guard = match self.reader.lock() {
            Ok(guard) => guard,
            Err(_) => return ReadOutcome::Closed,
        };
        if self.closed.load(Ordering::Acquire) {
            // close() could not take the lock while a read was in flight
            guard.take();
            return ReadOutcome::Closed;
        }
        let Some(reader) = guard.as_mut() else {
            return ReadOutcome::Closed;
        };

        match reader.read(buf) {
            Ok(0) => {
                // A FIFO reports EOF both before the editor opens its end and
                // after it has gone; only the latter means closed.
                if self.writer_seen.load(Ordering::Acquire) {
                    ReadOutcome::Closed
                } else {
                    ReadOutcome::Idle
                }
            }
            Ok(n) => {
                self.writer_seen.store(true, Ordering::Release);
                ReadOutcome::Data(n)
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                self.writer_seen.store(true, Ordering::Release);
                ReadOutcome::Idle
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => ReadOutcome::Idle,
            Err(e) if is_broken_pipe(&e) => ReadOutcome::Closed,
            Err(e) => ReadOutcome::Failed(e),
        }
    }

    fn is_open(&self) -> bool {
        !self.closed.load(Ordering::Acquire)
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Ok(mut writer) = self.writer.lock() {
            writer.take();
        }
        // A blocked read holds the reader lock; it drops the handle itself
        // on its next call.
        if let Ok(mut reader) = self.reader.try_lock() {
            reader.take();
        }
    }

    fn describe(&self) -> String {
        self.pair.to_string()
    }
}

impl Drop for PipeChannel {
    fn drop(&mut self) {
        self.close();
    }
}

/// Opens [`PipeChannel`]s with a fixed EOL marker
#[derive(Debug, Clone, Copy)]
pub struct PipeChannelFactory {
    pub eol: Eol,
}

impl PipeChannelFactory {
    pub fn new(eol: Eol) -> Self {
        Self { eol }
    }
}

impl ChannelFactory for PipeChannelFactory {
    fn open(&self, pair: &EndpointPair) -> Result<Arc<dyn Channel>> {
        Ok(Arc::new(PipeChannel::open(pair, self.eol)?))
    }
}

// ============================================================================
// In-memory channel
// ============================================================================

type Responder = Box<dyn FnMut(&str) -> Vec<String> + Send>;

#[derive(Default)]
struct MemoryState {
    written: Vec<String>,
    pending: VecDeque<(Instant, Vec<u8>)>,
    hung_up: bool,
    closed: bool,
}

/// Scripted stand-in for the editor
///
/// Every written line is recorded and handed to a responder whose replies
/// become readable after the configured delay plus jitter. Replies are
/// delivered in the order they were produced, one reply per read.
pub struct MemoryChannel {
    state: Mutex<MemoryState>,
    responder: Mutex<Option<Responder>>,
    delay: Duration,
    jitter: Duration,
}

impl std::fmt::Debug for MemoryChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryChannel")
            .field("delay", &self.delay)
            .field("jitter", &self.jitter)
            .finish_non_exhaustive()
    }
}

impl Default for MemoryChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryChannel {
    /// A channel that never answers
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MemoryState::default()),
            responder: Mutex::new(None),
            delay: Duration::ZERO,
            jitter: Duration::ZERO,
        }
    }

    /// A channel that answers every line through `responder`
    pub fn with_responder<F>(responder: F) -> Self
    where
        F: FnMut(&str) -> Vec<String> + Send + 'static,
    {
        let channel = Self::new();
        if let Ok(mut slot) = channel.responder.lock() {
            *slot = Some(Box::new(responder));
        }
        channel
    }

    /// Answers every line with `BatchCommand finished: OK`
    pub fn ok_responder() -> Self {
        Self::with_responder(|_| vec!["BatchCommand finished: OK".to_string()])
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_jitter(mut self, jitter: Duration) -> Self {
        self.jitter = jitter;
        self
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        match self.state.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn due_time(&self) -> Instant {
        let jitter_ms = self.jitter.as_millis() as u64;
        let extra = if jitter_ms > 0 {
            rand::thread_rng().gen_range(0..=jitter_ms)
        } else {
            0
        };
        Instant::now() + self.delay + Duration::from_millis(extra)
    }

    /// Queue a line the editor sends unprompted
    pub fn push_response(&self, text: &str) {
        let due = self.due_time();
        self.lock_state().pending.push_back((due, text.as_bytes().to_vec()));
    }

    /// Lines written so far, without EOL
    pub fn written(&self) -> Vec<String> {
        self.lock_state().written.clone()
    }

    /// Simulate the editor closing its end; queued replies still drain
    pub fn hang_up(&self) {
        self.lock_state().hung_up = true;
    }
}

impl Channel for MemoryChannel {
    fn write_line(&self, line: &str) -> Result<()> {
        {
            let mut state = self.lock_state();
            if state.closed || state.hung_up {
                return Err(PubliCastError::ChannelClosed);
            }
            state.written.push(line.to_string());
        }

        let replies = match self.responder.lock() {
            Ok(mut responder) => responder.as_mut().map(|r| r(line)).unwrap_or_default(),
            Err(_) => Vec::new(),
        };
        for reply in replies {
            self.push_response(&reply);
        }
        Ok(())
    }

    fn read_chunk(&self, buf: &mut [u8]) -> ReadOutcome {
        let mut state = self.lock_state();
        if state.closed {
            return ReadOutcome::Closed;
        }

        let due = match state.pending.front() {
            Some((due, _)) => *due,
            None if state.hung_up => return ReadOutcome::Closed,
            None => return ReadOutcome::Idle,
        };
        // Keep FIFO order: a late head holds back everything behind it.
        if due > Instant::now() {
            return ReadOutcome::Idle;
        }

        let Some((due, mut bytes)) = state.pending.pop_front() else {
            return ReadOutcome::Idle;
        };
        let n = bytes.len().min(buf.len());
        buf[..n].copy_from_slice(&bytes[..n]);
        if n < bytes.len() {
            let rest = bytes.split_off(n);
            state.pending.push_front((due, rest));
        }
        ReadOutcome::Data(n)
    }

    fn is_open(&self) -> bool {
        !self.lock_state().closed
    }

    fn close(&self) {
        self.lock_state().closed = true;
    }

    fn describe(&self) -> String {
        "in-memory channel".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::fs;
    use tempfile::tempdir;

    fn read_text(channel: &dyn Channel) -> Option<String> {
        let mut buf = [0u8; 64];
        match channel.read_chunk(&mut buf) {
            ReadOutcome::Data(n) => Some(String::from_utf8_lossy(&buf[..n]).into_owned()),
            _ => None,
        }
    }

    #[test]
    fn test_memory_channel_records_and_replies() {
        let channel = MemoryChannel::with_responder(|line| vec![format!("echo {}", line)]);
        channel.write_line("SelectAll").unwrap();

        assert_eq!(channel.written(), vec!["SelectAll"]);
        assert_eq!(read_text(&channel).as_deref(), Some("echo SelectAll"));
        assert!(matches!(channel.read_chunk(&mut [0u8; 8]), ReadOutcome::Idle));
    }

    #[test]
    fn test_memory_channel_honours_delay() {
        let channel = MemoryChannel::ok_responder().with_delay(Duration::from_millis(40));
        channel.write_line("GetInfo").unwrap();
        assert!(read_text(&channel).is_none());
        std::thread::sleep(Duration::from_millis(60));
        assert!(read_text(&channel).is_some());
    }

    #[test]
    fn test_memory_channel_jitter_keeps_order() {
        let channel = MemoryChannel::new().with_jitter(Duration::from_millis(30));
        for i in 0..10 {
            channel.push_response(&format!("reply {}", i));
        }

        let start = Instant::now();
        let mut received = Vec::new();
        while received.len() < 10 && start.elapsed() < Duration::from_secs(1) {
            match read_text(&channel) {
                Some(text) => received.push(text),
                None => std::thread::sleep(Duration::from_millis(1)),
            }
        }
        let expected: Vec<String> = (0..10).map(|i| format!("reply {}", i)).collect();
        assert_eq!(received, expected);
        assert!(start.elapsed() < Duration::from_millis(500));
    }

    #[test]
    fn test_memory_channel_splits_long_replies() {
        let channel = MemoryChannel::new();
        channel.push_response("abcdefgh");
        let mut buf = [0u8; 5];
        assert!(matches!(channel.read_chunk(&mut buf), ReadOutcome::Data(5)));
        assert!(matches!(channel.read_chunk(&mut buf), ReadOutcome::Data(3)));
        assert_eq!(&buf[..3], b"fgh");
    }

    #[test]
    fn test_memory_channel_hang_up_drains_then_closes() {
        let channel = MemoryChannel::new();
        channel.push_response("last words");
        channel.hang_up();

        assert!(channel.write_line("Nope").is_err());
        assert_eq!(read_text(&channel).as_deref(), Some("last words"));
        assert!(matches!(channel.read_chunk(&mut [0u8; 8]), ReadOutcome::Closed));
    }

    #[test]
    fn test_memory_channel_close_is_idempotent() {
        let channel = MemoryChannel::new();
        channel.close();
        channel.close();
        assert!(!channel.is_open());
        assert!(matches!(
            channel.write_line("SelectAll"),
            Err(PubliCastError::ChannelClosed)
        ));
    }

    #[test]
    fn test_pipe_open_fails_without_leaking_write_side() {
        let dir = tempdir().unwrap();
        let write_path = dir.path().join("to");
        fs::write(&write_path, b"").unwrap();
        let pair = EndpointPair::new(&write_path, dir.path().join("missing-from"));

        match PipeChannel::open(&pair, Eol::Lf) {
            Err(PubliCastError::ConnectFailed { reason, tried, .. }) => {
                assert!(reason.contains("missing-from"));
                assert_eq!(tried, vec!["to", "missing-from"]);
            }
            other => panic!("Expected ConnectFailed, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_pipe_channel_over_plain_files() {
        let dir = tempdir().unwrap();
        let to = dir.path().join("to");
        let from = dir.path().join("from");
        fs::write(&to, b"").unwrap();
        fs::write(&from, b"BatchCommand finished: OK\n").unwrap();

        let channel = PipeChannel::open(&EndpointPair::new(&to, &from), Eol::Lf).unwrap();
        channel.write_line("SelectAll").unwrap();
        assert_eq!(fs::read_to_string(&to).unwrap(), "SelectAll\n");
        assert_eq!(
            read_text(&channel).as_deref(),
            Some("BatchCommand finished: OK\n")
        );

        channel.close();
        channel.close();
        assert!(!channel.is_open());
        assert!(matches!(channel.read_chunk(&mut [0u8; 8]), ReadOutcome::Closed));
        assert!(matches!(
            channel.write_line("SelectAll"),
            Err(PubliCastError::ChannelClosed)
        ));
    }

    #[test]
    fn test_crlf_nul_terminator() {
        let dir = tempdir().unwrap();
        let to = dir.path().join("to");
        let from = dir.path().join("from");
        fs::write(&to, b"").unwrap();
        fs::write(&from, b"").unwrap();

        let channel = PipeChannel::open(&EndpointPair::new(&to, &from), Eol::CrLfNul).unwrap();
        channel.write_line("SelectAll").unwrap();
        assert_eq!(fs::read(&to).unwrap(), b"SelectAll\r\n\0");
    }
}
