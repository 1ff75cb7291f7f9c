//! FIFO Tests
//!
//! Talks to a fake editor over real named pipes. Unix only.

#![cfg(unix)]

use std::ffi::CString;
use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write};
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use publicast::config::{Eol, SessionConfig};
use publicast::logging::MemorySink;
use publicast::retry::RetryPolicy;
use publicast::transport::Command;
use publicast::{EditorSession, PubliCastError};

fn mkfifo(path: &Path) {
    let c_path = CString::new(path.as_os_str().as_bytes()).unwrap();
    // SAFETY: c_path is a valid NUL-terminated string
    let rc = unsafe { libc::mkfifo(c_path.as_ptr(), 0o600) };
    assert_eq!(rc, 0, "mkfifo failed: {}", std::io::Error::last_os_error());
}

fn pipe_paths(dir: &Path) -> (PathBuf, PathBuf) {
    // SAFETY: getuid cannot fail
    let uid = unsafe { libc::getuid() };
    (
        dir.join(format!("audacity_script_pipe.to.{}", uid)),
        dir.join(format!("audacity_script_pipe.from.{}", uid)),
    )
}

fn config(dir: &Path) -> SessionConfig {
    SessionConfig {
        pipe_dir: Some(dir.to_path_buf()),
        command_timeout_ms: 2000,
        discovery_timeout_ms: 200,
        reader_idle_ms: 2,
        retry: RetryPolicy::new(2, Duration::from_millis(10)),
        eol: Some(Eol::Lf),
        ..SessionConfig::default()
    }
}

/// Answers `commands` lines, then hangs up
fn fake_editor(to: PathBuf, from: PathBuf, commands: usize) -> thread::JoinHandle<Vec<String>> {
    // Read+write opens never block on a FIFO, so both ends exist before the
    // client connects.
    let to_file = OpenOptions::new().read(true).write(true).open(&to).unwrap();
    let mut from_file = OpenOptions::new().read(true).write(true).open(&from).unwrap();

    thread::spawn(move || {
        let mut received = Vec::new();
        let mut lines = BufReader::new(to_file).lines();
        for _ in 0..commands {
            let Some(Ok(line)) = lines.next() else { break };
            let reply = if line.starts_with("Bogus") {
                "Error: unknown command\n".to_string()
            } else {
                format!("{} done\nBatchCommand finished: OK\n", line)
            };
            from_file.write_all(reply.as_bytes()).unwrap();
            from_file.flush().unwrap();
            received.push(line);
        }
        received
    })
}

#[test]
fn test_session_over_real_fifos() {
    let dir = tempfile::tempdir().unwrap();
    let (to, from) = pipe_paths(dir.path());
    mkfifo(&to);
    mkfifo(&from);
    let editor = fake_editor(to.clone(), from.clone(), 3);

    let mut session = EditorSession::connect(&config(dir.path()), Arc::new(MemorySink::new())).unwrap();
    assert_eq!(session.endpoint().map(|p| p.write_path.clone()), Some(to));

    let first = session.run(&Command::get_info("Tracks")).unwrap();
    assert!(first.starts_with("GetInfo:Type=Tracks done"));

    let rejected = session.run(&Command::new("Bogus"));
    assert!(matches!(rejected, Err(PubliCastError::Rejected { .. })));

    session.run(&Command::select_all()).unwrap();
    session.close();

    let received = editor.join().unwrap();
    assert_eq!(received, vec!["GetInfo:Type=Tracks", "Bogus", "SelectAll"]);
}

#[test]
fn test_connect_fails_without_editor() {
    let dir = tempfile::tempdir().unwrap();
    let (to, from) = pipe_paths(dir.path());
    // Pipes exist but nobody has the command pipe open for reading
    mkfifo(&to);
    mkfifo(&from);

    match EditorSession::connect(&config(dir.path()), Arc::new(MemorySink::new())) {
        Err(e @ PubliCastError::ConnectFailed { .. }) => {
            let message = e.to_string();
            assert!(message.contains("audacity_script_pipe.to."));
            assert!(e.is_recoverable());
            assert!(!e.recovery_suggestions().is_empty());
        }
        other => panic!("Expected ConnectFailed, got {:?}", other.err()),
    }
}
