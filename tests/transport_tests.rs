//! Transport Tests
//!
//! Command/response behaviour of the dispatcher over scripted channels.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use pretty_assertions::assert_eq;
use publicast::config::SessionConfig;
use publicast::logging::{LogLevel, MemorySink};
use publicast::transport::{
    Command, CommandDispatcher, Connection, EndpointDiscovery, MemoryChannel, Platform,
    PlatformKind, ReaderOptions,
};
use publicast::{EditorSession, PubliCastError};

fn fast_reader() -> ReaderOptions {
    ReaderOptions {
        idle: Duration::from_millis(1),
        ..ReaderOptions::default()
    }
}

fn dispatcher(channel: Arc<MemoryChannel>, sink: Arc<MemorySink>) -> CommandDispatcher {
    let mut dispatcher = CommandDispatcher::new(Duration::from_secs(2), sink.clone());
    dispatcher.set_connection(Connection::start(channel, fast_reader(), sink).unwrap());
    dispatcher
}

#[test]
fn test_sequential_commands_get_their_own_responses_under_jitter() {
    let counter = Arc::new(AtomicUsize::new(0));
    let seen = counter.clone();
    let channel = Arc::new(
        MemoryChannel::with_responder(move |line| {
            let n = seen.fetch_add(1, Ordering::SeqCst);
            vec![format!("reply {} to {}", n, line)]
        })
        .with_delay(Duration::from_millis(2))
        .with_jitter(Duration::from_millis(15)),
    );
    let mut dispatcher = dispatcher(channel.clone(), Arc::new(MemorySink::new()));

    for i in 0..20 {
        let command = Command::new("SetTrack").param("Track", i);
        let response = dispatcher.run_command(&command).unwrap();
        assert_eq!(response, format!("reply {} to SetTrack:Track={}", i, i));
    }
    assert_eq!(channel.written().len(), 20);
}

#[test]
fn test_one_second_timeout_returns_on_time() {
    let sink = Arc::new(MemorySink::new());
    let mut dispatcher = dispatcher(Arc::new(MemoryChannel::new()), sink.clone());

    let start = Instant::now();
    let result = dispatcher.run_command_with_timeout(&Command::select_all(), Duration::from_secs(1));
    let elapsed = start.elapsed();

    match result {
        Err(e @ PubliCastError::Timeout { .. }) => assert!(e.is_recoverable()),
        other => panic!("Expected Timeout, got {:?}", other),
    }
    assert!(elapsed >= Duration::from_secs(1), "returned early: {:?}", elapsed);
    assert!(elapsed < Duration::from_millis(1200), "returned late: {:?}", elapsed);
    assert_eq!(sink.messages_at(LogLevel::Error).len(), 1);
}

#[test]
fn test_rejected_does_not_poison_following_commands() {
    let channel = Arc::new(MemoryChannel::with_responder(|line| {
        if line.starts_with("Import2") {
            vec!["Error: could not open file".to_string()]
        } else {
            vec!["BatchCommand finished: OK".to_string()]
        }
    }));
    let mut dispatcher = dispatcher(channel, Arc::new(MemorySink::new()));

    let import = Command::import(std::path::Path::new("/missing/take1.wav"));
    match dispatcher.run_command(&import) {
        Err(PubliCastError::Rejected { response, .. }) => {
            assert_eq!(response, "Error: could not open file")
        }
        other => panic!("Expected Rejected, got {:?}", other),
    }
    assert!(dispatcher.run_command(&Command::select_all()).is_ok());
}

#[test]
fn test_session_batch_transcript() {
    let channel = Arc::new(MemoryChannel::ok_responder());
    let config = SessionConfig {
        reader_idle_ms: 1,
        ..SessionConfig::default()
    };
    let mut session = EditorSession::from_channel(channel, &config, Arc::new(MemorySink::new())).unwrap();

    let presets = publicast::transport::EditorPresets::default();
    let outcomes = session.run_batch(&presets.commands());
    assert_eq!(outcomes.len(), 4);
    assert!(outcomes.iter().all(|o| o.is_ok()));
    assert!(outcomes.windows(2).all(|w| w[0].started_at <= w[1].started_at));
    assert_eq!(outcomes[0].command, "SelectAll");
}

#[test]
fn test_discovery_with_no_endpoints_is_empty() {
    let dir = tempfile::tempdir().unwrap();
    for kind in [PlatformKind::Unix, PlatformKind::Windows] {
        let discovery = EndpointDiscovery::new(
            Platform {
                kind,
                pipe_dir: dir.path().to_path_buf(),
                user: "tester".to_string(),
            },
            Arc::new(MemorySink::new()),
        );
        assert!(discovery.discover().is_empty());
    }
}
