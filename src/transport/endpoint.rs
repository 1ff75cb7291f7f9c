//! Endpoint discovery
//!
//! The editor exposes its scripting interface as two named pipes: one it
//! reads commands from ("to" the server) and one it writes responses to
//! ("from" the server). Their names depend on the platform and, on Windows,
//! on the editor build, so every known naming convention is tried in a
//! fixed priority order.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use crate::config::SessionConfig;
use crate::logging::SharedSink;
use crate::retry::RetryPolicy;

/// Substrings (lowercase) that mark a listed channel as a scripting pipe
pub const PIPE_MARKERS: [&str; 3] = ["audacity", "tosrv", "fromsrv"];

/// Operating system family, which decides the naming conventions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlatformKind {
    Unix,
    Windows,
}

/// Where and under which user the pipes are looked for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Platform {
    pub kind: PlatformKind,
    /// Directory listing the pipes (`/tmp` or `\\.\pipe\`)
    pub pipe_dir: PathBuf,
    /// User qualifier substituted into user-scoped names
    pub user: String,
}

impl Platform {
    /// Platform the process runs on, honouring `pipe_dir` from the config
    pub fn current(config: &SessionConfig) -> Self {
        let kind = if cfg!(windows) {
            PlatformKind::Windows
        } else {
            PlatformKind::Unix
        };
        let pipe_dir = config.pipe_dir.clone().unwrap_or_else(|| match kind {
            PlatformKind::Windows => PathBuf::from(r"\\.\pipe\"),
            PlatformKind::Unix => PathBuf::from("/tmp"),
        });
        Self {
            kind,
            pipe_dir,
            user: current_user(),
        }
    }

    /// Naming conventions for this platform, highest priority first
    pub fn conventions(&self) -> &'static [NamingConvention] {
        match self.kind {
            PlatformKind::Unix => &UNIX_CONVENTIONS,
            PlatformKind::Windows => &WINDOWS_CONVENTIONS,
        }
    }
}

#[cfg(unix)]
fn current_user() -> String {
    // SAFETY: getuid has no preconditions and cannot fail
    let uid = unsafe { libc::getuid() };
    uid.to_string()
}

#[cfg(not(unix))]
fn current_user() -> String {
    std::env::var("USERNAME").unwrap_or_else(|_| "user".to_string())
}

/// The two pipes of one scripting endpoint
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EndpointPair {
    /// Pipe commands are written to
    pub write_path: PathBuf,
    /// Pipe responses are read from
    pub read_path: PathBuf,
}

impl EndpointPair {
    pub fn new(write_path: impl Into<PathBuf>, read_path: impl Into<PathBuf>) -> Self {
        Self {
            write_path: write_path.into(),
            read_path: read_path.into(),
        }
    }

    /// File names of both ends, write side first
    pub fn names(&self) -> [String; 2] {
        [file_name(&self.write_path), file_name(&self.read_path)]
    }
}

impl std::fmt::Display for EndpointPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} / {}",
            self.write_path.display(),
            self.read_path.display()
        )
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// One way the editor may name its pipes
#[derive(Debug, Clone, Copy)]
pub struct NamingConvention {
    pub label: &'static str,
    pub generate: fn(&Platform) -> EndpointPair,
}

impl NamingConvention {
    pub fn pair_for(&self, platform: &Platform) -> EndpointPair {
        (self.generate)(platform)
    }
}

fn in_dir(platform: &Platform, to: &str, from: &str) -> EndpointPair {
    EndpointPair::new(platform.pipe_dir.join(to), platform.pipe_dir.join(from))
}

fn unix_user_scoped(p: &Platform) -> EndpointPair {
    in_dir(
        p,
        &format!("audacity_script_pipe.to.{}", p.user),
        &format!("audacity_script_pipe.from.{}", p.user),
    )
}

fn windows_primary(p: &Platform) -> EndpointPair {
    in_dir(p, "ToSrvPipe", "FromSrvPipe")
}

fn windows_alternate(p: &Platform) -> EndpointPair {
    in_dir(p, "audacity_script_pipe.to", "audacity_script_pipe.from")
}

fn windows_user_qualified(p: &Platform) -> EndpointPair {
    in_dir(
        p,
        &format!("audacity_script_pipe.to.{}", p.user),
        &format!("audacity_script_pipe.from.{}", p.user),
    )
}

static UNIX_CONVENTIONS: [NamingConvention; 1] = [NamingConvention {
    label: "user-scoped",
    generate: unix_user_scoped,
}];

static WINDOWS_CONVENTIONS: [NamingConvention; 3] = [
    NamingConvention {
        label: "primary",
        generate: windows_primary,
    },
    NamingConvention {
        label: "alternate",
        generate: windows_alternate,
    },
    NamingConvention {
        label: "user-qualified",
        generate: windows_user_qualified,
    },
];

/// Finds the scripting pipes the editor currently exposes
pub struct EndpointDiscovery {
    platform: Platform,
    sink: SharedSink,
}

impl EndpointDiscovery {
    pub fn new(platform: Platform, sink: SharedSink) -> Self {
        Self { platform, sink }
    }

    pub fn platform(&self) -> &Platform {
        &self.platform
    }

    /// Every pair the conventions would try, in priority order
    pub fn candidates(&self) -> Vec<EndpointPair> {
        let mut seen = HashSet::new();
        self.platform
            .conventions()
            .iter()
            .map(|c| c.pair_for(&self.platform))
            .filter(|pair| seen.insert(pair.clone()))
            .collect()
    }

    /// Names of every candidate pipe, for diagnostics
    pub fn tried_names(&self) -> Vec<String> {
        self.candidates()
            .iter()
            .flat_map(|pair| pair.names())
            .collect()
    }

    /// Scripting-related names currently listed in the pipe directory, sorted
    pub fn visible_names(&self) -> Vec<String> {
        let entries = match std::fs::read_dir(&self.platform.pipe_dir) {
            Ok(entries) => entries,
            Err(e) => {
                self.sink.debug(&format!(
                    "Cannot list {}: {}",
                    self.platform.pipe_dir.display(),
                    e
                ));
                return Vec::new();
            }
        };

        let mut names: Vec<String> = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.file_name().to_string_lossy().into_owned())
            .filter(|name| {
                let lower = name.to_lowercase();
                PIPE_MARKERS.iter().any(|marker| lower.contains(marker))
            })
            .collect();
        names.sort();
        names.dedup();
        names
    }

    /// Candidate pairs whose both ends are currently listed
    ///
    /// Never fails; an unreadable or empty directory yields no pairs.
    pub fn discover(&self) -> Vec<EndpointPair> {
        let visible: HashSet<String> = self.visible_names().into_iter().collect();
        self.candidates()
            .into_iter()
            .filter(|pair| pair.names().iter().all(|name| visible.contains(name)))
            .collect()
    }

    /// Poll `discover` under `policy` until something appears or `timeout`
    /// elapses
    ///
    /// The policy's delay spaces the polls; a "still waiting" line is logged
    /// every `progress_every`.
    pub fn wait_for_all(
        &self,
        policy: &RetryPolicy,
        timeout: Duration,
        progress_every: Duration,
    ) -> Vec<EndpointPair> {
        let start = Instant::now();
        let mut last_progress = start;
        self.sink.info("Waiting for scripting pipes to appear...");

        let polled = policy.run_until(timeout, |_| {
            let found = self.discover();
            if !found.is_empty() {
                return Ok(found);
            }
            if last_progress.elapsed() >= progress_every {
                self.sink.info(&format!(
                    "Still waiting for scripting pipes... ({:.0} s elapsed)",
                    start.elapsed().as_secs_f64()
                ));
                last_progress = Instant::now();
            }
            Err(())
        });

        match polled {
            Ok(found) => {
                self.sink.info(&format!(
                    "Found {} scripting endpoint(s) after {:.1} s",
                    found.len(),
                    start.elapsed().as_secs_f64()
                ));
                found
            }
            Err(_) => {
                self.sink.warning(&format!(
                    "No scripting pipes after {:.1} s",
                    start.elapsed().as_secs_f64()
                ));
                Vec::new()
            }
        }
    }

    /// Highest-priority pair found within `timeout`
    pub fn wait_for_any(
        &self,
        policy: &RetryPolicy,
        timeout: Duration,
        progress_every: Duration,
    ) -> Option<EndpointPair> {
        self.wait_for_all(policy, timeout, progress_every)
            .into_iter()
            .next()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::MemorySink;
    use pretty_assertions::assert_eq;
    use std::fs::File;
    use std::sync::Arc;
    use std::thread;
    use tempfile::tempdir;

    fn platform(kind: PlatformKind, dir: &Path) -> Platform {
        Platform {
            kind,
            pipe_dir: dir.to_path_buf(),
            user: "alice".to_string(),
        }
    }

    fn touch(dir: &Path, name: &str) {
        File::create(dir.join(name)).unwrap();
    }

    #[test]
    fn test_windows_convention_order() {
        let p = platform(PlatformKind::Windows, Path::new("pipes"));
        let discovery = EndpointDiscovery::new(p, Arc::new(MemorySink::new()));
        assert_eq!(
            discovery.tried_names(),
            vec![
                "ToSrvPipe",
                "FromSrvPipe",
                "audacity_script_pipe.to",
                "audacity_script_pipe.from",
                "audacity_script_pipe.to.alice",
                "audacity_script_pipe.from.alice",
            ]
        );
    }

    #[test]
    fn test_unix_single_user_scoped_pair() {
        let p = platform(PlatformKind::Unix, Path::new("/tmp"));
        let pairs = EndpointDiscovery::new(p, Arc::new(MemorySink::new())).candidates();
        assert_eq!(
            pairs,
            vec![EndpointPair::new(
                "/tmp/audacity_script_pipe.to.alice",
                "/tmp/audacity_script_pipe.from.alice"
            )]
        );
    }

    #[test]
    fn test_empty_directory_yields_nothing() {
        let dir = tempdir().unwrap();
        touch(dir.path(), "unrelated.sock");
        let discovery = EndpointDiscovery::new(
            platform(PlatformKind::Windows, dir.path()),
            Arc::new(MemorySink::new()),
        );
        assert!(discovery.discover().is_empty());
        assert!(discovery.visible_names().is_empty());
    }

    #[test]
    fn test_missing_directory_does_not_fail() {
        let discovery = EndpointDiscovery::new(
            platform(PlatformKind::Unix, Path::new("/nonexistent/publicast/pipes")),
            Arc::new(MemorySink::new()),
        );
        assert!(discovery.discover().is_empty());
    }

    #[test]
    fn test_discovers_complete_pairs_in_priority_order() {
        let dir = tempdir().unwrap();
        touch(dir.path(), "audacity_script_pipe.to.alice");
        touch(dir.path(), "audacity_script_pipe.from.alice");
        touch(dir.path(), "ToSrvPipe");
        touch(dir.path(), "FromSrvPipe");
        // Half a pair is not an endpoint
        touch(dir.path(), "audacity_script_pipe.to");

        let discovery = EndpointDiscovery::new(
            platform(PlatformKind::Windows, dir.path()),
            Arc::new(MemorySink::new()),
        );
        let pairs = discovery.discover();
        assert_eq!(pairs.len(), 2);
        assert!(pairs[0].write_path.ends_with("ToSrvPipe"));
        assert!(pairs[1].write_path.ends_with("audacity_script_pipe.to.alice"));

        // Deterministic for a fixed listing
        assert_eq!(discovery.discover(), pairs);
    }

    #[test]
    fn test_visible_names_match_case_insensitively() {
        let dir = tempdir().unwrap();
        touch(dir.path(), "TOSRVPIPE");
        touch(dir.path(), "Audacity_Other");
        touch(dir.path(), "something_else");

        let discovery = EndpointDiscovery::new(
            platform(PlatformKind::Windows, dir.path()),
            Arc::new(MemorySink::new()),
        );
        assert_eq!(discovery.visible_names(), vec!["Audacity_Other", "TOSRVPIPE"]);
    }

    #[test]
    fn test_wait_for_any_times_out_quietly() {
        let dir = tempdir().unwrap();
        let sink = Arc::new(MemorySink::new());
        let discovery = EndpointDiscovery::new(platform(PlatformKind::Unix, dir.path()), sink.clone());

        let start = Instant::now();
        let found = discovery.wait_for_any(
            &RetryPolicy::new(1, Duration::from_millis(20)),
            Duration::from_millis(120),
            Duration::from_millis(50),
        );
        assert!(found.is_none());
        assert!(start.elapsed() >= Duration::from_millis(120));
        assert!(sink.contains("Still waiting"));
    }

    #[test]
    fn test_wait_for_any_sees_late_pipes() {
        let dir = tempdir().unwrap();
        let path = dir.path().to_path_buf();
        let discovery = EndpointDiscovery::new(
            platform(PlatformKind::Unix, dir.path()),
            Arc::new(MemorySink::new()),
        );

        let creator = thread::spawn(move || {
            thread::sleep(Duration::from_millis(60));
            touch(&path, "audacity_script_pipe.to.alice");
            touch(&path, "audacity_script_pipe.from.alice");
        });

        let found = discovery.wait_for_any(
            &RetryPolicy::new(1, Duration::from_millis(10)),
            Duration::from_secs(5),
            Duration::from_secs(5),
        );
        creator.join().unwrap();
        assert!(found.is_some());
    }

    #[test]
    fn test_policy_delay_spaces_discovery_polls() {
        let dir = tempdir().unwrap();
        let path = dir.path().to_path_buf();
        let discovery = EndpointDiscovery::new(
            platform(PlatformKind::Unix, dir.path()),
            Arc::new(MemorySink::new()),
        );

        let creator = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            touch(&path, "audacity_script_pipe.to.alice");
            touch(&path, "audacity_script_pipe.from.alice");
        });

        // First poll at 0 ms misses; the next one is due after 400 ms
        let start = Instant::now();
        let found = discovery.wait_for_any(
            &RetryPolicy::new(1, Duration::from_millis(400)),
            Duration::from_secs(5),
            Duration::from_secs(5),
        );
        let elapsed = start.elapsed();
        creator.join().unwrap();

        assert!(found.is_some());
        assert!(elapsed >= Duration::from_millis(400), "found after {:?}", elapsed);
        assert!(elapsed < Duration::from_millis(800), "found after {:?}", elapsed);
    }
}
