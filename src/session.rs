//! Editor session
//!
//! Ties discovery, the channel, the reader and the dispatcher together into
//! the connect / run / close flow, plus the export-compress-import round
//! trip that runs the offline compressor on the editor's project.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::config::SessionConfig;
use crate::dsp::{CompressorConfig, DynamicRangeCompressor};
use crate::engine::{read_wav, write_wav, AudioBuffer, WavFormat};
use crate::error::{PubliCastError, Result};
use crate::logging::SharedSink;
use crate::transport::{
    Channel, ChannelFactory, Command, CommandDispatcher, Connection, EndpointDiscovery,
    EndpointPair, PipeChannelFactory, Platform, ReaderOptions,
};

/// One row of a command transcript
#[derive(Debug)]
pub struct CommandOutcome {
    pub command: String,
    pub result: Result<String>,
    pub started_at: DateTime<Utc>,
    pub elapsed: Duration,
}

impl CommandOutcome {
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

/// Levels before and after a compressor round trip
#[derive(Debug, Clone, PartialEq)]
pub struct RoundTripReport {
    pub num_frames: usize,
    pub num_channels: usize,
    pub sample_rate: u32,
    pub input_peak_db: f64,
    pub output_peak_db: f64,
}

/// A live connection to the editor
pub struct EditorSession {
    dispatcher: CommandDispatcher,
    endpoint: Option<EndpointPair>,
    sink: SharedSink,
}

impl EditorSession {
    /// Discover the editor's pipes on this machine and connect
    pub fn connect(config: &SessionConfig, sink: SharedSink) -> Result<Self> {
        let discovery = EndpointDiscovery::new(Platform::current(config), sink.clone());
        let factory = PipeChannelFactory::new(config.eol());
        Self::connect_with(&discovery, &factory, config, sink)
    }

    /// Connect to the first discovered pair that opens
    ///
    /// Pairs are tried in convention priority order, each under the
    /// configured retry policy. Failures are reported together with every
    /// name that was tried and every scripting pipe that was visible.
    pub fn connect_with(
        discovery: &EndpointDiscovery,
        factory: &dyn ChannelFactory,
        config: &SessionConfig,
        sink: SharedSink,
    ) -> Result<Self> {
        let pairs = discovery.wait_for_all(
            &config.retry,
            config.discovery_timeout(),
            Duration::from_millis(config.progress_log_every_ms),
        );
        if pairs.is_empty() {
            return Err(PubliCastError::DiscoveryEmpty {
                tried: discovery.tried_names(),
                visible: discovery.visible_names(),
            });
        }

        let mut reasons = Vec::new();
        for pair in pairs {
            sink.info(&format!("Trying endpoint {}", pair));
            let opened = config.retry.run(|attempt| {
                factory.open(&pair).map_err(|e| {
                    sink.warning(&format!(
                        "Attempt {}/{} on {} failed: {}",
                        attempt,
                        config.retry.max_attempts.max(1),
                        pair,
                        e
                    ));
                    e
                })
            });
            match opened {
                Ok(channel) => {
                    let mut session = Self::from_channel(channel, config, sink.clone())?;
                    session.endpoint = Some(pair);
                    return Ok(session);
                }
                Err(errors) => {
                    if let Some(last) = errors.last() {
                        reasons.push(format!("{}: {}", pair, last));
                    }
                }
            }
        }

        Err(PubliCastError::ConnectFailed {
            reason: reasons.join("; "),
            tried: discovery.tried_names(),
            visible: discovery.visible_names(),
        })
    }

    /// Wrap an already open channel
    pub fn from_channel(
        channel: Arc<dyn Channel>,
        config: &SessionConfig,
        sink: SharedSink,
    ) -> Result<Self> {
        let connection = Connection::start(channel, ReaderOptions::from(config), sink.clone())?;
        let mut dispatcher = CommandDispatcher::new(config.command_timeout(), sink.clone());
        dispatcher.set_connection(connection);
        Ok(Self {
            dispatcher,
            endpoint: None,
            sink,
        })
    }

    /// Endpoint pair in use, when connected through discovery
    pub fn endpoint(&self) -> Option<&EndpointPair> {
        self.endpoint.as_ref()
    }

    pub fn is_connected(&self) -> bool {
        self.dispatcher.is_connected()
    }

    pub fn dispatcher(&mut self) -> &mut CommandDispatcher {
        &mut self.dispatcher
    }

    pub fn run(&mut self, command: &Command) -> Result<String> {
        self.dispatcher.run_command(command)
    }

    /// Run every command in order, whatever happens to the previous ones
    pub fn run_batch(&mut self, commands: &[Command]) -> Vec<CommandOutcome> {
        commands
            .iter()
            .map(|command| {
                let started_at = Utc::now();
                let start = Instant::now();
                let result = self.dispatcher.run_command(command);
                CommandOutcome {
                    command: command.to_string(),
                    result,
                    started_at,
                    elapsed: start.elapsed(),
                }
            })
            .collect()
    }

    pub fn drain_stale(&mut self) -> Vec<String> {
        self.dispatcher.drain_stale()
    }

    /// Export the project, compress it offline and import the result
    ///
    /// Temporary files live in `work_dir` under unique names and are removed
    /// whether or not the round trip succeeds.
    pub fn compress_round_trip(
        &mut self,
        compressor: &DynamicRangeCompressor,
        work_dir: &Path,
        num_channels: usize,
    ) -> Result<RoundTripReport> {
        let id = Uuid::new_v4();
        let temp = TempFiles(vec![
            work_dir.join(format!("publicast-{}-export.wav", id)),
            work_dir.join(format!("publicast-{}-compressed.wav", id)),
        ]);
        let (exported, compressed) = (&temp.0[0], &temp.0[1]);

        self.drain_stale();
        self.run(&Command::select_all())?;
        self.run(&Command::export(exported, num_channels))?;

        let input = read_wav(exported)?;
        let output = compressor.process(&input);
        write_wav(&output, compressed, WavFormat::float32())?;

        self.run(&Command::remove_tracks())?;
        self.run(&Command::import(compressed))?;

        let report = RoundTripReport {
            num_frames: output.num_frames(),
            num_channels: output.num_channels(),
            sample_rate: output.sample_rate(),
            input_peak_db: input.peak_db(),
            output_peak_db: output.peak_db(),
        };
        self.sink.info(&format!(
            "Round trip done: {} frames, peak {:.1} dB -> {:.1} dB",
            report.num_frames, report.input_peak_db, report.output_peak_db
        ));
        Ok(report)
    }

    /// Stop the reader and release the pipes; later calls do nothing
    pub fn close(&mut self) {
        self.dispatcher.close();
    }
}

impl Drop for EditorSession {
    fn drop(&mut self) {
        self.close();
    }
}

struct TempFiles(Vec<PathBuf>);

impl Drop for TempFiles {
    fn drop(&mut self) {
        for path in &self.0 {
            // Missing files are fine: the round trip may have stopped early
            let _ = std::fs::remove_file(path);
        }
    }
}

/// Compress a WAV file without involving the editor
pub fn compress_file(
    input: &Path,
    output: &Path,
    config: CompressorConfig,
    sink: SharedSink,
) -> Result<AudioBuffer> {
    let compressor = DynamicRangeCompressor::new(config, sink)?;
    let buffer = read_wav(input)?;
    let processed = compressor.process(&buffer);
    write_wav(&processed, output, WavFormat::float32())?;
    Ok(processed)
}
