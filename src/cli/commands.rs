//! CLI Command Implementations
//!
//! Implements the actual logic for each CLI command. Every command returns
//! `Ok(true)` when it fully succeeded and `Ok(false)` when it ran but some
//! part failed, which the binary turns into a non-zero exit code.

use std::path::Path;
use std::time::Duration;

use tracing::{info, warn};

use crate::config::SessionConfig;
use crate::dsp::{CompressorConfig, DynamicRangeCompressor};
use crate::error::{PubliCastError, Result};
use crate::logging::{SharedSink, TracingSink};
use crate::session::{compress_file, EditorSession};
use crate::transport::{
    Command, CommandDispatcher, Connection, EditorPresets, EndpointDiscovery, PipeChannel,
    Platform, ReaderOptions,
};

/// Command sent by `diagnose` to prove the round trip works
pub const DIAGNOSTIC_COMMAND: &str = "GetInfo:Type=Tracks";

fn print_error(error: &PubliCastError) {
    eprintln!("Error [{}]: {}", error.error_code(), error);
    for suggestion in error.recovery_suggestions() {
        eprintln!("  - {}", suggestion);
    }
}

/// Print every endpoint pair currently visible.
pub fn discover(config: &SessionConfig) -> Result<bool> {
    let discovery = EndpointDiscovery::new(Platform::current(config), TracingSink::shared());
    let pairs = discovery.discover();

    if pairs.is_empty() {
        print_error(&PubliCastError::DiscoveryEmpty {
            tried: discovery.tried_names(),
            visible: discovery.visible_names(),
        });
        return Ok(false);
    }

    for pair in &pairs {
        println!("{}", pair);
    }
    Ok(true)
}

/// Connect and run each command in order, printing the outcome.
pub fn send(config: &SessionConfig, lines: &[String]) -> Result<bool> {
    let commands = lines
        .iter()
        .map(|line| Command::raw(line.as_str()))
        .collect::<Result<Vec<_>>>()?;

    let mut session = EditorSession::connect(config, TracingSink::shared())?;
    let outcomes = session.run_batch(&commands);
    session.close();

    let mut all_ok = true;
    for outcome in &outcomes {
        match &outcome.result {
            Ok(response) => println!(
                "[{}] {} ({} ms)\n  {}",
                outcome.started_at.format("%H:%M:%S%.3f"),
                outcome.command,
                outcome.elapsed.as_millis(),
                response
            ),
            Err(e) => {
                all_ok = false;
                println!(
                    "[{}] {} FAILED [{}]: {}",
                    outcome.started_at.format("%H:%M:%S%.3f"),
                    outcome.command,
                    e.error_code(),
                    e
                );
            }
        }
    }
    Ok(all_ok)
}

/// Compress a WAV file offline.
pub fn compress(input: &Path, output: &Path, settings: CompressorConfig) -> Result<bool> {
    info!("Compressing {} -> {}", input.display(), output.display());
    let processed = compress_file(input, output, settings, TracingSink::shared())?;

    println!("Compressed: {}", output.display());
    println!("  Duration: {:.2} s", processed.duration_secs());
    println!("  Peak: {:.1} dB", processed.peak_db());
    println!("  RMS: {:.1} dB", processed.rms_db());
    Ok(true)
}

/// Apply the editor presets, then run the compressor round trip.
pub fn process(
    config: &SessionConfig,
    presets_path: Option<&Path>,
    skip_compressor: bool,
    channels: usize,
    work_dir: Option<&Path>,
    settings: CompressorConfig,
) -> Result<bool> {
    let presets = match presets_path {
        Some(path) => EditorPresets::load(path)?,
        None => EditorPresets::default(),
    };
    // Validate before touching the editor
    let sink: SharedSink = TracingSink::shared();
    let compressor = DynamicRangeCompressor::new(settings, sink.clone())?;

    let mut session = EditorSession::connect(config, sink)?;
    let outcomes = session.run_batch(&presets.commands());
    let failed = outcomes.iter().filter(|o| !o.is_ok()).count();
    if failed > 0 {
        warn!("{} of {} preset commands failed", failed, outcomes.len());
    }

    if skip_compressor {
        println!("Presets applied ({} failed)", failed);
        return Ok(failed == 0);
    }

    let temp_dir = std::env::temp_dir();
    let work_dir = work_dir.unwrap_or(temp_dir.as_path());
    let report = session.compress_round_trip(&compressor, work_dir, channels)?;
    session.close();

    println!("Processed {} frames x {} ch at {} Hz", report.num_frames, report.num_channels, report.sample_rate);
    println!("  Peak: {:.1} dB -> {:.1} dB", report.input_peak_db, report.output_peak_db);
    Ok(failed == 0)
}

/// Walk through every naming convention and report what works.
pub fn diagnose(config: &SessionConfig) -> Result<bool> {
    let sink: SharedSink = TracingSink::shared();
    let discovery = EndpointDiscovery::new(Platform::current(config), sink.clone());
    let platform = discovery.platform();

    println!("=== Scripting pipe diagnostic ===");
    println!("Pipe directory: {}", platform.pipe_dir.display());
    println!("User: {}", platform.user);

    let visible = discovery.visible_names();
    println!("\nVisible scripting pipes ({}):", visible.len());
    for name in &visible {
        println!("  {}", name);
    }

    let mut working = None;
    println!("\nNaming conventions:");
    for convention in platform.conventions() {
        let pair = convention.pair_for(platform);
        let [to, from] = pair.names();
        let listed = visible.contains(&to) && visible.contains(&from);
        println!(
            "  [{}] {} / {} - {}",
            convention.label,
            to,
            from,
            if listed { "present" } else { "missing" }
        );
        if !listed || working.is_some() {
            continue;
        }

        match probe(&pair, config, sink.clone()) {
            Ok(response) => {
                println!("    {} -> {}", DIAGNOSTIC_COMMAND, response);
                working = Some(convention.label);
            }
            Err(e) => println!("    connection failed [{}]: {}", e.error_code(), e),
        }
    }

    println!("\n=== Summary ===");
    match working {
        Some(label) => {
            println!("Working convention: {}", label);
            Ok(true)
        }
        None => {
            let error = if visible.is_empty() {
                PubliCastError::DiscoveryEmpty {
                    tried: discovery.tried_names(),
                    visible,
                }
            } else {
                PubliCastError::ConnectFailed {
                    reason: "no convention answered the diagnostic command".to_string(),
                    tried: discovery.tried_names(),
                    visible,
                }
            };
            print_error(&error);
            Ok(false)
        }
    }
}

fn probe(
    pair: &crate::transport::EndpointPair,
    config: &SessionConfig,
    sink: SharedSink,
) -> Result<String> {
    let channel = PipeChannel::open(pair, config.eol())?;
    let connection = Connection::start(
        std::sync::Arc::new(channel),
        ReaderOptions::from(config),
        sink.clone(),
    )?;
    let mut dispatcher = CommandDispatcher::new(
        config.command_timeout().max(Duration::from_secs(1)),
        sink,
    );
    dispatcher.set_connection(connection);
    let response = dispatcher.run_command(&Command::raw(DIAGNOSTIC_COMMAND)?);
    dispatcher.close();
    response
}
