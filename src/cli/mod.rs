//! CLI Module
//!
//! Command-line interface for driving the editor and running the compressor.

pub mod commands;

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::dsp::{CompressorConfig, EnvelopeShape};

/// PubliCast - podcast post-production through the editor's scripting pipe
#[derive(Parser, Debug)]
#[command(name = "publicast")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Session configuration file (JSON)
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List the scripting endpoints the editor currently exposes
    #[command(name = "discover")]
    Discover,

    /// Connect and run commands in order
    #[command(name = "send")]
    Send {
        /// Commands, e.g. `SelectAll` or `GetInfo:Type=Tracks`
        #[arg(required = true)]
        commands: Vec<String>,
    },

    /// Compress a WAV file offline, without the editor
    #[command(name = "compress")]
    Compress {
        /// Input WAV file
        input: PathBuf,

        /// Output WAV file
        output: PathBuf,

        #[command(flatten)]
        settings: CompressorArgs,
    },

    /// Run the editor presets, then the compressor round trip
    #[command(name = "process")]
    Process {
        /// Editor presets file (JSON); built-in presets when omitted
        #[arg(long, value_name = "FILE")]
        presets: Option<PathBuf>,

        /// Only apply the editor presets
        #[arg(long)]
        skip_compressor: bool,

        /// Channel count of the exported mix
        #[arg(long, default_value_t = 2)]
        channels: usize,

        /// Directory for temporary WAV files
        #[arg(long, value_name = "DIR")]
        work_dir: Option<PathBuf>,

        #[command(flatten)]
        settings: CompressorArgs,
    },

    /// Check the scripting pipes and report what is wrong
    #[command(name = "diagnose")]
    Diagnose,
}

/// Compressor settings shared by `compress` and `process`
#[derive(Args, Debug, Clone)]
pub struct CompressorArgs {
    /// Compression ratio (-0.5 to 1.25)
    #[arg(long, default_value_t = 0.8, allow_negative_numbers = true)]
    pub ratio: f64,

    /// Attack/release hardness (0.1 to 1.0)
    #[arg(long, default_value_t = 0.879)]
    pub hardness: f64,

    /// Floor in dB (-96 to 0)
    #[arg(long, default_value_t = -18.0, allow_negative_numbers = true)]
    pub floor: f64,

    /// Noise gate factor below the floor (-2 to 10)
    #[arg(long, default_value_t = 0.0, allow_negative_numbers = true)]
    pub noise_factor: f64,

    /// Output ceiling (0 to 1)
    #[arg(long, default_value_t = 0.99)]
    pub scale_max: f64,

    /// Shape the envelope with attack/release paraboloids
    #[arg(long)]
    pub paraboloid: bool,
}

impl CompressorArgs {
    pub fn to_config(&self) -> CompressorConfig {
        CompressorConfig {
            compress_ratio: self.ratio,
            hardness: self.hardness,
            floor_db: self.floor,
            noise_factor: self.noise_factor,
            scale_max: self.scale_max,
            envelope_shape: if self.paraboloid {
                EnvelopeShape::Paraboloid
            } else {
                EnvelopeShape::PeakWindow
            },
            ..CompressorConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_compress_with_negative_floor() {
        let cli = Cli::parse_from([
            "publicast",
            "compress",
            "in.wav",
            "out.wav",
            "--floor",
            "-24",
            "--paraboloid",
        ]);
        match cli.command {
            Commands::Compress { settings, .. } => {
                let config = settings.to_config();
                assert_eq!(config.floor_db, -24.0);
                assert_eq!(config.compress_ratio, 0.8);
                assert_eq!(config.envelope_shape, EnvelopeShape::Paraboloid);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_send_requires_a_command() {
        assert!(Cli::try_parse_from(["publicast", "send"]).is_err());
        let cli = Cli::try_parse_from(["publicast", "-v", "send", "SelectAll", "GetInfo:Type=Tracks"]).unwrap();
        assert!(cli.verbose);
        assert!(matches!(cli.command, Commands::Send { ref commands } if commands.len() == 2));
    }

    #[test]
    fn test_cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
