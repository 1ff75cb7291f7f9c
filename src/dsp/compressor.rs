//! Dynamic range compressor
//!
//! A lookahead compressor that derives one gain curve from the cross-channel
//! peak envelope and applies it to every channel. Levels below the floor are
//! gated, the rest are scaled by the compression ratio and inverted into a
//! gain, then clipped to [-1, 1].

use serde::{Deserialize, Serialize};

use super::envelope::{
    apply_floor_and_gate, gain_curve, interpolate, mono_peaks, paraboloid_hull, peak_envelope_db,
};
use crate::engine::buffer::{AudioBuffer, DEFAULT_SAMPLE_RATE};
use crate::error::{PubliCastError, Result};
use crate::logging::SharedSink;

/// Analysis window length in samples
pub const WINDOW_SIZE: usize = 1500;

/// Exponent of the release curve (peaks in the past)
pub const RELEASE_EXPONENT: i32 = 2;

/// Exponent of the attack curve (peaks in the future)
pub const ATTACK_EXPONENT: i32 = 4;

/// How the per-window envelope is shaped before gain derivation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvelopeShape {
    /// Raw two-window peak levels
    #[default]
    PeakWindow,
    /// Peak levels spread by the asymmetric attack/release paraboloids
    Paraboloid,
}

/// Compressor settings
///
/// Deserialization runs [`CompressorConfig::validate`], so an out-of-range
/// value in a settings file is reported instead of silently clamped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "UncheckedConfig")]
pub struct CompressorConfig {
    /// Envelope scale factor (-0.5 to 1.25); below 1 compresses, above 1 expands
    pub compress_ratio: f64,
    /// Attack/release hardness (0.1 to 1.0)
    pub hardness: f64,
    /// Level below which the envelope is gated, in dB (-96 to 0)
    pub floor_db: f64,
    /// How hard levels below the floor are pushed down (-2 to 10)
    pub noise_factor: f64,
    /// Output ceiling, linear (0 to 1)
    pub scale_max: f64,
    /// Sample rate used by `process_samples`
    pub sample_rate: u32,
    pub envelope_shape: EnvelopeShape,
}

impl Default for CompressorConfig {
    fn default() -> Self {
        Self {
            compress_ratio: 0.8,
            hardness: 0.879,
            floor_db: -18.0,
            noise_factor: 0.0,
            scale_max: 0.99,
            sample_rate: DEFAULT_SAMPLE_RATE,
            envelope_shape: EnvelopeShape::PeakWindow,
        }
    }
}

fn check_range(param: &str, value: f64, min: f64, max: f64) -> Result<()> {
    // NaN fails the contains check as well
    if (min..=max).contains(&value) {
        Ok(())
    } else {
        Err(PubliCastError::InvalidConfig {
            param: param.to_string(),
            value: value.to_string(),
            expected: format!("{} to {}", min, max),
        })
    }
}

impl CompressorConfig {
    /// Validate every field; the first out-of-range value is reported
    pub fn validate(&self) -> Result<()> {
        check_range("compress_ratio", self.compress_ratio, -0.5, 1.25)?;
        check_range("hardness", self.hardness, 0.1, 1.0)?;
        check_range("floor_db", self.floor_db, -96.0, 0.0)?;
        check_range("noise_factor", self.noise_factor, -2.0, 10.0)?;
        check_range("scale_max", self.scale_max, 0.0, 1.0)?;
        if self.sample_rate == 0 {
            return Err(PubliCastError::InvalidConfig {
                param: "sample_rate".to_string(),
                value: "0".to_string(),
                expected: "a positive rate in Hz".to_string(),
            });
        }
        Ok(())
    }

    fn hardness_span(&self) -> f64 {
        (1.1 - self.hardness) * 3.0
    }

    /// Width of the release curve in seconds
    pub fn release_width_s(&self) -> f64 {
        self.hardness_span().powi(2) * 510.0 / 1000.0
    }

    /// Width of the attack curve in seconds
    pub fn attack_width_s(&self) -> f64 {
        self.hardness_span().powi(2) * 340.0 / 1000.0
    }

    pub fn release_exponent(&self) -> i32 {
        RELEASE_EXPONENT
    }

    pub fn attack_exponent(&self) -> i32 {
        ATTACK_EXPONENT
    }
}

#[derive(Deserialize)]
#[serde(default)]
struct UncheckedConfig {
    compress_ratio: f64,
    hardness: f64,
    floor_db: f64,
    noise_factor: f64,
    scale_max: f64,
    sample_rate: u32,
    envelope_shape: EnvelopeShape,
}

impl Default for UncheckedConfig {
    fn default() -> Self {
        let d = CompressorConfig::default();
        Self {
            compress_ratio: d.compress_ratio,
            hardness: d.hardness,
            floor_db: d.floor_db,
            noise_factor: d.noise_factor,
            scale_max: d.scale_max,
            sample_rate: d.sample_rate,
            envelope_shape: d.envelope_shape,
        }
    }
}

impl TryFrom<UncheckedConfig> for CompressorConfig {
    type Error = PubliCastError;

    fn try_from(raw: UncheckedConfig) -> Result<Self> {
        let config = CompressorConfig {
            compress_ratio: raw.compress_ratio,
            hardness: raw.hardness,
            floor_db: raw.floor_db,
            noise_factor: raw.noise_factor,
            scale_max: raw.scale_max,
            sample_rate: raw.sample_rate,
            envelope_shape: raw.envelope_shape,
        };
        config.validate()?;
        Ok(config)
    }
}

/// Lookahead dynamic range compressor
///
/// Stateless between calls: the input is never modified and every call
/// returns a new buffer of the same length.
///
/// # Example
/// ```
/// use publicast::dsp::{CompressorConfig, DynamicRangeCompressor};
/// use publicast::engine::sine_wave;
/// use publicast::logging::MemorySink;
/// use std::sync::Arc;
///
/// let compressor =
///     DynamicRangeCompressor::new(CompressorConfig::default(), Arc::new(MemorySink::new())).unwrap();
/// let input = sine_wave(440.0, -6.0, 0.5, 44100);
/// let output = compressor.process(&input);
/// assert_eq!(output.num_frames(), input.num_frames());
/// ```
pub struct DynamicRangeCompressor {
    config: CompressorConfig,
    sink: SharedSink,
}

impl std::fmt::Debug for DynamicRangeCompressor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DynamicRangeCompressor")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl DynamicRangeCompressor {
    /// Create a compressor; fails with `InvalidConfig` before any processing
    pub fn new(config: CompressorConfig, sink: SharedSink) -> Result<Self> {
        config.validate()?;
        Ok(Self { config, sink })
    }

    pub fn config(&self) -> &CompressorConfig {
        &self.config
    }

    /// Compress a buffer, using the buffer's own sample rate
    pub fn process(&self, input: &AudioBuffer) -> AudioBuffer {
        let mut output = input.clone();
        self.run(output.samples_mut(), input.num_channels(), input.sample_rate());
        output
    }

    /// Compress raw interleaved samples at the configured sample rate
    ///
    /// A trailing partial frame is passed through unchanged.
    pub fn process_samples(&self, samples: &[f32], num_channels: usize) -> Vec<f32> {
        let mut output = samples.to_vec();
        self.run(&mut output, num_channels, self.config.sample_rate);
        output
    }

    /// Gain per frame that `process` would apply
    pub fn gain_curve_for(&self, samples: &[f32], num_channels: usize, sample_rate: u32) -> Vec<f64> {
        let peaks = mono_peaks(samples, num_channels);
        if peaks.is_empty() {
            return Vec::new();
        }

        let envelope = peak_envelope_db(&peaks, WINDOW_SIZE);
        let envelope = match self.config.envelope_shape {
            EnvelopeShape::PeakWindow => envelope,
            EnvelopeShape::Paraboloid => paraboloid_hull(
                &envelope,
                WINDOW_SIZE as f64 / sample_rate.max(1) as f64,
                self.config.attack_width_s(),
                self.config.release_width_s(),
                ATTACK_EXPONENT,
                RELEASE_EXPONENT,
            ),
        };
        let gated = apply_floor_and_gate(&envelope, self.config.floor_db, self.config.noise_factor);
        let gains = gain_curve(&gated, self.config.compress_ratio, self.config.scale_max);

        interpolate(&gains, peaks.len())
    }

    fn run(&self, samples: &mut [f32], num_channels: usize, sample_rate: u32) {
        let num_channels = num_channels.max(1);
        let c = &self.config;
        self.sink.info(&format!(
            "Compressing {} frames x {} ch at {} Hz (ratio {}, hardness {}, floor {} dB, noise factor {}, scale max {}, envelope {:?})",
            samples.len() / num_channels,
            num_channels,
            sample_rate,
            c.compress_ratio,
            c.hardness,
            c.floor_db,
            c.noise_factor,
            c.scale_max,
            c.envelope_shape
        ));

        let gains = self.gain_curve_for(samples, num_channels, sample_rate);
        for (frame, gain) in samples.chunks_exact_mut(num_channels).zip(&gains) {
            for sample in frame {
                *sample = ((*sample as f64) * gain).clamp(-1.0, 1.0) as f32;
            }
        }

        self.sink.info(&format!(
            "Compression finished: {} samples processed",
            samples.len()
        ));
    }
}
