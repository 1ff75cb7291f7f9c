//! Audio Buffer
//!
//! In-memory PCM audio exchanged with the editor through temporary WAV
//! files. Samples are stored interleaved: [L0, R0, L1, R1, ...].

use crate::error::{PubliCastError, Result};

// ============================================================================
// Constants
// ============================================================================

/// Level reported for silence or non-positive linear values
pub const MIN_DB: f64 = -120.0;

/// Default sample rate used when none is known
pub const DEFAULT_SAMPLE_RATE: u32 = 44100;

// ============================================================================
// Helper Functions
// ============================================================================

/// Convert decibels to linear amplitude
#[inline]
pub fn db_to_linear(db: f64) -> f64 {
    10.0_f64.powf(db / 20.0)
}

/// Convert linear amplitude to decibels
///
/// Values at or below zero map to [`MIN_DB`], never to -inf or NaN.
/// Tiny positive values are clamped to the same floor.
#[inline]
pub fn linear_to_db(linear: f64) -> f64 {
    if linear <= 0.0 || linear.is_nan() {
        MIN_DB
    } else {
        (20.0 * linear.log10()).max(MIN_DB)
    }
}

// ============================================================================
// Audio Buffer
// ============================================================================

/// Interleaved audio buffer
///
/// # Example
/// ```
/// use publicast::engine::AudioBuffer;
///
/// let buffer = AudioBuffer::from_interleaved(vec![0.1, -0.1, 0.2, -0.2], 2, 44100).unwrap();
/// assert_eq!(buffer.num_channels(), 2);
/// assert_eq!(buffer.num_frames(), 2);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    /// Interleaved sample data
    samples: Vec<f32>,
    /// Number of channels (1 = mono, 2 = stereo, ...)
    num_channels: usize,
    /// Sample rate in Hz
    sample_rate: u32,
}

impl AudioBuffer {
    /// Create a silent buffer
    pub fn silent(num_channels: usize, num_frames: usize, sample_rate: u32) -> Self {
        let num_channels = num_channels.max(1);
        Self {
            samples: vec![0.0; num_channels * num_frames],
            num_channels,
            sample_rate,
        }
    }

    /// Create a buffer from existing interleaved samples
    pub fn from_interleaved(
        samples: Vec<f32>,
        num_channels: usize,
        sample_rate: u32,
    ) -> Result<Self> {
        if num_channels == 0 {
            return Err(PubliCastError::InvalidAudio {
                reason: "channel count must be at least 1".to_string(),
                source: None,
            });
        }
        if samples.len() % num_channels != 0 {
            return Err(PubliCastError::InvalidAudio {
                reason: format!(
                    "Sample count {} is not divisible by channel count {}",
                    samples.len(),
                    num_channels
                ),
                source: None,
            });
        }
        Ok(Self {
            samples,
            num_channels,
            sample_rate,
        })
    }

    /// Create a mono buffer
    pub fn mono(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            num_channels: 1,
            sample_rate,
        }
    }

    /// Number of channels
    pub fn num_channels(&self) -> usize {
        self.num_channels
    }

    /// Number of frames (samples per channel)
    pub fn num_frames(&self) -> usize {
        self.samples.len() / self.num_channels
    }

    /// Sample rate in Hz
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Duration in seconds
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.num_frames() as f64 / self.sample_rate as f64
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// All interleaved samples
    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn samples_mut(&mut self) -> &mut [f32] {
        &mut self.samples
    }

    pub fn into_samples(self) -> Vec<f32> {
        self.samples
    }

    /// Sample at `frame` / `channel`
    pub fn get(&self, frame: usize, channel: usize) -> Option<f32> {
        if frame < self.num_frames() && channel < self.num_channels {
            Some(self.samples[frame * self.num_channels + channel])
        } else {
            None
        }
    }

    /// Iterate frames as slices of `num_channels` samples
    pub fn frames(&self) -> std::slice::ChunksExact<'_, f32> {
        self.samples.chunks_exact(self.num_channels)
    }

    /// Copy of one channel
    pub fn channel(&self, channel: usize) -> Vec<f32> {
        if channel >= self.num_channels {
            return Vec::new();
        }
        self.samples
            .iter()
            .skip(channel)
            .step_by(self.num_channels)
            .copied()
            .collect()
    }

    /// Check that every sample is finite
    pub fn is_valid(&self) -> bool {
        self.samples.iter().all(|s| s.is_finite())
    }

    /// Peak level across all channels in dB
    pub fn peak_db(&self) -> f64 {
        self.peak_db_in(0..self.num_frames())
    }

    /// Peak level across all channels for a range of frames, in dB
    pub fn peak_db_in(&self, frames: std::ops::Range<usize>) -> f64 {
        let end = frames.end.min(self.num_frames());
        let start = frames.start.min(end);
        let peak = self.samples[start * self.num_channels..end * self.num_channels]
            .iter()
            .map(|s| s.abs())
            .fold(0.0_f32, f32::max);
        linear_to_db(peak as f64)
    }

    /// RMS level across all channels in dB
    pub fn rms_db(&self) -> f64 {
        if self.samples.is_empty() {
            return MIN_DB;
        }
        let sum_sq: f64 = self.samples.iter().map(|&s| (s as f64).powi(2)).sum();
        linear_to_db((sum_sq / self.samples.len() as f64).sqrt())
    }
}

/// Generate a mono sine wave
///
/// `amplitude_db` is the peak level in dBFS.
pub fn sine_wave(
    frequency: f64,
    amplitude_db: f64,
    duration_secs: f64,
    sample_rate: u32,
) -> AudioBuffer {
    let num_frames = (duration_secs * sample_rate as f64).round() as usize;
    let amplitude = db_to_linear(amplitude_db);
    let angular = 2.0 * std::f64::consts::PI * frequency / sample_rate as f64;
    let samples = (0..num_frames)
        .map(|i| (amplitude * (angular * i as f64).sin()) as f32)
        .collect();
    AudioBuffer::mono(samples, sample_rate)
}
