//! WAV file I/O
//!
//! The editor exports the current project to a temporary WAV file, the
//! compressor works on it in memory, and the result is written back for the
//! editor to import. Sample rate and channel count are preserved as-is.

use std::path::Path;

use hound::{SampleFormat, WavReader, WavSpec, WavWriter};

use crate::engine::buffer::AudioBuffer;
use crate::error::{PubliCastError, Result};

/// Sample encoding used when writing a WAV file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WavFormat {
    /// Bit depth: 16, 24, or 32 (32 = float)
    pub bit_depth: u16,
}

impl Default for WavFormat {
    fn default() -> Self {
        WavFormat { bit_depth: 32 }
    }
}

impl WavFormat {
    pub fn new(bit_depth: u16) -> Self {
        WavFormat { bit_depth }
    }

    /// 16-bit integer PCM
    pub fn pcm16() -> Self {
        WavFormat { bit_depth: 16 }
    }

    /// 24-bit integer PCM
    pub fn pcm24() -> Self {
        WavFormat { bit_depth: 24 }
    }

    /// 32-bit float
    pub fn float32() -> Self {
        WavFormat { bit_depth: 32 }
    }
}

/// Read a WAV file into an interleaved buffer
///
/// # Errors
/// * `FileNotFound` - If the file does not exist
/// * `InvalidAudio` - If the file is not a readable WAV file
/// * `UnsupportedFormat` - If the integer bit depth is not 8/16/24/32
pub fn read_wav(path: &Path) -> Result<AudioBuffer> {
    if !path.exists() {
        return Err(PubliCastError::FileNotFound {
            path: path.display().to_string(),
        });
    }

    let reader = WavReader::open(path).map_err(|e| PubliCastError::InvalidAudio {
        reason: format!("Failed to open WAV file {}: {}", path.display(), e),
        source: Some(e),
    })?;

    let spec = reader.spec();
    let samples = read_samples_as_f32(reader, spec.bits_per_sample, spec.sample_format)?;

    AudioBuffer::from_interleaved(samples, spec.channels as usize, spec.sample_rate)
}

/// Write a buffer to a WAV file
///
/// Samples outside [-1, 1] are clamped when written as integers.
pub fn write_wav(buffer: &AudioBuffer, path: &Path, format: WavFormat) -> Result<()> {
    let spec = WavSpec {
        channels: buffer.num_channels() as u16,
        sample_rate: buffer.sample_rate(),
        bits_per_sample: format.bit_depth,
        sample_format: if format.bit_depth == 32 {
            SampleFormat::Float
        } else {
            SampleFormat::Int
        },
    };

    if !matches!(format.bit_depth, 16 | 24 | 32) {
        return Err(PubliCastError::UnsupportedFormat {
            format: format!("{}-bit audio (only 16, 24, 32 supported)", format.bit_depth),
        });
    }

    let mut writer = WavWriter::create(path, spec).map_err(wav_write_error)?;

    match format.bit_depth {
        16 => {
            for &sample in buffer.samples() {
                let scaled = (sample * 32767.0).clamp(-32768.0, 32767.0) as i16;
                writer.write_sample(scaled).map_err(wav_write_error)?;
            }
        }
        24 => {
            for &sample in buffer.samples() {
                // 24-bit stored as i32 in hound
                let scaled = (sample * 8388607.0).clamp(-8388608.0, 8388607.0) as i32;
                writer.write_sample(scaled).map_err(wav_write_error)?;
            }
        }
        _ => {
            for &sample in buffer.samples() {
                writer.write_sample(sample).map_err(wav_write_error)?;
            }
        }
    }

    writer.finalize().map_err(wav_write_error)?;
    Ok(())
}

fn wav_write_error(e: hound::Error) -> PubliCastError {
    match e {
        hound::Error::IoError(io) => PubliCastError::Io(io),
        other => PubliCastError::InvalidAudio {
            reason: format!("Failed to write WAV data: {}", other),
            source: Some(other),
        },
    }
}

/// Read samples from WAV reader and convert to f32
fn read_samples_as_f32<R: std::io::Read>(
    mut reader: WavReader<R>,
    bits_per_sample: u16,
    sample_format: SampleFormat,
) -> Result<Vec<f32>> {
    let invalid = |e: hound::Error| PubliCastError::InvalidAudio {
        reason: format!("Failed to read {}-bit samples: {}", bits_per_sample, e),
        source: Some(e),
    };

    match sample_format {
        SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<std::result::Result<Vec<f32>, _>>()
            .map_err(invalid),
        SampleFormat::Int => {
            let scale = match bits_per_sample {
                8 => 128.0,
                16 => 32768.0,
                24 => 8388608.0,
                32 => 2147483648.0,
                _ => {
                    return Err(PubliCastError::UnsupportedFormat {
                        format: format!("{}-bit integer audio", bits_per_sample),
                    })
                }
            };
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| (v as f64 / scale) as f32))
                .collect::<std::result::Result<Vec<f32>, _>>()
                .map_err(invalid)
        }
    }
}
