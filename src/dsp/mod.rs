//! Signal processing
//!
//! The lookahead dynamic range compressor and the envelope stages it is
//! built from.

pub mod compressor;
pub mod envelope;

pub use compressor::{
    CompressorConfig, DynamicRangeCompressor, EnvelopeShape, ATTACK_EXPONENT, RELEASE_EXPONENT,
    WINDOW_SIZE,
};
