//! Audio Engine Module
//!
//! In-memory audio and the WAV files exchanged with the editor:
//! - Interleaved audio buffer and level helpers
//! - WAV import/export

pub mod buffer;
pub mod io;

pub use buffer::{db_to_linear, linear_to_db, sine_wave, AudioBuffer, DEFAULT_SAMPLE_RATE, MIN_DB};
pub use io::{read_wav, write_wav, WavFormat};
