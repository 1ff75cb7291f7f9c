//! PubliCast - scripting-pipe client and dynamic range compressor
//!
//! PubliCast drives an already running audio editor through its scripting
//! pipes and ships a lookahead compressor that works on plain sample
//! buffers, with or without the editor.
//!
//! # Architecture
//!
//! - `transport`: endpoint discovery, channels, the background response
//!   reader and the command dispatcher
//! - `dsp`: the dynamic range compressor
//! - `engine`: audio buffers and WAV interchange
//! - `session`: the connect / run / round-trip flow built from the above

pub mod cli;
pub mod config;
pub mod dsp;
pub mod engine;
pub mod error;
pub mod logging;
pub mod retry;
pub mod session;
pub mod transport;

pub use config::{Eol, SessionConfig};
pub use dsp::{CompressorConfig, DynamicRangeCompressor, EnvelopeShape};
pub use engine::AudioBuffer;
pub use error::{PubliCastError, Result};
pub use logging::{LogLevel, LogSink, MemorySink, SharedSink, TracingSink};
pub use retry::RetryPolicy;
pub use session::{compress_file, CommandOutcome, EditorSession, RoundTripReport};
pub use transport::{Command, CommandDispatcher, EndpointDiscovery, EndpointPair};
