//! Scripting-pipe transport
//!
//! Discovery finds the editor's pipe pair, a [`Channel`] owns the open
//! handles, a [`ResponseReader`] drains the read side on a background
//! thread, and the [`CommandDispatcher`] pairs each command with the next
//! queued response.

pub mod channel;
pub mod command;
pub mod connection;
pub mod dispatcher;
pub mod endpoint;
pub mod reader;

pub use channel::{
    Channel, ChannelFactory, MemoryChannel, PipeChannel, PipeChannelFactory, ReadOutcome,
};
pub use command::{Command, EditorCompressorSettings, EditorPresets, NormalizeSettings};
pub use connection::Connection;
pub use dispatcher::{CommandDispatcher, FAILURE_MARKERS};
pub use endpoint::{
    EndpointDiscovery, EndpointPair, NamingConvention, Platform, PlatformKind, PIPE_MARKERS,
};
pub use reader::{ReaderOptions, ResponseReader};
