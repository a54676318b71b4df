//! Error handling for depth camera acquisition sessions

use thiserror::Error;

use crate::pipeline::NodeId;

/// Result type for session operations
pub type Result<T> = std::result::Result<T, Error>;

/// A pipeline descriptor was malformed.
///
/// Descriptor errors are local: the caller has to fix the graph and rebuild it.
/// A failed `link`/`add_sink` never modifies the descriptor.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InvalidLinkError {
    #[error("unknown node {0}")]
    UnknownNode(NodeId),

    #[error("sink {0} is terminal and cannot feed another node")]
    SinkNotTerminal(NodeId),

    #[error("node {0} cannot be linked to itself")]
    SelfLink(NodeId),

    #[error("link {from} -> {to} would create a cycle")]
    Cycle { from: NodeId, to: NodeId },

    #[error("link {from}.{from_port} -> {to}.{to_port} already exists")]
    DuplicateLink {
        from: NodeId,
        from_port: String,
        to: NodeId,
        to_port: String,
    },

    #[error("sink {0} already has an upstream node")]
    SinkAlreadyLinked(NodeId),

    #[error("sink {0} has no upstream node")]
    UnconnectedSink(NodeId),

    #[error("sink name must not be empty")]
    EmptySinkName,

    #[error("a sink named '{0}' already exists")]
    DuplicateSink(String),
}

/// Failures reported by the device side of a session.
///
/// Whenever one of these escapes `DeviceBinding::open` or the acquisition loop,
/// the binding has already been closed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeviceError {
    /// No (or an invalid) platform USB context was supplied.
    #[error("no platform USB context available")]
    NoContext,

    /// Discovery found no matching hardware.
    #[error("no matching device found")]
    NotFound,

    /// The device went away while streaming.
    #[error("device disconnected")]
    Disconnected,

    /// Another binding already owns the device.
    #[error("device '{0}' is already bound")]
    InUse(String),

    /// The binding was already closed.
    #[error("device binding is closed")]
    Closed,

    /// The SDK refused to compile or start the pipeline.
    #[error("backend error: {0}")]
    Backend(String),
}

/// Outcome of a failed `OutputChannel::get`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChannelError {
    /// Nothing arrived within the wait. Recoverable.
    #[error("timed out waiting for a frame")]
    Timeout,

    /// The channel will never produce again.
    #[error("channel closed")]
    Closed,

    #[error(transparent)]
    Device(#[from] DeviceError),
}

/// Crate-level error
#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    InvalidLink(#[from] InvalidLinkError),

    #[error(transparent)]
    Device(#[from] DeviceError),

    #[error(transparent)]
    Channel(#[from] ChannelError),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("acquisition loop already started")]
    LoopAlreadyStarted,

    #[error("acquisition loop was never started")]
    LoopNotStarted,

    #[error("acquisition loop thread panicked")]
    LoopPanicked,

    #[error("unknown session {0}")]
    UnknownSession(u64),

    #[error("unknown channel '{0}'")]
    UnknownChannel(String),
}

impl Error {
    /// The device error carried by this error, if any.
    pub fn device_error(&self) -> Option<&DeviceError> {
        match self {
            Error::Device(e) => Some(e),
            Error::Channel(ChannelError::Device(e)) => Some(e),
            _ => None,
        }
    }
}
