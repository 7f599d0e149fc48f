//! Error types for peerwire.
//!
//! Two layers of failure live here:
//!
//! - [`WireError`] - errors surfaced to the local host: transport failures,
//!   malformed boxes, registry misuse, lost connections. Transport-class
//!   variants (`Io`, `ConnectionLost`) are fatal to the connection; the rest
//!   are recoverable per-box conditions.
//! - [`CommandFailure`] - the closed set of ways a command handler can fail.
//!   The dispatcher translates these into stable wire error names; the
//!   underlying detail is logged locally and never serialized to the peer.

use thiserror::Error;

/// Main error type for all peerwire operations.
#[derive(Debug, Error)]
pub enum WireError {
    /// I/O error on the underlying byte stream.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A box violated the wire format (duplicate key, oversized key, etc.).
    #[error("malformed box: {0}")]
    MalformedBox(String),

    /// A command name was registered twice.
    #[error("duplicate command: {0}")]
    DuplicateCommand(String),

    /// No spec registered under the given command name.
    #[error("unknown command: {0}")]
    UnknownCommand(String),

    /// A declared argument was absent from the box.
    #[error("missing argument: {0}")]
    MissingArgument(String),

    /// A declared argument was present but failed to decode.
    #[error("argument {name}: {reason}")]
    BadArgument { name: String, reason: String },

    /// Delivery attempted on an id that is not an open channel.
    #[error("unknown channel: {0}")]
    UnknownChannel(u64),

    /// Channel establishment attempted with an id already in use.
    #[error("duplicate channel id: {0}")]
    DuplicateChannel(u64),

    /// A choked channel's deferred-delivery queue is full.
    #[error("choke queue full on channel {0}")]
    ChokeQueueFull(u64),

    /// The peer answered a command with the named wire error.
    #[error("peer answered with error: {0}")]
    ErrorAnswer(String),

    /// Connection closed or torn down.
    #[error("connection lost")]
    ConnectionLost,

    /// Outbound queue stayed at capacity past the configured timeout.
    #[error("write backpressure timeout")]
    BackpressureTimeout,
}

/// Result type alias using WireError.
pub type Result<T> = std::result::Result<T, WireError>;

/// The closed set of handler failure kinds.
///
/// Protocol-class kinds (`UnknownChannel`, `DuplicateChannelId`) carry fixed
/// wire names. Application-class kinds are mapped through each command spec's
/// error table and degrade to `UnknownError` when unmapped.
#[derive(Debug, Error)]
pub enum CommandFailure {
    /// The named channel id is not open on this connection.
    #[error("unknown channel: {0}")]
    UnknownChannel(u64),

    /// The channel id is already pending or open on this connection.
    #[error("duplicate channel id: {0}")]
    DuplicateChannelId(u64),

    /// No account matches the signing request.
    #[error("no such user")]
    NoSuchUser,

    /// The certificate request failed validation.
    #[error("bad certificate request: {0}")]
    BadCertificateRequest(String),

    /// A negotiated connection attempt (e.g. bind-udp) failed.
    #[error("connection error: {0}")]
    Connection(String),

    /// Any other failure; reaches the wire only as `UnknownError`.
    #[error("{0}")]
    Unhandled(String),
}

/// Discriminant for [`CommandFailure`], used as the key of per-command
/// error tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    UnknownChannel,
    DuplicateChannelId,
    NoSuchUser,
    BadCertificateRequest,
    Connection,
    Unhandled,
}

impl CommandFailure {
    /// The kind discriminant for error-table lookup.
    pub fn kind(&self) -> FailureKind {
        match self {
            CommandFailure::UnknownChannel(_) => FailureKind::UnknownChannel,
            CommandFailure::DuplicateChannelId(_) => FailureKind::DuplicateChannelId,
            CommandFailure::NoSuchUser => FailureKind::NoSuchUser,
            CommandFailure::BadCertificateRequest(_) => FailureKind::BadCertificateRequest,
            CommandFailure::Connection(_) => FailureKind::Connection,
            CommandFailure::Unhandled(_) => FailureKind::Unhandled,
        }
    }

    /// Wire name for protocol-class failures, independent of any command's
    /// error table.
    pub fn fixed_wire_name(&self) -> Option<&'static str> {
        match self {
            CommandFailure::UnknownChannel(_) => Some("UnknownChannel"),
            CommandFailure::DuplicateChannelId(_) => Some("DuplicateChannelId"),
            _ => None,
        }
    }
}

/// Wire name sent when a failure kind has no mapping.
pub const UNKNOWN_ERROR_NAME: &str = "UnknownError";
