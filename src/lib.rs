//! # peerwire
//!
//! Command and virtual-channel layer of a peer-to-peer session protocol.
//!
//! One physical connection carries a stream of typed request/response
//! messages ("boxes") and, multiplexed over it, independent virtual
//! connections identified by small integer ids, each with its own
//! choke/unchoke flow control.
//!
//! ## Architecture
//!
//! - **Wire** (`wire`): ordered key/value boxes, length-prefixed framing,
//!   resumable decoding
//! - **Commands** (`command`): the ten-command catalogue as pure schema
//!   values in a sealed registry
//! - **Dispatch** (`dispatch`): inbound requests run as independent units
//!   of work; failures map to stable wire error names
//! - **Channels** (`channel`, `flow`): virtual-channel lifecycle coupled to
//!   establishment answers, plus per-channel flow control
//! - **Connection** (`connection`): the read loop, the serialized writer,
//!   ask/answer correlation, teardown
//!
//! The crate is a library-level protocol engine: the byte stream, the
//! virtual transports, and the certificate machinery are collaborators
//! supplied by the host (see `service`).
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use peerwire::ConnectionBuilder;
//!
//! #[tokio::main]
//! async fn main() -> peerwire::Result<()> {
//!     let conn = ConnectionBuilder::new(service, authority).start(stream);
//!
//!     let address = conn.who_am_i().await?;
//!     conn.open_virtual(7, Arc::new(my_transport)).await?;
//!     conn.choke(7).await?;
//!
//!     conn.closed().await;
//!     Ok(())
//! }
//! ```

pub mod channel;
pub mod command;
pub mod connection;
pub mod dispatch;
pub mod error;
pub mod flow;
pub mod identity;
pub mod service;
pub mod wire;

mod writer;

pub use channel::{ChannelId, ChannelState, VirtualChannelManager};
pub use connection::{Connection, ConnectionBuilder};
pub use error::{CommandFailure, FailureKind, Result, WireError};
pub use flow::FlowController;
pub use identity::{Certificate, CertificateRequest, HostPort, PeerAddress};
pub use service::{CertAuthority, PeerService, VirtualTransport};
