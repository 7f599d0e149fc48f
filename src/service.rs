//! Collaborator traits supplied by the hosting system.
//!
//! The protocol engine consumes its externalities through three narrow
//! interfaces: the virtual transport a channel fronts, the certificate
//! authority behind `identify` and `sign`, and the peer service behind the
//! remaining host-side commands. Async trait methods use the boxed-future
//! form so the traits stay object-safe.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use bytes::Bytes;

use crate::error::CommandFailure;
use crate::identity::{Certificate, CertificateRequest, HostPort, PeerAddress};

/// Boxed future for collaborator and handler results.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// The application-level endpoint a virtual channel fronts.
///
/// `start` is called exactly once per channel, at the `Pending` to `Open`
/// transition. `deliver` receives inbound application bytes once the channel
/// is open and unchoked.
pub trait VirtualTransport: Send + Sync {
    fn start(&self);
    fn deliver(&self, data: Bytes);
}

/// Certificate authority behind `identify` and `sign`.
pub trait CertAuthority: Send + Sync {
    /// Sign a certificate request for the account it names, authenticated
    /// with a password. Fails with `NoSuchUser` or `BadCertificateRequest`.
    fn sign(
        &self,
        request: CertificateRequest,
        password: Bytes,
    ) -> BoxFuture<'static, Result<Certificate, CommandFailure>>;

    /// Produce a self-signed certificate for a domain this authority is
    /// authoritative over.
    fn identify(
        &self,
        subject: PeerAddress,
    ) -> BoxFuture<'static, Result<Certificate, CommandFailure>>;
}

/// Host-side behavior for the commands the engine cannot answer on its own.
///
/// State registered through `listen` and paths negotiated through
/// `bind_udp` are scoped to one physical connection's lifetime; persistence
/// across reconnects is the host's policy.
pub trait PeerService: Send + Sync {
    /// Register interest in inbound connections for the named protocols.
    fn listen(
        &self,
        from: PeerAddress,
        protocols: Vec<Bytes>,
        description: String,
    ) -> BoxFuture<'static, Result<(), CommandFailure>>;

    /// Negotiate a direct UDP path between peers. Fails with
    /// `ConnectionError`.
    fn bind_udp(
        &self,
        protocol: Bytes,
        src: PeerAddress,
        dst: PeerAddress,
        udp_src: HostPort,
        udp_dst: HostPort,
    ) -> BoxFuture<'static, Result<(), CommandFailure>>;

    /// Best guess of the caller's public IP.
    fn source_ip(&self) -> BoxFuture<'static, Result<Bytes, CommandFailure>>;

    /// How this side perceives the caller's transport address.
    fn who_am_i(&self) -> BoxFuture<'static, Result<HostPort, CommandFailure>>;

    /// The caller reports its own believed address.
    fn your_address(&self, address: HostPort) -> BoxFuture<'static, Result<(), CommandFailure>>;

    /// Accept an inbound virtual-channel establishment, supplying the
    /// transport the new channel will front. The transport is not started
    /// here; the engine starts it when the establishment answer is handed
    /// off for sending.
    fn accept_virtual(
        &self,
        id: u64,
    ) -> BoxFuture<'static, Result<Arc<dyn VirtualTransport>, CommandFailure>>;
}
