//! Connection builder and runtime loop.
//!
//! A [`Connection`] hosts the protocol engine over one ordered byte stream:
//! 1. Split the stream; spawn the serialized writer task
//! 2. Bind the protocol handlers to the host's collaborators
//! 3. Read boxes and route them: answers to waiting callers, requests to
//!    the dispatcher
//! 4. On stream close, read failure, or local shutdown: tear down
//!
//! Teardown is a cancellation point. Every caller awaiting an answer fails
//! with `ConnectionLost`, all virtual channels close, and no further boxes
//! are accepted or sent.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use peerwire::{Connection, ConnectionBuilder};
//!
//! #[tokio::main]
//! async fn main() -> peerwire::Result<()> {
//!     let stream = connect_to_peer().await;
//!     let conn = ConnectionBuilder::new(service, authority).start(stream);
//!
//!     let ip = conn.source_ip().await?;
//!     conn.open_virtual(7, Arc::new(transport)).await?;
//!
//!     conn.closed().await;
//!     Ok(())
//! }
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;

use crate::channel::{ChannelId, ChannelState, ChannelTable, VirtualChannelManager};
use crate::command::{
    decode_fields, encode_fields, protocol_registry, ArgValue, ArgValues, CommandKind,
    CommandRegistry,
};
use crate::dispatch::{
    CommandHandler, Dispatcher, HandlerFuture, Reply, DEFAULT_MAX_CONCURRENT_HANDLERS,
};
use crate::error::{CommandFailure, Result, WireError};
use crate::flow::{FlowController, DEFAULT_CHOKE_QUEUE_CAPACITY};
use crate::identity::{Certificate, CertificateRequest, HostPort, PeerAddress};
use crate::service::{CertAuthority, PeerService, VirtualTransport};
use crate::wire::{encode_box, BoxBuffer, WireBox};
use crate::writer::{spawn_writer_task, OutboundBox, WriterConfig, WriterHandle};

type PendingAsk = oneshot::Sender<Result<WireBox>>;

/// Builder for configuring and starting a connection.
pub struct ConnectionBuilder {
    service: Arc<dyn PeerService>,
    authority: Arc<dyn CertAuthority>,
    writer_config: WriterConfig,
    max_concurrent_handlers: usize,
    choke_queue_capacity: usize,
}

impl ConnectionBuilder {
    /// Create a builder over the host's collaborators.
    pub fn new(service: Arc<dyn PeerService>, authority: Arc<dyn CertAuthority>) -> Self {
        Self {
            service,
            authority,
            writer_config: WriterConfig::default(),
            max_concurrent_handlers: DEFAULT_MAX_CONCURRENT_HANDLERS,
            choke_queue_capacity: DEFAULT_CHOKE_QUEUE_CAPACITY,
        }
    }

    /// Maximum concurrently running command handlers. Default: 256.
    pub fn max_concurrent_handlers(mut self, limit: usize) -> Self {
        self.max_concurrent_handlers = limit;
        self
    }

    /// Maximum queued outbound boxes before backpressure. Default: 1024.
    pub fn max_pending_boxes(mut self, limit: usize) -> Self {
        self.writer_config.max_pending_boxes = limit;
        self
    }

    /// Writer channel capacity. Default: 1024.
    pub fn channel_capacity(mut self, capacity: usize) -> Self {
        self.writer_config.channel_capacity = capacity;
        self
    }

    /// How long outbound submissions wait out backpressure. Default: 5s.
    pub fn backpressure_timeout(mut self, timeout: Duration) -> Self {
        self.writer_config.backpressure_timeout = timeout;
        self
    }

    /// Capacity of each choked channel's deferred queue. Default: 64.
    pub fn choke_queue_capacity(mut self, capacity: usize) -> Self {
        self.choke_queue_capacity = capacity;
        self
    }

    /// Start the engine over the given byte stream.
    pub fn start<S>(self, stream: S) -> Connection
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let registry = protocol_registry();
        let (read_half, write_half) = tokio::io::split(stream);
        let (writer, writer_task) = spawn_writer_task(write_half, self.writer_config);

        let table = ChannelTable::new(self.choke_queue_capacity);
        let channels = VirtualChannelManager::new(table.clone());
        let flow = FlowController::new(table);

        let handlers = protocol_handlers(
            self.service,
            self.authority,
            channels.clone(),
            flow.clone(),
        );
        let dispatcher = Dispatcher::new(
            registry.clone(),
            handlers,
            writer.clone(),
            self.max_concurrent_handlers,
        );

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (done_tx, done_rx) = watch::channel(false);

        let shared = Arc::new(Shared {
            registry,
            writer,
            pending: Mutex::new(HashMap::new()),
            next_ask: AtomicU64::new(1),
            channels,
            flow,
            shutdown: shutdown_tx,
            done: done_rx,
        });

        tokio::spawn(read_loop(
            read_half,
            dispatcher,
            shared.clone(),
            shutdown_rx,
            done_tx,
            writer_task,
        ));

        Connection { inner: shared }
    }
}

struct Shared {
    registry: Arc<CommandRegistry>,
    writer: WriterHandle,
    pending: Mutex<HashMap<u64, PendingAsk>>,
    next_ask: AtomicU64,
    channels: VirtualChannelManager,
    flow: FlowController,
    shutdown: watch::Sender<bool>,
    done: watch::Receiver<bool>,
}

impl Shared {
    fn pending_lock(&self) -> MutexGuard<'_, HashMap<u64, PendingAsk>> {
        match self.pending.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// A running protocol engine bound to one physical connection.
///
/// Cheaply cloneable; all clones share the same connection state.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<Shared>,
}

impl Connection {
    /// Send a command and wait for its answer, decoded per the response
    /// schema. Commands that never answer resolve as soon as the request is
    /// queued.
    async fn call(
        &self,
        kind: CommandKind,
        values: Vec<(&'static str, ArgValue)>,
    ) -> Result<ArgValues> {
        if self.is_closed() {
            return Err(WireError::ConnectionLost);
        }
        let spec = *self.inner.registry.spec_for(kind)?;

        let ask = spec
            .answer_required
            .then(|| self.inner.next_ask.fetch_add(1, Ordering::Relaxed));

        let mut bx = WireBox::request(spec.name, ask);
        encode_fields(spec.arguments, &values, &mut bx)?;
        let data = encode_box(&bx)?;

        let waiter = ask.map(|id| {
            let (tx, rx) = oneshot::channel();
            self.inner.pending_lock().insert(id, tx);
            rx
        });

        if let Err(e) = self.inner.writer.send(OutboundBox::new(data)).await {
            if let Some(id) = ask {
                self.inner.pending_lock().remove(&id);
            }
            return Err(e);
        }

        let Some(waiter) = waiter else {
            return Ok(ArgValues::default());
        };

        let answer = waiter.await.map_err(|_| WireError::ConnectionLost)??;
        if let Some(name) = answer.error_name() {
            return Err(WireError::ErrorAnswer(name.to_string()));
        }
        decode_fields(spec.response, &answer)
    }

    /// Register interest in inbound connections for the named protocols.
    pub async fn listen(
        &self,
        from: PeerAddress,
        protocols: Vec<Bytes>,
        description: &str,
    ) -> Result<()> {
        self.call(
            CommandKind::Listen,
            vec![
                ("From", ArgValue::Address(from)),
                ("protocols", ArgValue::StrList(protocols)),
                ("description", ArgValue::Text(description.to_string())),
            ],
        )
        .await
        .map(|_| ())
    }

    /// Ask the peer for a self-signed certificate for a domain it is
    /// authoritative over.
    pub async fn identify(&self, subject: PeerAddress) -> Result<Certificate> {
        let values = self
            .call(
                CommandKind::Identify,
                vec![("subject", ArgValue::Address(subject))],
            )
            .await?;
        response_field(values.certificate("certificate").cloned(), "certificate")
    }

    /// Negotiate a direct UDP path between peers.
    pub async fn bind_udp(
        &self,
        protocol: Bytes,
        src: PeerAddress,
        dst: PeerAddress,
        udp_src: HostPort,
        udp_dst: HostPort,
    ) -> Result<()> {
        self.call(
            CommandKind::BindUdp,
            vec![
                ("protocol", ArgValue::Str(protocol)),
                ("q2qsrc", ArgValue::Address(src)),
                ("q2qdst", ArgValue::Address(dst)),
                ("udpsrc", ArgValue::HostPort(udp_src)),
                ("udpdst", ArgValue::HostPort(udp_dst)),
            ],
        )
        .await
        .map(|_| ())
    }

    /// Ask the peer for its best guess of our public IP.
    pub async fn source_ip(&self) -> Result<Bytes> {
        let values = self.call(CommandKind::SourceIp, Vec::new()).await?;
        response_field(values.str_bytes("ip").cloned(), "ip")
    }

    /// Have the peer sign a certificate request, authenticated by password.
    pub async fn sign(
        &self,
        request: CertificateRequest,
        password: Bytes,
    ) -> Result<Certificate> {
        let values = self
            .call(
                CommandKind::Sign,
                vec![
                    ("certificate_request", ArgValue::CertReq(request)),
                    ("password", ArgValue::Str(password)),
                ],
            )
            .await?;
        response_field(values.certificate("certificate").cloned(), "certificate")
    }

    /// Ask the peer how it perceives our transport address.
    pub async fn who_am_i(&self) -> Result<HostPort> {
        let values = self.call(CommandKind::WhoAmI, Vec::new()).await?;
        response_field(values.host_port("address").cloned(), "address")
    }

    /// Inform the peer of our own believed address.
    pub async fn your_address(&self, address: HostPort) -> Result<()> {
        self.call(
            CommandKind::YourAddress,
            vec![("address", ArgValue::HostPort(address))],
        )
        .await
        .map(|_| ())
    }

    /// Establish a virtual channel with a fresh id.
    ///
    /// The local channel is created `Pending` before the request goes out;
    /// when the peer's answer arrives the channel opens and `transport`
    /// receives its one `start` call. On failure the channel is closed and
    /// the id stays burned for this connection's lifetime.
    pub async fn open_virtual(
        &self,
        id: ChannelId,
        transport: Arc<dyn VirtualTransport>,
    ) -> Result<()> {
        self.inner
            .channels
            .create(id, transport)
            .map_err(|_| WireError::DuplicateChannel(id))?;

        let result = self
            .call(
                CommandKind::Virtual,
                vec![("id", ArgValue::Integer(signed_channel_id(id)?))],
            )
            .await;

        match result {
            Ok(_) => {
                self.inner.channels.mark_open(id);
                Ok(())
            }
            Err(e) => {
                self.inner.channels.close(id);
                Err(e)
            }
        }
    }

    /// Ask the peer to suspend delivery on a channel. Never answered.
    pub async fn choke(&self, id: ChannelId) -> Result<()> {
        self.call(
            CommandKind::Choke,
            vec![("id", ArgValue::Integer(signed_channel_id(id)?))],
        )
        .await
        .map(|_| ())
    }

    /// Ask the peer to resume delivery on a channel. Never answered.
    pub async fn unchoke(&self, id: ChannelId) -> Result<()> {
        self.call(
            CommandKind::Unchoke,
            vec![("id", ArgValue::Integer(signed_channel_id(id)?))],
        )
        .await
        .map(|_| ())
    }

    /// Deliver inbound application data to a local channel's transport,
    /// honoring its choke state.
    pub fn deliver(&self, id: ChannelId, data: Bytes) -> Result<()> {
        self.inner.flow.deliver(id, data)
    }

    /// Current state of a local channel, if the id was ever used.
    pub fn channel_state(&self, id: ChannelId) -> Option<ChannelState> {
        self.inner.channels.state(id)
    }

    /// Whether a local channel is currently choked.
    pub fn is_choked(&self, id: ChannelId) -> Option<bool> {
        self.inner.flow.is_choked(id)
    }

    /// Request teardown of this connection.
    pub fn shutdown(&self) {
        let _ = self.inner.shutdown.send(true);
    }

    /// Check whether the connection has been torn down.
    pub fn is_closed(&self) -> bool {
        *self.inner.done.borrow()
    }

    /// Wait until the connection has been torn down.
    pub async fn closed(&self) {
        let mut rx = self.inner.done.clone();
        while !*rx.borrow() {
            if rx.changed().await.is_err() {
                break;
            }
        }
    }
}

fn response_field<T>(value: Option<T>, name: &str) -> Result<T> {
    value.ok_or_else(|| WireError::MissingArgument(name.to_string()))
}

fn signed_channel_id(id: ChannelId) -> Result<i64> {
    i64::try_from(id).map_err(|_| WireError::BadArgument {
        name: "id".into(),
        reason: format!("channel id {} exceeds the wire integer range", id),
    })
}

/// Read boxes off the stream and route them until the connection dies.
async fn read_loop<R>(
    mut reader: R,
    dispatcher: Dispatcher,
    shared: Arc<Shared>,
    mut shutdown_rx: watch::Receiver<bool>,
    done_tx: watch::Sender<bool>,
    writer_task: JoinHandle<Result<()>>,
) where
    R: AsyncRead + Unpin,
{
    let mut box_buffer = BoxBuffer::new();
    let mut buf = vec![0u8; 64 * 1024];

    loop {
        tokio::select! {
            res = reader.read(&mut buf) => match res {
                Ok(0) => {
                    tracing::debug!("peer closed the stream");
                    break;
                }
                Ok(n) => {
                    let boxes = match box_buffer.push(&buf[..n]) {
                        Ok(boxes) => boxes,
                        Err(e) => {
                            // protocol-level, not fatal; resync at the next read
                            tracing::warn!(error = %e, "malformed box, discarding buffered bytes");
                            box_buffer.clear();
                            continue;
                        }
                    };
                    for bx in boxes {
                        route_inbound(&dispatcher, &shared, bx).await;
                    }
                }
                Err(e) => {
                    tracing::error!(error = %e, "read failed");
                    break;
                }
            },
            _ = shutdown_rx.changed() => {
                tracing::debug!("local shutdown requested");
                break;
            }
        }
    }

    teardown(&shared);
    writer_task.abort();
    let _ = done_tx.send(true);
}

async fn route_inbound(dispatcher: &Dispatcher, shared: &Arc<Shared>, bx: WireBox) {
    if bx.is_answer() {
        let Some(id) = bx.answer_id() else {
            tracing::debug!("dropping answer box with unparseable id");
            return;
        };
        match shared.pending_lock().remove(&id) {
            Some(tx) => {
                let _ = tx.send(Ok(bx));
            }
            None => tracing::warn!(id, "uncorrelated answer"),
        }
    } else if bx.is_request() {
        dispatcher.dispatch(bx).await;
    } else {
        tracing::debug!("dropping box with neither command nor answer id");
    }
}

/// Fail outstanding callers and close every channel.
fn teardown(shared: &Arc<Shared>) {
    let pending: Vec<PendingAsk> = {
        let mut map = shared.pending_lock();
        map.drain().map(|(_, tx)| tx).collect()
    };
    for tx in pending {
        let _ = tx.send(Err(WireError::ConnectionLost));
    }
    shared.channels.teardown();
}

/// Bind the protocol catalogue's handlers to the host collaborators.
///
/// The channel and flow commands are answered by the engine itself; the
/// rest delegate to the [`PeerService`] and [`CertAuthority`].
fn protocol_handlers(
    service: Arc<dyn PeerService>,
    authority: Arc<dyn CertAuthority>,
    channels: VirtualChannelManager,
    flow: FlowController,
) -> HashMap<CommandKind, Arc<dyn CommandHandler>> {
    let mut handlers: HashMap<CommandKind, Arc<dyn CommandHandler>> = HashMap::new();

    let svc = service.clone();
    let mgr = channels.clone();
    handlers.insert(
        CommandKind::Virtual,
        Arc::new(move |args: ArgValues| -> HandlerFuture {
            let svc = svc.clone();
            let mgr = mgr.clone();
            Box::pin(async move {
                let id = channel_id_arg(&args)?;
                let transport = svc.accept_virtual(id).await?;
                mgr.create(id, transport)?;
                // the transport starts when the answer is handed off, not here
                let opener = mgr.clone();
                Ok(Reply::empty().on_sent(move || opener.mark_open(id)))
            })
        }),
    );

    let choker = flow.clone();
    handlers.insert(
        CommandKind::Choke,
        Arc::new(move |args: ArgValues| -> HandlerFuture {
            let flow = choker.clone();
            Box::pin(async move {
                let id = channel_id_arg(&args)?;
                flow.choke(id)?;
                Ok(Reply::empty())
            })
        }),
    );

    let unchoker = flow.clone();
    handlers.insert(
        CommandKind::Unchoke,
        Arc::new(move |args: ArgValues| -> HandlerFuture {
            let flow = unchoker.clone();
            Box::pin(async move {
                let id = channel_id_arg(&args)?;
                flow.unchoke(id)?;
                Ok(Reply::empty())
            })
        }),
    );

    let svc = service.clone();
    handlers.insert(
        CommandKind::Listen,
        Arc::new(move |args: ArgValues| -> HandlerFuture {
            let svc = svc.clone();
            Box::pin(async move {
                let from = args.address("From").cloned().ok_or_else(|| missing("From"))?;
                let protocols = args
                    .str_list("protocols")
                    .map(<[Bytes]>::to_vec)
                    .ok_or_else(|| missing("protocols"))?;
                let description = args
                    .text("description")
                    .map(str::to_string)
                    .ok_or_else(|| missing("description"))?;
                svc.listen(from, protocols, description).await?;
                Ok(Reply::empty())
            })
        }),
    );

    let svc = service.clone();
    handlers.insert(
        CommandKind::BindUdp,
        Arc::new(move |args: ArgValues| -> HandlerFuture {
            let svc = svc.clone();
            Box::pin(async move {
                let protocol = args
                    .str_bytes("protocol")
                    .cloned()
                    .ok_or_else(|| missing("protocol"))?;
                let src = args.address("q2qsrc").cloned().ok_or_else(|| missing("q2qsrc"))?;
                let dst = args.address("q2qdst").cloned().ok_or_else(|| missing("q2qdst"))?;
                let udp_src = args
                    .host_port("udpsrc")
                    .cloned()
                    .ok_or_else(|| missing("udpsrc"))?;
                let udp_dst = args
                    .host_port("udpdst")
                    .cloned()
                    .ok_or_else(|| missing("udpdst"))?;
                svc.bind_udp(protocol, src, dst, udp_src, udp_dst).await?;
                Ok(Reply::empty())
            })
        }),
    );

    let svc = service.clone();
    handlers.insert(
        CommandKind::SourceIp,
        Arc::new(move |_args: ArgValues| -> HandlerFuture {
            let svc = svc.clone();
            Box::pin(async move {
                let ip = svc.source_ip().await?;
                Ok(Reply::empty().field("ip", ArgValue::Str(ip)))
            })
        }),
    );

    let svc = service.clone();
    handlers.insert(
        CommandKind::WhoAmI,
        Arc::new(move |_args: ArgValues| -> HandlerFuture {
            let svc = svc.clone();
            Box::pin(async move {
                let address = svc.who_am_i().await?;
                Ok(Reply::empty().field("address", ArgValue::HostPort(address)))
            })
        }),
    );

    let svc = service;
    handlers.insert(
        CommandKind::YourAddress,
        Arc::new(move |args: ArgValues| -> HandlerFuture {
            let svc = svc.clone();
            Box::pin(async move {
                let address = args
                    .host_port("address")
                    .cloned()
                    .ok_or_else(|| missing("address"))?;
                svc.your_address(address).await?;
                Ok(Reply::empty())
            })
        }),
    );

    let auth = authority.clone();
    handlers.insert(
        CommandKind::Identify,
        Arc::new(move |args: ArgValues| -> HandlerFuture {
            let auth = auth.clone();
            Box::pin(async move {
                let subject = args
                    .address("subject")
                    .cloned()
                    .ok_or_else(|| missing("subject"))?;
                let certificate = auth.identify(subject).await?;
                Ok(Reply::empty().field("certificate", ArgValue::Cert(certificate)))
            })
        }),
    );

    let auth = authority;
    handlers.insert(
        CommandKind::Sign,
        Arc::new(move |args: ArgValues| -> HandlerFuture {
            let auth = auth.clone();
            Box::pin(async move {
                let request = args
                    .certificate_request("certificate_request")
                    .cloned()
                    .ok_or_else(|| missing("certificate_request"))?;
                let password = args
                    .str_bytes("password")
                    .cloned()
                    .ok_or_else(|| missing("password"))?;
                let certificate = auth.sign(request, password).await?;
                Ok(Reply::empty().field("certificate", ArgValue::Cert(certificate)))
            })
        }),
    );

    handlers
}

fn channel_id_arg(args: &ArgValues) -> std::result::Result<ChannelId, CommandFailure> {
    args.channel_id("id")
        .ok_or_else(|| CommandFailure::Unhandled("channel id out of range".into()))
}

fn missing(name: &str) -> CommandFailure {
    CommandFailure::Unhandled(format!("decoded field absent: {}", name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::BoxFuture;

    struct NullService;

    impl PeerService for NullService {
        fn listen(
            &self,
            _from: PeerAddress,
            _protocols: Vec<Bytes>,
            _description: String,
        ) -> BoxFuture<'static, std::result::Result<(), CommandFailure>> {
            Box::pin(async { Ok(()) })
        }

        fn bind_udp(
            &self,
            _protocol: Bytes,
            _src: PeerAddress,
            _dst: PeerAddress,
            _udp_src: HostPort,
            _udp_dst: HostPort,
        ) -> BoxFuture<'static, std::result::Result<(), CommandFailure>> {
            Box::pin(async { Ok(()) })
        }

        fn source_ip(&self) -> BoxFuture<'static, std::result::Result<Bytes, CommandFailure>> {
            Box::pin(async { Ok(Bytes::from_static(b"192.0.2.1")) })
        }

        fn who_am_i(&self) -> BoxFuture<'static, std::result::Result<HostPort, CommandFailure>> {
            Box::pin(async { Ok("192.0.2.1:1024".parse().expect("host:port")) })
        }

        fn your_address(
            &self,
            _address: HostPort,
        ) -> BoxFuture<'static, std::result::Result<(), CommandFailure>> {
            Box::pin(async { Ok(()) })
        }

        fn accept_virtual(
            &self,
            _id: u64,
        ) -> BoxFuture<'static, std::result::Result<Arc<dyn VirtualTransport>, CommandFailure>>
        {
            Box::pin(async { Err(CommandFailure::Unhandled("no transports here".into())) })
        }
    }

    struct NullAuthority;

    impl CertAuthority for NullAuthority {
        fn sign(
            &self,
            _request: CertificateRequest,
            _password: Bytes,
        ) -> BoxFuture<'static, std::result::Result<Certificate, CommandFailure>> {
            Box::pin(async { Err(CommandFailure::NoSuchUser) })
        }

        fn identify(
            &self,
            _subject: PeerAddress,
        ) -> BoxFuture<'static, std::result::Result<Certificate, CommandFailure>> {
            Box::pin(async { Ok(Certificate::from_bytes(b"cert".to_vec())) })
        }
    }

    fn builder() -> ConnectionBuilder {
        ConnectionBuilder::new(Arc::new(NullService), Arc::new(NullAuthority))
    }

    #[test]
    fn test_builder_configuration() {
        let b = builder()
            .max_concurrent_handlers(512)
            .max_pending_boxes(2048)
            .channel_capacity(512)
            .backpressure_timeout(Duration::from_secs(10))
            .choke_queue_capacity(8);

        assert_eq!(b.max_concurrent_handlers, 512);
        assert_eq!(b.writer_config.max_pending_boxes, 2048);
        assert_eq!(b.writer_config.channel_capacity, 512);
        assert_eq!(b.writer_config.backpressure_timeout, Duration::from_secs(10));
        assert_eq!(b.choke_queue_capacity, 8);
    }

    #[test]
    fn test_protocol_handlers_cover_catalogue() {
        let table = ChannelTable::new(4);
        let handlers = protocol_handlers(
            Arc::new(NullService),
            Arc::new(NullAuthority),
            VirtualChannelManager::new(table.clone()),
            FlowController::new(table),
        );
        for kind in CommandKind::ALL {
            assert!(handlers.contains_key(&kind), "{:?} unbound", kind);
        }
    }

    #[tokio::test]
    async fn test_shutdown_fails_pending_callers() {
        let (local, _remote) = tokio::io::duplex(4096);
        let conn = builder().start(local);

        // nobody will ever answer; teardown must fail the caller
        let pending = {
            let conn = conn.clone();
            tokio::spawn(async move { conn.source_ip().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        conn.shutdown();
        conn.closed().await;

        let result = pending.await.expect("caller task");
        assert!(matches!(result, Err(WireError::ConnectionLost)));
        assert!(conn.is_closed());
    }

    #[tokio::test]
    async fn test_calls_after_teardown_fail_fast() {
        let (local, remote) = tokio::io::duplex(4096);
        let conn = builder().start(local);

        drop(remote); // peer goes away
        conn.closed().await;

        let result = conn.source_ip().await;
        assert!(matches!(result, Err(WireError::ConnectionLost)));
    }

    #[tokio::test]
    async fn test_open_virtual_duplicate_id_fails_locally() {
        use std::sync::atomic::AtomicUsize;

        struct IdleTransport(AtomicUsize);
        impl VirtualTransport for IdleTransport {
            fn start(&self) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
            fn deliver(&self, _data: Bytes) {}
        }

        let (local, _remote) = tokio::io::duplex(4096);
        let conn = builder().start(local);

        // first establishment stays pending (no peer answer);
        // a second use of the id must fail without touching it
        let first = {
            let conn = conn.clone();
            tokio::spawn(async move {
                conn.open_virtual(7, Arc::new(IdleTransport(AtomicUsize::new(0))))
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(conn.channel_state(7), Some(ChannelState::Pending));

        let err = conn
            .open_virtual(7, Arc::new(IdleTransport(AtomicUsize::new(0))))
            .await
            .unwrap_err();
        assert!(matches!(err, WireError::DuplicateChannel(7)));
        assert_eq!(conn.channel_state(7), Some(ChannelState::Pending));

        conn.shutdown();
        conn.closed().await;
        let result = first.await.expect("first open task");
        assert!(result.is_err());
    }
}
