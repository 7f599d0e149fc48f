//! Per-channel flow control: choke, unchoke, and gated delivery.
//!
//! A choked channel stays open but stops delivering inbound application
//! data to its virtual transport; data arriving meanwhile is queued in a
//! bounded buffer and flushed in order on unchoke. Choke and unchoke are
//! idempotent and only valid on `Open` channels.

use std::collections::VecDeque;

use bytes::Bytes;

use crate::channel::{ChannelId, ChannelState, ChannelTable};
use crate::error::{CommandFailure, Result, WireError};

/// Default capacity of a choked channel's deferred-delivery queue.
pub const DEFAULT_CHOKE_QUEUE_CAPACITY: usize = 64;

/// Per-channel choke state. Default unchoked, queue empty.
#[derive(Debug)]
pub(crate) struct FlowState {
    choked: bool,
    deferred: VecDeque<Bytes>,
}

impl FlowState {
    pub fn new() -> Self {
        Self {
            choked: false,
            deferred: VecDeque::new(),
        }
    }

    pub fn is_choked(&self) -> bool {
        self.choked
    }

    pub fn choke(&mut self) {
        self.choked = true;
    }

    /// Clear the choked flag and hand back the deferred payloads in order.
    pub fn unchoke(&mut self) -> Vec<Bytes> {
        self.choked = false;
        self.deferred.drain(..).collect()
    }

    /// Queue a payload while choked. `Err` when the queue is at capacity.
    pub fn defer(&mut self, data: Bytes, capacity: usize) -> std::result::Result<(), Bytes> {
        if self.deferred.len() >= capacity {
            return Err(data);
        }
        self.deferred.push_back(data);
        Ok(())
    }

    pub fn discard(&mut self) {
        self.deferred.clear();
    }
}

/// Choke/unchoke entry points and the gated delivery path.
///
/// Shares the channel table with the
/// [`VirtualChannelManager`](crate::channel::VirtualChannelManager).
#[derive(Clone)]
pub struct FlowController {
    table: ChannelTable,
}

impl FlowController {
    pub(crate) fn new(table: ChannelTable) -> Self {
        Self { table }
    }

    /// Suspend delivery on a channel. Idempotent.
    ///
    /// # Errors
    ///
    /// `UnknownChannel` unless the channel is `Open`.
    pub fn choke(&self, id: ChannelId) -> std::result::Result<(), CommandFailure> {
        let mut table = self.table_lock();
        match table.get_mut(&id) {
            Some(entry) if entry.state == ChannelState::Open => {
                entry.flow.choke();
                Ok(())
            }
            _ => Err(CommandFailure::UnknownChannel(id)),
        }
    }

    /// Resume delivery on a channel, flushing deferred data in order.
    /// Idempotent.
    ///
    /// # Errors
    ///
    /// `UnknownChannel` unless the channel is `Open`.
    pub fn unchoke(&self, id: ChannelId) -> std::result::Result<(), CommandFailure> {
        let (transport, deferred) = {
            let mut table = self.table_lock();
            let entry = match table.get_mut(&id) {
                Some(entry) if entry.state == ChannelState::Open => entry,
                _ => return Err(CommandFailure::UnknownChannel(id)),
            };
            (entry.transport.clone(), entry.flow.unchoke())
        };
        for data in deferred {
            transport.deliver(data);
        }
        Ok(())
    }

    /// Whether the channel is currently choked. `None` for unknown ids.
    pub fn is_choked(&self, id: ChannelId) -> Option<bool> {
        self.table_lock().get(&id).map(|entry| entry.flow.is_choked())
    }

    /// Deliver inbound application data to a channel's transport, or queue
    /// it if the channel is choked.
    ///
    /// # Errors
    ///
    /// `UnknownChannel` unless the channel is `Open`; `ChokeQueueFull` when
    /// a choked channel's queue is at capacity. The overflow policy belongs
    /// to the caller; this layer neither drops data silently nor closes the
    /// channel.
    pub fn deliver(&self, id: ChannelId, data: Bytes) -> Result<()> {
        let transport = {
            let mut table = self.table_lock();
            let entry = match table.get_mut(&id) {
                Some(entry) if entry.state == ChannelState::Open => entry,
                _ => return Err(WireError::UnknownChannel(id)),
            };
            if entry.flow.is_choked() {
                return match entry.flow.defer(data, self.table.choke_queue_capacity) {
                    Ok(()) => Ok(()),
                    Err(_) => Err(WireError::ChokeQueueFull(id)),
                };
            }
            entry.transport.clone()
        };
        transport.deliver(data);
        Ok(())
    }

    fn table_lock(
        &self,
    ) -> std::sync::MutexGuard<'_, std::collections::HashMap<ChannelId, crate::channel::ChannelEntry>>
    {
        match self.table.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::VirtualChannelManager;
    use crate::service::VirtualTransport;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct RecordingTransport {
        started: AtomicUsize,
        delivered: Mutex<Vec<Bytes>>,
    }

    impl VirtualTransport for RecordingTransport {
        fn start(&self) {
            self.started.fetch_add(1, Ordering::SeqCst);
        }

        fn deliver(&self, data: Bytes) {
            self.delivered.lock().expect("delivered lock").push(data);
        }
    }

    fn open_channel(
        capacity: usize,
    ) -> (VirtualChannelManager, FlowController, Arc<RecordingTransport>) {
        let table = ChannelTable::new(capacity);
        let mgr = VirtualChannelManager::new(table.clone());
        let flow = FlowController::new(table);
        let transport = Arc::new(RecordingTransport::default());
        mgr.create(7, transport.clone()).expect("create channel");
        mgr.mark_open(7);
        (mgr, flow, transport)
    }

    #[test]
    fn test_deliver_unchoked_passes_through() {
        let (_mgr, flow, transport) = open_channel(4);

        flow.deliver(7, Bytes::from_static(b"one")).unwrap();
        flow.deliver(7, Bytes::from_static(b"two")).unwrap();

        let delivered = transport.delivered.lock().unwrap();
        assert_eq!(&delivered[..], &[Bytes::from_static(b"one"), Bytes::from_static(b"two")]);
    }

    #[test]
    fn test_choke_defers_until_unchoke() {
        let (_mgr, flow, transport) = open_channel(4);

        flow.choke(7).unwrap();
        flow.deliver(7, Bytes::from_static(b"a")).unwrap();
        flow.deliver(7, Bytes::from_static(b"b")).unwrap();
        assert!(transport.delivered.lock().unwrap().is_empty());

        flow.unchoke(7).unwrap();
        let delivered = transport.delivered.lock().unwrap();
        assert_eq!(
            &delivered[..],
            &[Bytes::from_static(b"a"), Bytes::from_static(b"b")]
        );
    }

    #[test]
    fn test_choke_unchoke_equivalent_to_noop_for_delivery() {
        let (_mgr, flow, transport) = open_channel(8);

        flow.deliver(7, Bytes::from_static(b"1")).unwrap();
        flow.choke(7).unwrap();
        flow.deliver(7, Bytes::from_static(b"2")).unwrap();
        flow.unchoke(7).unwrap();
        flow.deliver(7, Bytes::from_static(b"3")).unwrap();

        let delivered = transport.delivered.lock().unwrap();
        let expected: Vec<Bytes> = vec![
            Bytes::from_static(b"1"),
            Bytes::from_static(b"2"),
            Bytes::from_static(b"3"),
        ];
        assert_eq!(&delivered[..], &expected[..]);
    }

    #[test]
    fn test_choke_is_idempotent() {
        let (_mgr, flow, _transport) = open_channel(4);

        flow.choke(7).unwrap();
        flow.choke(7).unwrap();
        assert_eq!(flow.is_choked(7), Some(true));

        flow.unchoke(7).unwrap();
        flow.unchoke(7).unwrap();
        assert_eq!(flow.is_choked(7), Some(false));
    }

    #[test]
    fn test_unknown_channel_rejected() {
        let (_mgr, flow, _transport) = open_channel(4);

        assert!(matches!(
            flow.choke(99),
            Err(CommandFailure::UnknownChannel(99))
        ));
        assert!(matches!(
            flow.unchoke(99),
            Err(CommandFailure::UnknownChannel(99))
        ));
        assert!(matches!(
            flow.deliver(99, Bytes::new()),
            Err(WireError::UnknownChannel(99))
        ));
    }

    #[test]
    fn test_pending_channel_is_unknown_to_flow() {
        let table = ChannelTable::new(4);
        let mgr = VirtualChannelManager::new(table.clone());
        let flow = FlowController::new(table);
        mgr.create(1, Arc::new(RecordingTransport::default()))
            .unwrap();

        assert!(matches!(
            flow.choke(1),
            Err(CommandFailure::UnknownChannel(1))
        ));
    }

    #[test]
    fn test_queue_overflow_surfaces() {
        let (_mgr, flow, _transport) = open_channel(2);

        flow.choke(7).unwrap();
        flow.deliver(7, Bytes::from_static(b"a")).unwrap();
        flow.deliver(7, Bytes::from_static(b"b")).unwrap();
        let err = flow.deliver(7, Bytes::from_static(b"c")).unwrap_err();
        assert!(matches!(err, WireError::ChokeQueueFull(7)));
    }

    #[test]
    fn test_closed_channel_rejects_flow_ops() {
        let (mgr, flow, _transport) = open_channel(4);
        mgr.close(7);

        assert!(flow.choke(7).is_err());
        assert!(flow.deliver(7, Bytes::new()).is_err());
    }
}
