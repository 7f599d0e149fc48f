//! Virtual channel table and lifecycle.
//!
//! A channel moves `Pending` to `Open` to `Closed`, never backwards. The
//! `Pending` to `Open` transition fires exactly once, precisely when the
//! establishment answer is handed off for sending (outbound case) or
//! received (inbound case), and starts the channel's virtual transport
//! exactly once. Ids are unique for the whole connection lifetime; closed
//! ids stay in the table as tombstones so reuse is rejected.
//!
//! The table is shared with the [flow controller](crate::flow), which gates
//! data delivery on the same entries.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::error::CommandFailure;
use crate::flow::FlowState;
use crate::service::VirtualTransport;

/// Channel id, unique within one connection's lifetime.
pub type ChannelId = u64;

/// Lifecycle state of a virtual channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    /// Establishment sent or received; answer not yet confirmed sent.
    Pending,
    /// Answer confirmed sent or received; transport started.
    Open,
    /// Terminal.
    Closed,
}

pub(crate) struct ChannelEntry {
    pub state: ChannelState,
    pub transport: Arc<dyn VirtualTransport>,
    pub flow: FlowState,
}

/// Shared channel table; cloned into the manager and the flow controller.
#[derive(Clone)]
pub(crate) struct ChannelTable {
    pub inner: Arc<Mutex<HashMap<ChannelId, ChannelEntry>>>,
    pub choke_queue_capacity: usize,
}

impl ChannelTable {
    pub fn new(choke_queue_capacity: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(HashMap::new())),
            choke_queue_capacity,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<ChannelId, ChannelEntry>> {
        // state transitions are single assignments, safe to keep serving
        // after a panicked holder
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// Owns channel creation, the open transition, and teardown.
#[derive(Clone)]
pub struct VirtualChannelManager {
    table: ChannelTable,
}

impl VirtualChannelManager {
    pub(crate) fn new(table: ChannelTable) -> Self {
        Self { table }
    }

    /// Create a channel in `Pending`, holding the transport unstarted.
    ///
    /// # Errors
    ///
    /// `DuplicateChannelId` if the id was ever used on this connection; the
    /// existing channel's state is left unchanged.
    pub fn create(
        &self,
        id: ChannelId,
        transport: Arc<dyn VirtualTransport>,
    ) -> Result<(), CommandFailure> {
        let mut table = self.table.lock();
        if table.contains_key(&id) {
            return Err(CommandFailure::DuplicateChannelId(id));
        }
        table.insert(
            id,
            ChannelEntry {
                state: ChannelState::Pending,
                transport,
                flow: FlowState::new(),
            },
        );
        Ok(())
    }

    /// Transition `Pending` to `Open` and start the transport.
    ///
    /// Fires at most once per channel; calls on `Open` or `Closed` channels
    /// (or unknown ids) are no-ops.
    pub fn mark_open(&self, id: ChannelId) {
        let transport = {
            let mut table = self.table.lock();
            match table.get_mut(&id) {
                Some(entry) if entry.state == ChannelState::Pending => {
                    entry.state = ChannelState::Open;
                    entry.transport.clone()
                }
                Some(_) => return,
                None => {
                    tracing::debug!(id, "open transition for unknown channel");
                    return;
                }
            }
        };
        // start outside the lock
        transport.start();
    }

    /// Close a channel. Idempotent; closing a closed channel is a no-op.
    pub fn close(&self, id: ChannelId) {
        let mut table = self.table.lock();
        if let Some(entry) = table.get_mut(&id) {
            if entry.state != ChannelState::Closed {
                entry.state = ChannelState::Closed;
                entry.flow.discard();
            }
        }
    }

    /// Current state of a channel, if the id was ever used.
    pub fn state(&self, id: ChannelId) -> Option<ChannelState> {
        self.table.lock().get(&id).map(|entry| entry.state)
    }

    /// Close every channel. Called on connection teardown.
    pub fn teardown(&self) {
        let mut table = self.table.lock();
        for entry in table.values_mut() {
            if entry.state != ChannelState::Closed {
                entry.state = ChannelState::Closed;
                entry.flow.discard();
            }
        }
    }

    pub(crate) fn table(&self) -> ChannelTable {
        self.table.clone()
    }
}
