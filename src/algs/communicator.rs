//! Message passing between pipeline stages.
//!
//! Messages are contiguous byte runs holding whole tokens. Every graph id
//! owns one inbox; sending appends the message to the inbox of each
//! destination in call order. The serial implementation is a drop-in point
//! for a network transport: stages only see [`TopoCommunicator`].

use bytes::Bytes;
use dashmap::DashMap;

use crate::GraphId;
use crate::algs::fifo::FifoBuffer;
use crate::topo_error::TopoError;

/// Transport used by topology streams.
pub trait TopoCommunicator: Send + Sync {
    /// Register an inbox for `id`.
    fn connect(&self, id: GraphId) -> Result<(), TopoError>;

    fn is_connected(&self, id: GraphId) -> bool;

    /// Deliver `message` to every destination.
    fn send(&self, destinations: &[GraphId], message: Bytes) -> Result<(), TopoError>;

    /// Move everything pending for `id` into `out`; returns the byte count.
    fn drain_into(&self, id: GraphId, out: &mut FifoBuffer) -> Result<usize, TopoError>;
}

/// In-process communicator; inboxes are sharded so concurrent local stages
/// can send without a global lock.
#[derive(Debug, Default)]
pub struct SerialCommunicator {
    inboxes: DashMap<GraphId, FifoBuffer>,
}

impl SerialCommunicator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes waiting for `id`, or `None` if it is not connected.
    pub fn pending(&self, id: GraphId) -> Option<usize> {
        self.inboxes.get(&id).map(|f| f.len())
    }

    pub fn connected_count(&self) -> usize {
        self.inboxes.len()
    }
}

impl TopoCommunicator for SerialCommunicator {
    fn connect(&self, id: GraphId) -> Result<(), TopoError> {
        use dashmap::mapref::entry::Entry;
        match self.inboxes.entry(id) {
            Entry::Occupied(_) => Err(TopoError::AlreadyConnected(id)),
            Entry::Vacant(v) => {
                v.insert(FifoBuffer::new());
                Ok(())
            }
        }
    }

    fn is_connected(&self, id: GraphId) -> bool {
        self.inboxes.contains_key(&id)
    }

    fn send(&self, destinations: &[GraphId], message: Bytes) -> Result<(), TopoError> {
        // validate first so a bad id does not leave a partial delivery
        if let Some(&missing) = destinations.iter().find(|&&d| !self.inboxes.contains_key(&d)) {
            return Err(TopoError::UnknownGraph(missing));
        }
        for d in destinations {
            if let Some(mut inbox) = self.inboxes.get_mut(d) {
                inbox.push(&message);
            }
        }
        log::trace!("sent {} bytes to {:?}", message.len(), destinations);
        Ok(())
    }

    fn drain_into(&self, id: GraphId, out: &mut FifoBuffer) -> Result<usize, TopoError> {
        let mut inbox = self
            .inboxes
            .get_mut(&id)
            .ok_or(TopoError::UnknownGraph(id))?;
        Ok(inbox.transfer_to(out))
    }
}
