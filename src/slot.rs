//! The fixed-size socket context table.

use std::collections::VecDeque;
use std::net::SocketAddr;

use crate::buffer::Buffer;
use crate::raw::RawSocket;

/// The state of one socket slot's connection/listening lifecycle.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum SlotState {
    Closed,
    Connecting,
    Connected,
    Listening,
    /// Just accepted, waiting for the upstream `AcceptedConnection` event
    /// to associate it with a connection id.
    Accepted,
}

/// One entry of the socket context table.
pub struct Slot {
    pub socket_idx: usize,
    pub in_use: bool,
    pub state: SlotState,
    pub socket: Option<RawSocket>,
    /// Opaque upstream identifier: a secure-channel connection index for
    /// connections, an endpoint index for listeners, and (transiently,
    /// while `state == Accepted`) the parent listener's endpoint index.
    pub connection_id: usize,
    pub is_server_connection: bool,
    pub listener_socket_idx: Option<usize>,
    pub listener_connections: usize,
    pub write_queue: Option<VecDeque<Buffer>>,
    pub is_not_writable: bool,
    pub connect_addrs: Option<Vec<SocketAddr>>,
    pub next_connect_attempt_addr: usize,
}

impl Slot {
    fn new(socket_idx: usize) -> Slot {
        Slot {
            socket_idx,
            in_use: false,
            state: SlotState::Closed,
            socket: None,
            connection_id: 0,
            is_server_connection: false,
            listener_socket_idx: None,
            listener_connections: 0,
            write_queue: None,
            is_not_writable: false,
            connect_addrs: None,
            next_connect_attempt_addr: 0,
        }
    }

    fn reset(&mut self) {
        let idx = self.socket_idx;
        *self = Slot::new(idx);
    }
}

/// The fixed-size socket context table, indexed 1..len (index 0 reserved).
pub struct SocketTable {
    slots: Vec<Slot>,
}

impl SocketTable {
    pub fn new(max_sockets: usize) -> SocketTable {
        let slots = (0..max_sockets.max(1)).map(Slot::new).collect();
        SocketTable { slots }
    }

    pub fn get(&self, idx: usize) -> Option<&Slot> {
        self.slots.get(idx).filter(|s| idx != 0)
    }

    pub fn get_mut(&mut self, idx: usize) -> Option<&mut Slot> {
        if idx == 0 {
            return None;
        }
        self.slots.get_mut(idx)
    }

    /// Finds the first free slot (index >= 1), marks it in use, and (for
    /// non-listeners) gives it an empty write queue.
    pub fn get_free(&mut self, is_listener: bool) -> Option<&mut Slot> {
        let idx = self.slots.iter().skip(1).position(|s| !s.in_use)? + 1;
        let slot = &mut self.slots[idx];
        slot.in_use = true;
        slot.state = SlotState::Closed;
        if !is_listener {
            slot.write_queue = Some(VecDeque::new());
        }
        Some(slot)
    }

    /// Closes `idx`: drops the socket and any queued buffers, decrements
    /// the parent listener's connection count if this was a server
    /// connection, then resets the slot but keeps its index.
    pub fn close(&mut self, idx: usize) {
        let listener_idx = match self.slots.get(idx) {
            Some(slot) if slot.is_server_connection => slot.listener_socket_idx,
            _ => None,
        };
        if let Some(slot) = self.slots.get_mut(idx) {
            slot.reset();
        }
        if let Some(listener_idx) = listener_idx {
            if let Some(listener) = self.slots.get_mut(listener_idx) {
                listener.listener_connections = listener.listener_connections.saturating_sub(1);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn iter_in_use(&self) -> impl Iterator<Item = &Slot> {
        self.slots.iter().skip(1).filter(|s| s.in_use)
    }

    pub fn iter_in_use_mut(&mut self) -> impl Iterator<Item = &mut Slot> {
        self.slots.iter_mut().skip(1).filter(|s| s.in_use)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_free_starts_at_index_one() {
        let mut table = SocketTable::new(4);
        let slot = table.get_free(false).unwrap();
        assert_eq!(slot.socket_idx, 1);
        assert!(slot.write_queue.is_some());
    }

    #[test]
    fn listener_slots_have_no_write_queue() {
        let mut table = SocketTable::new(4);
        let slot = table.get_free(true).unwrap();
        assert!(slot.write_queue.is_none());
    }

    #[test]
    fn close_resets_but_keeps_index() {
        let mut table = SocketTable::new(4);
        table.get_free(false).unwrap();
        table.close(1);
        let slot = table.get(1).unwrap();
        assert!(!slot.in_use);
        assert_eq!(slot.socket_idx, 1);
    }

    #[test]
    fn close_decrements_listener_connection_count() {
        let mut table = SocketTable::new(4);
        table.get_free(true).unwrap(); // idx 1, listener
        {
            let listener = table.get_mut(1).unwrap();
            listener.listener_connections = 1;
        }
        let accepted_idx = table.get_free(false).unwrap().socket_idx; // idx 2
        {
            let accepted = table.get_mut(accepted_idx).unwrap();
            accepted.is_server_connection = true;
            accepted.listener_socket_idx = Some(1);
        }
        table.close(accepted_idx);
        assert_eq!(table.get(1).unwrap().listener_connections, 0);
    }

    #[test]
    fn index_zero_is_never_handed_out() {
        let mut table = SocketTable::new(2);
        assert!(table.get(0).is_none());
        let slot = table.get_free(false).unwrap();
        assert_ne!(slot.socket_idx, 0);
    }

    #[test]
    fn table_exhaustion_returns_none() {
        let mut table = SocketTable::new(2);
        table.get_free(false).unwrap();
        assert!(table.get_free(false).is_none());
    }
}
