//! The sockets event manager: external input-event dispatch, internal
//! readiness dispatch, and the write-queue drain algorithm.

use std::net::SocketAddr;

use log::{debug, trace, warn};

use crate::buffer::Buffer;
use crate::events::{InputEvent, InternalEvent, OutputEvent, OutputHandler};
use crate::raw::{self, ReadOutcome, RawSocket, WriteOutcome};
use crate::slot::{Slot, SlotState, SocketTable};
use crate::uri::{self, Scheme};

/// Everything the dispatcher needs to process one event; borrowed fresh
/// for the duration of a single `dispatch_*` call.
pub struct DispatchContext<'a> {
    pub table: &'a mut SocketTable,
    pub max_socket_connections: usize,
    pub min_read_buffer: usize,
    pub max_buffer: usize,
    pub uri_max_len: usize,
    pub output: &'a OutputHandler,
}

impl<'a> DispatchContext<'a> {
    fn emit(&self, event: OutputEvent) {
        (self.output)(event);
    }
}

pub fn dispatch_input_event(ctx: &mut DispatchContext, event: InputEvent) {
    match event {
        InputEvent::CreateListener {
            endpoint_config_idx,
            uri,
            listen_all_interfaces,
        } => create_listener(ctx, endpoint_config_idx, &uri, listen_all_interfaces),
        InputEvent::CreateClient { connection_id, uri } => {
            create_client(ctx, connection_id, &uri)
        }
        InputEvent::AcceptedConnection {
            slot_idx,
            connection_id,
        } => accepted_connection(ctx, slot_idx, connection_id),
        InputEvent::Close {
            slot_idx,
            connection_id,
        } => close(ctx, slot_idx, connection_id),
        InputEvent::CloseListener {
            slot_idx,
            endpoint_config_idx,
        } => close_listener(ctx, slot_idx, endpoint_config_idx),
        InputEvent::Write { slot_idx, buffer } => write(ctx, slot_idx, buffer),
    }
}

pub fn dispatch_internal_event(ctx: &mut DispatchContext, event: InternalEvent) {
    match event {
        InternalEvent::ListenerConnectionAttempt { slot_idx } => {
            listener_connection_attempt(ctx, slot_idx)
        }
        InternalEvent::ConnectionAttemptFailed { slot_idx } => {
            connection_attempt_failed(ctx, slot_idx)
        }
        InternalEvent::Connected { slot_idx } => connected(ctx, slot_idx),
        InternalEvent::Close { slot_idx } => internal_close(ctx, slot_idx),
        InternalEvent::ReadyToRead { slot_idx } => ready_to_read(ctx, slot_idx),
        InternalEvent::ReadyToWrite { slot_idx } => ready_to_write(ctx, slot_idx),
    }
}

// ---------------------------------------------------------------------
// External events
// ---------------------------------------------------------------------

fn create_listener(
    ctx: &mut DispatchContext,
    endpoint_config_idx: usize,
    uri: &str,
    listen_all_interfaces: bool,
) {
    let (scheme, host, port) = match uri::split_uri_with_max_len(uri, ctx.uri_max_len) {
        Ok(parsed) => parsed,
        Err(err) => {
            warn!("invalid listener uri {:?}: {}", uri, err);
            ctx.emit(OutputEvent::ListenerFailure { endpoint_config_idx });
            return;
        }
    };
    if scheme != Scheme::TcpUa {
        warn!("listener uri {:?} is not opc.tcp", uri);
        ctx.emit(OutputEvent::ListenerFailure { endpoint_config_idx });
        return;
    }

    let resolve_host = if listen_all_interfaces { "0.0.0.0" } else { &host };
    let addrs = match raw::resolve(resolve_host, &port) {
        Ok(addrs) => addrs,
        Err(err) => {
            warn!("failed to resolve listener uri {:?}: {}", uri, err);
            ctx.emit(OutputEvent::ListenerFailure { endpoint_config_idx });
            return;
        }
    };

    let slot = match ctx.table.get_free(true) {
        Some(slot) => slot,
        None => {
            warn!("no free socket slot for listener {}", endpoint_config_idx);
            ctx.emit(OutputEvent::ListenerFailure { endpoint_config_idx });
            return;
        }
    };
    let slot_idx = slot.socket_idx;

    // IPv6 addresses were sorted first by `raw::resolve`; try them before
    // falling back to IPv4, matching the server-socket creation fallback.
    let mut opened = false;
    for addr in &addrs {
        if try_bind_listener(&mut *slot, addr) {
            opened = true;
            break;
        }
    }

    if opened {
        let slot = ctx.table.get_mut(slot_idx).expect("slot exists");
        slot.state = SlotState::Listening;
        slot.connection_id = endpoint_config_idx;
        debug!("listener {} opened on slot {}", endpoint_config_idx, slot_idx);
        ctx.emit(OutputEvent::ListenerOpened {
            endpoint_config_idx,
            listener_slot_idx: slot_idx,
        });
    } else {
        warn!("all addresses failed for listener {}", endpoint_config_idx);
        ctx.table.close(slot_idx);
        ctx.emit(OutputEvent::ListenerFailure { endpoint_config_idx });
    }
}

fn try_bind_listener(slot: &mut Slot, addr: &SocketAddr) -> bool {
    let socket = match RawSocket::create_new(addr, true) {
        Ok(socket) => socket,
        Err(_) => return false,
    };
    if socket.bind_and_listen(addr, 128).is_err() {
        return false;
    }
    slot.socket = Some(socket);
    true
}

fn create_client(ctx: &mut DispatchContext, connection_id: usize, uri: &str) {
    let (scheme, host, port) = match uri::split_uri_with_max_len(uri, ctx.uri_max_len) {
        Ok(parsed) => parsed,
        Err(err) => {
            warn!("invalid client uri {:?}: {}", uri, err);
            ctx.emit(OutputEvent::Failure {
                connection_id,
                slot_idx: 0,
            });
            return;
        }
    };
    if scheme != Scheme::TcpUa {
        warn!("client uri {:?} is not opc.tcp", uri);
        ctx.emit(OutputEvent::Failure {
            connection_id,
            slot_idx: 0,
        });
        return;
    }

    let addrs = match raw::resolve(&host, &port) {
        Ok(addrs) => addrs,
        Err(err) => {
            warn!("failed to resolve client uri {:?}: {}", uri, err);
            ctx.emit(OutputEvent::Failure {
                connection_id,
                slot_idx: 0,
            });
            return;
        }
    };

    let slot = match ctx.table.get_free(false) {
        Some(slot) => slot,
        None => {
            warn!("no free socket slot for connection {}", connection_id);
            ctx.emit(OutputEvent::Failure {
                connection_id,
                slot_idx: 0,
            });
            return;
        }
    };
    let slot_idx = slot.socket_idx;
    slot.connection_id = connection_id;

    if !start_next_connect_attempt(slot, &addrs, 0) {
        ctx.table.close(slot_idx);
        ctx.emit(OutputEvent::Failure {
            connection_id,
            slot_idx: 0,
        });
        return;
    }
    let slot = ctx.table.get_mut(slot_idx).expect("slot exists");
    slot.connect_addrs = Some(addrs);
}

/// Tries `connect` against `addrs[start..]` in order, stopping at the
/// first address whose `connect` doesn't fail synchronously. Leaves the
/// slot `Connecting` with `next_connect_attempt_addr` past the one in
/// flight. Returns `false` if every remaining address failed outright.
fn start_next_connect_attempt(slot: &mut Slot, addrs: &[SocketAddr], start: usize) -> bool {
    for (i, addr) in addrs.iter().enumerate().skip(start) {
        let socket = match RawSocket::create_new(addr, false) {
            Ok(socket) => socket,
            Err(_) => continue,
        };
        if socket.connect(addr).is_err() {
            continue;
        }
        slot.socket = Some(socket);
        slot.state = SlotState::Connecting;
        slot.next_connect_attempt_addr = i + 1;
        return true;
    }
    false
}

fn accepted_connection(ctx: &mut DispatchContext, slot_idx: usize, connection_id: usize) {
    let slot = match ctx.table.get_mut(slot_idx) {
        Some(slot) if slot.in_use => slot,
        _ => return,
    };
    if slot.state != SlotState::Accepted {
        ctx.table.close(slot_idx);
        return;
    }
    slot.connection_id = connection_id;
    slot.state = SlotState::Connected;
    trace!("slot {} associated with connection {}", slot_idx, connection_id);
}

fn close(ctx: &mut DispatchContext, slot_idx: usize, connection_id: usize) {
    let matches = match ctx.table.get(slot_idx) {
        Some(slot) => {
            slot.in_use
                && slot.state != SlotState::Closed
                && slot.state != SlotState::Listening
                && slot.connection_id == connection_id
        }
        None => false,
    };
    if matches {
        ctx.table.close(slot_idx);
    } else {
        trace!("ignoring stale close for slot {}", slot_idx);
    }
}

fn close_listener(ctx: &mut DispatchContext, slot_idx: usize, endpoint_config_idx: usize) {
    let matches = match ctx.table.get(slot_idx) {
        Some(slot) => {
            slot.state == SlotState::Listening && slot.connection_id == endpoint_config_idx
        }
        None => false,
    };
    if matches {
        ctx.table.close(slot_idx);
    } else {
        trace!("ignoring stale close-listener for slot {}", slot_idx);
    }
}

fn write(ctx: &mut DispatchContext, slot_idx: usize, buffer: Buffer) {
    let connection_id = {
        let slot = match ctx.table.get(slot_idx) {
            Some(slot) if slot.state == SlotState::Connected => slot,
            _ => {
                trace!("dropping write for slot {} not in connected state", slot_idx);
                return;
            }
        };
        slot.connection_id
    };

    let should_flush = {
        let slot = ctx.table.get_mut(slot_idx).expect("checked above");
        let queue = slot.write_queue.as_mut().expect("connected slot has a write queue");
        queue.push_back(buffer);
        !slot.is_not_writable
    };

    if should_flush {
        if treat_write_buffer(ctx, slot_idx).is_err() {
            ctx.table.close(slot_idx);
            ctx.emit(OutputEvent::Failure { connection_id, slot_idx });
        }
    }
}

// ---------------------------------------------------------------------
// Internal (readiness) events
// ---------------------------------------------------------------------

fn listener_connection_attempt(ctx: &mut DispatchContext, listener_idx: usize) {
    let (endpoint_config_idx, at_capacity) = match ctx.table.get(listener_idx) {
        Some(slot) if slot.state == SlotState::Listening => (
            slot.connection_id,
            slot.listener_connections >= ctx.max_socket_connections,
        ),
        _ => return,
    };

    if at_capacity {
        warn!("listener {} at connection cap, refusing accept", listener_idx);
        // The pending connection is left for the OS backlog to hold; we
        // simply don't call accept this iteration.
        return;
    }

    let accepted_fd = {
        let listener_socket = match &ctx.table.get(listener_idx).unwrap().socket {
            Some(socket) => socket,
            None => return,
        };
        listener_socket.accept()
    };

    let new_socket = match accepted_fd {
        Ok(socket) => socket,
        Err(err) => {
            warn!("accept failed on listener {}: {}", listener_idx, err);
            return;
        }
    };

    let new_slot = match ctx.table.get_free(false) {
        Some(slot) => slot,
        None => {
            warn!("no free socket slot to hold accepted connection");
            return;
        }
    };
    let new_slot_idx = new_slot.socket_idx;
    new_slot.socket = Some(new_socket);
    new_slot.state = SlotState::Accepted;
    new_slot.is_server_connection = true;
    new_slot.listener_socket_idx = Some(listener_idx);
    new_slot.connection_id = endpoint_config_idx;

    if let Some(listener) = ctx.table.get_mut(listener_idx) {
        listener.listener_connections += 1;
    }

    debug!(
        "listener {} accepted new connection into slot {}",
        listener_idx, new_slot_idx
    );
    ctx.emit(OutputEvent::ListenerConnection {
        endpoint_config_idx,
        accepted_slot_idx: new_slot_idx,
    });
}

fn connection_attempt_failed(ctx: &mut DispatchContext, slot_idx: usize) {
    let (connection_id, addrs, next) = match ctx.table.get(slot_idx) {
        Some(slot) if slot.state == SlotState::Connecting => (
            slot.connection_id,
            slot.connect_addrs.clone(),
            slot.next_connect_attempt_addr,
        ),
        _ => return,
    };
    let addrs = match addrs {
        Some(addrs) => addrs,
        None => return,
    };

    let slot = ctx.table.get_mut(slot_idx).expect("checked above");
    slot.socket = None;

    if start_next_connect_attempt(slot, &addrs, next) {
        return;
    }

    ctx.table.close(slot_idx);
    ctx.emit(OutputEvent::Failure { connection_id, slot_idx });
}

fn connected(ctx: &mut DispatchContext, slot_idx: usize) {
    let connection_id = match ctx.table.get_mut(slot_idx) {
        Some(slot) if slot.state == SlotState::Connecting => {
            slot.connect_addrs = None;
            slot.state = SlotState::Connected;
            slot.connection_id
        }
        _ => return,
    };
    debug!("slot {} connected", slot_idx);
    ctx.emit(OutputEvent::Connection { connection_id, slot_idx });
}

fn internal_close(ctx: &mut DispatchContext, slot_idx: usize) {
    match ctx.table.get(slot_idx) {
        Some(slot) if slot.state == SlotState::Listening => {
            let endpoint_config_idx = slot.connection_id;
            ctx.table.close(slot_idx);
            ctx.emit(OutputEvent::ListenerFailure { endpoint_config_idx });
        }
        Some(slot) if slot.state != SlotState::Closed => {
            let connection_id = slot.connection_id;
            ctx.table.close(slot_idx);
            ctx.emit(OutputEvent::Failure { connection_id, slot_idx });
        }
        _ => {}
    }
}

fn ready_to_read(ctx: &mut DispatchContext, slot_idx: usize) {
    let connection_id = match ctx.table.get(slot_idx) {
        Some(slot) if slot.state == SlotState::Connected => slot.connection_id,
        _ => return,
    };

    let to_read = {
        let slot = ctx.table.get(slot_idx).unwrap();
        let socket = slot.socket.as_ref().expect("connected slot has a socket");
        match socket.bytes_to_read() {
            Ok(n) => n.clamp(ctx.min_read_buffer, ctx.max_buffer),
            Err(_) => ctx.min_read_buffer,
        }
    };

    let mut buffer = Buffer::with_capacity(to_read);
    let outcome = {
        let slot = ctx.table.get_mut(slot_idx).unwrap();
        let socket = slot.socket.as_mut().expect("connected slot has a socket");
        socket.read(buffer.as_mut_slice())
    };

    match outcome {
        Ok(ReadOutcome::Read(n)) => {
            buffer.truncate(n);
            trace!("slot {} read {} bytes", slot_idx, n);
            ctx.emit(OutputEvent::RcvBytes {
                connection_id,
                slot_idx,
                buffer,
            });
        }
        Ok(ReadOutcome::WouldBlock) => {}
        Ok(ReadOutcome::Closed) => {
            ctx.table.close(slot_idx);
            ctx.emit(OutputEvent::Failure { connection_id, slot_idx });
        }
        Err(err) => {
            warn!("read failed on slot {}: {}", slot_idx, err);
            ctx.table.close(slot_idx);
            ctx.emit(OutputEvent::Failure { connection_id, slot_idx });
        }
    }
}

fn ready_to_write(ctx: &mut DispatchContext, slot_idx: usize) {
    let was_blocked = match ctx.table.get_mut(slot_idx) {
        Some(slot) if slot.state == SlotState::Connected => {
            let was = slot.is_not_writable;
            slot.is_not_writable = false;
            was
        }
        _ => return,
    };
    if !was_blocked {
        return;
    }
    if treat_write_buffer(ctx, slot_idx).is_err() {
        let connection_id = ctx.table.get(slot_idx).map(|s| s.connection_id).unwrap_or(0);
        ctx.table.close(slot_idx);
        ctx.emit(OutputEvent::Failure { connection_id, slot_idx });
    }
}

/// Drains a slot's write queue until it empties, a write blocks, or a
/// write fails. On would-block, the partially sent buffer is pushed back
/// to the *front* of the queue with its cursor advanced, and
/// `is_not_writable` is set so the reactor watches for writability.
fn treat_write_buffer(ctx: &mut DispatchContext, slot_idx: usize) -> Result<(), ()> {
    loop {
        let mut buffer = {
            let slot = ctx.table.get_mut(slot_idx).ok_or(())?;
            let queue = slot.write_queue.as_mut().ok_or(())?;
            match queue.pop_front() {
                Some(buffer) => buffer,
                None => return Ok(()),
            }
        };

        loop {
            let write_result = {
                let slot = ctx.table.get_mut(slot_idx).ok_or(())?;
                let socket = slot.socket.as_mut().ok_or(())?;
                socket.write(buffer.remaining())
            };

            match write_result {
                Ok(WriteOutcome::Written(0)) => return Err(()),
                Ok(WriteOutcome::Written(n)) => {
                    buffer.advance(n);
                    if buffer.is_fully_sent() {
                        break;
                    }
                }
                Ok(WriteOutcome::WouldBlock) => {
                    let slot = ctx.table.get_mut(slot_idx).ok_or(())?;
                    let queue = slot.write_queue.as_mut().ok_or(())?;
                    queue.push_front(buffer);
                    slot.is_not_writable = true;
                    return Ok(());
                }
                Err(_) => return Err(()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::net::TcpListener as StdTcpListener;
    use std::sync::Mutex;

    use super::*;
    use crate::slot::SlotState;

    fn recording_ctx<'a>(table: &'a mut SocketTable, output: &'a OutputHandler) -> DispatchContext<'a> {
        DispatchContext {
            table,
            max_socket_connections: 2,
            min_read_buffer: 64,
            max_buffer: 4096,
            uri_max_len: 4096,
            output,
        }
    }

    /// A listener already at its connection cap refuses a new accept
    /// attempt without touching the table or emitting anything.
    #[test]
    fn listener_at_capacity_refuses_accept() {
        let mut table = SocketTable::new(8);
        let listener_idx = table.get_free(true).unwrap().socket_idx;
        {
            let listener = table.get_mut(listener_idx).unwrap();
            listener.state = SlotState::Listening;
            listener.connection_id = 7;
            listener.listener_connections = 2;
        }
        let events = Mutex::new(Vec::new());
        let output: Box<OutputHandler> = Box::new(|e| events.lock().unwrap().push(e));
        let mut ctx = recording_ctx(&mut table, &*output);

        listener_connection_attempt(&mut ctx, listener_idx);

        assert!(events.lock().unwrap().is_empty());
        assert_eq!(table.get(listener_idx).unwrap().listener_connections, 2);
    }

    /// A `Close` whose `aux` doesn't match the slot's current
    /// `connection_id` is dropped: the slot is untouched and nothing is
    /// emitted.
    #[test]
    fn stale_close_is_ignored() {
        let mut table = SocketTable::new(8);
        let slot_idx = table.get_free(false).unwrap().socket_idx;
        {
            let slot = table.get_mut(slot_idx).unwrap();
            slot.state = SlotState::Connected;
            slot.connection_id = 42;
        }
        let events = Mutex::new(Vec::new());
        let output: Box<OutputHandler> = Box::new(|e| events.lock().unwrap().push(e));
        let mut ctx = recording_ctx(&mut table, &*output);

        close(&mut ctx, slot_idx, 17);

        assert!(events.lock().unwrap().is_empty());
        let slot = table.get(slot_idx).unwrap();
        assert_eq!(slot.state, SlotState::Connected);
        assert_eq!(slot.connection_id, 42);
    }

    /// A matching `Close` does tear the slot down.
    #[test]
    fn matching_close_closes_the_slot() {
        let mut table = SocketTable::new(8);
        let slot_idx = table.get_free(false).unwrap().socket_idx;
        {
            let slot = table.get_mut(slot_idx).unwrap();
            slot.state = SlotState::Connected;
            slot.connection_id = 42;
        }
        let events = Mutex::new(Vec::new());
        let output: Box<OutputHandler> = Box::new(|e| events.lock().unwrap().push(e));
        let mut ctx = recording_ctx(&mut table, &*output);

        close(&mut ctx, slot_idx, 42);

        assert!(events.lock().unwrap().is_empty());
        assert!(!table.get(slot_idx).unwrap().in_use);
    }

    /// A `Write` against a slot that isn't `Connected` is dropped silently
    /// rather than queued.
    #[test]
    fn write_against_unconnected_slot_is_dropped() {
        let mut table = SocketTable::new(8);
        let slot_idx = table.get_free(false).unwrap().socket_idx;
        let events = Mutex::new(Vec::new());
        let output: Box<OutputHandler> = Box::new(|e| events.lock().unwrap().push(e));
        let mut ctx = recording_ctx(&mut table, &*output);

        write(&mut ctx, slot_idx, Buffer::new(vec![1, 2, 3]));

        assert!(events.lock().unwrap().is_empty());
        assert!(table.get(slot_idx).unwrap().write_queue.as_ref().unwrap().is_empty());
    }

    /// When the first resolved address fails to connect, the fallback
    /// advances to the next one, and only success emits a `Connection` —
    /// exactly once.
    #[test]
    fn connect_fallback_retries_next_address_after_failure() {
        let real_listener = StdTcpListener::bind("127.0.0.1:0").unwrap();
        let good_addr = real_listener.local_addr().unwrap();

        // An address nothing listens on: its `connect` defers (EINPROGRESS)
        // just like a real one, so the fallback is driven the same way the
        // reactor would drive it after observing the deferred failure.
        let probe = StdTcpListener::bind("127.0.0.1:0").unwrap();
        let bad_addr = probe.local_addr().unwrap();
        drop(probe);

        let mut table = SocketTable::new(8);
        let slot_idx = table.get_free(false).unwrap().socket_idx;
        {
            let slot = table.get_mut(slot_idx).unwrap();
            slot.connection_id = 99;
            assert!(start_next_connect_attempt(slot, &[bad_addr, good_addr], 0));
            slot.connect_addrs = Some(vec![bad_addr, good_addr]);
        }

        let events = Mutex::new(Vec::new());
        let output: Box<OutputHandler> = Box::new(|e| events.lock().unwrap().push(e));
        let mut ctx = recording_ctx(&mut table, &*output);

        connection_attempt_failed(&mut ctx, slot_idx);
        assert!(events.lock().unwrap().is_empty(), "retry must not emit yet");
        assert_eq!(table.get(slot_idx).unwrap().state, SlotState::Connecting);

        connected(&mut ctx, slot_idx);
        assert_eq!(events.lock().unwrap().len(), 1);
        assert!(matches!(
            events.lock().unwrap()[0],
            OutputEvent::Connection { connection_id: 99, slot_idx: s } if s == slot_idx
        ));
        assert!(table.get(slot_idx).unwrap().connect_addrs.is_none());
    }

    /// When every address in the fallback list fails, exactly one
    /// `Failure` is emitted and the slot is closed.
    #[test]
    fn connect_fallback_exhaustion_emits_one_failure() {
        let probe = StdTcpListener::bind("127.0.0.1:0").unwrap();
        let bad_addr = probe.local_addr().unwrap();
        drop(probe);

        let mut table = SocketTable::new(8);
        let slot_idx = table.get_free(false).unwrap().socket_idx;
        {
            let slot = table.get_mut(slot_idx).unwrap();
            slot.connection_id = 5;
            assert!(start_next_connect_attempt(slot, &[bad_addr], 0));
            slot.connect_addrs = Some(vec![bad_addr]);
        }

        let events = Mutex::new(Vec::new());
        let output: Box<OutputHandler> = Box::new(|e| events.lock().unwrap().push(e));
        let mut ctx = recording_ctx(&mut table, &*output);

        connection_attempt_failed(&mut ctx, slot_idx);

        assert_eq!(events.lock().unwrap().len(), 1);
        assert!(matches!(
            events.lock().unwrap()[0],
            OutputEvent::Failure { connection_id: 5, slot_idx: 0 }
        ));
        assert!(!table.get(slot_idx).unwrap().in_use);
    }
}
