//! Tagged input/output events exchanged with the upstream secure-channel
//! layer, and the internal readiness events the reactor classifies
//! `select` outcomes into.

use crate::buffer::Buffer;

/// An event handed to the core by upstream code.
#[derive(Debug)]
pub enum InputEvent {
    CreateListener {
        endpoint_config_idx: usize,
        uri: String,
        listen_all_interfaces: bool,
    },
    CreateClient {
        connection_id: usize,
        uri: String,
    },
    AcceptedConnection {
        slot_idx: usize,
        connection_id: usize,
    },
    Close {
        slot_idx: usize,
        connection_id: usize,
    },
    CloseListener {
        slot_idx: usize,
        endpoint_config_idx: usize,
    },
    Write {
        slot_idx: usize,
        buffer: Buffer,
    },
}

/// An event the core emits to upstream.
#[derive(Debug)]
pub enum OutputEvent {
    ListenerOpened {
        endpoint_config_idx: usize,
        listener_slot_idx: usize,
    },
    ListenerConnection {
        endpoint_config_idx: usize,
        accepted_slot_idx: usize,
    },
    ListenerFailure {
        endpoint_config_idx: usize,
    },
    Connection {
        connection_id: usize,
        slot_idx: usize,
    },
    Failure {
        connection_id: usize,
        slot_idx: usize,
    },
    RcvBytes {
        connection_id: usize,
        slot_idx: usize,
        buffer: Buffer,
    },
}

/// Readiness classified by the reactor, dispatched internally.
#[derive(Debug)]
pub enum InternalEvent {
    ListenerConnectionAttempt { slot_idx: usize },
    ConnectionAttemptFailed { slot_idx: usize },
    Connected { slot_idx: usize },
    Close { slot_idx: usize },
    ReadyToRead { slot_idx: usize },
    ReadyToWrite { slot_idx: usize },
}

/// The upstream callback invoked for every emitted [`OutputEvent`].
pub type OutputHandler = dyn Fn(OutputEvent) + Send + Sync;
