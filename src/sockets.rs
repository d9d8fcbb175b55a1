//! The public facade: `initialize` / `clear` / `set_event_handler` /
//! `enqueue_event`.

use std::io;
use std::sync::{Arc, OnceLock};

use log::info;

use crate::buffer::Buffer;
use crate::config::SocketsConfig;
use crate::events::{InputEvent, OutputEvent, OutputHandler};
use crate::queue::{event_queue, EventQueueSender};
use crate::reactor::{Reactor, WakeHandle};

/// Owns the reactor thread and the producer-facing handles to it.
///
/// There is intentionally no way to reach into the slot table from outside
/// the reactor thread; every interaction goes through [`Sockets::enqueue_event`]
/// and the output handler registered via [`Sockets::set_event_handler`].
pub struct Sockets {
    reactor: Option<Reactor>,
    sender: EventQueueSender,
    wake: WakeHandle,
    handler: Arc<OnceLock<Arc<OutputHandler>>>,
}

impl Sockets {
    /// Boots the context table and starts the reactor thread. The output
    /// handler must be registered (see [`Sockets::set_event_handler`])
    /// before any event that could produce output is enqueued, otherwise
    /// those events are silently swallowed by the default no-op handler.
    pub fn initialize(config: SocketsConfig) -> io::Result<Sockets> {
        info!(
            "initializing sockets core: max_sockets={}, max_socket_connections={}",
            config.max_sockets, config.max_socket_connections
        );
        let (sender, receiver) = event_queue();
        let handler_slot = Arc::new(OnceLock::<Arc<OutputHandler>>::new());
        let handler_for_reactor = Arc::clone(&handler_slot);
        let output: Arc<OutputHandler> = Arc::new(move |event: OutputEvent| {
            if let Some(handler) = handler_for_reactor.get() {
                (handler)(event);
            }
        });

        let reactor = Reactor::spawn(
            config.max_sockets,
            config.max_socket_connections,
            config.min_read_buffer,
            config.max_buffer,
            config.effective_uri_max_len(),
            receiver,
            output,
        )?;
        let wake = reactor.wake_handle();

        Ok(Sockets {
            reactor: Some(reactor),
            sender,
            wake,
            handler: handler_slot,
        })
    }

    /// Registers the callback invoked on the reactor thread for every
    /// output event. May be called once; later calls are ignored.
    pub fn set_event_handler<F>(&self, handler: F)
    where
        F: Fn(OutputEvent) + Send + Sync + 'static,
    {
        let _ = self.handler.set(Arc::new(handler));
    }

    pub fn enqueue_event(&self, event: InputEvent) {
        self.sender.enqueue(event);
        self.wake.wake();
    }

    pub fn create_listener(&self, endpoint_config_idx: usize, uri: impl Into<String>, listen_all_interfaces: bool) {
        self.enqueue_event(InputEvent::CreateListener {
            endpoint_config_idx,
            uri: uri.into(),
            listen_all_interfaces,
        });
    }

    pub fn create_client(&self, connection_id: usize, uri: impl Into<String>) {
        self.enqueue_event(InputEvent::CreateClient {
            connection_id,
            uri: uri.into(),
        });
    }

    pub fn accept_connection(&self, slot_idx: usize, connection_id: usize) {
        self.enqueue_event(InputEvent::AcceptedConnection { slot_idx, connection_id });
    }

    pub fn close(&self, slot_idx: usize, connection_id: usize) {
        self.enqueue_event(InputEvent::Close { slot_idx, connection_id });
    }

    pub fn close_listener(&self, slot_idx: usize, endpoint_config_idx: usize) {
        self.enqueue_event(InputEvent::CloseListener {
            slot_idx,
            endpoint_config_idx,
        });
    }

    pub fn write(&self, slot_idx: usize, buffer: Buffer) {
        self.enqueue_event(InputEvent::Write { slot_idx, buffer });
    }

    /// Stops the reactor thread and joins it.
    pub fn clear(&mut self) {
        if let Some(reactor) = self.reactor.take() {
            reactor.shutdown();
        }
    }
}

impl Drop for Sockets {
    fn drop(&mut self) {
        self.clear();
    }
}
