//! Collection of testing utilities.

#![allow(dead_code)]

use std::sync::mpsc::{channel, Receiver, RecvTimeoutError};
use std::time::Duration;

use opcua_sockets::{OutputEvent, Sockets, SocketsConfig};

/// Initialise the test setup: logging, mostly.
pub fn init() {
    drop(std_logger::try_init());
}

/// Starts a `Sockets` instance whose output events are forwarded to a
/// channel so a test can assert on them without racing the reactor thread.
pub fn init_sockets(config: SocketsConfig) -> (Sockets, Receiver<OutputEvent>) {
    init();
    let sockets = Sockets::initialize(config).expect("unable to initialize sockets core");
    let (tx, rx) = channel();
    sockets.set_event_handler(move |event| {
        // The test thread may already be gone by the time a late event
        // fires during shutdown; that's not a test failure.
        let _ = tx.send(event);
    });
    (sockets, rx)
}

/// Waits up to `timeout` for the next output event, panicking if none
/// arrives.
pub fn expect_event(rx: &Receiver<OutputEvent>, timeout: Duration) -> OutputEvent {
    match rx.recv_timeout(timeout) {
        Ok(event) => event,
        Err(RecvTimeoutError::Timeout) => panic!("timed out waiting for an output event"),
        Err(RecvTimeoutError::Disconnected) => panic!("output event channel disconnected"),
    }
}

/// Asserts no output event arrives within `timeout`.
pub fn expect_no_event(rx: &Receiver<OutputEvent>, timeout: Duration) {
    match rx.recv_timeout(timeout) {
        Ok(event) => panic!("expected no event, got {:?}", event),
        Err(RecvTimeoutError::Timeout) => {}
        Err(RecvTimeoutError::Disconnected) => {}
    }
}
