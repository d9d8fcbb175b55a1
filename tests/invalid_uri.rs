//! Malformed or non-TCP-UA endpoint URIs fail cleanly with a single
//! failure event, never a panic or a silently dropped request.

use std::time::Duration;

use opcua_sockets::{OutputEvent, SocketsConfig};

mod util;

use self::util::{expect_event, init_sockets};

const EVENT_TIMEOUT: Duration = Duration::from_secs(2);

#[test]
fn create_listener_with_malformed_uri_emits_listener_failure() {
    let (sockets, rx) = init_sockets(SocketsConfig::default());

    sockets.create_listener(3, "http://127.0.0.1:4840", false);

    match expect_event(&rx, EVENT_TIMEOUT) {
        OutputEvent::ListenerFailure { endpoint_config_idx: 3 } => {}
        other => panic!("expected ListenerFailure, got {:?}", other),
    }
}

#[test]
fn create_listener_with_missing_port_emits_listener_failure() {
    let (sockets, rx) = init_sockets(SocketsConfig::default());

    sockets.create_listener(4, "opc.tcp://127.0.0.1:/", false);

    match expect_event(&rx, EVENT_TIMEOUT) {
        OutputEvent::ListenerFailure { endpoint_config_idx: 4 } => {}
        other => panic!("expected ListenerFailure, got {:?}", other),
    }
}

#[test]
fn create_client_with_non_tcp_scheme_emits_failure() {
    let (sockets, rx) = init_sockets(SocketsConfig::default());

    sockets.create_client(5, "opc.udp://127.0.0.1:4840");

    match expect_event(&rx, EVENT_TIMEOUT) {
        OutputEvent::Failure { connection_id: 5, slot_idx: 0 } => {}
        other => panic!("expected Failure, got {:?}", other),
    }
}
