//! End-to-end scenario: a listener accepts a real peer connection and
//! exchanges bytes, driven entirely through the public event API.

use std::io::{Read, Write};
use std::net::TcpStream;
use std::time::Duration;

use opcua_sockets::{Buffer, InputEvent, OutputEvent, SocketsConfig};

mod util;

use self::util::{expect_event, init_sockets};

const EVENT_TIMEOUT: Duration = Duration::from_secs(2);

#[test]
fn listener_accepts_connection_and_receives_bytes() {
    let std_listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = std_listener.local_addr().unwrap();
    drop(std_listener);
    let uri = format!("opc.tcp://{}:{}", addr.ip(), addr.port());

    let (sockets, rx) = init_sockets(SocketsConfig::default());
    sockets.create_listener(7, &uri, false);

    let listener_slot = match expect_event(&rx, EVENT_TIMEOUT) {
        OutputEvent::ListenerOpened {
            endpoint_config_idx: 7,
            listener_slot_idx,
        } => listener_slot_idx,
        other => panic!("expected ListenerOpened, got {:?}", other),
    };
    assert_ne!(listener_slot, 0);

    let mut peer = TcpStream::connect(addr).expect("peer connect");

    let accepted_slot = match expect_event(&rx, EVENT_TIMEOUT) {
        OutputEvent::ListenerConnection {
            endpoint_config_idx: 7,
            accepted_slot_idx,
        } => accepted_slot_idx,
        other => panic!("expected ListenerConnection, got {:?}", other),
    };
    assert_ne!(accepted_slot, listener_slot);

    sockets.enqueue_event(InputEvent::AcceptedConnection {
        slot_idx: accepted_slot,
        connection_id: 99,
    });

    peer.write_all(b"ABC").unwrap();

    match expect_event(&rx, EVENT_TIMEOUT) {
        OutputEvent::RcvBytes {
            connection_id: 99,
            slot_idx,
            buffer,
        } => {
            assert_eq!(slot_idx, accepted_slot);
            assert_eq!(buffer.into_vec(), b"ABC".to_vec());
        }
        other => panic!("expected RcvBytes, got {:?}", other),
    }

    sockets.write(accepted_slot, Buffer::new(b"XYZ".to_vec()));
    let mut echo = [0u8; 3];
    peer.read_exact(&mut echo).unwrap();
    assert_eq!(&echo, b"XYZ");
}
