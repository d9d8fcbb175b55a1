//! The network event manager: the self-pipe and the `select` reactor loop.
//!
//! One dedicated thread owns the slot table and the self-pipe for its
//! entire lifetime. `select` is always called with a zero timeout; the
//! self-pipe is what lets an idle reactor sleep inside `select` without
//! missing a newly enqueued input event or a shutdown request.

use std::io::{self, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::os::unix::io::AsRawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use log::{debug, error, trace, warn};

use crate::dispatch;
use crate::events::{InternalEvent, OutputHandler};
use crate::queue::EventQueueReceiver;
use crate::raw::{select_with_timeout, FdSet};
use crate::slot::{SlotState, SocketTable};

/// A loopback TCP pair used solely to interrupt an idle `select` call.
struct SelfPipe {
    /// Write end: any thread enqueuing an input event writes one byte here.
    client: TcpStream,
    /// Read end: kept in the reactor's read set; readability means "drain
    /// the input queue", and a zero-length read means shutdown.
    server_conn: TcpStream,
}

impl SelfPipe {
    fn new() -> io::Result<SelfPipe> {
        let listener = TcpListener::bind(("127.0.0.1", 0))?;
        let addr = listener.local_addr()?;
        let client = TcpStream::connect(addr)?;
        let (server_conn, _) = listener.accept()?;
        client.set_nonblocking(true)?;
        server_conn.set_nonblocking(true)?;
        Ok(SelfPipe { client, server_conn })
    }

    fn wake_handle(&self) -> io::Result<TcpStream> {
        self.client.try_clone()
    }
}

/// A cloneable handle other threads use to wake an idle reactor after
/// enqueuing an input event.
#[derive(Clone)]
pub struct WakeHandle {
    client: Arc<Mutex<TcpStream>>,
}

impl WakeHandle {
    fn new(client: TcpStream) -> WakeHandle {
        WakeHandle {
            client: Arc::new(Mutex::new(client)),
        }
    }

    pub fn wake(&self) {
        let mut client = self.client.lock().unwrap_or_else(|e| e.into_inner());
        match client.write(&[0u8]) {
            Ok(_) => {}
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => {}
            Err(err) => warn!("failed to wake reactor: {}", err),
        }
    }
}

pub struct Reactor {
    handle: Option<JoinHandle<()>>,
    stop: Arc<AtomicBool>,
    wake: WakeHandle,
}

impl Reactor {
    /// Starts the reactor thread, returning a handle and a [`WakeHandle`]
    /// for enqueuers to interrupt an idle `select`.
    pub fn spawn(
        max_sockets: usize,
        max_socket_connections: usize,
        min_read_buffer: usize,
        max_buffer: usize,
        uri_max_len: usize,
        input: EventQueueReceiver,
        output: Arc<OutputHandler>,
    ) -> io::Result<Reactor> {
        let self_pipe = SelfPipe::new()?;
        let wake = WakeHandle::new(self_pipe.wake_handle()?);
        let stop = Arc::new(AtomicBool::new(false));
        let stop_clone = Arc::clone(&stop);

        let handle = std::thread::Builder::new()
            .name("opcua-sockets-reactor".to_string())
            .spawn(move || {
                let mut table = SocketTable::new(max_sockets);
                let mut ctx = dispatch::DispatchContext {
                    table: &mut table,
                    max_socket_connections,
                    min_read_buffer,
                    max_buffer,
                    uri_max_len,
                    output: &*output,
                };
                run_loop(&mut ctx, self_pipe, input, stop_clone);
            })
            .map_err(|err| io::Error::new(io::ErrorKind::Other, err))?;

        Ok(Reactor {
            handle: Some(handle),
            stop,
            wake,
        })
    }

    pub fn wake_handle(&self) -> WakeHandle {
        self.wake.clone()
    }

    /// Signals the reactor to stop, wakes it, and joins the thread.
    pub fn shutdown(mut self) {
        self.stop.store(true, Ordering::SeqCst);
        self.wake.wake();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn run_loop(
    ctx: &mut dispatch::DispatchContext,
    mut self_pipe: SelfPipe,
    input: EventQueueReceiver,
    stop: Arc<AtomicBool>,
) {
    debug!("reactor loop starting");
    let mut read_set = FdSet::new();
    let mut write_set = FdSet::new();
    let mut except_set = FdSet::new();

    loop {
        if stop.load(Ordering::SeqCst) {
            debug!("reactor loop stopping");
            break;
        }

        read_set.clear();
        write_set.clear();
        except_set.clear();

        read_set.insert(self_pipe.server_conn.as_raw_fd());

        for slot in ctx.table.iter_in_use() {
            let fd = match &slot.socket {
                Some(socket) => socket.as_raw_fd(),
                None => continue,
            };
            match slot.state {
                SlotState::Connecting => write_set.insert(fd),
                SlotState::Connected if slot.is_not_writable => write_set.insert(fd),
                SlotState::Connected | SlotState::Listening => read_set.insert(fd),
                SlotState::Accepted | SlotState::Closed => {}
            }
            except_set.insert(fd);
        }

        let ready = match select_with_timeout(
            &mut read_set,
            &mut write_set,
            &mut except_set,
            Some(Duration::from_secs(0)),
        ) {
            Ok(n) => n,
            Err(err) => {
                error!("select failed, stopping reactor: {}", err);
                break;
            }
        };

        if ready == 0 {
            continue;
        }

        if read_set.contains(self_pipe.server_conn.as_raw_fd()) {
            if !drain_self_pipe(&mut self_pipe.server_conn) {
                debug!("self-pipe closed, stopping reactor");
                break;
            }
        }

        while let Some(event) = input.try_dequeue() {
            trace!("dispatching input event: {:?}", event);
            dispatch::dispatch_input_event(ctx, event);
        }

        let mut internal_events = Vec::new();
        for slot in ctx.table.iter_in_use() {
            let fd = match &slot.socket {
                Some(socket) => socket.as_raw_fd(),
                None => continue,
            };
            let is_except = except_set.contains(fd);
            let is_readable = read_set.contains(fd);
            let is_writable = write_set.contains(fd);

            if is_except {
                internal_events.push(InternalEvent::Close { slot_idx: slot.socket_idx });
                continue;
            }
            match slot.state {
                SlotState::Connecting if is_writable => {
                    let outcome = match &slot.socket {
                        Some(socket) => socket.check_ack_connect(),
                        None => Err(io::Error::new(io::ErrorKind::NotConnected, "no socket")),
                    };
                    internal_events.push(match outcome {
                        Ok(()) => InternalEvent::Connected { slot_idx: slot.socket_idx },
                        Err(_) => InternalEvent::ConnectionAttemptFailed { slot_idx: slot.socket_idx },
                    });
                }
                SlotState::Connected if is_readable => {
                    internal_events.push(InternalEvent::ReadyToRead { slot_idx: slot.socket_idx });
                }
                SlotState::Connected if is_writable => {
                    internal_events.push(InternalEvent::ReadyToWrite { slot_idx: slot.socket_idx });
                }
                SlotState::Listening if is_readable => {
                    internal_events.push(InternalEvent::ListenerConnectionAttempt {
                        slot_idx: slot.socket_idx,
                    });
                }
                _ if is_readable || is_writable => {
                    warn!(
                        "unexpected readiness for slot {} in state {:?}",
                        slot.socket_idx, slot.state
                    );
                    internal_events.push(InternalEvent::Close { slot_idx: slot.socket_idx });
                }
                _ => {}
            }
        }

        for event in internal_events {
            trace!("dispatching internal event: {:?}", event);
            dispatch::dispatch_internal_event(ctx, event);
        }
    }
}

/// Drains up to 100 wake bytes. Returns `false` if the peer closed.
fn drain_self_pipe(server_conn: &mut TcpStream) -> bool {
    let mut buf = [0u8; 100];
    match server_conn.read(&mut buf) {
        Ok(0) => false,
        Ok(_) => true,
        Err(err) if err.kind() == io::ErrorKind::WouldBlock => true,
        Err(err) => {
            error!("self-pipe read error: {}", err);
            false
        }
    }
}
