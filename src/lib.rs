//! Single-threaded, `select`-driven socket multiplexer for the OPC UA
//! client/server/PubSub stack.
//!
//! A dedicated reactor thread owns every TCP socket used by the toolkit and
//! drives each through a small non-blocking state machine
//! (connecting/connected/listening/accepted). Upstream protocol-layer code
//! never touches a socket directly: it enqueues [`events::InputEvent`]s
//! through [`sockets::Sockets`] and receives [`events::OutputEvent`]s back
//! through a registered handler, all scheduling and I/O happens on the
//! reactor thread.
//!
//! # Usage
//!
//! ```no_run
//! use opcua_sockets::{Sockets, SocketsConfig};
//!
//! let mut sockets = Sockets::initialize(SocketsConfig::default()).unwrap();
//! sockets.set_event_handler(|event| {
//!     println!("{:?}", event);
//! });
//! sockets.create_listener(1, "opc.tcp://127.0.0.1:4840", false);
//! # sockets.clear();
//! ```
//!
//! # Undefined behaviour
//!
//! It is undefined how the reactor thread behaves after a process is
//! forked; fork before calling [`Sockets::initialize`] if you need to fork
//! at all.
#![warn(
    anonymous_parameters,
    bare_trait_objects,
    missing_debug_implementations,
    trivial_casts,
    trivial_numeric_casts,
    unused_extern_crates,
    unused_import_braces,
    unused_qualifications
)]

pub mod buffer;
pub mod config;
pub mod error;
pub mod events;
pub mod queue;
pub mod raw;
mod dispatch;
mod reactor;
pub mod sockets;
pub mod uri;
pub mod slot;

pub use buffer::Buffer;
pub use config::SocketsConfig;
pub use error::{Result, SocketsError};
pub use events::{InputEvent, OutputEvent};
pub use sockets::Sockets;
pub use uri::{split_uri, Scheme};
