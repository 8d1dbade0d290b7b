//! The socket seam.
//!
//! The session never talks to a socket directly: the client opens a [`Connection`] through a
//! [`Connector`], sends [`ClientEvent`]s through its [`Transport`], and receives
//! [`TransportEvent`]s on a channel. Tests plug in in-memory fakes here.

mod websocket;

use std::future::Future;

use tokio::sync::mpsc;

use crate::Result;
use crate::protocol::{ClientEvent, ServerEvent};

pub use websocket::{SocketIoConnector, SocketIoTransport, endpoint_url};

/// Something delivered by an open connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Server(ServerEvent),

    /// The connection is gone (server disconnect, socket error, or local close).
    Closed { reason: Option<String> },
}

/// Outbound half of an open connection.
pub trait Transport {
    fn send(&mut self, event: ClientEvent) -> Result<()>;

    /// Close the connection. Idempotent.
    fn close(&mut self);
}

/// An open, ready connection: outbound half plus inbound event stream.
pub struct Connection<T> {
    pub transport: T,
    pub events: mpsc::UnboundedReceiver<TransportEvent>,
}

/// Opens connections; resolves once the transport is ready for events.
pub trait Connector {
    type Transport: Transport;

    fn connect(&mut self) -> impl Future<Output = Result<Connection<Self::Transport>>>;
}
