//! Socket.IO client transport over tokio-tungstenite.
//!
//! Responsibilities:
//! - Build the `/socket.io/?EIO=4&transport=websocket` endpoint from the server URL
//! - Run the Engine.IO open + Socket.IO CONNECT handshake before reporting the transport ready
//! - Pump frames in two tasks: a writer draining an outbound channel, a reader decoding
//!   inbound packets into [`TransportEvent`]s
//!
//! Notes:
//! - Server pings are answered from the reader task; the client never pings.
//! - A reader that hears nothing for `pingInterval + pingTimeout` reports the connection closed.

use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, warn};
use url::Url;

use super::{Connection, Connector, Transport, TransportEvent};
use crate::protocol::engine_io::{self, Handshake};
use crate::protocol::socket_io::{self, Decoder, Incoming};
use crate::protocol::{ClientEvent, ServerEvent};
use crate::{Error, Result};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Build the Socket.IO WebSocket endpoint for `server_url`.
///
/// `http`/`https` map to `ws`/`wss`; the optional agent id rides along as `agent_id`.
pub fn endpoint_url(server_url: &str, agent_id: Option<&str>) -> Result<Url> {
    let mut url = Url::parse(server_url)?;
    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => {
            return Err(Error::Transport(format!("unsupported url scheme '{other}'")));
        }
    };
    url.set_scheme(scheme)
        .map_err(|_| Error::Transport(format!("cannot use scheme '{scheme}' for {server_url}")))?;

    let path = format!("{}/socket.io/", url.path().trim_end_matches('/'));
    url.set_path(&path);
    {
        let mut query = url.query_pairs_mut();
        query.append_pair("EIO", "4");
        query.append_pair("transport", "websocket");
        if let Some(agent_id) = agent_id {
            query.append_pair("agent_id", agent_id);
        }
    }
    Ok(url)
}

/// Opens Socket.IO connections to one server endpoint.
#[derive(Debug, Clone)]
pub struct SocketIoConnector {
    url: Url,
}

impl SocketIoConnector {
    pub fn new(server_url: &str, agent_id: Option<&str>) -> Result<Self> {
        Ok(Self {
            url: endpoint_url(server_url, agent_id)?,
        })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

impl Connector for SocketIoConnector {
    type Transport = SocketIoTransport;

    async fn connect(&mut self) -> Result<Connection<SocketIoTransport>> {
        info!(url = %self.url, "connecting");
        let (ws, _response) = connect_async(self.url.as_str()).await?;
        let (mut sink, mut stream) = ws.split();
        let mut decoder = Decoder::new();

        let handshake = tokio::time::timeout(HANDSHAKE_TIMEOUT, async {
            let handshake = await_open(&mut stream).await?;
            sink.send(socket_io_frame(&socket_io::Packet::connect()))
                .await?;
            let sid = await_connect_ack(&mut sink, &mut stream, &mut decoder).await?;
            Ok::<_, Error>((handshake, sid))
        })
        .await
        .map_err(|_| Error::Transport("handshake timed out".to_owned()))?;
        let (handshake, sid) = handshake?;

        info!(
            engine_sid = %handshake.sid,
            sid = sid.as_deref().unwrap_or(""),
            "connected"
        );

        let idle = Duration::from_millis(handshake.ping_interval + handshake.ping_timeout);
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        tokio::spawn(write_loop(sink, out_rx));
        let reader = tokio::spawn(read_loop(stream, decoder, out_tx.clone(), events_tx, idle));

        Ok(Connection {
            transport: SocketIoTransport {
                out: out_tx,
                reader,
                closed: false,
            },
            events: events_rx,
        })
    }
}

enum Outbound {
    Frame(Message),
    Close,
}

/// Outbound half of a Socket.IO connection. Closes the connection on drop.
pub struct SocketIoTransport {
    out: mpsc::UnboundedSender<Outbound>,
    reader: JoinHandle<()>,
    closed: bool,
}

impl SocketIoTransport {
    fn push(&self, frame: Message) -> Result<()> {
        self.out
            .send(Outbound::Frame(frame))
            .map_err(|_| Error::Transport("connection closed".to_owned()))
    }
}

impl Transport for SocketIoTransport {
    fn send(&mut self, event: ClientEvent) -> Result<()> {
        if self.closed {
            return Err(Error::Transport("connection closed".to_owned()));
        }

        let (packet, attachments) = event.into_event().into_packet();
        self.push(socket_io_frame(&packet))?;
        for bytes in attachments {
            self.push(Message::Binary(bytes.into()))?;
        }
        Ok(())
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        debug!("closing connection");
        let _ = self.out.send(Outbound::Close);
        self.reader.abort();
    }
}

impl Drop for SocketIoTransport {
    fn drop(&mut self) {
        self.close();
    }
}

fn socket_io_frame(packet: &socket_io::Packet) -> Message {
    engine_frame(&engine_io::Packet::Message(packet.encode()))
}

fn engine_frame(packet: &engine_io::Packet) -> Message {
    Message::Text(packet.encode().into())
}

fn closed_during_handshake() -> Error {
    Error::Transport("connection closed during handshake".to_owned())
}

async fn await_open(stream: &mut WsSource) -> Result<Handshake> {
    loop {
        match stream.next().await {
            Some(Ok(Message::Text(text))) => match engine_io::Packet::decode(text.as_str())? {
                engine_io::Packet::Open(handshake) => return Ok(handshake),
                other => debug!(?other, "ignoring packet before open"),
            },
            Some(Ok(Message::Close(_))) | None => return Err(closed_during_handshake()),
            Some(Ok(_)) => {}
            Some(Err(err)) => return Err(err.into()),
        }
    }
}

async fn await_connect_ack(
    sink: &mut WsSink,
    stream: &mut WsSource,
    decoder: &mut Decoder,
) -> Result<Option<String>> {
    loop {
        let text = match stream.next().await {
            Some(Ok(Message::Text(text))) => text,
            Some(Ok(Message::Close(_))) | None => return Err(closed_during_handshake()),
            Some(Ok(_)) => continue,
            Some(Err(err)) => return Err(err.into()),
        };

        match engine_io::Packet::decode(text.as_str())? {
            engine_io::Packet::Ping(data) => {
                sink.send(engine_frame(&engine_io::Packet::Pong(data)))
                    .await?;
            }
            engine_io::Packet::Message(payload) => match decoder.decode_text(&payload)? {
                Some(Incoming::Connected { sid }) => return Ok(sid),
                Some(Incoming::ConnectError(message)) => {
                    return Err(Error::Transport(format!(
                        "server refused connection: {message}"
                    )));
                }
                other => debug!(?other, "ignoring packet before connect ack"),
            },
            engine_io::Packet::Close => return Err(closed_during_handshake()),
            _ => {}
        }
    }
}

async fn write_loop(mut sink: WsSink, mut outbound: mpsc::UnboundedReceiver<Outbound>) {
    while let Some(next) = outbound.recv().await {
        match next {
            Outbound::Frame(frame) => {
                if let Err(err) = sink.send(frame).await {
                    warn!(error = %err, "websocket send failed");
                    break;
                }
            }
            Outbound::Close => {
                let _ = sink
                    .send(socket_io_frame(&socket_io::Packet::disconnect()))
                    .await;
                let _ = sink.close().await;
                break;
            }
        }
    }
}

enum Flow {
    Continue,
    Deliver(ServerEvent),
    Closed(Option<String>),
}

async fn read_loop(
    mut stream: WsSource,
    mut decoder: Decoder,
    out: mpsc::UnboundedSender<Outbound>,
    events: mpsc::UnboundedSender<TransportEvent>,
    idle: Duration,
) {
    let reason = loop {
        let next = match tokio::time::timeout(idle, stream.next()).await {
            Ok(next) => next,
            Err(_) => break Some("ping timeout".to_owned()),
        };
        let frame = match next {
            Some(Ok(frame)) => frame,
            Some(Err(err)) => break Some(err.to_string()),
            None => break None,
        };

        match handle_frame(frame, &mut decoder, &out) {
            Ok(Flow::Continue) => {}
            Ok(Flow::Deliver(event)) => {
                if events.send(TransportEvent::Server(event)).is_err() {
                    return;
                }
            }
            Ok(Flow::Closed(reason)) => break reason,
            Err(err) => warn!(error = %err, "dropping malformed packet"),
        }
    };

    info!(reason = reason.as_deref().unwrap_or(""), "connection closed");
    let _ = events.send(TransportEvent::Closed { reason });
}

fn handle_frame(
    frame: Message,
    decoder: &mut Decoder,
    out: &mpsc::UnboundedSender<Outbound>,
) -> Result<Flow> {
    let incoming = match frame {
        Message::Text(text) => match engine_io::Packet::decode(text.as_str())? {
            engine_io::Packet::Ping(data) => {
                let pong = engine_frame(&engine_io::Packet::Pong(data));
                let _ = out.send(Outbound::Frame(pong));
                return Ok(Flow::Continue);
            }
            engine_io::Packet::Message(payload) => decoder.decode_text(&payload)?,
            engine_io::Packet::Close => {
                return Ok(Flow::Closed(Some("server closed the session".to_owned())));
            }
            _ => return Ok(Flow::Continue),
        },
        Message::Binary(bytes) => decoder.decode_binary(bytes.to_vec())?,
        Message::Close(frame) => {
            return Ok(Flow::Closed(frame.map(|f| f.reason.to_string())));
        }
        _ => return Ok(Flow::Continue),
    };

    match incoming {
        Some(Incoming::Event(event)) => {
            Ok(ServerEvent::from_event(event)?.map_or(Flow::Continue, Flow::Deliver))
        }
        Some(Incoming::Disconnected) => {
            Ok(Flow::Closed(Some("server disconnected".to_owned())))
        }
        Some(other) => {
            debug!(?other, "ignoring packet");
            Ok(Flow::Continue)
        }
        None => Ok(Flow::Continue),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_maps_http_to_ws() -> anyhow::Result<()> {
        let url = endpoint_url("http://localhost:5000", None)?;
        assert_eq!(
            url.as_str(),
            "ws://localhost:5000/socket.io/?EIO=4&transport=websocket"
        );
        Ok(())
    }

    #[test]
    fn endpoint_maps_https_and_keeps_base_path() -> anyhow::Result<()> {
        let url = endpoint_url("https://voice.example.com/agent/", Some("abc 1"))?;
        assert_eq!(
            url.as_str(),
            "wss://voice.example.com/agent/socket.io/?EIO=4&transport=websocket&agent_id=abc+1"
        );
        Ok(())
    }

    #[test]
    fn endpoint_rejects_other_schemes() {
        assert!(endpoint_url("ftp://example.com", None).is_err());
        assert!(endpoint_url("not a url", None).is_err());
    }
}
