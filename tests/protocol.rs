use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::{WebSocketStream, accept_hdr_async};

use talkback::protocol::{ClientEvent, ServerEvent};
use talkback::transport::{Connection, Connector, SocketIoConnector, Transport, TransportEvent};

const OPEN: &str =
    r#"0{"sid":"eio-1","upgrades":[],"pingInterval":25000,"pingTimeout":20000,"maxPayload":1000000}"#;

type ServerWs = WebSocketStream<TcpStream>;

/// Accept one client and run the Engine.IO/Socket.IO handshake. Returns the request URI.
async fn accept(listener: &TcpListener, ack: &str) -> anyhow::Result<(ServerWs, String)> {
    let (stream, _) = listener.accept().await?;
    let mut uri = String::new();
    let mut ws = accept_hdr_async(
        stream,
        |req: &Request, resp: Response| -> std::result::Result<Response, ErrorResponse> {
            uri = req.uri().to_string();
            Ok(resp)
        },
    )
    .await?;

    ws.send(Message::Text(OPEN.into())).await?;
    anyhow::ensure!(next_text(&mut ws).await? == "40", "expected a namespace connect");
    ws.send(Message::Text(ack.into())).await?;
    Ok((ws, uri))
}

async fn next_text(ws: &mut ServerWs) -> anyhow::Result<String> {
    loop {
        match ws.next().await {
            Some(Ok(Message::Text(text))) => return Ok(text.to_string()),
            Some(Ok(Message::Binary(_))) => anyhow::bail!("unexpected binary frame"),
            Some(Ok(_)) => continue,
            Some(Err(err)) => return Err(err.into()),
            None => anyhow::bail!("client went away"),
        }
    }
}

/// Everything the client sends until it closes the socket.
async fn drain(ws: &mut ServerWs) -> anyhow::Result<Vec<Message>> {
    let mut received = Vec::new();
    while let Some(frame) = ws.next().await {
        match frame? {
            Message::Close(_) => break,
            frame => received.push(frame),
        }
    }
    Ok(received)
}

#[tokio::test]
async fn exchanges_events_with_a_socket_io_server() -> anyhow::Result<()> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;

    let server = tokio::spawn(async move {
        let (mut ws, uri) = accept(&listener, r#"40{"sid":"sio-1"}"#).await?;

        ws.send(Message::Text("2".into())).await?;
        anyhow::ensure!(next_text(&mut ws).await? == "3", "expected a pong");

        ws.send(Message::Text(r#"42["mystery",1]"#.into())).await?;
        ws.send(Message::Text(
            r#"451-["audio_chunk",{"_placeholder":true,"num":0}]"#.into(),
        ))
        .await?;
        ws.send(Message::Binary(vec![1, 2, 3].into())).await?;
        ws.send(Message::Text(r#"42["agent_response",{"text":"hello"}]"#.into()))
            .await?;

        let received = drain(&mut ws).await?;
        anyhow::Ok((uri, received))
    });

    let mut connector = SocketIoConnector::new(&format!("http://{addr}"), Some("agent-7"))?;
    let Connection {
        mut transport,
        mut events,
    } = connector.connect().await?;

    assert_eq!(
        events.recv().await,
        Some(TransportEvent::Server(ServerEvent::AudioChunk(vec![1, 2, 3])))
    );
    assert_eq!(
        events.recv().await,
        Some(TransportEvent::Server(ServerEvent::AgentResponse {
            text: "hello".to_owned()
        }))
    );

    transport.send(ClientEvent::StopStream)?;
    transport.send(ClientEvent::AudioChunk(vec![7, 8]))?;
    transport.close();
    assert!(transport.send(ClientEvent::StopStream).is_err());

    let (uri, received) = server.await??;
    assert_eq!(uri, "/socket.io/?EIO=4&transport=websocket&agent_id=agent-7");
    assert_eq!(received.len(), 4, "{received:?}");
    assert_eq!(received[0], Message::Text(r#"42["stop_stream"]"#.into()));
    assert_eq!(
        received[1],
        Message::Text(r#"451-["audio_chunk",{"_placeholder":true,"num":0}]"#.into())
    );
    assert_eq!(received[2], Message::Binary(vec![7, 8].into()));
    assert_eq!(received[3], Message::Text("41".into()));
    Ok(())
}

#[tokio::test]
async fn refused_namespace_connect_fails_the_handshake() -> anyhow::Result<()> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;

    let server = tokio::spawn(async move {
        let (mut ws, _) = accept(&listener, r#"44{"message":"unauthorized"}"#).await?;
        let _ = drain(&mut ws).await;
        anyhow::Ok(())
    });

    let mut connector = SocketIoConnector::new(&format!("http://{addr}"), None)?;
    let err = match connector.connect().await {
        Ok(_) => anyhow::bail!("connect should fail"),
        Err(err) => err,
    };
    assert!(err.to_string().contains("unauthorized"), "{err}");

    server.await??;
    Ok(())
}

#[tokio::test]
async fn server_close_is_reported() -> anyhow::Result<()> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;

    let server = tokio::spawn(async move {
        let (mut ws, _) = accept(&listener, r#"40{"sid":"sio-2"}"#).await?;
        ws.send(Message::Text("1".into())).await?;
        let _ = drain(&mut ws).await;
        anyhow::Ok(())
    });

    let mut connector = SocketIoConnector::new(&format!("ws://{addr}/"), None)?;
    let Connection { transport, mut events } = connector.connect().await?;

    assert_eq!(
        events.recv().await,
        Some(TransportEvent::Closed {
            reason: Some("server closed the session".to_owned())
        })
    );
    drop(transport);

    server.await??;
    Ok(())
}
