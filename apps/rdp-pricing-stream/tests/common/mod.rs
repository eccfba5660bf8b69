//! Shared fixtures: an in-process streaming server and token helpers.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::net::SocketAddr;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::header::SEC_WEBSOCKET_PROTOCOL;

use rdp_pricing_stream::domain::token::IssuedToken;
use rdp_pricing_stream::infrastructure::broadcast::StreamEvent;
use rdp_pricing_stream::infrastructure::omm::{ReconnectConfig, StreamSessionConfig};
use rdp_pricing_stream::{EndpointDescriptor, TokenState};

/// Upper bound on any single wait in these tests.
pub const WAIT: Duration = Duration::from_secs(5);

/// Reconnect delay used by the tests.
pub const RECONNECT_DELAY: Duration = Duration::from_millis(100);

/// In-process streaming server accepting `tr_json2` WebSocket connections.
pub struct WsServer {
    addr: SocketAddr,
    connections: mpsc::UnboundedReceiver<Connection>,
    subprotocols: mpsc::UnboundedReceiver<Option<String>>,
}

impl WsServer {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (conn_tx, connections) = mpsc::unbounded_channel();
        let (proto_tx, subprotocols) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let proto_tx = proto_tx.clone();
                let callback = move |request: &Request, mut response: Response| -> Result<Response, ErrorResponse> {
                    let protocol = request.headers().get(SEC_WEBSOCKET_PROTOCOL).cloned();
                    let _ = proto_tx.send(
                        protocol
                            .as_ref()
                            .and_then(|p| p.to_str().ok())
                            .map(ToString::to_string),
                    );
                    if let Some(protocol) = protocol {
                        response.headers_mut().insert(SEC_WEBSOCKET_PROTOCOL, protocol);
                    }
                    Ok(response)
                };
                if let Ok(ws) = tokio_tungstenite::accept_hdr_async(stream, callback).await {
                    let _ = conn_tx.send(Connection { ws });
                }
            }
        });

        Self {
            addr,
            connections,
            subprotocols,
        }
    }

    /// Descriptor for this server with the given location tags.
    pub fn endpoint(&self, locations: &[&str]) -> EndpointDescriptor {
        EndpointDescriptor::new(
            self.addr.ip().to_string(),
            self.addr.port(),
            locations.iter().map(ToString::to_string).collect(),
        )
    }

    /// Next accepted connection.
    pub async fn accept(&mut self) -> Connection {
        timeout(WAIT, self.connections.recv())
            .await
            .expect("no connection within timeout")
            .expect("server stopped")
    }

    /// Next connection within `within`, if any.
    pub async fn try_accept(&mut self, within: Duration) -> Option<Connection> {
        timeout(within, self.connections.recv()).await.ok().flatten()
    }

    /// Subprotocol requested by the next handshake.
    pub async fn requested_subprotocol(&mut self) -> Option<String> {
        timeout(WAIT, self.subprotocols.recv())
            .await
            .expect("no handshake within timeout")
            .expect("server stopped")
    }
}

/// Server side of one client socket.
pub struct Connection {
    ws: WebSocketStream<TcpStream>,
}

impl Connection {
    /// Next JSON message from the client.
    pub async fn recv_json(&mut self) -> Value {
        loop {
            let frame = timeout(WAIT, self.ws.next())
                .await
                .expect("no frame within timeout")
                .expect("client closed the socket")
                .expect("WebSocket error");
            match frame {
                Message::Text(text) => return serde_json::from_str(text.as_str()).unwrap(),
                Message::Close(_) => panic!("client sent close"),
                _ => {}
            }
        }
    }

    /// Next JSON message within `within`, if any.
    pub async fn try_recv_json(&mut self, within: Duration) -> Option<Value> {
        timeout(within, self.recv_json()).await.ok()
    }

    /// Send a frame.
    pub async fn send_json(&mut self, value: Value) {
        self.ws.send(Message::Text(value.to_string().into())).await.unwrap();
    }

    /// Send raw text.
    pub async fn send_text(&mut self, text: &str) {
        self.ws.send(Message::Text(text.to_string().into())).await.unwrap();
    }

    /// Wait for the client's close frame (or the end of the stream).
    pub async fn expect_close(&mut self) {
        loop {
            match timeout(WAIT, self.ws.next()).await.expect("socket still open") {
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => return,
                Some(Ok(_)) => {}
            }
        }
    }

    /// Close the socket from the server side.
    pub async fn close(mut self) {
        let _ = self.ws.close(None).await;
    }
}

/// Login acknowledgement frame.
pub fn login_ack() -> Value {
    json!([{
        "ID": 1,
        "Type": "Refresh",
        "Domain": "Login",
        "Key": {"Name": "machine"},
        "State": {"Data": "Ok", "Stream": "Open", "Text": "Login accepted"}
    }])
}

/// Market price refresh frame.
pub fn price_refresh(name: &str) -> Value {
    json!([{
        "ID": 2,
        "Type": "Refresh",
        "Key": {"Service": "ELEKTRON_DD", "Name": name},
        "Fields": {"BID": 1.1, "ASK": 1.2}
    }])
}

/// Authenticated token state.
pub fn token(access: &str) -> TokenState {
    let mut state = TokenState::new("10.0.0.1", "256");
    state.apply(IssuedToken {
        access_token: access.to_string(),
        refresh_token: format!("{access}-refresh"),
        expires_in: 60,
    });
    state
}

/// Session settings for plain `ws://` test servers.
pub fn session_config() -> StreamSessionConfig {
    StreamSessionConfig {
        scheme: "ws".to_string(),
        reconnect: ReconnectConfig::new(RECONNECT_DELAY),
        ..StreamSessionConfig::default()
    }
}

/// Next bus event matching `predicate`, skipping the rest.
pub async fn next_event<F>(
    events: &mut tokio::sync::broadcast::Receiver<StreamEvent>,
    predicate: F,
) -> StreamEvent
where
    F: Fn(&StreamEvent) -> bool,
{
    timeout(WAIT, async {
        loop {
            let event = events.recv().await.expect("event bus closed");
            if predicate(&event) {
                return event;
            }
        }
    })
    .await
    .expect("no matching event within timeout")
}
