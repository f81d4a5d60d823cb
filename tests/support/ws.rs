use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use oasis_core::config::Config;
use oasis_core::{gateway, Oasis};
use serde_json::Value;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Spawns the real gateway over an ephemeral TCP port, backed by a live scheduler --
/// the way the binary runs -- so scenario tests can drive a genuine WebSocket round
/// trip instead of calling `dispatch::dispatch()` directly.
pub async fn spawn_server(config: Config) -> (Arc<Oasis>, String) {
    let oasis = Arc::new(Oasis::new(config));
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind ephemeral port");
    let addr = listener.local_addr().expect("local addr");
    let app = gateway::router(oasis.gateway_state.clone());

    let scheduler_oasis = oasis.clone();
    tokio::spawn(async move {
        let _ = scheduler_oasis.run_scheduler().await;
    });
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    (oasis, format!("ws://{addr}/ws"))
}

pub async fn connect(url: &str) -> WsStream {
    let (stream, _response) = connect_async(url).await.expect("connect websocket");
    stream
}

pub async fn send(ws: &mut WsStream, value: Value) {
    ws.send(Message::Text(value.to_string().into())).await.expect("send frame");
}

pub async fn recv_json(ws: &mut WsStream) -> Value {
    loop {
        match ws.next().await.expect("stream closed before a frame arrived").expect("websocket error") {
            Message::Text(text) => return serde_json::from_str(&text.to_string()).expect("frame is valid json"),
            _ => continue,
        }
    }
}

/// Reads frames until one satisfies `pred`, bounded by `timeout` so a missing event
/// fails the test instead of hanging it.
pub async fn recv_until(ws: &mut WsStream, timeout: Duration, pred: impl Fn(&Value) -> bool) -> Value {
    tokio::time::timeout(timeout, async {
        loop {
            let value = recv_json(ws).await;
            if pred(&value) {
                return value;
            }
        }
    })
    .await
    .expect("timed out waiting for a matching frame")
}
