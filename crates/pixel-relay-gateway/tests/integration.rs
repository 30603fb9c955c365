//! Relay integration tests: start a real server and interact via WS + HTTP.
//!
//! Run with: `cargo test -p pixel-relay-gateway --test integration`

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::json;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use pixel_relay_core::config::{Config, GatewayConfig, RateLimitConfig};
use pixel_relay_core::{Envelope, PixelEvent};
use pixel_relay_gateway::RelayState;

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Start a relay on an ephemeral port and return its state + address.
async fn start_test_relay(config: Config) -> (Arc<RelayState>, SocketAddr) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let state = Arc::new(RelayState::new(Arc::new(config)));

    let state_clone = state.clone();
    tokio::spawn(async move {
        let _ = pixel_relay_gateway::serve(listener, state_clone, std::future::pending()).await;
    });

    (state, addr)
}

async fn connect(addr: SocketAddr) -> Client {
    let url = format!("ws://{addr}/canvas");
    let (ws, _) = connect_async(&url).await.expect("WS connect failed");
    ws
}

/// Next text frame decoded as an envelope.
async fn next_envelope(ws: &mut Client) -> Envelope {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("stream ended")
            .expect("WS error");
        if let Message::Text(text) = msg {
            return Envelope::decode(text.as_str()).unwrap();
        }
    }
}

/// Assert no text frame arrives within a short window.
async fn assert_silent(ws: &mut Client) {
    let result = tokio::time::timeout(Duration::from_millis(300), async {
        loop {
            match ws.next().await {
                Some(Ok(Message::Text(text))) => return text.to_string(),
                Some(Ok(_)) => continue,
                _ => std::future::pending::<()>().await,
            }
        }
    })
    .await;
    assert!(result.is_err(), "unexpected frame: {:?}", result.ok());
}

async fn send_draw(ws: &mut Client, event: &PixelEvent) {
    let frame = Envelope::Draw(event.clone()).encode();
    ws.send(Message::Text(frame.into())).await.unwrap();
}

async fn wait_until(what: &str, mut condition: impl FnMut() -> bool) {
    for _ in 0..100 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("timed out waiting until {what}");
}

#[tokio::test]
async fn test_health_endpoint() {
    let (_state, addr) = start_test_relay(Config::default()).await;

    let resp = reqwest::get(format!("http://{addr}/health"))
        .await
        .expect("Health request failed");

    assert!(resp.status().is_success());
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "ok");
    assert!(body["version"].is_string());
    assert_eq!(body["peers"], 0);
    assert_eq!(body["events"], 0);
}

#[tokio::test]
async fn test_example_scenario() {
    let (state, addr) = start_test_relay(Config::default()).await;

    let mut a = connect(addr).await;
    assert_eq!(next_envelope(&mut a).await, Envelope::Snapshot(vec![]));

    let first = PixelEvent::new(5.0, 5.0, "#ff0000");
    send_draw(&mut a, &first).await;
    wait_until("first draw accepted", || state.relay.snapshot().len() == 1).await;

    let mut b = connect(addr).await;
    assert_eq!(next_envelope(&mut b).await, Envelope::Snapshot(vec![first]));

    let second = PixelEvent::new(6.0, 6.0, "#00ff00");
    send_draw(&mut a, &second).await;
    assert_eq!(next_envelope(&mut b).await, Envelope::Draw(second));

    assert_silent(&mut a).await;
    assert_silent(&mut b).await;

    a.close(None).await.ok();
    b.close(None).await.ok();
}

#[tokio::test]
async fn test_fan_out_to_all_others() {
    let (_state, addr) = start_test_relay(Config::default()).await;

    let mut p1 = connect(addr).await;
    let mut p2 = connect(addr).await;
    let mut p3 = connect(addr).await;
    for ws in [&mut p1, &mut p2, &mut p3] {
        assert!(matches!(next_envelope(ws).await, Envelope::Snapshot(_)));
    }

    let event = PixelEvent::new(100.0, 200.0, "#123456");
    send_draw(&mut p1, &event).await;

    assert_eq!(next_envelope(&mut p2).await, Envelope::Draw(event.clone()));
    assert_eq!(next_envelope(&mut p3).await, Envelope::Draw(event));
    assert_silent(&mut p1).await;
}

#[tokio::test]
async fn test_wire_format_is_plain_json() {
    let (_state, addr) = start_test_relay(Config::default()).await;

    let mut a = connect(addr).await;
    let mut b = connect(addr).await;
    next_envelope(&mut a).await;
    next_envelope(&mut b).await;

    let raw = json!({"type": "DRAW_PIXEL", "payload": {"x": 1, "y": 2, "color": "#abcdef"}});
    a.send(Message::Text(raw.to_string().into())).await.unwrap();

    let msg = tokio::time::timeout(Duration::from_secs(5), b.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    let value: serde_json::Value = serde_json::from_str(msg.to_text().unwrap()).unwrap();
    assert_eq!(value["type"], "DRAW_PIXEL");
    assert_eq!(value["payload"]["x"], 1.0);
    assert_eq!(value["payload"]["y"], 2.0);
    assert_eq!(value["payload"]["color"], "#abcdef");
}

#[tokio::test]
async fn test_malformed_input_keeps_connection_open() {
    let (state, addr) = start_test_relay(Config::default()).await;

    let mut a = connect(addr).await;
    let mut b = connect(addr).await;
    next_envelope(&mut a).await;
    next_envelope(&mut b).await;

    for junk in [
        "this is not json",
        r#"{"type":"DRAW_PIXEL"}"#,
        r#"{"type":"DRAW_PIXEL","payload":{"x":1,"y":1}}"#,
        r#"{"type":"SOMETHING_NEW","payload":[]}"#,
    ] {
        a.send(Message::Text(junk.into())).await.unwrap();
    }
    assert_silent(&mut b).await;
    assert!(state.relay.snapshot().is_empty());

    // The sender is still connected and serviced.
    let event = PixelEvent::new(9.0, 9.0, "#999999");
    send_draw(&mut a, &event).await;
    assert_eq!(next_envelope(&mut b).await, Envelope::Draw(event));
    assert_eq!(state.relay.peer_count(), 2);
}

#[tokio::test]
async fn test_disconnect_cleanup() {
    let (state, addr) = start_test_relay(Config::default()).await;

    let mut a = connect(addr).await;
    let mut b = connect(addr).await;
    let mut c = connect(addr).await;
    for ws in [&mut a, &mut b, &mut c] {
        next_envelope(ws).await;
    }
    assert_eq!(state.relay.peer_count(), 3);

    b.close(None).await.unwrap();
    drop(b);
    wait_until("closed peer removed", || state.relay.peer_count() == 2).await;

    let event = PixelEvent::new(4.0, 4.0, "#444444");
    send_draw(&mut a, &event).await;
    assert_eq!(next_envelope(&mut c).await, Envelope::Draw(event));
    assert_eq!(state.relay.snapshot().len(), 1);
}

#[tokio::test]
async fn test_dropped_socket_is_removed() {
    let (state, addr) = start_test_relay(Config::default()).await;

    let mut a = connect(addr).await;
    let mut b = connect(addr).await;
    next_envelope(&mut a).await;
    next_envelope(&mut b).await;

    // No close handshake: the TCP connection just goes away.
    drop(b);
    wait_until("dropped peer removed", || state.relay.peer_count() == 1).await;

    send_draw(&mut a, &PixelEvent::new(1.0, 1.0, "#010101")).await;
    wait_until("draw accepted", || state.relay.snapshot().len() == 1).await;
    assert_eq!(state.relay.peer_count(), 1);
}

#[tokio::test]
async fn test_out_of_bounds_rejected() {
    let config = Config::parse(r#"{ canvas: { width: 1250, height: 700 } }"#).unwrap();
    let (state, addr) = start_test_relay(config).await;

    let mut a = connect(addr).await;
    let mut b = connect(addr).await;
    next_envelope(&mut a).await;
    next_envelope(&mut b).await;

    send_draw(&mut a, &PixelEvent::new(2000.0, 10.0, "#000000")).await;
    assert_silent(&mut b).await;
    assert!(state.relay.snapshot().is_empty());

    let inside = PixelEvent::new(1249.0, 699.0, "#000000");
    send_draw(&mut a, &inside).await;
    assert_eq!(next_envelope(&mut b).await, Envelope::Draw(inside));
}

#[tokio::test]
async fn test_connection_limit_per_ip() {
    let config = Config {
        gateway: Some(GatewayConfig {
            rate_limit: Some(RateLimitConfig {
                max_connections_per_ip: 1,
            }),
            ..Default::default()
        }),
        ..Default::default()
    };
    let (state, addr) = start_test_relay(config).await;

    let mut first = connect(addr).await;
    next_envelope(&mut first).await;

    let url = format!("ws://{addr}/canvas");
    let err = connect_async(&url).await.expect_err("second connection should be refused");
    match err {
        tokio_tungstenite::tungstenite::Error::Http(resp) => {
            assert_eq!(resp.status().as_u16(), 429);
        }
        other => panic!("unexpected error: {other:?}"),
    }

    // Closing the first connection frees the slot.
    first.close(None).await.unwrap();
    drop(first);
    wait_until("slot released", || state.relay.peer_count() == 0).await;
    let limiter = state.limiter.clone().unwrap();
    wait_until("permit dropped", || limiter.active_for(addr.ip()) == 0).await;

    let mut again = connect(addr).await;
    assert!(matches!(next_envelope(&mut again).await, Envelope::Snapshot(_)));
}
