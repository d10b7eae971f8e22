// Watchdog behaviour over the WebSocket link, against a local device that
// serves `/json` over plain HTTP and upgrades `/ws`.

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;

use ledbridge_core::{BridgeConfig, DeviceManager};

const MAC: &str = "a4cf12fdae01";

// ── Helpers ─────────────────────────────────────────────────────────

fn device_body() -> Value {
    json!({
        "state": { "on": true, "bri": 200, "seg": [{ "id": 0, "fx": 0 }] },
        "info": { "mac": MAC, "name": "Shelf", "ver": "0.14.0", "ws": 0 },
        "effects": ["Solid"],
        "palettes": ["Default"]
    })
}

/// Answer one HTTP request with `body` and close the connection.
async fn respond_json(mut stream: TcpStream, body: &str) {
    let mut request = Vec::new();
    let mut buf = [0u8; 1024];
    while !request.windows(4).any(|w| w == b"\r\n\r\n") {
        match stream.read(&mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(n) => request.extend_from_slice(&buf[..n]),
        }
    }
    let response = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    );
    let _ = stream.write_all(response.as_bytes()).await;
    let _ = stream.shutdown().await;
}

/// Device that serves `/json` and accepts the socket. With `answer_pings`
/// off it swallows every `ping`.
async fn spawn_device(answer_pings: bool) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let body = device_body().to_string();

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let body = body.clone();
            tokio::spawn(async move {
                let mut head = [0u8; 16];
                let n = stream.peek(&mut head).await.unwrap_or(0);
                if !head[..n].starts_with(b"GET /ws") {
                    respond_json(stream, &body).await;
                    return;
                }

                let Ok(mut ws) = tokio_tungstenite::accept_async(stream).await else {
                    return;
                };
                while let Some(Ok(msg)) = ws.next().await {
                    let Message::Text(text) = msg else { continue };
                    if text.as_str() == "ping" && answer_pings {
                        let _ = ws.send(Message::Text("pong".into())).await;
                    }
                }
            });
        }
    });

    addr
}

fn config_for(addr: SocketAddr) -> BridgeConfig {
    BridgeConfig {
        poll_interval: Duration::from_millis(100),
        ping_timeout: Duration::from_millis(100),
        max_retries: 1,
        websocket_enabled: true,
        discovery_enabled: false,
        device_port: addr.port(),
        ..BridgeConfig::default()
    }
}

async fn wait_until(what: &str, mut check: impl FnMut() -> bool) {
    for _ in 0..300 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}

// ── Tests ───────────────────────────────────────────────────────────

#[tokio::test]
async fn test_first_check_opens_the_socket() {
    let addr = spawn_device(true).await;
    let manager = DeviceManager::new(config_for(addr));
    manager.add_device(IpAddr::from([127, 0, 0, 1]));

    wait_until("socket connected", || {
        manager.devices().first().is_some_and(|d| d.ws_connected)
    })
    .await;

    // Pings keep getting answered, so the device stays up across checks.
    tokio::time::sleep(Duration::from_millis(350)).await;
    let device = manager.devices()[0].clone();
    assert!(device.connected);
    assert!(device.ws_connected);

    manager.shutdown().await;
}

#[tokio::test]
async fn test_missing_pong_latches_device_offline() {
    let addr = spawn_device(false).await;
    let manager = DeviceManager::new(config_for(addr));
    manager.add_device(IpAddr::from([127, 0, 0, 1]));

    wait_until("socket connected", || {
        manager.devices().first().is_some_and(|d| d.ws_connected)
    })
    .await;

    let bri = format!("{MAC}.bri");
    assert_eq!(manager.tree().get_state(&bri).unwrap().val, json!(200));

    wait_until("ping timeout", || {
        manager.tree().get_state(&bri).is_some_and(|s| s.val == json!(0))
    })
    .await;

    let tree = manager.tree();
    assert_eq!(tree.get_state(&format!("{MAC}.on")).unwrap().val, json!(false));
    assert_eq!(
        tree.get_state(&format!("{MAC}._info._online")).unwrap().val,
        json!(false)
    );
    let device = manager.devices()[0].clone();
    assert!(!device.connected);
    assert!(!device.ws_connected);

    manager.shutdown().await;
}
