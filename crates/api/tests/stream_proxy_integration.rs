//! Stream proxy integration tests.
//!
//! A fake device-side scrcpy WebSocket server stands in for the forwarded
//! port; the real router runs on a local listener and a real WebSocket
//! client drives the proxy.

mod common;

use std::time::{Duration, Instant};

use common::spawn_app;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

/// Baseline SPS advertising a 720x1280 stream.
const SPS_720X1280: &[u8] = &[
    0x00, 0x00, 0x00, 0x01, 0x67, 0x42, 0x00, 0x28, 0xF8, 0x16, 0x81, 0x43, 0x00,
];

const RECV_TIMEOUT: Duration = Duration::from_secs(5);

struct FakeDevice {
    port: u16,
    packets: mpsc::UnboundedReceiver<(Vec<u8>, Instant)>,
}

/// Starts a WebSocket server that plays the device side: sends the SPS once
/// a client arrives, then records every binary packet it receives.
async fn start_fake_device(initial_frames: Vec<Vec<u8>>) -> FakeDevice {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        let Ok((stream, _)) = listener.accept().await else {
            return;
        };
        let Ok(ws) = tokio_tungstenite::accept_async(stream).await else {
            return;
        };
        let (mut sink, mut stream) = ws.split();

        for frame in initial_frames {
            if sink.send(Message::Binary(frame)).await.is_err() {
                return;
            }
        }

        while let Some(Ok(message)) = stream.next().await {
            if let Message::Binary(data) = message {
                let _ = tx.send((data, Instant::now()));
            }
        }
    });

    FakeDevice { port, packets: rx }
}

/// Binds the app to a local port and returns its address.
async fn serve_app(router: axum::Router) -> std::net::SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });
    addr
}

async fn recv_packet(device: &mut FakeDevice) -> (Vec<u8>, Instant) {
    timeout(RECV_TIMEOUT, device.packets.recv())
        .await
        .expect("timed out waiting for a device packet")
        .expect("device channel closed")
}

#[tokio::test]
async fn proxy_announces_video_size_and_translates_commands() {
    let app = spawn_app().await;
    let mut device = start_fake_device(vec![SPS_720X1280.to_vec()]).await;
    app.adb.on_ok(
        "forward --list",
        &format!("dev tcp:{} tcp:8886\n", device.port),
    );

    let addr = serve_app(app.router.clone()).await;
    let url = format!("ws://{addr}/?udid=dev&port={}", device.port);
    let (client, _) = connect_async(url.as_str()).await.expect("client connect");
    let (mut client_tx, mut client_rx) = client.split();

    // Bring-up is announced first.
    let connected = next_json(&mut client_rx).await;
    assert_eq!(connected["type"], "connected");
    assert_eq!(connected["data"]["deviceId"], "dev");
    assert!(connected["data"]["timestamp"].is_i64());

    // The SPS produces a videoSize notification AND is still forwarded.
    let mut video_size = None;
    let mut forwarded_frame = None;
    while video_size.is_none() || forwarded_frame.is_none() {
        match timeout(RECV_TIMEOUT, client_rx.next())
            .await
            .expect("timed out waiting for proxy output")
            .expect("stream ended")
            .expect("read error")
        {
            Message::Text(text) => {
                let value: serde_json::Value = serde_json::from_str(&text).unwrap();
                if value["type"] == "videoSize" {
                    video_size = Some(value);
                }
            }
            Message::Binary(data) => forwarded_frame = Some(data),
            _ => {}
        }
    }

    let video_size = video_size.unwrap();
    assert_eq!(video_size["data"]["width"], 720);
    assert_eq!(video_size["data"]["height"], 1280);
    assert_eq!(video_size["data"]["codec"], "avc1.420028");
    assert_eq!(forwarded_frame.unwrap(), SPS_720X1280.to_vec());

    // "home" becomes a DOWN/UP pair of 14-byte keycode packets, HOME=3,
    // at least 50 ms apart.
    client_tx
        .send(Message::Text(r#"{"type":"home"}"#.to_string()))
        .await
        .unwrap();

    let (down, down_at) = recv_packet(&mut device).await;
    assert_eq!(down.len(), 14);
    assert_eq!(down[0], 0); // InjectKeycode
    assert_eq!(down[1], 0); // ACTION_DOWN
    assert_eq!(u32::from_be_bytes(down[2..6].try_into().unwrap()), 3);

    let (up, up_at) = recv_packet(&mut device).await;
    assert_eq!(up.len(), 14);
    assert_eq!(up[1], 1); // ACTION_UP
    assert_eq!(u32::from_be_bytes(up[2..6].try_into().unwrap()), 3);
    assert!(up_at.duration_since(down_at) >= Duration::from_millis(45));

    // Touch coordinates are normalised against the SPS-derived size.
    client_tx
        .send(Message::Text(
            r#"{"type":"touch","data":{"action":0,"x":100,"y":200}}"#.to_string(),
        ))
        .await
        .unwrap();

    let (touch, _) = recv_packet(&mut device).await;
    assert_eq!(touch.len(), 28);
    assert_eq!(touch[0], 2); // InjectTouch
    assert_eq!(touch[1], 0); // ACTION_DOWN
    assert_eq!(u32::from_be_bytes(touch[10..14].try_into().unwrap()), 100);
    assert_eq!(u32::from_be_bytes(touch[14..18].try_into().unwrap()), 200);
    assert_eq!(u16::from_be_bytes(touch[18..20].try_into().unwrap()), 720);
    assert_eq!(u16::from_be_bytes(touch[20..22].try_into().unwrap()), 1280);
    assert_eq!(
        u16::from_be_bytes(touch[22..24].try_into().unwrap()),
        0xFFFF
    );

    // Raw binary from the client passes straight through to the device.
    client_tx
        .send(Message::Binary(vec![9, 9, 9]))
        .await
        .unwrap();
    let (raw, _) = recv_packet(&mut device).await;
    assert_eq!(raw, vec![9, 9, 9]);
}

#[tokio::test]
async fn missing_forward_yields_error_frame() {
    let app = spawn_app().await;
    // forward --list answers with an empty list by default.

    let addr = serve_app(app.router.clone()).await;
    let url = format!("ws://{addr}/?udid=ghost&port=10001");
    let (client, _) = connect_async(url.as_str()).await.expect("client connect");
    let (_tx, mut client_rx) = client.split();

    let error = next_json(&mut client_rx).await;
    assert_eq!(error["type"], "error");
    assert_eq!(error["code"], "PORT_FORWARD_NOT_FOUND");
    assert_eq!(error["data"]["deviceId"], "ghost");
}

#[tokio::test]
async fn device_disconnect_is_reported() {
    let app = spawn_app().await;

    // A device that sends one frame and immediately hangs up.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        if let Ok((stream, _)) = listener.accept().await {
            if let Ok(ws) = tokio_tungstenite::accept_async(stream).await {
                let (mut sink, _) = ws.split();
                let _ = sink.send(Message::Binary(vec![0, 0, 0, 1, 0x41])).await;
                let _ = sink.close().await;
            }
        }
    });

    app.adb
        .on_ok("forward --list", &format!("dev tcp:{port} tcp:8886\n"));

    let addr = serve_app(app.router.clone()).await;
    let url = format!("ws://{addr}/?udid=dev&port={port}");
    let (client, _) = connect_async(url.as_str()).await.expect("client connect");
    let (_tx, mut client_rx) = client.split();

    let mut saw_disconnect = false;
    for _ in 0..10 {
        match timeout(RECV_TIMEOUT, client_rx.next()).await {
            Ok(Some(Ok(Message::Text(text)))) => {
                let value: serde_json::Value = serde_json::from_str(&text).unwrap();
                if value["type"] == "disconnected" {
                    assert_eq!(value["code"], "DEVICE_CONNECTION_CLOSED");
                    saw_disconnect = true;
                    break;
                }
            }
            Ok(Some(Ok(_))) => {}
            _ => break,
        }
    }
    assert!(saw_disconnect, "no disconnected frame seen");
}

#[tokio::test]
async fn upgrade_requires_udid_and_port() {
    let app = spawn_app().await;
    let addr = serve_app(app.router.clone()).await;

    let result = connect_async(format!("ws://{addr}/?port=10001")).await;
    assert!(result.is_err(), "upgrade without udid must be refused");

    let result = connect_async(format!("ws://{addr}/?udid=dev")).await;
    assert!(result.is_err(), "upgrade without port must be refused");
}

async fn next_json<S>(stream: &mut S) -> serde_json::Value
where
    S: futures_util::Stream<
            Item = Result<Message, tokio_tungstenite::tungstenite::Error>,
        > + Unpin,
{
    loop {
        let message = timeout(RECV_TIMEOUT, stream.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("stream ended")
            .expect("read error");
        if let Message::Text(text) = message {
            return serde_json::from_str(&text).expect("text frame is JSON");
        }
    }
}
