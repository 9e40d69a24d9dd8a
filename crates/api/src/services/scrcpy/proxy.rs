//! Scrcpy WebSocket stream proxy.
//!
//! One accepted browser client is bridged to the device-side scrcpy server
//! (reached through the ADB port forward, itself speaking WebSocket). Three
//! pumps run per session:
//!
//! - client -> device: JSON command frames are translated into the binary
//!   control protocol, binary frames pass through.
//! - device -> queues: frames are classified by NAL type; SPS/PPS/IDR go to
//!   the key-frame queue, the rest to the message queue (drop-oldest).
//! - queues -> client: key frames drain first so a fresh key frame can
//!   overtake stale delta frames after a stall.
//!
//! Writes to the client socket share one mutex (WebSocket forbids concurrent
//! writers); writes to the device socket share another, taken by both the
//! pass-through pump and the command handlers.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::ws::{Message as ClientMessage, WebSocket};
use domain::models::stream::{
    encode_keycode_event, encode_touch_event, encode_video_settings, ClientCommand, VideoBounds,
    VideoSettings, ACTION_DOWN, ACTION_MOVE, ACTION_UP, KEYCODE_APP_SWITCH, KEYCODE_BACK,
    KEYCODE_HOME, KEYCODE_POWER, MAGIC_BYTES_INITIAL, MAGIC_BYTES_MESSAGE,
};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use shared::adb::AdbBridge;
use shared::h264;
use tokio::net::TcpStream;
use tokio::sync::{watch, Mutex, Notify};
use tokio_tungstenite::tungstenite::Message as DeviceMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

use super::queue::{is_key_frame, FrameQueue};

const KEY_FRAME_QUEUE_CAPACITY: usize = 100;
const MSG_QUEUE_CAPACITY: usize = 5000;
/// Messages drained from the backlog to admit a key frame.
const KEY_FRAME_ROOM: usize = 5;
const DEVICE_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(3);
const KEY_TAP_HOLD: Duration = Duration::from_millis(50);
const DEFAULT_CLICK_HOLD_MS: u64 = 100;
const DEFAULT_SWIPE_DURATION_MS: u64 = 500;
const DEFAULT_SWIPE_STEPS: u32 = 10;

type DeviceWs = WebSocketStream<MaybeTlsStream<TcpStream>>;
type DeviceSink = Arc<Mutex<SplitSink<DeviceWs, DeviceMessage>>>;
type ClientSink = Arc<Mutex<SplitSink<WebSocket, ClientMessage>>>;

/// Mutable per-session stream geometry.
#[derive(Debug, Default)]
struct StreamState {
    screen_width: u32,
    screen_height: u32,
    video_width: u32,
    video_height: u32,
    has_init_info: bool,
    video_settings_sent: bool,
}

/// Shared state of one proxied device connection.
pub struct DeviceConnection {
    pub udid: String,
    pub local_port: u16,
    state: Mutex<StreamState>,
    last_used: std::sync::Mutex<Instant>,
}

impl DeviceConnection {
    fn new(udid: String, local_port: u16) -> Self {
        Self {
            udid,
            local_port,
            state: Mutex::new(StreamState::default()),
            last_used: std::sync::Mutex::new(Instant::now()),
        }
    }

    fn touch(&self) {
        *self.last_used.lock().expect("last_used poisoned") = Instant::now();
    }

    fn idle_for(&self) -> Duration {
        self.last_used.lock().expect("last_used poisoned").elapsed()
    }
}

struct SessionHandle {
    conn: Arc<DeviceConnection>,
    done: watch::Sender<bool>,
}

/// Live proxied sessions, keyed by device udid.
pub struct ConnectionRegistry {
    sessions: Mutex<HashMap<String, SessionHandle>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
        }
    }

    async fn register(&self, conn: Arc<DeviceConnection>, done: watch::Sender<bool>) {
        let mut sessions = self.sessions.lock().await;
        if let Some(previous) = sessions.insert(
            conn.udid.clone(),
            SessionHandle {
                conn: conn.clone(),
                done,
            },
        ) {
            // A new client takes the device over; collapse the old session.
            let _ = previous.done.send(true);
        }
    }

    async fn deregister(&self, conn: &Arc<DeviceConnection>) {
        let mut sessions = self.sessions.lock().await;
        if let Some(handle) = sessions.get(&conn.udid) {
            if Arc::ptr_eq(&handle.conn, conn) {
                sessions.remove(&conn.udid);
            }
        }
    }

    /// Closes sessions idle for longer than `max_idle`. Returns how many.
    pub async fn close_idle(&self, max_idle: Duration) -> usize {
        let mut sessions = self.sessions.lock().await;
        let stale: Vec<String> = sessions
            .iter()
            .filter(|(_, handle)| handle.conn.idle_for() > max_idle)
            .map(|(udid, _)| udid.clone())
            .collect();

        for udid in &stale {
            if let Some(handle) = sessions.remove(udid) {
                let _ = handle.done.send(true);
                info!(udid = %udid, "closed idle stream session");
            }
        }
        stale.len()
    }

    pub async fn active_count(&self) -> usize {
        self.sessions.lock().await.len()
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Runs one proxied session to completion.
pub async fn handle_socket(
    registry: Arc<ConnectionRegistry>,
    adb: AdbBridge,
    socket: WebSocket,
    udid: String,
    port: u16,
) {
    let (client_sink, client_stream) = socket.split();
    let client_sink: ClientSink = Arc::new(Mutex::new(client_sink));

    // The forward must exist before anything is dialed.
    if let Err(detail) = check_port_forward(&adb, &udid, port).await {
        warn!(udid = %udid, port, detail = %detail, "port forward check failed");
        let _ = send_text(
            &client_sink,
            error_message("PORT_FORWARD_NOT_FOUND", &detail, &udid, port),
        )
        .await;
        return;
    }

    let device_ws = match dial_device(port).await {
        Ok(ws) => ws,
        Err(detail) => {
            warn!(udid = %udid, port, detail = %detail, "device connection failed");
            let _ = send_text(
                &client_sink,
                error_message("DEVICE_CONNECTION_FAILED", &detail, &udid, port),
            )
            .await;
            return;
        }
    };
    let (device_sink, device_stream) = device_ws.split();
    let device_sink: DeviceSink = Arc::new(Mutex::new(device_sink));

    let conn = Arc::new(DeviceConnection::new(udid.clone(), port));
    let (done_tx, done_rx) = watch::channel(false);
    registry.register(conn.clone(), done_tx.clone()).await;

    info!(udid = %udid, port, "stream proxy session established");
    let _ = send_text(&client_sink, connected_message(&udid, port)).await;

    let key_queue = Arc::new(FrameQueue::new(KEY_FRAME_QUEUE_CAPACITY));
    let msg_queue = Arc::new(FrameQueue::new(MSG_QUEUE_CAPACITY));
    let notify = Arc::new(Notify::new());

    let pump_a = tokio::spawn(pump_client_to_device(
        client_stream,
        device_sink.clone(),
        conn.clone(),
        done_tx.clone(),
        done_rx.clone(),
    ));
    let pump_b = tokio::spawn(pump_device_to_queues(
        device_stream,
        key_queue.clone(),
        msg_queue.clone(),
        notify.clone(),
        client_sink.clone(),
        conn.clone(),
        done_tx.clone(),
        done_rx.clone(),
    ));
    let pump_c = tokio::spawn(pump_queues_to_client(
        key_queue,
        msg_queue,
        notify,
        client_sink.clone(),
        device_sink.clone(),
        conn.clone(),
        done_tx.clone(),
        done_rx,
    ));

    // A pump that dies (even by panic) must not leave the session half-open.
    for handle in [pump_a, pump_b, pump_c] {
        if let Err(e) = handle.await {
            error!(udid = %udid, error = %e, "stream pump aborted");
            let _ = done_tx.send(true);
        }
    }

    registry.deregister(&conn).await;
    let _ = device_sink.lock().await.close().await;
    info!(udid = %udid, "stream proxy session closed");
}

async fn check_port_forward(adb: &AdbBridge, udid: &str, port: u16) -> Result<(), String> {
    let forwards = adb
        .forward_list()
        .await
        .map_err(|e| format!("unable to list forwards: {e}"))?;

    let device_prefix = format!("{udid}:");
    let found = forwards.iter().any(|f| {
        (f.serial == udid || f.serial.starts_with(&device_prefix))
            && (f.local == port || f.remote == port)
    });

    if found {
        Ok(())
    } else {
        Err(format!("no forward installed for {udid} on port {port}"))
    }
}

async fn dial_device(port: u16) -> Result<DeviceWs, String> {
    let url = format!("ws://localhost:{port}");
    match tokio::time::timeout(DEVICE_HANDSHAKE_TIMEOUT, connect_async(url)).await {
        Ok(Ok((ws, _))) => Ok(ws),
        Ok(Err(e)) => Err(format!("device WebSocket dial failed: {e}")),
        Err(_) => Err("device WebSocket handshake timed out".to_string()),
    }
}

/// Pump A: client frames go to the device; TEXT frames are commands.
async fn pump_client_to_device(
    mut client_stream: SplitStream<WebSocket>,
    device_sink: DeviceSink,
    conn: Arc<DeviceConnection>,
    done_tx: watch::Sender<bool>,
    mut done_rx: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = done_rx.changed() => {
                if *done_rx.borrow() {
                    break;
                }
            }
            message = client_stream.next() => match message {
                Some(Ok(ClientMessage::Text(text))) => {
                    conn.touch();
                    handle_command(&conn, &device_sink, &text).await;
                }
                Some(Ok(ClientMessage::Binary(data))) => {
                    conn.touch();
                    if send_to_device(&device_sink, data).await.is_err() {
                        break;
                    }
                }
                Some(Ok(ClientMessage::Close(_))) | None => {
                    debug!(udid = %conn.udid, "client closed the stream");
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!(udid = %conn.udid, error = %e, "client read failed");
                    break;
                }
            }
        }
    }
    let _ = done_tx.send(true);
}

/// Pump B: device frames are classified and queued.
#[allow(clippy::too_many_arguments)]
async fn pump_device_to_queues(
    mut device_stream: SplitStream<DeviceWs>,
    key_queue: Arc<FrameQueue>,
    msg_queue: Arc<FrameQueue>,
    notify: Arc<Notify>,
    client_sink: ClientSink,
    conn: Arc<DeviceConnection>,
    done_tx: watch::Sender<bool>,
    mut done_rx: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = done_rx.changed() => {
                if *done_rx.borrow() {
                    break;
                }
            }
            frame = device_stream.next() => match frame {
                // Each WebSocket message is already an owned buffer; no
                // reuse hazard on the way into the queues.
                Some(Ok(DeviceMessage::Binary(data))) => {
                    conn.touch();
                    enqueue_frame(&key_queue, &msg_queue, data);
                    notify.notify_one();
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!(udid = %conn.udid, error = %e, "device read failed");
                    let _ = send_text(
                        &client_sink,
                        disconnected_message(&conn.udid, &e.to_string()),
                    )
                    .await;
                    break;
                }
                None => {
                    let _ = send_text(
                        &client_sink,
                        disconnected_message(&conn.udid, "device stream ended"),
                    )
                    .await;
                    break;
                }
            }
        }
    }
    let _ = done_tx.send(true);
}

/// Queue admission: key frames may evict backlog, never the other way round.
fn enqueue_frame(key_queue: &FrameQueue, msg_queue: &FrameQueue, data: Vec<u8>) {
    if is_key_frame(&data) {
        if let Err(frame) = key_queue.try_push(data) {
            msg_queue.drain_front(KEY_FRAME_ROOM);
            if key_queue.try_push(frame).is_err() {
                warn!("key frame queue saturated, dropping key frame");
            }
        }
    } else if msg_queue.push_drop_oldest(data) {
        debug!("message queue full, dropped oldest frame");
    }
}

/// Pump C: drains key frames first, then backlog, to the client.
#[allow(clippy::too_many_arguments)]
async fn pump_queues_to_client(
    key_queue: Arc<FrameQueue>,
    msg_queue: Arc<FrameQueue>,
    notify: Arc<Notify>,
    client_sink: ClientSink,
    device_sink: DeviceSink,
    conn: Arc<DeviceConnection>,
    done_tx: watch::Sender<bool>,
    mut done_rx: watch::Receiver<bool>,
) {
    'outer: loop {
        tokio::select! {
            _ = done_rx.changed() => {
                if *done_rx.borrow() {
                    break;
                }
            }
            _ = notify.notified() => {
                loop {
                    while let Some(frame) = key_queue.pop() {
                        if forward_frame(&conn, &client_sink, &device_sink, frame).await.is_err() {
                            break 'outer;
                        }
                    }
                    match msg_queue.pop() {
                        Some(frame) => {
                            if forward_frame(&conn, &client_sink, &device_sink, frame).await.is_err() {
                                break 'outer;
                            }
                        }
                        None => break,
                    }
                }
            }
        }
    }
    let _ = done_tx.send(true);
}

/// Interprets special records, then forwards the frame verbatim.
async fn forward_frame(
    conn: &Arc<DeviceConnection>,
    client_sink: &ClientSink,
    device_sink: &DeviceSink,
    frame: Vec<u8>,
) -> Result<(), axum::Error> {
    handle_special(conn, client_sink, device_sink, &frame).await;
    client_sink
        .lock()
        .await
        .send(ClientMessage::Binary(frame))
        .await
}

async fn handle_special(
    conn: &Arc<DeviceConnection>,
    client_sink: &ClientSink,
    device_sink: &DeviceSink,
    frame: &[u8],
) {
    if frame.starts_with(MAGIC_BYTES_INITIAL) {
        handle_initial_info(conn, device_sink, frame).await;
        return;
    }

    if frame.starts_with(MAGIC_BYTES_MESSAGE) {
        if let Some(kind) = frame.get(MAGIC_BYTES_MESSAGE.len()) {
            debug!(udid = %conn.udid, kind, "device message");
        }
        return;
    }

    if h264::nal_unit_type(frame) == Some(7) {
        match h264::parse_sps(frame) {
            Ok(info) => {
                let (width, height) = info.video_size();
                let changed = {
                    let mut state = conn.state.lock().await;
                    if width != state.video_width || height != state.video_height {
                        state.video_width = width;
                        state.video_height = height;
                        true
                    } else {
                        false
                    }
                };
                if changed {
                    let codec = info.codec_string();
                    info!(
                        udid = %conn.udid,
                        width, height, codec = %codec,
                        "encoded video size detected"
                    );
                    let _ = send_text(client_sink, video_size_message(width, height, &codec)).await;
                }
            }
            Err(e) => debug!(udid = %conn.udid, error = %e, "SPS parse failed"),
        }
    }
}

/// Device metadata record: 64-byte device name, display count, then one
/// 24-byte record per display with width at [4..8) and height at [8..12).
async fn handle_initial_info(conn: &Arc<DeviceConnection>, device_sink: &DeviceSink, frame: &[u8]) {
    if let Some((width, height)) = parse_initial_info(frame) {
        let mut state = conn.state.lock().await;
        state.screen_width = width;
        state.screen_height = height;
        state.has_init_info = true;
        info!(udid = %conn.udid, width, height, "device screen size");
    } else {
        let mut state = conn.state.lock().await;
        state.has_init_info = true;
    }

    let needs_settings = {
        let state = conn.state.lock().await;
        !state.video_settings_sent
    };
    if needs_settings {
        let packet = encode_video_settings(&VideoSettings::default());
        if send_to_device(device_sink, packet.to_vec()).await.is_ok() {
            conn.state.lock().await.video_settings_sent = true;
        }
    }
}

fn parse_initial_info(frame: &[u8]) -> Option<(u32, u32)> {
    let mut offset = MAGIC_BYTES_INITIAL.len();
    offset += 64; // device name

    let count_bytes = frame.get(offset..offset + 4)?;
    let displays = u32::from_be_bytes(count_bytes.try_into().ok()?);
    offset += 4;
    if displays == 0 {
        return None;
    }

    let record = frame.get(offset..offset + 24)?;
    let width = u32::from_be_bytes(record[4..8].try_into().ok()?);
    let height = u32::from_be_bytes(record[8..12].try_into().ok()?);
    Some((width, height))
}

/// Translates one JSON command; malformed commands are logged and dropped.
async fn handle_command(conn: &Arc<DeviceConnection>, device_sink: &DeviceSink, text: &str) {
    let command: ClientCommand = match serde_json::from_str(text) {
        Ok(command) => command,
        Err(e) => {
            warn!(udid = %conn.udid, error = %e, "dropping malformed command");
            return;
        }
    };

    match command {
        ClientCommand::Touch { action, x, y } => {
            send_touch(conn, device_sink, action, x, y).await;
        }
        ClientCommand::Click { x, y, duration } => {
            send_touch(conn, device_sink, ACTION_DOWN, x, y).await;
            tokio::time::sleep(Duration::from_millis(duration.unwrap_or(DEFAULT_CLICK_HOLD_MS)))
                .await;
            send_touch(conn, device_sink, ACTION_UP, x, y).await;
        }
        ClientCommand::Swipe {
            start_x,
            start_y,
            end_x,
            end_y,
            duration,
            steps,
        } => {
            let steps = steps.filter(|s| *s > 0).unwrap_or(DEFAULT_SWIPE_STEPS);
            let duration = duration
                .filter(|d| *d > 0)
                .unwrap_or(DEFAULT_SWIPE_DURATION_MS);
            let step_delay = Duration::from_millis(duration / u64::from(steps));

            send_touch(conn, device_sink, ACTION_DOWN, start_x, start_y).await;
            tokio::time::sleep(KEY_TAP_HOLD).await;

            for i in 1..=steps {
                let x = interpolate(start_x, end_x, i, steps);
                let y = interpolate(start_y, end_y, i, steps);
                send_touch(conn, device_sink, ACTION_MOVE, x, y).await;
                tokio::time::sleep(step_delay).await;
            }

            send_touch(conn, device_sink, ACTION_UP, end_x, end_y).await;
        }
        ClientCommand::Keycode {
            action,
            keycode,
            repeat,
            meta_state,
        } => {
            let packet = encode_keycode_event(
                action,
                keycode,
                repeat.unwrap_or(0),
                meta_state.unwrap_or(0),
            );
            let _ = send_to_device(device_sink, packet.to_vec()).await;
        }
        ClientCommand::Home => key_tap(device_sink, KEYCODE_HOME).await,
        ClientCommand::Back => key_tap(device_sink, KEYCODE_BACK).await,
        ClientCommand::Overview => key_tap(device_sink, KEYCODE_APP_SWITCH).await,
        ClientCommand::Power => key_tap(device_sink, KEYCODE_POWER).await,
        ClientCommand::VideoSettings {
            bitrate,
            max_fps,
            i_frame_interval,
            bounds,
            send_frame_meta,
            locked_video_orientation,
            display_id,
        } => {
            let defaults = VideoSettings::default();
            let settings = VideoSettings {
                bitrate,
                max_fps,
                i_frame_interval,
                bounds: bounds
                    .map(|b| VideoBounds {
                        width: b.width,
                        height: b.height,
                    })
                    .unwrap_or(defaults.bounds),
                send_frame_meta: send_frame_meta.unwrap_or(false),
                locked_video_orientation: locked_video_orientation.unwrap_or(-1),
                display_id: display_id.unwrap_or(0),
            };
            let packet = encode_video_settings(&settings);
            if send_to_device(device_sink, packet.to_vec()).await.is_ok() {
                conn.state.lock().await.video_settings_sent = true;
            }
        }
    }
}

/// DOWN, short hold, UP — the fixed-keycode shortcuts.
async fn key_tap(device_sink: &DeviceSink, keycode: u32) {
    let down = encode_keycode_event(ACTION_DOWN, keycode, 0, 0);
    if send_to_device(device_sink, down.to_vec()).await.is_err() {
        return;
    }
    tokio::time::sleep(KEY_TAP_HOLD).await;
    let up = encode_keycode_event(ACTION_UP, keycode, 0, 0);
    let _ = send_to_device(device_sink, up.to_vec()).await;
}

/// Touch coordinates are normalised against the encoded video size when
/// known, otherwise the reported screen size.
async fn send_touch(conn: &Arc<DeviceConnection>, device_sink: &DeviceSink, action: u8, x: u32, y: u32) {
    let (width, height) = {
        let state = conn.state.lock().await;
        if state.video_width > 0 && state.video_height > 0 {
            (state.video_width, state.video_height)
        } else {
            (state.screen_width, state.screen_height)
        }
    };

    let packet = encode_touch_event(action, x, y, width as u16, height as u16);
    let _ = send_to_device(device_sink, packet.to_vec()).await;
}

fn interpolate(start: u32, end: u32, step: u32, steps: u32) -> u32 {
    let start = f64::from(start);
    let end = f64::from(end);
    (start + (end - start) * f64::from(step) / f64::from(steps)) as u32
}

async fn send_to_device(
    device_sink: &DeviceSink,
    data: Vec<u8>,
) -> Result<(), tokio_tungstenite::tungstenite::Error> {
    device_sink
        .lock()
        .await
        .send(DeviceMessage::Binary(data))
        .await
}

async fn send_text(client_sink: &ClientSink, text: String) -> Result<(), axum::Error> {
    client_sink
        .lock()
        .await
        .send(ClientMessage::Text(text))
        .await
}

fn connected_message(udid: &str, port: u16) -> String {
    serde_json::json!({
        "type": "connected",
        "data": {
            "deviceId": udid,
            "port": port,
            "timestamp": chrono::Utc::now().timestamp_millis(),
        },
    })
    .to_string()
}

fn error_message(code: &str, detail: &str, udid: &str, port: u16) -> String {
    serde_json::json!({
        "type": "error",
        "code": code,
        "message": detail,
        "data": {
            "deviceId": udid,
            "port": port,
            "errorDetail": detail,
        },
    })
    .to_string()
}

fn disconnected_message(udid: &str, detail: &str) -> String {
    serde_json::json!({
        "type": "disconnected",
        "code": "DEVICE_CONNECTION_CLOSED",
        "message": format!("device connection closed: {detail}"),
        "data": {
            "deviceId": udid,
            "errorDetail": detail,
        },
    })
    .to_string()
}

fn video_size_message(width: u32, height: u32, codec: &str) -> String {
    serde_json::json!({
        "type": "videoSize",
        "data": {
            "width": width,
            "height": height,
            "codec": codec,
        },
    })
    .to_string()
}
