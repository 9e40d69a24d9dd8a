//! Scrcpy server lifecycle.
//!
//! Per device the session walks
//! `Absent -> Pushing -> Starting -> PortForwarding -> Ready -> Absent`.
//! A re-request while a session is valid (live process, installed forward,
//! reachable local port) returns the existing endpoint; anything stale is
//! torn down and rebuilt.

use std::collections::HashMap;
use std::time::Duration;

use domain::models::stream::StartStreamResponse;
use shared::adb::AdbBridge;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::ScrcpyConfig;
use crate::error::ApiError;

const SERVER_JAR_DEVICE_PATH: &str = "/data/local/tmp/scrcpy-server.jar";
/// Remote and local jar sizes may differ by transfer metadata; a match
/// within this bound skips the push.
const JAR_SIZE_TOLERANCE: i64 = 1024;
const PUSH_RETRIES: u32 = 3;
const KILL_VERIFY_ATTEMPTS: u32 = 3;
const KILL_VERIFY_INTERVAL: Duration = Duration::from_millis(300);
const PORT_PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// One live scrcpy server on a device.
#[derive(Debug, Clone)]
pub struct StreamSession {
    pub device_id: String,
    pub device_port: u16,
    pub process_id: i64,
    pub local_port: u16,
}

/// Owns every per-device scrcpy server session.
pub struct StreamManager {
    adb: AdbBridge,
    config: ScrcpyConfig,
    sessions: Mutex<HashMap<String, StreamSession>>,
}

impl StreamManager {
    pub fn new(adb: AdbBridge, config: ScrcpyConfig) -> Self {
        Self {
            adb,
            config,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Brings the device's stream endpoint up (or returns the live one).
    pub async fn start(&self, device_id: &str) -> Result<StartStreamResponse, ApiError> {
        self.check_device_status(device_id).await?;

        let mut sessions = self.sessions.lock().await;

        if let Some(session) = sessions.get(device_id).cloned() {
            if self.validate_existing_session(&session).await {
                debug!(device_id, port = session.local_port, "reusing live session");
                return Ok(endpoint(session.local_port));
            }
            debug!(device_id, "existing session is stale, rebuilding");
            let _ = self.kill_server(&session.device_id, session.process_id).await;
            self.remove_port_forward(&session.device_id, session.local_port)
                .await;
            sessions.remove(device_id);
        }

        let mut session = StreamSession {
            device_id: device_id.to_string(),
            device_port: self.config.device_port,
            process_id: 0,
            local_port: 0,
        };

        self.push_server(device_id).await?;
        self.start_server(&mut session).await?;

        match self.setup_port_forward(&session).await {
            Ok(local_port) => session.local_port = local_port,
            Err(e) => {
                let _ = self.kill_server(device_id, session.process_id).await;
                return Err(e);
            }
        }

        if !is_local_port_reachable(session.local_port).await {
            let _ = self.kill_server(device_id, session.process_id).await;
            self.remove_port_forward(device_id, session.local_port).await;
            return Err(ApiError::StreamBringup(
                "server started but the local port is unreachable".into(),
            ));
        }

        info!(
            device_id,
            local_port = session.local_port,
            pid = session.process_id,
            "stream session ready"
        );
        let response = endpoint(session.local_port);
        sessions.insert(device_id.to_string(), session);
        Ok(response)
    }

    /// Tears the device's session down; a no-op when none exists.
    pub async fn stop(&self, device_id: &str) -> Result<(), ApiError> {
        let mut sessions = self.sessions.lock().await;
        let Some(session) = sessions.get(device_id).cloned() else {
            return Ok(());
        };

        if session.local_port > 0 {
            self.remove_port_forward(device_id, session.local_port).await;
        }
        self.kill_server(device_id, session.process_id).await?;
        sessions.remove(device_id);
        Ok(())
    }

    /// Device must be listed in `adb devices` as `device` and answer a
    /// shell probe.
    async fn check_device_status(&self, device_id: &str) -> Result<(), ApiError> {
        let state = self.adb.device_state(device_id).await?;
        match state.as_deref() {
            None => {
                return Err(ApiError::DeviceOffline(format!(
                    "device {device_id} is not connected"
                )))
            }
            Some("device") => {}
            Some(other) => {
                return Err(ApiError::DeviceOffline(format!(
                    "device {device_id} is in state {other}"
                )))
            }
        }

        match self.adb.probe(device_id).await {
            Ok(true) => Ok(()),
            _ => Err(ApiError::DeviceOffline(format!(
                "device {device_id} is not responding"
            ))),
        }
    }

    async fn validate_existing_session(&self, session: &StreamSession) -> bool {
        let pid = match self.get_server_pid(&session.device_id).await {
            Ok(pid) => pid,
            Err(_) => return false,
        };
        if pid <= 0 || pid != session.process_id {
            debug!(device_id = %session.device_id, "validation failed: process gone");
            return false;
        }

        let forwards = match self.adb.forward_list().await {
            Ok(forwards) => forwards,
            Err(_) => return false,
        };
        let installed = forwards.iter().any(|f| {
            f.serial == session.device_id
                && f.local == session.local_port
                && f.remote == session.device_port
        });
        if !installed {
            debug!(device_id = %session.device_id, "validation failed: forward missing");
            return false;
        }

        is_local_port_reachable(session.local_port).await
    }

    /// Pushes the server jar unless an intact copy is already on the device.
    async fn push_server(&self, device_id: &str) -> Result<(), ApiError> {
        let metadata = tokio::fs::metadata(&self.config.server_jar)
            .await
            .map_err(|_| {
                ApiError::StreamBringup(format!(
                    "scrcpy-server.jar not found at {}",
                    self.config.server_jar
                ))
            })?;
        let local_size = metadata.len() as i64;

        let listing = self
            .adb
            .shell(
                device_id,
                &[&format!(
                    "ls -l {SERVER_JAR_DEVICE_PATH} 2>/dev/null || echo NOT_FOUND"
                )],
            )
            .await
            .unwrap_or_else(|_| "NOT_FOUND".to_string());

        if !listing.contains("NOT_FOUND") {
            if let Some(remote_size) = parse_ls_size(&listing) {
                if (remote_size - local_size).abs() <= JAR_SIZE_TOLERANCE {
                    let readable = self
                        .adb
                        .shell(
                            device_id,
                            &[&format!(
                                "[ -r {SERVER_JAR_DEVICE_PATH} ] && echo OK || echo NO_PERMISSION"
                            )],
                        )
                        .await
                        .unwrap_or_default();
                    if readable.contains("OK") {
                        debug!(device_id, "server jar already present, skipping push");
                        return Ok(());
                    }
                    let _ = self
                        .adb
                        .shell(device_id, &[&format!("chmod 644 {SERVER_JAR_DEVICE_PATH}")])
                        .await;
                    return Ok(());
                }
            }
        }

        if self
            .adb
            .push(device_id, &self.config.server_jar, "/data/local/tmp/")
            .await
            .is_err()
        {
            self.push_server_with_retry(device_id).await?;
        }

        let verified = self
            .adb
            .shell(
                device_id,
                &[&format!(
                    "[ -f {SERVER_JAR_DEVICE_PATH} ] && echo EXISTS || echo MISSING"
                )],
            )
            .await
            .unwrap_or_default();
        if !verified.contains("EXISTS") {
            return Err(ApiError::StreamBringup(
                "server jar missing on device after push".into(),
            ));
        }

        let _ = self
            .adb
            .shell(device_id, &[&format!("chmod 644 {SERVER_JAR_DEVICE_PATH}")])
            .await;
        Ok(())
    }

    async fn push_server_with_retry(&self, device_id: &str) -> Result<(), ApiError> {
        for attempt in 1..=PUSH_RETRIES {
            debug!(device_id, attempt, "retrying server jar push");
            let _ = self
                .adb
                .shell(device_id, &[&format!("rm -f {SERVER_JAR_DEVICE_PATH}")])
                .await;

            if self
                .adb
                .push_sync(device_id, &self.config.server_jar, "/data/local/tmp/")
                .await
                .is_ok()
            {
                let verified = self
                    .adb
                    .shell(
                        device_id,
                        &[&format!(
                            "[ -f {SERVER_JAR_DEVICE_PATH} ] && echo EXISTS || echo MISSING"
                        )],
                    )
                    .await
                    .unwrap_or_default();
                if verified.contains("EXISTS") {
                    return Ok(());
                }
            }

            tokio::time::sleep(Duration::from_millis(500 * u64::from(attempt))).await;
        }
        Err(ApiError::StreamBringup(
            "failed to push server jar after retries".into(),
        ))
    }

    /// Starts (or adopts) the device-side `app_process` server.
    async fn start_server(&self, session: &mut StreamSession) -> Result<(), ApiError> {
        let device_id = session.device_id.clone();

        let pid = self.get_server_pid(&device_id).await?;
        if pid > 0 {
            debug!(device_id, pid, "adopting running scrcpy server");
            session.process_id = pid;
            return Ok(());
        }

        // Port bound without our server process means another client owns it.
        if self.is_port_open(&device_id, session.device_port).await {
            return Err(ApiError::DeviceBusy);
        }

        self.spawn_server(&device_id, session.device_port).await?;

        if let Err(first_err) = self.wait_for_server_start(session).await {
            warn!(device_id, error = %first_err, "server start timed out, retrying once");
            let _ = self.kill_server(&device_id, session.process_id).await;
            self.spawn_server(&device_id, session.device_port).await?;
            tokio::time::sleep(Duration::from_secs(3)).await;

            let pid = self.get_server_pid(&device_id).await?;
            if pid > 0 {
                session.process_id = pid;
                return Ok(());
            }
            let _ = self.kill_server(&device_id, 0).await;
            return Err(ApiError::StreamBringup(
                "scrcpy server failed to start within the timeout".into(),
            ));
        }
        Ok(())
    }

    async fn spawn_server(&self, device_id: &str, device_port: u16) -> Result<(), ApiError> {
        let command = format!(
            "CLASSPATH={SERVER_JAR_DEVICE_PATH} nohup app_process / \
             com.genymobile.scrcpy.Server 1.19-ws6 web ERROR {device_port} true \
             2>&1 > /dev/null"
        );
        self.adb.shell_detached(device_id, &command).await?;
        Ok(())
    }

    /// Polls until the server owns a PID and its port answers, within the
    /// configured timeout.
    async fn wait_for_server_start(&self, session: &mut StreamSession) -> Result<(), ApiError> {
        let deadline =
            tokio::time::Instant::now() + Duration::from_secs(self.config.start_timeout_secs);
        let mut attempt: u64 = 0;

        while tokio::time::Instant::now() < deadline {
            let pid = self.get_server_pid(&session.device_id).await.unwrap_or(0);
            if pid > 0 {
                session.process_id = pid;

                let port_open = self.is_port_open(&session.device_id, session.device_port).await
                    || self.process_has_socket(&session.device_id, pid).await
                    || self
                        .device_port_answers(&session.device_id, session.device_port)
                        .await;
                if port_open {
                    return Ok(());
                }
                debug!(
                    device_id = %session.device_id,
                    pid,
                    "server process up, port not open yet"
                );
            }

            tokio::time::sleep(Duration::from_millis(500 + attempt * 300)).await;
            attempt += 1;
        }

        Err(ApiError::StreamBringup(
            "timed out waiting for the scrcpy server".into(),
        ))
    }

    /// PID of a matching `app_process … com.genymobile.scrcpy.Server` run,
    /// or 0 when none is running.
    async fn get_server_pid(&self, device_id: &str) -> Result<i64, ApiError> {
        let result = self
            .adb
            .shell(
                device_id,
                &["ps -ef | grep 'app_process.*com.genymobile.scrcpy.Server' \
                   | grep -v grep | awk '{print $2}'"],
            )
            .await;

        match result {
            Ok(output) => Ok(output
                .lines()
                .filter_map(|line| line.trim().parse::<i64>().ok())
                .find(|pid| *pid > 0)
                .unwrap_or(0)),
            // grep exits 1 when nothing matches.
            Err(shared::adb::AdbError::CommandFailed { code: 1, .. }) => Ok(0),
            Err(e) => Err(e.into()),
        }
    }

    /// Port detection via netstat, ss or lsof, whichever the build carries.
    async fn is_port_open(&self, device_id: &str, port: u16) -> bool {
        let probes = [
            format!("netstat -tlnp 2>/dev/null | grep ':{port}'"),
            format!("ss -tlnp 2>/dev/null | grep ':{port}'"),
            format!("lsof -i :{port} 2>/dev/null"),
        ];
        for probe in &probes {
            if let Ok(output) = self.adb.shell(device_id, &[probe]).await {
                if !output.trim().is_empty() {
                    return true;
                }
            }
        }
        false
    }

    /// Fallback liveness signal: the process has opened at least one socket.
    async fn process_has_socket(&self, device_id: &str, pid: i64) -> bool {
        self.adb
            .shell(
                device_id,
                &[&format!("ls -l /proc/{pid}/fd/ 2>/dev/null | grep socket")],
            )
            .await
            .map(|output| !output.trim().is_empty())
            .unwrap_or(false)
    }

    /// `/dev/tcp` probe run on the device itself.
    async fn device_port_answers(&self, device_id: &str, port: u16) -> bool {
        self.adb
            .shell(
                device_id,
                &[&format!(
                    "(echo >/dev/tcp/localhost/{port}) 2>/dev/null && echo open || echo closed"
                )],
            )
            .await
            .map(|output| output.trim() == "open")
            .unwrap_or(false)
    }

    /// Kills the server and verifies no matching process remains.
    async fn kill_server(&self, device_id: &str, pid: i64) -> Result<(), ApiError> {
        if pid > 0 {
            let _ = self.adb.shell(device_id, &[&format!("kill -9 {pid}")]).await;
        }

        // Sweep any matching server process the PID bookkeeping missed.
        let _ = self
            .adb
            .shell(
                device_id,
                &["ps -ef | grep 'app_process.*com.genymobile.scrcpy.Server' \
                   | grep -v grep | awk '{print $2}' | xargs -r kill -9"],
            )
            .await;

        for _ in 0..KILL_VERIFY_ATTEMPTS {
            if self.get_server_pid(device_id).await.unwrap_or(0) <= 0 {
                return Ok(());
            }
            tokio::time::sleep(KILL_VERIFY_INTERVAL).await;
        }

        let pid = self.get_server_pid(device_id).await.unwrap_or(0);
        if pid > 0 {
            return Err(ApiError::StreamBringup(format!(
                "unable to stop server process (pid {pid})"
            )));
        }
        Ok(())
    }

    /// Reuses a live forward for the device port or allocates a fresh local
    /// port from the configured range.
    async fn setup_port_forward(&self, session: &StreamSession) -> Result<u16, ApiError> {
        let forwards = self.adb.forward_list().await?;

        if let Some(existing) = forwards
            .iter()
            .find(|f| f.serial == session.device_id && f.remote == session.device_port)
        {
            if is_local_port_reachable(existing.local).await {
                debug!(
                    device_id = %session.device_id,
                    local_port = existing.local,
                    "reusing existing port forward"
                );
                return Ok(existing.local);
            }
            self.remove_port_forward(&session.device_id, existing.local)
                .await;
        }

        for local_port in self.config.local_port_min..self.config.local_port_max {
            let taken = forwards
                .iter()
                .any(|f| f.local == local_port && f.serial != session.device_id);
            if taken {
                continue;
            }
            if self
                .adb
                .add_forward(&session.device_id, local_port, session.device_port)
                .await
                .is_ok()
            {
                return Ok(local_port);
            }
        }

        Err(ApiError::StreamBringup(
            "no free local port for the forward".into(),
        ))
    }

    async fn remove_port_forward(&self, device_id: &str, local_port: u16) {
        if let Err(e) = self.adb.remove_forward(device_id, local_port).await {
            debug!(device_id, local_port, error = %e, "failed to remove forward");
        }
    }
}

fn endpoint(local_port: u16) -> StartStreamResponse {
    StartStreamResponse {
        port: local_port,
        url: format!("ws://localhost:{local_port}"),
    }
}

/// Size column of `ls -l` output (permissions, links, owner, group, size).
fn parse_ls_size(listing: &str) -> Option<i64> {
    listing
        .lines()
        .find(|line| !line.trim().is_empty())?
        .split_whitespace()
        .nth(4)?
        .parse()
        .ok()
}

async fn is_local_port_reachable(port: u16) -> bool {
    matches!(
        tokio::time::timeout(PORT_PROBE_TIMEOUT, TcpStream::connect(("127.0.0.1", port))).await,
        Ok(Ok(_))
    )
}
