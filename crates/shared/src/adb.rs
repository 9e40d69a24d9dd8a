//! ADB bridge gateway.
//!
//! Every device operation in the system goes through [`AdbBridge`], which
//! spawns the external `adb` executable with `-s <device>` plus the verb and
//! returns the combined stdout/stderr. A non-zero exit status becomes
//! [`AdbError::CommandFailed`] carrying the captured output; retry policy is
//! left to callers.

use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

/// Packages that must survive a background-app sweep.
const PROTECTED_PACKAGES: &[&str] = &[
    "io.appium.settings",
    "io.appium.uiautomator2.server",
    "io.appium.uiautomator2.server.test",
];

/// Captured output of one adb invocation.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Stdout followed by stderr, the way a terminal would show them.
    pub fn combined(&self) -> String {
        if self.stderr.is_empty() {
            self.stdout.clone()
        } else if self.stdout.is_empty() {
            self.stderr.clone()
        } else {
            format!("{}{}", self.stdout, self.stderr)
        }
    }
}

#[derive(Debug, Error)]
pub enum AdbError {
    #[error("failed to spawn adb: {0}")]
    Spawn(String),

    #[error("adb {command} exited with status {code}: {output}")]
    CommandFailed {
        command: String,
        code: i32,
        output: String,
    },

    #[error("failed to stop {failed} of {total} packages: {detail}")]
    ForceStopFailed {
        failed: usize,
        total: usize,
        detail: String,
    },
}

/// One entry of `adb forward --list`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardEntry {
    pub serial: String,
    pub local: u16,
    pub remote: u16,
}

/// One entry of `adb devices`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceEntry {
    pub serial: String,
    pub state: String,
}

/// Spawns adb processes. Abstracted so tests can script device behaviour.
#[async_trait]
pub trait AdbExecutor: Send + Sync {
    /// Runs adb with the given arguments and waits for it to exit.
    async fn exec(&self, args: &[String]) -> Result<CommandOutput, AdbError>;

    /// Spawns adb without waiting for the process to exit. Used for the
    /// device-side scrcpy server, which blocks the shell for its lifetime.
    async fn spawn_detached(&self, args: &[String]) -> Result<(), AdbError>;
}

/// Executor backed by the real `adb` binary on PATH.
pub struct SystemAdb {
    program: String,
}

impl SystemAdb {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Default for SystemAdb {
    fn default() -> Self {
        Self::new("adb")
    }
}

#[async_trait]
impl AdbExecutor for SystemAdb {
    async fn exec(&self, args: &[String]) -> Result<CommandOutput, AdbError> {
        debug!(args = ?args, "running adb");
        let output = Command::new(&self.program)
            .args(args)
            .output()
            .await
            .map_err(|e| AdbError::Spawn(e.to_string()))?;

        Ok(CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            exit_code: output.status.code(),
        })
    }

    async fn spawn_detached(&self, args: &[String]) -> Result<(), AdbError> {
        debug!(args = ?args, "spawning detached adb");
        let mut child = Command::new(&self.program)
            .args(args)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| AdbError::Spawn(e.to_string()))?;

        // Reap the child in the background so it never zombies.
        tokio::spawn(async move {
            let _ = child.wait().await;
        });
        Ok(())
    }
}

/// Typed entry points for every adb verb the control plane uses.
#[derive(Clone)]
pub struct AdbBridge {
    executor: Arc<dyn AdbExecutor>,
}

impl AdbBridge {
    pub fn new(executor: Arc<dyn AdbExecutor>) -> Self {
        Self { executor }
    }

    /// Bridge backed by the `adb` binary on PATH.
    pub fn system() -> Self {
        Self::new(Arc::new(SystemAdb::default()))
    }

    async fn run(&self, args: Vec<String>) -> Result<String, AdbError> {
        let output = self.executor.exec(&args).await?;
        if output.success() {
            Ok(output.combined())
        } else {
            Err(AdbError::CommandFailed {
                command: args.join(" "),
                code: output.exit_code.unwrap_or(-1),
                output: output.combined().trim().to_string(),
            })
        }
    }

    async fn run_for(&self, device: &str, args: &[&str]) -> Result<String, AdbError> {
        let mut full = Vec::with_capacity(args.len() + 2);
        full.push("-s".to_string());
        full.push(device.to_string());
        full.extend(args.iter().map(|a| a.to_string()));
        self.run(full).await
    }

    pub async fn connect(&self, address: &str) -> Result<String, AdbError> {
        self.run(vec!["connect".to_string(), address.to_string()])
            .await
    }

    pub async fn shell(&self, device: &str, args: &[&str]) -> Result<String, AdbError> {
        let mut full = vec!["shell"];
        full.extend_from_slice(args);
        self.run_for(device, &full).await
    }

    /// Shell probe used to decide whether a device is responsive.
    pub async fn probe(&self, device: &str) -> Result<bool, AdbError> {
        let output = self.shell(device, &["echo", "OK"]).await?;
        Ok(output.contains("OK"))
    }

    /// Runs a shell command without waiting for it; the scrcpy server blocks
    /// its shell for the process lifetime.
    pub async fn shell_detached(&self, device: &str, command: &str) -> Result<(), AdbError> {
        let args = vec![
            "-s".to_string(),
            device.to_string(),
            "shell".to_string(),
            command.to_string(),
        ];
        self.executor.spawn_detached(&args).await
    }

    pub async fn push(&self, device: &str, local: &str, remote: &str) -> Result<String, AdbError> {
        self.run_for(device, &["push", local, remote]).await
    }

    /// Push that only transfers files newer than the remote copy.
    pub async fn push_sync(
        &self,
        device: &str,
        local: &str,
        remote: &str,
    ) -> Result<String, AdbError> {
        self.run_for(device, &["push", "--sync", local, remote])
            .await
    }

    pub async fn pull(&self, device: &str, remote: &str, local: &str) -> Result<String, AdbError> {
        self.run_for(device, &["pull", remote, local]).await
    }

    pub async fn screencap(&self, device: &str, remote_path: &str) -> Result<String, AdbError> {
        self.shell(device, &["screencap", "-p", remote_path]).await
    }

    pub async fn remove_file(&self, device: &str, remote_path: &str) -> Result<String, AdbError> {
        self.shell(device, &["rm", remote_path]).await
    }

    pub async fn install_app(&self, device: &str, apk_path: &str) -> Result<String, AdbError> {
        self.run_for(device, &["install", "-r", apk_path]).await
    }

    pub async fn uninstall_app(&self, device: &str, package: &str) -> Result<String, AdbError> {
        self.run_for(device, &["uninstall", package]).await
    }

    /// Launches the package's default LAUNCHER activity.
    pub async fn start_app(&self, device: &str, package: &str) -> Result<String, AdbError> {
        self.shell(
            device,
            &[
                "monkey",
                "-p",
                package,
                "-c",
                "android.intent.category.LAUNCHER",
                "1",
            ],
        )
        .await
    }

    pub async fn stop_app(&self, device: &str, package: &str) -> Result<String, AdbError> {
        self.shell(device, &["am", "force-stop", package]).await
    }

    pub async fn list_packages(
        &self,
        device: &str,
        third_party_only: bool,
    ) -> Result<Vec<String>, AdbError> {
        let output = if third_party_only {
            self.shell(device, &["pm", "list", "packages", "-3"]).await?
        } else {
            self.shell(device, &["pm", "list", "packages"]).await?
        };
        Ok(parse_package_list(&output))
    }

    pub async fn input_keyevent(&self, device: &str, keycode: u32) -> Result<String, AdbError> {
        let code = keycode.to_string();
        self.shell(device, &["input", "keyevent", &code]).await
    }

    /// Keyevent 3 is HOME on every Android build.
    pub async fn go_home(&self, device: &str) -> Result<String, AdbError> {
        self.input_keyevent(device, 3).await
    }

    /// Force-stops every third-party package except the protected set.
    pub async fn kill_background_apps(&self, device: &str) -> Result<String, AdbError> {
        let packages = self.list_packages(device, true).await?;
        let total = packages.len();
        let mut stopped = 0usize;
        let mut failures = Vec::new();

        for package in &packages {
            if PROTECTED_PACKAGES.contains(&package.as_str()) {
                continue;
            }
            match self.stop_app(device, package).await {
                Ok(_) => stopped += 1,
                Err(e) => failures.push(format!("{package}: {e}")),
            }
        }

        if failures.is_empty() {
            Ok(format!("stopped {stopped} of {total} packages"))
        } else {
            Err(AdbError::ForceStopFailed {
                failed: failures.len(),
                total,
                detail: failures.join("; "),
            })
        }
    }

    pub async fn forward_list(&self) -> Result<Vec<ForwardEntry>, AdbError> {
        let output = self
            .run(vec!["forward".to_string(), "--list".to_string()])
            .await?;
        Ok(parse_forward_list(&output))
    }

    pub async fn add_forward(
        &self,
        device: &str,
        local: u16,
        remote: u16,
    ) -> Result<String, AdbError> {
        let local = format!("tcp:{local}");
        let remote = format!("tcp:{remote}");
        self.run_for(device, &["forward", &local, &remote]).await
    }

    pub async fn remove_forward(&self, device: &str, local: u16) -> Result<String, AdbError> {
        let local = format!("tcp:{local}");
        self.run_for(device, &["forward", "--remove", &local]).await
    }

    pub async fn devices(&self) -> Result<Vec<DeviceEntry>, AdbError> {
        let output = self.run(vec!["devices".to_string()]).await?;
        Ok(parse_devices(&output))
    }

    /// State of one device in `adb devices`, or None when not listed.
    pub async fn device_state(&self, address: &str) -> Result<Option<String>, AdbError> {
        Ok(self
            .devices()
            .await?
            .into_iter()
            .find(|d| d.serial == address)
            .map(|d| d.state))
    }
}

/// Parses `adb forward --list` output: `<serial> tcp:<local> tcp:<remote>`.
pub fn parse_forward_list(output: &str) -> Vec<ForwardEntry> {
    output
        .lines()
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            let serial = parts.next()?;
            let local = parts.next()?.strip_prefix("tcp:")?.parse().ok()?;
            let remote = parts.next()?.strip_prefix("tcp:")?.parse().ok()?;
            Some(ForwardEntry {
                serial: serial.to_string(),
                local,
                remote,
            })
        })
        .collect()
}

/// Parses `adb devices` output, skipping the banner line.
pub fn parse_devices(output: &str) -> Vec<DeviceEntry> {
    output
        .lines()
        .skip_while(|line| line.starts_with("List of devices"))
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            let serial = parts.next()?;
            let state = parts.next()?;
            Some(DeviceEntry {
                serial: serial.to_string(),
                state: state.to_string(),
            })
        })
        .collect()
}

/// Parses `pm list packages` output (`package:<name>` per line).
pub fn parse_package_list(output: &str) -> Vec<String> {
    output
        .lines()
        .filter_map(|line| line.trim().strip_prefix("package:"))
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Executor that records invocations and replays a fixed response.
    struct RecordingExecutor {
        calls: Mutex<Vec<Vec<String>>>,
        response: CommandOutput,
    }

    impl RecordingExecutor {
        fn new(response: CommandOutput) -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                response,
            }
        }

        fn ok(stdout: &str) -> Self {
            Self::new(CommandOutput {
                stdout: stdout.to_string(),
                stderr: String::new(),
                exit_code: Some(0),
            })
        }
    }

    #[async_trait]
    impl AdbExecutor for RecordingExecutor {
        async fn exec(&self, args: &[String]) -> Result<CommandOutput, AdbError> {
            self.calls.lock().unwrap().push(args.to_vec());
            Ok(self.response.clone())
        }

        async fn spawn_detached(&self, args: &[String]) -> Result<(), AdbError> {
            self.calls.lock().unwrap().push(args.to_vec());
            Ok(())
        }
    }

    fn bridge_with(executor: RecordingExecutor) -> (AdbBridge, Arc<RecordingExecutor>) {
        let executor = Arc::new(executor);
        (AdbBridge::new(executor.clone()), executor)
    }

    #[tokio::test]
    async fn install_builds_expected_arguments() {
        let (bridge, exec) = bridge_with(RecordingExecutor::ok("Success\n"));
        let out = bridge.install_app("10.0.0.5:5555", "/tmp/app.apk").await;
        assert_eq!(out.unwrap(), "Success\n");

        let calls = exec.calls.lock().unwrap();
        assert_eq!(
            calls[0],
            vec!["-s", "10.0.0.5:5555", "install", "-r", "/tmp/app.apk"]
        );
    }

    #[tokio::test]
    async fn start_app_uses_monkey_launcher() {
        let (bridge, exec) = bridge_with(RecordingExecutor::ok(""));
        bridge.start_app("dev", "com.example.app").await.unwrap();

        let calls = exec.calls.lock().unwrap();
        assert_eq!(
            calls[0],
            vec![
                "-s",
                "dev",
                "shell",
                "monkey",
                "-p",
                "com.example.app",
                "-c",
                "android.intent.category.LAUNCHER",
                "1"
            ]
        );
    }

    #[tokio::test]
    async fn nonzero_exit_becomes_command_failed_with_output() {
        let (bridge, _) = bridge_with(RecordingExecutor::new(CommandOutput {
            stdout: "Failure [INSTALL_FAILED_INSUFFICIENT_STORAGE]\n".to_string(),
            stderr: String::new(),
            exit_code: Some(1),
        }));

        let err = bridge.install_app("dev", "/tmp/app.apk").await.unwrap_err();
        match err {
            AdbError::CommandFailed { code, output, .. } => {
                assert_eq!(code, 1);
                assert!(output.contains("INSTALL_FAILED_INSUFFICIENT_STORAGE"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn probe_checks_for_ok_marker() {
        let (bridge, _) = bridge_with(RecordingExecutor::ok("OK\n"));
        assert!(bridge.probe("dev").await.unwrap());

        let (bridge, _) = bridge_with(RecordingExecutor::ok("error: closed\n"));
        // Exit code zero but no marker.
        assert!(!bridge.probe("dev").await.unwrap());
    }

    #[test]
    fn combined_output_concatenates_streams() {
        let out = CommandOutput {
            stdout: "out".to_string(),
            stderr: "err".to_string(),
            exit_code: Some(0),
        };
        assert_eq!(out.combined(), "outerr");

        let out = CommandOutput {
            stdout: String::new(),
            stderr: "only err".to_string(),
            exit_code: Some(1),
        };
        assert_eq!(out.combined(), "only err");
    }

    #[test]
    fn parses_forward_list() {
        let output = "\
10.0.0.5:5555 tcp:10000 tcp:8886
emulator-5554 tcp:10001 tcp:8886
garbage line
";
        let entries = parse_forward_list(output);
        assert_eq!(entries.len(), 2);
        assert_eq!(
            entries[0],
            ForwardEntry {
                serial: "10.0.0.5:5555".to_string(),
                local: 10000,
                remote: 8886,
            }
        );
        assert_eq!(entries[1].serial, "emulator-5554");
        assert_eq!(entries[1].local, 10001);
    }

    #[test]
    fn parses_devices_output() {
        let output = "\
List of devices attached
10.0.0.5:5555\tdevice
emulator-5554\toffline

";
        let devices = parse_devices(output);
        assert_eq!(devices.len(), 2);
        assert_eq!(devices[0].serial, "10.0.0.5:5555");
        assert_eq!(devices[0].state, "device");
        assert_eq!(devices[1].state, "offline");
    }

    #[test]
    fn parses_package_list() {
        let output = "package:com.android.settings\npackage:com.example.game\n\n";
        let packages = parse_package_list(output);
        assert_eq!(packages, vec!["com.android.settings", "com.example.game"]);
    }

    #[test]
    fn command_failed_display_includes_output() {
        let err = AdbError::CommandFailed {
            command: "-s dev install -r /tmp/a.apk".to_string(),
            code: 1,
            output: "INSTALL_FAILED_INSUFFICIENT_STORAGE".to_string(),
        };
        let text = err.to_string();
        assert!(text.contains("status 1"));
        assert!(text.contains("INSTALL_FAILED_INSUFFICIENT_STORAGE"));
    }
}
