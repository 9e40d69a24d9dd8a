use serde::Deserialize;
use std::net::SocketAddr;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    #[serde(default)]
    pub batch: BatchConfig,
    #[serde(default)]
    pub screenshot: ScreenshotConfig,
    #[serde(default)]
    pub scrcpy: ScrcpyConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default = "default_log_format")]
    pub format: String,
}

/// Fan-out limits for batch fleet operations.
#[derive(Debug, Clone, Deserialize)]
pub struct BatchConfig {
    /// Configured worker ceiling; requests above it are clamped. The hard
    /// ceiling of 50 applies regardless.
    #[serde(default = "default_max_worker")]
    pub max_worker: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScreenshotConfig {
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_secs: u64,

    #[serde(default = "default_quality")]
    pub quality: u8,

    #[serde(default = "default_scale")]
    pub scale: f64,

    #[serde(default = "default_format")]
    pub format: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScrcpyConfig {
    /// Server jar shipped with the deployment, pushed to each device.
    #[serde(default = "default_server_jar")]
    pub server_jar: String,

    /// Fixed device-side listen port of the scrcpy server.
    #[serde(default = "default_device_port")]
    pub device_port: u16,

    #[serde(default = "default_start_timeout")]
    pub start_timeout_secs: u64,

    /// Local forward ports are allocated from [local_port_min, local_port_max).
    #[serde(default = "default_local_port_min")]
    pub local_port_min: u16,

    #[serde(default = "default_local_port_max")]
    pub local_port_max: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_apk_dir")]
    pub apk_dir: String,

    #[serde(default = "default_files_dir")]
    pub files_dir: String,

    #[serde(default = "default_screenshot_dir")]
    pub screenshot_dir: String,
}

// Default value functions
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8080
}
fn default_request_timeout() -> u64 {
    30
}
fn default_max_connections() -> u32 {
    10
}
fn default_connect_timeout() -> u64 {
    10
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "json".to_string()
}
fn default_max_worker() -> usize {
    20
}
fn default_cache_ttl() -> u64 {
    5
}
fn default_quality() -> u8 {
    80
}
fn default_scale() -> f64 {
    1.0
}
fn default_format() -> String {
    "webp".to_string()
}
fn default_server_jar() -> String {
    "resource/scrcpy/scrcpy-server.jar".to_string()
}
fn default_device_port() -> u16 {
    8886
}
fn default_start_timeout() -> u64 {
    30
}
fn default_local_port_min() -> u16 {
    10000
}
fn default_local_port_max() -> u16 {
    20000
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_worker: default_max_worker(),
        }
    }
}

impl Default for ScreenshotConfig {
    fn default() -> Self {
        Self {
            cache_ttl_secs: default_cache_ttl(),
            quality: default_quality(),
            scale: default_scale(),
            format: default_format(),
        }
    }
}

impl Default for ScrcpyConfig {
    fn default() -> Self {
        Self {
            server_jar: default_server_jar(),
            device_port: default_device_port(),
            start_timeout_secs: default_start_timeout(),
            local_port_min: default_local_port_min(),
            local_port_max: default_local_port_max(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            apk_dir: default_apk_dir(),
            files_dir: default_files_dir(),
            screenshot_dir: default_screenshot_dir(),
        }
    }
}

fn default_apk_dir() -> String {
    "resource/apk".to_string()
}
fn default_files_dir() -> String {
    "uploads/files".to_string()
}
fn default_screenshot_dir() -> String {
    "uploads/screenshots".to_string()
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        let config = config::Config::builder()
            .add_source(config::File::with_name("config/default"))
            .add_source(config::File::with_name("config/local").required(false))
            .add_source(config::Environment::with_prefix("DF").separator("__"))
            .build()?;

        config.try_deserialize()
    }

    pub fn socket_addr(&self) -> Result<SocketAddr, std::net::AddrParseError> {
        format!("{}:{}", self.server.host, self.server.port).parse()
    }

    /// Configuration for tests: in-memory database, quiet logging,
    /// filesystem roots under the given directory.
    pub fn for_tests(storage_root: &str) -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 0,
                request_timeout_secs: 5,
            },
            database: DatabaseConfig {
                url: "sqlite::memory:".to_string(),
                max_connections: 1,
                connect_timeout_secs: 5,
            },
            logging: LoggingConfig {
                level: "warn".to_string(),
                format: "pretty".to_string(),
            },
            batch: BatchConfig::default(),
            screenshot: ScreenshotConfig::default(),
            scrcpy: ScrcpyConfig::default(),
            storage: StorageConfig {
                apk_dir: format!("{storage_root}/apk"),
                files_dir: format!("{storage_root}/files"),
                screenshot_dir: format!("{storage_root}/screenshots"),
            },
        }
    }
}
