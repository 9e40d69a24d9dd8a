//! Screenshot capture service.
//!
//! Captures go through `screencap` on the device, get pulled to a local
//! temp file, decoded, optionally scaled and rotated, then re-encoded as
//! WebP or JPEG and returned as a data URL. Results are cached per device
//! with a short TTL, and concurrent captures for the same device share one
//! ADB round-trip.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use base64::Engine;
use image::codecs::jpeg::JpegEncoder;
use image::{imageops, ExtendedColorType, ImageEncoder, RgbaImage};
use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};
use shared::adb::AdbBridge;
use tokio::sync::{watch, Mutex};
use tracing::{debug, warn};

use crate::config::ScreenshotConfig;

/// POST /screenshot/capture request.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScreenshotRequest {
    pub device_id: String,
    pub quality: Option<u8>,
    pub scale: Option<f64>,
    pub format: Option<String>,
}

/// Capture outcome. ADB-level failures land here with `success == false`;
/// the endpoint itself never errors.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScreenshotResponse {
    pub device_id: String,
    pub success: bool,
    pub image_data: String,
    pub error: String,
}

impl ScreenshotResponse {
    fn failure(device_id: &str, error: String) -> Self {
        Self {
            device_id: device_id.to_string(),
            success: false,
            image_data: String::new(),
            error,
        }
    }

    fn success(device_id: &str, image_data: String) -> Self {
        Self {
            device_id: device_id.to_string(),
            success: true,
            image_data,
            error: String::new(),
        }
    }
}

struct CacheEntry {
    image_data: String,
    cached_at: Instant,
    quality: u8,
    scale: f64,
    format: String,
    content_hash: String,
}

enum Flight {
    Leader(watch::Sender<bool>),
    Follower(watch::Receiver<bool>),
}

pub struct ScreenshotService {
    adb: AdbBridge,
    config: ScreenshotConfig,
    screenshot_dir: PathBuf,
    cache: Mutex<HashMap<String, CacheEntry>>,
    in_flight: Mutex<HashMap<String, watch::Receiver<bool>>>,
}

impl ScreenshotService {
    pub fn new(adb: AdbBridge, config: ScreenshotConfig, screenshot_dir: impl Into<PathBuf>) -> Self {
        Self {
            adb,
            config,
            screenshot_dir: screenshot_dir.into(),
            cache: Mutex::new(HashMap::new()),
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    fn ttl(&self) -> Duration {
        Duration::from_secs(self.config.cache_ttl_secs)
    }

    /// Captures the screen of one device, honouring cache and single-flight.
    pub async fn capture(&self, request: &ScreenshotRequest) -> ScreenshotResponse {
        let device_id = request.device_id.as_str();
        let quality = request.quality.unwrap_or(self.config.quality).clamp(1, 100);
        let scale = match request.scale {
            Some(s) if s > 0.0 && s <= 1.0 => s,
            Some(_) => {
                return ScreenshotResponse::failure(device_id, "scale must be in (0, 1]".into())
            }
            None => self.config.scale,
        };
        let format = request
            .format
            .clone()
            .unwrap_or_else(|| self.config.format.clone());
        if format != "webp" && format != "jpeg" {
            return ScreenshotResponse::failure(
                device_id,
                format!("unsupported image format: {format}"),
            );
        }

        loop {
            if let Some(data) = self.cached(device_id, quality, scale, &format).await {
                return ScreenshotResponse::success(device_id, data);
            }

            match self.join_flight(device_id).await {
                Flight::Follower(mut rx) => {
                    // The leader finishing (or dying) wakes us; the cache is
                    // re-checked on the next loop turn.
                    let _ = rx.changed().await;
                }
                Flight::Leader(tx) => {
                    let response = self
                        .capture_fresh(device_id, quality, scale, &format)
                        .await;
                    self.in_flight.lock().await.remove(device_id);
                    let _ = tx.send(true);
                    return response;
                }
            }
        }
    }

    async fn cached(
        &self,
        device_id: &str,
        quality: u8,
        scale: f64,
        format: &str,
    ) -> Option<String> {
        let cache = self.cache.lock().await;
        let entry = cache.get(device_id)?;
        if entry.cached_at.elapsed() <= self.ttl()
            && entry.quality == quality
            && entry.scale == scale
            && entry.format == format
        {
            Some(entry.image_data.clone())
        } else {
            None
        }
    }

    async fn join_flight(&self, device_id: &str) -> Flight {
        let mut in_flight = self.in_flight.lock().await;
        if let Some(rx) = in_flight.get(device_id) {
            Flight::Follower(rx.clone())
        } else {
            let (tx, rx) = watch::channel(false);
            in_flight.insert(device_id.to_string(), rx);
            Flight::Leader(tx)
        }
    }

    async fn capture_fresh(
        &self,
        device_id: &str,
        quality: u8,
        scale: f64,
        format: &str,
    ) -> ScreenshotResponse {
        if let Err(e) = self.adb.connect(device_id).await {
            return ScreenshotResponse::failure(device_id, format!("connect failed: {e}"));
        }

        if let Err(e) = tokio::fs::create_dir_all(&self.screenshot_dir).await {
            return ScreenshotResponse::failure(
                device_id,
                format!("failed to create screenshot dir: {e}"),
            );
        }

        let file_name = format!(
            "screenshot_{}_{}.png",
            device_id.replace([':', '/'], "_"),
            chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default()
        );
        let device_path = format!("/data/local/tmp/{file_name}");
        let local_path = self.screenshot_dir.join(&file_name);

        let response = self
            .capture_pipeline(device_id, quality, scale, format, &device_path, &local_path)
            .await;

        // Both temp files go away on every exit path.
        if let Err(e) = self.adb.remove_file(device_id, &device_path).await {
            debug!(device_id, error = %e, "failed to remove device-side screenshot");
        }
        let _ = tokio::fs::remove_file(&local_path).await;

        response
    }

    async fn capture_pipeline(
        &self,
        device_id: &str,
        quality: u8,
        scale: f64,
        format: &str,
        device_path: &str,
        local_path: &Path,
    ) -> ScreenshotResponse {
        if let Err(e) = self.adb.screencap(device_id, device_path).await {
            return ScreenshotResponse::failure(device_id, format!("screencap failed: {e}"));
        }

        let local = local_path.to_string_lossy();
        if let Err(e) = self.adb.pull(device_id, device_path, &local).await {
            return ScreenshotResponse::failure(device_id, format!("pull failed: {e}"));
        }

        let bytes = match tokio::fs::read(local_path).await {
            Ok(bytes) => bytes,
            Err(e) => {
                return ScreenshotResponse::failure(
                    device_id,
                    format!("failed to read screenshot: {e}"),
                )
            }
        };

        let decoded = match image::load_from_memory(&bytes) {
            Ok(img) => img.to_rgba8(),
            Err(e) => {
                return ScreenshotResponse::failure(device_id, format!("PNG decode failed: {e}"))
            }
        };

        let content_hash = hex::encode(Md5::digest(decoded.as_raw()));

        // Identical pixels re-use the previously encoded bytes.
        {
            let mut cache = self.cache.lock().await;
            if let Some(entry) = cache.get_mut(device_id) {
                if entry.content_hash == content_hash
                    && entry.quality == quality
                    && entry.scale == scale
                    && entry.format == format
                {
                    entry.cached_at = Instant::now();
                    return ScreenshotResponse::success(device_id, entry.image_data.clone());
                }
            }
        }

        let processed = process_image(decoded, scale);
        let encoded = match encode_image(&processed, format, quality) {
            Ok(encoded) => encoded,
            Err(e) => return ScreenshotResponse::failure(device_id, e),
        };

        let image_data = format!(
            "data:image/{format};base64,{}",
            base64::engine::general_purpose::STANDARD.encode(&encoded)
        );

        self.cache.lock().await.insert(
            device_id.to_string(),
            CacheEntry {
                image_data: image_data.clone(),
                cached_at: Instant::now(),
                quality,
                scale,
                format: format.to_string(),
                content_hash,
            },
        );

        ScreenshotResponse::success(device_id, image_data)
    }

    /// Evicts cache entries older than the TTL. Returns the eviction count.
    pub async fn sweep_expired(&self) -> usize {
        let ttl = self.ttl();
        let mut cache = self.cache.lock().await;
        let before = cache.len();
        cache.retain(|_, entry| entry.cached_at.elapsed() <= ttl);
        let evicted = before - cache.len();
        if evicted > 0 {
            debug!(evicted, "evicted expired screenshot cache entries");
        }
        evicted
    }
}

/// Scales (nearest-neighbour) and rotates the raw capture. Landscape frames
/// are rotated 90 degrees clockwise so operators always see portrait.
fn process_image(mut img: RgbaImage, scale: f64) -> RgbaImage {
    if scale < 1.0 {
        let width = ((f64::from(img.width()) * scale) as u32).max(1);
        let height = ((f64::from(img.height()) * scale) as u32).max(1);
        img = imageops::resize(&img, width, height, imageops::FilterType::Nearest);
    }

    if img.width() > img.height() {
        img = imageops::rotate90(&img);
    }

    img
}

fn encode_image(img: &RgbaImage, format: &str, quality: u8) -> Result<Vec<u8>, String> {
    match format {
        "webp" => {
            let encoder = webp::Encoder::from_rgba(img.as_raw(), img.width(), img.height());
            Ok(encoder.encode(f32::from(quality)).to_vec())
        }
        "jpeg" => {
            // JPEG has no alpha channel.
            let rgb = image::DynamicImage::ImageRgba8(img.clone()).to_rgb8();
            let mut out = Vec::new();
            JpegEncoder::new_with_quality(&mut out, quality)
                .write_image(
                    rgb.as_raw(),
                    rgb.width(),
                    rgb.height(),
                    ExtendedColorType::Rgb8,
                )
                .map_err(|e| format!("JPEG encode failed: {e}"))?;
            Ok(out)
        }
        other => {
            warn!(format = other, "unsupported screenshot format");
            Err(format!("unsupported image format: {other}"))
        }
    }
}
