//! Screen capture with a shell fallback and a placeholder of last resort.

use std::io::Cursor;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use base64::{engine::general_purpose::STANDARD, Engine};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut};
use imageproc::rect::Rect;
use tokio::time::{sleep, timeout};

use super::display::{capture_display_for, discover_capture_displays};
use crate::actuator::{is_error_response, DeviceActuator, ScreencapError};
use crate::session::DeviceSession;

/// One still image of the device screen, ready to send to the model.
#[derive(Debug, Clone)]
pub struct Capture {
    /// Base64 JPEG.
    pub image_base64: String,
    /// Size of the encoded image.
    pub width: u32,
    pub height: u32,
    /// Size of the screen the image was taken from.
    pub original_width: u32,
    pub original_height: u32,
    /// The device refused to capture a protected screen.
    pub is_sensitive: bool,
    /// No real capture succeeded; the image is a placeholder.
    pub is_fallback: bool,
}

#[derive(Debug, Clone)]
pub struct CaptureConfig {
    pub max_width: u32,
    pub max_height: u32,
    pub jpeg_quality: u8,
    pub fallback_width: u32,
    pub fallback_height: u32,
    /// Upper bound for one whole `capture()` call.
    pub timeout: Duration,
    pub poll_attempts: u32,
    pub poll_interval: Duration,
    /// Device directory for the shell fallback's temporary file.
    pub temp_dir: String,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            max_width: 1080,
            max_height: 2400,
            jpeg_quality: 80,
            fallback_width: 1080,
            fallback_height: 2400,
            timeout: Duration::from_secs(10),
            poll_attempts: 20,
            poll_interval: Duration::from_millis(100),
            temp_dir: "/data/local/tmp".to_string(),
        }
    }
}

impl CaptureConfig {
    /// No polling delay and a small placeholder; for tests.
    pub fn instant() -> Self {
        Self {
            fallback_width: 108,
            fallback_height: 240,
            poll_attempts: 3,
            poll_interval: Duration::ZERO,
            ..Self::default()
        }
    }
}

/// Largest size within `max_width` x `max_height` with the same aspect ratio.
/// Never scales up.
pub fn scaled_dimensions(width: u32, height: u32, max_width: u32, max_height: u32) -> (u32, u32) {
    if width <= max_width && height <= max_height {
        return (width, height);
    }
    let ratio = f64::min(
        max_width as f64 / width as f64,
        max_height as f64 / height as f64,
    );
    (
        ((width as f64 * ratio).round() as u32).clamp(1, max_width),
        ((height as f64 * ratio).round() as u32).clamp(1, max_height),
    )
}

fn encode_jpeg(img: &RgbImage, quality: u8) -> Option<Vec<u8>> {
    let mut buffer = Cursor::new(Vec::new());
    let mut encoder = JpegEncoder::new_with_quality(&mut buffer, quality);
    if let Err(e) = encoder.encode_image(img) {
        tracing::error!("failed to encode capture: {}", e);
        return None;
    }
    Some(buffer.into_inner())
}

/// Decode, downscale and re-encode raw capture bytes.
fn process(bytes: Vec<u8>, config: &CaptureConfig) -> Option<Capture> {
    if bytes.is_empty() {
        return None;
    }
    let decoded = match image::load_from_memory(&bytes) {
        Ok(img) => img,
        Err(e) => {
            tracing::warn!(len = bytes.len(), "capture is not a decodable image: {}", e);
            return None;
        }
    };
    drop(bytes);

    let (original_width, original_height) = (decoded.width(), decoded.height());
    if original_width == 0 || original_height == 0 {
        return None;
    }
    let (width, height) = scaled_dimensions(
        original_width,
        original_height,
        config.max_width,
        config.max_height,
    );

    let rgb = if (width, height) == (original_width, original_height) {
        decoded.to_rgb8()
    } else {
        decoded.resize_exact(width, height, FilterType::Triangle).to_rgb8()
    };
    drop(decoded);

    let jpeg = encode_jpeg(&rgb, config.jpeg_quality)?;
    drop(rgb);

    let image_base64 = STANDARD.encode(&jpeg);
    Some(Capture {
        image_base64,
        width,
        height,
        original_width,
        original_height,
        is_sensitive: false,
        is_fallback: false,
    })
}

/// A dark placeholder with a red frame and a crossed-out box in the middle.
fn placeholder(config: &CaptureConfig, is_sensitive: bool) -> Capture {
    let (width, height) = (config.fallback_width.max(1), config.fallback_height.max(1));
    let mut img = RgbImage::from_fn(width, height, |_, _| Rgb([30u8, 30u8, 30u8]));

    let red = Rgb([220u8, 40u8, 40u8]);
    let border = (width.min(height) / 40).max(1);
    for offset in 0..border {
        draw_hollow_rect_mut(
            &mut img,
            Rect::at(offset as i32, offset as i32)
                .of_size(width - 2 * offset, height - 2 * offset),
            red,
        );
    }

    let side = (width.min(height) / 3).max(1);
    let (x0, y0) = (((width - side) / 2) as i32, ((height - side) / 2) as i32);
    draw_filled_rect_mut(&mut img, Rect::at(x0, y0).of_size(side, side), red);
    let bar = (side / 8).max(1);
    for i in 0..side {
        draw_filled_rect_mut(
            &mut img,
            Rect::at(x0 + i as i32, y0 + i as i32).of_size(bar.min(side - i), 1),
            Rgb([240u8, 240u8, 240u8]),
        );
    }

    let image_base64 = encode_jpeg(&img, config.jpeg_quality)
        .map(|jpeg| STANDARD.encode(jpeg))
        .unwrap_or_default();

    Capture {
        image_base64,
        width,
        height,
        original_width: width,
        original_height: height,
        is_sensitive,
        is_fallback: true,
    }
}

impl Capture {
    /// Placeholder for when nothing could be captured.
    pub fn fallback(config: &CaptureConfig, is_sensitive: bool) -> Self {
        placeholder(config, is_sensitive)
    }
}

/// Deletes the device temp file if the capture future is dropped mid-way.
struct TempFileGuard {
    actuator: Arc<dyn DeviceActuator>,
    path: Option<String>,
}

impl TempFileGuard {
    fn disarm(mut self) -> Option<String> {
        self.path.take()
    }
}

impl Drop for TempFileGuard {
    fn drop(&mut self) {
        let Some(path) = self.path.take() else {
            return;
        };
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let actuator = self.actuator.clone();
            handle.spawn(async move {
                actuator
                    .execute_shell_command(&format!("rm -f {}", path))
                    .await;
            });
        }
    }
}

/// Produces a [`Capture`] per call; never fails.
pub struct CaptureEngine {
    actuator: Arc<dyn DeviceActuator>,
    config: CaptureConfig,
}

impl CaptureEngine {
    pub fn new(session: &DeviceSession, config: CaptureConfig) -> Self {
        Self {
            actuator: session.actuator(),
            config,
        }
    }

    pub fn config(&self) -> &CaptureConfig {
        &self.config
    }

    /// Capture the current screen.
    ///
    /// Tries the direct capture first, then a file-based `screencap` on each
    /// candidate display, and finally returns a marked placeholder.
    pub async fn capture(&self) -> Capture {
        // Outlives a timed-out attempt so a protected screen stays marked.
        let saw_secure = AtomicBool::new(false);
        match timeout(self.config.timeout, self.try_capture(&saw_secure)).await {
            Ok(capture) => capture,
            Err(_) => {
                let is_sensitive = saw_secure.load(Ordering::Relaxed);
                tracing::warn!(
                    timeout = ?self.config.timeout,
                    is_sensitive,
                    "screen capture timed out"
                );
                Capture::fallback(&self.config, is_sensitive)
            }
        }
    }

    async fn try_capture(&self, saw_secure: &AtomicBool) -> Capture {
        match self.actuator.screencap().await {
            Ok(bytes) => {
                if let Some(capture) = self.process(bytes).await {
                    return capture;
                }
            }
            Err(ScreencapError::SecureSurface) => {
                tracing::warn!("screen is protected, trying shell capture");
                saw_secure.store(true, Ordering::Relaxed);
            }
            Err(e) => tracing::debug!("direct capture failed: {}", e),
        }

        // A pinned display is the only target; other displays show other content.
        let displays: Vec<String> = match self.actuator.display_id() {
            Some(logical) => capture_display_for(self.actuator.as_ref(), logical)
                .await
                .into_iter()
                .collect(),
            None => discover_capture_displays(self.actuator.as_ref()).await,
        };
        let targets: Vec<Option<&str>> = if displays.is_empty() {
            vec![None]
        } else {
            displays.iter().map(|d| Some(d.as_str())).collect()
        };

        for target in targets {
            let Some(bytes) = self.capture_via_shell(target).await else {
                continue;
            };
            if let Some(capture) = self.process(bytes).await {
                return capture;
            }
        }

        let is_sensitive = saw_secure.load(Ordering::Relaxed);
        tracing::warn!(is_sensitive, "all capture paths failed, using placeholder");
        Capture::fallback(&self.config, is_sensitive)
    }

    async fn process(&self, bytes: Vec<u8>) -> Option<Capture> {
        let config = self.config.clone();
        match tokio::task::spawn_blocking(move || process(bytes, &config)).await {
            Ok(capture) => capture,
            Err(e) => {
                tracing::error!("capture processing task failed: {}", e);
                None
            }
        }
    }

    /// `screencap` into a temp file on the device and read it back.
    async fn capture_via_shell(&self, display_id: Option<&str>) -> Option<Vec<u8>> {
        let path = format!(
            "{}/agent_capture_{}.png",
            self.config.temp_dir,
            display_id.unwrap_or("default")
        );
        let guard = TempFileGuard {
            actuator: self.actuator.clone(),
            path: Some(path.clone()),
        };

        let bytes = self.dump_and_read(display_id, &path).await;

        if let Some(path) = guard.disarm() {
            self.actuator
                .execute_shell_command(&format!("rm -f {}", path))
                .await;
        }
        bytes.filter(|b| !b.is_empty())
    }

    async fn dump_and_read(&self, display_id: Option<&str>, path: &str) -> Option<Vec<u8>> {
        let command = match display_id {
            Some(id) => format!("screencap -d {} -p {}", id, path),
            None => format!("screencap -p {}", path),
        };
        let response = self.actuator.execute_shell_command(&command).await;
        if is_error_response(&response) {
            tracing::debug!(?display_id, response = %response, "shell capture failed");
            return None;
        }

        for attempt in 0..self.config.poll_attempts {
            let size = self
                .actuator
                .execute_shell_command(&format!("stat -c %s {}", path))
                .await;
            if size.trim().parse::<u64>().map(|n| n > 0).unwrap_or(false) {
                return self.actuator.read_file(path).await;
            }
            if attempt + 1 < self.config.poll_attempts {
                sleep(self.config.poll_interval).await;
            }
        }

        tracing::debug!(?display_id, "capture file never became non-empty");
        None
    }
}
