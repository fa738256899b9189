use bytes::Bytes;
use image::{imageops::FilterType, Rgba, RgbaImage};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Child;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::domain::{ClientError, SourceKind};

/// One encoded video frame ready for the transport
#[derive(Debug, Clone)]
pub struct EncodedFrame {
    pub data: Bytes,
    pub duration: Duration,
}

/// The primary video track of an acquired source
pub struct MediaTrack {
    pub id: String,
    /// RTP mime type of the encoded frames (e.g. video/VP8)
    pub mime_type: String,
    pub frames: mpsc::Receiver<EncodedFrame>,
}

impl std::fmt::Debug for MediaTrack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaTrack")
            .field("id", &self.id)
            .field("mime_type", &self.mime_type)
            .finish()
    }
}

/// Read-only view of the live media source
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MediaInfo {
    pub kind: SourceKind,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub fps: u32,
}

/// An acquired, playing media source and everything it owns.
///
/// Owned exclusively by the session controller; `stop` releases the
/// encoder process, the pump tasks and finally the render surface.
pub struct MediaHandle {
    info: MediaInfo,
    track: Option<MediaTrack>,
    surface: Option<Arc<FrameSurface>>,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
    process: Option<Child>,
}

impl MediaHandle {
    pub fn new(info: MediaInfo, track: MediaTrack) -> Self {
        Self {
            info,
            track: Some(track),
            surface: None,
            cancel: CancellationToken::new(),
            tasks: Vec::new(),
            process: None,
        }
    }

    pub fn with_surface(mut self, surface: Arc<FrameSurface>) -> Self {
        self.surface = Some(surface);
        self
    }

    pub fn with_process(mut self, process: Child) -> Self {
        self.process = Some(process);
        self
    }

    pub fn add_task(&mut self, task: JoinHandle<()>) {
        self.tasks.push(task);
    }

    /// Token cancelled when the handle is stopped; pump tasks select on it
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn info(&self) -> &MediaInfo {
        &self.info
    }

    pub fn surface(&self) -> Option<Arc<FrameSurface>> {
        self.surface.clone()
    }

    /// Hand the video track to the transport; only the first call gets it
    pub fn take_primary_track(&mut self) -> Option<MediaTrack> {
        self.track.take()
    }

    pub async fn stop(mut self) {
        info!("Stopping {} media source", self.info.kind);

        self.cancel.cancel();
        for task in self.tasks.drain(..) {
            task.abort();
        }
        self.track = None;

        if let Some(mut child) = self.process.take() {
            if let Err(e) = child.start_kill() {
                debug!("Encoder process already gone: {}", e);
            }
            match tokio::time::timeout(Duration::from_secs(2), child.wait()).await {
                Ok(Ok(status)) => debug!("Encoder process exited: {}", status),
                Ok(Err(e)) => warn!("Failed to reap encoder process: {}", e),
                Err(_) => warn!("Encoder process did not exit within 2s"),
            }
        }

        if self.surface.take().is_some() {
            debug!("Released push-stream render surface");
        }
    }
}

impl Drop for MediaHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}

struct Canvas {
    pixels: RgbaImage,
    drawn_seq: u64,
}

/// Off-screen RGBA surface backing a push-stream source.
///
/// Pushed images replace the whole surface; the capture feed reads whatever
/// is drawn at tick time, so bursts of pushes coalesce to the latest one.
pub struct FrameSurface {
    width: u32,
    height: u32,
    fps: u32,
    next_seq: AtomicU64,
    canvas: RwLock<Canvas>,
}

impl FrameSurface {
    /// Surface initialised to an opaque black frame
    pub fn new(width: u32, height: u32, fps: u32) -> Self {
        Self {
            width,
            height,
            fps,
            next_seq: AtomicU64::new(0),
            canvas: RwLock::new(Canvas {
                pixels: RgbaImage::from_pixel(width, height, Rgba([0, 0, 0, 255])),
                drawn_seq: 0,
            }),
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn fps(&self) -> u32 {
        self.fps
    }

    pub fn frame_interval(&self) -> Duration {
        Duration::from_secs(1) / self.fps.max(1)
    }

    /// Decode `bytes` off the executor and draw them over the whole surface.
    ///
    /// Returns `false` when a frame pushed later was drawn first, in which
    /// case this one is discarded.
    pub async fn draw(&self, bytes: Vec<u8>) -> Result<bool, ClientError> {
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst) + 1;
        let (width, height) = (self.width, self.height);

        let decoded = tokio::task::spawn_blocking(move || decode_to_fit(&bytes, width, height))
            .await
            .map_err(|e| ClientError::Source(format!("frame decode task failed: {}", e)))??;

        let mut canvas = self.canvas.write().await;
        if seq < canvas.drawn_seq {
            debug!("Discarding stale pushed frame {} (surface shows {})", seq, canvas.drawn_seq);
            return Ok(false);
        }
        canvas.pixels = decoded;
        canvas.drawn_seq = seq;
        Ok(true)
    }

    /// Current contents as tightly packed RGBA bytes
    pub async fn capture(&self) -> Vec<u8> {
        self.canvas.read().await.pixels.as_raw().clone()
    }
}

fn decode_to_fit(bytes: &[u8], width: u32, height: u32) -> Result<RgbaImage, ClientError> {
    let img = image::load_from_memory(bytes)
        .map_err(|e| ClientError::Source(format!("failed to decode pushed frame: {}", e)))?;
    if img.width() == width && img.height() == height {
        return Ok(img.to_rgba8());
    }
    Ok(img.resize_exact(width, height, FilterType::Triangle).to_rgba8())
}
