// ffmpeg-backed media sources

mod camera;
mod ffmpeg;
pub mod ivf;
mod push_stream;
mod video_file;

use async_trait::async_trait;
use std::time::Duration;
use tokio::process::ChildStdout;
use tracing::info;

use self::ffmpeg::{spawn_frame_pump, vp8_track, Encoder};
use self::ivf::{IvfHeader, IvfReader};
use crate::application::media::{MediaHandle, MediaInfo};
use crate::application::ports::MediaSourceAcquirer;
use crate::domain::{
    ClientError, SourceDescriptor, SourceKind, DEFAULT_PUSH_FPS, DEFAULT_PUSH_HEIGHT, DEFAULT_PUSH_WIDTH,
};

/// How the encoder process is launched
#[derive(Debug, Clone, PartialEq)]
pub struct FfmpegSettings {
    pub binary: String,
    /// libvpx target bitrate, ffmpeg notation (e.g. `1M`)
    pub bitrate: String,
    /// Capture demuxer for cameras (`v4l2`, `avfoundation`, `dshow`)
    pub camera_format: String,
    pub user_camera: String,
    pub environment_camera: String,
    /// How long a source may take to produce its first output
    pub startup_timeout: Duration,
}

impl Default for FfmpegSettings {
    fn default() -> Self {
        Self {
            binary: "ffmpeg".to_string(),
            bitrate: "1M".to_string(),
            camera_format: "v4l2".to_string(),
            user_camera: "/dev/video0".to_string(),
            environment_camera: "/dev/video1".to_string(),
            startup_timeout: Duration::from_secs(10),
        }
    }
}

/// Acquires every source kind through an ffmpeg encoder process
pub struct FfmpegSourceAcquirer {
    settings: FfmpegSettings,
}

impl FfmpegSourceAcquirer {
    pub fn new(settings: FfmpegSettings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl MediaSourceAcquirer for FfmpegSourceAcquirer {
    async fn acquire(&self, source: &SourceDescriptor) -> Result<MediaHandle, ClientError> {
        info!("Acquiring {} source", source.kind());
        match source {
            SourceDescriptor::Camera { facing } => camera::acquire(&self.settings, *facing).await,
            SourceDescriptor::VideoFile { path } => video_file::acquire(&self.settings, path).await,
            SourceDescriptor::PushStream {
                width,
                height,
                target_fps,
            } => {
                push_stream::acquire(
                    &self.settings,
                    width.unwrap_or(DEFAULT_PUSH_WIDTH),
                    height.unwrap_or(DEFAULT_PUSH_HEIGHT),
                    target_fps.unwrap_or(DEFAULT_PUSH_FPS),
                )
                .await
            }
        }
    }
}

fn header_fps(header: &IvfHeader) -> Option<u32> {
    if header.timebase_num == 0 {
        return None;
    }
    let fps = (header.timebase_den as f64 / header.timebase_num as f64).round();
    (1.0..=240.0).contains(&fps).then_some(fps as u32)
}

/// Wrap a started encoder into a handle whose track carries its frames
fn into_handle(encoder: Encoder, reader: IvfReader<ChildStdout>, kind: SourceKind, fallback_fps: u32) -> MediaHandle {
    let header = *reader.header();
    let fps = header_fps(&header).unwrap_or(fallback_fps);
    let info = MediaInfo {
        kind,
        width: Some(header.width as u32),
        height: Some(header.height as u32),
        fps,
    };
    info!("{} source streaming {}x{}@{}", kind, header.width, header.height, fps);

    let (track, frames) = vp8_track();
    let mut handle = MediaHandle::new(info, track);
    let frame_duration = Duration::from_secs(1) / fps.max(1);
    handle.add_task(spawn_frame_pump(reader, frames, frame_duration, handle.cancel_token()));
    handle.add_task(encoder.stderr_task);
    handle.with_process(encoder.child)
}
