use std::path::Path;
use tracing::warn;

use super::ffmpeg::{spawn_encoder, OpenFailure};
use super::{into_handle, FfmpegSettings};
use crate::application::media::MediaHandle;
use crate::domain::{ClientError, SourceKind};

const FILE_FALLBACK_FPS: u32 = 30;

/// ffmpeg stderr lines meaning the input had nothing to map
const NO_STREAM_MARKERS: [&str; 3] = [
    "does not contain any stream",
    "matches no streams",
    "Output file is empty",
];

/// Looped, real-time paced, muted playback
pub(super) fn input_args(path: &Path) -> Vec<String> {
    vec![
        "-re".to_string(),
        "-stream_loop".to_string(),
        "-1".to_string(),
        "-i".to_string(),
        path.to_string_lossy().into_owned(),
    ]
}

pub(super) fn load_failure(failure: &OpenFailure, stderr: &str) -> ClientError {
    let message = match failure {
        OpenFailure::TimedOut => "Video loading timeout",
        OpenFailure::Ended(_) if NO_STREAM_MARKERS.iter().any(|marker| stderr.contains(marker)) => "no video tracks",
        OpenFailure::Ended(_) => "Failed to load video file",
    };
    ClientError::Source(message.to_string())
}

pub(super) async fn acquire(settings: &FfmpegSettings, path: &Path) -> Result<MediaHandle, ClientError> {
    let mut encoder = spawn_encoder(settings, &input_args(path), false)?;

    match encoder.open_stream(settings.startup_timeout).await {
        Ok(reader) => Ok(into_handle(encoder, reader, SourceKind::VideoFile, FILE_FALLBACK_FPS)),
        Err(failure) => {
            let detail = encoder.stderr.joined();
            encoder.abandon().await;
            warn!("Video file {} failed to load: {:?} {}", path.display(), failure, detail);
            Err(load_failure(&failure, &detail))
        }
    }
}
