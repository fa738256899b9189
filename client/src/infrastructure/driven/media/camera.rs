use tracing::warn;

use super::ffmpeg::{spawn_encoder, OpenFailure};
use super::{into_handle, FfmpegSettings};
use crate::application::media::MediaHandle;
use crate::domain::{CameraFacing, ClientError, SourceKind};

const CAMERA_FALLBACK_FPS: u32 = 30;

pub(super) fn device_for(settings: &FfmpegSettings, facing: CameraFacing) -> &str {
    match facing {
        CameraFacing::User => &settings.user_camera,
        CameraFacing::Environment => &settings.environment_camera,
    }
}

pub(super) fn input_args(settings: &FfmpegSettings, facing: CameraFacing) -> Vec<String> {
    vec![
        "-f".to_string(),
        settings.camera_format.clone(),
        "-i".to_string(),
        device_for(settings, facing).to_string(),
    ]
}

pub(super) async fn acquire(settings: &FfmpegSettings, facing: CameraFacing) -> Result<MediaHandle, ClientError> {
    let device = device_for(settings, facing).to_string();
    let mut encoder = spawn_encoder(settings, &input_args(settings, facing), false)?;

    match encoder.open_stream(settings.startup_timeout).await {
        Ok(reader) => Ok(into_handle(encoder, reader, SourceKind::Camera, CAMERA_FALLBACK_FPS)),
        Err(failure) => {
            let detail = encoder.stderr.joined();
            encoder.abandon().await;
            warn!("Camera {} failed to start: {:?} {}", device, failure, detail);
            Err(match failure {
                OpenFailure::TimedOut => ClientError::Source(format!(
                    "camera {} produced no video within {}s",
                    device,
                    settings.startup_timeout.as_secs()
                )),
                OpenFailure::Ended(_) if detail.is_empty() => {
                    ClientError::Source(format!("failed to open camera {}", device))
                }
                OpenFailure::Ended(_) => ClientError::Source(format!("failed to open camera {}: {}", device, detail)),
            })
        }
    }
}
