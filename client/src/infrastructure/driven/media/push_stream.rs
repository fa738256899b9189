use std::sync::Arc;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::ffmpeg::{spawn_encoder, OpenFailure};
use super::{into_handle, FfmpegSettings};
use crate::application::media::{FrameSurface, MediaHandle};
use crate::domain::{ClientError, SourceKind};

/// Raw RGBA frames of `width`x`height` on stdin
pub(super) fn input_args(width: u32, height: u32, fps: u32) -> Vec<String> {
    vec![
        "-f".to_string(),
        "rawvideo".to_string(),
        "-pix_fmt".to_string(),
        "rgba".to_string(),
        "-s".to_string(),
        format!("{}x{}", width, height),
        "-r".to_string(),
        fps.to_string(),
        "-i".to_string(),
        "pipe:0".to_string(),
    ]
}

/// Write the surface to `sink` once per frame interval
async fn feed_surface<W: AsyncWrite + Unpin>(surface: Arc<FrameSurface>, mut sink: W, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(surface.frame_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }
        let frame = surface.capture().await;
        if let Err(e) = sink.write_all(&frame).await {
            warn!("Encoder stopped accepting frames: {}", e);
            break;
        }
    }
    debug!("Push-stream capture feed stopped");
}

pub(super) async fn acquire(settings: &FfmpegSettings, width: u32, height: u32, fps: u32) -> Result<MediaHandle, ClientError> {
    let surface = Arc::new(FrameSurface::new(width, height, fps));
    let mut encoder = spawn_encoder(settings, &input_args(width, height, fps), true)?;

    let stdin = encoder
        .stdin
        .take()
        .ok_or_else(|| ClientError::Source("failed to open encoder input".to_string()))?;
    let feed_cancel = CancellationToken::new();
    let feed = tokio::spawn(feed_surface(surface.clone(), stdin, feed_cancel.clone()));

    match encoder.open_stream(settings.startup_timeout).await {
        Ok(reader) => {
            let mut handle = into_handle(encoder, reader, SourceKind::PushStream, fps);
            handle.add_task(feed);
            Ok(handle.with_surface(surface))
        }
        Err(failure) => {
            feed_cancel.cancel();
            let detail = encoder.stderr.joined();
            encoder.abandon().await;
            Err(ClientError::Source(match failure {
                OpenFailure::TimedOut => "push-stream encoder produced no output".to_string(),
                OpenFailure::Ended(e) => format!("push-stream encoder failed: {} {}", e, detail),
            }))
        }
    }
}
