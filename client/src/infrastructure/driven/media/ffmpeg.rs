use std::collections::VecDeque;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::ivf::IvfReader;
use super::FfmpegSettings;
use crate::application::media::{EncodedFrame, MediaTrack};
use crate::domain::ClientError;

const STDERR_TAIL_LINES: usize = 20;
const FRAME_BUFFER: usize = 8;

/// Last lines ffmpeg wrote to stderr
#[derive(Clone, Default)]
pub(super) struct StderrTail(Arc<Mutex<VecDeque<String>>>);

impl StderrTail {
    fn push(&self, line: String) {
        if let Ok(mut lines) = self.0.lock() {
            if lines.len() == STDERR_TAIL_LINES {
                lines.pop_front();
            }
            lines.push_back(line);
        }
    }

    pub(super) fn joined(&self) -> String {
        self.0
            .lock()
            .map(|lines| lines.iter().cloned().collect::<Vec<_>>().join("; "))
            .unwrap_or_default()
    }
}

/// A running VP8/IVF encoder process
pub(super) struct Encoder {
    pub child: Child,
    pub stdin: Option<ChildStdin>,
    pub stdout: Option<ChildStdout>,
    pub stderr: StderrTail,
    pub stderr_task: JoinHandle<()>,
}

/// Spawn ffmpeg with `input` args, encoding the first video stream to IVF on stdout
pub(super) fn spawn_encoder(settings: &FfmpegSettings, input: &[String], pipe_stdin: bool) -> Result<Encoder, ClientError> {
    let mut command = Command::new(&settings.binary);
    command
        .arg("-hide_banner")
        .arg("-loglevel")
        .arg("error")
        .args(input)
        .arg("-an")
        .arg("-map")
        .arg("0:v:0")
        .arg("-c:v")
        .arg("libvpx")
        .arg("-b:v")
        .arg(&settings.bitrate)
        .arg("-deadline")
        .arg("realtime")
        .arg("-cpu-used")
        .arg("8")
        .arg("-pix_fmt")
        .arg("yuv420p")
        .arg("-g")
        .arg("60")
        .arg("-f")
        .arg("ivf")
        .arg("pipe:1")
        .stdin(if pipe_stdin { Stdio::piped() } else { Stdio::null() })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    debug!("Spawning {} {:?}", settings.binary, input);
    let mut child = command.spawn().map_err(|e| {
        ClientError::Source(format!(
            "failed to start {} (is ffmpeg installed?): {}",
            settings.binary, e
        ))
    })?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| ClientError::Source("failed to capture encoder stdout".to_string()))?;
    let stdin = child.stdin.take();
    let stderr = StderrTail::default();
    let stderr_task = match child.stderr.take() {
        Some(pipe) => tokio::spawn(collect_stderr(pipe, stderr.clone())),
        None => tokio::spawn(async {}),
    };

    Ok(Encoder {
        child,
        stdin,
        stdout: Some(stdout),
        stderr,
        stderr_task,
    })
}

async fn collect_stderr(pipe: ChildStderr, tail: StderrTail) {
    let mut lines = BufReader::new(pipe).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        debug!("ffmpeg: {}", line);
        tail.push(line);
    }
}

impl Encoder {
    /// Wait for the IVF header within `limit`
    pub(super) async fn open_stream(&mut self, limit: Duration) -> Result<IvfReader<ChildStdout>, OpenFailure> {
        let stdout = self
            .stdout
            .take()
            .ok_or_else(|| OpenFailure::Ended("encoder output already taken".to_string()))?;
        match tokio::time::timeout(limit, IvfReader::new(stdout)).await {
            Ok(Ok(reader)) => Ok(reader),
            Ok(Err(e)) => {
                self.settle().await;
                Err(OpenFailure::Ended(e.to_string()))
            }
            Err(_) => Err(OpenFailure::TimedOut),
        }
    }

    /// Let an exiting process flush its stderr before it is inspected
    async fn settle(&mut self) {
        let _ = tokio::time::timeout(Duration::from_secs(2), self.child.wait()).await;
        let _ = tokio::time::timeout(Duration::from_secs(1), &mut self.stderr_task).await;
    }

    /// Kill and reap after a failed start
    pub(super) async fn abandon(mut self) {
        self.stderr_task.abort();
        if let Err(e) = self.child.start_kill() {
            debug!("Encoder already exited: {}", e);
        }
        let _ = tokio::time::timeout(Duration::from_secs(2), self.child.wait()).await;
    }
}

/// Why the encoder produced no stream
#[derive(Debug)]
pub(super) enum OpenFailure {
    TimedOut,
    Ended(String),
}

/// A fresh VP8 track and the sender feeding it
pub(super) fn vp8_track() -> (MediaTrack, mpsc::Sender<EncodedFrame>) {
    let (tx, rx) = mpsc::channel(FRAME_BUFFER);
    let track = MediaTrack {
        id: format!("video-{}", Uuid::new_v4()),
        mime_type: "video/VP8".to_string(),
        frames: rx,
    };
    (track, tx)
}

/// Pump IVF frames into the track until cancelled or the stream ends
pub(super) fn spawn_frame_pump(
    mut reader: IvfReader<ChildStdout>,
    tx: mpsc::Sender<EncodedFrame>,
    fallback: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut frames: u64 = 0;
        loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => break,
                next = reader.next_frame(fallback) => next,
            };
            match next {
                Ok(Some((data, duration))) => {
                    if tx.send(EncodedFrame { data, duration }).await.is_err() {
                        debug!("Video track has no consumer, stopping pump");
                        break;
                    }
                    frames += 1;
                }
                Ok(None) => {
                    info!("Encoder output ended after {} frames", frames);
                    break;
                }
                Err(e) => {
                    warn!("Encoder output failed: {}", e);
                    break;
                }
            }
        }
    })
}
