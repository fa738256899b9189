use shared::InferenceResult;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::events::SessionEvent;
use crate::application::ports::{ChannelEvent, ResultChannel, POLICY_VIOLATION};
use crate::domain::ClientError;

const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

/// Map one inbound channel event to what the controller should do with it
pub(crate) fn classify(event: ChannelEvent) -> SessionEvent {
    let err = match event {
        ChannelEvent::Message(text) => match serde_json::from_str::<InferenceResult>(&text) {
            Ok(result) => return SessionEvent::Result(result),
            Err(e) => ClientError::Parse(e.to_string()),
        },
        ChannelEvent::Error(reason) => ClientError::ChannelClosed(format!("errored unexpectedly: {}", reason)),
        ChannelEvent::Closed {
            code: Some(POLICY_VIOLATION),
            reason,
        } => {
            let reason = if reason.is_empty() {
                "result channel rejected the credential".to_string()
            } else {
                reason
            };
            ClientError::Authentication(reason)
        }
        ChannelEvent::Closed { code, reason } => {
            let code = code.map(|c| c.to_string()).unwrap_or_else(|| "none".to_string());
            ClientError::ChannelClosed(format!("closed unexpectedly (code {}): {}", code, reason))
        }
    };

    if err.is_fatal() {
        SessionEvent::Fatal(err)
    } else {
        SessionEvent::Error(err)
    }
}

/// Background reader draining an open result channel into the session queue
pub struct ChannelReader {
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl ChannelReader {
    pub(crate) fn spawn(channel: Box<dyn ResultChannel>, events: UnboundedSender<SessionEvent>) -> Self {
        let cancel = CancellationToken::new();
        let task = tokio::spawn(read_loop(channel, events, cancel.clone()));
        Self {
            cancel,
            task: Some(task),
        }
    }

    /// Close the channel; nothing is reported for a close we asked for
    pub async fn close(mut self) {
        self.cancel.cancel();
        if let Some(mut task) = self.task.take() {
            if tokio::time::timeout(CLOSE_TIMEOUT, &mut task).await.is_err() {
                warn!("Result channel did not close within {:?}; aborting reader", CLOSE_TIMEOUT);
                task.abort();
            }
        }
        debug!("Result channel closed");
    }
}

impl Drop for ChannelReader {
    fn drop(&mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

async fn read_loop(
    mut channel: Box<dyn ResultChannel>,
    events: UnboundedSender<SessionEvent>,
    cancel: CancellationToken,
) {
    info!("Result channel reader started");

    loop {
        let event = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                channel.close().await;
                return;
            }
            event = channel.next_event() => event,
        };

        let Some(event) = event else {
            if !cancel.is_cancelled() {
                let _ = events.send(SessionEvent::Fatal(ClientError::ChannelClosed(
                    "closed unexpectedly: stream ended".to_string(),
                )));
            }
            return;
        };

        let outcome = classify(event);
        let fatal = matches!(outcome, SessionEvent::Fatal(_));
        if events.send(outcome).is_err() {
            debug!("Session queue gone; stopping result reader");
            return;
        }
        if fatal {
            channel.close().await;
            return;
        }
    }
}
