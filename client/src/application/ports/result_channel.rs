use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;

use crate::domain::{ClientError, SessionId};

/// Close code the server uses to reject the channel credential
pub const POLICY_VIOLATION: u16 = 1008;

/// Events surfaced by an open result channel
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    Message(String),
    Error(String),
    Closed { code: Option<u16>, reason: String },
}

/// An authenticated, open push channel
#[async_trait]
pub trait ResultChannel: Send {
    /// Next inbound event; `None` once the channel is finished
    async fn next_event(&mut self) -> Option<ChannelEvent>;
    async fn close(&mut self);
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait ResultChannelConnector: Send + Sync {
    /// Open the channel for `session_id` and send the auth frame first
    async fn open(&self, session_id: &SessionId, credential: &str) -> Result<Box<dyn ResultChannel>, ClientError>;
}
