use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use std::sync::Arc;

use crate::application::media::MediaTrack;
use crate::domain::{ClientError, RelayHints};

/// A media transport carrying one outbound video track
#[cfg_attr(test, automock)]
#[async_trait]
pub trait MediaTransport: Send + Sync {
    /// Build the local offer, apply it locally and return its SDP
    async fn create_offer(&self) -> Result<String, ClientError>;
    async fn apply_answer(&self, sdp: String) -> Result<(), ClientError>;
    async fn close(&self) -> Result<(), ClientError>;
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait TransportFactory: Send + Sync {
    async fn connect(&self, track: MediaTrack, relay: &RelayHints) -> Result<Arc<dyn MediaTransport>, ClientError>;
}
