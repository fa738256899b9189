use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;

use crate::application::media::MediaHandle;
use crate::domain::{ClientError, SourceDescriptor};

/// Turns a source descriptor into a live media handle
#[cfg_attr(test, automock)]
#[async_trait]
pub trait MediaSourceAcquirer: Send + Sync {
    async fn acquire(&self, source: &SourceDescriptor) -> Result<MediaHandle, ClientError>;
}
