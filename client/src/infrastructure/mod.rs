// Infrastructure layer - adapters for the perception service, WebRTC and ffmpeg
// Implements the ports defined in the application layer

use std::sync::Arc;

use crate::application::SessionDependencies;
use crate::domain::{ClientError, SessionConfig};

pub mod driven;
pub mod settings;

pub use driven::{FfmpegSettings, FfmpegSourceAcquirer, HttpSessionApi, WebRtcTransportFactory, WsChannelConnector};
pub use settings::Settings;

/// Wire the shipped adapters for `config`
pub fn default_dependencies(config: &SessionConfig, ffmpeg: FfmpegSettings) -> Result<SessionDependencies, ClientError> {
    Ok(SessionDependencies {
        api: Arc::new(HttpSessionApi::new(&config.endpoint, config.api_key.clone())?),
        channels: Arc::new(WsChannelConnector::new(&config.endpoint)?),
        transports: Arc::new(WebRtcTransportFactory::new()),
        sources: Arc::new(FfmpegSourceAcquirer::new(ffmpeg)),
    })
}
