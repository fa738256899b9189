pub mod http_api;
pub mod media;
pub mod webrtc;
pub mod ws_channel;

pub use http_api::HttpSessionApi;
pub use media::{FfmpegSettings, FfmpegSourceAcquirer};
pub use webrtc::WebRtcTransportFactory;
pub use ws_channel::WsChannelConnector;
