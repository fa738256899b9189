// Application ports - implemented by infrastructure adapters

pub mod media_source;
pub mod result_channel;
pub mod session_api;
pub mod transport;

pub use media_source::MediaSourceAcquirer;
pub use result_channel::{ChannelEvent, ResultChannel, ResultChannelConnector, POLICY_VIOLATION};
pub use session_api::SessionApi;
pub use transport::{MediaTransport, TransportFactory};

#[cfg(test)]
pub use media_source::MockMediaSourceAcquirer;
#[cfg(test)]
pub use result_channel::MockResultChannelConnector;
#[cfg(test)]
pub use session_api::MockSessionApi;
#[cfg(test)]
pub use transport::{MockMediaTransport, MockTransportFactory};
