use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use shared::ClientFrame;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use url::Url;

use super::http_api::parse_endpoint;
use crate::application::ports::{ChannelEvent, ResultChannel, ResultChannelConnector};
use crate::domain::{ClientError, SessionId};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Opens result channels on the service's websocket endpoint
pub struct WsChannelConnector {
    base: Url,
}

impl WsChannelConnector {
    pub fn new(endpoint: &str) -> Result<Self, ClientError> {
        Ok(Self {
            base: parse_endpoint(endpoint)?,
        })
    }

    /// `ws(s)://{host}/ws/streams/{id}`
    fn channel_url(&self, session_id: &SessionId) -> Result<Url, ClientError> {
        let mut url = self.base.clone();
        let scheme = if url.scheme() == "https" { "wss" } else { "ws" };
        url.set_scheme(scheme)
            .map_err(|_| ClientError::validation("endpoint", "cannot derive websocket URL from endpoint"))?;
        url.set_query(None);
        url.set_fragment(None);
        url.set_path("/");
        url.path_segments_mut()
            .map_err(|_| ClientError::validation("endpoint", "cannot derive websocket URL from endpoint"))?
            .clear()
            .extend(["ws", "streams", session_id.as_str()]);
        Ok(url)
    }
}

#[async_trait]
impl ResultChannelConnector for WsChannelConnector {
    async fn open(&self, session_id: &SessionId, credential: &str) -> Result<Box<dyn ResultChannel>, ClientError> {
        let url = self.channel_url(session_id)?;
        info!("Opening result channel {}", url);

        let (mut stream, _) = connect_async(url.as_str()).await.map_err(connect_error)?;

        let auth = serde_json::to_string(&ClientFrame::Auth {
            api_key: credential.to_string(),
        })
        .map_err(|e| ClientError::Parse(e.to_string()))?;
        stream
            .send(Message::Text(auth))
            .await
            .map_err(|e| ClientError::Network(format!("failed to authenticate result channel: {}", e)))?;

        debug!("Result channel authenticated for session {}", session_id);
        Ok(Box::new(WsResultChannel { stream, finished: false }))
    }
}

fn connect_error(err: tungstenite::Error) -> ClientError {
    match err {
        tungstenite::Error::Http(response) => {
            let status = response.status();
            if status.as_u16() == 401 || status.as_u16() == 403 {
                ClientError::Authentication(format!("result channel upgrade rejected ({})", status))
            } else {
                ClientError::Network(format!("result channel upgrade failed ({})", status))
            }
        }
        other => ClientError::Network(other.to_string()),
    }
}

/// An open, authenticated websocket result channel
pub struct WsResultChannel {
    stream: WsStream,
    finished: bool,
}

#[async_trait]
impl ResultChannel for WsResultChannel {
    async fn next_event(&mut self) -> Option<ChannelEvent> {
        if self.finished {
            return None;
        }
        loop {
            let Some(frame) = self.stream.next().await else {
                self.finished = true;
                return None;
            };
            match frame {
                Ok(message) => {
                    if let Some(event) = message_event(message) {
                        if matches!(event, ChannelEvent::Closed { .. }) {
                            self.finished = true;
                        }
                        return Some(event);
                    }
                }
                Err(tungstenite::Error::ConnectionClosed) | Err(tungstenite::Error::AlreadyClosed) => {
                    self.finished = true;
                    return None;
                }
                Err(e) => {
                    self.finished = true;
                    return Some(ChannelEvent::Error(e.to_string()));
                }
            }
        }
    }

    async fn close(&mut self) {
        self.finished = true;
        if let Err(e) = self.stream.close(None).await {
            debug!("Result channel close handshake failed: {}", e);
        }
    }
}

/// Control frames yield `None`; tungstenite answers pings itself
fn message_event(message: Message) -> Option<ChannelEvent> {
    match message {
        Message::Text(text) => Some(ChannelEvent::Message(text)),
        Message::Binary(data) => match String::from_utf8(data) {
            Ok(text) => Some(ChannelEvent::Message(text)),
            Err(_) => {
                warn!("Ignoring non UTF-8 binary frame on result channel");
                None
            }
        },
        Message::Close(frame) => Some(match frame {
            Some(frame) => ChannelEvent::Closed {
                code: Some(u16::from(frame.code)),
                reason: frame.reason.into_owned(),
            },
            None => ChannelEvent::Closed {
                code: None,
                reason: String::new(),
            },
        }),
        Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
    use tokio_tungstenite::tungstenite::protocol::CloseFrame;

    #[test]
    fn test_channel_url_follows_endpoint_security() {
        let id = SessionId::from_string("s-1".into());
        let secure = WsChannelConnector::new("https://api.example.com/v1?x=1").unwrap();
        assert_eq!(secure.channel_url(&id).unwrap().as_str(), "wss://api.example.com/ws/streams/s-1");

        let plain = WsChannelConnector::new("http://localhost:8080/api").unwrap();
        assert_eq!(plain.channel_url(&id).unwrap().as_str(), "ws://localhost:8080/ws/streams/s-1");
    }

    #[test]
    fn test_close_frame_keeps_code_and_reason() {
        let event = message_event(Message::Close(Some(CloseFrame {
            code: CloseCode::Policy,
            reason: "invalid api key".into(),
        })));
        assert_eq!(
            event,
            Some(ChannelEvent::Closed {
                code: Some(1008),
                reason: "invalid api key".into()
            })
        );
        assert_eq!(
            message_event(Message::Close(None)),
            Some(ChannelEvent::Closed { code: None, reason: String::new() })
        );
    }

    #[test]
    fn test_data_and_control_frames() {
        assert_eq!(
            message_event(Message::Text("{}".into())),
            Some(ChannelEvent::Message("{}".into()))
        );
        assert_eq!(
            message_event(Message::Binary(b"{\"a\":1}".to_vec())),
            Some(ChannelEvent::Message("{\"a\":1}".into()))
        );
        assert_eq!(message_event(Message::Ping(vec![1])), None);
        assert_eq!(message_event(Message::Binary(vec![0xff, 0xfe])), None);
    }
}
