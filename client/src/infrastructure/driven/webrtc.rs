use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MediaEngine, MIME_TYPE_VP8};
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::media::Sample;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::policy::ice_transport_policy::RTCIceTransportPolicy;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;

use crate::application::media::{EncodedFrame, MediaTrack};
use crate::application::ports::{MediaTransport, TransportFactory};
use crate::domain::{ClientError, RelayHints};

const STREAM_ID: &str = "perception-client";

fn transport_error(context: &str) -> impl Fn(webrtc::Error) -> ClientError + '_ {
    move |e| ClientError::Transport(format!("{}: {}", context, e))
}

/// Builds send-only peer connections for one video track
#[derive(Default)]
pub struct WebRtcTransportFactory;

impl WebRtcTransportFactory {
    pub fn new() -> Self {
        Self
    }
}

pub(crate) fn rtc_configuration(relay: &RelayHints) -> RTCConfiguration {
    let ice_servers = relay
        .ice_servers
        .iter()
        .map(|server| RTCIceServer {
            urls: server.urls.clone(),
            username: server.username.clone().unwrap_or_default(),
            credential: server.credential.clone().unwrap_or_default(),
            ..Default::default()
        })
        .collect();

    RTCConfiguration {
        ice_servers,
        ice_transport_policy: if relay.relay_only {
            RTCIceTransportPolicy::Relay
        } else {
            RTCIceTransportPolicy::All
        },
        ..Default::default()
    }
}

#[async_trait]
impl TransportFactory for WebRtcTransportFactory {
    async fn connect(&self, track: MediaTrack, relay: &RelayHints) -> Result<Arc<dyn MediaTransport>, ClientError> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(transport_error("failed to register codecs"))?;
        let registry = register_default_interceptors(Registry::new(), &mut media_engine)
            .map_err(transport_error("failed to register interceptors"))?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let peer_connection = Arc::new(
            api.new_peer_connection(rtc_configuration(relay))
                .await
                .map_err(transport_error("failed to create peer connection"))?,
        );

        let MediaTrack { id, mime_type, frames } = track;
        if !mime_type.eq_ignore_ascii_case(MIME_TYPE_VP8) {
            return Err(ClientError::Transport(format!("unsupported track codec {}", mime_type)));
        }
        let video_track = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: MIME_TYPE_VP8.to_owned(),
                clock_rate: 90000,
                ..Default::default()
            },
            id.clone(),
            STREAM_ID.to_owned(),
        ));

        let rtp_sender = peer_connection
            .add_track(Arc::clone(&video_track) as Arc<dyn TrackLocal + Send + Sync>)
            .await
            .map_err(transport_error("failed to add video track"))?;

        let cancel = CancellationToken::new();

        // RTCP must be read for the interceptors (NACK, reports) to run
        let rtcp_cancel = cancel.clone();
        tokio::spawn(async move {
            let mut rtcp_buf = vec![0u8; 1500];
            loop {
                tokio::select! {
                    _ = rtcp_cancel.cancelled() => break,
                    read = rtp_sender.read(&mut rtcp_buf) => {
                        if read.is_err() {
                            break;
                        }
                    }
                }
            }
        });

        tokio::spawn(write_samples(video_track, frames, cancel.clone()));

        let state_cancel = cancel.clone();
        peer_connection.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
            let token = state_cancel.clone();
            Box::pin(async move {
                info!("Peer connection state changed: {}", state);
                if matches!(state, RTCPeerConnectionState::Failed | RTCPeerConnectionState::Closed) {
                    warn!("Peer connection {}, stopping sample writer", state);
                    token.cancel();
                }
            })
        }));

        info!("Peer connection ready with track {}", id);
        Ok(Arc::new(WebRtcTransport {
            peer_connection,
            cancel,
        }))
    }
}

/// Forward encoded frames onto the track until cancelled or the source ends
async fn write_samples(
    track: Arc<TrackLocalStaticSample>,
    mut frames: mpsc::Receiver<EncodedFrame>,
    cancel: CancellationToken,
) {
    let mut written: u64 = 0;
    loop {
        let frame = tokio::select! {
            _ = cancel.cancelled() => break,
            frame = frames.recv() => frame,
        };
        let Some(frame) = frame else {
            debug!("Media source ended after {} frames", written);
            break;
        };

        let sample = Sample {
            data: frame.data,
            duration: frame.duration,
            ..Default::default()
        };
        if let Err(e) = track.write_sample(&sample).await {
            warn!("Failed to write video sample: {}", e);
            break;
        }
        written += 1;
        if written % 300 == 0 {
            debug!("Sent {} frames", written);
        }
    }
}

pub struct WebRtcTransport {
    peer_connection: Arc<RTCPeerConnection>,
    cancel: CancellationToken,
}

#[async_trait]
impl MediaTransport for WebRtcTransport {
    async fn create_offer(&self) -> Result<String, ClientError> {
        let offer = self
            .peer_connection
            .create_offer(None)
            .await
            .map_err(transport_error("failed to create offer"))?;

        // Non-trickle: the offer sent to the service carries every candidate
        let mut gathered = self.peer_connection.gathering_complete_promise().await;
        self.peer_connection
            .set_local_description(offer)
            .await
            .map_err(transport_error("failed to set local description"))?;
        let _ = gathered.recv().await;

        let local = self
            .peer_connection
            .local_description()
            .await
            .ok_or_else(|| ClientError::Transport("local description missing after gathering".to_string()))?;
        debug!("Local offer ready ({} bytes)", local.sdp.len());
        Ok(local.sdp)
    }

    async fn apply_answer(&self, sdp: String) -> Result<(), ClientError> {
        let answer = RTCSessionDescription::answer(sdp).map_err(transport_error("invalid answer"))?;
        self.peer_connection
            .set_remote_description(answer)
            .await
            .map_err(transport_error("failed to set remote description"))?;
        info!("Remote answer applied");
        Ok(())
    }

    async fn close(&self) -> Result<(), ClientError> {
        self.cancel.cancel();
        self.peer_connection
            .close()
            .await
            .map_err(transport_error("failed to close peer connection"))?;
        info!("Peer connection closed");
        Ok(())
    }
}
