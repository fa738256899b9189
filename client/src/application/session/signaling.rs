use shared::{CreateSessionRequest, InferenceParams, SdpKind, SessionDescription};
use tracing::{debug, info, warn};

use crate::application::ports::{MediaTransport, SessionApi};
use crate::domain::{ClientError, Lease, SessionConfig, SessionId};

/// Outcome of a successful offer/answer exchange
#[derive(Debug, Clone, PartialEq)]
pub struct NegotiatedSession {
    pub session_id: SessionId,
    pub lease: Option<Lease>,
}

/// Single-round offer/answer exchange against the session-create endpoint.
///
/// The local offer is produced before any network call, so a local
/// description failure never reaches the server. Errors from the API are
/// returned unchanged; there is no retry.
pub async fn negotiate(
    transport: &dyn MediaTransport,
    api: &dyn SessionApi,
    config: &SessionConfig,
) -> Result<NegotiatedSession, ClientError> {
    let offer = transport.create_offer().await?;
    debug!("Local offer ready ({} bytes of SDP)", offer.len());

    let request = CreateSessionRequest {
        webrtc: SessionDescription::offer(offer),
        processing: config.processing.clone(),
        inference: InferenceParams {
            prompt: config.prompt.clone(),
            backend: config.backend.clone(),
            model: config.model.clone(),
            output_schema_json: config.output_schema.clone(),
        },
    };

    let response = api.create_session(request).await?;
    if response.webrtc.kind != SdpKind::Answer {
        return Err(ClientError::Transport(format!(
            "expected an SDP answer from the server, got {:?}",
            response.webrtc.kind
        )));
    }

    transport.apply_answer(response.webrtc.sdp).await?;

    let lease = match response.lease {
        Some(grant) if grant.ttl_seconds == 0 => {
            warn!("Server granted a zero-length lease; keepalive disabled");
            None
        }
        Some(grant) => Some(Lease::granted(grant.ttl_seconds)),
        None => None,
    };

    info!("Session {} negotiated", response.session_id);
    Ok(NegotiatedSession {
        session_id: SessionId::from_string(response.session_id),
        lease,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::ports::{MockMediaTransport, MockSessionApi};
    use crate::domain::{CameraFacing, SourceDescriptor};
    use shared::{CreateSessionResponse, LeaseGrant};

    fn config() -> SessionConfig {
        SessionConfig::new(
            "https://api.example.com",
            "key",
            "count cars",
            SourceDescriptor::camera(CameraFacing::Environment),
        )
        .with_model("small")
    }

    fn answer(lease: Option<LeaseGrant>) -> CreateSessionResponse {
        CreateSessionResponse {
            session_id: "sess-1".to_string(),
            webrtc: SessionDescription::answer("v=0 answer".to_string()),
            lease,
        }
    }

    #[tokio::test]
    async fn test_offer_answer_round_trip() {
        let mut transport = MockMediaTransport::new();
        transport
            .expect_create_offer()
            .times(1)
            .returning(|| Ok("v=0 offer".to_string()));
        transport
            .expect_apply_answer()
            .withf(|sdp| sdp == "v=0 answer")
            .times(1)
            .returning(|_| Ok(()));

        let mut api = MockSessionApi::new();
        api.expect_create_session()
            .withf(|req| {
                req.webrtc.kind == SdpKind::Offer
                    && req.webrtc.sdp == "v=0 offer"
                    && req.inference.prompt == "count cars"
                    && req.inference.model.as_deref() == Some("small")
                    && req.processing.fps == 30
            })
            .times(1)
            .returning(|_| Ok(answer(Some(LeaseGrant { ttl_seconds: 300 }))));

        let negotiated = negotiate(&transport, &api, &config()).await.unwrap();
        assert_eq!(negotiated.session_id.as_str(), "sess-1");
        assert_eq!(negotiated.lease.unwrap().ttl_seconds, 300);
    }

    #[tokio::test]
    async fn test_local_offer_failure_skips_network() {
        let mut transport = MockMediaTransport::new();
        transport
            .expect_create_offer()
            .returning(|| Err(ClientError::Transport("no codecs".into())));
        transport.expect_apply_answer().never();

        let mut api = MockSessionApi::new();
        api.expect_create_session().never();

        let err = negotiate(&transport, &api, &config()).await.unwrap_err();
        assert!(matches!(err, ClientError::Transport(_)));
    }

    #[tokio::test]
    async fn test_server_error_propagates_unchanged() {
        let mut transport = MockMediaTransport::new();
        transport.expect_create_offer().returning(|| Ok("v=0".into()));
        transport.expect_apply_answer().never();

        let mut api = MockSessionApi::new();
        api.expect_create_session().times(1).returning(|_| {
            Err(ClientError::Server {
                status: 503,
                message: "overloaded".into(),
            })
        });

        let err = negotiate(&transport, &api, &config()).await.unwrap_err();
        assert!(matches!(err, ClientError::Server { status: 503, .. }));
    }

    #[tokio::test]
    async fn test_missing_or_zero_lease_is_none() {
        for grant in [None, Some(LeaseGrant { ttl_seconds: 0 })] {
            let mut transport = MockMediaTransport::new();
            transport.expect_create_offer().returning(|| Ok("v=0".into()));
            transport.expect_apply_answer().returning(|_| Ok(()));
            let mut api = MockSessionApi::new();
            api.expect_create_session().returning(move |_| Ok(answer(grant)));

            let negotiated = negotiate(&transport, &api, &config()).await.unwrap();
            assert!(negotiated.lease.is_none());
        }
    }
}
