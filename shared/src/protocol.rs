use serde::{Deserialize, Serialize};

/// SDP payload exchanged during session creation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub kind: SdpKind,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: String) -> Self {
        Self { kind: SdpKind::Offer, sdp }
    }

    pub fn answer(sdp: String) -> Self {
        Self { kind: SdpKind::Answer, sdp }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpKind {
    Offer,
    Answer,
}

/// How the backend samples the incoming video into clips
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingParams {
    pub sampling_ratio: f64,
    pub fps: u32,
    pub clip_length_seconds: f64,
    pub delay_seconds: f64,
}

impl Default for ProcessingParams {
    fn default() -> Self {
        Self {
            sampling_ratio: 0.1,
            fps: 30,
            clip_length_seconds: 1.0,
            delay_seconds: 1.0,
        }
    }
}

/// What the backend should run on each clip
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferenceParams {
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backend: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_schema_json: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateSessionRequest {
    pub webrtc: SessionDescription,
    pub processing: ProcessingParams,
    pub inference: InferenceParams,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateSessionResponse {
    pub session_id: String,
    pub webrtc: SessionDescription,
    #[serde(default)]
    pub lease: Option<LeaseGrant>,
}

/// Lease granted at session creation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseGrant {
    pub ttl_seconds: u64,
}

/// Keepalive response; carries the refreshed ttl
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseRenewal {
    pub ttl_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdatePromptRequest {
    pub prompt: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackRequest {
    pub rating: u8,
    pub category: String,
    pub feedback: String,
}

/// Error body returned by the REST endpoints
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ErrorBody {
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

impl ErrorBody {
    pub fn reason(&self) -> Option<&str> {
        self.message.as_deref().or(self.error.as_deref())
    }
}

/// One inference output pushed over the result channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferenceResult {
    pub id: String,
    pub model_backend: String,
    pub model_name: String,
    pub prompt: String,
    /// Plain text, or JSON text when an output schema was requested
    pub result: String,
    pub inference_latency_ms: f64,
    pub total_latency_ms: f64,
    pub ok: bool,
    #[serde(default)]
    pub error: Option<String>,
}

/// Frames sent from client to server on the result channel
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientFrame {
    /// Must be the first frame after the channel opens
    Auth { api_key: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inference_result_without_error_field() {
        let json = r#"{
            "id": "r-1",
            "model_backend": "gemini",
            "model_name": "flash",
            "prompt": "count people",
            "result": "{\"count\":2}",
            "inference_latency_ms": 120.5,
            "total_latency_ms": 340.0,
            "ok": true
        }"#;

        let result: InferenceResult = serde_json::from_str(json).unwrap();
        assert!(result.ok);
        assert_eq!(result.error, None);
        assert_eq!(result.result, "{\"count\":2}");
    }

    #[test]
    fn test_auth_frame_shape() {
        let frame = ClientFrame::Auth { api_key: "secret".to_string() };
        let value = serde_json::to_value(&frame).unwrap();
        assert_eq!(value, serde_json::json!({ "type": "auth", "api_key": "secret" }));
    }

    #[test]
    fn test_create_response_lease_is_optional() {
        let json = r#"{"session_id":"s1","webrtc":{"type":"answer","sdp":"v=0"}}"#;
        let response: CreateSessionResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.session_id, "s1");
        assert_eq!(response.webrtc.kind, SdpKind::Answer);
        assert!(response.lease.is_none());
    }

    #[test]
    fn test_inference_params_omit_unset_selectors() {
        let params = InferenceParams {
            prompt: "describe".to_string(),
            backend: None,
            model: None,
            output_schema_json: None,
        };
        let value = serde_json::to_value(&params).unwrap();
        assert_eq!(value, serde_json::json!({ "prompt": "describe" }));
    }
}
