use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use shared::{CreateSessionRequest, CreateSessionResponse, ErrorBody, FeedbackRequest, LeaseRenewal, UpdatePromptRequest};
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

use crate::application::ports::SessionApi;
use crate::domain::{ClientError, Feedback, SessionId};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// REST client for the perception service
pub struct HttpSessionApi {
    base: Url,
    api_key: String,
    client: Client,
}

impl HttpSessionApi {
    pub fn new(endpoint: &str, api_key: impl Into<String>) -> Result<Self, ClientError> {
        let base = parse_endpoint(endpoint)?;
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| ClientError::Network(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            base,
            api_key: api_key.into(),
            client,
        })
    }

    /// `{endpoint}/{segments...}`, keeping any path prefix of the endpoint
    fn url(&self, segments: &[&str]) -> Result<Url, ClientError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| ClientError::validation("endpoint", "endpoint cannot be a base URL"))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, ClientError> {
        let response = request
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|e| ClientError::Network(e.to_string()))?;

        if response.status().is_success() {
            return Ok(response);
        }
        Err(error_from_response(response).await)
    }
}

pub(crate) fn parse_endpoint(endpoint: &str) -> Result<Url, ClientError> {
    let url = Url::parse(endpoint.trim())
        .map_err(|e| ClientError::validation("endpoint", format!("endpoint is not a valid URL: {}", e)))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(ClientError::validation(
            "endpoint",
            format!("endpoint must use http or https, got {}", other),
        )),
    }
}

async fn error_from_response(response: Response) -> ClientError {
    let status = response.status();
    let text = response.text().await.unwrap_or_default();
    let reason = serde_json::from_str::<ErrorBody>(&text)
        .ok()
        .and_then(|body| body.reason().map(str::to_string))
        .unwrap_or_else(|| {
            if text.trim().is_empty() {
                status.canonical_reason().unwrap_or("request failed").to_string()
            } else {
                text.trim().to_string()
            }
        });
    warn!("Perception service returned {}: {}", status, reason);
    status_error(status, reason)
}

fn status_error(status: StatusCode, reason: String) -> ClientError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ClientError::Authentication(reason),
        StatusCode::NOT_FOUND => ClientError::NotFound(reason),
        s if s.is_client_error() => ClientError::validation("request", reason),
        s => ClientError::Server {
            status: s.as_u16(),
            message: reason,
        },
    }
}

async fn json_body<T: DeserializeOwned>(response: Response) -> Result<T, ClientError> {
    response
        .json::<T>()
        .await
        .map_err(|e| ClientError::Parse(format!("unexpected response body: {}", e)))
}

#[async_trait]
impl SessionApi for HttpSessionApi {
    async fn create_session(&self, request: CreateSessionRequest) -> Result<CreateSessionResponse, ClientError> {
        let url = self.url(&["streams"])?;
        info!("Creating stream session at {}", url);
        let response = self.send(self.client.post(url).json(&request)).await?;
        let created: CreateSessionResponse = json_body(response).await?;
        debug!("Session {} created", created.session_id);
        Ok(created)
    }

    async fn renew_lease(&self, session_id: &SessionId) -> Result<LeaseRenewal, ClientError> {
        let url = self.url(&["streams", session_id.as_str(), "keepalive"])?;
        let response = self.send(self.client.post(url)).await?;
        json_body(response).await
    }

    async fn update_prompt(&self, session_id: &SessionId, prompt: &str) -> Result<(), ClientError> {
        let url = self.url(&["streams", session_id.as_str(), "config", "prompt"])?;
        let body = UpdatePromptRequest {
            prompt: prompt.to_string(),
        };
        self.send(self.client.patch(url).json(&body)).await?;
        Ok(())
    }

    async fn submit_feedback(&self, session_id: &SessionId, feedback: &Feedback) -> Result<(), ClientError> {
        let url = self.url(&["streams", session_id.as_str(), "feedback"])?;
        let body = FeedbackRequest {
            rating: feedback.rating,
            category: feedback.category.clone(),
            feedback: feedback.feedback.clone(),
        };
        self.send(self.client.post(url).json(&body)).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_urls_keep_endpoint_prefix() {
        let api = HttpSessionApi::new("https://api.example.com/v1/", "k").unwrap();
        let url = api.url(&["streams", "abc", "keepalive"]).unwrap();
        assert_eq!(url.as_str(), "https://api.example.com/v1/streams/abc/keepalive");

        let api = HttpSessionApi::new("http://localhost:8080", "k").unwrap();
        assert_eq!(api.url(&["streams"]).unwrap().as_str(), "http://localhost:8080/streams");
    }

    #[test]
    fn test_session_id_is_escaped_as_one_segment() {
        let api = HttpSessionApi::new("https://api.example.com", "k").unwrap();
        let url = api.url(&["streams", "a/b", "feedback"]).unwrap();
        assert_eq!(url.as_str(), "https://api.example.com/streams/a%2Fb/feedback");
    }

    #[test]
    fn test_rejects_non_http_endpoint() {
        let err = HttpSessionApi::new("ftp://example.com", "k").err().unwrap();
        assert_eq!(err.field(), Some("endpoint"));
    }

    #[test]
    fn test_status_mapping() {
        assert!(matches!(
            status_error(StatusCode::UNAUTHORIZED, "bad key".into()),
            ClientError::Authentication(_)
        ));
        assert!(matches!(
            status_error(StatusCode::FORBIDDEN, "nope".into()),
            ClientError::Authentication(_)
        ));
        assert!(matches!(
            status_error(StatusCode::NOT_FOUND, "gone".into()),
            ClientError::NotFound(_)
        ));
        let err = status_error(StatusCode::UNPROCESSABLE_ENTITY, "prompt too long".into());
        assert_eq!(err.to_string(), "prompt too long");
        match status_error(StatusCode::BAD_GATEWAY, "upstream".into()) {
            ClientError::Server { status, message } => {
                assert_eq!(status, 502);
                assert_eq!(message, "upstream");
            }
            other => panic!("unexpected: {:?}", other),
        }
    }
}
