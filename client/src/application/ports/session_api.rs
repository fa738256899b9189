use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use shared::{CreateSessionRequest, CreateSessionResponse, LeaseRenewal};

use crate::domain::{ClientError, Feedback, SessionId};

/// Request/response calls against the perception service REST API
#[cfg_attr(test, automock)]
#[async_trait]
pub trait SessionApi: Send + Sync {
    async fn create_session(&self, request: CreateSessionRequest) -> Result<CreateSessionResponse, ClientError>;
    async fn renew_lease(&self, session_id: &SessionId) -> Result<LeaseRenewal, ClientError>;
    async fn update_prompt(&self, session_id: &SessionId, prompt: &str) -> Result<(), ClientError>;
    async fn submit_feedback(&self, session_id: &SessionId, feedback: &Feedback) -> Result<(), ClientError>;
}
