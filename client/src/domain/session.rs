use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::errors::ClientError;

/// Lifecycle of a perception session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    Idle,
    Starting,
    Active,
    Stopping,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Starting => write!(f, "starting"),
            Self::Active => write!(f, "active"),
            Self::Stopping => write!(f, "stopping"),
        }
    }
}

/// Session identifier assigned by the remote endpoint
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct SessionId(String);

impl SessionId {
    pub fn from_string(id: String) -> Self {
        Self(id)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Server-side keepalive grant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lease {
    pub ttl_seconds: u64,
    pub renewed_at: DateTime<Utc>,
}

impl Lease {
    pub fn granted(ttl_seconds: u64) -> Self {
        Self {
            ttl_seconds,
            renewed_at: Utc::now(),
        }
    }

    /// Renewal is due once half the ttl has elapsed
    pub fn renewal_interval(&self) -> Duration {
        Duration::from_secs(self.ttl_seconds) / 2
    }

    pub fn renew(&mut self, ttl_seconds: u64) {
        self.ttl_seconds = ttl_seconds;
        self.renewed_at = Utc::now();
    }
}

/// User feedback about a session's results
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feedback {
    pub rating: u8,
    pub category: String,
    pub feedback: String,
}

impl Feedback {
    pub fn new(rating: u8, category: impl Into<String>, feedback: impl Into<String>) -> Self {
        Self {
            rating,
            category: category.into(),
            feedback: feedback.into(),
        }
    }

    pub fn validate(&self) -> Result<(), ClientError> {
        if !(1..=5).contains(&self.rating) {
            return Err(ClientError::validation("rating", "rating must be between 1 and 5"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_renewal_interval_is_half_ttl() {
        assert_eq!(Lease::granted(300).renewal_interval(), Duration::from_secs(150));
        assert_eq!(Lease::granted(1).renewal_interval(), Duration::from_millis(500));
    }

    #[test]
    fn test_lease_renew_updates_timestamp() {
        let mut lease = Lease::granted(60);
        let first = lease.renewed_at;
        lease.renew(120);
        assert_eq!(lease.ttl_seconds, 120);
        assert!(lease.renewed_at >= first);
    }

    #[test]
    fn test_feedback_rating_bounds() {
        assert!(Feedback::new(1, "accuracy", "fine").validate().is_ok());
        assert!(Feedback::new(5, "accuracy", "great").validate().is_ok());
        assert_eq!(
            Feedback::new(0, "accuracy", "").validate().unwrap_err().to_string(),
            "rating must be between 1 and 5"
        );
        assert!(Feedback::new(6, "latency", "").validate().is_err());
    }
}
