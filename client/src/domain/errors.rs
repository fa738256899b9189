use thiserror::Error;

/// Every failure the session manager can report
#[derive(Debug, Error)]
pub enum ClientError {
    /// Bad configuration or local precondition; never reaches the network
    #[error("{message}")]
    Validation { field: String, message: String },

    #[error("Not found: {0}")]
    NotFound(String),

    /// Device, file or surface acquisition failure
    #[error("Source error: {0}")]
    Source(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Server error ({status}): {message}")]
    Server { status: u16, message: String },

    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Operation invoked in the wrong lifecycle state
    #[error("Invalid state: {0}")]
    State(String),

    /// Malformed inbound result; reported but never fatal
    #[error("Failed to parse result: {0}")]
    Parse(String),

    /// Local peer connection or description failure
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Lease renewal failed: {0}")]
    LeaseRenewal(#[source] Box<ClientError>),

    #[error("Result channel {0}")]
    ChannelClosed(String),
}

impl ClientError {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Field named by a validation error
    pub fn field(&self) -> Option<&str> {
        match self {
            Self::Validation { field, .. } => Some(field),
            _ => None,
        }
    }

    /// Whether this error ends the session
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::Parse(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_message_is_reason_only() {
        let err = ClientError::validation("sampling_ratio", "sampling_ratio must be between 0 and 1");
        assert_eq!(err.to_string(), "sampling_ratio must be between 0 and 1");
        assert_eq!(err.field(), Some("sampling_ratio"));
    }

    #[test]
    fn test_lease_renewal_keeps_cause() {
        let err = ClientError::LeaseRenewal(Box::new(ClientError::Network("connection reset".into())));
        assert_eq!(err.to_string(), "Lease renewal failed: Network error: connection reset");
        assert!(err.is_fatal());
        assert!(!ClientError::Parse("bad json".into()).is_fatal());
    }
}
