use shared::InferenceResult;
use std::sync::Arc;

use crate::domain::ClientError;

pub type ResultCallback = Arc<dyn Fn(InferenceResult) + Send + Sync>;
pub type ErrorCallback = Arc<dyn Fn(ClientError) + Send + Sync>;

/// Caller hooks supplied at construction
#[derive(Clone)]
pub struct SessionCallbacks {
    pub on_result: ResultCallback,
    pub on_error: ErrorCallback,
}

impl SessionCallbacks {
    pub fn new(
        on_result: impl Fn(InferenceResult) + Send + Sync + 'static,
        on_error: impl Fn(ClientError) + Send + Sync + 'static,
    ) -> Self {
        Self {
            on_result: Arc::new(on_result),
            on_error: Arc::new(on_error),
        }
    }
}

/// Messages posted by the lease keeper and channel reader to the controller
#[derive(Debug)]
pub(crate) enum SessionEvent {
    Result(InferenceResult),
    /// Reported to the caller; the session keeps running
    Error(ClientError),
    /// Tears the session down
    Fatal(ClientError),
}
