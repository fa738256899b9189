//! Client-side lifecycle manager for perception stream sessions.
//!
//! A [`PerceptionSession`] acquires a video source, negotiates a WebRTC
//! session with the perception service, keeps its lease alive and delivers
//! inference results from the result channel to caller callbacks.

pub mod application;
pub mod domain;
pub mod infrastructure;

pub use application::{MediaInfo, PerceptionSession, SessionCallbacks, SessionDependencies};
pub use domain::{
    CameraFacing, ClientError, Feedback, IceServer, RelayHints, SessionConfig, SessionId, SessionState,
    SourceDescriptor, SourceKind,
};
pub use infrastructure::{default_dependencies, FfmpegSettings, Settings};
pub use shared::{InferenceResult, ProcessingParams};
