use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub use shared::ProcessingParams;

use super::errors::ClientError;

pub const DEFAULT_PUSH_WIDTH: u32 = 1280;
pub const DEFAULT_PUSH_HEIGHT: u32 = 720;
pub const DEFAULT_PUSH_FPS: u32 = 30;

const FPS_RANGE: (f64, f64) = (1.0, 120.0);
const SAMPLING_RATIO_RANGE: (f64, f64) = (0.0, 1.0);
const CLIP_LENGTH_RANGE: (f64, f64) = (0.1, 60.0);
const DELAY_RANGE: (f64, f64) = (0.0, 60.0);
const PUSH_DIMENSION_RANGE: (f64, f64) = (1.0, 4096.0);

/// Immutable session configuration, injected at construction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// REST base URL of the perception service
    pub endpoint: String,
    pub api_key: String,
    pub prompt: String,
    #[serde(default)]
    pub backend: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    /// JSON schema the backend should shape each result into
    #[serde(default)]
    pub output_schema: Option<serde_json::Value>,
    pub source: SourceDescriptor,
    #[serde(default)]
    pub processing: ProcessingParams,
    #[serde(default)]
    pub relay: RelayHints,
}

impl SessionConfig {
    pub fn new(
        endpoint: impl Into<String>,
        api_key: impl Into<String>,
        prompt: impl Into<String>,
        source: SourceDescriptor,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            api_key: api_key.into(),
            prompt: prompt.into(),
            backend: None,
            model: None,
            output_schema: None,
            source,
            processing: ProcessingParams::default(),
            relay: RelayHints::default(),
        }
    }

    pub fn with_processing(mut self, processing: ProcessingParams) -> Self {
        self.processing = processing;
        self
    }

    pub fn with_backend(mut self, backend: impl Into<String>) -> Self {
        self.backend = Some(backend.into());
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_output_schema(mut self, schema: serde_json::Value) -> Self {
        self.output_schema = Some(schema);
        self
    }

    pub fn with_relay(mut self, relay: RelayHints) -> Self {
        self.relay = relay;
        self
    }

    /// Check every field against its constraints, reporting the first violation.
    ///
    /// Runs before any device, file stream or network resource is touched.
    pub fn validate(&self) -> Result<(), ClientError> {
        if self.endpoint.trim().is_empty() {
            return Err(ClientError::validation("endpoint", "endpoint is required"));
        }
        match url::Url::parse(&self.endpoint) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => {}
            _ => {
                return Err(ClientError::validation(
                    "endpoint",
                    "endpoint must be an http or https URL",
                ))
            }
        }
        if self.api_key.trim().is_empty() {
            return Err(ClientError::validation("api_key", "api_key is required"));
        }
        validate_prompt(&self.prompt)?;
        self.source.validate()?;

        let p = &self.processing;
        check_range("sampling_ratio", p.sampling_ratio, SAMPLING_RATIO_RANGE)?;
        check_range("fps", p.fps as f64, FPS_RANGE)?;
        check_range("clip_length_seconds", p.clip_length_seconds, CLIP_LENGTH_RANGE)?;
        check_range("delay_seconds", p.delay_seconds, DELAY_RANGE)?;
        Ok(())
    }
}

pub(crate) fn validate_prompt(prompt: &str) -> Result<(), ClientError> {
    if prompt.trim().is_empty() {
        return Err(ClientError::validation("prompt", "prompt cannot be empty"));
    }
    Ok(())
}

fn check_range(field: &str, value: f64, (lo, hi): (f64, f64)) -> Result<(), ClientError> {
    // NaN fails the containment check as well
    if !(lo..=hi).contains(&value) {
        return Err(ClientError::validation(
            field,
            format!("{} must be between {} and {}", field, lo, hi),
        ));
    }
    Ok(())
}

/// Which camera to open
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CameraFacing {
    User,
    Environment,
}

impl std::str::FromStr for CameraFacing {
    type Err = ClientError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Self::User),
            "environment" => Ok(Self::Environment),
            other => Err(ClientError::validation(
                "camera.facing",
                format!("camera facing must be 'user' or 'environment', got '{}'", other),
            )),
        }
    }
}

/// Where the video comes from; exactly one variant per session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SourceDescriptor {
    Camera {
        facing: CameraFacing,
    },
    VideoFile {
        path: PathBuf,
    },
    PushStream {
        #[serde(default)]
        width: Option<u32>,
        #[serde(default)]
        height: Option<u32>,
        #[serde(default)]
        target_fps: Option<u32>,
    },
}

impl SourceDescriptor {
    pub fn camera(facing: CameraFacing) -> Self {
        Self::Camera { facing }
    }

    pub fn video_file(path: impl Into<PathBuf>) -> Self {
        Self::VideoFile { path: path.into() }
    }

    /// Push stream with default 1280x720 @ 30 fps
    pub fn push_stream() -> Self {
        Self::PushStream {
            width: None,
            height: None,
            target_fps: None,
        }
    }

    pub fn kind(&self) -> SourceKind {
        match self {
            Self::Camera { .. } => SourceKind::Camera,
            Self::VideoFile { .. } => SourceKind::VideoFile,
            Self::PushStream { .. } => SourceKind::PushStream,
        }
    }

    pub fn validate(&self) -> Result<(), ClientError> {
        match self {
            // Facing is closed by the type; string input is checked by FromStr
            Self::Camera { .. } => Ok(()),
            Self::VideoFile { path } => {
                if !path.is_file() {
                    return Err(ClientError::validation(
                        "video_file.path",
                        format!("video file '{}' does not exist or is not a file", path.display()),
                    ));
                }
                Ok(())
            }
            Self::PushStream {
                width,
                height,
                target_fps,
            } => {
                if let Some(width) = width {
                    check_range("push_stream.width", *width as f64, PUSH_DIMENSION_RANGE)?;
                }
                if let Some(height) = height {
                    check_range("push_stream.height", *height as f64, PUSH_DIMENSION_RANGE)?;
                }
                if let Some(fps) = target_fps {
                    check_range("push_stream.target_fps", *fps as f64, FPS_RANGE)?;
                }
                Ok(())
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Camera,
    VideoFile,
    PushStream,
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Camera => write!(f, "camera"),
            Self::VideoFile => write!(f, "video file"),
            Self::PushStream => write!(f, "push stream"),
        }
    }
}

/// STUN/TURN hints for the media transport
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RelayHints {
    #[serde(default)]
    pub ice_servers: Vec<IceServer>,
    /// Force traffic through TURN relays only
    #[serde(default)]
    pub relay_only: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IceServer {
    pub urls: Vec<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub credential: Option<String>,
}
