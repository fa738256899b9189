use config::{Config, Environment};
use serde::Deserialize;
use shared::ProcessingParams;
use std::path::PathBuf;
use std::time::Duration;

use super::driven::FfmpegSettings;
use crate::domain::{CameraFacing, ClientError, IceServer, RelayHints, SessionConfig, SourceDescriptor};

const ENV_PREFIX: &str = "PERCEPTION";

/// `PERCEPTION_*` variables as read from the environment
#[derive(Debug, Deserialize)]
struct RawSettings {
    #[serde(default)]
    endpoint: String,
    #[serde(default)]
    api_key: String,
    #[serde(default)]
    prompt: String,
    backend: Option<String>,
    model: Option<String>,
    output_schema: Option<String>,

    source: String,
    camera_facing: String,
    video_path: Option<PathBuf>,
    push_width: Option<u32>,
    push_height: Option<u32>,
    push_fps: Option<u32>,

    sampling_ratio: f64,
    fps: u32,
    clip_length_seconds: f64,
    delay_seconds: f64,

    /// Comma separated STUN/TURN URLs
    ice_servers: Option<String>,
    turn_username: Option<String>,
    turn_credential: Option<String>,
    relay_only: bool,

    ffmpeg_binary: String,
    ffmpeg_bitrate: String,
    camera_format: String,
    camera_user_device: String,
    camera_environment_device: String,
    startup_timeout_secs: u64,
}

/// Everything the CLI needs to run one session
#[derive(Debug, Clone)]
pub struct Settings {
    pub session: SessionConfig,
    pub ffmpeg: FfmpegSettings,
}

fn settings_error(err: config::ConfigError) -> ClientError {
    ClientError::validation("settings", format!("invalid settings: {}", err))
}

impl Settings {
    /// Read `PERCEPTION_*` variables; call `dotenvy::dotenv()` first to honour a `.env`
    pub fn from_env() -> Result<Self, ClientError> {
        Self::load(Environment::with_prefix(ENV_PREFIX).try_parsing(true))
    }

    fn load(source: Environment) -> Result<Self, ClientError> {
        let builder = Self::defaults()
            .map_err(settings_error)?
            .add_source(source);
        Self::from_config(builder.build().map_err(settings_error)?)
    }

    fn defaults() -> Result<config::ConfigBuilder<config::builder::DefaultState>, config::ConfigError> {
        let processing = ProcessingParams::default();
        let ffmpeg = FfmpegSettings::default();
        Config::builder()
            .set_default("source", "camera")?
            .set_default("camera_facing", "user")?
            .set_default("sampling_ratio", processing.sampling_ratio)?
            .set_default("fps", processing.fps as i64)?
            .set_default("clip_length_seconds", processing.clip_length_seconds)?
            .set_default("delay_seconds", processing.delay_seconds)?
            .set_default("relay_only", false)?
            .set_default("ffmpeg_binary", ffmpeg.binary)?
            .set_default("ffmpeg_bitrate", ffmpeg.bitrate)?
            .set_default("camera_format", ffmpeg.camera_format)?
            .set_default("camera_user_device", ffmpeg.user_camera)?
            .set_default("camera_environment_device", ffmpeg.environment_camera)?
            .set_default("startup_timeout_secs", ffmpeg.startup_timeout.as_secs() as i64)
    }

    fn from_config(config: Config) -> Result<Self, ClientError> {
        let raw: RawSettings = config.try_deserialize().map_err(settings_error)?;
        raw.try_into()
    }
}

impl TryFrom<RawSettings> for Settings {
    type Error = ClientError;

    fn try_from(raw: RawSettings) -> Result<Self, Self::Error> {
        let source = match raw.source.trim().to_ascii_lowercase().as_str() {
            "camera" => SourceDescriptor::camera(raw.camera_facing.parse::<CameraFacing>()?),
            "video_file" | "file" => {
                let path = raw
                    .video_path
                    .ok_or_else(|| ClientError::validation("video_file.path", "video_path is required for a video_file source"))?;
                SourceDescriptor::video_file(path)
            }
            "push_stream" | "push" => SourceDescriptor::PushStream {
                width: raw.push_width,
                height: raw.push_height,
                target_fps: raw.push_fps,
            },
            other => {
                return Err(ClientError::validation(
                    "source",
                    format!("unknown source '{}' (expected camera, video_file or push_stream)", other),
                ))
            }
        };

        let output_schema = raw
            .output_schema
            .filter(|schema| !schema.trim().is_empty())
            .map(|schema| serde_json::from_str(&schema))
            .transpose()
            .map_err(|e| ClientError::validation("output_schema", format!("output_schema is not valid JSON: {}", e)))?;

        let ice_servers = raw
            .ice_servers
            .iter()
            .flat_map(|urls| urls.split(','))
            .map(str::trim)
            .filter(|url| !url.is_empty())
            .map(|url| {
                let is_turn = url.starts_with("turn:") || url.starts_with("turns:");
                IceServer {
                    urls: vec![url.to_string()],
                    username: raw.turn_username.clone().filter(|_| is_turn),
                    credential: raw.turn_credential.clone().filter(|_| is_turn),
                }
            })
            .collect();

        let session = SessionConfig {
            endpoint: raw.endpoint,
            api_key: raw.api_key,
            prompt: raw.prompt,
            backend: raw.backend,
            model: raw.model,
            output_schema,
            source,
            processing: ProcessingParams {
                sampling_ratio: raw.sampling_ratio,
                fps: raw.fps,
                clip_length_seconds: raw.clip_length_seconds,
                delay_seconds: raw.delay_seconds,
            },
            relay: RelayHints {
                ice_servers,
                relay_only: raw.relay_only,
            },
        };

        let ffmpeg = FfmpegSettings {
            binary: raw.ffmpeg_binary,
            bitrate: raw.ffmpeg_bitrate,
            camera_format: raw.camera_format,
            user_camera: raw.camera_user_device,
            environment_camera: raw.camera_environment_device,
            startup_timeout: Duration::from_secs(raw.startup_timeout_secs),
        };

        Ok(Self { session, ffmpeg })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<Settings, ClientError> {
        let env: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (format!("{}_{}", ENV_PREFIX, k), v.to_string()))
            .collect();
        Settings::load(
            Environment::with_prefix(ENV_PREFIX)
                .try_parsing(true)
                .source(Some(env)),
        )
    }

    #[test]
    fn test_defaults_fill_processing_and_ffmpeg() {
        let settings = load(&[
            ("ENDPOINT", "https://api.example.com"),
            ("API_KEY", "k"),
            ("PROMPT", "What is happening?"),
        ])
        .unwrap();

        assert_eq!(settings.session.processing, ProcessingParams::default());
        assert_eq!(settings.session.source, SourceDescriptor::camera(CameraFacing::User));
        assert_eq!(settings.ffmpeg, FfmpegSettings::default());
        settings.session.validate().unwrap();
    }

    #[test]
    fn test_push_stream_with_overrides() {
        let settings = load(&[
            ("ENDPOINT", "https://api.example.com"),
            ("API_KEY", "k"),
            ("PROMPT", "p"),
            ("SOURCE", "push_stream"),
            ("PUSH_WIDTH", "640"),
            ("PUSH_HEIGHT", "360"),
            ("FPS", "15"),
            ("SAMPLING_RATIO", "0.5"),
        ])
        .unwrap();

        assert_eq!(
            settings.session.source,
            SourceDescriptor::PushStream {
                width: Some(640),
                height: Some(360),
                target_fps: None
            }
        );
        assert_eq!(settings.session.processing.fps, 15);
        assert_eq!(settings.session.processing.sampling_ratio, 0.5);
    }

    #[test]
    fn test_video_file_needs_a_path() {
        let err = load(&[("SOURCE", "video_file")]).unwrap_err();
        assert_eq!(err.field(), Some("video_file.path"));
    }

    #[test]
    fn test_unknown_source_and_facing() {
        assert_eq!(load(&[("SOURCE", "screen")]).unwrap_err().field(), Some("source"));
        assert_eq!(load(&[("CAMERA_FACING", "sideways")]).unwrap_err().field(), Some("camera.facing"));
    }

    #[test]
    fn test_turn_credentials_only_apply_to_turn_urls() {
        let settings = load(&[
            ("ICE_SERVERS", "stun:stun.example.com:3478, turn:turn.example.com:3478"),
            ("TURN_USERNAME", "user"),
            ("TURN_CREDENTIAL", "pass"),
            ("RELAY_ONLY", "true"),
        ])
        .unwrap();

        let relay = settings.session.relay;
        assert!(relay.relay_only);
        assert_eq!(relay.ice_servers.len(), 2);
        assert_eq!(relay.ice_servers[0].username, None);
        assert_eq!(relay.ice_servers[1].username.as_deref(), Some("user"));
    }

    #[test]
    fn test_bad_output_schema() {
        let err = load(&[("OUTPUT_SCHEMA", "{not json")]).unwrap_err();
        assert_eq!(err.field(), Some("output_schema"));
    }
}
