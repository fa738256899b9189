// Application layer - session lifecycle orchestration
// Depends on the domain layer and talks to the outside world through ports

pub mod media;
pub mod ports;
pub mod session;

pub use media::{EncodedFrame, FrameSurface, MediaHandle, MediaInfo, MediaTrack};
pub use session::{PerceptionSession, SessionCallbacks, SessionDependencies};
