// Domain layer - session configuration, lifecycle values, error taxonomy
// No dependencies on other layers

pub mod config;
pub mod errors;
pub mod session;

pub use config::*;
pub use errors::ClientError;
pub use session::*;
