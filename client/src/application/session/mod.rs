// Session lifecycle: startup sequence, lease upkeep, result dispatch, teardown

pub mod controller;
pub mod events;
mod lease_keeper;
mod result_channel;
mod signaling;

pub use controller::{PerceptionSession, SessionDependencies};
pub use events::{ErrorCallback, ResultCallback, SessionCallbacks};
