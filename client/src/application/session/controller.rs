use std::sync::{Arc, Weak};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::{Mutex, Notify};
use tracing::{debug, error, info, warn};

use super::events::{SessionCallbacks, SessionEvent};
use super::lease_keeper::LeaseKeeper;
use super::result_channel::ChannelReader;
use super::signaling;
use crate::application::media::{FrameSurface, MediaHandle, MediaInfo};
use crate::application::ports::{MediaSourceAcquirer, MediaTransport, ResultChannelConnector, SessionApi, TransportFactory};
use crate::domain::config::validate_prompt;
use crate::domain::{ClientError, Feedback, SessionConfig, SessionId, SessionState, SourceKind};

/// Adapters the controller drives
#[derive(Clone)]
pub struct SessionDependencies {
    pub api: Arc<dyn SessionApi>,
    pub channels: Arc<dyn ResultChannelConnector>,
    pub transports: Arc<dyn TransportFactory>,
    pub sources: Arc<dyn MediaSourceAcquirer>,
}

/// Everything a live session holds; only touched under the slot lock
struct SessionSlot {
    state: SessionState,
    generation: u64,
    stop_requested: bool,
    /// Kept after teardown so feedback can still reference the session
    session_id: Option<SessionId>,
    media: Option<MediaHandle>,
    transport: Option<Arc<dyn MediaTransport>>,
    lease_keeper: Option<LeaseKeeper>,
    channel: Option<ChannelReader>,
}

impl SessionSlot {
    fn new() -> Self {
        Self {
            state: SessionState::Idle,
            generation: 0,
            stop_requested: false,
            session_id: None,
            media: None,
            transport: None,
            lease_keeper: None,
            channel: None,
        }
    }

    fn holds_resources(&self) -> bool {
        self.media.is_some() || self.transport.is_some() || self.lease_keeper.is_some() || self.channel.is_some()
    }

    /// Release every held resource exactly once, ending in Idle.
    ///
    /// Order: timer, channel, transport, media tracks, render surface.
    async fn teardown(&mut self) {
        self.state = SessionState::Stopping;

        if let Some(keeper) = self.lease_keeper.take() {
            keeper.cancel().await;
        }
        if let Some(channel) = self.channel.take() {
            channel.close().await;
        }
        if let Some(transport) = self.transport.take() {
            if let Err(e) = transport.close().await {
                warn!("Error closing media transport: {}", e);
            }
        }
        if let Some(media) = self.media.take() {
            media.stop().await;
        }

        self.stop_requested = false;
        self.state = SessionState::Idle;
    }
}

struct Inner {
    config: SessionConfig,
    deps: SessionDependencies,
    callbacks: SessionCallbacks,
    slot: Mutex<SessionSlot>,
    /// Signalled whenever a start attempt settles (Active or torn down)
    startup_settled: Notify,
}

/// Client-side manager for one perception stream session at a time.
///
/// Cloning yields another handle to the same session.
#[derive(Clone)]
pub struct PerceptionSession {
    inner: Arc<Inner>,
}

impl PerceptionSession {
    pub fn new(config: SessionConfig, deps: SessionDependencies, callbacks: SessionCallbacks) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                deps,
                callbacks,
                slot: Mutex::new(SessionSlot::new()),
                startup_settled: Notify::new(),
            }),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    /// Acquire the source, negotiate, arm the lease and open the result channel.
    ///
    /// Configuration errors are returned before anything is acquired. Any
    /// later failure tears down whatever was acquired so far.
    pub async fn start(&self) -> Result<(), ClientError> {
        let generation = {
            let mut slot = self.inner.slot.lock().await;
            if slot.state != SessionState::Idle {
                return Err(ClientError::State(format!(
                    "cannot start: session is already {}",
                    slot.state
                )));
            }
            self.inner.config.validate()?;

            slot.generation += 1;
            slot.state = SessionState::Starting;
            slot.stop_requested = false;
            slot.session_id = None;
            slot.generation
        };

        info!("Starting perception session (attempt {})", generation);
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let outcome = self.inner.run_startup(events_tx).await;
        if let Err(err) = outcome {
            error!("Session startup failed: {}", err);
            self.inner.slot.lock().await.teardown().await;
            self.inner.startup_settled.notify_waiters();
            return Err(err);
        }

        tokio::spawn(pump_events(Arc::downgrade(&self.inner), generation, events_rx));
        self.inner.startup_settled.notify_waiters();
        info!("Perception session active");
        Ok(())
    }

    /// Tear the session down. Safe to call any number of times.
    ///
    /// During startup the request is recorded; the in-flight step finishes,
    /// startup releases what it acquired, and this call returns after that.
    pub async fn stop(&self) {
        let mut slot = self.inner.slot.lock().await;
        match slot.state {
            SessionState::Starting => {
                info!("Stop requested during startup; waiting for the current step to finish");
                slot.stop_requested = true;
                let settled = self.inner.startup_settled.notified();
                drop(slot);
                settled.await;
            }
            SessionState::Idle if !slot.holds_resources() => {
                debug!("stop() on idle session; nothing to release");
            }
            _ => {
                info!("Stopping perception session");
                slot.teardown().await;
                info!("Perception session stopped");
            }
        }
    }

    /// Replace the prompt of the running session
    pub async fn update_prompt(&self, prompt: &str) -> Result<(), ClientError> {
        let session_id = {
            let slot = self.inner.slot.lock().await;
            if slot.state != SessionState::Active {
                return Err(ClientError::State(format!(
                    "update_prompt requires an active session (session is {})",
                    slot.state
                )));
            }
            validate_prompt(prompt)?;
            slot.session_id
                .clone()
                .ok_or_else(|| ClientError::State("active session has no id".to_string()))?
        };

        self.inner.deps.api.update_prompt(&session_id, prompt).await?;
        info!("Prompt updated for session {}", session_id);
        Ok(())
    }

    /// Send feedback for the current or most recent session
    pub async fn submit_feedback(&self, feedback: &Feedback) -> Result<(), ClientError> {
        feedback.validate()?;
        let session_id = self
            .inner
            .slot
            .lock()
            .await
            .session_id
            .clone()
            .ok_or_else(|| ClientError::State("no session has been created yet".to_string()))?;

        self.inner.deps.api.submit_feedback(&session_id, feedback).await?;
        debug!("Feedback submitted for session {}", session_id);
        Ok(())
    }

    /// Draw an encoded image (PNG, JPEG, ...) onto a push-stream source
    pub async fn push_frame(&self, bytes: Vec<u8>) -> Result<(), ClientError> {
        let surface = {
            let slot = self.inner.slot.lock().await;
            if slot.state != SessionState::Active {
                return Err(ClientError::State(format!(
                    "no active session: push_frame requires an active session (session is {})",
                    slot.state
                )));
            }
            let media = slot
                .media
                .as_ref()
                .ok_or_else(|| ClientError::State("active session has no media source".to_string()))?;
            let kind = media.info().kind;
            if kind != SourceKind::PushStream {
                return Err(ClientError::State(format!(
                    "push_frame requires a push-stream source, but the active source is a {}",
                    kind
                )));
            }
            media
                .surface()
                .ok_or_else(|| ClientError::State("push-stream source has no render surface".to_string()))?
        };

        if !surface.draw(bytes).await? {
            debug!("Pushed frame superseded by a newer one");
        }
        Ok(())
    }

    pub async fn session_id(&self) -> Option<SessionId> {
        self.inner.slot.lock().await.session_id.clone()
    }

    pub async fn media_info(&self) -> Option<MediaInfo> {
        self.inner
            .slot
            .lock()
            .await
            .media
            .as_ref()
            .map(|media| media.info().clone())
    }

    /// Render surface of a live push-stream source
    pub async fn surface(&self) -> Option<Arc<FrameSurface>> {
        self.inner.slot.lock().await.media.as_ref().and_then(|media| media.surface())
    }

    pub async fn is_active(&self) -> bool {
        self.state().await == SessionState::Active
    }

    pub async fn state(&self) -> SessionState {
        self.inner.slot.lock().await.state
    }
}

impl Inner {
    /// Store a freshly acquired resource, then honour a stop that raced startup
    async fn stash(&self, store: impl FnOnce(&mut SessionSlot)) -> Result<(), ClientError> {
        let mut slot = self.slot.lock().await;
        store(&mut slot);
        if slot.stop_requested {
            return Err(ClientError::State("session was stopped while starting".to_string()));
        }
        Ok(())
    }

    async fn run_startup(&self, events: UnboundedSender<SessionEvent>) -> Result<(), ClientError> {
        let config = &self.config;

        let mut media = self.deps.sources.acquire(&config.source).await?;
        let track = media.take_primary_track();
        debug!("Acquired {} source", media.info().kind);
        self.stash(|slot| slot.media = Some(media)).await?;
        let track = track.ok_or_else(|| ClientError::Source("no video tracks".to_string()))?;

        let transport = self.deps.transports.connect(track, &config.relay).await?;
        self.stash(|slot| slot.transport = Some(transport.clone())).await?;

        let negotiated = signaling::negotiate(transport.as_ref(), self.deps.api.as_ref(), config).await?;
        let session_id = negotiated.session_id.clone();
        self.stash(|slot| slot.session_id = Some(session_id.clone())).await?;

        match negotiated.lease {
            Some(lease) => {
                let keeper = LeaseKeeper::arm(session_id.clone(), lease, self.deps.api.clone(), events.clone())?;
                debug!("Keepalive every {:?}", keeper.interval());
                self.stash(|slot| slot.lease_keeper = Some(keeper)).await?;
            }
            None => debug!("No lease granted; keepalive timer not armed"),
        }

        let channel = self.deps.channels.open(&session_id, &config.api_key).await?;
        let reader = ChannelReader::spawn(channel, events);

        let mut slot = self.slot.lock().await;
        slot.channel = Some(reader);
        if slot.stop_requested {
            return Err(ClientError::State("session was stopped while starting".to_string()));
        }
        slot.state = SessionState::Active;
        Ok(())
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        let slot = self.slot.get_mut();
        if !slot.holds_resources() {
            return;
        }
        let mut orphaned = std::mem::replace(slot, SessionSlot::new());
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                warn!("Last session handle dropped without stop(); releasing resources");
                handle.spawn(async move {
                    orphaned.teardown().await;
                });
            }
            Err(_) => {
                // Keeper and reader abort their tasks on drop; the transport is left to its own Drop
                warn!("Last session handle dropped outside a runtime; transport not closed");
            }
        }
    }
}

/// Dispatch queued events for one session generation until its producers are gone
async fn pump_events(inner: Weak<Inner>, generation: u64, mut events: UnboundedReceiver<SessionEvent>) {
    while let Some(event) = events.recv().await {
        let Some(inner) = inner.upgrade() else {
            break;
        };

        match event {
            SessionEvent::Result(result) => {
                if is_current(&inner, generation).await {
                    (inner.callbacks.on_result)(result);
                }
            }
            SessionEvent::Error(err) => {
                if is_current(&inner, generation).await {
                    warn!("Non-fatal session error: {}", err);
                    (inner.callbacks.on_error)(err);
                }
            }
            SessionEvent::Fatal(err) => {
                {
                    let mut slot = inner.slot.lock().await;
                    if slot.generation != generation || slot.state != SessionState::Active {
                        debug!("Ignoring fatal error from a finished session: {}", err);
                        continue;
                    }
                    error!("Fatal session error, tearing down: {}", err);
                    slot.teardown().await;
                }
                (inner.callbacks.on_error)(err);
                break;
            }
        }
    }
    debug!("Event pump for attempt {} finished", generation);
}

async fn is_current(inner: &Inner, generation: u64) -> bool {
    let slot = inner.slot.lock().await;
    slot.generation == generation && slot.state == SessionState::Active
}
