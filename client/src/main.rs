use anyhow::{anyhow, Context, Result};
use perception_client::{default_dependencies, PerceptionSession, SessionCallbacks, Settings};
use tokio::sync::mpsc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env is fine; variables may come from the environment
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let settings = Settings::from_env().context("failed to load PERCEPTION_* settings")?;
    let deps = default_dependencies(&settings.session, settings.ffmpeg.clone())
        .context("failed to set up adapters")?;

    let (fatal_tx, mut fatal_rx) = mpsc::unbounded_channel();
    let callbacks = SessionCallbacks::new(
        |result| match serde_json::to_string(&result) {
            Ok(line) => println!("{}", line),
            Err(e) => error!("Failed to print result {}: {}", result.id, e),
        },
        move |err| {
            error!("Session error: {}", err);
            if err.is_fatal() {
                let _ = fatal_tx.send(err);
            }
        },
    );

    let session = PerceptionSession::new(settings.session, deps, callbacks);
    session.start().await.context("failed to start perception session")?;
    if let Some(id) = session.session_id().await {
        info!("Streaming as session {}; press Ctrl-C to stop", id);
    }

    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal.context("failed to listen for Ctrl-C")?;
            info!("Shutting down");
            session.stop().await;
            Ok(())
        }
        Some(err) = fatal_rx.recv() => {
            // The session has already torn itself down
            Err(anyhow!(err).context("perception session ended"))
        }
    }
}
