use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::events::SessionEvent;
use crate::application::ports::SessionApi;
use crate::domain::{ClientError, Lease, SessionId};

/// Recurring keepalive for a granted lease.
///
/// Fires every ttl/2, first at ttl/2. A failed renewal posts one fatal event
/// and stops the timer.
pub struct LeaseKeeper {
    interval: Duration,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl LeaseKeeper {
    /// Fails when ttl/2 cannot be scheduled on the runtime clock
    pub(crate) fn arm(
        session_id: SessionId,
        lease: Lease,
        api: Arc<dyn SessionApi>,
        events: UnboundedSender<SessionEvent>,
    ) -> Result<Self, ClientError> {
        let interval = lease.renewal_interval();
        // The ticker computes the second deadline as first + period on its first tick
        let now = Instant::now();
        let first = interval
            .checked_mul(2)
            .and_then(|span| now.checked_add(span))
            .map(|_| now + interval)
            .ok_or_else(|| {
                ClientError::LeaseRenewal(Box::new(ClientError::validation(
                    "lease.ttl_seconds",
                    format!("lease ttl of {}s is too large to schedule", lease.ttl_seconds),
                )))
            })?;
        let cancel = CancellationToken::new();

        info!(
            "Lease keeper armed for session {}: ttl {}s, renewing every {:?}",
            session_id, lease.ttl_seconds, interval
        );

        let task = tokio::spawn(renew_loop(session_id, lease, first, api, events, cancel.clone()));

        Ok(Self {
            interval,
            cancel,
            task: Some(task),
        })
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Stop the timer and wait for the task to finish
    pub async fn cancel(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
        debug!("Lease keeper cancelled");
    }
}

impl Drop for LeaseKeeper {
    fn drop(&mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

async fn renew_loop(
    session_id: SessionId,
    mut lease: Lease,
    first: Instant,
    api: Arc<dyn SessionApi>,
    events: UnboundedSender<SessionEvent>,
    cancel: CancellationToken,
) {
    let period = lease.renewal_interval();
    let mut ticker = interval_at(first, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            _ = ticker.tick() => {}
        }

        let renewal = tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            renewal = api.renew_lease(&session_id) => renewal,
        };

        match renewal {
            Ok(renewal) => {
                lease.renew(renewal.ttl_seconds);
                debug!(
                    "Lease renewed for session {} (ttl {}s at {})",
                    session_id, lease.ttl_seconds, lease.renewed_at
                );
            }
            Err(e) => {
                error!("Lease renewal failed for session {}: {}", session_id, e);
                let _ = events.send(SessionEvent::Fatal(ClientError::LeaseRenewal(Box::new(e))));
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::ports::MockSessionApi;
    use shared::LeaseRenewal;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::mpsc;

    fn counting_api(calls: Arc<AtomicUsize>) -> Arc<dyn SessionApi> {
        let mut api = MockSessionApi::new();
        api.expect_renew_lease().returning(move |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(LeaseRenewal { ttl_seconds: 300 })
        });
        Arc::new(api)
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_renewal_at_half_ttl() {
        let calls = Arc::new(AtomicUsize::new(0));
        let (tx, _rx) = mpsc::unbounded_channel();
        let keeper = LeaseKeeper::arm(
            SessionId::from_string("s1".into()),
            Lease::granted(300),
            counting_api(calls.clone()),
            tx,
        )
        .unwrap();
        assert_eq!(keeper.interval(), Duration::from_secs(150));

        tokio::time::sleep(Duration::from_secs(149)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_secs(150)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        keeper.cancel().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_renewal_after_cancel() {
        let calls = Arc::new(AtomicUsize::new(0));
        let (tx, _rx) = mpsc::unbounded_channel();
        let keeper = LeaseKeeper::arm(
            SessionId::from_string("s1".into()),
            Lease::granted(10),
            counting_api(calls.clone()),
            tx,
        )
        .unwrap();

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        keeper.cancel().await;
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_renewal_posts_fatal_once() {
        let mut api = MockSessionApi::new();
        api.expect_renew_lease()
            .times(1)
            .returning(|_| Err(ClientError::Network("connection refused".into())));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let keeper = LeaseKeeper::arm(
            SessionId::from_string("s1".into()),
            Lease::granted(4),
            Arc::new(api),
            tx,
        )
        .unwrap();

        match rx.recv().await {
            Some(SessionEvent::Fatal(ClientError::LeaseRenewal(cause))) => {
                assert!(matches!(*cause, ClientError::Network(_)));
            }
            other => panic!("unexpected event: {:?}", other),
        }

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(rx.try_recv().is_err());
        keeper.cancel().await;
    }

    #[tokio::test]
    async fn test_unschedulable_ttl_is_rejected() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut api = MockSessionApi::new();
        api.expect_renew_lease().never();

        let err = LeaseKeeper::arm(
            SessionId::from_string("s1".into()),
            Lease::granted(u64::MAX),
            Arc::new(api),
            tx,
        )
        .err()
        .unwrap();

        match err {
            ClientError::LeaseRenewal(cause) => assert_eq!(cause.field(), Some("lease.ttl_seconds")),
            other => panic!("unexpected error: {:?}", other),
        }
    }
}
