use log::{debug, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};

use crate::aggregator::{Aggregator, DashboardState, VOTE_FEED};
use crate::db::{Subscription, VoteSource};

/// Refresh period for consolidated multi-question views.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshMode {
    /// Recompute on every vote insert pushed by the backend.
    Push,
    /// Recompute on a fixed timer.
    Interval(Duration),
}

enum Trigger {
    Push(Subscription),
    Timer(Interval),
    /// Polling while the push feed is unavailable. Each tick retries it.
    Fallback(Interval),
}

impl Trigger {
    /// Resolves at the next refresh trigger; false when the push feed ended.
    async fn fire(&mut self) -> bool {
        match self {
            Trigger::Push(subscription) => subscription.notified().await,
            Trigger::Timer(timer) | Trigger::Fallback(timer) => {
                timer.tick().await;
                true
            }
        }
    }
}

fn polling(period: Duration) -> Interval {
    // First refresh happens on start, so the first tick is one period out.
    let mut timer = interval_at(Instant::now() + period, period);
    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
    timer
}

/// A running refresh loop for one dashboard. Stopping or dropping it
/// cancels the subscription, the timer and every in-flight refresh.
pub struct LiveResults {
    task: JoinHandle<()>,
    state: watch::Receiver<DashboardState>,
}

impl LiveResults {
    pub fn start<S: VoteSource + 'static>(aggregator: Arc<Aggregator<S>>, mode: RefreshMode) -> Self {
        let state = aggregator.watch();
        let task = tokio::spawn(run_refresh_loop(aggregator, mode));
        Self { task, state }
    }

    pub fn state(&self) -> watch::Receiver<DashboardState> {
        self.state.clone()
    }

    /// Waits until the loop ends on its own (finished poll or closed feed).
    pub async fn finished(&mut self) {
        let _ = (&mut self.task).await;
    }

    pub fn stop(self) {
        // Drop aborts the loop.
    }
}

impl Drop for LiveResults {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn run_refresh_loop<S: VoteSource + 'static>(aggregator: Arc<Aggregator<S>>, mode: RefreshMode) {
    let poll_id = aggregator.poll_id();
    info!("Starting live results for poll {} ({:?})", poll_id, mode);

    // Refreshes are not serialized: whichever finishes last is what gets shown.
    let mut inflight: JoinSet<bool> = JoinSet::new();
    inflight.spawn(refresh_once(Arc::clone(&aggregator)));

    let mut trigger = match mode {
        RefreshMode::Push => subscribe(&aggregator).await,
        RefreshMode::Interval(period) => Trigger::Timer(polling(period)),
    };

    loop {
        tokio::select! {
            fired = trigger.fire() => {
                if !fired {
                    // Keep the dashboard alive on the timer until the feed is back
                    aggregator.report_failure(VOTE_FEED, "notification stream closed");
                    warn!(
                        "Vote feed for poll {} closed; polling every {:?} until it is back",
                        poll_id, DEFAULT_INTERVAL
                    );
                    trigger = Trigger::Fallback(polling(DEFAULT_INTERVAL));
                    continue;
                }

                if matches!(trigger, Trigger::Fallback(_)) {
                    trigger = subscribe(&aggregator).await;
                }

                debug!("Refreshing results for poll {}", poll_id);
                inflight.spawn(refresh_once(Arc::clone(&aggregator)));
            }
            Some(joined) = inflight.join_next(), if !inflight.is_empty() => {
                if let Ok(true) = joined {
                    info!("Poll {} has finished; final results published", poll_id);
                    break;
                }
            }
        }
    }

    if let Trigger::Push(subscription) = trigger {
        subscription.cancel();
    }
    info!("Live results for poll {} stopped", poll_id);
}

/// Subscribes to vote inserts, or reports the failure and falls back to polling.
async fn subscribe<S: VoteSource>(aggregator: &Aggregator<S>) -> Trigger {
    let poll_id = aggregator.poll_id();
    match aggregator.source().subscribe_vote_inserts(poll_id).await {
        Ok(subscription) => {
            aggregator.clear_feed_failure();
            debug!("Subscribed to vote inserts for poll {}", poll_id);
            Trigger::Push(subscription)
        }
        Err(e) => {
            aggregator.report_failure(VOTE_FEED, e);
            warn!(
                "Could not subscribe to votes for poll {}; polling every {:?} instead",
                poll_id, DEFAULT_INTERVAL
            );
            Trigger::Fallback(polling(DEFAULT_INTERVAL))
        }
    }
}

/// Returns true when the poll has reached its terminal status.
async fn refresh_once<S: VoteSource + 'static>(aggregator: Arc<Aggregator<S>>) -> bool {
    match aggregator.refresh().await {
        Ok(results) => results.poll.status.is_terminal(),
        // Already logged and published; the next trigger retries.
        Err(_) => false,
    }
}
