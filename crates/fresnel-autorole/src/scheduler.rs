//! Periodic allocation.
//!
//! Every `interval` the scheduler runs one [`AutoRoles::tick`]. The pass
//! runs in its own task so a panic inside it is logged and the loop
//! carries on with the next interval. A tick that overruns the interval
//! causes the missed ticks to be skipped, never queued.

use crate::service::{AutoRoles, TickReport};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, error, info};

pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(120);

pub struct Scheduler {
    service: Arc<AutoRoles>,
    interval: Duration,
}

impl Scheduler {
    pub fn new(service: Arc<AutoRoles>, interval: Duration) -> Self {
        Self { service, interval }
    }

    /// Run until `shutdown` flips to true or its sender is dropped.
    ///
    /// A pass already in progress is allowed to finish.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = time::interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(interval_secs = self.interval.as_secs(), "scheduler started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Some(report) = self.pass().await {
                        debug!(
                            guilds = report.guilds,
                            touched = report.touched,
                            persisted = report.persisted,
                            changed = report.changed,
                            failures = report.failures,
                            "tick complete"
                        );
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("scheduler stopped");
    }

    async fn pass(&self) -> Option<TickReport> {
        let service = Arc::clone(&self.service);
        match tokio::spawn(async move { service.tick().await }).await {
            Ok(report) => Some(report),
            Err(e) => {
                error!("tick aborted: {}", e);
                None
            }
        }
    }

    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{fixture, GUILD};
    use fresnel_thz::UserId;

    #[tokio::test(start_paused = true)]
    async fn ticks_once_per_interval() {
        let fx = fixture(&[(1, 0)], &[]).await;
        let (tx, rx) = watch::channel(false);
        let handle = Scheduler::new(Arc::clone(&fx.service), Duration::from_secs(120)).spawn(rx);

        time::sleep(Duration::from_secs(119)).await;
        assert_eq!(fx.store.score(GUILD, UserId(1)), Some(0));

        time::sleep(Duration::from_secs(2)).await;
        assert_eq!(fx.store.score(GUILD, UserId(1)), Some(1));

        time::sleep(Duration::from_secs(240)).await;
        assert_eq!(fx.store.score(GUILD, UserId(1)), Some(3));

        tx.send(true).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn stops_when_sender_dropped() {
        let fx = fixture(&[], &[]).await;
        let (tx, rx) = watch::channel(false);
        let handle = Scheduler::new(Arc::clone(&fx.service), DEFAULT_INTERVAL).spawn(rx);
        drop(tx);
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_lets_pass_finish() {
        let fx = fixture(&[(1, 0), (2, 0), (3, 0)], &[]).await;
        fx.store.slow_score_writes(Duration::from_secs(10));
        let (tx, rx) = watch::channel(false);
        let start = Instant::now();
        let handle = Scheduler::new(Arc::clone(&fx.service), Duration::from_secs(120)).spawn(rx);

        // First pass starts at 120s and writes until 150s.
        time::sleep(Duration::from_secs(125)).await;
        assert_eq!(fx.store.score(GUILD, UserId(3)), Some(0));
        tx.send(true).unwrap();
        handle.await.unwrap();

        assert!(start.elapsed() >= Duration::from_secs(150));
        for user in 1..=3 {
            assert_eq!(fx.store.score(GUILD, UserId(user)), Some(1), "user {}", user);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn overrunning_pass_skips_ticks() {
        let fx = fixture(&[(1, 0)], &[]).await;
        fx.store.slow_score_writes(Duration::from_secs(15));
        let (tx, rx) = watch::channel(false);
        let handle = Scheduler::new(Arc::clone(&fx.service), Duration::from_secs(10)).spawn(rx);

        // Passes run back to back from 10s: done at 25s, 40s, 55s.
        time::sleep(Duration::from_secs(60)).await;
        assert_eq!(fx.store.score(GUILD, UserId(1)), Some(3));
        assert_eq!(fx.store.max_in_flight(), 1);

        tx.send(true).unwrap();
        handle.await.unwrap();
    }
}
