//! Drain scheduler - turns connectivity edges and elapsed time into drain triggers
//!
//! The [`DrainScheduler`] sits between the connectivity monitor and the
//! [`DrainCoordinator`](super::engine::DrainCoordinator). It follows the
//! connectivity channel and signals when a drain should begin.
//!
//! ## Flow
//!
//! ```text
//! ConnectivityMonitor ──→ watch::Receiver ──→ DrainScheduler ──→ drain_requested flag
//!                                                  │
//!                                          opportunity interval
//! ```
//!
//! A drain is requested when connectivity comes back (the online edge) and
//! periodically while online, so records queued during a long online stretch
//! do not wait for the next outage to recover. The scheduler also supports
//! user-initiated requests that set the flag directly, useful for "sync now"
//! commands.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use tokio::sync::watch;
use tracing::{debug, info};

use chartsync_core::domain::ConnectivityState;

// ============================================================================
// DrainScheduler struct
// ============================================================================

/// Schedules drain runs from connectivity transitions and elapsed time
///
/// Consumes connectivity changes from a watch channel and sets a shared
/// atomic flag whenever a drain opportunity arises. The daemon's main loop
/// owns the flag and decides when to act on it.
///
/// ## Priority / User-Initiated Drains
///
/// Calling [`request_drain()`](DrainScheduler::request_drain) sets the
/// `drain_requested` flag immediately, regardless of connectivity. This
/// allows the CLI or the D-Bus surface to trigger an immediate attempt.
pub struct DrainScheduler {
    /// Receiver for connectivity transitions
    connectivity_rx: watch::Receiver<ConnectivityState>,
    /// How often to request a drain while the machine stays online
    opportunity_interval: Duration,
    /// Shared flag indicating that a drain should start
    drain_requested: Arc<AtomicBool>,
}

impl DrainScheduler {
    /// Creates a new `DrainScheduler`
    ///
    /// # Arguments
    /// * `connectivity_rx` - Channel receiver for connectivity transitions
    /// * `opportunity_interval` - How often to trigger while online
    ///
    /// # Returns
    /// A tuple of `(DrainScheduler, Arc<AtomicBool>)`. The `AtomicBool` is
    /// set to `true` when a drain should run.
    pub fn new(
        connectivity_rx: watch::Receiver<ConnectivityState>,
        opportunity_interval: Duration,
    ) -> (Self, Arc<AtomicBool>) {
        let drain_requested = Arc::new(AtomicBool::new(false));
        let flag = drain_requested.clone();

        info!(
            interval_secs = opportunity_interval.as_secs(),
            "Creating drain scheduler"
        );

        let scheduler = Self {
            connectivity_rx,
            opportunity_interval,
            drain_requested,
        };

        (scheduler, flag)
    }

    /// Requests an immediate drain, regardless of connectivity
    ///
    /// This is used for user-initiated "sync now" requests from the CLI or
    /// the D-Bus surface. Sets the `drain_requested` flag directly; an
    /// offline attempt will surface as a transient failure and leave the
    /// queue untouched.
    pub fn request_drain(&self) {
        info!("User-initiated drain requested");
        self.drain_requested.store(true, Ordering::Release);
    }

    /// Returns whether a drain has been requested
    ///
    /// This checks the atomic flag without resetting it. Use
    /// [`clear_drain_request`](DrainScheduler::clear_drain_request) to reset.
    pub fn is_drain_requested(&self) -> bool {
        self.drain_requested.load(Ordering::Acquire)
    }

    /// Clears the drain requested flag
    ///
    /// Should be called once the coordinator has started a run.
    pub fn clear_drain_request(&self) {
        self.drain_requested.store(false, Ordering::Release);
    }

    // ========================================================================
    // DrainScheduler::run()
    // ========================================================================

    /// Main event loop for the drain scheduler
    ///
    /// Runs indefinitely, performing two concurrent operations via
    /// `tokio::select!`:
    ///
    /// 1. **Connectivity edges**: Every transition to online requests a
    ///    drain; transitions to offline are noted and ignored.
    /// 2. **Opportunity interval**: While online, a drain is requested every
    ///    interval. The first tick fires immediately, which gives the daemon
    ///    a catch-up drain right after startup.
    ///
    /// The loop terminates when the connectivity channel closes (the monitor
    /// was dropped).
    pub async fn run(&mut self) {
        info!("Drain scheduler starting");

        let mut opportunity = tokio::time::interval(self.opportunity_interval);
        opportunity.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                changed = self.connectivity_rx.changed() => {
                    match changed {
                        Ok(()) => {
                            let state = *self.connectivity_rx.borrow_and_update();
                            if state.is_online() {
                                info!("Connectivity restored, requesting drain");
                                self.drain_requested.store(true, Ordering::Release);
                            } else {
                                debug!("Connectivity lost, staying idle");
                            }
                        }
                        Err(_) => {
                            // Channel closed, the monitor has been dropped
                            info!("Connectivity channel closed, scheduler shutting down");
                            break;
                        }
                    }
                }

                _ = opportunity.tick() => {
                    if self.connectivity_rx.borrow().is_online() {
                        debug!("Drain opportunity interval elapsed");
                        self.drain_requested.store(true, Ordering::Release);
                    } else {
                        debug!("Drain opportunity elapsed while offline, staying idle");
                    }
                }
            }
        }

        info!("Drain scheduler stopped");
    }
}

// ============================================================================
// Unit tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn channel(initial: ConnectivityState) -> (watch::Sender<ConnectivityState>, watch::Receiver<ConnectivityState>) {
        watch::channel(initial)
    }

    /// Polls the flag until it is set or a real-time budget runs out.
    async fn wait_for_flag(flag: &Arc<AtomicBool>) -> bool {
        for _ in 0..200 {
            if flag.load(Ordering::Acquire) {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }

    #[test]
    fn test_new_creates_scheduler_with_flag() {
        let (_tx, rx) = channel(ConnectivityState::Offline);
        let (scheduler, flag) = DrainScheduler::new(rx, Duration::from_secs(300));

        assert!(!flag.load(Ordering::Acquire));
        assert!(!scheduler.is_drain_requested());
    }

    #[test]
    fn test_request_drain_sets_flag() {
        let (_tx, rx) = channel(ConnectivityState::Offline);
        let (scheduler, flag) = DrainScheduler::new(rx, Duration::from_secs(300));

        scheduler.request_drain();
        assert!(flag.load(Ordering::Acquire));
        assert!(scheduler.is_drain_requested());
    }

    #[test]
    fn test_clear_drain_request() {
        let (_tx, rx) = channel(ConnectivityState::Offline);
        let (scheduler, flag) = DrainScheduler::new(rx, Duration::from_secs(300));

        scheduler.request_drain();
        assert!(flag.load(Ordering::Acquire));

        scheduler.clear_drain_request();
        assert!(!flag.load(Ordering::Acquire));
    }

    #[tokio::test]
    async fn test_online_edge_requests_drain() {
        let (tx, rx) = channel(ConnectivityState::Offline);
        // Interval far in the future so only the edge can set the flag
        let (mut scheduler, flag) = DrainScheduler::new(rx, Duration::from_secs(3600));

        let handle = tokio::spawn(async move { scheduler.run().await });

        tx.send(ConnectivityState::Online).unwrap();
        assert!(wait_for_flag(&flag).await, "online edge should request a drain");

        drop(tx);
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_offline_edge_does_not_request_drain() {
        let (tx, rx) = channel(ConnectivityState::Online);
        let (mut scheduler, flag) = DrainScheduler::new(rx, Duration::from_secs(3600));

        let handle = tokio::spawn(async move { scheduler.run().await });

        // The immediate first tick fires while online; absorb it.
        assert!(wait_for_flag(&flag).await);
        flag.store(false, Ordering::Release);

        tx.send(ConnectivityState::Offline).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!flag.load(Ordering::Acquire), "offline edge must not request a drain");

        drop(tx);
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_opportunity_interval_requests_drain_while_online() {
        let (tx, rx) = channel(ConnectivityState::Online);
        let (mut scheduler, flag) = DrainScheduler::new(rx, Duration::from_millis(20));

        let handle = tokio::spawn(async move { scheduler.run().await });

        assert!(wait_for_flag(&flag).await, "interval should request a drain while online");

        drop(tx);
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_opportunity_interval_stays_idle_while_offline() {
        let (tx, rx) = channel(ConnectivityState::Offline);
        let (mut scheduler, flag) = DrainScheduler::new(rx, Duration::from_millis(20));

        let handle = tokio::spawn(async move { scheduler.run().await });

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(!flag.load(Ordering::Acquire), "no drains should be requested offline");

        drop(tx);
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_run_exits_when_monitor_is_dropped() {
        let (tx, rx) = channel(ConnectivityState::Offline);
        let (mut scheduler, _flag) = DrainScheduler::new(rx, Duration::from_secs(3600));

        drop(tx);

        tokio::time::timeout(Duration::from_secs(2), scheduler.run())
            .await
            .expect("Scheduler should exit when the channel closes");
    }
}
