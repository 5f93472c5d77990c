//! Visibility-aware refresh scheduling
//!
//! Issues periodic refresh requests while the surface is visible and the
//! user is logged in. Hidden → the timer is torn down. Visible again →
//! one immediate refresh and a fresh timer.
//!
//! Requests are delivered on a channel; the controller decides what to do
//! with them.

use flume::Sender;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info};

use super::state::SyncTrigger;
use super::visibility::VisibilitySignal;

/// Handle to the periodic tick task; aborting on drop guarantees teardown
pub struct RefreshTimer {
    handle: JoinHandle<()>,
}

impl RefreshTimer {
    fn spawn(period: Duration, requests: Sender<SyncTrigger>) -> Self {
        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            let mut tick_count = 0u64;
            loop {
                ticker.tick().await;
                tick_count += 1;
                debug!("Refresh tick #{}", tick_count);

                if let Err(e) = requests.send(SyncTrigger::Tick) {
                    error!("Failed to send refresh tick #{}: {}", tick_count, e);
                    break;
                }
            }
        });

        Self { handle }
    }
}

impl Drop for RefreshTimer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

pub struct VisibilityAwareScheduler {
    period: Duration,
    visibility: VisibilitySignal,
    requests: Sender<SyncTrigger>,
    timer: Option<RefreshTimer>,
    logged_in: bool,
    /// Login happened while hidden; the first visible refresh is the initial load
    initial_pending: bool,
}

impl VisibilityAwareScheduler {
    pub fn new(period: Duration, visibility: VisibilitySignal, requests: Sender<SyncTrigger>) -> Self {
        Self {
            period,
            visibility,
            requests,
            timer: None,
            logged_in: false,
            initial_pending: false,
        }
    }

    pub fn is_timer_active(&self) -> bool {
        self.timer.is_some()
    }

    pub fn on_login(&mut self) {
        self.logged_in = true;

        if self.visibility.is_visible() {
            info!("Logged in: starting refresh timer (interval: {:?})", self.period);
            self.initial_pending = false;
            self.request(SyncTrigger::Initial);
            self.restart_timer();
        } else {
            info!("Logged in while hidden: deferring initial load");
            self.initial_pending = true;
            self.cancel_timer();
        }
    }

    pub fn on_visibility(&mut self, visible: bool) {
        if !self.logged_in {
            return;
        }

        if visible {
            let trigger = if std::mem::take(&mut self.initial_pending) {
                SyncTrigger::Initial
            } else {
                SyncTrigger::Tick
            };
            debug!("Surface visible: immediate {:?} refresh", trigger);
            self.request(trigger);
            self.restart_timer();
        } else {
            debug!("Surface hidden: suspending refresh timer");
            self.cancel_timer();
        }
    }

    pub fn on_logout(&mut self) {
        self.logged_in = false;
        self.initial_pending = false;
        self.cancel_timer();
        info!("Logged out: refresh timer stopped");
    }

    fn request(&self, trigger: SyncTrigger) {
        if let Err(e) = self.requests.send(trigger) {
            error!("Failed to send {:?} refresh request: {}", trigger, e);
        }
    }

    /// Replace any running timer; never two alive at once
    fn restart_timer(&mut self) {
        self.cancel_timer();
        self.timer = Some(RefreshTimer::spawn(self.period, self.requests.clone()));
    }

    fn cancel_timer(&mut self) {
        self.timer.take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flume::Receiver;

    const PERIOD: Duration = Duration::from_secs(60);

    fn scheduler(visible: bool) -> (VisibilityAwareScheduler, VisibilitySignal, Receiver<SyncTrigger>) {
        let signal = VisibilitySignal::new(visible);
        let (tx, rx) = flume::unbounded();
        (VisibilityAwareScheduler::new(PERIOD, signal.clone(), tx), signal, rx)
    }

    fn assert_elapsed(start: Instant, expected: Duration) {
        let elapsed = start.elapsed();
        assert!(
            elapsed >= expected && elapsed < expected + Duration::from_millis(10),
            "elapsed {:?}, expected {:?}",
            elapsed,
            expected
        );
    }

    async fn assert_silent(rx: &Receiver<SyncTrigger>, secs: u64) {
        let res = tokio::time::timeout(Duration::from_secs(secs), rx.recv_async()).await;
        assert!(res.is_err(), "unexpected request: {:?}", res);
    }

    #[tokio::test(start_paused = true)]
    async fn test_login_visible_requests_initial_then_ticks() {
        let (mut sched, _signal, rx) = scheduler(true);
        sched.on_login();

        assert_eq!(rx.try_recv().unwrap(), SyncTrigger::Initial);
        assert!(sched.is_timer_active());

        let start = Instant::now();
        assert_eq!(rx.recv_async().await.unwrap(), SyncTrigger::Tick);
        assert_elapsed(start, PERIOD);
        assert_eq!(rx.recv_async().await.unwrap(), SyncTrigger::Tick);
        assert_elapsed(start, PERIOD * 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hidden_suspends_and_visible_resumes() {
        let (mut sched, signal, rx) = scheduler(true);
        sched.on_login();
        assert_eq!(rx.try_recv().unwrap(), SyncTrigger::Initial);

        signal.set_visible(false);
        sched.on_visibility(false);
        assert!(!sched.is_timer_active());
        assert_silent(&rx, 600).await;

        signal.set_visible(true);
        sched.on_visibility(true);
        assert_eq!(rx.try_recv().unwrap(), SyncTrigger::Tick);

        let start = Instant::now();
        assert_eq!(rx.recv_async().await.unwrap(), SyncTrigger::Tick);
        assert_elapsed(start, PERIOD);
    }

    #[tokio::test(start_paused = true)]
    async fn test_login_while_hidden_defers_initial() {
        let (mut sched, signal, rx) = scheduler(false);
        sched.on_login();
        assert!(rx.try_recv().is_err());
        assert!(!sched.is_timer_active());

        signal.set_visible(true);
        sched.on_visibility(true);
        assert_eq!(rx.try_recv().unwrap(), SyncTrigger::Initial);

        sched.on_visibility(false);
        sched.on_visibility(true);
        assert_eq!(rx.try_recv().unwrap(), SyncTrigger::Tick);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_keeps_single_timer() {
        let (mut sched, _signal, rx) = scheduler(true);
        sched.on_login();
        sched.on_visibility(true);
        sched.on_visibility(true);
        while rx.try_recv().is_ok() {}

        // Only one timer survives, so exactly one tick per period
        tokio::time::sleep(PERIOD + Duration::from_secs(1)).await;
        assert_eq!(rx.drain().count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_logout_cancels_timer() {
        let (mut sched, _signal, rx) = scheduler(true);
        sched.on_login();
        let _ = rx.try_recv();

        sched.on_logout();
        assert!(!sched.is_timer_active());
        assert_silent(&rx, 600).await;

        // Visibility changes while logged out do nothing
        sched.on_visibility(true);
        assert!(rx.try_recv().is_err());
    }
}
