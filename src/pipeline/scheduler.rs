//! Periodic tick source

use std::time::Duration;

use flume::Sender;
use once_cell::sync::Lazy;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, trace};

use crate::capture::HostTime;

static HOST_CLOCK: Lazy<HostClock> =
    Lazy::new(|| HostClock::anchored_at(Instant::from_std(std::time::Instant::now())));

/// Process-wide host clock.
///
/// Every device stamps samples against this one timeline. The anchor is
/// real time at first use, so call this once at startup, before any paused
/// test runtime is built.
pub fn host_clock() -> HostClock {
    *HOST_CLOCK
}

/// Monotonic host clock.
///
/// Reads go through tokio's clock, so a thread must be inside a runtime
/// context for a paused test clock to drive it.
#[derive(Debug, Clone, Copy)]
pub struct HostClock {
    base: Instant,
}

impl HostClock {
    pub fn new() -> Self {
        Self::anchored_at(Instant::now())
    }

    pub fn anchored_at(base: Instant) -> Self {
        Self { base }
    }

    pub fn now(&self) -> HostTime {
        self.at(Instant::now())
    }

    /// Host time of `instant`
    pub fn at(&self, instant: Instant) -> HostTime {
        let elapsed = instant.saturating_duration_since(self.base);
        HostTime(u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX))
    }
}

impl Default for HostClock {
    fn default() -> Self {
        Self::new()
    }
}

/// One scheduled invocation of the frame routine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tick {
    /// Arming generation; ticks from an older arming are stale
    pub epoch: u64,
    /// 1-based tick number within the arming
    pub sequence: u64,
    /// Scheduled deadline; samples are stamped when built, not with this
    pub fired_at: HostTime,
}

/// Armed periodic timer. Cancelled on `cancel` or drop.
///
/// The first tick fires immediately, then every `period` with no coalescing:
/// ticks that fall behind are delivered back to back. Ticks are posted into the owner's queue; a full queue holds
/// the timer back until the owner catches up.
pub struct Scheduler {
    task: JoinHandle<()>,
    epoch: u64,
}

impl Scheduler {
    pub fn arm(
        runtime: &Handle,
        period: Duration,
        epoch: u64,
        clock: HostClock,
        queue: Sender<Tick>,
    ) -> Self {
        let period = period.max(Duration::from_nanos(1));
        let task = runtime.spawn(async move {
            let mut ticker = time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Burst);
            let mut sequence = 0u64;

            loop {
                let deadline = ticker.tick().await;
                sequence += 1;

                let late = Instant::now().saturating_duration_since(deadline);
                if late > period {
                    debug!("tick {} of epoch {} late by {:?}", sequence, epoch, late);
                }

                let tick = Tick {
                    epoch,
                    sequence,
                    fired_at: clock.at(deadline),
                };
                if queue.send_async(tick).await.is_err() {
                    trace!("tick queue closed, scheduler for epoch {} exiting", epoch);
                    break;
                }
            }
        });

        debug!("Scheduler armed: epoch {}, period {:?}", epoch, period);
        Self { task, epoch }
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Stop future ticks. A tick already handed to the owner still runs.
    pub fn cancel(self) {
        debug!("Scheduler cancelled: epoch {}", self.epoch);
        drop(self);
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_first_tick_immediate_then_periodic() {
        let clock = HostClock::new();
        let (tx, rx) = flume::bounded(4);
        let period = Duration::from_millis(10);
        let scheduler = Scheduler::arm(&Handle::current(), period, 7, clock, tx);

        let mut ticks = Vec::new();
        for _ in 0..5 {
            ticks.push(rx.recv_async().await.expect("tick should arrive"));
        }
        scheduler.cancel();

        assert_eq!(ticks[0].fired_at, HostTime(0));
        for (i, pair) in ticks.windows(2).enumerate() {
            assert_eq!(pair[1].sequence, pair[0].sequence + 1);
            assert_eq!(
                pair[1].fired_at.saturating_sub(pair[0].fired_at),
                period,
                "spacing after tick {i}"
            );
        }
        assert!(ticks.iter().all(|t| t.epoch == 7));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_stops_ticks() {
        let (tx, rx) = flume::bounded(1);
        let scheduler = Scheduler::arm(
            &Handle::current(),
            Duration::from_millis(5),
            1,
            HostClock::new(),
            tx,
        );
        rx.recv_async().await.expect("first tick should arrive");
        scheduler.cancel();

        // At most the one tick already queued survives cancellation
        time::sleep(Duration::from_millis(100)).await;
        let leftover = rx.drain().count();
        assert!(leftover <= 1);
        assert!(rx.recv_async().await.is_err(), "queue closes once the task is gone");
    }

    #[test]
    fn test_host_clock_is_shared() {
        let before = host_clock().now();
        std::thread::sleep(Duration::from_millis(5));
        let after = host_clock().now();
        assert_eq!(host_clock().base, HOST_CLOCK.base);
        assert!(after.saturating_sub(before) >= Duration::from_millis(5));
    }
}
