//! Frame production: one tick in, at most one sample out

use std::io;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use crossbeam::utils::CachePadded;
use flume::{Receiver, Selector};
use tokio::runtime::Handle;
use tracing::{debug, info, trace, warn};

use super::scheduler::{HostClock, Tick};
use crate::capture::{
    Discontinuity, FrameFormat, FramePool, HostTime, StripeSynthesizer, TimestampedSample,
};
use crate::host::SampleSink;
use crate::utils;

/// Counters shared between the tick thread and the owning device
#[derive(Debug, Default)]
pub struct EngineStats {
    frames_emitted: CachePadded<AtomicU64>,
    frames_dropped: CachePadded<AtomicU64>,
    stale_ticks: AtomicU64,
    stripe_row: AtomicU32,
}

impl EngineStats {
    pub fn frames_emitted(&self) -> u64 {
        self.frames_emitted.load(Ordering::Relaxed)
    }

    pub fn frames_dropped(&self) -> u64 {
        self.frames_dropped.load(Ordering::Relaxed)
    }

    pub fn stale_ticks(&self) -> u64 {
        self.stale_ticks.load(Ordering::Relaxed)
    }

    /// Stripe position the next frame will be drawn at
    pub fn stripe_row(&self) -> u32 {
        self.stripe_row.load(Ordering::Acquire)
    }
}

/// Result of handling one tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Emitted,
    Skipped,
}

/// Pool, pattern generator and sink for one device.
///
/// Owned by exactly one thread at a time; the synthesizer state needs no lock.
pub struct FrameEngine {
    format: Arc<FrameFormat>,
    pool: FramePool,
    synth: StripeSynthesizer,
    sink: Arc<dyn SampleSink>,
    clock: HostClock,
    last_pts: Option<HostTime>,
    pending: Discontinuity,
    stats: Arc<EngineStats>,
}

impl FrameEngine {
    pub fn new(
        format: Arc<FrameFormat>,
        pool_threshold: usize,
        stripe_height: u32,
        sink: Arc<dyn SampleSink>,
        clock: HostClock,
    ) -> Self {
        let pool = FramePool::new(&format, pool_threshold);
        let synth = StripeSynthesizer::new(format.height, stripe_height);
        Self {
            format,
            pool,
            synth,
            sink,
            clock,
            last_pts: None,
            pending: Discontinuity::NONE,
            stats: Arc::new(EngineStats::default()),
        }
    }

    pub fn stats(&self) -> Arc<EngineStats> {
        Arc::clone(&self.stats)
    }

    pub fn pool(&self) -> &FramePool {
        &self.pool
    }

    pub fn synthesizer(&self) -> &StripeSynthesizer {
        &self.synth
    }

    /// Produce and emit the frame for `tick`.
    ///
    /// The sample is stamped with the host clock when it is built, so a late
    /// tick shows up as jitter rather than as a stale timestamp. Pool
    /// exhaustion skips the frame; the next emitted sample then carries
    /// `SAMPLE_DROPPED`.
    pub fn on_tick(&mut self, tick: Tick) -> TickOutcome {
        let mut buffer = match self.pool.acquire() {
            Ok(buffer) => buffer,
            Err(e) => {
                warn!("Out of frame buffers, skipping tick {}: {}", tick.sequence, e);
                self.pending = self.pending | Discontinuity::SAMPLE_DROPPED;
                self.stats.frames_dropped.fetch_add(1, Ordering::Relaxed);
                metrics::counter!("virtucam_frames_dropped").increment(1);
                return TickOutcome::Skipped;
            }
        };

        self.synth.draw(&mut buffer);
        self.stats
            .stripe_row
            .store(self.synth.stripe_row(), Ordering::Release);

        let pts = self.stamp();
        let late = pts.saturating_sub(tick.fired_at);
        if late > self.format.frame_interval() {
            debug!("tick {} drawn {:?} after its deadline", tick.sequence, late);
        }

        let sample = TimestampedSample {
            buffer,
            sequence: tick.sequence,
            presentation_time: pts,
            format: Arc::clone(&self.format),
        };
        let discontinuity = std::mem::take(&mut self.pending);

        trace!(
            "video time {:.6} seq {} flags {:#x}",
            pts.as_secs_f64(),
            tick.sequence,
            discontinuity.bits()
        );
        self.sink.emit(sample, discontinuity, pts.as_nanos());

        self.stats.frames_emitted.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("virtucam_frames_emitted").increment(1);
        TickOutcome::Emitted
    }

    /// Current host time, nudged forward if the clock has not moved since
    /// the previous sample
    fn stamp(&mut self) -> HostTime {
        let now = self.clock.now();
        let pts = match self.last_pts {
            Some(last) if now <= last => HostTime(last.0 + 1),
            _ => now,
        };
        self.last_pts = Some(pts);
        pts
    }
}

/// Dedicated serial thread that owns a [`FrameEngine`] and runs its ticks.
///
/// Ticks whose epoch no longer matches `active_epoch` were queued before a
/// stop and are discarded. The thread exits on a message from `exit`, or
/// when either channel loses all its senders. It runs inside `runtime`'s
/// context so the host clock reads the runtime's time source.
pub(crate) fn spawn_tick_thread(
    name: &str,
    mut engine: FrameEngine,
    ticks: Receiver<Tick>,
    exit: Receiver<()>,
    active_epoch: Arc<AtomicU64>,
    runtime: Handle,
    pin_core: Option<usize>,
) -> io::Result<JoinHandle<()>> {
    let thread_name = format!("virtucam-tick-{name}");
    thread::Builder::new().name(thread_name).spawn(move || {
        let _runtime = runtime.enter();
        if let Some(core) = pin_core {
            utils::pin_current_thread(core);
        }
        info!("Tick thread started");

        loop {
            let next = Selector::new()
                .recv(&ticks, |tick| tick.ok())
                .recv(&exit, |_| None)
                .wait();
            let Some(tick) = next else {
                break;
            };

            if tick.epoch != active_epoch.load(Ordering::Acquire) {
                engine.stats.stale_ticks.fetch_add(1, Ordering::Relaxed);
                metrics::counter!("virtucam_ticks_stale").increment(1);
                continue;
            }

            let started = Instant::now();
            engine.on_tick(tick);
            metrics::histogram!("virtucam_tick_time_us")
                .record(started.elapsed().as_micros() as f64);
        }

        debug!("Tick thread exiting");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{HostTime, PixelFormat};
    use parking_lot::Mutex;

    #[derive(Default)]
    struct HoldingSink {
        held: Mutex<Vec<(TimestampedSample, Discontinuity)>>,
        host_times: Mutex<Vec<u64>>,
    }

    impl SampleSink for HoldingSink {
        fn emit(&self, sample: TimestampedSample, discontinuity: Discontinuity, host: u64) {
            self.host_times.lock().push(host);
            self.held.lock().push((sample, discontinuity));
        }
    }

    fn tick(sequence: u64) -> Tick {
        Tick {
            epoch: 1,
            sequence,
            fired_at: HostTime(sequence * 1_000),
        }
    }

    fn engine(threshold: usize, sink: Arc<HoldingSink>) -> FrameEngine {
        let format = Arc::new(FrameFormat::fixed_rate(8, 32, PixelFormat::Bgra32, 60));
        FrameEngine::new(format, threshold, 4, sink, HostClock::new())
    }

    #[test]
    fn test_tick_emits_sample() {
        let sink = Arc::new(HoldingSink::default());
        let mut engine = engine(5, Arc::clone(&sink));

        assert_eq!(engine.on_tick(tick(1)), TickOutcome::Emitted);
        assert_eq!(engine.on_tick(tick(2)), TickOutcome::Emitted);

        let held = sink.held.lock();
        assert_eq!(held.len(), 2);
        assert!(held[1].0.presentation_time > held[0].0.presentation_time);
        assert_eq!(held[0].1, Discontinuity::NONE);
        assert_eq!(held[1].1, Discontinuity::NONE);
        // First frame has the stripe on rows 0..4
        assert!(held[0].0.buffer.row(0).is_some_and(|r| r[0] == 0xFF));
        assert!(held[0].0.buffer.row(4).is_some_and(|r| r[0] == 0));
        assert_eq!(engine.stats().stripe_row(), 2);
    }

    #[test]
    fn test_exhaustion_skips_and_flags_next_sample() {
        let sink = Arc::new(HoldingSink::default());
        let mut engine = engine(2, Arc::clone(&sink));

        assert_eq!(engine.on_tick(tick(1)), TickOutcome::Emitted);
        assert_eq!(engine.on_tick(tick(2)), TickOutcome::Emitted);
        assert_eq!(engine.on_tick(tick(3)), TickOutcome::Skipped);
        assert_eq!(engine.stats().frames_dropped(), 1);
        // Skipped ticks do not move the stripe
        assert_eq!(engine.synthesizer().stripe_row(), 2);

        // Consumer releases one sample
        sink.held.lock().remove(0);
        assert_eq!(engine.pool().outstanding(), 1);

        assert_eq!(engine.on_tick(tick(4)), TickOutcome::Emitted);
        let held = sink.held.lock();
        let (last, flags) = held.last().expect("sample should be held");
        assert_eq!(last.sequence, 4);
        assert!(flags.contains(Discontinuity::SAMPLE_DROPPED));
        assert_eq!(engine.stats().frames_emitted(), 3);
    }

    #[test]
    fn test_end_to_end_stripe_position() {
        let sink: Arc<dyn SampleSink> = Arc::new(crate::host::NullSink);
        let format = Arc::new(FrameFormat::fixed_rate(1920, 1080, PixelFormat::Bgra32, 60));
        let mut engine = FrameEngine::new(format, 5, 10, sink, HostClock::new());

        for seq in 1..=1070 {
            assert_eq!(engine.on_tick(tick(seq)), TickOutcome::Emitted);
        }
        assert_eq!(engine.synthesizer().stripe_row(), 1070);
        assert_eq!(engine.pool().outstanding(), 0);
    }

    #[test]
    fn test_late_tick_is_stamped_when_built() {
        let sink = Arc::new(HoldingSink::default());
        let mut engine = engine(5, Arc::clone(&sink));

        thread::sleep(std::time::Duration::from_millis(30));
        // Deadline long gone by the time the frame is drawn
        let stale = Tick {
            epoch: 1,
            sequence: 1,
            fired_at: HostTime(0),
        };
        assert_eq!(engine.on_tick(stale), TickOutcome::Emitted);

        let held = sink.held.lock();
        let pts = held[0].0.presentation_time;
        assert!(pts.saturating_sub(stale.fired_at) >= std::time::Duration::from_millis(30));
        assert_eq!(sink.host_times.lock()[0], pts.as_nanos());
    }

    #[test]
    fn test_timestamps_strictly_increase_in_a_burst() {
        let sink = Arc::new(HoldingSink::default());
        let mut engine = engine(64, Arc::clone(&sink));

        for seq in 1..=32 {
            engine.on_tick(tick(seq));
        }
        let held = sink.held.lock();
        assert!(held
            .windows(2)
            .all(|pair| pair[1].0.presentation_time > pair[0].0.presentation_time));
    }
}
