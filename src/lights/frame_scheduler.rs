//! The frame thread.
//!
//! Runs at the highest thread priority we can get, like the audio thread on a
//! jam unit, and ticks at a fixed rate no matter what the network is doing.
//! A late tick is never made up with a burst: missed ticks are counted and
//! skipped.  The thread sleeps on its stop channel, so [`FrameScheduler::stop`]
//! wakes it immediately.
use log::{debug, error, info, warn};
use simple_error::bail;
use std::{
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        mpsc::{self, RecvTimeoutError},
        Arc,
    },
    thread,
    time::{Duration, Instant},
};
use thread_priority::{ThreadBuilder, ThreadPriority};

use super::{
    compositor::LedCompositor,
    output_sink::{OutputSink, SinkError},
};
use crate::common::{box_error::BoxError, get_stamp, stream_time_stat::StreamTimeStat};
use crate::state::state_store::StateStore;

pub const DEFAULT_FRAME_RATE: u32 = 40;
pub const MAX_FRAME_RATE: u32 = 240;
const STATS_INTERVAL: u64 = 10_000_000;

#[derive(Debug, Default)]
pub struct SchedulerStats {
    frames_emitted: AtomicU64,
    frames_skipped: AtomicU64,
    sink_errors: AtomicU64,
}

impl SchedulerStats {
    pub fn get_frames_emitted(&self) -> u64 {
        self.frames_emitted.load(Ordering::Relaxed)
    }
    /// missed ticks plus compositor overruns
    pub fn get_frames_skipped(&self) -> u64 {
        self.frames_skipped.load(Ordering::Relaxed)
    }
    pub fn get_sink_errors(&self) -> u64 {
        self.sink_errors.load(Ordering::Relaxed)
    }
}

pub struct FrameScheduler {
    stop_tx: Option<mpsc::Sender<()>>,
    handle: Option<thread::JoinHandle<()>>,
    stats: Arc<SchedulerStats>,
    running: Arc<AtomicBool>,
    interval: u64,
}

impl FrameScheduler {
    /// Start ticking at `rate_hz` (1 ..= 240).  The sink belongs to the frame
    /// thread from here on and is dropped when it stops.
    pub fn start(
        store: StateStore,
        compositor: LedCompositor,
        sink: Box<dyn OutputSink>,
        rate_hz: u32,
    ) -> Result<FrameScheduler, BoxError> {
        if rate_hz == 0 || rate_hz > MAX_FRAME_RATE {
            bail!("frame rate {} Hz outside 1..={}", rate_hz, MAX_FRAME_RATE);
        }
        let interval = 1_000_000 / rate_hz as u64;
        let (stop_tx, stop_rx) = mpsc::channel();
        let stats = Arc::new(SchedulerStats::default());
        let running = Arc::new(AtomicBool::new(true));

        let frame_loop = FrameLoop {
            store,
            compositor,
            sink,
            interval,
            stats: Arc::clone(&stats),
        };
        let thread_running = Arc::clone(&running);
        let builder = ThreadBuilder::default()
            .name("frame_scheduler".to_string())
            .priority(ThreadPriority::Max);
        let handle = builder.spawn(move |result| {
            if let Err(e) = result {
                debug!("frame thread running at normal priority: {:?}", e);
            }
            frame_loop.run(stop_rx);
            thread_running.store(false, Ordering::SeqCst);
        })?;
        info!("frame scheduler started at {} Hz", rate_hz);
        Ok(FrameScheduler {
            stop_tx: Some(stop_tx),
            handle: Some(handle),
            stats,
            running,
            interval,
        })
    }

    pub fn stats(&self) -> Arc<SchedulerStats> {
        Arc::clone(&self.stats)
    }

    /// tick length in usec
    pub fn get_interval(&self) -> u64 {
        self.interval
    }

    /// false once stopped, or once the sink went away
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn stop(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _res = stop_tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("frame thread panicked");
            }
            info!(
                "frame scheduler stopped: {} emitted, {} skipped, {} sink errors",
                self.stats.get_frames_emitted(),
                self.stats.get_frames_skipped(),
                self.stats.get_sink_errors()
            );
        }
    }
}

impl Drop for FrameScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

struct FrameLoop {
    store: StateStore,
    compositor: LedCompositor,
    sink: Box<dyn OutputSink>,
    interval: u64,
    stats: Arc<SchedulerStats>,
}

impl FrameLoop {
    fn run(mut self, stop_rx: mpsc::Receiver<()>) {
        let mut tick_stat = StreamTimeStat::build(100);
        let mut last_state = self.store.snapshot();
        let interval = Duration::from_micros(self.interval);
        // ticks run on the monotonic clock, a wall clock step must not stall the strip
        let mut next_tick = Instant::now();
        let mut next_report = next_tick + Duration::from_micros(STATS_INTERVAL);
        loop {
            let wait = next_tick.saturating_duration_since(Instant::now());
            match stop_rx.recv_timeout(wait) {
                Err(RecvTimeoutError::Timeout) => {}
                Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            }
            let tick_start = Instant::now();
            let late = tick_start.saturating_duration_since(next_tick).as_micros() as u64;
            if late >= self.interval {
                let missed = late / self.interval;
                self.stats.frames_skipped.fetch_add(missed, Ordering::Relaxed);
                next_tick += interval * missed as u32;
            }
            next_tick += interval;
            // layers animate on the wall clock so units sweep together
            let now = get_stamp();

            // a writer mid swap just means we draw the previous state once more
            if let Some(state) = self.store.try_snapshot() {
                last_state = state;
            }
            match self.compositor.compose(&last_state, now) {
                Some(frame) => match self.sink.write(&frame) {
                    Ok(()) => {
                        self.stats.frames_emitted.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(SinkError::Detached) => {
                        self.stats.sink_errors.fetch_add(1, Ordering::Relaxed);
                        error!("{}, frame scheduler stopping", SinkError::Detached);
                        break;
                    }
                    Err(e) => {
                        self.stats.sink_errors.fetch_add(1, Ordering::Relaxed);
                        warn!("{}", e);
                    }
                },
                None => {
                    self.stats.frames_skipped.fetch_add(1, Ordering::Relaxed);
                }
            }
            tick_stat.add_sample(tick_start.elapsed().as_micros() as f64);
            if tick_start >= next_report {
                next_report = tick_start + Duration::from_micros(STATS_INTERVAL);
                debug!(
                    "frame tick usec {} emitted: {} skipped: {}",
                    tick_stat,
                    self.stats.get_frames_emitted(),
                    self.stats.get_frames_skipped()
                );
            }
        }
    }
}
