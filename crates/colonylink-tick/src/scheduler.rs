use std::time::{Duration, Instant};

use rand::Rng;
use tokio::time::{self, Instant as TokioInstant};
use tracing::{debug, trace, warn};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// What to do when a loop step ran past its slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TickPolicy {
    /// Forget the missed slots and schedule the next tick from now.
    #[default]
    Skip,
    /// Keep the original cadence; the next tick may fire immediately.
    Drop,
}

/// Pacing for the node's polling loop.
#[derive(Debug, Clone)]
pub struct TickConfig {
    /// Ticks per second. 0 means manual mode: the scheduler never fires and
    /// the caller drives `Node::tick` itself.
    pub tick_rate_hz: u32,
    pub policy: TickPolicy,
    /// Fraction of the tick slot (0.0–1.0) above which a step is logged as
    /// slow.
    pub budget_warn_threshold: f64,
    /// Random delay (0..max µs) added to the first tick so that nodes
    /// started together do not poll in lockstep.
    pub initial_jitter_us: u64,
}

impl Default for TickConfig {
    fn default() -> Self {
        Self {
            tick_rate_hz: 30,
            policy: TickPolicy::default(),
            budget_warn_threshold: 0.80,
            initial_jitter_us: 2_000,
        }
    }
}

impl TickConfig {
    pub const MAX_TICK_RATE_HZ: u32 = 128;

    pub fn with_rate(tick_rate_hz: u32) -> Self {
        Self {
            tick_rate_hz,
            ..Default::default()
        }
    }

    /// Clamps out-of-range values. Applied by [`TickScheduler::new`].
    pub fn validated(mut self) -> Self {
        if self.tick_rate_hz > Self::MAX_TICK_RATE_HZ {
            warn!(
                rate = self.tick_rate_hz,
                max = Self::MAX_TICK_RATE_HZ,
                "tick_rate_hz above maximum, clamping"
            );
            self.tick_rate_hz = Self::MAX_TICK_RATE_HZ;
        }
        self.budget_warn_threshold = self.budget_warn_threshold.clamp(0.0, 1.0);
        self
    }

    /// Length of one tick slot, `None` in manual mode.
    pub fn tick_duration(&self) -> Option<Duration> {
        (self.tick_rate_hz > 0).then(|| Duration::from_secs_f64(1.0 / f64::from(self.tick_rate_hz)))
    }
}

// ---------------------------------------------------------------------------
// TickInfo / metrics
// ---------------------------------------------------------------------------

/// Returned by [`TickScheduler::wait_for_tick`].
#[derive(Debug, Clone)]
pub struct TickInfo {
    /// Starts at 1 and never repeats.
    pub tick: u64,
    /// `true` if the scheduler woke up more than 10% of a slot late.
    pub overrun: bool,
    /// Whole slots lost to the overrun (always 0 under [`TickPolicy::Drop`]).
    pub ticks_skipped: u64,
}

#[derive(Debug, Clone, Default)]
pub struct TickMetrics {
    pub total_ticks: u64,
    pub total_overruns: u64,
    /// Longest step reported through [`TickScheduler::record_tick_end`].
    pub max_tick_time: Duration,
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

/// Paces a node's polling loop at a fixed rate.
///
/// ```ignore
/// loop {
///     tokio::select! {
///         _ = shutdown.recv() => break,
///         _ = scheduler.wait_for_tick() => {
///             node.tick(Instant::now());
///             scheduler.record_tick_end();
///         }
///     }
/// }
/// ```
pub struct TickScheduler {
    config: TickConfig,
    slot: Option<Duration>,
    tick_count: u64,
    next_tick: Option<TokioInstant>,
    /// Wall-clock start of the current step, consumed by `record_tick_end`.
    step_started: Option<Instant>,
    paused: bool,
    metrics: TickMetrics,
}

impl TickScheduler {
    pub fn new(config: TickConfig) -> Self {
        let config = config.validated();
        let slot = config.tick_duration();

        let next_tick = slot.map(|d| {
            let jitter = if config.initial_jitter_us > 0 {
                Duration::from_micros(rand::rng().random_range(0..config.initial_jitter_us))
            } else {
                Duration::ZERO
            };
            TokioInstant::now() + d + jitter
        });

        match slot {
            None => debug!("tick scheduler in manual mode"),
            Some(d) => debug!(
                rate_hz = config.tick_rate_hz,
                slot_ms = d.as_secs_f64() * 1000.0,
                policy = ?config.policy,
                "tick scheduler created"
            ),
        }

        Self {
            config,
            slot,
            tick_count: 0,
            next_tick,
            step_started: None,
            paused: false,
            metrics: TickMetrics::default(),
        }
    }

    pub fn with_rate(tick_rate_hz: u32) -> Self {
        Self::new(TickConfig::with_rate(tick_rate_hz))
    }

    /// Resolves when the next tick is due.
    ///
    /// Pends forever in manual mode or while paused, which lets it sit in a
    /// `tokio::select!` next to other branches.
    pub async fn wait_for_tick(&mut self) -> TickInfo {
        let (next, slot) = match (self.next_tick, self.slot) {
            (Some(next), Some(slot)) if !self.paused => (next, slot),
            _ => std::future::pending().await,
        };

        time::sleep_until(next).await;

        let now = TokioInstant::now();
        self.tick_count += 1;
        self.step_started = Some(Instant::now());

        let late_by = now.saturating_duration_since(next);
        let overrun = late_by > slot / 10;
        let mut ticks_skipped = 0;

        self.next_tick = Some(match self.config.policy {
            TickPolicy::Skip => {
                if overrun {
                    ticks_skipped = (late_by.as_nanos() / slot.as_nanos()) as u64;
                    if ticks_skipped > 0 {
                        warn!(
                            tick = self.tick_count,
                            skipped = ticks_skipped,
                            late_ms = late_by.as_secs_f64() * 1000.0,
                            "polling loop fell behind, skipping ahead"
                        );
                    }
                }
                now + slot
            }
            TickPolicy::Drop => next + slot,
        });

        if overrun {
            self.metrics.total_overruns += 1;
        }
        self.metrics.total_ticks += 1;
        trace!(tick = self.tick_count, overrun, "tick");

        TickInfo {
            tick: self.tick_count,
            overrun,
            ticks_skipped,
        }
    }

    /// Marks the end of the step started by the last `wait_for_tick`.
    ///
    /// Without this call no slow-step warnings are produced.
    pub fn record_tick_end(&mut self) {
        let Some(start) = self.step_started.take() else {
            return;
        };
        let elapsed = start.elapsed();
        self.metrics.max_tick_time = self.metrics.max_tick_time.max(elapsed);

        if let Some(slot) = self.slot {
            let utilization = elapsed.as_secs_f64() / slot.as_secs_f64();
            if utilization >= self.config.budget_warn_threshold {
                warn!(
                    tick = self.tick_count,
                    elapsed_ms = elapsed.as_secs_f64() * 1000.0,
                    slot_ms = slot.as_secs_f64() * 1000.0,
                    "slow polling step"
                );
            }
        }
    }

    pub fn pause(&mut self) {
        if !self.paused {
            self.paused = true;
            debug!(tick = self.tick_count, "tick scheduler paused");
        }
    }

    /// Resumes one slot from now, so no burst of ticks follows a pause.
    pub fn resume(&mut self) {
        if self.paused {
            self.paused = false;
            self.next_tick = self.slot.map(|d| TokioInstant::now() + d);
            debug!(tick = self.tick_count, "tick scheduler resumed");
        }
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn is_manual(&self) -> bool {
        self.slot.is_none()
    }

    pub fn tick_count(&self) -> u64 {
        self.tick_count
    }

    pub fn metrics(&self) -> &TickMetrics {
        &self.metrics
    }

    pub fn tick_rate_hz(&self) -> u32 {
        self.config.tick_rate_hz
    }

    pub fn tick_duration(&self) -> Option<Duration> {
        self.slot
    }
}
