//! Tick scheduler behavior under paused tokio time.

use std::time::Duration;

use colonylink_tick::{TickConfig, TickPolicy, TickScheduler};

// =========================================================================
// Helpers
// =========================================================================

fn no_jitter(rate: u32) -> TickConfig {
    TickConfig {
        initial_jitter_us: 0,
        ..TickConfig::with_rate(rate)
    }
}

// =========================================================================
// TickConfig
// =========================================================================

#[test]
fn test_default_config_polls_at_thirty_hz() {
    let cfg = TickConfig::default();
    assert_eq!(cfg.tick_rate_hz, 30);
    assert_eq!(cfg.policy, TickPolicy::Skip);
}

#[test]
fn test_tick_duration_zero_rate_is_manual() {
    assert_eq!(TickConfig::with_rate(0).tick_duration(), None);
}

#[test]
fn test_tick_duration_twenty_hz_is_fifty_ms() {
    assert_eq!(
        TickConfig::with_rate(20).tick_duration(),
        Some(Duration::from_millis(50))
    );
}

#[test]
fn test_validated_clamps_rate_and_threshold() {
    let cfg = TickConfig {
        tick_rate_hz: 1000,
        budget_warn_threshold: 3.0,
        ..TickConfig::default()
    }
    .validated();
    assert_eq!(cfg.tick_rate_hz, TickConfig::MAX_TICK_RATE_HZ);
    assert_eq!(cfg.budget_warn_threshold, 1.0);
}

// =========================================================================
// Firing
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_wait_for_tick_counts_from_one() {
    let mut s = TickScheduler::new(no_jitter(20));
    for expected in 1..=4 {
        let info = s.wait_for_tick().await;
        assert_eq!(info.tick, expected);
        assert!(!info.overrun);
    }
    assert_eq!(s.tick_count(), 4);
    assert_eq!(s.metrics().total_ticks, 4);
}

#[tokio::test(start_paused = true)]
async fn test_manual_mode_never_fires() {
    let mut s = TickScheduler::new(no_jitter(0));
    assert!(s.is_manual());
    let result = tokio::time::timeout(Duration::from_secs(5), s.wait_for_tick()).await;
    assert!(result.is_err());
}

#[tokio::test(start_paused = true)]
async fn test_skip_policy_reports_lost_slots() {
    let mut s = TickScheduler::new(no_jitter(20));
    s.wait_for_tick().await;

    // Stall the loop for several slots.
    tokio::time::advance(Duration::from_millis(250)).await;

    let info = s.wait_for_tick().await;
    assert!(info.overrun);
    assert!(info.ticks_skipped >= 3, "skipped {}", info.ticks_skipped);
    assert_eq!(s.metrics().total_overruns, 1);
}

#[tokio::test(start_paused = true)]
async fn test_drop_policy_never_reports_skips() {
    let mut s = TickScheduler::new(TickConfig {
        policy: TickPolicy::Drop,
        ..no_jitter(20)
    });
    s.wait_for_tick().await;
    tokio::time::advance(Duration::from_millis(250)).await;
    let info = s.wait_for_tick().await;
    assert_eq!(info.ticks_skipped, 0);
}

// =========================================================================
// Pause / resume
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_pause_holds_ticks_until_resume() {
    let mut s = TickScheduler::new(no_jitter(20));
    s.wait_for_tick().await;

    s.pause();
    s.pause();
    assert!(s.is_paused());
    let held = tokio::time::timeout(Duration::from_secs(1), s.wait_for_tick()).await;
    assert!(held.is_err());

    s.resume();
    assert!(!s.is_paused());
    assert_eq!(s.wait_for_tick().await.tick, 2);
}

// =========================================================================
// Step timing
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_record_tick_end_without_tick_is_noop() {
    let mut s = TickScheduler::new(no_jitter(20));
    s.record_tick_end();
    assert_eq!(s.metrics().max_tick_time, Duration::ZERO);
}

#[tokio::test(start_paused = true)]
async fn test_record_tick_end_tracks_wall_clock_step() {
    let mut s = TickScheduler::new(no_jitter(20));
    s.wait_for_tick().await;
    std::thread::sleep(Duration::from_micros(50));
    s.record_tick_end();

    let m = s.metrics();
    assert!(m.max_tick_time >= Duration::from_micros(50));
}

// =========================================================================
// select! loop, as the demo drives a node
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_select_loop_steps_until_shutdown() {
    let mut s = TickScheduler::new(no_jitter(20));
    let (tx, mut rx) = tokio::sync::mpsc::channel::<()>(1);

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(160)).await;
        tx.send(()).await.ok();
    });

    let mut steps = 0u64;
    loop {
        tokio::select! {
            Some(()) = rx.recv() => break,
            info = s.wait_for_tick() => {
                steps += 1;
                assert_eq!(info.tick, steps);
                s.record_tick_end();
            }
        }
    }
    assert!(steps >= 3, "expected at least 3 steps, got {steps}");
}
