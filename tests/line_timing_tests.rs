use gpioman::driver::{DriverError, LevelProbe, LineDriver, MockLineDriver};
use gpioman::pulse::Level::{Asserted as A, Deasserted as D};
use gpioman::*;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

fn bind_mock(registry: &Registry, name: &str) -> (Arc<LineController>, LevelProbe) {
    let (driver, probe) = MockLineDriver::new();
    let line = registry
        .bind(name, move || Ok::<Box<dyn LineDriver>, DriverError>(Box::new(driver)))
        .unwrap();
    (line, probe)
}

#[tokio::test(start_paused = true)]
async fn test_fine_timer_square_wave() {
    let registry = Registry::new(TimingConfig::fine());
    let (led, probe) = bind_mock(&registry, "led0");

    led.set_frequency(100).unwrap();
    led.set_enabled(true).unwrap();
    assert!(led.timer_armed());

    // ticks at 0, 10, 20 and 30ms
    sleep(Duration::from_millis(35)).await;
    assert_eq!(probe.history(), vec![A, A, D, A, D]);
}

#[tokio::test(start_paused = true)]
async fn test_fine_timer_three_on_one_off() {
    let registry = Registry::new(TimingConfig::fine());
    let (led, probe) = bind_mock(&registry, "led0");

    led.set_frequency(100).unwrap();
    led.set_on_cycles(3).unwrap();
    led.set_off_cycles(1).unwrap();
    assert_eq!(probe.count(), 0);

    led.set_enabled(true).unwrap();
    sleep(Duration::from_millis(75)).await;

    assert_eq!(probe.history(), vec![A, A, A, A, D, A, A, A, D]);
}

#[tokio::test(start_paused = true)]
async fn test_coarse_timer_square_wave() {
    let registry = Registry::new(TimingConfig::coarse(250));
    let (led, probe) = bind_mock(&registry, "led0");

    led.set_frequency(50).unwrap();
    assert_eq!(led.period(), Duration::from_millis(20));
    assert_eq!(led.timing_strategy(), TimingStrategy::Coarse);

    led.set_enabled(true).unwrap();
    sleep(Duration::from_millis(50)).await;

    assert_eq!(probe.history(), vec![A, A, D, A]);
}

#[tokio::test(start_paused = true)]
async fn test_disable_stops_all_ticks() {
    let registry = Registry::new(TimingConfig::fine());
    let (led, probe) = bind_mock(&registry, "led0");

    led.set_frequency(100).unwrap();
    led.set_enabled(true).unwrap();
    sleep(Duration::from_millis(25)).await;

    led.set_enabled(false).unwrap();
    let count = probe.count();
    assert_eq!(probe.last(), Some(D));
    assert!(!led.timer_armed());

    sleep(Duration::from_millis(100)).await;
    assert_eq!(probe.count(), count);
    assert_eq!(led.snapshot().level, D);
}

#[tokio::test(start_paused = true)]
async fn test_double_enable_keeps_a_single_timer() {
    let registry = Registry::new(TimingConfig::fine());
    let (led, probe) = bind_mock(&registry, "led0");

    led.set_frequency(100).unwrap();
    led.set_enabled(true).unwrap();
    led.set_enabled(true).unwrap();
    assert_eq!(probe.history(), vec![A, A]);

    sleep(Duration::from_millis(5)).await;
    assert_eq!(probe.history(), vec![A, A, A]);
}

#[tokio::test(start_paused = true)]
async fn test_frequency_change_keeps_phase_and_waits_one_period() {
    let registry = Registry::new(TimingConfig::fine());
    let (led, probe) = bind_mock(&registry, "led0");

    led.set_frequency(100).unwrap();
    led.set_on_cycles(4).unwrap();
    led.set_off_cycles(4).unwrap();
    led.set_enabled(true).unwrap();
    sleep(Duration::from_millis(15)).await;

    let before = led.pulse_state();
    assert_eq!(before, PulseState::new(A, 2));

    led.set_frequency(20).unwrap();
    assert_eq!(led.pulse_state(), before);

    sleep(Duration::from_millis(45)).await;
    assert_eq!(probe.count(), 3);

    sleep(Duration::from_millis(10)).await;
    assert_eq!(probe.count(), 4);
    assert_eq!(led.pulse_state(), PulseState::new(A, 3));
}

#[tokio::test(start_paused = true)]
async fn test_zero_frequency_holds_line_asserted() {
    let registry = Registry::new(TimingConfig::fine());
    let (led, probe) = bind_mock(&registry, "led0");

    led.set_frequency(100).unwrap();
    led.set_enabled(true).unwrap();
    sleep(Duration::from_millis(15)).await;
    assert_eq!(probe.last(), Some(D));

    led.set_frequency(0).unwrap();
    assert_eq!(probe.last(), Some(A));
    assert!(!led.timer_armed());

    let count = probe.count();
    sleep(Duration::from_millis(100)).await;
    assert_eq!(probe.count(), count);
    assert!(led.snapshot().enabled);
}

#[tokio::test(start_paused = true)]
async fn test_enable_at_zero_frequency_is_static() {
    let registry = Registry::new(TimingConfig::coarse(250));
    let (led, probe) = bind_mock(&registry, "led0");

    led.set_enabled(true).unwrap();
    assert!(!led.timer_armed());

    sleep(Duration::from_secs(1)).await;
    assert_eq!(probe.history(), vec![A]);
}

#[tokio::test(start_paused = true)]
async fn test_coarse_clamp_reports_applied_frequency() {
    let registry = Registry::new(TimingConfig::coarse(250));
    let (led, _probe) = bind_mock(&registry, "led0");

    let mapping = led.set_frequency(1000).unwrap();
    assert!(mapping.clamped);
    assert_eq!(led.read_attribute(Attribute::Frequency), 250);
    assert_eq!(led.period(), Duration::from_millis(4));
}

#[tokio::test(start_paused = true)]
async fn test_unbind_while_pulsing_leaves_line_deasserted() {
    let registry = Registry::new(TimingConfig::fine());
    let (led, probe) = bind_mock(&registry, "led0");

    led.set_frequency(100).unwrap();
    led.set_enabled(true).unwrap();
    sleep(Duration::from_millis(5)).await;

    registry.unbind("led0").unwrap();
    let count = probe.count();
    assert_eq!(probe.last(), Some(D));

    sleep(Duration::from_millis(100)).await;
    assert_eq!(probe.count(), count);
    assert!(led.is_torn_down());
}

#[tokio::test(start_paused = true)]
async fn test_lines_pulse_independently() {
    let registry = Registry::new(TimingConfig::fine());
    let (fast, fast_probe) = bind_mock(&registry, "fast");
    let (slow, slow_probe) = bind_mock(&registry, "slow");

    fast.set_frequency(100).unwrap();
    slow.set_frequency(25).unwrap();
    fast.set_enabled(true).unwrap();
    slow.set_enabled(true).unwrap();

    // fast ticks at 0..=90ms, slow at 0, 40 and 80ms
    sleep(Duration::from_millis(95)).await;
    assert_eq!(fast_probe.count(), 11);
    assert_eq!(slow_probe.history(), vec![A, A, D, A]);

    slow.set_enabled(false).unwrap();
    sleep(Duration::from_millis(20)).await;
    assert_eq!(fast_probe.count(), 13);
}

#[test]
fn test_enable_without_runtime_still_applies_level() {
    let registry = Registry::new(TimingConfig::fine());
    let (led, probe) = bind_mock(&registry, "led0");

    led.set_frequency(100).unwrap();
    led.set_enabled(true).unwrap();

    assert!(!led.timer_armed());
    assert!(led.snapshot().enabled);
    assert_eq!(probe.history(), vec![A]);
}

#[test]
fn test_failing_driver_does_not_block_configuration() {
    let registry = Registry::new(TimingConfig::default());
    let (driver, probe) = MockLineDriver::failing();
    let led = registry
        .bind("led0", move || Ok::<Box<dyn LineDriver>, DriverError>(Box::new(driver)))
        .unwrap();

    led.set_enabled(true).unwrap();
    led.set_on_cycles(2).unwrap();

    let snapshot = led.snapshot();
    assert!(snapshot.enabled);
    assert_eq!(snapshot.on_cycles, 2);
    assert_eq!(probe.count(), 0);
}
