//! Line controller: the single point of mutation for one line.
//!
//! Every mutable field, the driver and the timer engine live behind one
//! per-line lock. Configuration writes and timer ticks both take that lock,
//! and the driver is invoked while it is held, so a tick can never assert a
//! level that a concurrent disable has already overridden.
//!
//! Ticks are fenced with an arming generation: each arm, cancel and teardown
//! bumps it, and a tick whose generation no longer matches does nothing and
//! lets its timer lapse. A tick that is already running holds the lock, so
//! `set_enabled(false)` waits for it to finish; once disable returns no tick
//! touches the driver again.

use crate::attribute::{Attribute, Setting, ValidationError};
use crate::driver::{DriverError, LineDriver};
use crate::pulse::{Level, PulsePattern, PulseState};
use crate::timing::{FirstTick, PeriodMapping, TickHandler, TickOutcome, TimingEngine, TimingStrategy};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, warn};

#[derive(Debug, Error)]
pub enum LineError {
    #[error("invalid value: {0}")]
    Validation(#[from] ValidationError),
    #[error("failed to acquire line driver: {0}")]
    Driver(#[from] DriverError),
    #[error("line '{0}' is already bound")]
    AlreadyBound(String),
    #[error("no line named '{0}'")]
    UnknownLine(String),
    #[error("line name must not be empty")]
    EmptyName,
    #[error("line '{0}' has been torn down")]
    TornDown(String),
}

/// Point-in-time view of a line, as reported to operators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineSnapshot {
    pub name: String,
    pub enabled: bool,
    pub frequency: u32,
    pub on_cycles: u32,
    pub off_cycles: u32,
    pub level: Level,
}

impl LineSnapshot {
    pub fn attribute(&self, attribute: Attribute) -> u32 {
        match attribute {
            Attribute::Enabled => u32::from(self.enabled),
            Attribute::Frequency => self.frequency,
            Attribute::OnCycles => self.on_cycles,
            Attribute::OffCycles => self.off_cycles,
        }
    }
}

/// Copies of the configuration that readers can load without taking the line lock.
/// Only stored to while the lock is held.
#[derive(Debug)]
struct Published {
    enabled: AtomicBool,
    asserted: AtomicBool,
    frequency: AtomicU32,
    on_cycles: AtomicU32,
    off_cycles: AtomicU32,
}

impl Published {
    fn new(pattern: PulsePattern) -> Self {
        Self {
            enabled: AtomicBool::new(false),
            asserted: AtomicBool::new(false),
            frequency: AtomicU32::new(0),
            on_cycles: AtomicU32::new(pattern.on_cycles),
            off_cycles: AtomicU32::new(pattern.off_cycles),
        }
    }
}

struct LineInner {
    enabled: bool,
    frequency: u32,
    period: Duration,
    pattern: PulsePattern,
    pulse: PulseState,
    generation: u64,
    timer: Box<dyn TimingEngine>,
    // None once torn down
    driver: Option<Box<dyn LineDriver>>,
}

struct LineShared {
    name: String,
    published: Published,
    inner: Mutex<LineInner>,
}

impl LineShared {
    fn lock(&self) -> MutexGuard<'_, LineInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_level(&self, inner: &mut LineInner, level: Level) {
        inner.pulse.level = level;
        self.published.asserted.store(level.is_asserted(), Ordering::Relaxed);
        self.drive(inner, level);
    }

    fn drive(&self, inner: &mut LineInner, level: Level) {
        if let Some(driver) = inner.driver.as_mut() {
            if let Err(e) = driver.set_level(level) {
                warn!("line {}: failed to set level {}: {}", self.name, level, e);
            }
        }
    }

    fn disarm(inner: &mut LineInner) {
        inner.generation = inner.generation.wrapping_add(1);
        inner.timer.cancel();
    }

    /// Cancel pulsing and leave the line deasserted.
    fn quiesce(&self, inner: &mut LineInner) {
        Self::disarm(inner);
        inner.enabled = false;
        inner.pulse = PulseState::IDLE;
        self.published.enabled.store(false, Ordering::Relaxed);
        self.set_level(inner, Level::Deasserted);
    }

    fn arm(self: &Arc<Self>, inner: &mut LineInner, first: FirstTick) {
        inner.generation = inner.generation.wrapping_add(1);
        let generation = inner.generation;
        let line = Arc::downgrade(self);
        let handler: TickHandler = Arc::new(move || Self::on_tick(&line, generation));

        if let Err(e) = inner.timer.arm(inner.period, first, handler) {
            warn!("line {}: failed to arm timer: {}", self.name, e);
        }
    }

    fn on_tick(line: &Weak<LineShared>, generation: u64) -> TickOutcome {
        let Some(line) = line.upgrade() else {
            return TickOutcome::Stop;
        };
        let mut inner = line.lock();

        if !inner.enabled
            || inner.generation != generation
            || inner.period.is_zero()
            || inner.driver.is_none()
        {
            debug!("line {}: stale tick ignored", line.name);
            return TickOutcome::Stop;
        }

        match inner.pulse.advance(inner.pattern) {
            Ok(next) => {
                inner.pulse.counter = next.counter;
                line.set_level(&mut inner, next.level);
                TickOutcome::Continue
            }
            Err(fault) => {
                error!("line {}: {}; disabling line", line.name, fault);
                line.quiesce(&mut inner);
                TickOutcome::Stop
            }
        }
    }

    /// Start the current composite period over, at the beginning of the asserted run.
    fn restart_phase(&self, inner: &mut LineInner) {
        inner.pulse.counter = 0;
        if inner.enabled && !inner.period.is_zero() {
            let level = inner.pattern.initial_level();
            self.set_level(inner, level);
        }
    }
}

/// Owns one line's pulse state machine, timer engine and driver.
///
/// Dropping the controller tears the line down.
pub struct LineController {
    shared: Arc<LineShared>,
}

impl LineController {
    /// New line in its default state: disabled, deasserted, no timer, 1/1 pattern.
    pub fn new(name: impl Into<String>, driver: Box<dyn LineDriver>, timer: Box<dyn TimingEngine>) -> Self {
        let pattern = PulsePattern::default();
        Self {
            shared: Arc::new(LineShared {
                name: name.into(),
                published: Published::new(pattern),
                inner: Mutex::new(LineInner {
                    enabled: false,
                    frequency: 0,
                    period: Duration::ZERO,
                    pattern,
                    pulse: PulseState::IDLE,
                    generation: 0,
                    timer,
                    driver: Some(driver),
                }),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    fn lock_live(&self) -> Result<MutexGuard<'_, LineInner>, LineError> {
        let inner = self.shared.lock();
        if inner.driver.is_none() {
            return Err(LineError::TornDown(self.shared.name.clone()));
        }
        Ok(inner)
    }

    /// Enable or disable pulsing.
    ///
    /// Enabling asserts the line immediately, restarts the phase and arms the
    /// timer when the frequency is nonzero. Enabling an enabled line does the
    /// same again. Disabling cancels the timer, waits for any running tick and
    /// leaves the line deasserted.
    ///
    /// # Errors
    ///
    /// Returns [`LineError::TornDown`] after [`LineController::teardown`].
    pub fn set_enabled(&self, enabled: bool) -> Result<(), LineError> {
        let shared = &self.shared;
        let mut inner = self.lock_live()?;

        if enabled {
            inner.pulse = PulseState::START;
            shared.set_level(&mut inner, Level::Asserted);
            inner.enabled = true;
            shared.published.enabled.store(true, Ordering::Relaxed);
            if inner.period.is_zero() {
                LineShared::disarm(&mut inner);
            } else {
                shared.arm(&mut inner, FirstTick::Immediate);
            }
            debug!("line {}: enabled (period {:?})", shared.name, inner.period);
        } else {
            shared.quiesce(&mut inner);
            debug!("line {}: disabled", shared.name);
        }
        Ok(())
    }

    /// Change the pulse frequency in slots per second; `0` means a steady level.
    ///
    /// Does not restart the phase. Returns the mapping actually applied, which
    /// may be clamped to the timing strategy's maximum.
    ///
    /// # Errors
    ///
    /// Returns [`LineError::TornDown`] after [`LineController::teardown`].
    pub fn set_frequency(&self, frequency: u32) -> Result<PeriodMapping, LineError> {
        let shared = &self.shared;
        let mut inner = self.lock_live()?;

        let mapping = inner.timer.period_for(frequency);
        if mapping.clamped {
            warn!(
                "line {}: frequency {} Hz cannot be met; using {} Hz",
                shared.name, frequency, mapping.frequency
            );
        }

        inner.frequency = mapping.frequency;
        inner.period = mapping.period;
        shared.published.frequency.store(mapping.frequency, Ordering::Relaxed);

        if inner.enabled {
            if mapping.is_static() {
                LineShared::disarm(&mut inner);
                shared.set_level(&mut inner, Level::Asserted);
            } else {
                shared.arm(&mut inner, FirstTick::AfterPeriod);
            }
        }

        debug!("line {}: frequency {} Hz, period {:?}", shared.name, inner.frequency, inner.period);
        Ok(mapping)
    }

    /// Set the length of the asserted run. Restarts the phase.
    ///
    /// # Errors
    ///
    /// Returns [`LineError::TornDown`] after [`LineController::teardown`].
    pub fn set_on_cycles(&self, on_cycles: u32) -> Result<(), LineError> {
        let shared = &self.shared;
        let mut inner = self.lock_live()?;
        inner.pattern.on_cycles = on_cycles;
        shared.published.on_cycles.store(on_cycles, Ordering::Relaxed);
        shared.restart_phase(&mut inner);
        debug!("line {}: on_cycles {}", shared.name, on_cycles);
        Ok(())
    }

    /// Set the length of the deasserted run. Restarts the phase.
    ///
    /// # Errors
    ///
    /// Returns [`LineError::TornDown`] after [`LineController::teardown`].
    pub fn set_off_cycles(&self, off_cycles: u32) -> Result<(), LineError> {
        let shared = &self.shared;
        let mut inner = self.lock_live()?;
        inner.pattern.off_cycles = off_cycles;
        shared.published.off_cycles.store(off_cycles, Ordering::Relaxed);
        shared.restart_phase(&mut inner);
        debug!("line {}: off_cycles {}", shared.name, off_cycles);
        Ok(())
    }

    /// # Errors
    ///
    /// Returns [`LineError::TornDown`] after [`LineController::teardown`].
    pub fn apply(&self, setting: Setting) -> Result<(), LineError> {
        match setting {
            Setting::Enabled(enabled) => self.set_enabled(enabled),
            Setting::Frequency(frequency) => self.set_frequency(frequency).map(|_| ()),
            Setting::OnCycles(on_cycles) => self.set_on_cycles(on_cycles),
            Setting::OffCycles(off_cycles) => self.set_off_cycles(off_cycles),
        }
    }

    /// Validate and apply a raw textual write. Nothing changes if validation fails.
    ///
    /// # Errors
    ///
    /// Returns [`LineError::Validation`] for malformed values and
    /// [`LineError::TornDown`] after [`LineController::teardown`].
    pub fn write_attribute(&self, attribute: Attribute, raw: &str) -> Result<(), LineError> {
        let setting = attribute.parse_value(raw)?;
        self.apply(setting)
    }

    pub fn read_attribute(&self, attribute: Attribute) -> u32 {
        self.snapshot().attribute(attribute)
    }

    /// Last applied configuration. Never blocks on the line lock.
    pub fn snapshot(&self) -> LineSnapshot {
        let published = &self.shared.published;
        LineSnapshot {
            name: self.shared.name.clone(),
            enabled: published.enabled.load(Ordering::Relaxed),
            frequency: published.frequency.load(Ordering::Relaxed),
            on_cycles: published.on_cycles.load(Ordering::Relaxed),
            off_cycles: published.off_cycles.load(Ordering::Relaxed),
            level: Level::from(published.asserted.load(Ordering::Relaxed)),
        }
    }

    pub fn pulse_state(&self) -> PulseState {
        self.shared.lock().pulse
    }

    pub fn period(&self) -> Duration {
        self.shared.lock().period
    }

    pub fn timing_strategy(&self) -> TimingStrategy {
        self.shared.lock().timer.strategy()
    }

    pub fn timer_armed(&self) -> bool {
        self.shared.lock().timer.is_armed()
    }

    pub fn is_torn_down(&self) -> bool {
        self.shared.lock().driver.is_none()
    }

    /// Stop the timer, deassert the line and release the driver, in that order.
    ///
    /// Waits for a running tick to finish. Safe to call more than once.
    pub fn teardown(&self) {
        let shared = &self.shared;
        let mut inner = shared.lock();
        if inner.driver.is_none() {
            return;
        }

        shared.quiesce(&mut inner);
        inner.driver = None;
        info!("line {}: released", shared.name);
    }
}

impl Drop for LineController {
    fn drop(&mut self) {
        self.teardown();
    }
}

impl core::fmt::Debug for LineController {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("LineController")
            .field("name", &self.shared.name)
            .field("snapshot", &self.snapshot())
            .finish()
    }
}

static_assertions::assert_impl_all!(LineController: Send, Sync);
