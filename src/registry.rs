//! Registry of bound lines.
//!
//! Mutated only when lines are bound or unbound, never while they pulse. The
//! registry lock is separate from every line's own lock and is released
//! before a removed line is torn down.

use crate::controller::{LineController, LineError, LineSnapshot};
use crate::driver::{DriverError, LineDriver};
use crate::timing::TimingConfig;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::runtime::Handle;
use tracing::{info, warn};

pub struct Registry {
    lines: Mutex<BTreeMap<String, Arc<LineController>>>,
    timing: TimingConfig,
    runtime: Option<Handle>,
}

impl Registry {
    /// Uses the ambient tokio runtime, if any, to run line timers.
    pub fn new(timing: TimingConfig) -> Self {
        Self {
            lines: Mutex::new(BTreeMap::new()),
            timing,
            runtime: Handle::try_current().ok(),
        }
    }

    pub fn with_runtime(timing: TimingConfig, runtime: Handle) -> Self {
        Self {
            lines: Mutex::new(BTreeMap::new()),
            timing,
            runtime: Some(runtime),
        }
    }

    pub fn timing(&self) -> TimingConfig {
        self.timing
    }

    fn lines(&self) -> MutexGuard<'_, BTreeMap<String, Arc<LineController>>> {
        self.lines.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a new line under `name`, acquiring its driver through `acquire`.
    ///
    /// The driver is only acquired once the name is known to be free. The new
    /// line starts disabled and deasserted.
    ///
    /// # Errors
    ///
    /// Returns [`LineError::EmptyName`] or [`LineError::AlreadyBound`] for bad
    /// names, and [`LineError::Driver`] if the driver cannot be acquired. In
    /// every error case nothing is registered.
    pub fn bind<F>(&self, name: &str, acquire: F) -> Result<Arc<LineController>, LineError>
    where
        F: FnOnce() -> Result<Box<dyn LineDriver>, DriverError>,
    {
        if name.is_empty() {
            return Err(LineError::EmptyName);
        }

        let mut lines = self.lines();
        if lines.contains_key(name) {
            return Err(LineError::AlreadyBound(name.to_string()));
        }

        let driver = acquire().map_err(|e| {
            warn!("failed to acquire driver for line {}: {}", name, e);
            LineError::Driver(e)
        })?;

        let timer = self.timing.build_engine(self.runtime.clone());
        let controller = Arc::new(LineController::new(name, driver, timer));
        lines.insert(name.to_string(), Arc::clone(&controller));

        info!("bound line '{}' ({:?} timing)", name, self.timing.strategy);
        Ok(controller)
    }

    /// Remove a line and tear it down: timer stopped, line deasserted, driver released.
    ///
    /// # Errors
    ///
    /// Returns [`LineError::UnknownLine`] if no line has that name.
    pub fn unbind(&self, name: &str) -> Result<(), LineError> {
        let controller = self
            .lines()
            .remove(name)
            .ok_or_else(|| LineError::UnknownLine(name.to_string()))?;

        controller.teardown();
        info!("unbound line '{}'", name);
        Ok(())
    }

    /// # Errors
    ///
    /// Returns [`LineError::UnknownLine`] if no line has that name.
    pub fn get(&self, name: &str) -> Result<Arc<LineController>, LineError> {
        self.lines()
            .get(name)
            .cloned()
            .ok_or_else(|| LineError::UnknownLine(name.to_string()))
    }

    pub fn names(&self) -> Vec<String> {
        self.lines().keys().cloned().collect()
    }

    pub fn snapshots(&self) -> Vec<LineSnapshot> {
        let controllers: Vec<_> = self.lines().values().cloned().collect();
        controllers.iter().map(|c| c.snapshot()).collect()
    }

    pub fn len(&self) -> usize {
        self.lines().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines().is_empty()
    }

    /// Tear down every line and empty the registry.
    pub fn teardown_all(&self) {
        let drained = std::mem::take(&mut *self.lines());
        for (name, controller) in drained {
            controller.teardown();
            info!("unbound line '{}'", name);
        }
    }
}

impl Drop for Registry {
    fn drop(&mut self) {
        self.teardown_all();
    }
}

impl core::fmt::Debug for Registry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Registry")
            .field("timing", &self.timing)
            .field("lines", &self.names())
            .finish()
    }
}

static_assertions::assert_impl_all!(Registry: Send, Sync);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::MockLineDriver;
    use crate::pulse::Level;

    fn boxed(driver: MockLineDriver) -> Result<Box<dyn LineDriver>, DriverError> {
        Ok(Box::new(driver))
    }

    #[test]
    fn test_bind_and_lookup() {
        let registry = Registry::new(TimingConfig::default());
        let (driver, _probe) = MockLineDriver::new();
        registry.bind("led0", move || boxed(driver)).unwrap();

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.names(), vec!["led0".to_string()]);
        assert_eq!(registry.get("led0").unwrap().name(), "led0");
        assert!(matches!(registry.get("led1"), Err(LineError::UnknownLine(_))));
    }

    #[test]
    fn test_duplicate_name_rejected_without_acquiring() {
        let registry = Registry::new(TimingConfig::default());
        let (first, _) = MockLineDriver::new();
        registry.bind("led0", move || boxed(first)).unwrap();

        let mut acquired = false;
        let result = registry.bind("led0", || {
            acquired = true;
            boxed(MockLineDriver::new().0)
        });

        assert!(matches!(result, Err(LineError::AlreadyBound(_))));
        assert!(!acquired);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_driver_failure_registers_nothing() {
        let registry = Registry::new(TimingConfig::default());
        let result = registry.bind("led0", || Err(DriverError::Unavailable("no such pin".into())));

        assert!(matches!(result, Err(LineError::Driver(_))));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_empty_name_rejected() {
        let registry = Registry::new(TimingConfig::default());
        let result = registry.bind("", || boxed(MockLineDriver::new().0));
        assert!(matches!(result, Err(LineError::EmptyName)));
    }

    #[test]
    fn test_unbind_tears_line_down() {
        let registry = Registry::new(TimingConfig::default());
        let (driver, probe) = MockLineDriver::new();
        let line = registry.bind("led0", move || boxed(driver)).unwrap();
        line.set_enabled(true).unwrap();

        registry.unbind("led0").unwrap();
        assert!(registry.is_empty());
        assert!(line.is_torn_down());
        assert_eq!(probe.last(), Some(Level::Deasserted));
        assert!(matches!(registry.unbind("led0"), Err(LineError::UnknownLine(_))));
    }

    #[test]
    fn test_teardown_all() {
        let registry = Registry::new(TimingConfig::default());
        let mut probes = Vec::new();
        for name in ["a", "b", "c"] {
            let (driver, probe) = MockLineDriver::new();
            registry.bind(name, move || boxed(driver)).unwrap().set_enabled(true).unwrap();
            probes.push(probe);
        }

        registry.teardown_all();
        assert!(registry.is_empty());
        for probe in probes {
            assert_eq!(probe.history(), vec![Level::Asserted, Level::Deasserted]);
        }
    }
}
