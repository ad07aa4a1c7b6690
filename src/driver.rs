//! Line drivers: the capability that physically asserts a level on a pin.
//!
//! A driver is owned by exactly one line for the line's whole lifetime and is
//! called from the timer tick context, so implementations must be `Send` and
//! must not block for long.

use crate::pulse::Level;
use std::fs::{File, OpenOptions};
use std::io::{self, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;
use tracing::trace;

#[derive(Debug, Error)]
pub enum DriverError {
    #[error("line driver unavailable: {0}")]
    Unavailable(String),
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Sets the logic level of one output line.
pub trait LineDriver: Send {
    /// # Errors
    ///
    /// Returns [`DriverError`] if the level could not be applied. Callers log
    /// the failure and carry on; the next tick tries again.
    fn set_level(&mut self, level: Level) -> Result<(), DriverError>;
}

/// Line with no physical pin behind it. Level changes only show up in the trace log.
#[derive(Debug)]
pub struct VirtualLineDriver {
    name: String,
    level: Level,
}

impl VirtualLineDriver {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            level: Level::Deasserted,
        }
    }

    pub fn level(&self) -> Level {
        self.level
    }
}

impl LineDriver for VirtualLineDriver {
    fn set_level(&mut self, level: Level) -> Result<(), DriverError> {
        if level != self.level {
            trace!("virtual line {}: {} -> {}", self.name, self.level, level);
        }
        self.level = level;
        Ok(())
    }
}

/// Writes `1`/`0` into a sysfs-style GPIO `value` file.
///
/// With `active_low` the physical value is inverted relative to the logic level.
#[derive(Debug)]
pub struct ValueFileDriver {
    path: PathBuf,
    file: File,
    active_low: bool,
}

impl ValueFileDriver {
    /// Open the value file and drive it to the deasserted level.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::Io`] if the file cannot be opened or written.
    pub fn open(path: impl AsRef<Path>, active_low: bool) -> Result<Self, DriverError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .write(true)
            .open(&path)
            .map_err(|source| DriverError::Io { path: path.clone(), source })?;

        let mut driver = Self { path, file, active_low };
        driver.set_level(Level::Deasserted)?;
        Ok(driver)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn physical_value(&self, level: Level) -> u8 {
        level.as_bit() ^ u8::from(self.active_low)
    }

    fn write_value(&mut self, value: u8) -> io::Result<()> {
        self.file.seek(SeekFrom::Start(0))?;
        self.file.write_all(if value == 0 { b"0\n" } else { b"1\n" })?;
        self.file.flush()
    }
}

impl LineDriver for ValueFileDriver {
    fn set_level(&mut self, level: Level) -> Result<(), DriverError> {
        let value = self.physical_value(level);
        self.write_value(value).map_err(|source| DriverError::Io {
            path: self.path.clone(),
            source,
        })
    }
}

/// Shared view of every level a [`MockLineDriver`] was asked to apply.
#[derive(Debug, Clone, Default)]
pub struct LevelProbe {
    history: Arc<Mutex<Vec<Level>>>,
}

impl LevelProbe {
    pub fn history(&self) -> Vec<Level> {
        self.history.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn count(&self) -> usize {
        self.history.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn last(&self) -> Option<Level> {
        self.history.lock().unwrap_or_else(PoisonError::into_inner).last().copied()
    }

    fn record(&self, level: Level) {
        self.history.lock().unwrap_or_else(PoisonError::into_inner).push(level);
    }
}

/// Recording driver for tests. A failing mock records nothing and returns an error.
#[derive(Debug)]
pub struct MockLineDriver {
    probe: LevelProbe,
    failing: bool,
}

impl MockLineDriver {
    pub fn new() -> (Self, LevelProbe) {
        let probe = LevelProbe::default();
        (Self { probe: probe.clone(), failing: false }, probe)
    }

    pub fn failing() -> (Self, LevelProbe) {
        let probe = LevelProbe::default();
        (Self { probe: probe.clone(), failing: true }, probe)
    }
}

impl LineDriver for MockLineDriver {
    fn set_level(&mut self, level: Level) -> Result<(), DriverError> {
        if self.failing {
            return Err(DriverError::Unavailable("mock driver set to fail".into()));
        }
        self.probe.record(level);
        Ok(())
    }
}
