//! Log output setup and the runtime debug switch.
//!
//! The daemon logs at INFO by default. Debug output (one line per tick and
//! per configuration write) can be turned on and off while the daemon runs,
//! through [`DebugSwitch`].

use thiserror::Error;
use tracing::info;
use tracing::subscriber::SetGlobalDefaultError;
use tracing::Subscriber;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::fmt::{self, MakeWriter};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{reload, Registry};

#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("failed to install log subscriber: {0}")]
    Install(#[from] SetGlobalDefaultError),
    #[error("failed to change log level: {0}")]
    Reload(#[from] reload::Error),
}

fn level_for(debug: bool) -> LevelFilter {
    if debug {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    }
}

/// Handle that raises or lowers the installed subscriber's level.
#[derive(Clone)]
pub struct DebugSwitch {
    handle: reload::Handle<LevelFilter, Registry>,
}

impl DebugSwitch {
    /// # Errors
    ///
    /// Returns [`LoggingError::Reload`] if the subscriber is gone.
    pub fn set_debug(&self, enabled: bool) -> Result<(), LoggingError> {
        self.handle.modify(|filter| *filter = level_for(enabled))?;
        info!("debug logging {}", if enabled { "enabled" } else { "disabled" });
        Ok(())
    }

    pub fn is_debug(&self) -> bool {
        self.handle
            .with_current(|filter| *filter >= LevelFilter::DEBUG)
            .unwrap_or(false)
    }
}

impl core::fmt::Debug for DebugSwitch {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("DebugSwitch").field("debug", &self.is_debug()).finish()
    }
}

/// Build a formatting subscriber writing to `writer`, starting at DEBUG when
/// `debug` is set and at INFO otherwise.
pub fn subscriber<W>(debug: bool, writer: W) -> (impl Subscriber + Send + Sync + 'static, DebugSwitch)
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let (filter, handle) = reload::Layer::<LevelFilter, Registry>::new(level_for(debug));
    let subscriber = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(writer));
    (subscriber, DebugSwitch { handle })
}

/// Install a stdout subscriber as the global default.
///
/// # Errors
///
/// Returns [`LoggingError::Install`] if a global subscriber is already set.
pub fn init(debug: bool) -> Result<DebugSwitch, LoggingError> {
    let (subscriber, switch) = subscriber(debug, std::io::stdout);
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(switch)
}

/// In-memory log sink for tests.
#[cfg(test)]
#[derive(Clone, Default)]
pub(crate) struct CapturedLogs(std::sync::Arc<std::sync::Mutex<Vec<u8>>>);

#[cfg(test)]
impl CapturedLogs {
    pub(crate) fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }

    pub(crate) fn count(&self, needle: &str) -> usize {
        self.contents().matches(needle).count()
    }
}

#[cfg(test)]
impl std::io::Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
impl<'a> MakeWriter<'a> for CapturedLogs {
    type Writer = CapturedLogs;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}
