//! # GPIO Pulse Manager
//!
//! Software pulse generation for digital output lines. Each line repeats an
//! "on" run of time slots followed by an "off" run at a configurable
//! frequency, and can be enabled, disabled and reconfigured while it runs.
//! Useful for LED dimming, blink patterns and simple PWM-like waveforms where
//! no hardware PWM is available.
//!
//! ## Quick Start
//!
//! ```rust
//! use gpioman::{Registry, TimingConfig};
//! use gpioman::driver::{LineDriver, MockLineDriver};
//!
//! let registry = Registry::new(TimingConfig::default());
//! let (driver, probe) = MockLineDriver::new();
//! let led = registry
//!     .bind("led0", move || Ok(Box::new(driver) as Box<dyn LineDriver>))
//!     .unwrap();
//!
//! led.set_on_cycles(3).unwrap();
//! led.set_off_cycles(1).unwrap();
//! led.set_enabled(true).unwrap();
//! assert!(led.snapshot().enabled);
//! assert_eq!(probe.count(), 1);
//!
//! registry.teardown_all();
//! ```
//!
//! ## Architecture
//!
//! - [`pulse`] - Per-tick pulse state machine
//! - [`timing`] - Frequency to period mapping and the coarse/fine tick schedulers
//! - [`driver`] - Line driver capability and its implementations
//! - [`controller`] - Per-line configuration and lifecycle
//! - [`registry`] - Set of bound lines
//! - [`attribute`] - Operator-facing settings and value validation
//! - [`config`] - Daemon configuration file
//! - [`logging`] - Log subscriber setup and the runtime debug switch
//! - [`protocol`] - JSON control protocol

#![deny(warnings)]
#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::must_use_candidate)]

pub mod attribute;
pub mod config;
pub mod controller;
pub mod driver;
pub mod logging;
pub mod protocol;
pub mod pulse;
pub mod registry;
pub mod timing;

// Re-export main public types for convenience
pub use attribute::{Attribute, Setting};
pub use controller::{LineController, LineError, LineSnapshot};
pub use pulse::{Level, PulsePattern, PulseState};
pub use registry::Registry;
pub use timing::{TimingConfig, TimingStrategy};
