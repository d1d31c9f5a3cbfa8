//! Pulse core: domain types, configuration, errors and the clock seam shared
//! by the storage layer and the command-line front end.

pub mod config;
pub mod error;
pub mod time;
pub mod types;

pub use config::PulseConfig;
pub use error::{PulseError, Result};
pub use time::{Clock, DayWindow, FixedClock, SystemClock};
pub use types::*;
