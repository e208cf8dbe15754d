//! droidlink core - configuration, errors and events
//!
//! Shared by the adb bridge front ends.

pub mod config;
pub mod error;
pub mod events;

pub use config::{AdbConfig, AppConfig, DebugConfig};
pub use error::{DroidlinkError, Result};
pub use events::{Event, EventBus, EventSubscription, ResolveStage};

/// droidlink version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = "droidlink";
