//! # wlmai-settings
//!
//! Configuration for the knowledge-base chat transport.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`ChatSettings::default()`]
//! 2. **User file**: `~/.wlmai/settings.json` (deep-merged over defaults)
//! 3. **Environment variables**: `WLMAI_*` overrides (highest priority)
//!
//! # Usage
//!
//! ```no_run
//! use wlmai_settings::load_settings;
//!
//! let settings = load_settings().unwrap_or_default();
//! println!("chat host: {}", settings.api.host);
//! ```

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, load_settings_from_path, settings_path};
pub use types::*;
