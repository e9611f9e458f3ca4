//! # courier-settings
//!
//! Layered configuration for the Courier chat router.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`CourierSettings::default()`]
//! 2. **Settings file**: `~/.courier/settings.json` or an explicit path
//! 3. **Environment variables**: `COURIER_*` overrides
//!
//! The binary applies CLI flags last and then calls
//! [`CourierSettings::validate`].

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{
    apply_env_overrides, apply_overrides, courier_home, deep_merge, load_settings,
    load_settings_from_path, settings_path,
};
pub use types::*;
