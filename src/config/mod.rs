//! Scout Configuration Module
//!
//! Loaded once by the binary and handed to each component by value or
//! through [`crate::ScoutContext`]; there is no global config instance.
//!
//! ## Loading Order
//!
//! 1. `SCOUT_CONFIG` environment variable (path to TOML file)
//! 2. `scout_config.toml` in the current working directory
//! 3. Built-in defaults ([`defaults`])

mod scout_config;
pub mod defaults;

pub use scout_config::*;
