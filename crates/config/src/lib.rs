//! Configuration module for the recording remux/transcode daemon
//!
//! Handles loading settings from TOML files, environment variable overrides and validation.

pub mod config;

pub use config::*;
