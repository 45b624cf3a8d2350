//! Configuration module
//!
//! Environments, validated runtime settings and file/env loading

pub mod config;

pub use config::{Config, ConfigError, Credentials, DsisConfig, Environment};
