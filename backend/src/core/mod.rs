//! Core utilities: occurrence timing and configuration

pub mod config;
pub mod time;

pub use config::{ConfigError, GasPolicy, NetworkClass, NetworkConfig, SentinelConfig};
pub use time::{days_until, next_occurrence, parse_time_of_day, Frequency, TimeError};
