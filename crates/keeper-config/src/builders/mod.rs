//! Builders for test configurations.

pub mod config;
