//! Operator CLI over the canopy deployment engine.

pub mod commands;
pub mod config;
pub mod errors;
pub mod logging;
