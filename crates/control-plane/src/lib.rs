//! Multi-tenant application deployment engine with weighted multi-version traffic splitting.
//!
//! [`services::Engine`] is the entry point. It turns templates into versioned cluster objects
//! through the [`reconciler`], persists [`models::Application`] records through a [`store::Store`]
//! and computes lineage traffic shares with [`weight`].

pub mod capture;
pub mod cluster;
pub mod config;
pub mod db;
pub mod error;
pub mod labels;
pub mod models;
pub mod reconciler;
pub mod services;
pub mod store;
pub mod sync_wait;
pub mod telemetry;
pub mod template;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod weight;

pub use config::EngineConfig;
pub use error::{EngineError, EngineResult};
pub use services::{Engine, InstallRequest, SetVersionRequest};
