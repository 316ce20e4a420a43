/// Webhook payload normalization
pub mod webhook;

/// Per-user event routing to the scrobble client
pub mod dispatch;

/// Last.fm session authorization flow
pub mod session;

/// Configuration loading and session-key persistence
pub mod config;

/// Helper utilities for outbound API calls
pub mod helpers;

/// API server for the webhook endpoint
pub mod api;

/// Logging configuration and utilities
pub mod logging;

pub use crate::config::ConfigStore;
pub use crate::dispatch::Dispatcher;
pub use crate::webhook::PlaybackEvent;

use tokio::runtime::Runtime;
use once_cell::sync::Lazy;
use log::info;

// Global Tokio runtime for async operations
static TOKIO_RUNTIME: Lazy<Runtime> = Lazy::new(|| {
    let rt = Runtime::new().expect("Failed to create Tokio runtime");
    info!("Global Tokio runtime initialized");
    rt
});

/// Initialize the global Tokio runtime
///
/// This function is called automatically when get_tokio_runtime() is first called,
/// but can be called explicitly to initialize the runtime at a specific point.
pub fn initialize_tokio_runtime() {
    Lazy::force(&TOKIO_RUNTIME);
}

/// Get a reference to the global Tokio runtime
///
/// This function will initialize the runtime if it hasn't been initialized yet.
pub fn get_tokio_runtime() -> &'static Runtime {
    &TOKIO_RUNTIME
}
