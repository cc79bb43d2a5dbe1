//! Library exports for reuse in binaries, benchmarks and tests.
/// Application directory helpers.
pub mod app_dirs;
/// TOML configuration.
pub mod config;
/// Blocking HTTP helpers shared by the service clients.
pub mod http_client;
/// Tracing subscriber setup.
pub mod logging;
/// Random forest and classification metrics.
pub mod ml;
/// JSON persistence helpers.
pub mod persist;
/// SkyView stamps, Gaia TAP queries and their caches.
pub mod services;
/// Variable star classification pipeline.
pub mod varclass;
