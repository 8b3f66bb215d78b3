//! Service layer - read-through access, administration and health.
//!
//! ## Architecture
//!
//! - [`ReadThroughService`] - cache-aside reads with single-flight store access
//!   and stale fallback while the store is unreachable
//! - [`CacheDiagnostics`] / [`ReadThroughService::clear_cache`] - cache administration
//! - [`HealthMonitor`] - concurrent store/cache probes, optionally on a timer

mod admin;
mod health;
mod read_through;

pub use admin::{CacheDiagnostics, DEFAULT_CLEAR_PATTERN};
pub use health::{DEFAULT_PROBE_TIMEOUT, HealthMonitor, HealthReport, ProbeStatus};
pub use read_through::{ReadThroughService, ServiceConfig};
