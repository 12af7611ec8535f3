//! Observability: logging setup, the host log sink and metrics.
//!
//! - [`init_tracing`] installs a formatted subscriber (pretty, compact, JSON)
//! - [`AuditLayer`] forwards host `tracing` events to the unspecified-log probe
//! - [`metrics`] counters, compiled in with the `prometheus` feature

#[cfg(feature = "subscriber")]
mod layer;
pub mod metrics;
#[cfg(feature = "subscriber")]
mod tracing_init;

#[cfg(feature = "subscriber")]
pub use layer::AuditLayer;
#[cfg(feature = "subscriber")]
pub use tracing_init::*;
