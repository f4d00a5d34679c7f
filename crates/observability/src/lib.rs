//! # plauderei-observability
//!
//! Observability-Crate fuer Plauderei:
//! - Prometheus-kompatible Sitzungsmetriken (Textexport)
//! - Structured Logging via tracing-subscriber (text oder json)

pub mod logging;
pub mod metrics;

pub use logging::logging_initialisieren;
pub use metrics::SitzungsMetriken;
