//! `flicknest-runtime` – the hub's execution core.
//!
//! # Modules
//!
//! - [`dispatcher`] – [`Dispatcher`][dispatcher::Dispatcher]: the single
//!   consumer of [`SymbolCommand`][flicknest_types::SymbolCommand]s. Every
//!   ingress path (HTTP, MQTT) sends its mutations here; the dispatcher
//!   applies them to the store, pushes mobile changes to the device and fans
//!   out the result to realtime subscribers.
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing]: initialises
//!   the global `tracing` subscriber with an optional OTLP span exporter.
//!   Set `OTEL_EXPORTER_OTLP_ENDPOINT` to enable live trace export.

pub mod dispatcher;
pub mod telemetry;

pub use dispatcher::{Dispatcher, DispatcherHandle};
