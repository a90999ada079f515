//! `flicknest-middleware` – moving symbol changes in and out of the hub.
//!
//! Routes state changes between the store, the device and realtime
//! observers without knowing how the store works.
//!
//! # Modules
//!
//! - [`bus`] – broadcast fan-out of [`SymbolUpdate`](flicknest_types::SymbolUpdate)
//!   events to every realtime subscriber.
//! - [`adapter`] – the [`ControlChannel`] seam used to push state back to the
//!   device, and the [`ConnectionState`] machine.
//! - [`mqtt_adapter`] – MQTT device link (telemetry in, control out).
//! - [`supervisor`] – periodic reconnect loop for the device link.

pub mod adapter;
pub mod bus;
pub mod mqtt_adapter;
pub mod supervisor;

pub use adapter::{ConnectionState, ControlChannel};
pub use bus::{UpdateBus, UpdateReceiver};
pub use mqtt_adapter::{MqttAdapter, MqttSettings, TelemetryIngress};
pub use supervisor::{Reconnectable, ReconnectSupervisor};
