//! The control-channel seam.
//!
//! The hub never speaks MQTT directly. The dispatcher hands mobile-originated
//! state changes to a [`ControlChannel`], and the implementation decides how
//! (and whether) they reach the device.
//!
//! - [`MqttAdapter`][crate::mqtt_adapter::MqttAdapter] – publishes
//!   `{name: state}` on the control topic.

use std::fmt;

use async_trait::async_trait;
use flicknest_types::HubError;

/// Link state of a device transport.
///
/// `Disconnected → Connecting → Connected → Disconnected`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
        }
    }
}

/// Every hub → device transport must implement this trait.
///
/// # Contract
///
/// * `publish_control` – deliver `{name: state}` to the device. When the
///   link is not [`ConnectionState::Connected`] it must return
///   [`HubError::TransportUnavailable`] without queueing anything.
///
/// * `connection_state` – the current link state, for health reporting.
#[async_trait]
pub trait ControlChannel: Send + Sync {
    async fn publish_control(&self, name: &str, state: bool) -> Result<(), HubError>;

    fn connection_state(&self) -> ConnectionState;

    fn is_connected(&self) -> bool {
        self.connection_state() == ConnectionState::Connected
    }
}
