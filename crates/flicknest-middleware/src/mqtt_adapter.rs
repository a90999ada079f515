//! MQTT device link.
//!
//! [`MqttAdapter`] bridges the band's MQTT broker and the hub:
//!
//! * **Inbound (telemetry)** – every message on the telemetry topic is a flat
//!   `{gesture: bool, ...}` report. The first key that is `true` is resolved
//!   to a symbol and submitted to the dispatcher as a broker-sourced
//!   [`SymbolCommand::Toggle`]. Reports that do not parse or do not resolve
//!   are logged and dropped.
//!
//! * **Outbound (control)** – mobile-originated changes are published as
//!   `{name: state}` on the control topic, at most once and only while the
//!   link is [`ConnectionState::Connected`].
//!
//! The link state is owned here and published through a
//! [`tokio::sync::watch`] channel. After a network error the loop parks in
//! [`ConnectionState::Disconnected`] until [`MqttAdapter::reconnect`] is
//! called (normally by the [`ReconnectSupervisor`](crate::supervisor::ReconnectSupervisor)).

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use flicknest_kernel::NameResolver;
use flicknest_types::{DeviceReport, HubError, Source, SymbolCommand, SymbolRef};
use rumqttc::{AsyncClient, ConnectReturnCode, Event, EventLoop, MqttOptions, Packet, QoS};
use serde_json::{Map, Value};
use tokio::sync::{Notify, mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::adapter::{ConnectionState, ControlChannel};
use crate::supervisor::Reconnectable;

/// Smallest keep-alive the MQTT client accepts.
const MIN_KEEP_ALIVE: Duration = Duration::from_secs(5);

/// Broker connection parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MqttSettings {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub keep_alive: Duration,
    /// Device → hub gesture reports.
    pub telemetry_topic: String,
    /// Hub → device state pushes.
    pub control_topic: String,
    /// Outgoing request buffer of the client.
    pub request_capacity: usize,
}

impl Default for MqttSettings {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1883,
            client_id: "flicknest-hub".to_string(),
            keep_alive: Duration::from_secs(60),
            telemetry_topic: "esp/data".to_string(),
            control_topic: "esp/control".to_string(),
            request_capacity: 64,
        }
    }
}

/// MQTT client plus its connection state machine.
pub struct MqttAdapter {
    client: AsyncClient,
    settings: MqttSettings,
    state: watch::Sender<ConnectionState>,
    resume: Notify,
}

impl MqttAdapter {
    /// Build the client. Nothing touches the network until the returned
    /// [`EventLoop`] is driven by [`MqttAdapter::run`].
    pub fn new(settings: MqttSettings) -> (Arc<Self>, EventLoop) {
        let mut options = MqttOptions::new(&settings.client_id, &settings.host, settings.port);
        options.set_keep_alive(settings.keep_alive.max(MIN_KEEP_ALIVE));
        let (client, eventloop) = AsyncClient::new(options, settings.request_capacity.max(1));
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let adapter = Arc::new(Self {
            client,
            settings,
            state,
            resume: Notify::new(),
        });
        (adapter, eventloop)
    }

    pub fn settings(&self) -> &MqttSettings {
        &self.settings
    }

    /// Observe link state changes.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    fn set_state(&self, next: ConnectionState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            info!(from = %previous, to = %next, broker = %self.settings.host, "MQTT link state changed");
        }
    }

    /// Drive the network loop until `shutdown` fires.
    pub async fn run(
        self: Arc<Self>,
        mut eventloop: EventLoop,
        ingress: TelemetryIngress,
        shutdown: CancellationToken,
    ) {
        info!(
            host = %self.settings.host,
            port = self.settings.port,
            "connecting to MQTT broker"
        );
        self.set_state(ConnectionState::Connecting);

        loop {
            let event = tokio::select! {
                _ = shutdown.cancelled() => break,
                event = eventloop.poll() => event,
            };

            match event {
                Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                    if ack.code == ConnectReturnCode::Success {
                        self.on_connected();
                    } else {
                        warn!(code = ?ack.code, "MQTT broker refused the connection");
                        self.set_state(ConnectionState::Disconnected);
                    }
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    if publish.topic != self.settings.telemetry_topic {
                        debug!(topic = %publish.topic, "ignoring message on unexpected topic");
                        continue;
                    }
                    if let Err(e) = ingress.handle(&publish.payload).await {
                        warn!(topic = %publish.topic, error = %e, "dropping device telemetry");
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(error = %e, "MQTT connection lost");
                    self.set_state(ConnectionState::Disconnected);
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = self.resume.notified() => {
                            info!(host = %self.settings.host, "retrying MQTT connection");
                        }
                    }
                }
            }
        }

        self.set_state(ConnectionState::Disconnected);
        info!("MQTT network loop stopped");
    }

    fn on_connected(&self) {
        self.set_state(ConnectionState::Connected);
        match self
            .client
            .try_subscribe(&self.settings.telemetry_topic, QoS::AtMostOnce)
        {
            Ok(()) => info!(topic = %self.settings.telemetry_topic, "subscribed to device telemetry"),
            Err(e) => warn!(
                topic = %self.settings.telemetry_topic,
                error = %e,
                "failed to subscribe to device telemetry"
            ),
        }
    }
}

#[async_trait]
impl ControlChannel for MqttAdapter {
    async fn publish_control(&self, name: &str, state: bool) -> Result<(), HubError> {
        let link = self.connection_state();
        if link != ConnectionState::Connected {
            warn!(name = %name, state, link = %link, "MQTT not connected, control message not sent");
            return Err(HubError::TransportUnavailable(format!(
                "MQTT link is {link}"
            )));
        }

        let mut message = Map::new();
        message.insert(name.to_string(), Value::Bool(state));
        let payload = Value::Object(message).to_string();

        self.client
            .try_publish(
                &self.settings.control_topic,
                QoS::AtMostOnce,
                false,
                payload.into_bytes(),
            )
            .map_err(|e| HubError::TransportUnavailable(e.to_string()))?;
        debug!(topic = %self.settings.control_topic, name = %name, state, "control message published");
        Ok(())
    }

    fn connection_state(&self) -> ConnectionState {
        *self.state.borrow()
    }
}

impl Reconnectable for MqttAdapter {
    fn link_state(&self) -> ConnectionState {
        self.connection_state()
    }

    fn reconnect(&self) -> Result<(), HubError> {
        if self.connection_state() == ConnectionState::Disconnected {
            self.set_state(ConnectionState::Connecting);
            self.resume.notify_one();
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Telemetry ingress
// ---------------------------------------------------------------------------

/// Turns raw telemetry payloads into dispatcher commands.
#[derive(Clone)]
pub struct TelemetryIngress {
    resolver: Arc<NameResolver>,
    commands: mpsc::Sender<SymbolCommand>,
}

impl TelemetryIngress {
    pub fn new(resolver: Arc<NameResolver>, commands: mpsc::Sender<SymbolCommand>) -> Self {
        Self { resolver, commands }
    }

    /// Handle one telemetry payload.
    ///
    /// Returns the symbol that was submitted for toggling, or `None` when the
    /// report named no active gesture or an unknown one.
    pub async fn handle(&self, payload: &[u8]) -> Result<Option<SymbolRef>, HubError> {
        let report = DeviceReport::from_slice(payload)?;
        let Some(gesture) = report.active_gesture() else {
            debug!("telemetry report has no active gesture");
            return Ok(None);
        };
        let Some(target) = self.resolver.resolve(gesture) else {
            warn!(gesture = %gesture, "unknown gesture in device telemetry");
            return Ok(None);
        };

        debug!(target = %target, "device gesture received");
        self.commands
            .send(SymbolCommand::Toggle {
                target: target.clone(),
                source: Source::Broker,
                reply: None,
            })
            .await
            .map_err(|_| HubError::Channel("dispatcher is not running".to_string()))?;
        Ok(Some(target))
    }
}
