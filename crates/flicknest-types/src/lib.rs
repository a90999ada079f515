//! `flicknest-types` – shared vocabulary of the symbol hub.
//!
//! Every other crate speaks in these types: the persisted [`Symbol`] record,
//! the [`Source`] attribution, the unified [`SymbolRef`] identity, the
//! validated [`SymbolPatch`], the realtime [`SymbolUpdate`] event and the
//! [`HubError`] taxonomy.

pub mod command;

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use uuid::Uuid;

pub use command::{Reply, SymbolCommand, ToggleOutcome};

/// Which channel performed the most recent write to a symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    /// The mobile / web client (HTTP `PATCH`).
    Mobile,
    /// The wearable device, over MQTT telemetry or the HTTP upload fallback.
    Broker,
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Source::Mobile => write!(f, "mobile"),
            Source::Broker => write!(f, "broker"),
        }
    }
}

/// One toggleable gesture/output channel.
///
/// The symbol id is the key of the owning map and is not repeated inside the
/// record. Fields the hub does not know about are kept verbatim in `extra`
/// so that a shallow merge never drops data a client attached earlier.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Symbol {
    /// Human label, written by whichever client chooses to include it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Output value; absent until the first write that carries it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<bool>,
    /// Channel of the most recent write.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<Source>,
    /// Opaque client fields.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Symbol {
    /// The stored state, `false` when it was never written.
    pub fn state_or_default(&self) -> bool {
        self.state.unwrap_or(false)
    }

    /// Shallow-merge `patch` into this record and force `source`.
    ///
    /// Keys present in the patch overwrite the stored value; keys absent
    /// from the patch are left alone. A `source` key inside the patch is
    /// ignored because attribution always comes from the ingress channel.
    pub fn apply(&mut self, patch: &SymbolPatch, source: Source) {
        for (key, value) in &patch.fields {
            match key.as_str() {
                "name" => self.name = value.as_str().map(str::to_owned),
                "state" => self.state = value.as_bool(),
                "source" => {}
                _ => {
                    self.extra.insert(key.clone(), value.clone());
                }
            }
        }
        self.source = Some(source);
    }
}

/// A validated partial update for a [`Symbol`].
///
/// Built either from a client's JSON object (`from_value`) or from a single
/// state write (`state`).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SymbolPatch {
    fields: Map<String, Value>,
}

impl SymbolPatch {
    /// Validate an arbitrary JSON value as a patch.
    ///
    /// The value must be a non-empty object; `name` must be a string or
    /// `null` and `state` must be a boolean when present.
    pub fn from_value(value: Value) -> Result<Self, HubError> {
        let Value::Object(fields) = value else {
            return Err(HubError::InvalidInput(
                "request body must be a JSON object".to_string(),
            ));
        };
        if fields.is_empty() {
            return Err(HubError::InvalidInput("No data provided".to_string()));
        }
        if let Some(name) = fields.get("name")
            && !(name.is_string() || name.is_null())
        {
            return Err(HubError::InvalidInput(
                "field `name` must be a string".to_string(),
            ));
        }
        if let Some(state) = fields.get("state")
            && !state.is_boolean()
        {
            return Err(HubError::InvalidInput(
                "field `state` must be a boolean".to_string(),
            ));
        }
        Ok(Self { fields })
    }

    /// A patch that only writes `state`.
    pub fn state(state: bool) -> Self {
        let mut fields = Map::new();
        fields.insert("state".to_string(), Value::Bool(state));
        Self { fields }
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }
}

/// Unified symbol identity.
///
/// Mobile clients address symbols by raw id; the device addresses them by
/// gesture name, which the resolver translates into an id plus its canonical
/// name. Both end up here, so the store only ever sees ids.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SymbolRef {
    pub id: String,
    /// Display name known at the boundary (the resolved gesture name, if any).
    pub name: Option<String>,
}

impl SymbolRef {
    /// Raw-id addressing; no name is implied.
    pub fn by_id(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
        }
    }

    /// Name addressing after resolution.
    pub fn resolved(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: Some(name.into()),
        }
    }
}

impl fmt::Display for SymbolRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{} ({name})", self.id),
            None => write!(f, "{}", self.id),
        }
    }
}

/// Realtime event emitted after every successful mutation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SymbolUpdate {
    pub event_id: Uuid,
    pub timestamp: DateTime<Utc>,
    /// Channel that caused the change.
    pub origin: Source,
    pub id: String,
    pub symbol: Symbol,
}

impl SymbolUpdate {
    pub fn new(id: impl Into<String>, symbol: Symbol, origin: Source) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            origin,
            id: id.into(),
            symbol,
        }
    }

    /// The single-entry `{id: Symbol}` shape sent to realtime clients.
    pub fn as_entry(&self) -> BTreeMap<String, Symbol> {
        BTreeMap::from([(self.id.clone(), self.symbol.clone())])
    }
}

/// A device report: a flat mapping of candidate gesture name → boolean.
///
/// Wire order is significant. The first key whose value is boolean `true`
/// wins, so the map keeps insertion order (`serde_json/preserve_order`).
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceReport {
    fields: Map<String, Value>,
}

impl DeviceReport {
    /// Decode a raw telemetry payload.
    pub fn from_slice(payload: &[u8]) -> Result<Self, HubError> {
        let value: Value = serde_json::from_slice(payload)
            .map_err(|e| HubError::MalformedMessage(format!("invalid JSON: {e}")))?;
        match value {
            Value::Object(fields) => Ok(Self { fields }),
            other => Err(HubError::MalformedMessage(format!(
                "expected a JSON object, got {other}"
            ))),
        }
    }

    /// Accept an already-decoded body (the HTTP upload path).
    pub fn from_value(value: Value) -> Result<Self, HubError> {
        match value {
            Value::Object(fields) if !fields.is_empty() => Ok(Self { fields }),
            Value::Object(_) | Value::Null => {
                Err(HubError::InvalidInput("No data provided".to_string()))
            }
            _ => Err(HubError::InvalidInput(
                "request body must be a JSON object".to_string(),
            )),
        }
    }

    /// The first key, in wire order, whose value is boolean `true`.
    pub fn active_gesture(&self) -> Option<&str> {
        self.fields
            .iter()
            .find(|(_, value)| value.as_bool() == Some(true))
            .map(|(key, _)| key.as_str())
    }
}

/// Error taxonomy shared by the store, the adapters and the gateway.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum HubError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Persistence failure: {0}")]
    Persistence(String),

    #[error("Transport unavailable: {0}")]
    TransportUnavailable(String),

    #[error("Malformed message: {0}")]
    MalformedMessage(String),

    #[error("Channel error: {0}")]
    Channel(String),
}
