//! Transport-neutral mutation requests.
//!
//! HTTP, WebSocket and MQTT ingress all reduce their input to a
//! [`SymbolCommand`] and hand it to the dispatcher over a channel. The
//! optional `reply` lets request/response transports wait for the outcome;
//! fire-and-forget ingress (device telemetry) leaves it empty.

use tokio::sync::oneshot;

use crate::{HubError, Source, Symbol, SymbolPatch, SymbolRef};

/// One-shot reply slot carried by a command.
pub type Reply<T> = oneshot::Sender<Result<T, HubError>>;

/// A request to change one symbol.
#[derive(Debug)]
pub enum SymbolCommand {
    /// Shallow-merge `patch` into the target and attribute it to `source`.
    Merge {
        target: SymbolRef,
        patch: SymbolPatch,
        source: Source,
        reply: Option<Reply<Symbol>>,
    },
    /// Negate the target's state (absent counts as `false`).
    Toggle {
        target: SymbolRef,
        source: Source,
        reply: Option<Reply<ToggleOutcome>>,
    },
}

impl SymbolCommand {
    pub fn target(&self) -> &SymbolRef {
        match self {
            SymbolCommand::Merge { target, .. } | SymbolCommand::Toggle { target, .. } => target,
        }
    }

    pub fn source(&self) -> Source {
        match self {
            SymbolCommand::Merge { source, .. } | SymbolCommand::Toggle { source, .. } => *source,
        }
    }
}

/// Result of a toggle.
#[derive(Debug, Clone, PartialEq)]
pub struct ToggleOutcome {
    pub id: String,
    pub old_state: bool,
    pub new_state: bool,
    /// The full record after the toggle was persisted.
    pub symbol: Symbol,
}
