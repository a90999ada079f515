//! `flicknest-gateway` – the hub's client-facing servers.
//!
//! Boots two listeners:
//!
//! 1. **HTTP** ([`http`], default port `5000`) – the REST surface used by the
//!    mobile app (`/symbols`, `/symbols/:id`), the device upload fallback
//!    (`/esp_upload`) and `/health`.
//!
//! 2. **WebSocket** ([`realtime`], default port `5001`) – pushes every
//!    symbol change to connected clients and answers full-state requests.
//!
//! Both read from the [`SymbolStore`](flicknest_memory::SymbolStore) directly
//! and send every mutation through the
//! [`DispatcherHandle`](flicknest_runtime::DispatcherHandle).

pub mod http;
pub mod realtime;

pub use http::{ApiError, AppState, router};
pub use realtime::{ClientFrame, RealtimeServer, ServerFrame};
