//! `flicknest-memory` – the authoritative symbol state.
//!
//! Keeps the latest state of every symbol in memory and mirrors each
//! mutation to a local SQLite substrate before it becomes visible.
//!
//! # Modules
//!
//! - [`backend`] – [`SymbolBackend`][backend::SymbolBackend]: the SQLite
//!   table holding one JSON record per symbol, upserted per mutation.
//! - [`symbol_store`] – [`SymbolStore`][symbol_store::SymbolStore]: the
//!   in-memory source of truth with per-symbol serialization of
//!   read-modify-persist and write-through durability.

pub mod backend;
pub mod symbol_store;

pub use backend::{BackendError, SymbolBackend};
pub use symbol_store::{Held, SymbolStore};
