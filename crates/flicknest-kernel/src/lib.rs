//! `flicknest-kernel` – identity rules of the hub.
//!
//! # Modules
//!
//! - [`resolver`] – [`NameResolver`][resolver::NameResolver]: the immutable
//!   gesture-name → symbol-id table consulted by every device ingress path
//!   before a command reaches the store.

pub mod resolver;

pub use resolver::{BUILTIN_GESTURES, NameResolver};
