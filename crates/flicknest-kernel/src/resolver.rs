//! [`NameResolver`] – gesture name → symbol identity.
//!
//! The band reports gestures by name (`"circle"`, `"Double_Tap"`, …). The
//! store is keyed by stable ids (`"sym_001"`). The resolver is the single,
//! explicit translation between the two addressing modes: lookups are
//! case-insensitive and produce a [`SymbolRef`] carrying both the id and the
//! canonical gesture name.
//!
//! A miss is not an error. Device ingress over MQTT drops the message; the
//! HTTP upload path turns the miss into a client error.
//!
//! # Example
//!
//! ```
//! use flicknest_kernel::NameResolver;
//!
//! let resolver = NameResolver::builtin();
//! let target = resolver.resolve("Circle").unwrap();
//! assert_eq!(target.id, "sym_001");
//! assert_eq!(target.name.as_deref(), Some("circle"));
//! assert!(resolver.resolve("not_a_gesture").is_none());
//! ```

use std::collections::HashMap;

use flicknest_types::SymbolRef;

/// Gesture table recognised by the band firmware.
pub const BUILTIN_GESTURES: [(&str, &str); 17] = [
    ("circle", "sym_001"),
    ("wave", "sym_002"),
    ("updown", "sym_003"),
    ("double_tap", "sym_004"),
    ("swipe_up", "sym_005"),
    ("swipe_down", "sym_006"),
    ("double_wave", "sym_007"),
    ("flick", "sym_008"),
    ("knock", "sym_009"),
    ("clap", "sym_010"),
    ("press", "sym_011"),
    ("tilt", "sym_012"),
    ("rotate", "sym_013"),
    ("flip", "sym_014"),
    ("tap", "sym_015"),
    ("arise", "sym_016"),
    ("rectangle", "sym_017"),
];

/// Immutable name → id table, built once at startup and shared read-only.
#[derive(Debug, Clone)]
pub struct NameResolver {
    by_name: HashMap<String, String>,
}

impl NameResolver {
    /// Resolver over [`BUILTIN_GESTURES`].
    pub fn builtin() -> Self {
        Self::from_pairs(BUILTIN_GESTURES)
    }

    /// Build a resolver from `(name, id)` pairs. Names are lower-cased.
    pub fn from_pairs<N, I>(pairs: impl IntoIterator<Item = (N, I)>) -> Self
    where
        N: AsRef<str>,
        I: Into<String>,
    {
        let by_name = pairs
            .into_iter()
            .map(|(name, id)| (name.as_ref().trim().to_lowercase(), id.into()))
            .collect();
        Self { by_name }
    }

    /// Resolve a gesture name, ignoring case and surrounding whitespace.
    pub fn resolve(&self, name: &str) -> Option<SymbolRef> {
        let key = name.trim().to_lowercase();
        let id = self.by_name.get(&key)?;
        Some(SymbolRef::resolved(id.clone(), key))
    }

    /// Canonical gesture name registered for `id`, if any.
    pub fn reverse(&self, id: &str) -> Option<&str> {
        self.by_name
            .iter()
            .find(|(_, v)| v.as_str() == id)
            .map(|(name, _)| name.as_str())
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }

    /// `(name, id)` pairs in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.by_name
            .iter()
            .map(|(name, id)| (name.as_str(), id.as_str()))
    }

    /// `(name, id)` pairs sorted by id.
    pub fn entries(&self) -> Vec<(&str, &str)> {
        let mut entries: Vec<_> = self.iter().collect();
        entries.sort_by(|a, b| a.1.cmp(b.1));
        entries
    }
}

impl Default for NameResolver {
    fn default() -> Self {
        Self::builtin()
    }
}
