//! [`SymbolStore`] – the single source of truth for symbol state.
//!
//! # Consistency model
//!
//! * Reads ([`SymbolStore::snapshot`], [`SymbolStore::get`]) see only
//!   committed records; a mutation becomes visible atomically once it has
//!   been written to disk.
//! * Mutations to the same id are serialized by a per-id async lock held
//!   across the whole read → merge → persist → commit sequence, so two
//!   writers can never drop each other's fields. The `*_held` variants
//!   return that lock with the result for callers that must publish the
//!   change before the next writer runs.
//! * Mutations to different ids only contend on the SQLite connection, and
//!   that write runs on the blocking pool.
//! * A failed write leaves the in-memory view untouched and surfaces
//!   [`HubError::Persistence`]; the mutation did not happen.
//!
//! # Example
//!
//! ```rust
//! use flicknest_memory::SymbolStore;
//! use flicknest_types::{Source, SymbolPatch};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let store = SymbolStore::open_in_memory().unwrap();
//! store.merge("sym_001", &SymbolPatch::state(true), Source::Mobile).await.unwrap();
//!
//! let outcome = store.toggle("sym_001", Source::Broker).await.unwrap();
//! assert!(outcome.old_state);
//! assert!(!outcome.new_state);
//! # }
//! ```

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use chrono::Utc;
use flicknest_types::{HubError, Source, Symbol, SymbolPatch, ToggleOutcome};
use serde_json::{Value, json};
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, info, warn};

use crate::backend::{BackendError, SymbolBackend};

/// A committed mutation whose symbol id is still locked.
///
/// Later writers to the same id wait until this is dropped, so whatever the
/// holder does with the result (device control, realtime fan-out) is observed
/// in commit order.
#[derive(Debug)]
pub struct Held<T> {
    value: T,
    _guard: OwnedMutexGuard<()>,
}

impl<T> Held<T> {
    fn new(value: T, guard: OwnedMutexGuard<()>) -> Self {
        Self {
            value,
            _guard: guard,
        }
    }

    /// Release the lock and return the result.
    pub fn into_inner(self) -> T {
        self.value
    }
}

impl<T> Deref for Held<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.value
    }
}

/// In-memory symbol table with SQLite write-through.
pub struct SymbolStore {
    committed: RwLock<BTreeMap<String, Symbol>>,
    backend: Arc<Mutex<SymbolBackend>>,
    id_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl SymbolStore {
    /// Open the store at `path`, loading every persisted record.
    ///
    /// A missing database is created empty. A database that cannot be read
    /// is moved aside to `<path>.corrupt-<unix-ts>` and replaced by an empty
    /// one; only a failure to create that replacement is returned.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, HubError> {
        let path = path.as_ref();
        if !path.exists() {
            info!(path = %path.display(), "symbol database not found, creating a new one");
        }

        match Self::load(path) {
            Ok((backend, symbols)) => {
                info!(path = %path.display(), symbols = symbols.len(), "symbol store loaded");
                Ok(Self::from_parts(backend, symbols))
            }
            Err(e) => {
                warn!(
                    path = %path.display(),
                    error = %e,
                    "symbol database unreadable, starting with an empty store"
                );
                let quarantined = quarantine(path).map_err(|e| {
                    HubError::Persistence(format!("cannot move damaged database aside: {e}"))
                })?;
                if let Some(moved_to) = quarantined {
                    warn!(moved_to = %moved_to.display(), "damaged symbol database preserved");
                }
                let backend = SymbolBackend::open(path)
                    .map_err(|e| HubError::Persistence(format!("cannot create symbol database: {e}")))?;
                Ok(Self::from_parts(backend, BTreeMap::new()))
            }
        }
    }

    /// Open an empty store backed by an in-memory database.
    pub fn open_in_memory() -> Result<Self, HubError> {
        let backend = SymbolBackend::open_in_memory()
            .map_err(|e| HubError::Persistence(e.to_string()))?;
        Ok(Self::from_parts(backend, BTreeMap::new()))
    }

    fn load(path: &Path) -> Result<(SymbolBackend, BTreeMap<String, Symbol>), BackendError> {
        let backend = SymbolBackend::open(path)?;
        let symbols = backend.load_all()?;
        Ok((backend, symbols))
    }

    fn from_parts(backend: SymbolBackend, symbols: BTreeMap<String, Symbol>) -> Self {
        Self {
            committed: RwLock::new(symbols),
            backend: Arc::new(Mutex::new(backend)),
            id_locks: Mutex::new(HashMap::new()),
        }
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    /// Every committed symbol, keyed by id.
    pub fn snapshot(&self) -> BTreeMap<String, Symbol> {
        self.committed
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// The committed record for `id`, or an empty record when absent.
    pub fn get(&self, id: &str) -> Symbol {
        self.committed
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.committed
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The store in the single-document shape `{"symbols": {id: Symbol}}`.
    pub fn export_document(&self) -> Value {
        json!({ "symbols": self.snapshot() })
    }

    // -----------------------------------------------------------------------
    // Mutations
    // -----------------------------------------------------------------------

    /// Shallow-merge `patch` into `id`, force `source`, persist, commit.
    ///
    /// Creates the record when it does not exist yet.
    pub async fn merge(
        &self,
        id: &str,
        patch: &SymbolPatch,
        source: Source,
    ) -> Result<Symbol, HubError> {
        self.merge_held(id, patch, source).await.map(Held::into_inner)
    }

    /// Like [`merge`](Self::merge), but `id` stays locked until the returned
    /// [`Held`] is dropped.
    pub async fn merge_held(
        &self,
        id: &str,
        patch: &SymbolPatch,
        source: Source,
    ) -> Result<Held<Symbol>, HubError> {
        let guard = self.id_lock(id).lock_owned().await;

        let mut next = self.get(id);
        next.apply(patch, source);
        self.persist(id, &next).await?;
        self.commit(id, next.clone());
        debug!(id = %id, source = %source, "symbol merged");
        Ok(Held::new(next, guard))
    }

    /// Negate the state of `id` (absent counts as `false`).
    pub async fn toggle(&self, id: &str, source: Source) -> Result<ToggleOutcome, HubError> {
        self.toggle_held(id, source).await.map(Held::into_inner)
    }

    /// Like [`toggle`](Self::toggle), but `id` stays locked until the
    /// returned [`Held`] is dropped.
    pub async fn toggle_held(
        &self,
        id: &str,
        source: Source,
    ) -> Result<Held<ToggleOutcome>, HubError> {
        let guard = self.id_lock(id).lock_owned().await;

        let mut next = self.get(id);
        let old_state = next.state_or_default();
        let new_state = !old_state;
        next.apply(&SymbolPatch::state(new_state), source);
        self.persist(id, &next).await?;
        self.commit(id, next.clone());
        debug!(id = %id, source = %source, old_state, new_state, "symbol toggled");
        Ok(Held::new(
            ToggleOutcome {
                id: id.to_string(),
                old_state,
                new_state,
                symbol: next,
            },
            guard,
        ))
    }

    /// Seed an empty store from a legacy `{"symbols": {...}}` JSON document.
    ///
    /// Does nothing (returns `Ok(0)`) when the store already holds records or
    /// the document does not exist.
    pub fn import_document(&self, path: impl AsRef<Path>) -> Result<usize, HubError> {
        let path = path.as_ref();
        if !self.is_empty() || !path.exists() {
            return Ok(0);
        }

        let raw = fs::read_to_string(path)
            .map_err(|e| HubError::InvalidInput(format!("cannot read {}: {e}", path.display())))?;
        let document: Value = serde_json::from_str(&raw)
            .map_err(|e| HubError::InvalidInput(format!("cannot parse {}: {e}", path.display())))?;
        let symbols: BTreeMap<String, Symbol> = match document.get("symbols") {
            Some(symbols) => serde_json::from_value(symbols.clone()).map_err(|e| {
                HubError::InvalidInput(format!("invalid symbols in {}: {e}", path.display()))
            })?,
            None => BTreeMap::new(),
        };
        if symbols.is_empty() {
            return Ok(0);
        }

        self.backend
            .lock()
            .map_err(|_| HubError::Persistence("symbol backend lock poisoned".to_string()))?
            .upsert_all(&symbols)
            .map_err(|e| HubError::Persistence(e.to_string()))?;

        let imported = symbols.len();
        self.committed
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(symbols);
        info!(path = %path.display(), imported, "imported legacy symbol document");
        Ok(imported)
    }

    // -----------------------------------------------------------------------
    // Internal helpers
    // -----------------------------------------------------------------------

    fn id_lock(&self, id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.id_locks.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry(id.to_string()).or_default())
    }

    async fn persist(&self, id: &str, symbol: &Symbol) -> Result<(), HubError> {
        let backend = Arc::clone(&self.backend);
        let id = id.to_string();
        let symbol = symbol.clone();
        tokio::task::spawn_blocking(move || {
            let backend = backend
                .lock()
                .map_err(|_| HubError::Persistence("symbol backend lock poisoned".to_string()))?;
            backend
                .upsert(&id, &symbol)
                .map_err(|e| HubError::Persistence(e.to_string()))
        })
        .await
        .map_err(|e| HubError::Persistence(format!("persistence task failed: {e}")))?
    }

    fn commit(&self, id: &str, symbol: Symbol) {
        self.committed
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id.to_string(), symbol);
    }
}

/// Rename a damaged database to `<path>.corrupt-<unix-ts>`.
fn quarantine(path: &Path) -> std::io::Result<Option<PathBuf>> {
    if !path.exists() {
        return Ok(None);
    }
    let mut target = path.as_os_str().to_owned();
    target.push(format!(".corrupt-{}", Utc::now().timestamp()));
    let target = PathBuf::from(target);
    fs::rename(path, &target)?;
    Ok(Some(target))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn patch(value: Value) -> SymbolPatch {
        SymbolPatch::from_value(value).unwrap()
    }

    #[tokio::test]
    async fn held_result_blocks_the_next_writer() {
        let store = Arc::new(SymbolStore::open_in_memory().unwrap());
        let held = store
            .merge_held("sym_001", &patch(json!({"state": true})), Source::Mobile)
            .await
            .unwrap();
        assert_eq!(held.state, Some(true));

        let writer = {
            let store = Arc::clone(&store);
            tokio::spawn(async move {
                store
                    .merge("sym_001", &patch(json!({"state": false})), Source::Mobile)
                    .await
            })
        };
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert!(!writer.is_finished());
        assert_eq!(store.get("sym_001").state, Some(true));

        // Other ids are not affected.
        store.toggle("sym_002", Source::Broker).await.unwrap();

        drop(held);
        writer.await.unwrap().unwrap();
        assert_eq!(store.get("sym_001").state, Some(false));
    }

    #[tokio::test]
    async fn get_missing_id_is_empty() {
        let store = SymbolStore::open_in_memory().unwrap();
        assert_eq!(store.get("sym_404"), Symbol::default());
        assert!(store.snapshot().is_empty());
    }

    #[tokio::test]
    async fn merge_creates_absent_entry_with_supplied_fields() {
        let store = SymbolStore::open_in_memory().unwrap();
        let merged = store
            .merge("sym_003", &patch(json!({"state": true})), Source::Mobile)
            .await
            .unwrap();

        assert_eq!(
            serde_json::to_value(&merged).unwrap(),
            json!({"state": true, "source": "mobile"})
        );
        assert_eq!(store.get("sym_003"), merged);
    }

    #[tokio::test]
    async fn merge_preserves_unmentioned_fields() {
        let store = SymbolStore::open_in_memory().unwrap();
        store
            .merge("sym_001", &patch(json!({"name": "circle", "room": "hall"})), Source::Mobile)
            .await
            .unwrap();
        let merged = store
            .merge("sym_001", &patch(json!({"state": true})), Source::Mobile)
            .await
            .unwrap();

        assert_eq!(merged.name.as_deref(), Some("circle"));
        assert_eq!(merged.extra.get("room"), Some(&json!("hall")));
        assert_eq!(merged.state, Some(true));
    }

    #[tokio::test]
    async fn toggle_twice_restores_original_state() {
        let store = SymbolStore::open_in_memory().unwrap();

        let first = store.toggle("sym_001", Source::Broker).await.unwrap();
        assert!(!first.old_state);
        assert!(first.new_state);
        assert_eq!(first.symbol.source, Some(Source::Broker));

        let second = store.toggle("sym_001", Source::Broker).await.unwrap();
        assert!(second.old_state);
        assert!(!second.new_state);
        assert_eq!(store.get("sym_001").state, Some(false));
    }

    #[tokio::test]
    async fn merged_entry_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("flicknest.db");

        let merged = {
            let store = SymbolStore::open(&path).unwrap();
            store
                .merge(
                    "sym_custom",
                    &patch(json!({"name": "desk fan", "state": true, "watts": 40})),
                    Source::Mobile,
                )
                .await
                .unwrap()
        };

        let reopened = SymbolStore::open(&path).unwrap();
        assert_eq!(reopened.get("sym_custom"), merged);
        assert_eq!(reopened.len(), 1);
    }

    #[tokio::test]
    async fn persistence_failure_leaves_memory_untouched() {
        let store = SymbolStore::open_in_memory().unwrap();
        store
            .merge("sym_001", &patch(json!({"state": false})), Source::Mobile)
            .await
            .unwrap();

        store
            .backend
            .lock()
            .unwrap()
            .conn
            .execute_batch("DROP TABLE symbols;")
            .unwrap();

        let err = store
            .merge("sym_001", &patch(json!({"state": true})), Source::Mobile)
            .await
            .unwrap_err();
        assert!(matches!(err, HubError::Persistence(_)));
        assert_eq!(store.get("sym_001").state, Some(false));

        let err = store.toggle("sym_002", Source::Broker).await.unwrap_err();
        assert!(matches!(err, HubError::Persistence(_)));
        assert!(!store.snapshot().contains_key("sym_002"));
    }

    #[tokio::test]
    async fn corrupt_database_degrades_to_empty_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("flicknest.db");
        fs::write(&path, vec![b'x'; 4096]).unwrap();

        let store = SymbolStore::open(&path).unwrap();
        assert!(store.is_empty());

        let moved_aside = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(Result::ok)
            .any(|entry| entry.file_name().to_string_lossy().contains(".corrupt-"));
        assert!(moved_aside, "damaged database must be preserved");

        store.toggle("sym_001", Source::Broker).await.unwrap();
        assert_eq!(SymbolStore::open(&path).unwrap().get("sym_001").state, Some(true));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_merges_to_same_id_lose_nothing() {
        let store = Arc::new(SymbolStore::open_in_memory().unwrap());
        let mut handles = Vec::new();
        for i in 0..32 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                let source = if i % 2 == 0 { Source::Mobile } else { Source::Broker };
                store
                    .merge("sym_001", &patch(json!({ format!("field_{i}"): i })), source)
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let symbol = store.get("sym_001");
        for i in 0..32 {
            assert_eq!(symbol.extra.get(&format!("field_{i}")), Some(&json!(i)));
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_toggles_are_all_applied() {
        let store = Arc::new(SymbolStore::open_in_memory().unwrap());
        let mut handles = Vec::new();
        for _ in 0..9 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store.toggle("sym_002", Source::Broker).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        // An odd number of toggles from `false` must end `true`.
        assert_eq!(store.get("sym_002").state, Some(true));
    }

    #[tokio::test]
    async fn export_document_uses_symbols_key() {
        let store = SymbolStore::open_in_memory().unwrap();
        store.toggle("sym_001", Source::Broker).await.unwrap();
        assert_eq!(
            store.export_document(),
            json!({"symbols": {"sym_001": {"state": true, "source": "broker"}}})
        );
    }

    #[tokio::test]
    async fn import_document_seeds_empty_store_once() {
        let dir = tempfile::tempdir().unwrap();
        let legacy = dir.path().join("db.json");
        fs::write(
            &legacy,
            r#"{"symbols": {"sym_001": {"name": "circle", "state": true, "source": "broker"}}}"#,
        )
        .unwrap();

        let store = SymbolStore::open(dir.path().join("flicknest.db")).unwrap();
        assert_eq!(store.import_document(&legacy).unwrap(), 1);
        assert_eq!(store.get("sym_001").name.as_deref(), Some("circle"));

        // A populated store is never overwritten.
        assert_eq!(store.import_document(&legacy).unwrap(), 0);
    }

    #[tokio::test]
    async fn import_missing_document_is_a_noop() {
        let store = SymbolStore::open_in_memory().unwrap();
        assert_eq!(store.import_document("/nonexistent/db.json").unwrap(), 0);
    }
}
