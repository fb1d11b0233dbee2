//! Per-database write mutex
//!
//! Within one process, every open handle to the same database path shares a
//! single async mutex so concurrent writers from different tasks serialize in
//! FIFO order (tokio's mutex queues waiters fairly). The registry holds weak
//! references; when the last `Store` for a path drops, its entry is reaped on
//! the next lookup.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex as StdMutex, OnceLock, Weak};

use tokio::sync::Mutex as AsyncMutex;

type Registry = StdMutex<HashMap<PathBuf, Weak<AsyncMutex<()>>>>;

fn registry() -> &'static Registry {
    static REGISTRY: OnceLock<Registry> = OnceLock::new();
    REGISTRY.get_or_init(|| StdMutex::new(HashMap::new()))
}

/// Get (or create) the shared write mutex for a database path
pub fn for_path(path: &Path) -> Arc<AsyncMutex<()>> {
    let mut map = registry().lock().expect("mutex registry poisoned");

    // Reap dead entries while we hold the map lock
    map.retain(|_, weak| weak.strong_count() > 0);

    if let Some(existing) = map.get(path).and_then(Weak::upgrade) {
        return existing;
    }

    let fresh = Arc::new(AsyncMutex::new(()));
    map.insert(path.to_path_buf(), Arc::downgrade(&fresh));
    fresh
}

/// Number of live entries in the registry (test visibility)
pub fn registry_len() -> usize {
    let map = registry().lock().expect("mutex registry poisoned");
    map.values().filter(|w| w.strong_count() > 0).count()
}
