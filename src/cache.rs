/*!

Identity-preserving caches of child proxies.

Each parent (a service over its collections, a collection over its items)
keeps at most one live proxy per object path. The map is published as an
immutable snapshot, so readers see either the old set or the new one and
never a partially rebuilt map.

*/

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use futures::StreamExt;
use futures::stream::FuturesUnordered;
use parking_lot::Mutex;
use tracing::debug;

use crate::errors::Result;
use crate::variant::ObjectPath;

struct CacheState<T> {
    map: Arc<HashMap<ObjectPath, T>>,
    loaded: bool,
}

pub(crate) struct IdentityCache<T> {
    state: Mutex<CacheState<T>>,
}

impl<T: Clone> IdentityCache<T> {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(CacheState {
                map: Arc::new(HashMap::new()),
                loaded: false,
            }),
        }
    }

    pub(crate) fn lookup(&self, path: &ObjectPath) -> Option<T> {
        self.state.lock().map.get(path).cloned()
    }

    /// Whether a full load has been published yet.
    pub(crate) fn is_loaded(&self) -> bool {
        self.state.lock().loaded
    }

    /// The current snapshot.
    pub(crate) fn snapshot(&self) -> Arc<HashMap<ObjectPath, T>> {
        Arc::clone(&self.state.lock().map)
    }

    /// All children in path order, or `None` before the first full load.
    pub(crate) fn values(&self) -> Option<Vec<T>> {
        let map = {
            let state = self.state.lock();
            if !state.loaded {
                return None;
            }
            Arc::clone(&state.map)
        };
        let mut entries: Vec<(&ObjectPath, &T)> = map.iter().collect();
        entries.sort_by(|a, b| a.0.cmp(b.0));
        Some(entries.into_iter().map(|(_, v)| v.clone()).collect())
    }

    /// Add `candidate` unless a proxy for `path` is already cached, in
    /// which case the cached one wins and is returned.
    pub(crate) fn get_or_insert(&self, path: ObjectPath, candidate: T) -> T {
        let mut state = self.state.lock();
        if let Some(existing) = state.map.get(&path) {
            return existing.clone();
        }
        Arc::make_mut(&mut state.map).insert(path, candidate.clone());
        candidate
    }

    pub(crate) fn remove(&self, path: &ObjectPath) -> Option<T> {
        let mut state = self.state.lock();
        if !state.map.contains_key(path) {
            return None;
        }
        Arc::make_mut(&mut state.map).remove(path)
    }

    /// Swap in the result of a reload. A proxy cached for one of its paths
    /// while the reload ran stays the one readers get.
    fn publish(&self, mut map: HashMap<ObjectPath, T>) {
        let previous = {
            let mut state = self.state.lock();
            for (path, child) in map.iter_mut() {
                if let Some(existing) = state.map.get(path) {
                    *child = existing.clone();
                }
            }
            state.loaded = true;
            std::mem::replace(&mut state.map, Arc::new(map))
        };
        drop(previous);
    }
}

/// Rebuild `cache` so it holds exactly the children at `paths`.
///
/// Cached proxies are carried over untouched; only missing paths are
/// instantiated, all concurrently. `instantiate` must not add to `cache`
/// itself: new children become visible together, when the replacement is
/// published. A failed instantiation does not stop its siblings: every
/// child that resolved is published, and then the first failure is
/// reported.
pub(crate) async fn reload<T, F, Fut>(cache: &IdentityCache<T>, paths: &[ObjectPath], instantiate: F) -> Result<()>
where
    T: Clone,
    F: Fn(ObjectPath) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut replacement = HashMap::with_capacity(paths.len());
    let mut missing: Vec<ObjectPath> = Vec::new();
    {
        let state = cache.state.lock();
        for path in paths {
            if replacement.contains_key(path) || missing.contains(path) {
                continue;
            }
            match state.map.get(path) {
                Some(existing) => {
                    replacement.insert(path.clone(), existing.clone());
                }
                None => missing.push(path.clone()),
            }
        }
    }

    let mut pending: FuturesUnordered<_> = missing
        .into_iter()
        .map(|path| {
            let child = instantiate(path.clone());
            async move { (path, child.await) }
        })
        .collect();
    let mut first_error = None;
    while let Some((path, result)) = pending.next().await {
        match result {
            Ok(child) => {
                replacement.insert(path, child);
            }
            Err(err) => {
                debug!(%path, error = %err, "couldn't load secret service object");
                if first_error.is_none() {
                    first_error = Some(err);
                }
            }
        }
    }

    cache.publish(replacement);
    match first_error {
        Some(err) => Err(err),
        None => Ok(()),
    }
}
