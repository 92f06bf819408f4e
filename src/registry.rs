/*!

Shared service connections.

A [`ServiceRegistry`] hands out one [`Service`] per bus and bus name. The
registry only holds a weak reference to each service; when the last
clone is dropped, the service's drop hook clears the registry slot, and
the next request opens a fresh connection.

Most callers use the process default through [`Service::get`]. Tests and
applications that want isolation can create their own registry.

*/

use std::collections::HashMap;
use std::sync::{Arc, LazyLock, Weak};

use parking_lot::Mutex;
use tokio::sync::Mutex as AsyncMutex;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::ServiceConfig;
use crate::dual;
use crate::errors::Result;
use crate::service::{Service, ServiceFlags, ServiceInner};
use crate::transport::Transport;

type Slot = Arc<AsyncMutex<Weak<ServiceInner>>>;

static GLOBAL: LazyLock<Arc<ServiceRegistry>> = LazyLock::new(ServiceRegistry::new);

#[derive(Default)]
pub struct ServiceRegistry {
    slots: Mutex<HashMap<String, Slot>>,
}

impl std::fmt::Debug for ServiceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceRegistry")
            .field("slots", &self.slots.lock().len())
            .finish()
    }
}

fn slot_key(transport: &dyn Transport, bus_name: &str) -> String {
    format!("{}|{}", transport.bus_id(), bus_name)
}

impl ServiceRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// The registry behind [`Service::get`].
    pub fn global() -> &'static Arc<ServiceRegistry> {
        &GLOBAL
    }

    /// Get the shared service for `config.bus_name` on `transport`.
    ///
    /// Concurrent first requests wait for a single connection to be
    /// opened. If the service already exists, only the parts of `flags`
    /// it hasn't loaded are loaded.
    ///
    /// The first request's `config` is the one the shared service keeps.
    pub async fn get(
        self: &Arc<Self>,
        transport: Arc<dyn Transport>,
        config: ServiceConfig,
        flags: ServiceFlags,
        cancel: Option<&CancellationToken>,
    ) -> Result<Service> {
        let key = slot_key(transport.as_ref(), &config.bus_name);
        let slot = Arc::clone(self.slots.lock().entry(key.clone()).or_default());

        let mut current = dual::with_cancel(cancel, async { Ok(slot.lock().await) }).await?;
        if let Some(inner) = current.upgrade() {
            drop(current);
            let service = Service::from_inner(inner);
            service.ensure_for_flags(flags, cancel).await?;
            return Ok(service);
        }

        debug!(%key, "opening shared secret service connection");
        let service = Service::open(transport, config, flags, cancel).await?;
        *current = service.downgrade();
        let registry = Arc::downgrade(self);
        let released = Arc::downgrade(&slot);
        service.set_drop_hook(move || {
            if let Some(registry) = registry.upgrade() {
                registry.release(&key, &released);
            }
        });
        Ok(service)
    }

    pub fn get_sync(
        self: &Arc<Self>,
        transport: Arc<dyn Transport>,
        config: ServiceConfig,
        flags: ServiceFlags,
        cancel: Option<&CancellationToken>,
    ) -> Result<Service> {
        dual::block_on(self.get(transport, config, flags, cancel))
    }

    /// Clear a slot after its service was dropped. A slot someone is
    /// filling right now is left alone.
    fn release(&self, key: &str, released: &Weak<AsyncMutex<Weak<ServiceInner>>>) {
        let mut slots = self.slots.lock();
        let Some(slot) = slots.get(key) else {
            return;
        };
        if !std::ptr::eq(Arc::as_ptr(slot), released.as_ptr()) {
            return;
        }
        let vacant = slot
            .try_lock()
            .map(|current| current.strong_count() == 0)
            .unwrap_or(false);
        if vacant {
            slots.remove(key);
            debug!(%key, "released shared secret service connection");
        }
    }

    /// Forget the shared service for `bus_name`. Existing clones keep
    /// working; the next [`ServiceRegistry::get`] opens a new connection.
    pub fn disconnect(&self, transport: &dyn Transport, bus_name: &str) {
        let key = slot_key(transport, bus_name);
        if self.slots.lock().remove(&key).is_some() {
            debug!(%key, "disconnected shared secret service connection");
        }
    }

    /// Whether a live shared service exists for `bus_name`.
    pub fn contains(&self, transport: &dyn Transport, bus_name: &str) -> bool {
        let key = slot_key(transport, bus_name);
        let slots = self.slots.lock();
        slots
            .get(&key)
            .and_then(|slot| slot.try_lock().ok().map(|current| current.strong_count() > 0))
            .unwrap_or(false)
    }

    /// Number of slots, live or being filled.
    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
