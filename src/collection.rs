/*!

Collections of stored items.

A [`Collection`] belongs to the [`Service`] that instantiated it and holds
only a weak reference back to it. The service keeps at most one
`Collection` per object path, and each collection keeps at most one
[`Item`] per item path.

*/

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use bitflags::bitflags;
use futures::future::try_join_all;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::cache::{self, IdentityCache};
use crate::dual;
use crate::errors::{Result, protocol_error};
use crate::item::{Item, ItemFlags};
use crate::proxy::{RemoteObject, reply_arg};
use crate::service::{PromptOutcome, SearchFlags, Service, ServiceInner};
use crate::transport::COLLECTION_INTERFACE;
use crate::variant::{ObjectPath, Variant, attributes_to_variant};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct CollectionFlags: u32 {
        const LOAD_ITEMS = 1 << 1;
    }
}

pub(crate) struct CollectionInner {
    object: RemoteObject,
    service: Weak<ServiceInner>,
    items: IdentityCache<Item>,
    /// Set until the initial load finishes; an `Items` change seen before
    /// then must not start a second, overlapping load.
    constructing: AtomicBool,
}

#[derive(Clone)]
pub struct Collection {
    inner: Arc<CollectionInner>,
}

impl PartialEq for Collection {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Collection {}

impl std::hash::Hash for Collection {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        Arc::as_ptr(&self.inner).hash(state);
    }
}

impl std::fmt::Debug for Collection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collection")
            .field("path", self.path())
            .finish_non_exhaustive()
    }
}

impl Collection {
    /// Get the collection at `path`, reusing the cached instance if the
    /// service already has one.
    pub async fn new_for_path(
        service: &Service,
        path: ObjectPath,
        flags: CollectionFlags,
        cancel: Option<&CancellationToken>,
    ) -> Result<Collection> {
        if let Some(existing) = service.find_collection_instance(&path) {
            existing.ensure_for_flags(flags, cancel).await?;
            return Ok(existing);
        }
        let candidate = Self::connect(service, path.clone(), cancel).await?;
        let collection = service.inner.collections.get_or_insert(path, candidate);
        let loaded = collection.finish_construction(flags, cancel).await;
        service.release_adopted_items();
        loaded?;
        Ok(collection)
    }

    /// Build an instance the service doesn't know about yet, for a reload
    /// of its collection cache to publish.
    pub(crate) async fn instantiate(
        service: &Service,
        path: ObjectPath,
        flags: CollectionFlags,
        cancel: Option<&CancellationToken>,
    ) -> Result<Collection> {
        let collection = Self::connect(service, path, cancel).await?;
        collection.finish_construction(flags, cancel).await?;
        Ok(collection)
    }

    async fn connect(service: &Service, path: ObjectPath, cancel: Option<&CancellationToken>) -> Result<Collection> {
        let object = RemoteObject::connect(
            Arc::clone(service.transport()),
            service.bus_name(),
            path,
            COLLECTION_INTERFACE,
            cancel,
        )
        .await?;
        let collection = Collection {
            inner: Arc::new(CollectionInner {
                object,
                service: service.downgrade(),
                items: IdentityCache::new(),
                constructing: AtomicBool::new(true),
            }),
        };
        collection.watch_signals().await?;
        collection.adopt_items(service);
        Ok(collection)
    }

    async fn finish_construction(&self, flags: CollectionFlags, cancel: Option<&CancellationToken>) -> Result<()> {
        let loaded = self.ensure_for_flags(flags, cancel).await;
        self.inner.constructing.store(false, Ordering::Release);
        loaded
    }

    /// Take over the items the service cached for this collection's paths
    /// before the collection itself was instantiated.
    fn adopt_items(&self, service: &Service) {
        for (path, item) in service.inner.items.snapshot().iter() {
            if path.parent().as_ref() == Some(self.path()) {
                self.inner.items.get_or_insert(path.clone(), item.clone());
            }
        }
    }

    pub fn new_for_path_sync(
        service: &Service,
        path: ObjectPath,
        flags: CollectionFlags,
        cancel: Option<&CancellationToken>,
    ) -> Result<Collection> {
        dual::block_on(Self::new_for_path(service, path, flags, cancel))
    }

    /// The collection an alias points at, if any.
    pub async fn for_alias(
        service: &Service,
        alias: &str,
        flags: CollectionFlags,
        cancel: Option<&CancellationToken>,
    ) -> Result<Option<Collection>> {
        match service.read_alias_path(alias, cancel).await? {
            Some(path) => Ok(Some(Self::new_for_path(service, path, flags, cancel).await?)),
            None => Ok(None),
        }
    }

    pub fn for_alias_sync(
        service: &Service,
        alias: &str,
        flags: CollectionFlags,
        cancel: Option<&CancellationToken>,
    ) -> Result<Option<Collection>> {
        dual::block_on(Self::for_alias(service, alias, flags, cancel))
    }

    /// Create a new collection. Fails with [`crate::Error::Dismissed`] if the user
    /// dismisses the creation prompt.
    pub async fn create(
        service: &Service,
        label: &str,
        alias: Option<&str>,
        cancel: Option<&CancellationToken>,
    ) -> Result<Collection> {
        let path = service.create_collection_path(label, alias, cancel).await?;
        Self::new_for_path(service, path, CollectionFlags::LOAD_ITEMS, cancel).await
    }

    pub fn create_sync(
        service: &Service,
        label: &str,
        alias: Option<&str>,
        cancel: Option<&CancellationToken>,
    ) -> Result<Collection> {
        dual::block_on(Self::create(service, label, alias, cancel))
    }

    pub(crate) fn object(&self) -> &RemoteObject {
        &self.inner.object
    }

    pub fn path(&self) -> &ObjectPath {
        self.inner.object.path()
    }

    pub fn service(&self) -> Result<Service> {
        Service::upgrade(&self.inner.service)
    }

    async fn watch_signals(&self) -> Result<()> {
        let weak = Arc::downgrade(&self.inner);
        self.inner
            .object
            .listen_properties(weak.clone(), |inner, changed| {
                if changed.iter().any(|name| name == "Items") {
                    Collection::from_inner(inner).reload_in_background();
                }
            })
            .await?;
        self.inner
            .object
            .listen(weak, COLLECTION_INTERFACE, None, |inner, message| {
                let collection = Collection::from_inner(inner);
                match message.member.as_str() {
                    "ItemCreated" | "ItemDeleted" => collection.reload_in_background(),
                    "ItemChanged" => {
                        let changed = message.args.first().and_then(Variant::as_path);
                        if let Some(item) = changed.and_then(|path| collection.cached_item(path)) {
                            item.refresh_in_background();
                        }
                    }
                    _ => {}
                }
            })
            .await
    }

    fn from_inner(inner: &Arc<CollectionInner>) -> Self {
        Self {
            inner: Arc::clone(inner),
        }
    }

    fn reload_in_background(&self) {
        if self.inner.constructing.load(Ordering::Acquire) || !self.inner.items.is_loaded() {
            return;
        }
        let weak = Arc::downgrade(&self.inner);
        self.inner.object.transport().spawn(Box::pin(async move {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            let collection = Collection { inner };
            if let Err(err) = collection.load_items(None).await {
                warn!(path = %collection.path(), error = %err, "couldn't reload collection items");
            }
        }));
    }

    pub(crate) fn refresh_in_background(&self) {
        let weak = Arc::downgrade(&self.inner);
        self.inner.object.transport().spawn(Box::pin(async move {
            if let Some(inner) = weak.upgrade() {
                if let Err(err) = inner.object.refresh(None).await {
                    warn!(path = %inner.object.path(), error = %err, "couldn't refresh collection");
                }
            }
        }));
    }

    pub fn flags(&self) -> CollectionFlags {
        if self.inner.items.is_loaded() {
            CollectionFlags::LOAD_ITEMS
        } else {
            CollectionFlags::empty()
        }
    }

    pub async fn ensure_for_flags(&self, flags: CollectionFlags, cancel: Option<&CancellationToken>) -> Result<()> {
        let missing = flags - self.flags();
        if missing.contains(CollectionFlags::LOAD_ITEMS) {
            self.load_items(cancel).await?;
        }
        Ok(())
    }

    pub fn ensure_for_flags_sync(&self, flags: CollectionFlags, cancel: Option<&CancellationToken>) -> Result<()> {
        dual::block_on(self.ensure_for_flags(flags, cancel))
    }

    /// Bring the item cache in line with the collection's `Items` property.
    pub async fn load_items(&self, cancel: Option<&CancellationToken>) -> Result<()> {
        let service = &self.service()?;
        let paths: Vec<ObjectPath> = self
            .inner
            .object
            .cached("Items")
            .ok_or_else(|| protocol_error(format!("collection {} has no Items property", self.path())))?;
        debug!(path = %self.path(), count = paths.len(), "loading collection items");
        let loaded = cache::reload(&self.inner.items, &paths, |path| Item::instantiate(service, path, cancel)).await;
        service.release_adopted_items();
        loaded
    }

    pub fn load_items_sync(&self, cancel: Option<&CancellationToken>) -> Result<()> {
        dual::block_on(self.load_items(cancel))
    }

    /// The loaded items, or `None` if they haven't been loaded.
    pub fn items(&self) -> Option<Vec<Item>> {
        self.inner.items.values()
    }

    pub(crate) fn item_cache(&self) -> &IdentityCache<Item> {
        &self.inner.items
    }

    pub(crate) fn cached_item(&self, path: &ObjectPath) -> Option<Item> {
        self.inner.items.lookup(path)
    }

    pub(crate) fn forget_item(&self, path: &ObjectPath) {
        self.inner.items.remove(path);
    }

    /// Search this collection for items matching `attributes`.
    pub async fn search(
        &self,
        attributes: &HashMap<String, String>,
        flags: SearchFlags,
        cancel: Option<&CancellationToken>,
    ) -> Result<Vec<Item>> {
        let service = self.service()?;
        let reply = self
            .inner
            .object
            .call("SearchItems", vec![attributes_to_variant(attributes)], cancel)
            .await?;
        let mut paths: Vec<ObjectPath> = reply_arg(&reply, 0, "SearchItems")?;
        if !flags.contains(SearchFlags::ALL) {
            paths.truncate(1);
        }
        let items = try_join_all(
            paths
                .into_iter()
                .map(|path| Item::load(&service, Some(self), path, ItemFlags::empty(), cancel)),
        )
        .await?;
        if flags.contains(SearchFlags::UNLOCK) {
            let locked: Vec<Item> = items
                .iter()
                .filter(|item| item.locked() == Some(true))
                .cloned()
                .collect();
            if !locked.is_empty() {
                service.unlock(&locked, cancel).await?;
            }
        }
        if flags.contains(SearchFlags::LOAD_SECRETS) {
            let readable: Vec<Item> = items
                .iter()
                .filter(|item| item.locked() != Some(true))
                .cloned()
                .collect();
            service.get_secrets(&readable, cancel).await?;
        }
        Ok(items)
    }

    pub fn search_sync(
        &self,
        attributes: &HashMap<String, String>,
        flags: SearchFlags,
        cancel: Option<&CancellationToken>,
    ) -> Result<Vec<Item>> {
        dual::block_on(self.search(attributes, flags, cancel))
    }

    /// Delete this collection and everything in it. Returns `false` if the
    /// user dismissed the confirmation prompt.
    pub async fn delete(&self, cancel: Option<&CancellationToken>) -> Result<bool> {
        let service = self.service()?;
        let reply = self.inner.object.call("Delete", Vec::new(), cancel).await?;
        let prompt: ObjectPath = reply_arg(&reply, 0, "Delete")?;
        if matches!(service.drive_prompt(&prompt, cancel).await?, PromptOutcome::Dismissed) {
            return Ok(false);
        }
        service.forget_collection(self.path());
        Ok(true)
    }

    pub fn delete_sync(&self, cancel: Option<&CancellationToken>) -> Result<bool> {
        dual::block_on(self.delete(cancel))
    }

    pub async fn refresh(&self, cancel: Option<&CancellationToken>) -> Result<()> {
        self.inner.object.refresh(cancel).await
    }

    pub fn refresh_sync(&self, cancel: Option<&CancellationToken>) -> Result<()> {
        dual::block_on(self.refresh(cancel))
    }

    pub fn label(&self) -> Option<String> {
        self.inner.object.cached("Label")
    }

    pub async fn set_label(&self, label: &str, cancel: Option<&CancellationToken>) -> Result<()> {
        self.inner
            .object
            .set_property("Label", Variant::from(label), cancel)
            .await
    }

    pub fn set_label_sync(&self, label: &str, cancel: Option<&CancellationToken>) -> Result<()> {
        dual::block_on(self.set_label(label, cancel))
    }

    /// Change the label without waiting for the service to confirm.
    pub fn set_label_detached(&self, label: &str) {
        self.inner
            .object
            .set_property_detached("Label", Variant::from(label));
    }

    pub fn locked(&self) -> Option<bool> {
        self.inner.object.cached("Locked")
    }

    /// Creation time, in seconds since the epoch.
    pub fn created(&self) -> Option<u64> {
        self.inner.object.cached("Created")
    }

    pub fn modified(&self) -> Option<u64> {
        self.inner.object.cached("Modified")
    }
}
