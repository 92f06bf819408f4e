/*!

Stored secret items.

*/

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use bitflags::bitflags;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::cache::IdentityCache;
use crate::collection::Collection;
use crate::dual;
use crate::errors::Result;
use crate::proxy::RemoteObject;
use crate::service::{Service, ServiceInner};
use crate::transport::ITEM_INTERFACE;
use crate::value::SecretValue;
use crate::variant::{ObjectPath, Variant, attributes_to_variant};

pub(crate) const ITEM_LABEL: &str = "org.freedesktop.Secret.Item.Label";
pub(crate) const ITEM_ATTRIBUTES: &str = "org.freedesktop.Secret.Item.Attributes";

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ItemFlags: u32 {
        const LOAD_SECRET = 1 << 1;
    }
}

struct ItemInner {
    object: RemoteObject,
    service: Weak<ServiceInner>,
    secret: Mutex<Option<SecretValue>>,
}

/// A stored secret with its label and lookup attributes.
///
/// Items compare and hash by identity, so they can key the map returned by
/// [`Service::get_secrets`].
#[derive(Clone)]
pub struct Item {
    inner: Arc<ItemInner>,
}

impl PartialEq for Item {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Item {}

impl std::hash::Hash for Item {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        Arc::as_ptr(&self.inner).hash(state);
    }
}

impl std::fmt::Debug for Item {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Item")
            .field("path", self.path())
            .finish_non_exhaustive()
    }
}

/// The `a{sv}` properties `CreateItem` expects.
pub fn item_properties(label: &str, attributes: &HashMap<String, String>) -> Variant {
    Variant::dict([
        (ITEM_LABEL, Variant::from(label)),
        (ITEM_ATTRIBUTES, attributes_to_variant(attributes)),
    ])
}

impl Item {
    /// Get the item at `path`, reusing the cached instance if there is one.
    pub async fn new_for_path(
        service: &Service,
        path: ObjectPath,
        flags: ItemFlags,
        cancel: Option<&CancellationToken>,
    ) -> Result<Item> {
        Self::load(service, None, path, flags, cancel).await
    }

    pub fn new_for_path_sync(
        service: &Service,
        path: ObjectPath,
        flags: ItemFlags,
        cancel: Option<&CancellationToken>,
    ) -> Result<Item> {
        dual::block_on(Self::new_for_path(service, path, flags, cancel))
    }

    /// Items are cached by their collection when it is instantiated, and by
    /// the service otherwise.
    pub(crate) async fn load(
        service: &Service,
        collection: Option<&Collection>,
        path: ObjectPath,
        flags: ItemFlags,
        cancel: Option<&CancellationToken>,
    ) -> Result<Item> {
        let owner = match collection {
            Some(collection) => Some(collection.clone()),
            None => path
                .parent()
                .and_then(|parent| service.find_collection_instance(&parent)),
        };
        if let Some(existing) = Self::cached(service, owner.as_ref(), &path) {
            existing.ensure_for_flags(flags, cancel).await?;
            return Ok(existing);
        }

        let candidate = Self::connect(service, path.clone(), cancel).await?;
        let cache: &IdentityCache<Item> = match &owner {
            Some(collection) => collection.item_cache(),
            None => &service.inner.items,
        };
        let item = cache.get_or_insert(path, candidate);
        item.ensure_for_flags(flags, cancel).await?;
        Ok(item)
    }

    /// The instance already cached for `path`. One the service still holds
    /// moves to `owner`.
    fn cached(service: &Service, owner: Option<&Collection>, path: &ObjectPath) -> Option<Item> {
        match owner {
            Some(collection) => collection.cached_item(path).or_else(|| {
                let orphan = service.inner.items.lookup(path)?;
                Some(collection.item_cache().get_or_insert(path.clone(), orphan))
            }),
            None => service.inner.items.lookup(path),
        }
    }

    /// Build an instance for a reload of a collection's item cache to
    /// publish, reusing the one the service holds if there is one.
    pub(crate) async fn instantiate(
        service: &Service,
        path: ObjectPath,
        cancel: Option<&CancellationToken>,
    ) -> Result<Item> {
        if let Some(orphan) = service.inner.items.lookup(&path) {
            return Ok(orphan);
        }
        Self::connect(service, path, cancel).await
    }

    async fn connect(service: &Service, path: ObjectPath, cancel: Option<&CancellationToken>) -> Result<Item> {
        let object = RemoteObject::connect(
            Arc::clone(service.transport()),
            service.bus_name(),
            path,
            ITEM_INTERFACE,
            cancel,
        )
        .await?;
        let item = Item {
            inner: Arc::new(ItemInner {
                object,
                service: service.downgrade(),
                secret: Mutex::new(None),
            }),
        };
        item.inner
            .object
            .listen_properties(Arc::downgrade(&item.inner), |_, _| {})
            .await?;
        Ok(item)
    }

    /// Store a new secret in `collection`; with `replace`, an existing item
    /// with the same attributes is updated instead.
    pub async fn create(
        collection: &Collection,
        label: &str,
        attributes: &HashMap<String, String>,
        value: &SecretValue,
        replace: bool,
        cancel: Option<&CancellationToken>,
    ) -> Result<Item> {
        let service = collection.service()?;
        let properties = item_properties(label, attributes);
        let path = service
            .create_item_path(collection.path(), properties, value, replace, cancel)
            .await?;
        let item = Self::load(&service, Some(collection), path, ItemFlags::empty(), cancel).await?;
        item.cache_secret(value.clone());
        Ok(item)
    }

    pub fn create_sync(
        collection: &Collection,
        label: &str,
        attributes: &HashMap<String, String>,
        value: &SecretValue,
        replace: bool,
        cancel: Option<&CancellationToken>,
    ) -> Result<Item> {
        dual::block_on(Self::create(collection, label, attributes, value, replace, cancel))
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

    pub fn flags(&self) -> ItemFlags {
        if self.inner.secret.lock().is_some() {
            ItemFlags::LOAD_SECRET
        } else {
            ItemFlags::empty()
        }
    }

    pub async fn ensure_for_flags(&self, flags: ItemFlags, cancel: Option<&CancellationToken>) -> Result<()> {
        let missing = flags - self.flags();
        if missing.contains(ItemFlags::LOAD_SECRET) {
            self.load_secret(cancel).await?;
        }
        Ok(())
    }

    pub fn ensure_for_flags_sync(&self, flags: ItemFlags, cancel: Option<&CancellationToken>) -> Result<()> {
        dual::block_on(self.ensure_for_flags(flags, cancel))
    }

    pub(crate) fn refresh_in_background(&self) {
        let weak = Arc::downgrade(&self.inner);
        self.inner.object.transport().spawn(Box::pin(async move {
            if let Some(inner) = weak.upgrade() {
                if let Err(err) = inner.object.refresh(None).await {
                    warn!(path = %inner.object.path(), error = %err, "couldn't refresh item");
                }
            }
        }));
    }

    /// The secret loaded by the last call that fetched it, if any.
    pub fn secret(&self) -> Option<SecretValue> {
        self.inner.secret.lock().clone()
    }

    pub(crate) fn cache_secret(&self, value: SecretValue) {
        *self.inner.secret.lock() = Some(value);
    }

    /// Fetch this item's secret from the service.
    pub async fn load_secret(&self, cancel: Option<&CancellationToken>) -> Result<SecretValue> {
        let service = self.service()?;
        let session = service.session(cancel).await?;
        let reply = self
            .inner
            .object
            .call("GetSecret", vec![Variant::Path(session.path().clone())], cancel)
            .await?;
        let secret = reply
            .first()
            .ok_or_else(|| crate::errors::protocol_error("GetSecret returned no secret"))?;
        let value = session.decode(secret)?;
        self.cache_secret(value.clone());
        Ok(value)
    }

    pub fn load_secret_sync(&self, cancel: Option<&CancellationToken>) -> Result<SecretValue> {
        dual::block_on(self.load_secret(cancel))
    }

    /// Fetch the secrets of several items in one round trip. Locked items
    /// are skipped.
    pub async fn load_secrets(items: &[Item], cancel: Option<&CancellationToken>) -> Result<()> {
        let Some(first) = items.first() else {
            return Ok(());
        };
        first.service()?.get_secrets(items, cancel).await?;
        Ok(())
    }

    pub fn load_secrets_sync(items: &[Item], cancel: Option<&CancellationToken>) -> Result<()> {
        dual::block_on(Self::load_secrets(items, cancel))
    }

    pub async fn set_secret(&self, value: &SecretValue, cancel: Option<&CancellationToken>) -> Result<()> {
        let service = self.service()?;
        let secret = service.session(cancel).await?.encode(value)?;
        self.inner.object.call("SetSecret", vec![secret], cancel).await?;
        self.cache_secret(value.clone());
        Ok(())
    }

    pub fn set_secret_sync(&self, value: &SecretValue, cancel: Option<&CancellationToken>) -> Result<()> {
        dual::block_on(self.set_secret(value, cancel))
    }

    /// Delete the item. Returns `false` if the user dismissed the
    /// confirmation prompt.
    pub async fn delete(&self, cancel: Option<&CancellationToken>) -> Result<bool> {
        self.service()?.delete_path(self.path(), cancel).await
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

    pub fn attributes(&self) -> Option<HashMap<String, String>> {
        self.inner.object.cached("Attributes")
    }

    pub async fn set_attributes(
        &self,
        attributes: &HashMap<String, String>,
        cancel: Option<&CancellationToken>,
    ) -> Result<()> {
        self.inner
            .object
            .set_property("Attributes", attributes_to_variant(attributes), cancel)
            .await
    }

    pub fn set_attributes_sync(
        &self,
        attributes: &HashMap<String, String>,
        cancel: Option<&CancellationToken>,
    ) -> Result<()> {
        dual::block_on(self.set_attributes(attributes, cancel))
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
