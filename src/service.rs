/*!

The secret service connection.

A [`Service`] wraps the `org.freedesktop.Secret.Service` object on one bus.
It owns the transfer session, the identity cache of its collections, and a
cache of items looked up directly by path whose collection isn't loaded.
Services are cheap to clone; clones share everything.

Every operation exists in an async form and a blocking `*_sync` form that
runs the async one on a private event context.

*/

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use bitflags::bitflags;
use futures::future::try_join_all;
use parking_lot::Mutex;
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::cache::{self, IdentityCache};
use crate::collection::{Collection, CollectionFlags};
use crate::config::ServiceConfig;
use crate::dual;
use crate::errors::{Error, Result, protocol_error, usage_error};
use crate::item::{Item, ItemFlags};
use crate::prompt::Prompt;
use crate::proxy::{RemoteObject, reply_arg};
use crate::registry::ServiceRegistry;
use crate::session::Session;
use crate::transport::{COLLECTION_INTERFACE, ITEM_INTERFACE, SECRETS_PATH, SERVICE_INTERFACE, Transport};
use crate::value::SecretValue;
use crate::variant::{FromVariant, ObjectPath, Variant, attributes_to_variant};

pub(crate) const COLLECTION_LABEL: &str = "org.freedesktop.Secret.Collection.Label";

bitflags! {
    /// What a service instance has loaded.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ServiceFlags: u32 {
        const OPEN_SESSION = 1 << 1;
        const LOAD_COLLECTIONS = 1 << 2;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct SearchFlags: u32 {
        /// Return every match rather than just the first.
        const ALL = 1 << 1;
        /// Unlock locked matches, prompting if necessary.
        const UNLOCK = 1 << 2;
        /// Load the secrets of the unlocked matches.
        const LOAD_SECRETS = 1 << 3;
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchPaths {
    pub unlocked: Vec<ObjectPath>,
    pub locked: Vec<ObjectPath>,
}

#[derive(Debug, Clone, Default)]
pub struct SearchItems {
    pub unlocked: Vec<Item>,
    pub locked: Vec<Item>,
}

/// How a method that may need a prompt finished.
pub(crate) enum PromptOutcome {
    NotNeeded,
    Accepted(Option<Variant>),
    Dismissed,
}

pub(crate) struct ServiceInner {
    pub(crate) object: RemoteObject,
    pub(crate) config: ServiceConfig,
    session: OnceCell<Session>,
    pub(crate) collections: IdentityCache<Collection>,
    /// Items looked up by path whose collection isn't instantiated.
    pub(crate) items: IdentityCache<Item>,
    on_drop: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl Drop for ServiceInner {
    fn drop(&mut self) {
        if let Some(hook) = self.on_drop.get_mut().take() {
            hook();
        }
    }
}

#[derive(Clone)]
pub struct Service {
    pub(crate) inner: Arc<ServiceInner>,
}

impl PartialEq for Service {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Service {}

impl std::fmt::Debug for Service {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Service")
            .field("bus_name", &self.bus_name())
            .field("flags", &self.flags())
            .finish()
    }
}

impl Service {
    /// Get the shared service for this bus, creating it if needed.
    pub async fn get(
        transport: Arc<dyn Transport>,
        config: ServiceConfig,
        flags: ServiceFlags,
        cancel: Option<&CancellationToken>,
    ) -> Result<Service> {
        ServiceRegistry::global()
            .get(transport, config, flags, cancel)
            .await
    }

    pub fn get_sync(
        transport: Arc<dyn Transport>,
        config: ServiceConfig,
        flags: ServiceFlags,
        cancel: Option<&CancellationToken>,
    ) -> Result<Service> {
        dual::block_on(Self::get(transport, config, flags, cancel))
    }

    /// Open a private service connection that is not shared.
    pub async fn open(
        transport: Arc<dyn Transport>,
        config: ServiceConfig,
        flags: ServiceFlags,
        cancel: Option<&CancellationToken>,
    ) -> Result<Service> {
        let path = ObjectPath::new(SECRETS_PATH)?;
        let object = RemoteObject::connect(transport, &config.bus_name, path, SERVICE_INTERFACE, cancel).await?;
        let service = Service {
            inner: Arc::new(ServiceInner {
                object,
                config,
                session: OnceCell::new(),
                collections: IdentityCache::new(),
                items: IdentityCache::new(),
                on_drop: Mutex::new(None),
            }),
        };
        service.watch_signals().await?;
        service.ensure_for_flags(flags, cancel).await?;
        Ok(service)
    }

    pub fn open_sync(
        transport: Arc<dyn Transport>,
        config: ServiceConfig,
        flags: ServiceFlags,
        cancel: Option<&CancellationToken>,
    ) -> Result<Service> {
        dual::block_on(Self::open(transport, config, flags, cancel))
    }

    pub(crate) fn from_inner(inner: Arc<ServiceInner>) -> Self {
        Self { inner }
    }

    pub(crate) fn downgrade(&self) -> Weak<ServiceInner> {
        Arc::downgrade(&self.inner)
    }

    /// Resolve a weak back-reference held by a collection or item.
    pub(crate) fn upgrade(weak: &Weak<ServiceInner>) -> Result<Service> {
        weak.upgrade()
            .map(Self::from_inner)
            .ok_or_else(|| usage_error("the secret service this object belongs to has been dropped"))
    }

    pub(crate) fn set_drop_hook(&self, hook: impl FnOnce() + Send + 'static) {
        *self.inner.on_drop.lock() = Some(Box::new(hook));
    }

    pub(crate) fn transport(&self) -> &Arc<dyn Transport> {
        self.inner.object.transport()
    }

    pub fn bus_name(&self) -> &str {
        self.inner.object.bus_name()
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.inner.config
    }

    pub(crate) fn object_at(&self, path: ObjectPath, interface: &'static str) -> RemoteObject {
        RemoteObject::bare(Arc::clone(self.transport()), self.bus_name(), path, interface)
    }

    async fn watch_signals(&self) -> Result<()> {
        let object = &self.inner.object;
        object
            .listen_properties(self.downgrade(), |inner, changed| {
                if changed.iter().any(|name| name == "Collections") {
                    Service::from_inner(Arc::clone(inner)).reload_in_background();
                }
            })
            .await?;
        object
            .listen(self.downgrade(), SERVICE_INTERFACE, None, |inner, message| {
                let service = Service::from_inner(Arc::clone(inner));
                match message.member.as_str() {
                    "CollectionCreated" | "CollectionDeleted" => service.reload_in_background(),
                    "CollectionChanged" => {
                        let changed = message.args.first().and_then(Variant::as_path);
                        if let Some(collection) = changed.and_then(|path| service.find_collection_instance(path)) {
                            collection.refresh_in_background();
                        }
                    }
                    _ => {}
                }
            })
            .await
    }

    /// Reload collections after a change notification, if they were
    /// loaded to begin with.
    fn reload_in_background(&self) {
        if !self.inner.collections.is_loaded() {
            return;
        }
        let weak = self.downgrade();
        self.transport().spawn(Box::pin(async move {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            let service = Service::from_inner(inner);
            if let Err(err) = service.load_collections(None).await {
                warn!(error = %err, "couldn't reload secret service collections");
            }
        }));
    }

    /// Restart the change notification pumps of this service and every
    /// object it caches. A service built by a blocking call stops hearing
    /// about changes once that call returns, until it is used again from
    /// an async context.
    pub(crate) fn resume_listeners(&self) {
        self.inner.object.resume_listeners();
        for collection in self.inner.collections.snapshot().values() {
            collection.object().resume_listeners();
            for item in collection.item_cache().snapshot().values() {
                item.object().resume_listeners();
            }
        }
        for item in self.inner.items.snapshot().values() {
            item.object().resume_listeners();
        }
    }

    /// What this instance has loaded so far.
    pub fn flags(&self) -> ServiceFlags {
        let mut flags = ServiceFlags::empty();
        if self.inner.session.initialized() {
            flags |= ServiceFlags::OPEN_SESSION;
        }
        if self.inner.collections.is_loaded() {
            flags |= ServiceFlags::LOAD_COLLECTIONS;
        }
        flags
    }

    /// Load whatever `flags` asks for that isn't loaded yet.
    pub async fn ensure_for_flags(&self, flags: ServiceFlags, cancel: Option<&CancellationToken>) -> Result<()> {
        self.resume_listeners();
        let missing = flags - self.flags();
        if missing.contains(ServiceFlags::OPEN_SESSION) {
            self.ensure_session(cancel).await?;
        }
        if missing.contains(ServiceFlags::LOAD_COLLECTIONS) {
            self.load_collections(cancel).await?;
        }
        Ok(())
    }

    pub fn ensure_for_flags_sync(&self, flags: ServiceFlags, cancel: Option<&CancellationToken>) -> Result<()> {
        dual::block_on(self.ensure_for_flags(flags, cancel))
    }

    pub(crate) async fn session(&self, cancel: Option<&CancellationToken>) -> Result<&Session> {
        self.inner
            .session
            .get_or_try_init(|| Session::open(&self.inner.object, self.inner.config.prefer_plain, cancel))
            .await
    }

    /// Open the transfer session if it isn't open yet, and return its path.
    pub async fn ensure_session(&self, cancel: Option<&CancellationToken>) -> Result<ObjectPath> {
        Ok(self.session(cancel).await?.path().clone())
    }

    pub fn ensure_session_sync(&self, cancel: Option<&CancellationToken>) -> Result<ObjectPath> {
        dual::block_on(self.ensure_session(cancel))
    }

    pub fn session_path(&self) -> Option<ObjectPath> {
        self.inner.session.get().map(|session| session.path().clone())
    }

    /// The negotiated session algorithm, once a session is open.
    pub fn session_algorithms(&self) -> Option<&'static str> {
        self.inner.session.get().map(Session::algorithms)
    }

    /// Re-read the service's properties.
    pub async fn refresh(&self, cancel: Option<&CancellationToken>) -> Result<()> {
        self.inner.object.refresh(cancel).await
    }

    pub fn refresh_sync(&self, cancel: Option<&CancellationToken>) -> Result<()> {
        dual::block_on(self.refresh(cancel))
    }

    /// Bring the collection cache in line with the service's `Collections`
    /// property.
    pub async fn load_collections(&self, cancel: Option<&CancellationToken>) -> Result<()> {
        let paths: Vec<ObjectPath> = self
            .inner
            .object
            .cached("Collections")
            .ok_or_else(|| protocol_error("the secret service has no Collections property"))?;
        debug!(count = paths.len(), "loading secret service collections");
        let loaded = cache::reload(&self.inner.collections, &paths, |path| {
            Collection::instantiate(self, path, CollectionFlags::LOAD_ITEMS, cancel)
        })
        .await;
        self.release_adopted_items();
        loaded
    }

    pub fn load_collections_sync(&self, cancel: Option<&CancellationToken>) -> Result<()> {
        dual::block_on(self.load_collections(cancel))
    }

    /// The loaded collections, or `None` if they haven't been loaded.
    pub fn collections(&self) -> Option<Vec<Collection>> {
        self.inner.collections.values()
    }

    pub fn find_collection_instance(&self, path: &ObjectPath) -> Option<Collection> {
        self.inner.collections.lookup(path)
    }

    pub fn find_item_instance(&self, path: &ObjectPath) -> Option<Item> {
        let collection = path.parent().and_then(|parent| self.find_collection_instance(&parent));
        match collection {
            Some(collection) => collection
                .cached_item(path)
                .or_else(|| self.inner.items.lookup(path)),
            None => self.inner.items.lookup(path),
        }
    }

    /// Drop the items cached here that a loaded collection now holds.
    pub(crate) fn release_adopted_items(&self) {
        for path in self.inner.items.snapshot().keys() {
            let adopted = path
                .parent()
                .and_then(|parent| self.find_collection_instance(&parent))
                .is_some_and(|collection| collection.cached_item(path).is_some());
            if adopted {
                self.inner.items.remove(path);
            }
        }
    }

    pub(crate) fn forget_item(&self, path: &ObjectPath) {
        if let Some(collection) = path.parent().and_then(|parent| self.find_collection_instance(&parent)) {
            collection.forget_item(path);
        }
        self.inner.items.remove(path);
    }

    pub(crate) fn forget_collection(&self, path: &ObjectPath) {
        self.inner.collections.remove(path);
    }

    /// Search every collection for items matching `attributes`.
    pub async fn search_paths(
        &self,
        attributes: &HashMap<String, String>,
        cancel: Option<&CancellationToken>,
    ) -> Result<SearchPaths> {
        let reply = self
            .inner
            .object
            .call("SearchItems", vec![attributes_to_variant(attributes)], cancel)
            .await?;
        Ok(SearchPaths {
            unlocked: reply_arg(&reply, 0, "SearchItems")?,
            locked: reply_arg(&reply, 1, "SearchItems")?,
        })
    }

    pub fn search_paths_sync(
        &self,
        attributes: &HashMap<String, String>,
        cancel: Option<&CancellationToken>,
    ) -> Result<SearchPaths> {
        dual::block_on(self.search_paths(attributes, cancel))
    }

    pub async fn search_items(
        &self,
        attributes: &HashMap<String, String>,
        cancel: Option<&CancellationToken>,
    ) -> Result<SearchItems> {
        let paths = self.search_paths(attributes, cancel).await?;
        let (unlocked, locked) = futures::try_join!(
            self.items_for_paths(&paths.unlocked, cancel),
            self.items_for_paths(&paths.locked, cancel),
        )?;
        Ok(SearchItems { unlocked, locked })
    }

    pub fn search_items_sync(
        &self,
        attributes: &HashMap<String, String>,
        cancel: Option<&CancellationToken>,
    ) -> Result<SearchItems> {
        dual::block_on(self.search_items(attributes, cancel))
    }

    /// Search, then optionally unlock the matches and load their secrets.
    ///
    /// Without [`SearchFlags::ALL`] at most one item is returned, preferring
    /// an unlocked one.
    pub async fn search(
        &self,
        attributes: &HashMap<String, String>,
        flags: SearchFlags,
        cancel: Option<&CancellationToken>,
    ) -> Result<Vec<Item>> {
        let SearchPaths { mut unlocked, mut locked } = self.search_paths(attributes, cancel).await?;
        if !flags.contains(SearchFlags::ALL) {
            if unlocked.is_empty() {
                locked.truncate(1);
            } else {
                unlocked.truncate(1);
                locked.clear();
            }
        }
        if flags.contains(SearchFlags::UNLOCK) && !locked.is_empty() {
            self.unlock_paths(&locked, cancel).await?;
        }
        unlocked.extend(locked);
        let items = self.items_for_paths(&unlocked, cancel).await?;
        if flags.contains(SearchFlags::LOAD_SECRETS) {
            let readable: Vec<Item> = items
                .iter()
                .filter(|item| item.locked() != Some(true))
                .cloned()
                .collect();
            self.get_secrets(&readable, cancel).await?;
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

    pub(crate) async fn items_for_paths(
        &self,
        paths: &[ObjectPath],
        cancel: Option<&CancellationToken>,
    ) -> Result<Vec<Item>> {
        try_join_all(
            paths
                .iter()
                .map(|path| Item::new_for_path(self, path.clone(), ItemFlags::empty(), cancel)),
        )
        .await
    }

    /// Fetch the secrets of several items in one round trip.
    ///
    /// Locked items are left out of the result.
    pub async fn get_secrets_for_paths(
        &self,
        paths: &[ObjectPath],
        cancel: Option<&CancellationToken>,
    ) -> Result<HashMap<ObjectPath, SecretValue>> {
        if paths.is_empty() {
            return Ok(HashMap::new());
        }
        let session = self.session(cancel).await?;
        let reply = self
            .inner
            .object
            .call(
                "GetSecrets",
                vec![Variant::paths(paths), Variant::Path(session.path().clone())],
                cancel,
            )
            .await?;
        let Some(secrets) = reply.first().and_then(Variant::as_dict) else {
            return Err(protocol_error("unexpected reply to GetSecrets"));
        };
        let mut values = HashMap::with_capacity(secrets.len());
        for (path, secret) in secrets {
            values.insert(ObjectPath::new(path.as_str())?, session.decode(secret)?);
        }
        Ok(values)
    }

    pub fn get_secrets_for_paths_sync(
        &self,
        paths: &[ObjectPath],
        cancel: Option<&CancellationToken>,
    ) -> Result<HashMap<ObjectPath, SecretValue>> {
        dual::block_on(self.get_secrets_for_paths(paths, cancel))
    }

    pub async fn get_secret_for_path(
        &self,
        path: &ObjectPath,
        cancel: Option<&CancellationToken>,
    ) -> Result<Option<SecretValue>> {
        let mut values = self
            .get_secrets_for_paths(std::slice::from_ref(path), cancel)
            .await?;
        Ok(values.remove(path))
    }

    pub fn get_secret_for_path_sync(
        &self,
        path: &ObjectPath,
        cancel: Option<&CancellationToken>,
    ) -> Result<Option<SecretValue>> {
        dual::block_on(self.get_secret_for_path(path, cancel))
    }

    /// Fetch the secrets of `items` in one round trip. Each item's cached
    /// secret is updated as well.
    pub async fn get_secrets(
        &self,
        items: &[Item],
        cancel: Option<&CancellationToken>,
    ) -> Result<HashMap<Item, SecretValue>> {
        let paths: Vec<ObjectPath> = items.iter().map(|item| item.path().clone()).collect();
        let mut values = self.get_secrets_for_paths(&paths, cancel).await?;
        let mut secrets = HashMap::with_capacity(values.len());
        for item in items {
            if let Some(value) = values.remove(item.path()) {
                item.cache_secret(value.clone());
                secrets.insert(item.clone(), value);
            }
        }
        Ok(secrets)
    }

    pub fn get_secrets_sync(
        &self,
        items: &[Item],
        cancel: Option<&CancellationToken>,
    ) -> Result<HashMap<Item, SecretValue>> {
        dual::block_on(self.get_secrets(items, cancel))
    }

    /// Perform `prompt` with this service's window id.
    ///
    /// Returns the prompt's result, or `None` if it was dismissed.
    pub async fn prompt(&self, prompt: &Prompt, cancel: Option<&CancellationToken>) -> Result<Option<Variant>> {
        if prompt.perform(&self.inner.config.window_id, cancel).await? {
            Ok(prompt.raw_result())
        } else {
            Ok(None)
        }
    }

    pub fn prompt_sync(&self, prompt: &Prompt, cancel: Option<&CancellationToken>) -> Result<Option<Variant>> {
        dual::block_on(self.prompt(prompt, cancel))
    }

    /// Like [`Service::prompt`], with the result read as `T`. A result of
    /// another type is logged and reported as `None`.
    pub async fn prompt_as<T: FromVariant>(
        &self,
        prompt: &Prompt,
        cancel: Option<&CancellationToken>,
    ) -> Result<Option<T>> {
        if prompt.perform(&self.inner.config.window_id, cancel).await? {
            Ok(prompt.result::<T>())
        } else {
            Ok(None)
        }
    }

    pub fn prompt_as_sync<T: FromVariant>(
        &self,
        prompt: &Prompt,
        cancel: Option<&CancellationToken>,
    ) -> Result<Option<T>> {
        dual::block_on(self.prompt_as(prompt, cancel))
    }

    pub(crate) async fn drive_prompt(
        &self,
        path: &ObjectPath,
        cancel: Option<&CancellationToken>,
    ) -> Result<PromptOutcome> {
        if path.is_root() {
            return Ok(PromptOutcome::NotNeeded);
        }
        let prompt = Prompt::new(self, path.clone());
        if prompt.perform(&self.inner.config.window_id, cancel).await? {
            Ok(PromptOutcome::Accepted(prompt.raw_result()))
        } else {
            Ok(PromptOutcome::Dismissed)
        }
    }

    /// Delete the item at `path`. Returns `false` if the user dismissed the
    /// confirmation prompt.
    pub async fn delete_path(&self, path: &ObjectPath, cancel: Option<&CancellationToken>) -> Result<bool> {
        let reply = self
            .object_at(path.clone(), ITEM_INTERFACE)
            .call("Delete", Vec::new(), cancel)
            .await?;
        let prompt: ObjectPath = reply_arg(&reply, 0, "Delete")?;
        let deleted = !matches!(self.drive_prompt(&prompt, cancel).await?, PromptOutcome::Dismissed);
        if deleted {
            self.forget_item(path);
        }
        Ok(deleted)
    }

    pub fn delete_path_sync(&self, path: &ObjectPath, cancel: Option<&CancellationToken>) -> Result<bool> {
        dual::block_on(self.delete_path(path, cancel))
    }

    /// The collection an alias such as `default` points at.
    pub async fn read_alias_path(
        &self,
        alias: &str,
        cancel: Option<&CancellationToken>,
    ) -> Result<Option<ObjectPath>> {
        let reply = self
            .inner
            .object
            .call("ReadAlias", vec![Variant::from(alias)], cancel)
            .await?;
        let path: ObjectPath = reply_arg(&reply, 0, "ReadAlias")?;
        Ok((!path.is_root()).then_some(path))
    }

    pub fn read_alias_path_sync(&self, alias: &str, cancel: Option<&CancellationToken>) -> Result<Option<ObjectPath>> {
        dual::block_on(self.read_alias_path(alias, cancel))
    }

    /// Point `alias` at a collection, or remove it.
    pub async fn set_alias(
        &self,
        alias: &str,
        collection: Option<&ObjectPath>,
        cancel: Option<&CancellationToken>,
    ) -> Result<()> {
        let target = collection.cloned().unwrap_or_else(ObjectPath::root);
        self.inner
            .object
            .call("SetAlias", vec![Variant::from(alias), Variant::Path(target)], cancel)
            .await?;
        Ok(())
    }

    pub fn set_alias_sync(
        &self,
        alias: &str,
        collection: Option<&ObjectPath>,
        cancel: Option<&CancellationToken>,
    ) -> Result<()> {
        dual::block_on(self.set_alias(alias, collection, cancel))
    }

    /// Create a collection, prompting if the service asks to.
    pub async fn create_collection_path(
        &self,
        label: &str,
        alias: Option<&str>,
        cancel: Option<&CancellationToken>,
    ) -> Result<ObjectPath> {
        let properties = Variant::dict([(COLLECTION_LABEL, Variant::from(label))]);
        let reply = self
            .inner
            .object
            .call(
                "CreateCollection",
                vec![properties, Variant::from(alias.unwrap_or(""))],
                cancel,
            )
            .await?;
        let path: ObjectPath = reply_arg(&reply, 0, "CreateCollection")?;
        let prompt: ObjectPath = reply_arg(&reply, 1, "CreateCollection")?;
        self.created_path(path, &prompt, "CreateCollection", cancel).await
    }

    pub fn create_collection_path_sync(
        &self,
        label: &str,
        alias: Option<&str>,
        cancel: Option<&CancellationToken>,
    ) -> Result<ObjectPath> {
        dual::block_on(self.create_collection_path(label, alias, cancel))
    }

    /// Create (or with `replace`, update) an item in `collection`.
    pub async fn create_item_path(
        &self,
        collection: &ObjectPath,
        properties: Variant,
        value: &SecretValue,
        replace: bool,
        cancel: Option<&CancellationToken>,
    ) -> Result<ObjectPath> {
        let secret = self.session(cancel).await?.encode(value)?;
        let reply = self
            .object_at(collection.clone(), COLLECTION_INTERFACE)
            .call("CreateItem", vec![properties, secret, Variant::Bool(replace)], cancel)
            .await?;
        let path: ObjectPath = reply_arg(&reply, 0, "CreateItem")?;
        let prompt: ObjectPath = reply_arg(&reply, 1, "CreateItem")?;
        self.created_path(path, &prompt, "CreateItem", cancel).await
    }

    pub fn create_item_path_sync(
        &self,
        collection: &ObjectPath,
        properties: Variant,
        value: &SecretValue,
        replace: bool,
        cancel: Option<&CancellationToken>,
    ) -> Result<ObjectPath> {
        dual::block_on(self.create_item_path(collection, properties, value, replace, cancel))
    }

    /// A create method returns either the new object's path or a prompt
    /// whose result is that path.
    async fn created_path(
        &self,
        path: ObjectPath,
        prompt: &ObjectPath,
        method: &str,
        cancel: Option<&CancellationToken>,
    ) -> Result<ObjectPath> {
        if !path.is_root() {
            return Ok(path);
        }
        match self.drive_prompt(prompt, cancel).await? {
            PromptOutcome::Accepted(Some(Variant::Path(created))) if !created.is_root() => Ok(created),
            PromptOutcome::Dismissed => Err(Error::Dismissed),
            PromptOutcome::Accepted(_) | PromptOutcome::NotNeeded => {
                Err(protocol_error(format!("{method} created no object")))
            }
        }
    }
}
