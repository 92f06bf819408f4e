//! Store, look up and clear secrets by attributes alone.

use std::collections::HashMap;
use std::slice;

use futures::future::try_join_all;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::dual;
use crate::errors::{IS_LOCKED, Result, usage_error};
use crate::item::item_properties;
use crate::service::{SearchPaths, Service};
use crate::value::SecretValue;
use crate::variant::ObjectPath;

/// Collections can be addressed through their alias under this prefix.
pub const ALIAS_PREFIX: &str = "/org/freedesktop/secrets/aliases/";
pub const DEFAULT_COLLECTION: &str = "default";

const DEFAULT_COLLECTION_LABEL: &str = "Default keyring";

fn collection_path(collection: Option<&str>) -> Result<ObjectPath> {
    match collection {
        Some(path) if path.starts_with('/') => ObjectPath::new(path),
        Some(alias) => ObjectPath::new(format!("{ALIAS_PREFIX}{alias}")),
        None => ObjectPath::new(format!("{ALIAS_PREFIX}{DEFAULT_COLLECTION}")),
    }
}

impl Service {
    /// Store `value` under `attributes`, replacing any item in the same
    /// collection with identical attributes.
    ///
    /// `collection` is an alias or a collection path, and defaults to the
    /// `default` alias. The default collection is created if it doesn't
    /// exist, and a locked collection is unlocked first.
    pub async fn store(
        &self,
        attributes: &HashMap<String, String>,
        collection: Option<&str>,
        label: &str,
        value: &SecretValue,
        cancel: Option<&CancellationToken>,
    ) -> Result<()> {
        let path = collection_path(collection)?;
        let is_default = collection.is_none_or(|name| name == DEFAULT_COLLECTION);
        let properties = item_properties(label, attributes);
        let (mut created, mut unlocked) = (false, false);
        loop {
            match self
                .create_item_path(&path, properties.clone(), value, true, cancel)
                .await
            {
                Ok(item) => {
                    debug!(%item, "stored secret");
                    return Ok(());
                }
                Err(err) if !created && is_default && err.is_missing_object() => {
                    debug!("creating the default collection");
                    self.create_collection_path(DEFAULT_COLLECTION_LABEL, Some(DEFAULT_COLLECTION), cancel)
                        .await?;
                    created = true;
                }
                Err(err) if !unlocked && err.is_remote(IS_LOCKED) => {
                    self.unlock_paths(slice::from_ref(&path), cancel).await?;
                    unlocked = true;
                }
                Err(err) => return Err(err),
            }
        }
    }

    pub fn store_sync(
        &self,
        attributes: &HashMap<String, String>,
        collection: Option<&str>,
        label: &str,
        value: &SecretValue,
        cancel: Option<&CancellationToken>,
    ) -> Result<()> {
        dual::block_on(self.store(attributes, collection, label, value, cancel))
    }

    /// The secret of the first item matching `attributes`. A locked match
    /// is unlocked first; `None` if nothing matched or the unlock was
    /// refused.
    pub async fn lookup(
        &self,
        attributes: &HashMap<String, String>,
        cancel: Option<&CancellationToken>,
    ) -> Result<Option<SecretValue>> {
        let SearchPaths { unlocked, locked } = self.search_paths(attributes, cancel).await?;
        let path = match (unlocked.into_iter().next(), locked.into_iter().next()) {
            (Some(path), _) => path,
            (None, Some(path)) => match self.unlock_paths(slice::from_ref(&path), cancel).await?.into_iter().next() {
                Some(path) => path,
                None => return Ok(None),
            },
            (None, None) => return Ok(None),
        };
        self.get_secret_for_path(&path, cancel).await
    }

    pub fn lookup_sync(
        &self,
        attributes: &HashMap<String, String>,
        cancel: Option<&CancellationToken>,
    ) -> Result<Option<SecretValue>> {
        dual::block_on(self.lookup(attributes, cancel))
    }

    /// Delete every unlocked item matching `attributes`, returning how many
    /// were deleted.
    ///
    /// An empty attribute map would match every item, so it is rejected.
    pub async fn clear(
        &self,
        attributes: &HashMap<String, String>,
        cancel: Option<&CancellationToken>,
    ) -> Result<usize> {
        if attributes.is_empty() {
            return Err(usage_error("clearing secrets needs at least one attribute"));
        }
        let SearchPaths { unlocked, .. } = self.search_paths(attributes, cancel).await?;
        let deleted = try_join_all(unlocked.iter().map(|path| self.delete_path(path, cancel))).await?;
        Ok(deleted.into_iter().filter(|deleted| *deleted).count())
    }

    pub fn clear_sync(&self, attributes: &HashMap<String, String>, cancel: Option<&CancellationToken>) -> Result<usize> {
        dual::block_on(self.clear(attributes, cancel))
    }
}
