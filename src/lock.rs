/*!

Batched locking and unlocking.

One `Lock` or `Unlock` call carries every requested path. The service
answers with the paths it transitioned right away and possibly a prompt;
the paths an accepted prompt reports are transitioned too. The `Locked`
property of every affected object is updated as soon as the call returns,
so nobody reads a stale value while the service's change notification is
still in flight.

*/

use std::collections::{HashMap, HashSet};

use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::collection::Collection;
use crate::dual;
use crate::errors::Result;
use crate::item::Item;
use crate::proxy::{RemoteObject, reply_arg};
use crate::service::{PromptOutcome, Service};
use crate::variant::{FromVariant, ObjectPath, Variant};

/// Objects with a `Locked` state: items and collections.
pub trait Lockable: Clone {
    #[doc(hidden)]
    fn remote(&self) -> &RemoteObject;

    fn object_path(&self) -> &ObjectPath {
        self.remote().path()
    }
}

impl Lockable for Item {
    fn remote(&self) -> &RemoteObject {
        self.object()
    }
}

impl Lockable for Collection {
    fn remote(&self) -> &RemoteObject {
        self.object()
    }
}

/// The outcome of a lock or unlock request.
#[derive(Debug, Clone)]
pub struct Transition<T> {
    /// How many objects the service reported as transitioned.
    pub count: usize,
    /// The caller's objects that were transitioned.
    pub objects: Vec<T>,
}

#[derive(Clone, Copy)]
enum Direction {
    Lock,
    Unlock,
}

impl Direction {
    fn method(self) -> &'static str {
        match self {
            Direction::Lock => "Lock",
            Direction::Unlock => "Unlock",
        }
    }

    fn locked(self) -> bool {
        matches!(self, Direction::Lock)
    }
}

impl Service {
    pub async fn lock<T: Lockable>(&self, objects: &[T], cancel: Option<&CancellationToken>) -> Result<Transition<T>> {
        self.xlock(Direction::Lock, objects, cancel).await
    }

    pub fn lock_sync<T: Lockable>(&self, objects: &[T], cancel: Option<&CancellationToken>) -> Result<Transition<T>> {
        dual::block_on(self.lock(objects, cancel))
    }

    /// Unlock `objects`, prompting the user if the service asks to.
    pub async fn unlock<T: Lockable>(
        &self,
        objects: &[T],
        cancel: Option<&CancellationToken>,
    ) -> Result<Transition<T>> {
        self.xlock(Direction::Unlock, objects, cancel).await
    }

    pub fn unlock_sync<T: Lockable>(&self, objects: &[T], cancel: Option<&CancellationToken>) -> Result<Transition<T>> {
        dual::block_on(self.unlock(objects, cancel))
    }

    pub async fn lock_paths(&self, paths: &[ObjectPath], cancel: Option<&CancellationToken>) -> Result<Vec<ObjectPath>> {
        self.xlock_paths(Direction::Lock, paths, cancel).await
    }

    pub fn lock_paths_sync(&self, paths: &[ObjectPath], cancel: Option<&CancellationToken>) -> Result<Vec<ObjectPath>> {
        dual::block_on(self.lock_paths(paths, cancel))
    }

    pub async fn unlock_paths(
        &self,
        paths: &[ObjectPath],
        cancel: Option<&CancellationToken>,
    ) -> Result<Vec<ObjectPath>> {
        self.xlock_paths(Direction::Unlock, paths, cancel).await
    }

    pub fn unlock_paths_sync(&self, paths: &[ObjectPath], cancel: Option<&CancellationToken>) -> Result<Vec<ObjectPath>> {
        dual::block_on(self.unlock_paths(paths, cancel))
    }

    async fn xlock<T: Lockable>(
        &self,
        direction: Direction,
        objects: &[T],
        cancel: Option<&CancellationToken>,
    ) -> Result<Transition<T>> {
        let mut table: HashMap<ObjectPath, &T> = HashMap::with_capacity(objects.len());
        let mut paths = Vec::with_capacity(objects.len());
        for object in objects {
            let path = object.object_path();
            if !table.contains_key(path) {
                table.insert(path.clone(), object);
                paths.push(path.clone());
            }
        }
        let done = self.xlock_paths(direction, &paths, cancel).await?;

        let mut transitioned = Vec::with_capacity(done.len());
        for path in &done {
            if let Some(object) = table.remove(path) {
                object
                    .remote()
                    .set_cached_property("Locked", Variant::Bool(direction.locked()));
                transitioned.push(object.clone());
            }
        }
        Ok(Transition {
            count: done.len(),
            objects: transitioned,
        })
    }

    async fn xlock_paths(
        &self,
        direction: Direction,
        paths: &[ObjectPath],
        cancel: Option<&CancellationToken>,
    ) -> Result<Vec<ObjectPath>> {
        let method = direction.method();
        let reply = self
            .inner
            .object
            .call(method, vec![Variant::paths(paths)], cancel)
            .await?;
        let mut done: Vec<ObjectPath> = reply_arg(&reply, 0, method)?;
        let prompt: ObjectPath = reply_arg(&reply, 1, method)?;
        if let PromptOutcome::Accepted(Some(result)) = self.drive_prompt(&prompt, cancel).await? {
            match Vec::<ObjectPath>::from_variant(&result) {
                Some(more) => done.extend(more),
                None => warn!(received = result.type_name(), "{method} prompt returned no object paths"),
            }
        }
        let mut seen = HashSet::with_capacity(done.len());
        done.retain(|path| seen.insert(path.clone()));

        let locked = Variant::Bool(direction.locked());
        for path in &done {
            if let Some(collection) = self.find_collection_instance(path) {
                collection.object().set_cached_property("Locked", locked.clone());
            }
            if let Some(item) = self.find_item_instance(path) {
                item.object().set_cached_property("Locked", locked.clone());
            }
        }
        Ok(done)
    }
}
