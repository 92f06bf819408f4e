/*!

# Secret Service client engine

This crate is a client for the
[freedesktop.org Secret Service](https://specifications.freedesktop.org/secret-service/)
protocol, the D-Bus API that GNOME Keyring, KWallet and KeePassXC use to
store passwords and other secrets on behalf of applications.

The crate contains the protocol engine. It does not open a bus
connection itself: the embedding application supplies a [`Transport`]
that can call methods, deliver signals and run background tasks, and the
engine does everything else.

## Objects

A [`Service`] is the connection to the secret service on one bus. It
holds the transfer session (plain or Diffie-Hellman/AES encrypted) and a
cache of the service's [`Collection`]s, each of which caches its
[`Item`]s. There is at most one live `Collection` or `Item` per object
path, so two lookups of the same path return the same instance, and the
cached properties of that instance are kept current by the service's
change notifications.

[`Service::get`] returns a process-wide shared service per bus, managed
by a [`ServiceRegistry`]. The shared service goes away when its last clone
is dropped. [`Service::open`] creates a private one instead.

## Async and blocking calls

Every operation is an `async fn` with a blocking `*_sync` twin. The
blocking form runs the async one on a private single-threaded event
context, so both styles share the same behavior and errors. Blocking
calls must not be made from inside an async context; they fail with
[`Error::Usage`] instead of deadlocking.

Operations take an optional [`CancellationToken`](tokio_util::sync::CancellationToken).
Cancelling it aborts the remote calls of that operation only.

## Prompts

Unlocking, deleting and creating collections may need the user's
confirmation. The service then returns a [`Prompt`], which the engine
performs with the window id from the [`ServiceConfig`]. A dismissed
prompt is not an error: the operation reports that nothing happened.
If the secret service leaves the bus while a prompt is showing, the
prompt counts as dismissed.

## Passwords

For the common case of storing a single password, [`Service::store`],
[`Service::lookup`] and [`Service::clear`] work from attributes alone.

## Headless usage

If you must use the secret-service on a headless linux box,
be aware that there are known issues with getting
dbus and secret-service and the gnome keyring
to work properly in headless environments.
For an excellent treatment of all the headless dbus issues, see
[this answer on ServerFault](https://serverfault.com/a/906224/79617).

 */

mod cache;
pub mod collection;
pub mod config;
mod dual;
pub mod errors;
pub mod item;
pub mod lock;
pub mod password;
pub mod prompt;
pub mod proxy;
pub mod registry;
pub mod service;
pub mod session;
pub mod transport;
pub mod value;
pub mod variant;

pub use collection::{Collection, CollectionFlags};
pub use config::ServiceConfig;
pub use errors::{Error, Result};
pub use item::{Item, ItemFlags};
pub use lock::{Lockable, Transition};
pub use prompt::{Prompt, PromptState};
pub use registry::ServiceRegistry;
pub use service::{SearchFlags, SearchItems, SearchPaths, Service, ServiceFlags};
pub use transport::{Guard, NameWatch, SignalMessage, SignalRule, Subscription, Transport};
pub use value::{SecretBuffer, SecretValue};
pub use variant::{FromVariant, ObjectPath, Variant};
