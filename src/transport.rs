/*!

The bus transport the engine runs on.

The engine never talks to a socket itself. An embedding application
supplies a [`Transport`] that can invoke methods, deliver signals matching
a [`SignalRule`], report when a bus name loses its owner, and run
background continuations on its event context.

*/

use async_trait::async_trait;
use futures::future::BoxFuture;
use tokio::sync::{mpsc, oneshot};

use crate::errors::Result;
use crate::variant::{ObjectPath, Variant};

pub const SECRETS_PATH: &str = "/org/freedesktop/secrets";
pub const SERVICE_INTERFACE: &str = "org.freedesktop.Secret.Service";
pub const COLLECTION_INTERFACE: &str = "org.freedesktop.Secret.Collection";
pub const ITEM_INTERFACE: &str = "org.freedesktop.Secret.Item";
pub const PROMPT_INTERFACE: &str = "org.freedesktop.Secret.Prompt";
pub const SESSION_INTERFACE: &str = "org.freedesktop.Secret.Session";
pub const PROPERTIES_INTERFACE: &str = "org.freedesktop.DBus.Properties";
pub const DBUS_NAME: &str = "org.freedesktop.DBus";
pub const DBUS_PATH: &str = "/org/freedesktop/DBus";
pub const DBUS_INTERFACE: &str = "org.freedesktop.DBus";

/// Which signals a subscription receives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignalRule {
    /// Well-known or unique name of the emitting peer; `None` matches any.
    pub sender: Option<String>,
    pub path: ObjectPath,
    pub interface: String,
    /// Signal name; `None` matches every signal on the interface.
    pub member: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SignalMessage {
    pub member: String,
    pub args: Vec<Variant>,
}

/// Runs a release action exactly once, when dropped.
pub struct Guard(Option<Box<dyn FnOnce() + Send>>);

impl Guard {
    pub fn new(release: impl FnOnce() + Send + 'static) -> Self {
        Self(Some(Box::new(release)))
    }

    pub fn noop() -> Self {
        Self(None)
    }
}

impl Drop for Guard {
    fn drop(&mut self) {
        if let Some(release) = self.0.take() {
            release();
        }
    }
}

impl std::fmt::Debug for Guard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Guard").field(&self.0.is_some()).finish()
    }
}

/// A live signal subscription. Dropping the guard unsubscribes.
pub struct Subscription {
    pub events: mpsc::UnboundedReceiver<SignalMessage>,
    pub guard: Guard,
}

/// A watch on a bus name. `vanished` resolves once the name has no owner,
/// immediately if it has none when the watch starts. Dropping the guard
/// stops watching.
pub struct NameWatch {
    pub vanished: oneshot::Receiver<()>,
    pub guard: Guard,
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Identifies the bus connection; services are shared per bus.
    fn bus_id(&self) -> String;

    async fn call(
        &self,
        destination: &str,
        path: &ObjectPath,
        interface: &str,
        method: &str,
        args: Vec<Variant>,
    ) -> Result<Vec<Variant>>;

    async fn subscribe(&self, rule: SignalRule) -> Result<Subscription>;

    async fn watch_name(&self, name: &str) -> Result<NameWatch>;

    /// Run a background continuation on the transport's event context.
    fn spawn(&self, task: BoxFuture<'static, ()>);
}

/// Resolve the unique name currently owning `name`.
pub(crate) async fn name_owner(transport: &dyn Transport, name: &str) -> Result<String> {
    let reply = transport
        .call(
            DBUS_NAME,
            &ObjectPath::new(DBUS_PATH)?,
            DBUS_INTERFACE,
            "GetNameOwner",
            vec![Variant::from(name)],
        )
        .await?;
    match reply.first().and_then(Variant::as_str) {
        Some(owner) => Ok(owner.to_string()),
        None => Err(crate::errors::protocol_error("GetNameOwner returned no name")),
    }
}
