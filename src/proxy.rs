/*!

Handles on remote secret service objects.

A [`RemoteObject`] binds one object path and interface on the service's bus
name. It keeps a snapshot of the object's properties that is refreshed by
`PropertiesChanged` signals, and routes method calls through the
transport.

*/

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{trace, warn};

use crate::dual::with_cancel;
use crate::errors::{Error, Result, protocol_error};
use crate::transport::{Guard, PROPERTIES_INTERFACE, SignalMessage, SignalRule, Subscription, Transport};
use crate::variant::{FromVariant, ObjectPath, Variant};

pub type PropertyMap = HashMap<String, Variant>;

type Dispatch = Box<dyn Fn(SignalMessage) -> bool + Send + Sync>;

/// Delivers one subscription's signals to its handler.
///
/// While no task runs the pump, its receiver is parked here and signals
/// queue up in the channel. A task dropped before the subscription ended,
/// as happens when the event context of a blocking call is torn down,
/// parks the receiver again so a later [`Pump::start`] picks up where it
/// left off.
struct Pump {
    events: Mutex<Option<mpsc::UnboundedReceiver<SignalMessage>>>,
    dispatch: Dispatch,
}

struct Running {
    pump: Arc<Pump>,
    events: Option<mpsc::UnboundedReceiver<SignalMessage>>,
}

impl Drop for Running {
    fn drop(&mut self) {
        if let Some(events) = self.events.take() {
            *self.pump.events.lock() = Some(events);
        }
    }
}

impl Pump {
    fn start(self: &Arc<Self>, transport: &dyn Transport) {
        let Some(events) = self.events.lock().take() else {
            return;
        };
        let mut running = Running {
            pump: Arc::clone(self),
            events: Some(events),
        };
        transport.spawn(Box::pin(async move {
            while let Some(events) = running.events.as_mut() {
                let delivered = match events.recv().await {
                    Some(message) => (running.pump.dispatch)(message),
                    None => false,
                };
                if !delivered {
                    running.events = None;
                }
            }
        }));
    }
}

struct Listener {
    pump: Arc<Pump>,
    _guard: Guard,
}

pub struct RemoteObject {
    transport: Arc<dyn Transport>,
    bus_name: String,
    path: ObjectPath,
    interface: &'static str,
    properties: Arc<RwLock<PropertyMap>>,
    token: CancellationToken,
    listeners: Mutex<Vec<Listener>>,
}

impl RemoteObject {
    /// Bind the object and load its property snapshot.
    ///
    /// An object that exposes no properties does not exist as far as the
    /// secret service protocol is concerned.
    pub(crate) async fn connect(
        transport: Arc<dyn Transport>,
        bus_name: &str,
        path: ObjectPath,
        interface: &'static str,
        cancel: Option<&CancellationToken>,
    ) -> Result<Self> {
        let object = Self::bare(transport, bus_name, path, interface);
        let properties = object.get_all(cancel).await?;
        if properties.is_empty() {
            return Err(Error::NoSuchObject(object.path.clone()));
        }
        *object.properties.write() = properties;
        Ok(object)
    }

    /// Bind the object without loading any properties.
    pub(crate) fn bare(
        transport: Arc<dyn Transport>,
        bus_name: &str,
        path: ObjectPath,
        interface: &'static str,
    ) -> Self {
        Self {
            transport,
            bus_name: bus_name.to_string(),
            path,
            interface,
            properties: Arc::new(RwLock::new(PropertyMap::new())),
            token: CancellationToken::new(),
            listeners: Mutex::new(Vec::new()),
        }
    }

    pub fn path(&self) -> &ObjectPath {
        &self.path
    }

    pub fn interface(&self) -> &'static str {
        self.interface
    }

    pub fn bus_name(&self) -> &str {
        &self.bus_name
    }

    pub(crate) fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// Invoke `method` on this object's interface.
    pub(crate) async fn call(
        &self,
        method: &str,
        args: Vec<Variant>,
        cancel: Option<&CancellationToken>,
    ) -> Result<Vec<Variant>> {
        self.call_interface(self.interface, method, args, cancel).await
    }

    pub(crate) async fn call_interface(
        &self,
        interface: &str,
        method: &str,
        args: Vec<Variant>,
        cancel: Option<&CancellationToken>,
    ) -> Result<Vec<Variant>> {
        trace!(path = %self.path, interface, method, "calling secret service");
        self.resume_listeners();
        let call = self
            .transport
            .call(&self.bus_name, &self.path, interface, method, args);
        tokio::select! {
            biased;
            _ = self.token.cancelled() => Err(Error::Cancelled),
            result = with_cancel(cancel, call) => result,
        }
    }

    /// Abort every call still outstanding on this handle.
    pub(crate) fn cancel_pending(&self) {
        self.token.cancel();
    }

    async fn get_all(&self, cancel: Option<&CancellationToken>) -> Result<PropertyMap> {
        let reply = self
            .call_interface(
                PROPERTIES_INTERFACE,
                "GetAll",
                vec![Variant::from(self.interface)],
                cancel,
            )
            .await?;
        let properties: Option<PropertyMap> = reply.first().and_then(FromVariant::from_variant);
        properties.ok_or_else(|| protocol_error(format!("GetAll on {} returned no dictionary", self.path)))
    }

    /// Reload the property snapshot.
    pub(crate) async fn refresh(&self, cancel: Option<&CancellationToken>) -> Result<()> {
        let properties = self.get_all(cancel).await?;
        *self.properties.write() = properties;
        Ok(())
    }

    pub(crate) fn cached_property(&self, name: &str) -> Option<Variant> {
        self.properties.read().get(name).cloned()
    }

    /// Read a cached property as `T`; absent or mistyped values yield `None`.
    pub(crate) fn cached<T: FromVariant>(&self, name: &str) -> Option<T> {
        self.properties.read().get(name).and_then(T::from_variant)
    }

    pub(crate) fn set_cached_property(&self, name: &str, value: Variant) {
        self.properties.write().insert(name.to_string(), value);
    }

    /// Write a property on the peer, then update the snapshot.
    pub(crate) async fn set_property(
        &self,
        name: &str,
        value: Variant,
        cancel: Option<&CancellationToken>,
    ) -> Result<()> {
        self.call_interface(
            PROPERTIES_INTERFACE,
            "Set",
            vec![Variant::from(self.interface), Variant::from(name), value.clone()],
            cancel,
        )
        .await?;
        self.set_cached_property(name, value);
        Ok(())
    }

    /// Write a property in the background. Nobody waits on the result, so a
    /// failure can only be logged.
    pub(crate) fn set_property_detached(&self, name: &str, value: Variant) {
        let transport = Arc::clone(&self.transport);
        let properties = Arc::clone(&self.properties);
        let bus_name = self.bus_name.clone();
        let path = self.path.clone();
        let interface = self.interface;
        let name = name.to_string();
        self.transport.spawn(Box::pin(async move {
            let args = vec![Variant::from(interface), Variant::from(name.as_str()), value.clone()];
            match transport
                .call(&bus_name, &path, PROPERTIES_INTERFACE, "Set", args)
                .await
            {
                Ok(_) => {
                    properties.write().insert(name, value);
                }
                Err(err) => {
                    warn!(%path, property = %name, error = %err, "couldn't set secret service property");
                }
            }
        }));
    }

    /// Subscribe to signals emitted by this object and pump them into
    /// `handler` for as long as `owner` is alive.
    pub(crate) async fn listen<O, F>(
        &self,
        owner: Weak<O>,
        interface: &str,
        member: Option<&str>,
        handler: F,
    ) -> Result<()>
    where
        O: Send + Sync + 'static,
        F: Fn(&Arc<O>, SignalMessage) + Send + Sync + 'static,
    {
        let rule = SignalRule {
            sender: Some(self.bus_name.clone()),
            path: self.path.clone(),
            interface: interface.to_string(),
            member: member.map(str::to_string),
        };
        let Subscription { events, guard } = self.transport.subscribe(rule).await?;
        let pump = Arc::new(Pump {
            events: Mutex::new(Some(events)),
            dispatch: Box::new(move |message| match owner.upgrade() {
                Some(owner) => {
                    handler(&owner, message);
                    true
                }
                None => false,
            }),
        });
        pump.start(self.transport.as_ref());
        self.listeners.lock().push(Listener { pump, _guard: guard });
        Ok(())
    }

    /// Restart signal pumps whose task was dropped along with the event
    /// context it ran on.
    pub(crate) fn resume_listeners(&self) {
        for listener in self.listeners.lock().iter() {
            listener.pump.start(self.transport.as_ref());
        }
    }

    /// Keep the property snapshot current, and tell `handler` which
    /// properties changed.
    pub(crate) async fn listen_properties<O, F>(&self, owner: Weak<O>, handler: F) -> Result<()>
    where
        O: Send + Sync + 'static,
        F: Fn(&Arc<O>, &[String]) + Send + Sync + 'static,
    {
        let properties = Arc::clone(&self.properties);
        let interface = self.interface;
        self.listen(
            owner,
            PROPERTIES_INTERFACE,
            Some("PropertiesChanged"),
            move |owner, message| {
                let changed = apply_properties_changed(&properties, interface, &message.args);
                if !changed.is_empty() {
                    handler(owner, &changed);
                }
            },
        )
        .await
    }
}

impl Drop for RemoteObject {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

impl std::fmt::Debug for RemoteObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteObject")
            .field("path", &self.path)
            .field("interface", &self.interface)
            .finish_non_exhaustive()
    }
}

/// Apply a `PropertiesChanged(s, a{sv}, as)` payload to a snapshot and
/// return the names it touched.
fn apply_properties_changed(
    properties: &RwLock<PropertyMap>,
    interface: &str,
    args: &[Variant],
) -> Vec<String> {
    let [Variant::Str(changed_interface), Variant::Dict(changed), rest @ ..] = args else {
        warn!("ignoring malformed PropertiesChanged signal");
        return Vec::new();
    };
    if changed_interface != interface {
        return Vec::new();
    }
    let invalidated: Vec<String> = rest
        .first()
        .and_then(FromVariant::from_variant)
        .unwrap_or_default();
    let mut names = Vec::with_capacity(changed.len() + invalidated.len());
    let mut snapshot = properties.write();
    for (name, value) in changed {
        snapshot.insert(name.clone(), value.clone());
        names.push(name.clone());
    }
    for name in invalidated {
        snapshot.remove(&name);
        names.push(name);
    }
    names
}

/// Pull argument `index` out of a reply as `T`.
pub(crate) fn reply_arg<T: FromVariant>(reply: &[Variant], index: usize, method: &str) -> Result<T> {
    reply
        .get(index)
        .and_then(T::from_variant)
        .ok_or_else(|| protocol_error(format!("unexpected reply to {method}")))
}
