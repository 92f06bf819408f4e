/*!

Error types for the secret service client.

Every operation, in both its async and its blocking form, reports failures
through the single [`Error`] enum below. Faults returned by the peer are
carried verbatim in [`Error::Remote`] so callers can match on the D-Bus
error name.

*/

use std::fmt::Display;

use crate::variant::ObjectPath;

pub const UNKNOWN_METHOD: &str = "org.freedesktop.DBus.Error.UnknownMethod";
pub const NOT_SUPPORTED: &str = "org.freedesktop.DBus.Error.NotSupported";
pub const NAME_HAS_NO_OWNER: &str = "org.freedesktop.DBus.Error.NameHasNoOwner";
pub const UNKNOWN_OBJECT: &str = "org.freedesktop.DBus.Error.UnknownObject";
pub const NO_SUCH_OBJECT: &str = "org.freedesktop.Secret.Error.NoSuchObject";
pub const IS_LOCKED: &str = "org.freedesktop.Secret.Error.IsLocked";
pub const NO_SESSION: &str = "org.freedesktop.Secret.Error.NoSession";

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A precondition of the API was violated by the caller.
    #[error("usage error: {0}")]
    Usage(String),
    /// The peer answered with a D-Bus error.
    #[error("{name}: {message}")]
    Remote { name: String, message: String },
    /// The object at this path does not exist (or exposes no properties).
    #[error("no such secret service object: {0}")]
    NoSuchObject(ObjectPath),
    #[error("the operation was cancelled")]
    Cancelled,
    /// The peer went away while an ordinary call was outstanding.
    #[error("the secret service disconnected: {0}")]
    Disconnected(String),
    /// An operation that needs the user's confirmation was dismissed.
    #[error("the prompt was dismissed")]
    Dismissed,
    #[error("unexpected reply from the secret service: {0}")]
    Protocol(String),
    #[error("secret session failure: {0}")]
    Session(String),
    /// The private event context for a blocking call could not be built.
    #[error("could not create an event context: {0}")]
    Runtime(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn remote(name: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Remote {
            name: name.into(),
            message: message.into(),
        }
    }

    /// The D-Bus error name, if this error came from the peer.
    pub fn remote_name(&self) -> Option<&str> {
        match self {
            Error::Remote { name, .. } => Some(name),
            _ => None,
        }
    }

    pub fn is_remote(&self, name: &str) -> bool {
        self.remote_name() == Some(name)
    }

    pub fn is_unknown_method(&self) -> bool {
        self.is_remote(UNKNOWN_METHOD)
    }

    pub fn is_not_supported(&self) -> bool {
        self.is_remote(NOT_SUPPORTED)
    }

    /// Whether the target object doesn't exist, however the peer said so.
    pub fn is_missing_object(&self) -> bool {
        matches!(self, Error::NoSuchObject(_))
            || [NO_SUCH_OBJECT, UNKNOWN_OBJECT, UNKNOWN_METHOD]
                .iter()
                .any(|name| self.is_remote(name))
    }
}

/// Map a malformed reply into a protocol error.
pub(crate) fn protocol_error(what: impl Display) -> Error {
    Error::Protocol(what.to_string())
}

pub(crate) fn usage_error(what: impl Display) -> Error {
    Error::Usage(what.to_string())
}

/// Map a fault from the session algorithm into a session error.
pub(crate) fn decode_error(what: impl Display) -> Error {
    Error::Session(what.to_string())
}
