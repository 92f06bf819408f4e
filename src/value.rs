/*!

Reference-counted secret payloads.

A [`SecretValue`] owns its bytes through an injected destructor, so the same
type can wrap ordinary heap memory or memory handed out by a hardened
allocator. The buffer is always zeroed before the destructor sees it.

*/

use std::fmt;
use std::sync::Arc;

use zeroize::Zeroize;

/// Backing storage a secret can live in.
pub trait SecretBuffer: Send + Sync + 'static {
    fn as_slice(&self) -> &[u8];
    fn as_mut_slice(&mut self) -> &mut [u8];
}

impl SecretBuffer for Vec<u8> {
    fn as_slice(&self) -> &[u8] {
        self
    }

    fn as_mut_slice(&mut self) -> &mut [u8] {
        self
    }
}

impl SecretBuffer for Box<[u8]> {
    fn as_slice(&self) -> &[u8] {
        self
    }

    fn as_mut_slice(&mut self) -> &mut [u8] {
        self
    }
}

trait Storage: Send + Sync {
    fn bytes(&self) -> &[u8];
}

struct Owned<B, D>
where
    B: SecretBuffer,
    D: FnOnce(B) + Send + Sync + 'static,
{
    buffer: Option<B>,
    destroy: Option<D>,
}

impl<B, D> Storage for Owned<B, D>
where
    B: SecretBuffer,
    D: FnOnce(B) + Send + Sync + 'static,
{
    fn bytes(&self) -> &[u8] {
        match &self.buffer {
            Some(buffer) => buffer.as_slice(),
            None => &[],
        }
    }
}

impl<B, D> Drop for Owned<B, D>
where
    B: SecretBuffer,
    D: FnOnce(B) + Send + Sync + 'static,
{
    fn drop(&mut self) {
        if let Some(mut buffer) = self.buffer.take() {
            buffer.as_mut_slice().zeroize();
            if let Some(destroy) = self.destroy.take() {
                destroy(buffer);
            }
        }
    }
}

struct Payload {
    storage: Box<dyn Storage>,
    content_type: String,
}

/// An immutable secret shared by reference count.
///
/// Cloning shares the payload; it never copies the bytes.
#[derive(Clone)]
pub struct SecretValue(Arc<Payload>);

impl SecretValue {
    /// Copy `secret` into a fresh heap buffer.
    pub fn new(secret: &[u8], content_type: &str) -> Self {
        Self::from_vec(secret.to_vec(), content_type)
    }

    pub fn from_text(text: &str) -> Self {
        Self::from_vec(text.as_bytes().to_vec(), "text/plain")
    }

    /// Take ownership of `buffer`; `destroy` receives it, already zeroed,
    /// when the last reference drops.
    pub fn new_full<B, D>(buffer: B, content_type: impl Into<String>, destroy: D) -> Self
    where
        B: SecretBuffer,
        D: FnOnce(B) + Send + Sync + 'static,
    {
        let storage = Owned {
            buffer: Some(buffer),
            destroy: Some(destroy),
        };
        Self(Arc::new(Payload {
            storage: Box::new(storage),
            content_type: content_type.into(),
        }))
    }

    pub(crate) fn from_vec(secret: Vec<u8>, content_type: &str) -> Self {
        Self::new_full(secret, content_type, drop)
    }

    pub fn get(&self) -> &[u8] {
        self.0.storage.bytes()
    }

    pub fn len(&self) -> usize {
        self.get().len()
    }

    pub fn is_empty(&self) -> bool {
        self.get().is_empty()
    }

    pub fn content_type(&self) -> &str {
        &self.0.content_type
    }

    /// The secret as text, if it is textual.
    ///
    /// Values without a content type, or typed as opaque bytes, are accepted
    /// when they happen to be valid UTF-8.
    pub fn text(&self) -> Option<&str> {
        match self.content_type() {
            "text/plain" | "" | "application/octet-stream" => std::str::from_utf8(self.get()).ok(),
            _ => None,
        }
    }

    pub fn ptr_eq(&self, other: &SecretValue) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl PartialEq for SecretValue {
    fn eq(&self, other: &Self) -> bool {
        self.content_type() == other.content_type() && self.get() == other.get()
    }
}

impl Eq for SecretValue {}

impl fmt::Debug for SecretValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretValue")
            .field("len", &self.len())
            .field("content_type", &self.content_type())
            .finish_non_exhaustive()
    }
}
