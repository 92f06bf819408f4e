/*!

Interactive prompts.

Some operations (unlocking, deleting, creating a collection) need the user's
confirmation. The service answers them with a prompt object; performing the
prompt asks the service to show its dialog and then waits for the
`Completed` signal. If the service leaves the bus first, the prompt counts
as dismissed. Cancelling the wait sends `Dismiss` to the service, since the
dialog can't be taken down locally.

*/

use std::any::type_name;
use std::sync::Arc;

use futures::future::{BoxFuture, OptionFuture};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::dual;
use crate::errors::{NAME_HAS_NO_OWNER, Result, usage_error};
use crate::proxy::RemoteObject;
use crate::service::Service;
use crate::transport::{Guard, NameWatch, PROMPT_INTERFACE, SignalMessage, SignalRule, Subscription, name_owner};
use crate::variant::{FromVariant, ObjectPath, Variant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptState {
    Idle,
    AwaitingSignal,
    Completed,
    Failed,
    Dismissed,
}

struct PromptInner {
    started: bool,
    state: PromptState,
    last_result: Option<Variant>,
}

pub struct Prompt {
    object: RemoteObject,
    inner: Mutex<PromptInner>,
}

/// Teardown of one perform: the first completion source to arrive releases
/// the signal subscription and the name watch, later ones do nothing.
struct Completion {
    state: Mutex<CompletionState>,
}

struct CompletionState {
    completed: bool,
    guards: Vec<Guard>,
}

impl Completion {
    fn new(guards: Vec<Guard>) -> Self {
        Self {
            state: Mutex::new(CompletionState {
                completed: false,
                guards,
            }),
        }
    }

    fn finish(&self) -> bool {
        let guards = {
            let mut state = self.state.lock();
            if state.completed {
                return false;
            }
            state.completed = true;
            std::mem::take(&mut state.guards)
        };
        drop(guards);
        true
    }
}

impl Drop for Completion {
    fn drop(&mut self) {
        self.finish();
    }
}

impl Prompt {
    pub fn new(service: &Service, path: ObjectPath) -> Self {
        Self::with_transport(
            Arc::clone(service.transport()),
            service.bus_name(),
            path,
        )
    }

    pub(crate) fn with_transport(
        transport: Arc<dyn crate::transport::Transport>,
        bus_name: &str,
        path: ObjectPath,
    ) -> Self {
        Self {
            object: RemoteObject::bare(transport, bus_name, path, PROMPT_INTERFACE),
            inner: Mutex::new(PromptInner {
                started: false,
                state: PromptState::Idle,
                last_result: None,
            }),
        }
    }

    pub fn path(&self) -> &ObjectPath {
        self.object.path()
    }

    pub fn state(&self) -> PromptState {
        self.inner.lock().state
    }

    /// Show the prompt and wait for the user's answer.
    ///
    /// Returns `true` if the prompt was accepted, `false` if it was
    /// dismissed (including when the service left the bus). A prompt can
    /// only be performed once.
    pub async fn perform(&self, window_id: &str, cancel: Option<&CancellationToken>) -> Result<bool> {
        {
            let mut inner = self.inner.lock();
            if inner.started {
                return Err(usage_error("a prompt can only be performed once"));
            }
            inner.started = true;
        }
        let result = self.run(window_id, cancel).await;
        self.set_state(match &result {
            Ok(true) => PromptState::Completed,
            Ok(false) => PromptState::Dismissed,
            Err(_) => PromptState::Failed,
        });
        result
    }

    fn set_state(&self, state: PromptState) {
        self.inner.lock().state = state;
    }

    pub fn perform_sync(&self, window_id: &str, cancel: Option<&CancellationToken>) -> Result<bool> {
        dual::block_on(self.perform(window_id, cancel))
    }

    async fn run(&self, window_id: &str, cancel: Option<&CancellationToken>) -> Result<bool> {
        let transport = Arc::clone(self.object.transport());
        let owner = match name_owner(transport.as_ref(), self.object.bus_name()).await {
            Ok(owner) => owner,
            Err(err) if err.is_remote(NAME_HAS_NO_OWNER) => {
                debug!(path = %self.path(), "secret service is gone, prompt dismissed");
                return Ok(false);
            }
            Err(err) => return Err(err),
        };
        let Subscription { mut events, guard: signal_guard } = transport
            .subscribe(SignalRule {
                sender: Some(owner.clone()),
                path: self.path().clone(),
                interface: PROMPT_INTERFACE.to_string(),
                member: Some("Completed".to_string()),
            })
            .await?;
        let NameWatch { mut vanished, guard: watch_guard } = transport.watch_name(&owner).await?;
        let completion = Completion::new(vec![signal_guard, watch_guard]);

        // begin and dismiss calls for this perform share one token, so a
        // vanished peer can't leave either of them hanging
        let calls = CancellationToken::new();
        let begin = self.call_until(&calls, "Prompt", vec![Variant::from(window_id)]);
        tokio::pin!(begin);
        let mut begun = false;
        let cancelled: OptionFuture<_> = cancel.map(|token| token.cancelled()).into();
        tokio::pin!(cancelled);
        let mut cancel_seen = cancel.is_none();
        let mut dismiss: Option<BoxFuture<'_, Result<Vec<Variant>>>> = None;

        loop {
            tokio::select! {
                biased;
                _ = &mut vanished => {
                    calls.cancel();
                    completion.finish();
                    debug!(path = %self.path(), "secret service vanished, prompt dismissed");
                    return Ok(false);
                }
                message = events.recv() => {
                    calls.cancel();
                    completion.finish();
                    let Some(message) = message else {
                        debug!(path = %self.path(), "prompt subscription closed, prompt dismissed");
                        return Ok(false);
                    };
                    return Ok(self.complete(message));
                }
                result = &mut begin, if !begun => {
                    begun = true;
                    match result {
                        Ok(_) => self.set_state(PromptState::AwaitingSignal),
                        Err(err) => {
                            let gone = matches!(vanished.try_recv(), Ok(()));
                            completion.finish();
                            if gone {
                                debug!(path = %self.path(), "secret service vanished, prompt dismissed");
                                return Ok(false);
                            }
                            return Err(err);
                        }
                    }
                }
                _ = &mut cancelled, if !cancel_seen => {
                    cancel_seen = true;
                    debug!(path = %self.path(), "prompt cancelled, dismissing");
                    dismiss = Some(Box::pin(self.call_until(&calls, "Dismiss", Vec::new())));
                }
                Some(result) = OptionFuture::from(dismiss.as_mut()), if dismiss.is_some() => {
                    dismiss = None;
                    if let Err(err) = result {
                        completion.finish();
                        if err.is_unknown_method() || err.is_not_supported() {
                            return Ok(false);
                        }
                        return Err(err);
                    }
                }
            }
        }
    }

    async fn call_until(&self, calls: &CancellationToken, method: &str, args: Vec<Variant>) -> Result<Vec<Variant>> {
        self.object.call(method, args, Some(calls)).await
    }

    /// Record the `Completed(b dismissed, v result)` payload.
    fn complete(&self, message: SignalMessage) -> bool {
        let mut args = message.args.into_iter();
        let (dismissed, result) = match (args.next(), args.next()) {
            (Some(Variant::Bool(dismissed)), Some(result)) => (dismissed, result),
            _ => {
                warn!(path = %self.path(), "malformed Completed signal, treating prompt as dismissed");
                return false;
            }
        };
        let mut inner = self.inner.lock();
        if inner.last_result.is_none() {
            inner.last_result = Some(result);
        }
        !dismissed
    }

    /// The accepted prompt's result as `T`.
    ///
    /// `None` if the prompt wasn't accepted, or if its result has a
    /// different type than the caller expected.
    pub fn result<T: FromVariant>(&self) -> Option<T> {
        let inner = self.inner.lock();
        if inner.state != PromptState::Completed {
            return None;
        }
        let value = inner.last_result.as_ref()?;
        let typed = T::from_variant(value);
        if typed.is_none() {
            warn!(
                path = %self.path(),
                expected = type_name::<T>(),
                received = value.type_name(),
                "prompt result has an unexpected type"
            );
        }
        typed
    }

    pub fn raw_result(&self) -> Option<Variant> {
        let inner = self.inner.lock();
        match inner.state {
            PromptState::Completed => inner.last_result.clone(),
            _ => None,
        }
    }
}

impl std::fmt::Debug for Prompt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Prompt")
            .field("path", self.path())
            .field("state", &self.state())
            .finish()
    }
}
