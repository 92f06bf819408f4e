//! Blocking wrappers over the async operations.
//!
//! Each `*_sync` method runs its async counterpart through [`block_on`], so
//! both calling styles share one implementation and report identical
//! results, errors and cancellations.

use std::future::Future;

use tokio::runtime::{Builder, Handle};
use tokio_util::sync::CancellationToken;

use crate::errors::{Error, Result, usage_error};

/// Drive `operation` to completion on a private single-threaded event
/// context, blocking only the calling thread.
///
/// Continuations the operation spawns land on the private context and stop
/// when it is torn down; signal listeners started here are parked and
/// resume the next time their object is used from an async context.
/// Calling this from inside an async context would deadlock the outer
/// context, so that is rejected as a usage error.
pub(crate) fn block_on<F, T>(operation: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    if Handle::try_current().is_ok() {
        return Err(usage_error(
            "blocking secret service call made from inside an async context",
        ));
    }
    let runtime = Builder::new_current_thread().enable_all().build()?;
    runtime.block_on(operation)
}

/// Race one remote leg against the caller's cancellation token.
pub(crate) async fn with_cancel<F, T>(cancel: Option<&CancellationToken>, operation: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match cancel {
        None => operation.await,
        Some(token) => {
            tokio::select! {
                biased;
                _ = token.cancelled() => Err(Error::Cancelled),
                result = operation => result,
            }
        }
    }
}
