//! # Retry Policy
//!
//! One retry against a fresh unit, never more.

use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;

use tracing::warn;

use crate::manager;
use crate::manager::WorkerManager;
use crate::proxy::RpcProxy;

/// Runs `op` against the role's unit. If acquiring the unit or the call fails,
/// the failed unit is torn down and `op` runs once more against a freshly
/// created and handshaken unit. A second failure is returned to the caller.
pub async fn run_with_retry<T, E, F, Fut>(manager: &WorkerManager, op: F) -> Result<T, E>
where
    F: Fn(Arc<RpcProxy>) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: From<manager::Error> + Display,
{
    match attempt(manager, &op).await {
        Ok(value) => return Ok(value),
        Err(e) => warn!(role = manager.role(), error = %e, "call failed, retrying on a fresh unit"),
    }

    attempt(manager, &op).await
}

async fn attempt<T, E, F, Fut>(manager: &WorkerManager, op: &F) -> Result<T, E>
where
    F: Fn(Arc<RpcProxy>) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: From<manager::Error>,
{
    // a failed creation has already torn itself down
    let worker = manager.get_or_create().await?;

    match op(worker.clone()).await {
        Ok(value) => Ok(value),
        Err(e) => {
            manager.discard(&worker).await;
            Err(e)
        }
    }
}
