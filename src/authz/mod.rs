pub mod cache;
pub mod condition;
pub mod engine;
pub mod errors;
pub mod loader;
pub mod policy;
pub mod scope;
pub mod selector;
pub mod store;
pub mod subject;
pub mod types;
pub mod web;

use std::future::Future;

use tokio_util::sync::CancellationToken;

use errors::AuthzError;

pub use cache::{CacheKind, CacheNotifier};
pub use engine::{Engine, EngineConfig};

/// Runs `fut` unless `ctx` is cancelled first.
pub(crate) async fn cancellable<T, F>(ctx: &CancellationToken, fut: F) -> Result<T, AuthzError>
where
    F: Future<Output = Result<T, AuthzError>>,
{
    if ctx.is_cancelled() {
        return Err(AuthzError::Cancelled);
    }
    tokio::select! {
        biased;
        _ = ctx.cancelled() => Err(AuthzError::Cancelled),
        result = fut => result,
    }
}
