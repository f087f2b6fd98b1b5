use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_cron_scheduler::{Job, JobScheduler};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::authz::cache::{CacheKind, Caches};
use crate::authz::errors::AuthzError;
use crate::authz::store::PolicyStore;

const MIN_SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// Initialize and start the scheduler running the policy reload and cache
/// sweep jobs. Each run gets a child of `lifetime` as its cancellation scope.
pub async fn init_scheduler(
    store: Arc<PolicyStore>,
    caches: Arc<Caches>,
    reload_interval: Duration,
    sweep_interval: Duration,
    lifetime: CancellationToken,
) -> Result<JobScheduler, AuthzError> {
    let sched = JobScheduler::new().await?;

    let reload_lifetime = lifetime.clone();
    let reload_store = store.clone();
    let reload_caches = caches.clone();
    let reload_job = Job::new_repeated_async(reload_interval, move |_uuid, _l| {
        let store = reload_store.clone();
        let caches = reload_caches.clone();
        let ctx = reload_lifetime.child_token();
        Box::pin(async move {
            if ctx.is_cancelled() {
                return;
            }
            debug!("Running policy_reload job");
            // failures keep the previous snapshot
            let _ = reload_policy(&store, &caches, &ctx).await;
        })
    })?;
    sched.add(reload_job).await?;

    let sweep_caches = caches.clone();
    let sweep_job = Job::new_repeated_async(
        sweep_interval.max(MIN_SWEEP_INTERVAL),
        move |_uuid, _l| {
            let caches = sweep_caches.clone();
            Box::pin(async move {
                let purged = caches.purge_expired();
                if purged > 0 {
                    debug!(purged, "Swept expired cache entries");
                }
            })
        },
    )?;
    sched.add(sweep_job).await?;

    sched.start().await?;

    info!(
        reload_every = %humantime::format_duration(reload_interval),
        "Job scheduler started with policy_reload and cache_sweep jobs"
    );

    Ok(sched)
}

/// Reload the Policy Store and drop caches derived from the old snapshot.
pub async fn reload_policy(
    store: &PolicyStore,
    caches: &Caches,
    ctx: &CancellationToken,
) -> Result<(), AuthzError> {
    match store.reload(ctx).await {
        Ok(()) => {
            caches.flush(CacheKind::Decision);
            caches.flush(CacheKind::Subject);
            Ok(())
        }
        Err(AuthzError::Cancelled) => Err(AuthzError::Cancelled),
        Err(e) => {
            error!(error = %e, "Policy reload failed; keeping previous snapshot");
            Err(e)
        }
    }
}

/// Consume cache invalidation notifications until the channel closes or
/// `lifetime` is cancelled.
pub fn spawn_invalidation_listener(
    caches: Arc<Caches>,
    mut rx: mpsc::UnboundedReceiver<CacheKind>,
    lifetime: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = lifetime.cancelled() => break,
                kind = rx.recv() => match kind {
                    Some(kind) => caches.flush(kind),
                    None => {
                        warn!("Cache invalidation channel closed");
                        break;
                    }
                },
            }
        }
        debug!("Cache invalidation listener stopped");
    })
}
