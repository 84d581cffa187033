//! Background refresh loop.
//!
//! There is no push channel from the backend; the board stays live through
//! cooperative interval polling plus manual refresh. Cancelling the token
//! stops the loop; a fetch already in flight when the view tears down is
//! simply discarded with it.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::backend::OrderBackend;
use crate::store::TaskStore;

pub fn start_refresh_loop<B: OrderBackend + 'static>(
    store: Arc<TaskStore<B>>,
    interval_secs: u64,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!("Refresh loop started (interval: {interval_secs}s)");
        let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));
        // First tick fires immediately; the initial non-silent fetch is the
        // caller's job.
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Refresh loop stopped");
                    break;
                }
                _ = ticker.tick() => {
                    store.fetch(true).await;
                }
            }
        }
    })
}
