//! Background engines (spec §4.9): deletion dispatcher, balancer,
//! drain coordinator, fsck, LRU.
//!
//! Every engine is modeled as a named task with `(tick_period,
//! cancel_token, snapshot-capture, work-phase)` (Design Notes "Long-
//! running engines"): each tick snapshots what it needs under the
//! proper lock, releases it, then does slow work — network sends,
//! capability minting, queue pushes — without holding the cluster or
//! namespace lock (spec §5).

pub mod balancer;
pub mod deletion;
pub mod drain;
pub mod fsck;
pub mod lru;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::error::MgmResult;

/// Cooperative cancellation flag, checked between iterations (spec §5
/// "background engines check a per-thread cancel flag between
/// iterations").
#[derive(Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Spawns `tick` on a fixed period until `cancel` fires. Ticks never
/// let an error escape to a caller that did not ask for one directly
/// (spec §7 Policy "Background engines never throw to the front-end;
/// they log and continue"); a failing tick is logged and the loop
/// keeps going.
pub fn spawn_periodic<F, Fut>(name: &'static str, tick_period: Duration, cancel: CancelToken, mut tick: F) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: std::future::Future<Output = MgmResult<()>> + Send,
{
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(tick_period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            if cancel.is_cancelled() {
                tracing::info!(engine = name, "stopping");
                break;
            }
            if let Err(err) = tick().await {
                tracing::warn!(engine = name, error = %err, "tick failed, continuing");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    #[tokio::test]
    async fn cancelling_stops_the_loop() {
        let cancel = CancelToken::new();
        let ticks = Arc::new(AtomicU32::new(0));
        let counter = ticks.clone();
        let handle = spawn_periodic("test", Duration::from_millis(5), cancel.clone(), move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();
        tokio::time::timeout(Duration::from_millis(100), handle).await.unwrap().unwrap();
        assert!(ticks.load(Ordering::SeqCst) > 0);
    }
}
