//! Periodic pacer — drives the heartbeat and sweep loops.

use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

/// Run `tick` every `interval` until the shutdown signal flips to true (or
/// its sender goes away).
///
/// The first tick fires immediately. A tick runs to completion before the
/// next one is scheduled; ticks delayed past their slot are not bunched up.
pub async fn run_every<F, Fut>(interval: Duration, mut shutdown: watch::Receiver<bool>, mut tick: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ()>,
{
    if *shutdown.borrow() {
        return;
    }

    let mut timer = tokio::time::interval(interval);
    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    return;
                }
            }
            _ = timer.tick() => tick().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_ticks_until_shutdown() {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let ticks = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&ticks);
        let task = tokio::spawn(run_every(Duration::from_millis(10), shutdown_rx, move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        }));

        tokio::time::sleep(Duration::from_millis(55)).await;
        shutdown_tx.send(true).unwrap();
        task.await.unwrap();

        let seen = ticks.load(Ordering::SeqCst);
        assert!(seen >= 2, "expected several ticks, saw {seen}");
        // No further ticks after shutdown.
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), seen);
    }

    #[tokio::test]
    async fn test_already_shut_down_never_ticks() {
        let (shutdown_tx, shutdown_rx) = watch::channel(true);
        let ticks = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&ticks);
        run_every(Duration::from_millis(1), shutdown_rx, move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        })
        .await;

        drop(shutdown_tx);
        assert_eq!(ticks.load(Ordering::SeqCst), 0);
    }
}
