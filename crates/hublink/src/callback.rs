//! Single-slot async callback registration.
//!
//! Registration has replace-not-append semantics: at most one handler is
//! active at a time, registering a new one replaces the old, and `None`
//! clears the slot.

use futures::future::BoxFuture;
use hublink_types::Identity;
use std::sync::{Arc, Mutex};

/// Client-side timeout callback: the hub has become unreachable.
pub type TimeoutHandler = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

/// Hub-side timeout callback: a client stopped pinging.
pub type HubTimeoutHandler = Arc<dyn Fn(Identity) -> BoxFuture<'static, ()> + Send + Sync>;

/// Hub-side connection callback: a client instance made first contact.
pub type ConnectionHandler = Arc<dyn Fn(Identity, bool) -> BoxFuture<'static, ()> + Send + Sync>;

pub(crate) struct CallbackSlot<T>(Mutex<Option<T>>);

impl<T: Clone> CallbackSlot<T> {
    pub(crate) fn new() -> Self {
        Self(Mutex::new(None))
    }

    pub(crate) fn set(&self, handler: Option<T>) {
        *self.0.lock().unwrap_or_else(|e| e.into_inner()) = handler;
    }

    /// Clone the current handler out of the slot so it can be invoked
    /// without holding the lock.
    pub(crate) fn get(&self) -> Option<T> {
        self.0.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_replace_and_clear() {
        let slot: CallbackSlot<TimeoutHandler> = CallbackSlot::new();
        assert!(slot.get().is_none());

        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));

        let count = Arc::clone(&first);
        slot.set(Some(Arc::new(move || {
            let count = Arc::clone(&count);
            Box::pin(async move {
                count.fetch_add(1, Ordering::SeqCst);
            })
        })));

        let count = Arc::clone(&second);
        slot.set(Some(Arc::new(move || {
            let count = Arc::clone(&count);
            Box::pin(async move {
                count.fetch_add(1, Ordering::SeqCst);
            })
        })));

        // Only the latest registration is active.
        slot.get().unwrap()().await;
        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);

        slot.set(None);
        assert!(slot.get().is_none());
    }
}
