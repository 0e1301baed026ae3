//! Cancellable callbacks.
//!
//! A [`Cancelable`] wraps one callback. Once any clone of it (or its
//! [`Canceller`]) is cancelled, every later `call` is rejected with
//! [`Cancelled`] and the callback never runs again.

use crate::error::Cancelled;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Callback that can be invalidated.
pub struct Cancelable<T> {
    callback: Arc<dyn Fn(T) + Send + Sync>,
    cancelled: Arc<AtomicBool>,
}

impl<T> Cancelable<T> {
    pub fn wrap<F>(callback: F) -> Self
    where
        F: Fn(T) + Send + Sync + 'static,
    {
        Self {
            callback: Arc::new(callback),
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Invoke the callback unless cancelled.
    pub fn call(&self, value: T) -> Result<(), Cancelled> {
        if self.cancelled.load(Ordering::Acquire) {
            return Err(Cancelled);
        }
        (self.callback)(value);
        Ok(())
    }

    /// Idempotent.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Detached cancel half, sharing this handle's flag.
    pub fn canceller(&self) -> Canceller {
        Canceller {
            cancelled: Arc::clone(&self.cancelled),
        }
    }
}

impl<T> Clone for Cancelable<T> {
    fn clone(&self) -> Self {
        Self {
            callback: Arc::clone(&self.callback),
            cancelled: Arc::clone(&self.cancelled),
        }
    }
}

impl<T> fmt::Debug for Cancelable<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cancelable")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// Cancel half of a [`Cancelable`], independent of the callback type.
#[derive(Debug, Clone)]
pub struct Canceller {
    cancelled: Arc<AtomicBool>,
}

impl Canceller {
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn recording() -> (Cancelable<u32>, Arc<Mutex<Vec<u32>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let handle = Cancelable::wrap(move |value| sink.lock().unwrap().push(value));
        (handle, seen)
    }

    #[test]
    fn call_invokes_callback() {
        let (handle, seen) = recording();
        handle.call(7).unwrap();
        handle.call(8).unwrap();
        assert_eq!(*seen.lock().unwrap(), vec![7, 8]);
    }

    #[test]
    fn cancelled_call_is_rejected_and_has_no_effect() {
        let (handle, seen) = recording();
        handle.call(1).unwrap();
        let before = seen.lock().unwrap().clone();

        handle.cancel();
        assert_eq!(handle.call(2), Err(Cancelled));

        assert_eq!(*seen.lock().unwrap(), before);
    }

    #[test]
    fn cancel_is_idempotent() {
        let (handle, seen) = recording();
        handle.cancel();
        handle.cancel();
        assert!(handle.is_cancelled());
        assert_eq!(handle.call(3), Err(Cancelled));
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn canceller_invalidates_every_clone() {
        let (handle, seen) = recording();
        let in_flight = handle.clone();
        let canceller = handle.canceller();

        canceller.cancel();

        assert_eq!(in_flight.call(4), Err(Cancelled));
        assert!(canceller.is_cancelled());
        assert!(seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn in_flight_task_cannot_deliver_after_cancel() {
        let (handle, seen) = recording();
        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();
        let task_handle = handle.clone();
        let task = tokio::spawn(async move {
            release_rx.await.ok();
            task_handle.call(9)
        });

        handle.cancel();
        release_tx.send(()).unwrap();

        assert_eq!(task.await.unwrap(), Err(Cancelled));
        assert!(seen.lock().unwrap().is_empty());
    }
}
