//! Ordered listener lists with isolated failure handling
//!
//! Each session event has its own `Listeners<T>`. Callbacks run in
//! registration order; one that returns an error or panics is logged and
//! skipped, and the rest still run.

use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, PoisonError, RwLock};

use tracing::warn;

use crate::error::ListenerError;

type Callback<T> = Arc<dyn Fn(&T) -> Result<(), ListenerError> + Send + Sync>;

/// A list of callbacks for one event type
pub struct Listeners<T> {
    event: &'static str,
    callbacks: RwLock<Vec<Callback<T>>>,
}

impl<T> Listeners<T> {
    /// Create an empty list; `event` names the event in logs
    pub fn new(event: &'static str) -> Self {
        Self {
            event,
            callbacks: RwLock::new(Vec::new()),
        }
    }

    /// Append a callback
    pub fn register<F>(&self, callback: F)
    where
        F: Fn(&T) -> Result<(), ListenerError> + Send + Sync + 'static,
    {
        self.callbacks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(callback));
    }

    pub fn len(&self) -> usize {
        self.callbacks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Invoke every callback in order, returning how many failed
    ///
    /// The list is snapshotted first, so callbacks may register further
    /// listeners without deadlocking; those run from the next event on.
    pub fn emit(&self, event: &T) -> usize {
        let callbacks: Vec<Callback<T>> = self
            .callbacks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        let mut failures = 0;
        for (index, callback) in callbacks.iter().enumerate() {
            match panic::catch_unwind(AssertUnwindSafe(|| callback(event))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    failures += 1;
                    warn!(
                        event = self.event,
                        listener = index,
                        error = %e,
                        "Listener failed"
                    );
                }
                Err(_) => {
                    failures += 1;
                    warn!(event = self.event, listener = index, "Listener panicked");
                }
            }
        }
        failures
    }
}

impl<T> std::fmt::Debug for Listeners<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Listeners")
            .field("event", &self.event)
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_emit_in_registration_order() {
        let listeners = Listeners::<u32>::new("test");
        let seen = Arc::new(Mutex::new(Vec::new()));

        for tag in ["first", "second", "third"] {
            let seen = seen.clone();
            listeners.register(move |value: &u32| {
                seen.lock().unwrap().push((tag, *value));
                Ok(())
            });
        }

        assert_eq!(listeners.emit(&7), 0);
        assert_eq!(
            *seen.lock().unwrap(),
            vec![("first", 7), ("second", 7), ("third", 7)]
        );
    }

    #[test]
    fn test_failing_listener_does_not_stop_others() {
        let listeners = Listeners::<()>::new("test");
        let reached = Arc::new(Mutex::new(0));

        listeners.register(|_| Err("boom".into()));
        {
            let reached = reached.clone();
            listeners.register(move |_| {
                *reached.lock().unwrap() += 1;
                Ok(())
            });
        }

        assert_eq!(listeners.emit(&()), 1);
        assert_eq!(listeners.emit(&()), 1);
        assert_eq!(*reached.lock().unwrap(), 2);
    }

    #[test]
    fn test_panicking_listener_is_contained() {
        let listeners = Listeners::<()>::new("test");
        let reached = Arc::new(Mutex::new(false));

        listeners.register(|_| panic!("listener bug"));
        {
            let reached = reached.clone();
            listeners.register(move |_| {
                *reached.lock().unwrap() = true;
                Ok(())
            });
        }

        assert_eq!(listeners.emit(&()), 1);
        assert!(*reached.lock().unwrap());
    }

    #[test]
    fn test_register_from_inside_callback() {
        let listeners = Arc::new(Listeners::<()>::new("test"));
        {
            let inner = listeners.clone();
            listeners.register(move |_| {
                inner.register(|_| Ok(()));
                Ok(())
            });
        }

        listeners.emit(&());
        assert_eq!(listeners.len(), 2);
    }
}
