use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::error::{BoxError, Error, Result};

type Handler = Arc<dyn Fn() -> std::result::Result<(), BoxError> + Send + Sync>;

/// Named-event registry shared by the parts of one hosting process
///
/// Cloning yields another handle on the same registry. The registry lives as
/// long as its last handle, typically owned by the process main loop.
#[derive(Clone, Default)]
pub struct EventBus {
    handlers: Arc<Mutex<HashMap<String, Vec<Handler>>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Vec<Handler>>> {
        self.handlers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register `handler` for `event`, after the ones already registered
    pub fn call_on<F>(&self, event: &str, handler: F)
    where
        F: Fn() -> std::result::Result<(), BoxError> + Send + Sync + 'static,
    {
        self.lock()
            .entry(event.to_string())
            .or_default()
            .push(Arc::new(handler));
    }

    /// Invoke every handler of `event` in registration order
    ///
    /// All handlers run even when some fail; their errors are returned
    /// together as [`Error::Handlers`]. Returns the number of handlers run.
    pub fn fire(&self, event: &str) -> Result<usize> {
        // Handlers may register more handlers, do not hold the lock
        let handlers = self.lock().get(event).cloned().unwrap_or_default();

        let errors: Vec<BoxError> = handlers
            .iter()
            .filter_map(|handler| handler().err())
            .collect();

        if errors.is_empty() {
            Ok(handlers.len())
        } else {
            Err(Error::Handlers {
                event: event.to_string(),
                errors,
            })
        }
    }

    /// Number of handlers registered for `event`
    pub fn handler_count(&self, event: &str) -> usize {
        self.lock().get(event).map_or(0, Vec::len)
    }

    /// Drop every registration
    pub fn clear(&self) {
        self.lock().clear();
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let events: Vec<String> = self.lock().keys().cloned().collect();
        f.debug_struct("EventBus").field("events", &events).finish()
    }
}
