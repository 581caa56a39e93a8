//! Scriptable projector for projection manager tests.

use std::collections::HashSet;
use std::sync::Mutex;

use async_trait::async_trait;
use strata_core::event::EventRecord;
use strata_core::projection::{HandlerError, Projector};

/// A projector that records the ids it handled and fails on demand.
#[derive(Debug)]
pub struct RecordingProjector {
    name: &'static str,
    types: Vec<&'static str>,
    handled: Mutex<Vec<i64>>,
    failing: Mutex<HashSet<i64>>,
    resets: Mutex<usize>,
}

impl RecordingProjector {
    /// Creates a projector subscribed to every event type.
    #[must_use]
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            types: Vec::new(),
            handled: Mutex::new(Vec::new()),
            failing: Mutex::new(HashSet::new()),
            resets: Mutex::new(0),
        }
    }

    /// Restricts the subscription to `types`.
    #[must_use]
    pub fn subscribed_to(mut self, types: &[&'static str]) -> Self {
        self.types = types.to_vec();
        self
    }

    /// Makes the handler fail for `event_id` until [`Self::heal`] is called.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    #[must_use]
    pub fn failing_on(self, event_id: i64) -> Self {
        self.failing.lock().unwrap().insert(event_id);
        self
    }

    /// Lets `event_id` succeed from now on.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn heal(&self, event_id: i64) {
        self.failing.lock().unwrap().remove(&event_id);
    }

    /// Ids handled successfully, in handling order.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn handled(&self) -> Vec<i64> {
        self.handled.lock().unwrap().clone()
    }

    /// How many times the read model was reset.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn resets(&self) -> usize {
        *self.resets.lock().unwrap()
    }
}

#[async_trait]
impl Projector for RecordingProjector {
    fn name(&self) -> &'static str {
        self.name
    }

    fn subscribed_types(&self) -> &[&'static str] {
        &self.types
    }

    async fn handle(&self, event: &EventRecord) -> Result<(), HandlerError> {
        if self.failing.lock().unwrap().contains(&event.id) {
            return Err(HandlerError::new(format!(
                "{} cannot handle event {}",
                self.name, event.id
            )));
        }
        self.handled.lock().unwrap().push(event.id);
        Ok(())
    }

    async fn reset(&self) -> Result<(), HandlerError> {
        self.handled.lock().unwrap().clear();
        *self.resets.lock().unwrap() += 1;
        Ok(())
    }
}
