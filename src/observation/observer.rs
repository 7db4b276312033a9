use super::changes::{filtered_changes, ObservedChanges};
use super::filter::ChangeFilter;
use super::hub::{ChangeHub, ChangeSink, ContextChanges, Registrations};
use super::mode::ObservationMode;
use crate::queue::ExecutionQueue;
use std::sync::Arc;

/// Callback invoked with each matching change set.
pub type ChangeHandler = Arc<dyn Fn(&ObservedChanges) + Send + Sync>;

/// Calls a handler on a delivery queue whenever matching objects change.
///
/// Observation stops when the observer is dropped.
pub struct ChangeObserver<F: ChangeFilter> {
    mode: ObservationMode,
    filter: Arc<F>,
    queue: ExecutionQueue,
    _registrations: Registrations,
}

impl<F: ChangeFilter> ChangeObserver<F> {
    /// Deliver on the queue the caller runs on, or the hub's main queue.
    pub fn new<H>(
        hub: &Arc<ChangeHub>,
        mode: ObservationMode,
        filter: F,
        fire_initially: bool,
        handler: H,
    ) -> Self
    where
        H: Fn(&ObservedChanges) + Send + Sync + 'static,
    {
        let queue = hub.default_delivery_queue();
        Self::with_queue(hub, mode, filter, queue, fire_initially, handler)
    }

    /// Deliver on an explicit queue.
    ///
    /// With `fire_initially` the handler is scheduled once with an empty
    /// change set right away.
    pub fn with_queue<H>(
        hub: &Arc<ChangeHub>,
        mode: ObservationMode,
        filter: F,
        queue: ExecutionQueue,
        fire_initially: bool,
        handler: H,
    ) -> Self
    where
        H: Fn(&ObservedChanges) + Send + Sync + 'static,
    {
        let filter = Arc::new(filter);
        let handler: ChangeHandler = Arc::new(handler);

        let sink: ChangeSink = {
            let filter = Arc::clone(&filter);
            let queue = queue.clone();
            let handler = Arc::clone(&handler);
            Arc::new(move |changes: &ContextChanges| {
                if let Some(observed) = filtered_changes(changes, filter.as_ref()) {
                    let handler = Arc::clone(&handler);
                    queue.submit(move || handler(&observed));
                }
            })
        };
        let registrations = Registrations::new(hub, &mode, sink);

        if fire_initially {
            queue.submit(move || handler(&ObservedChanges::default()));
        }

        Self {
            mode,
            filter,
            queue,
            _registrations: registrations,
        }
    }

    pub fn mode(&self) -> &ObservationMode {
        &self.mode
    }

    pub fn filter(&self) -> &F {
        &self.filter
    }

    /// Queue the handler runs on.
    pub fn queue(&self) -> &ExecutionQueue {
        &self.queue
    }
}
