use super::changes::{filtered_changes, ObservedChanges};
use super::filter::ChangeFilter;
use super::hub::{ChangeHub, ChangeSink, ContextChanges, Registrations};
use super::mode::ObservationMode;
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, TryRecvError};
use std::sync::Arc;
use std::time::Duration;

/// Hands out subscriptions to matching change sets.
///
/// Nothing is registered until someone subscribes; each subscription has
/// its own registration and channel.
pub struct ChangePublisher<F: ChangeFilter> {
    hub: Arc<ChangeHub>,
    mode: ObservationMode,
    filter: Arc<F>,
}

impl<F: ChangeFilter> ChangePublisher<F> {
    pub fn new(hub: &Arc<ChangeHub>, mode: ObservationMode, filter: F) -> Self {
        Self {
            hub: Arc::clone(hub),
            mode,
            filter: Arc::new(filter),
        }
    }

    pub fn mode(&self) -> &ObservationMode {
        &self.mode
    }

    pub fn filter(&self) -> &F {
        &self.filter
    }

    /// Start receiving change sets. Dropping the subscription cancels it.
    pub fn subscribe(&self) -> ChangeSubscription {
        let (sender, receiver) = unbounded();
        let sink: ChangeSink = {
            let filter = Arc::clone(&self.filter);
            Arc::new(move |changes: &ContextChanges| {
                if let Some(observed) = filtered_changes(changes, filter.as_ref()) {
                    let _ = sender.send(observed);
                }
            })
        };

        ChangeSubscription {
            receiver,
            _registrations: Registrations::new(&self.hub, &self.mode, sink),
        }
    }
}

impl<F: ChangeFilter> Clone for ChangePublisher<F> {
    fn clone(&self) -> Self {
        Self {
            hub: Arc::clone(&self.hub),
            mode: self.mode.clone(),
            filter: Arc::clone(&self.filter),
        }
    }
}

/// Receiving end of a publisher subscription.
pub struct ChangeSubscription {
    receiver: Receiver<ObservedChanges>,
    _registrations: Registrations,
}

impl ChangeSubscription {
    /// Block until the next change set arrives.
    pub fn recv(&self) -> Option<ObservedChanges> {
        self.receiver.recv().ok()
    }

    pub fn try_recv(&self) -> Option<ObservedChanges> {
        match self.receiver.try_recv() {
            Ok(changes) => Some(changes),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Option<ObservedChanges> {
        match self.receiver.recv_timeout(timeout) {
            Ok(changes) => Some(changes),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Number of change sets waiting to be received.
    pub fn pending(&self) -> usize {
        self.receiver.len()
    }
}
