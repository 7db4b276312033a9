use super::changes::{filtered_changes, ObservedChanges};
use super::filter::ChangeFilter;
use super::hub::{ChangeHub, ChangeSink, ContextChanges, Registrations};
use super::mode::ObservationMode;
use futures::channel::mpsc;
use futures::stream::Stream;
use futures::StreamExt;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context as TaskContext, Poll};

/// Asynchronous sequence of matching change sets.
///
/// Registered on creation; dropping the stream deregisters it.
pub struct ChangeStream<F: ChangeFilter> {
    mode: ObservationMode,
    filter: Arc<F>,
    receiver: mpsc::UnboundedReceiver<ObservedChanges>,
    _registrations: Registrations,
}

impl<F: ChangeFilter> ChangeStream<F> {
    pub fn new(hub: &Arc<ChangeHub>, mode: ObservationMode, filter: F) -> Self {
        let filter = Arc::new(filter);
        let (sender, receiver) = mpsc::unbounded();

        let sink: ChangeSink = {
            let filter = Arc::clone(&filter);
            Arc::new(move |changes: &ContextChanges| {
                if let Some(observed) = filtered_changes(changes, filter.as_ref()) {
                    let _ = sender.unbounded_send(observed);
                }
            })
        };
        let registrations = Registrations::new(hub, &mode, sink);

        Self {
            mode,
            filter,
            receiver,
            _registrations: registrations,
        }
    }

    pub fn mode(&self) -> &ObservationMode {
        &self.mode
    }

    pub fn filter(&self) -> &F {
        &self.filter
    }
}

impl<F: ChangeFilter> Stream for ChangeStream<F> {
    type Item = ObservedChanges;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_next_unpin(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ManagedObject;
    use crate::observation::EntityNameFilter;
    use crate::queue::ExecutionQueue;
    use crate::types::{ContextId, ObjectId, ObjectRecord, Properties};
    use futures::executor::block_on;

    #[test]
    fn test_stream_yields_matching_changes() {
        let hub = Arc::new(ChangeHub::new(ExecutionQueue::new("test.main")));
        let mut stream = ChangeStream::new(
            &hub,
            ObservationMode::SingleContext(ContextId(9)),
            EntityNameFilter::new(["Widget"]),
        );

        let id = ObjectId::durable("Widget", 5);
        let object = ManagedObject::new(
            id.clone(),
            ObjectRecord::new("Widget", Properties::new()),
            None,
        );
        hub.broadcast(&ContextChanges {
            context: ContextId(9),
            inserted: Vec::new(),
            updated: Vec::new(),
            deleted: vec![object],
        });

        let changes = block_on(stream.next()).unwrap();
        assert!(changes.deleted().contains(&id));
    }

    #[test]
    fn test_drop_deregisters() {
        let hub = Arc::new(ChangeHub::new(ExecutionQueue::new("test.main")));
        let stream = ChangeStream::new(
            &hub,
            ObservationMode::AllContexts,
            EntityNameFilter::new(["Widget"]),
        );
        assert_eq!(hub.registration_count(), 1);
        drop(stream);
        assert_eq!(hub.registration_count(), 0);
    }
}
