use super::hub::NotificationSource;
use crate::context::Context;
use crate::types::ContextId;

/// Which contexts an observer listens to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ObservationMode {
    AllContexts,
    SingleContext(ContextId),
    /// Must name at least one context; use `AllContexts` otherwise.
    MultipleContexts(Vec<ContextId>),
}

impl ObservationMode {
    pub fn single(context: &Context) -> Self {
        ObservationMode::SingleContext(context.id())
    }

    /// Observe a fixed, non-empty set of contexts.
    ///
    /// # Panics
    ///
    /// Panics if `contexts` is empty.
    pub fn multiple(contexts: &[Context]) -> Self {
        assert!(
            !contexts.is_empty(),
            "MultipleContexts needs at least one context; use AllContexts instead"
        );
        ObservationMode::MultipleContexts(contexts.iter().map(Context::id).collect())
    }

    /// The narrowest mode covering the given context ids: all contexts for
    /// none, a single context for one, several otherwise.
    pub fn from_context_ids<I>(ids: I) -> Self
    where
        I: IntoIterator<Item = ContextId>,
    {
        let mut unique: Vec<ContextId> = Vec::new();
        for id in ids {
            if !unique.contains(&id) {
                unique.push(id);
            }
        }

        match unique.len() {
            0 => ObservationMode::AllContexts,
            1 => ObservationMode::SingleContext(unique[0]),
            _ => ObservationMode::MultipleContexts(unique),
        }
    }

    pub(crate) fn sources(&self) -> Vec<NotificationSource> {
        match self {
            ObservationMode::AllContexts => vec![NotificationSource::AnyContext],
            ObservationMode::SingleContext(id) => vec![NotificationSource::Context(*id)],
            ObservationMode::MultipleContexts(ids) => {
                assert!(
                    !ids.is_empty(),
                    "MultipleContexts needs at least one context; use AllContexts instead"
                );
                ids.iter().map(|id| NotificationSource::Context(*id)).collect()
            }
        }
    }
}
