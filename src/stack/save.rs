//! Save propagation up the context chain.
//!
//! A save commits one context into its parent on the context's own queue,
//! then hops onto the parent's queue and saves the parent, until the root
//! has committed to the store. Completion fires only after the whole chain
//! has been handled.

use crate::context::Context;
use futures::future::{BoxFuture, FutureExt};
use tracing::{debug, error};

enum LocalSave {
    /// Nothing pending; the chain above is left alone.
    Clean,
    Saved,
    Failed,
}

/// Save one level. Must run on the context's queue.
fn save_locally(context: &Context, rollback: bool) -> LocalSave {
    if !context.has_changes() {
        return LocalSave::Clean;
    }

    match context.save_changes() {
        Ok(()) => {
            debug!(context = %context.name(), "saved context");
            LocalSave::Saved
        }
        Err(e) => {
            error!(context = %context.name(), error = %e, rollback, "failed to save context");
            if rollback {
                context.rollback();
            }
            LocalSave::Failed
        }
    }
}

/// Save `context` and then every ancestor, reporting overall success to
/// `completion`.
///
/// With `rollback`, a failure discards the pending changes of the failing
/// context and of every context below it in this chain.
pub fn save<F>(context: &Context, rollback: bool, completion: F)
where
    F: FnOnce(bool) + Send + 'static,
{
    save_boxed(context, rollback, Box::new(completion));
}

/// Non-generic body of [`save`]; the completion is boxed so the recursive
/// call up the chain does not instantiate a new closure type per level.
fn save_boxed(context: &Context, rollback: bool, completion: Box<dyn FnOnce(bool) + Send + 'static>) {
    context.perform(move |context| match save_locally(context, rollback) {
        LocalSave::Clean => completion(true),
        LocalSave::Failed => completion(false),
        LocalSave::Saved => match context.parent() {
            None => completion(true),
            Some(parent) => {
                let child = context.clone();
                save_boxed(parent, rollback, Box::new(move |success| {
                    if !success && rollback {
                        child.perform(move |child| {
                            child.rollback();
                            completion(false);
                        });
                    } else {
                        completion(success);
                    }
                }));
            }
        },
    });
}

/// Awaitable form of [`save`]; resolves once every ancestor has been
/// handled.
pub fn save_async(context: &Context, rollback: bool) -> BoxFuture<'static, bool> {
    let context = context.clone();
    async move {
        let local = match context.run(move |context| save_locally(context, rollback)).await {
            Ok(local) => local,
            Err(e) => {
                error!(context = %context.name(), error = %e, "save could not run on context queue");
                return false;
            }
        };

        match local {
            LocalSave::Clean => true,
            LocalSave::Failed => false,
            LocalSave::Saved => {
                let parent = match context.parent() {
                    Some(parent) => parent.clone(),
                    None => return true,
                };

                let success = save_async(&parent, rollback).await;
                if !success && rollback {
                    if let Err(e) = context.run(|context| context.rollback()).await {
                        error!(context = %context.name(), error = %e, "rollback could not run on context queue");
                    }
                }
                success
            }
        }
    }
    .boxed()
}
