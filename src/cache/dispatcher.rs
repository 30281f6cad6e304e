//! Change event → cache tag invalidation

use std::sync::{Arc, Weak};

use super::{CacheTag, InvalidationSink};
use crate::events::{ChangeEvent, EntityType};

/// Maps change events to tag invalidations on a weakly held sink.
///
/// The sink is not kept alive by the dispatcher: once the fetching layer is
/// gone, dispatch is a no-op.
#[derive(Clone, Default)]
pub struct CacheInvalidator {
    sink: Option<Weak<dyn InvalidationSink>>,
}

impl CacheInvalidator {
    pub fn new<S>(sink: &Arc<S>) -> Self
    where
        S: InvalidationSink + 'static,
    {
        let weak = Arc::downgrade(sink);
        let weak: Weak<dyn InvalidationSink> = weak;
        Self { sink: Some(weak) }
    }

    /// Dispatcher with no sink; every dispatch returns `false`
    pub fn detached() -> Self {
        Self { sink: None }
    }

    /// Tags invalidated by a change to `entity`
    pub fn tags_for(entity: EntityType) -> &'static [CacheTag] {
        match entity {
            EntityType::Content => &[CacheTag::Content],
            EntityType::Business => &[CacheTag::Businesses],
            EntityType::User => &[CacheTag::Users],
        }
    }

    /// Signal the sink. Returns whether a live sink received it.
    pub fn dispatch(&self, event: &ChangeEvent) -> bool {
        let tags = Self::tags_for(event.entity);
        match self.sink.as_ref().and_then(Weak::upgrade) {
            Some(sink) => {
                tracing::debug!(event = %event.event_name(), ?tags, "invalidating cache tags");
                sink.invalidate_tags(tags);
                true
            }
            None => {
                tracing::debug!(event = %event.event_name(), "no cache attached, skipping invalidation");
                false
            }
        }
    }

    pub fn is_attached(&self) -> bool {
        self.sink
            .as_ref()
            .is_some_and(|weak| weak.strong_count() > 0)
    }
}

impl std::fmt::Debug for CacheInvalidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheInvalidator")
            .field("attached", &self.is_attached())
            .finish()
    }
}
