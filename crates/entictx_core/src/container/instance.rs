//! Single-instance container.

use super::ContainerEvent;
use crate::change_feed::{ChangeFeed, FeedEntry};
use crate::context::EntityRef;
use entictx_model::FetchPlan;
use std::sync::mpsc::Receiver;

/// Holds zero or one managed entity.
#[derive(Debug)]
pub struct InstanceContainer {
    class: String,
    fetch_plan: Option<FetchPlan>,
    item: Option<EntityRef>,
    feed: ChangeFeed<ContainerEvent>,
}

impl InstanceContainer {
    /// Creates an empty container for entities of `class`.
    pub fn new(class: impl Into<String>) -> Self {
        Self {
            class: class.into(),
            fetch_plan: None,
            item: None,
            feed: ChangeFeed::new(),
        }
    }

    /// Sets the fetch plan describing what the item has loaded.
    #[must_use]
    pub fn with_fetch_plan(mut self, plan: FetchPlan) -> Self {
        self.fetch_plan = Some(plan);
        self
    }

    /// Entity class.
    pub fn class(&self) -> &str {
        &self.class
    }

    /// Fetch plan, if any.
    pub fn fetch_plan(&self) -> Option<&FetchPlan> {
        self.fetch_plan.as_ref()
    }

    /// Sets the fetch plan.
    pub fn set_fetch_plan(&mut self, plan: Option<FetchPlan>) {
        self.fetch_plan = plan;
    }

    /// The held entity.
    pub fn item(&self) -> Option<EntityRef> {
        self.item
    }

    /// Replaces the held entity, publishing `ItemChanged` if it differs.
    pub fn set_item(&mut self, item: Option<EntityRef>) {
        let previous = std::mem::replace(&mut self.item, item);
        if previous != item {
            self.feed.emit(ContainerEvent::ItemChanged { previous, item });
        }
    }

    /// Subscribes to container events.
    pub fn subscribe(&self) -> Receiver<FeedEntry<ContainerEvent>> {
        self.feed.subscribe()
    }

    /// Polls recent events after `cursor`.
    pub fn poll_events(&self, cursor: u64, limit: usize) -> Vec<FeedEntry<ContainerEvent>> {
        self.feed.poll(cursor, limit)
    }
}
