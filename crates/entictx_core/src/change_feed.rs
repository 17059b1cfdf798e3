//! Change feeds for observing a data context and its containers.
//!
//! Mutations do not call back into user code. Instead every observable
//! object owns a [`ChangeFeed`] that:
//! - Numbers events in emission order
//! - Hands each event to every live subscriber channel
//! - Keeps a bounded history for cursor-based polling
//!
//! # Usage
//!
//! ```rust,ignore
//! let events = ctx.subscribe();
//! ctx.set_value(customer, "name", "Bob")?;
//!
//! while let Ok(entry) = events.try_recv() {
//!     println!("{}: {:?}", entry.sequence, entry.event);
//! }
//! ```

use crate::context::EntityRef;
use entictx_model::PropertyValue;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};

/// Record of a tracked property mutation.
///
/// `added` and `removed` list the entity handles that entered or left the
/// property; they are empty for scalar properties.
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyChange {
    /// Mutated entity.
    pub entity: EntityRef,
    /// Mutated property.
    pub property: String,
    /// Value before the mutation, `None` if it was not loaded.
    pub previous: Option<PropertyValue<EntityRef>>,
    /// Value after the mutation.
    pub current: PropertyValue<EntityRef>,
    /// Handles that entered the property.
    pub added: Vec<EntityRef>,
    /// Handles that left the property.
    pub removed: Vec<EntityRef>,
}

impl PropertyChange {
    /// Returns `true` if the mutation left the property as it was.
    pub fn is_noop(&self) -> bool {
        self.previous.as_ref() == Some(&self.current)
    }
}

/// Event published by a [`crate::DataContext`].
#[derive(Debug, Clone, PartialEq)]
pub enum ContextEvent {
    /// A managed entity property was mutated.
    Changed(PropertyChange),
    /// A new entity became managed and joined the modified set.
    Created {
        /// The new managed entity.
        entity: EntityRef,
    },
    /// An entity was removed.
    Removed {
        /// The removed entity.
        entity: EntityRef,
    },
    /// An entity stopped being managed.
    Evicted {
        /// The evicted entity.
        entity: EntityRef,
    },
    /// A commit is about to run.
    PreCommit {
        /// Number of modified entities.
        modified: usize,
        /// Number of removed entities.
        removed: usize,
    },
    /// A commit finished.
    PostCommit {
        /// Managed entities returned by the commit.
        committed: Vec<EntityRef>,
    },
}

/// An event together with its position in the feed.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedEntry<E> {
    /// Position of the event, starting at 1.
    pub sequence: u64,
    /// The event.
    pub event: E,
}

/// A feed distributing events to subscribers.
///
/// The feed:
/// - Preserves emission order
/// - Supports multiple subscribers
/// - Drops subscribers whose receiver is gone
/// - Is thread-safe
pub struct ChangeFeed<E> {
    /// Subscribers (senders).
    subscribers: RwLock<Vec<Sender<FeedEntry<E>>>>,
    /// History of recent events for polling.
    history: RwLock<Vec<FeedEntry<E>>>,
    /// Maximum history size.
    max_history: usize,
    /// Last assigned sequence.
    sequence: AtomicU64,
}

impl<E: Clone> ChangeFeed<E> {
    /// Creates a new change feed.
    pub fn new() -> Self {
        Self::with_max_history(1024)
    }

    /// Creates a change feed with a specific history limit.
    pub fn with_max_history(max_history: usize) -> Self {
        Self {
            subscribers: RwLock::new(Vec::new()),
            history: RwLock::new(Vec::new()),
            max_history,
            sequence: AtomicU64::new(0),
        }
    }

    /// Subscribes to the feed.
    ///
    /// Returns a receiver for all future events. The receiver should be
    /// drained regularly to avoid unbounded memory growth.
    pub fn subscribe(&self) -> Receiver<FeedEntry<E>> {
        let (tx, rx) = mpsc::channel();
        self.subscribers.write().push(tx);
        rx
    }

    /// Emits an event to all subscribers and returns its sequence.
    pub fn emit(&self, event: E) -> u64 {
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        let entry = FeedEntry { sequence, event };

        if self.max_history > 0 {
            let mut history = self.history.write();
            history.push(entry.clone());
            if history.len() > self.max_history {
                let to_remove = history.len() - self.max_history;
                history.drain(0..to_remove);
            }
        }

        let mut subscribers = self.subscribers.write();
        subscribers.retain(|tx| tx.send(entry.clone()).is_ok());
        sequence
    }

    /// Polls events from a sequence cursor.
    ///
    /// Returns events with sequence > cursor, up to limit.
    pub fn poll(&self, cursor: u64, limit: usize) -> Vec<FeedEntry<E>> {
        self.history
            .read()
            .iter()
            .filter(|e| e.sequence > cursor)
            .take(limit)
            .cloned()
            .collect()
    }

    /// Returns the latest emitted sequence.
    pub fn latest_sequence(&self) -> u64 {
        self.sequence.load(Ordering::SeqCst)
    }

    /// Returns the number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }

    /// Returns the number of events in history.
    pub fn history_len(&self) -> usize {
        self.history.read().len()
    }
}

impl<E: Clone> Default for ChangeFeed<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> std::fmt::Debug for ChangeFeed<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeFeed")
            .field("subscribers", &self.subscribers.read().len())
            .field("history", &self.history.read().len())
            .field("sequence", &self.sequence.load(Ordering::SeqCst))
            .finish()
    }
}
