//! Data context configuration.

/// Configuration for a [`crate::DataContext`].
#[derive(Debug, Clone)]
pub struct ContextConfig {
    /// Whether nulls sort after non-null values in ascending order.
    pub nulls_last: bool,

    /// Number of events the change feed keeps for polling.
    pub max_feed_history: usize,

    /// Whether new entities join the modified set when merged.
    pub merge_new_as_modified: bool,

    /// Whether removed entities are evicted once a commit succeeds.
    pub evict_removed_after_commit: bool,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            nulls_last: true,
            max_feed_history: 1024,
            merge_new_as_modified: true,
            evict_removed_after_commit: true,
        }
    }
}

impl ContextConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the null ordering of comparators.
    #[must_use]
    pub const fn nulls_last(mut self, value: bool) -> Self {
        self.nulls_last = value;
        self
    }

    /// Sets the change feed history size.
    #[must_use]
    pub const fn max_feed_history(mut self, size: usize) -> Self {
        self.max_feed_history = size;
        self
    }

    /// Sets whether merged new entities are marked modified.
    #[must_use]
    pub const fn merge_new_as_modified(mut self, value: bool) -> Self {
        self.merge_new_as_modified = value;
        self
    }

    /// Sets whether removed entities are evicted after commit.
    #[must_use]
    pub const fn evict_removed_after_commit(mut self, value: bool) -> Self {
        self.evict_removed_after_commit = value;
        self
    }
}
