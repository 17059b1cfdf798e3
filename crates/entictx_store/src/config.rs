//! In-memory data manager configuration.

/// Configuration for [`crate::InMemoryDataManager`].
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// First value handed out by per-class id sequences.
    pub start_sequence: i64,

    /// Whether classes declared soft-delete are marked deleted instead of
    /// being removed.
    pub soft_delete: bool,

    /// User recorded as `deleted_by` on soft deletion.
    pub user: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            start_sequence: 1,
            soft_delete: true,
            user: "system".to_string(),
        }
    }
}

impl StoreConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the first sequence value.
    #[must_use]
    pub const fn start_sequence(mut self, value: i64) -> Self {
        self.start_sequence = value;
        self
    }

    /// Sets whether soft deletion is honored.
    #[must_use]
    pub const fn soft_delete(mut self, value: bool) -> Self {
        self.soft_delete = value;
        self
    }

    /// Sets the user recorded on soft deletion.
    #[must_use]
    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.user = user.into();
        self
    }
}
