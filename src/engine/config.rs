//! Store configuration.
//!
//! Layout limits are compile-time constants in [`crate::engine::types`]; this
//! module holds the per-store runtime knobs.

/// Runtime settings of an [`EntityStore`](crate::engine::store::EntityStore).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StoreConfig {
    /// Directory slots reserved up front.
    pub entity_reserve: usize,
    /// Run the consistency check after every structural operation and log
    /// failures at `error` level.
    pub validate_structural_changes: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            entity_reserve: 1024,
            validate_structural_changes: cfg!(debug_assertions),
        }
    }
}

impl StoreConfig {
    /// Sets the directory reservation.
    pub fn with_entity_reserve(mut self, entity_reserve: usize) -> Self {
        self.entity_reserve = entity_reserve;
        self
    }

    /// Enables or disables per-operation validation.
    pub fn with_validation(mut self, enabled: bool) -> Self {
        self.validate_structural_changes = enabled;
        self
    }
}
