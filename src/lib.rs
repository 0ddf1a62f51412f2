//! # ecs_chunks
//!
//! Archetype-based entity/component storage with chunked
//! structure-of-arrays layout.
//!
//! ## Design Goals
//! - Fixed-size, cache-aligned chunks with published capacity math
//! - Per-entity enable bits that filter iteration without structural moves
//! - Cached, incrementally matched queries
//! - Structural changes that never partially apply
//!
//! ## Example
//! ```ignore
//! use ecs_chunks::prelude::*;
//!
//! #[derive(Clone, Copy, Default)]
//! struct Health(u32);
//!
//! register_component::<Health>()?;
//! let mut store = EntityStore::new();
//! let e = store.create_entity(&[ComponentType::of::<Health>()?])?;
//! store.set_component(e, Health(10))?;
//! ```

#![forbid(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]
#![allow(clippy::module_inception)]

pub mod engine;

// ─────────────────────────────────────────────────────────────────────────────
// Re-exports (Public API)
// ─────────────────────────────────────────────────────────────────────────────

pub use engine::store::{
    EntityStore,
    ArchetypeChange,
};

pub use engine::config::StoreConfig;

pub use engine::entity::{
    Entity,
    EntityLocation,
};

pub use engine::component::{
    Component,
    SharedComponent,
    ComponentDesc,
    ComponentKind,
    ChunkHeader,
    Disabled,
    Prefab,
    SystemInstance,
    CleanupEntity,
    register_component,
    register_enableable_component,
    register_shared_component,
    register_buffer_component,
    register_cleanup_component,
    freeze_components,
    component_id_of,
    component_description_by_component_id,
};

pub use engine::layout::ArchetypeLayout;

pub use engine::batch::{
    Batch,
    combined_mask,
    find_batches,
};

pub use engine::query::{
    QueryBuilder,
    QueryId,
    QueryOptions,
    QueryFilter,
    EntityQueryDesc,
    ChunkRef,
};

pub use engine::iteration::{
    ChunkBatch,
    ChunkView,
    ChunkViewMut,
};

pub use engine::error::{
    ECSResult,
    ECSError,
    CapacityError,
    ConfigurationError,
    ReferentialError,
    ConsistencyError,
};

pub use engine::types::{
    ArchetypeID,
    ChunkID,
    ComponentID,
    ComponentType,
    AccessMode,
    TypeModifier,
    Signature,
    Version,
    CHUNK_PAYLOAD_SIZE,
    ENTITY_SIZE,
    MAX_SHARED_COMPONENTS,
    MAX_ENABLEABLE_PER_QUERY,
};

// ─────────────────────────────────────────────────────────────────────────────
// Prelude
// ─────────────────────────────────────────────────────────────────────────────

/// Commonly used types.
///
/// Import with:
/// ```rust
/// use ecs_chunks::prelude::*;
/// ```
pub mod prelude {
    pub use crate::{
        EntityStore,
        StoreConfig,
        Entity,
        ComponentType,
        QueryBuilder,
        QueryId,
        QueryOptions,
        ECSResult,
        ECSError,
        register_component,
        register_enableable_component,
        register_shared_component,
        register_buffer_component,
        register_cleanup_component,
        freeze_components,
        component_id_of,
    };
}
