//! Error types for archetype layout, structural changes and queries.
//!
//! This module declares focused, composable error types used across the
//! storage core. Each error carries enough context to make failures
//! actionable while remaining small and cheap to pass around or convert into
//! the aggregate [`ECSError`].
//!
//! ## Taxonomy
//! * **Capacity** ([`CapacityError`]): a component combination does not fit a
//!   single entity into the chunk byte budget. Never partially applied.
//! * **Configuration** ([`ConfigurationError`]): an invalid component
//!   combination or registry request (e.g. disabled-filtering on a type that
//!   is not enableable, too many shared types, the entity-identity type used
//!   as a component).
//! * **Referential** ([`ReferentialError`]): a stale entity handle, a released
//!   query, or a component the entity does not carry.
//! * **Consistency** ([`ConsistencyError`]): produced only by
//!   `EntityStore::check_internal_consistency`, never by normal operation.
//!
//! ## Propagation
//! Capacity, configuration and referential errors fail the single call that
//! triggered them and leave all prior state untouched. Nothing is retried
//! automatically; callers must re-issue a corrected request.
//!
//! ## Display vs. Debug
//! * [`fmt::Display`] is short and suited to logs.
//! * [`fmt::Debug`] (derived) retains full structure for diagnostics.

use std::fmt;

use crate::engine::entity::Entity;
use crate::engine::query::QueryId;
use crate::engine::types::{ArchetypeID, ChunkID, ComponentID, RowID};


/// Returned when the requested component combination cannot fit even one
/// entity into a chunk.
///
/// ### Fields
/// * `per_entity_bytes`: Byte cost of one entity in the rejected archetype.
/// * `budget`: The chunk payload budget it was measured against.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapacityError {

    /// Per-entity byte cost of the rejected archetype.
    pub per_entity_bytes: usize,

    /// Chunk payload budget in bytes.
    pub budget: usize,
}

impl fmt::Display for CapacityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "component combination needs {} bytes per entity; chunk budget is {}",
            self.per_entity_bytes, self.budget
        )
    }
}

impl std::error::Error for CapacityError {}

/// Invalid component combinations and registry misuse.

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigurationError {

    /// A type requested as "must be disabled" is not enableable.
    DisabledNotEnableable {
        /// Offending component.
        component_id: ComponentID,
    },

    /// An archetype would carry more shared types than allowed.
    TooManySharedComponents {
        /// Shared types requested.
        requested: usize,
        /// Allowed maximum.
        max: usize,
    },

    /// A query constrains more enableable types than allowed.
    TooManyEnableableComponents {
        /// Enableable types constrained.
        requested: usize,
        /// Allowed maximum.
        max: usize,
    },

    /// The implicit entity-identity type was named as an explicit component.
    EntityTypeAsComponent,

    /// One type ID was requested in two categories within one archetype or clause.
    ConflictingCategory {
        /// Offending component.
        component_id: ComponentID,
    },

    /// A Rust type was used before being registered.
    UnregisteredComponent {
        /// Type name of the unregistered component.
        name: &'static str,
    },

    /// The component registry no longer accepts registrations.
    RegistryFrozen,

    /// The component registry ran out of identifiers.
    RegistryFull,

    /// A type was re-registered, or used, with a different kind than its registration.
    WrongComponentKind {
        /// Offending component.
        component_id: ComponentID,
        /// Kind the caller expected.
        expected: &'static str,
    },

    /// A component was added to an entity that already has it.
    DuplicateComponent {
        /// Offending component.
        component_id: ComponentID,
    },

    /// The entity is a chunk's meta entity and is managed internally.
    MetaEntityMutation,

    /// A buffer push exceeded the registered inline capacity.
    BufferOverflow {
        /// Offending component.
        component_id: ComponentID,
        /// Registered inline capacity.
        capacity: usize,
    },

    /// A query was built without any clause.
    EmptyQuery,
}

impl fmt::Display for ConfigurationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigurationError::DisabledNotEnableable { component_id } => write!(
                f,
                "component {} is not enableable and cannot be filtered as disabled",
                component_id
            ),
            ConfigurationError::TooManySharedComponents { requested, max } => write!(
                f,
                "{} shared component types requested; maximum per archetype is {}",
                requested, max
            ),
            ConfigurationError::TooManyEnableableComponents { requested, max } => write!(
                f,
                "{} enableable component types constrained; maximum per query is {}",
                requested, max
            ),
            ConfigurationError::EntityTypeAsComponent => {
                f.write_str("the entity type cannot be used as an explicit component")
            }
            ConfigurationError::ConflictingCategory { component_id } => write!(
                f,
                "component {} requested in more than one category",
                component_id
            ),
            ConfigurationError::UnregisteredComponent { name } => {
                write!(f, "component type {} is not registered", name)
            }
            ConfigurationError::RegistryFrozen => f.write_str("component registry is frozen"),
            ConfigurationError::RegistryFull => f.write_str("component registry is full"),
            ConfigurationError::WrongComponentKind { component_id, expected } => write!(
                f,
                "component {} is not registered as {}",
                component_id, expected
            ),
            ConfigurationError::DuplicateComponent { component_id } => {
                write!(f, "entity already has component {}", component_id)
            }
            ConfigurationError::MetaEntityMutation => {
                f.write_str("meta-chunk entities are managed by the store")
            }
            ConfigurationError::BufferOverflow { component_id, capacity } => write!(
                f,
                "buffer component {} is full (capacity {})",
                component_id, capacity
            ),
            ConfigurationError::EmptyQuery => f.write_str("query has no clauses"),
        }
    }
}

impl std::error::Error for ConfigurationError {}

/// Operations on handles that no longer refer to live data.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferentialError {

    /// The entity handle was destroyed or its generation does not match.
    StaleEntity(Entity),

    /// The query handle was released.
    QueryReleased(QueryId),

    /// The entity does not carry the requested component.
    MissingComponent {
        /// Entity that was addressed.
        entity: Entity,
        /// Component that was requested.
        component_id: ComponentID,
    },

    /// The `(archetype, chunk)` pair does not name a live chunk.
    UnknownChunk {
        /// Archetype addressed.
        archetype: ArchetypeID,
        /// Chunk addressed.
        chunk: ChunkID,
    },

    /// A row index at or past the chunk's live entity count.
    RowOutOfRange {
        /// Archetype addressed.
        archetype: ArchetypeID,
        /// Chunk addressed.
        chunk: ChunkID,
        /// Row requested.
        row: usize,
        /// Live entities in the chunk.
        count: usize,
    },
}

impl fmt::Display for ReferentialError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReferentialError::StaleEntity(entity) => {
                write!(f, "stale or dead entity reference {:?}", entity)
            }
            ReferentialError::QueryReleased(query) => {
                write!(f, "query {:?} has been released", query)
            }
            ReferentialError::MissingComponent { entity, component_id } => write!(
                f,
                "entity {:?} has no component {}",
                entity, component_id
            ),
            ReferentialError::UnknownChunk { archetype, chunk } => write!(
                f,
                "no live chunk {} in archetype {}",
                chunk, archetype
            ),
            ReferentialError::RowOutOfRange { archetype, chunk, row, count } => write!(
                f,
                "row {} out of range for chunk {} in archetype {} ({} live)",
                row, chunk, archetype, count
            ),
        }
    }
}

impl std::error::Error for ReferentialError {}

/// Disagreement between directory, chunk and cache state.
///
/// ## Context
/// Only produced by the explicit validation routine; a value of this type
/// always indicates an internal bug, never a caller mistake.

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsistencyError {

    /// A chunk's `count` disagrees with its entity column.
    ChunkCount {
        /// Archetype of the chunk.
        archetype: ArchetypeID,
        /// Chunk slot.
        chunk: ChunkID,
        /// Recorded count.
        count: usize,
        /// Live entities found.
        found: usize,
    },

    /// A directory entry does not point back at the chunk slot holding the entity.
    DirectoryMismatch {
        /// Entity whose entry is wrong.
        entity: Entity,
        /// Where the chunk says it is.
        archetype: ArchetypeID,
        /// Chunk slot.
        chunk: ChunkID,
        /// Row.
        row: RowID,
    },

    /// A chunk's cached disabled count disagrees with its bitset.
    DisabledCount {
        /// Archetype of the chunk.
        archetype: ArchetypeID,
        /// Chunk slot.
        chunk: ChunkID,
        /// Enableable index within the archetype.
        enableable_index: usize,
    },

    /// An archetype's live-entity total disagrees with the directory.
    EntityTotal {
        /// Live entities in the directory.
        directory: usize,
        /// Entities found in chunks.
        chunks: usize,
    },

    /// A chunk-level chunk has no (or a wrong) meta entity.
    MetaEntity {
        /// Archetype of the chunk.
        archetype: ArchetypeID,
        /// Chunk slot.
        chunk: ChunkID,
    },

    /// A valid-looking query cache disagrees with a fresh scan.
    QueryCache {
        /// The query whose cache is wrong.
        query: QueryId,
    },

    /// An empty chunk was left allocated.
    EmptyChunk {
        /// Archetype of the chunk.
        archetype: ArchetypeID,
        /// Chunk slot.
        chunk: ChunkID,
    },

    /// The open-chunk index disagrees with which chunks have room.
    OpenChunks {
        /// Archetype whose index is wrong.
        archetype: ArchetypeID,
    },
}

impl fmt::Display for ConsistencyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConsistencyError::ChunkCount { archetype, chunk, count, found } => write!(
                f,
                "chunk {}:{} records {} entities but holds {}",
                archetype, chunk, count, found
            ),
            ConsistencyError::DirectoryMismatch { entity, archetype, chunk, row } => write!(
                f,
                "entity {:?} stored at {}:{}:{} has a mismatching directory entry",
                entity, archetype, chunk, row
            ),
            ConsistencyError::DisabledCount { archetype, chunk, enableable_index } => write!(
                f,
                "chunk {}:{} disabled count for enableable {} is out of sync",
                archetype, chunk, enableable_index
            ),
            ConsistencyError::EntityTotal { directory, chunks } => write!(
                f,
                "directory has {} live entities but chunks hold {}",
                directory, chunks
            ),
            ConsistencyError::MetaEntity { archetype, chunk } => write!(
                f,
                "chunk {}:{} has a missing or mislinked meta entity",
                archetype, chunk
            ),
            ConsistencyError::QueryCache { query } => {
                write!(f, "query {:?} cache disagrees with a fresh scan", query)
            }
            ConsistencyError::EmptyChunk { archetype, chunk } => {
                write!(f, "empty chunk {}:{} was not released", archetype, chunk)
            }
            ConsistencyError::OpenChunks { archetype } => {
                write!(f, "archetype {} open-chunk index is out of sync", archetype)
            }
        }
    }
}

impl std::error::Error for ConsistencyError {}

/// Aggregate error for every fallible operation of the storage core.

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ECSError {

    /// The destination archetype does not fit the chunk budget.
    Capacity(CapacityError),

    /// Invalid component combination or registry request.
    Configuration(ConfigurationError),

    /// Stale or released handle.
    Referential(ReferentialError),

    /// Internal state disagreement found by validation.
    Consistency(ConsistencyError),

    /// An internal invariant was violated outside of validation.
    Internal(String),
}

impl fmt::Display for ECSError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ECSError::Capacity(e) => write!(f, "{e}"),
            ECSError::Configuration(e) => write!(f, "{e}"),
            ECSError::Referential(e) => write!(f, "{e}"),
            ECSError::Consistency(e) => write!(f, "consistency check failed: {e}"),
            ECSError::Internal(message) => write!(f, "internal error: {message}"),
        }
    }
}

impl std::error::Error for ECSError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ECSError::Capacity(e) => Some(e),
            ECSError::Configuration(e) => Some(e),
            ECSError::Referential(e) => Some(e),
            ECSError::Consistency(e) => Some(e),
            ECSError::Internal(_) => None,
        }
    }
}

impl From<CapacityError> for ECSError {
    fn from(e: CapacityError) -> Self { ECSError::Capacity(e) }
}
impl From<ConfigurationError> for ECSError {
    fn from(e: ConfigurationError) -> Self { ECSError::Configuration(e) }
}
impl From<ReferentialError> for ECSError {
    fn from(e: ReferentialError) -> Self { ECSError::Referential(e) }
}
impl From<ConsistencyError> for ECSError {
    fn from(e: ConsistencyError) -> Self { ECSError::Consistency(e) }
}

/// Result alias used across the crate.
pub type ECSResult<T> = Result<T, ECSError>;
