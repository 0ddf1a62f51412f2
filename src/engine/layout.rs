//! # Archetype layout
//!
//! Resolves an archetype's type set into a concrete chunk layout: which types
//! own a column, where each column starts, how many entities fit, and which
//! types carry enable bits or shared-value indices.
//!
//! ## Capacity
//!
//! ```text
//! per_entity_bytes = ENTITY_SIZE + Σ column_size(type)
//! capacity         = floor(CHUNK_PAYLOAD_SIZE / per_entity_bytes)
//! ```
//!
//! Enable bits, change versions and shared-value indices live in chunk side
//! tables sized by `capacity`, so they do not enter `per_entity_bytes`. A type
//! set whose `per_entity_bytes` exceeds the payload is rejected with a
//! [`CapacityError`] before anything is allocated.
//!
//! ## Column order
//!
//! The entity-identity column is always first. Remaining columns follow in
//! ascending type-slot order, each start rounded up to the column alignment.
//! The resulting arena length is at most the payload plus the alignment
//! padding, which is carried by the arena allocation and not by the budget.

use crate::engine::component::{
    ComponentDesc, ComponentKind, ENTITY_COMPONENT_ID, require_description, round_up,
};
use crate::engine::error::{CapacityError, ConfigurationError, ECSResult};
use crate::engine::types::{
    ComponentID, Signature, TypeSlot, CHUNK_PAYLOAD_SIZE, ENTITY_SIZE, MAX_SHARED_COMPONENTS,
    split_slot,
};


/// One per-entity type in an archetype.
#[derive(Clone, Copy, Debug)]
pub struct ColumnLayout {
    /// Registered component.
    pub component_id: ComponentID,
    /// Byte offset of the column inside the chunk arena.
    pub offset: usize,
    /// Bytes per entity (0 for tags and shared types).
    pub size: usize,
    /// Byte offset of this type inside a packed row snapshot.
    pub row_offset: usize,
    /// Index into the chunk's enable bit sets, if enableable.
    pub enableable_index: Option<usize>,
    /// Index into the chunk's shared value indices, if shared.
    pub shared_index: Option<usize>,
    /// Registry metadata captured at archetype creation.
    pub desc: ComponentDesc,
}

/// Resolved layout of one archetype.
///
/// ## Invariants
/// - `capacity >= 1` and `capacity * per_entity_bytes <= CHUNK_PAYLOAD_SIZE`.
/// - `columns` is sorted by `component_id` and holds every per-entity type.
/// - `chunk_level` holds every chunk-level type, sorted.

#[derive(Clone, Debug)]
pub struct ArchetypeLayout {
    /// Type set of the archetype.
    pub signature: Signature,
    /// Occupied signature slots, ascending.
    pub slots: Vec<TypeSlot>,
    /// Per-entity types, ascending by component.
    pub columns: Vec<ColumnLayout>,
    /// Chunk-level types, ascending.
    pub chunk_level: Vec<ComponentID>,
    /// Column index of each enableable type, by enableable index.
    pub enableable: Vec<usize>,
    /// Column index of each shared type, by shared index.
    pub shared: Vec<usize>,
    /// Entities per chunk.
    pub capacity: usize,
    /// Identity plus column bytes of one entity.
    pub per_entity_bytes: usize,
    /// Total arena bytes including alignment padding.
    pub arena_bytes: usize,
    /// Bytes of one packed row snapshot (all columns, no padding).
    pub row_bytes: usize,
    /// Archetype contains cleanup-kind components.
    pub has_cleanup: bool,
}

impl ArchetypeLayout {

    /// Computes the layout of `signature`.
    ///
    /// ## Errors
    /// - `EntityTypeAsComponent` if the entity-identity type is listed.
    /// - `ConflictingCategory` if a type appears both per-entity and chunk-level,
    ///   or a shared/buffer/cleanup type is requested chunk-level.
    /// - `TooManySharedComponents` past `MAX_SHARED_COMPONENTS`.
    /// - `Capacity` if one entity does not fit.

    pub fn compute(signature: &Signature) -> ECSResult<Self> {
        let slots: Vec<TypeSlot> = signature.iterate_over_components().collect();

        let mut columns = Vec::new();
        let mut chunk_level = Vec::new();
        let mut enableable = Vec::new();
        let mut shared = Vec::new();
        let mut per_entity_bytes = ENTITY_SIZE;
        let mut row_bytes = 0usize;
        let mut has_cleanup = false;

        for &slot in &slots {
            let (component_id, is_chunk) = split_slot(slot);
            if component_id == ENTITY_COMPONENT_ID {
                return Err(ConfigurationError::EntityTypeAsComponent.into());
            }
            let desc = require_description(component_id)?;

            if is_chunk {
                if !matches!(desc.kind, ComponentKind::Value | ComponentKind::Tag) {
                    return Err(ConfigurationError::ConflictingCategory { component_id }.into());
                }
                // Chunk slots sort after every entity slot, so the per-entity
                // form of this type, if any, is already in `columns`.
                if columns.iter().any(|c: &ColumnLayout| c.component_id == component_id) {
                    return Err(ConfigurationError::ConflictingCategory { component_id }.into());
                }
                chunk_level.push(component_id);
                continue;
            }

            let column_index = columns.len();
            let enableable_index = desc.enableable.then(|| {
                enableable.push(column_index);
                enableable.len() - 1
            });
            let shared_index = desc.is_shared().then(|| {
                shared.push(column_index);
                shared.len() - 1
            });
            has_cleanup |= desc.is_cleanup();

            per_entity_bytes += desc.size;
            columns.push(ColumnLayout {
                component_id,
                offset: 0,
                size: desc.size,
                row_offset: row_bytes,
                enableable_index,
                shared_index,
                desc,
            });
            row_bytes += desc.size;
        }

        if shared.len() > MAX_SHARED_COMPONENTS {
            return Err(ConfigurationError::TooManySharedComponents {
                requested: shared.len(),
                max: MAX_SHARED_COMPONENTS,
            }
            .into());
        }

        let capacity = CHUNK_PAYLOAD_SIZE / per_entity_bytes;
        if capacity == 0 {
            return Err(CapacityError { per_entity_bytes, budget: CHUNK_PAYLOAD_SIZE }.into());
        }

        let mut offset = capacity * ENTITY_SIZE;
        for column in columns.iter_mut().filter(|c| c.size > 0) {
            offset = round_up(offset, column.desc.align);
            column.offset = offset;
            offset += capacity * column.size;
        }

        Ok(Self {
            signature: *signature,
            slots,
            columns,
            chunk_level,
            enableable,
            shared,
            capacity,
            per_entity_bytes,
            arena_bytes: offset,
            row_bytes,
            has_cleanup,
        })
    }

    /// Returns the column index of `component_id`, if it is a per-entity type here.
    #[inline]
    pub fn column_index(&self, component_id: ComponentID) -> Option<usize> {
        self.columns
            .binary_search_by_key(&component_id, |c| c.component_id)
            .ok()
    }

    /// Returns the column layout of `component_id`, if present.
    #[inline]
    pub fn column(&self, component_id: ComponentID) -> Option<&ColumnLayout> {
        self.column_index(component_id).map(|i| &self.columns[i])
    }

    /// Returns the enableable index of `component_id`, if it is enableable here.
    #[inline]
    pub fn enableable_index(&self, component_id: ComponentID) -> Option<usize> {
        self.column(component_id).and_then(|c| c.enableable_index)
    }

    /// Returns the shared index of `component_id`, if it is shared here.
    #[inline]
    pub fn shared_index(&self, component_id: ComponentID) -> Option<usize> {
        self.column(component_id).and_then(|c| c.shared_index)
    }

    /// Number of enableable types.
    #[inline]
    pub fn enableable_count(&self) -> usize { self.enableable.len() }

    /// Number of shared types.
    #[inline]
    pub fn shared_count(&self) -> usize { self.shared.len() }

    /// Returns `true` if the archetype stores chunk-level components.
    #[inline]
    pub fn has_chunk_components(&self) -> bool { !self.chunk_level.is_empty() }

    /// Component IDs of the cleanup-kind types, ascending.
    pub fn cleanup_components(&self) -> impl Iterator<Item = ComponentID> + '_ {
        self.columns.iter().filter(|c| c.desc.is_cleanup()).map(|c| c.component_id)
    }
}
