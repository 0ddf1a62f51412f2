//! # Entity store
//!
//! [`EntityStore`] owns every archetype, chunk, directory entry, shared value
//! and query, and is the only place structural changes happen.
//!
//! ## Responsibilities
//! * interning archetypes by signature and offering new ones to live queries,
//! * creating and destroying entities, including cleanup-component retention,
//! * moving entities between chunks while preserving column data, enable bits
//!   and shared-value indices,
//! * typed component, shared-component and buffer access,
//! * the global version counter and the archetype change log.
//!
//! ## Concurrency model
//! Structural operations take `&mut self`, so the borrow checker is the global
//! writer lock. Reads and enable-bit writes take `&self`; enable bits are
//! guarded per chunk, so they may run alongside reads of other chunks.
//!
//! ## Failure model
//! Every fallible call validates its inputs and resolves its destination
//! archetype before touching any entity. A returned error means no entity has
//! changed archetype.

use std::collections::HashMap;
use std::sync::Arc;

use crate::engine::archetype::Archetype;
use crate::engine::chunk::{Chunk, RowSnapshot};
use crate::engine::component::{
    CHUNK_HEADER_ID, CLEANUP_ENTITY_ID, ENTITY_COMPONENT_ID, ChunkHeader, Component, SharedComponent,
    component_id_of,
};
use crate::engine::config::StoreConfig;
use crate::engine::entity::{Entities, Entity, EntityLocation};
use crate::engine::error::{ConfigurationError, ECSError, ECSResult, ReferentialError};
use crate::engine::layout::ArchetypeLayout;
use crate::engine::query::QueryRegistry;
use crate::engine::shared::SharedComponentStore;
use crate::engine::types::{
    ArchetypeID, ChunkID, ComponentID, ComponentType, Signature, TypeModifier, Version, entity_slot,
    ENTITY_SIZE,
};


/// One entity's archetype transition, as reported to external consumers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ArchetypeChange {
    /// Entity that moved.
    pub entity: Entity,
    /// `None` for newly created entities.
    pub from: Option<ArchetypeID>,
    /// `None` for destroyed entities.
    pub to: Option<ArchetypeID>,
}

/// Archetype/chunk entity storage.
pub struct EntityStore {
    pub(crate) config: StoreConfig,
    pub(crate) entities: Entities,
    pub(crate) archetypes: Vec<Archetype>,
    archetype_index: HashMap<Signature, ArchetypeID>,
    pub(crate) shared: SharedComponentStore,
    pub(crate) queries: QueryRegistry,
    version: Version,
    changes: Vec<ArchetypeChange>,
    scratch: RowSnapshot,
}

impl Default for EntityStore {
    fn default() -> Self {
        Self::new()
    }
}

impl EntityStore {

    /// Creates an empty store with the default configuration.
    pub fn new() -> Self {
        Self::with_config(StoreConfig::default())
    }

    /// Creates an empty store.
    ///
    /// ## Behavior
    /// - Reserves `config.entity_reserve` directory slots.
    /// - Creates the empty archetype as archetype 0.
    /// - Starts the global version at 1.

    pub fn with_config(config: StoreConfig) -> Self {
        let mut store = Self {
            entities: Entities::with_capacity(config.entity_reserve),
            config,
            archetypes: Vec::new(),
            archetype_index: HashMap::new(),
            shared: SharedComponentStore::new(),
            queries: QueryRegistry::new(),
            version: 1,
            changes: Vec::new(),
            scratch: RowSnapshot::default(),
        };
        // The empty type set always fits.
        if let Ok(layout) = ArchetypeLayout::compute(&Signature::default()) {
            store.index_archetype(layout, None);
        }
        store
    }

    /// Active configuration.
    #[inline]
    pub fn config(&self) -> &StoreConfig { &self.config }

    /// Current global version.
    #[inline]
    pub fn version(&self) -> Version { self.version }

    /// Advances the global version and returns the new value.
    ///
    /// Call once between logical passes; writes after the call are
    /// distinguishable from writes before it by change and order filters.
    pub fn advance_version(&mut self) -> Version {
        self.version = self.version.wrapping_add(1).max(1);
        self.version
    }

    /// Number of live entities, meta-chunk entities included.
    #[inline]
    pub fn entity_count(&self) -> usize { self.entities.len() }

    /// Returns `true` if `entity` is live.
    #[inline]
    pub fn is_alive(&self, entity: Entity) -> bool { self.entities.is_alive(entity) }

    /// Iterates over every live entity.
    pub fn entities(&self) -> impl Iterator<Item = Entity> + '_ {
        self.entities.iter().map(|(e, _)| e)
    }

    /// All archetypes, indexed by [`ArchetypeID`].
    #[inline]
    pub fn archetypes(&self) -> &[Archetype] { &self.archetypes }

    #[inline]
    /// Archetype `archetype`, if it exists.
    pub fn archetype(&self, archetype: ArchetypeID) -> Option<&Archetype> {
        self.archetypes.get(archetype as usize)
    }

    /// Interned shared values.
    #[inline]
    pub fn shared_values(&self) -> &SharedComponentStore { &self.shared }

    /// Drains the archetype change log.
    pub fn take_archetype_changes(&mut self) -> Vec<ArchetypeChange> {
        std::mem::take(&mut self.changes)
    }

    pub(crate) fn record_change(&mut self, entity: Entity, from: Option<ArchetypeID>, to: Option<ArchetypeID>) {
        self.changes.push(ArchetypeChange { entity, from, to });
    }

    /// Current location of `entity`.
    pub fn location(&self, entity: Entity) -> ECSResult<EntityLocation> {
        self.entities
            .get_location(entity)
            .ok_or_else(|| ReferentialError::StaleEntity(entity).into())
    }

    /// Archetype currently holding `entity`.
    pub fn archetype_of(&self, entity: Entity) -> ECSResult<ArchetypeID> {
        Ok(self.location(entity)?.archetype)
    }

    /// Live chunk `(archetype, chunk)`.
    pub fn chunk(&self, archetype: ArchetypeID, chunk: ChunkID) -> ECSResult<&Chunk> {
        self.archetypes
            .get(archetype as usize)
            .and_then(|a| a.chunk(chunk))
            .ok_or_else(|| ReferentialError::UnknownChunk { archetype, chunk }.into())
    }

    pub(crate) fn chunk_mut(&mut self, archetype: ArchetypeID, chunk: ChunkID) -> ECSResult<&mut Chunk> {
        self.archetypes
            .get_mut(archetype as usize)
            .and_then(|a| a.chunk_mut(chunk))
            .ok_or_else(|| ReferentialError::UnknownChunk { archetype, chunk }.into())
    }

    // ---------------------------------------------------------------------
    // Archetypes
    // ---------------------------------------------------------------------

    fn index_archetype(&mut self, layout: ArchetypeLayout, meta: Option<ArchetypeID>) -> ArchetypeID {
        let archetype_id = self.archetypes.len() as ArchetypeID;
        log::debug!(
            "created archetype {} with {} types, capacity {} ({} bytes per entity)",
            archetype_id, layout.slots.len(), layout.capacity, layout.per_entity_bytes
        );
        self.archetype_index.insert(layout.signature, archetype_id);
        let archetype = Archetype::new(archetype_id, layout, meta);
        self.queries.on_new_archetype(&archetype);
        self.archetypes.push(archetype);
        archetype_id
    }

    /// Returns the archetype for `signature`, creating it if needed.
    ///
    /// ## Errors
    /// - Layout errors (capacity, shared limit, category conflicts).
    /// - `Internal` once the archetype ID space is exhausted.

    pub fn archetype_for_signature(&mut self, signature: &Signature) -> ECSResult<ArchetypeID> {
        if let Some(&id) = self.archetype_index.get(signature) {
            return Ok(id);
        }
        let layout = ArchetypeLayout::compute(signature)?;
        for column in layout.columns.iter().filter(|c| c.desc.is_shared()) {
            self.shared.ensure_type(column.component_id)?;
        }

        let meta = if layout.has_chunk_components() {
            let mut meta_signature = Signature::default();
            for &component_id in &layout.chunk_level {
                meta_signature.set(entity_slot(component_id));
            }
            meta_signature.set(entity_slot(CHUNK_HEADER_ID));
            Some(self.archetype_for_signature(&meta_signature)?)
        } else {
            None
        };

        if self.archetypes.len() > ArchetypeID::MAX as usize {
            return Err(ECSError::Internal("archetype ID space exhausted".into()));
        }
        Ok(self.index_archetype(layout, meta))
    }

    /// Returns the archetype for a list of component types, creating it if needed.
    ///
    /// ## Errors
    /// - `EntityTypeAsComponent` if the entity-identity type is listed.
    /// - `ConflictingCategory` for `Exclude` modifiers.
    /// - Any layout error of the resulting type set.

    pub fn archetype_for_types(&mut self, types: &[ComponentType]) -> ECSResult<ArchetypeID> {
        let signature = signature_for_types(types)?;
        self.archetype_for_signature(&signature)
    }

    /// Layout the store would use for `types`, without creating an archetype.
    pub fn layout_for_types(&self, types: &[ComponentType]) -> ECSResult<ArchetypeLayout> {
        ArchetypeLayout::compute(&signature_for_types(types)?)
    }

    #[inline]
    pub(crate) fn is_meta_archetype(&self, archetype: ArchetypeID) -> bool {
        self.archetypes[archetype as usize].has(CHUNK_HEADER_ID)
    }

    // ---------------------------------------------------------------------
    // Row placement
    // ---------------------------------------------------------------------

    /// Allocates a chunk, giving it a meta entity when the archetype needs one.
    fn new_chunk(&mut self, archetype: ArchetypeID, shared_values: &[u32]) -> ECSResult<ChunkID> {
        let version = self.version;
        let chunk = self.archetypes[archetype as usize].create_chunk(shared_values, version);

        if let Some(meta_archetype) = self.archetypes[archetype as usize].meta_archetype() {
            let meta = self.spawn_in(meta_archetype, &[])?;
            let location = self.location(meta)?;
            let header = ChunkHeader { archetype, chunk };
            let chunk_ref = self.chunk_mut(location.archetype, location.chunk)?;
            if let Some(column) = chunk_ref.column_mut::<ChunkHeader>(CHUNK_HEADER_ID, version) {
                column[location.row as usize] = header;
            }
            self.chunk_mut(archetype, chunk)?.set_meta_entity(Some(meta));
            log::debug!("chunk {}:{} got meta entity {}", archetype, chunk, meta);
        }
        Ok(chunk)
    }

    /// Finds a chunk with room for one more entity, creating one if needed.
    fn chunk_with_space(&mut self, archetype: ArchetypeID, shared_values: &[u32]) -> ECSResult<ChunkID> {
        match self.archetypes[archetype as usize].find_chunk_with_space(shared_values) {
            Some(chunk) => Ok(chunk),
            None => self.new_chunk(archetype, shared_values),
        }
    }

    /// Creates one default-initialised entity in `archetype`.
    pub(crate) fn spawn_in(&mut self, archetype: ArchetypeID, shared_values: &[u32]) -> ECSResult<Entity> {
        let chunk = self.chunk_with_space(archetype, shared_values)?;
        let entity = self.entities.allocate(EntityLocation::default())?;
        let version = self.version;
        let row = self.archetypes[archetype as usize]
            .push_row(chunk, entity, version)
            .ok_or(ReferentialError::UnknownChunk { archetype, chunk })?;
        self.entities.set_location(entity, EntityLocation { archetype, chunk, row });
        Ok(entity)
    }

    /// Removes the row at `location`, fixing up the entity swapped into it and
    /// releasing the chunk if it became empty.
    pub(crate) fn release_row(&mut self, location: EntityLocation) -> ECSResult<()> {
        let version = self.version;
        let (moved, now_empty) = self.archetypes[location.archetype as usize]
            .swap_remove(location.chunk, location.row as usize, version)
            .ok_or(ReferentialError::UnknownChunk { archetype: location.archetype, chunk: location.chunk })?;

        if let Some(moved) = moved {
            self.entities.set_location(moved, location);
        }
        if now_empty {
            self.release_chunk(location.archetype, location.chunk)?;
        }
        Ok(())
    }

    fn release_chunk(&mut self, archetype: ArchetypeID, chunk: ChunkID) -> ECSResult<()> {
        let Some(released) = self.archetypes[archetype as usize].destroy_chunk(chunk) else {
            return Err(ReferentialError::UnknownChunk { archetype, chunk }.into());
        };
        if let Some(meta) = released.meta_entity() {
            self.free_entity(meta)?;
        }
        Ok(())
    }

    /// Removes `entity` from its chunk and frees its handle.
    pub(crate) fn free_entity(&mut self, entity: Entity) -> ECSResult<()> {
        let location = self.location(entity)?;
        self.release_row(location)?;
        self.entities.free(entity);
        log::trace!("freed entity {} from archetype {}", entity, location.archetype);
        Ok(())
    }

    /// Shared-value indices for `destination`, taken from the entity's current
    /// chunk where the type is retained, from `overrides` where given, and the
    /// default value otherwise.
    pub(crate) fn destination_shared_values(
        &self,
        source: &Chunk,
        destination: ArchetypeID,
        overrides: &[(ComponentID, u32)],
    ) -> Vec<u32> {
        let dst_layout = self.archetypes[destination as usize].layout();
        let src_layout = source.layout();
        dst_layout
            .shared
            .iter()
            .map(|&column| {
                let component_id = dst_layout.columns[column].component_id;
                if let Some(&(_, index)) = overrides.iter().find(|(id, _)| *id == component_id) {
                    return index;
                }
                src_layout
                    .shared_index(component_id)
                    .map_or(0, |i| source.shared_values()[i])
            })
            .collect()
    }

    /// Moves `entity` into `destination`, keeping every retained column value,
    /// enable bit and shared value.
    ///
    /// ## Behavior
    /// - `shared_overrides` replaces the listed shared values.
    /// - A move to the same archetype and shared values is a no-op.
    /// - Both archetypes' chunk-list versions advance when they differ.

    pub(crate) fn move_entity(
        &mut self,
        entity: Entity,
        destination: ArchetypeID,
        shared_overrides: &[(ComponentID, u32)],
    ) -> ECSResult<()> {
        let source = self.location(entity)?;
        let mut snapshot = std::mem::take(&mut self.scratch);
        let src_chunk = self.chunk(source.archetype, source.chunk)?;
        let shared_values = self.destination_shared_values(src_chunk, destination, shared_overrides);
        let unchanged = source.archetype == destination && src_chunk.shared_values() == shared_values.as_slice();
        if !unchanged {
            src_chunk.read_row(source.row as usize, &mut snapshot);
        }
        let src_layout = Arc::clone(src_chunk.layout());
        if unchanged {
            self.scratch = snapshot;
            return Ok(());
        }

        let chunk = self.chunk_with_space(destination, &shared_values)?;
        let version = self.version;
        let row = self.archetypes[destination as usize]
            .push_row(chunk, entity, version)
            .ok_or(ReferentialError::UnknownChunk { archetype: destination, chunk })?;
        self.chunk_mut(destination, chunk)?.write_row(row as usize, &snapshot, &src_layout);
        self.scratch = snapshot;

        self.entities.set_location(entity, EntityLocation { archetype: destination, chunk, row });
        self.release_row(source)?;

        if source.archetype != destination {
            self.archetypes[source.archetype as usize].bump_chunk_list_version();
            self.archetypes[destination as usize].bump_chunk_list_version();
            self.record_change(entity, Some(source.archetype), Some(destination));
        }
        log::trace!(
            "moved entity {} from {}:{} to {}:{}",
            entity, source.archetype, source.chunk, destination, chunk
        );
        Ok(())
    }

    /// Runs the consistency check when configured to.
    pub(crate) fn after_structural_change(&self) {
        if self.config.validate_structural_changes {
            if let Err(e) = self.check_internal_consistency() {
                log::error!("store consistency check failed: {}", e);
            }
        }
    }

    // ---------------------------------------------------------------------
    // Creation and destruction
    // ---------------------------------------------------------------------

    /// Creates one entity with the given component types, all default-initialised.
    pub fn create_entity(&mut self, types: &[ComponentType]) -> ECSResult<Entity> {
        let archetype = self.archetype_for_types(types)?;
        self.create_entity_in(archetype)
    }

    /// Creates `count` entities with the given component types.
    pub fn create_entities(&mut self, types: &[ComponentType], count: usize) -> ECSResult<Vec<Entity>> {
        let archetype = self.archetype_for_types(types)?;
        self.create_entities_in(archetype, count)
    }

    /// Creates one entity in an existing archetype.
    pub fn create_entity_in(&mut self, archetype: ArchetypeID) -> ECSResult<Entity> {
        let mut entities = self.create_entities_in(archetype, 1)?;
        entities.pop().ok_or_else(|| ECSError::Internal("no entity created".into()))
    }

    /// Creates `count` entities in an existing archetype.
    ///
    /// ## Behavior
    /// - Entities fill existing chunks with space first, then new chunks.
    /// - Shared components take their default value.
    /// - Every enable bit starts set.
    ///
    /// ## Errors
    /// - `MetaEntityMutation` for meta-chunk archetypes.

    pub fn create_entities_in(&mut self, archetype: ArchetypeID, count: usize) -> ECSResult<Vec<Entity>> {
        if archetype as usize >= self.archetypes.len() {
            return Err(ECSError::Internal(format!("unknown archetype {}", archetype)));
        }
        if self.is_meta_archetype(archetype) {
            return Err(ConfigurationError::MetaEntityMutation.into());
        }
        let shared_values = vec![0u32; self.archetypes[archetype as usize].layout().shared_count()];

        let mut created = Vec::with_capacity(count);
        for _ in 0..count {
            let entity = self.spawn_in(archetype, &shared_values)?;
            self.record_change(entity, None, Some(archetype));
            created.push(entity);
        }
        self.after_structural_change();
        Ok(created)
    }

    /// Destroys `entity`.
    ///
    /// ## Behavior
    /// - Entities with cleanup components move to an archetype holding only
    ///   those components plus `CleanupEntity`; the handle stays alive.
    /// - Entities already pending cleanup are left unchanged.
    /// - Otherwise the row is compacted away and the handle freed.
    ///
    /// ## Errors
    /// - `StaleEntity` for dead handles.
    /// - `MetaEntityMutation` for meta-chunk entities.

    pub fn destroy_entity(&mut self, entity: Entity) -> ECSResult<()> {
        self.check_destroyable(entity)?;
        self.destroy_unchecked(entity)?;
        self.after_structural_change();
        Ok(())
    }

    /// Destroys every entity in `entities`; all handles are validated first.
    pub fn destroy_entities(&mut self, entities: &[Entity]) -> ECSResult<()> {
        for &entity in entities {
            self.check_destroyable(entity)?;
        }
        for &entity in entities {
            // Duplicates in the list are skipped once the first copy is gone.
            if self.entities.is_alive(entity) {
                self.destroy_unchecked(entity)?;
            }
        }
        self.after_structural_change();
        Ok(())
    }

    fn check_destroyable(&self, entity: Entity) -> ECSResult<()> {
        let location = self.location(entity)?;
        if self.is_meta_archetype(location.archetype) {
            return Err(ConfigurationError::MetaEntityMutation.into());
        }
        Ok(())
    }

    fn destroy_unchecked(&mut self, entity: Entity) -> ECSResult<()> {
        let location = self.location(entity)?;
        let archetype = &self.archetypes[location.archetype as usize];

        if archetype.has(CLEANUP_ENTITY_ID) {
            return Ok(());
        }
        if archetype.layout().has_cleanup {
            let mut signature = Signature::default();
            for component_id in archetype.layout().cleanup_components() {
                signature.set(entity_slot(component_id));
            }
            signature.set(entity_slot(CLEANUP_ENTITY_ID));
            let destination = self.archetype_for_signature(&signature)?;
            return self.move_entity(entity, destination, &[]);
        }

        self.free_entity(entity)?;
        self.record_change(entity, Some(location.archetype), None);
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Component access
    // ---------------------------------------------------------------------

    /// Returns `true` if `entity` carries `T` as a per-entity component.
    pub fn has_component<T: 'static>(&self, entity: Entity) -> ECSResult<bool> {
        let component_id = component_id_of::<T>()?;
        let location = self.location(entity)?;
        Ok(self.archetypes[location.archetype as usize].has(component_id))
    }

    /// Reads `entity`'s value of `T`.
    ///
    /// ## Errors
    /// - `StaleEntity`, `UnregisteredComponent`, or `MissingComponent`.

    pub fn get_component<T: Component>(&self, entity: Entity) -> ECSResult<&T> {
        let component_id = component_id_of::<T>()?;
        let location = self.location(entity)?;
        self.chunk(location.archetype, location.chunk)?
            .column::<T>(component_id)
            .and_then(|column| column.get(location.row as usize))
            .ok_or_else(|| ReferentialError::MissingComponent { entity, component_id }.into())
    }

    /// Mutable access to `entity`'s value of `T`; marks the column changed.
    pub fn get_component_mut<T: Component>(&mut self, entity: Entity) -> ECSResult<&mut T> {
        let component_id = component_id_of::<T>()?;
        let location = self.location(entity)?;
        if self.is_meta_archetype(location.archetype) && component_id == CHUNK_HEADER_ID {
            return Err(ConfigurationError::MetaEntityMutation.into());
        }
        let version = self.version;
        self.chunk_mut(location.archetype, location.chunk)?
            .column_mut::<T>(component_id, version)
            .and_then(|column| column.get_mut(location.row as usize))
            .ok_or_else(|| ReferentialError::MissingComponent { entity, component_id }.into())
    }

    /// Overwrites `entity`'s value of `T`.
    pub fn set_component<T: Component>(&mut self, entity: Entity, value: T) -> ECSResult<()> {
        *self.get_component_mut::<T>(entity)? = value;
        Ok(())
    }

    /// Sets the enable bit of `T` on `entity`.
    ///
    /// Takes `&self`: only the owning chunk's bit state is locked.
    ///
    /// ## Errors
    /// - `MissingComponent` if the entity lacks `T`.
    /// - `WrongComponentKind` if `T` is not enableable.

    pub fn set_enabled<T: 'static>(&self, entity: Entity, enabled: bool) -> ECSResult<()> {
        let (location, index) = self.enableable_slot::<T>(entity)?;
        self.chunk(location.archetype, location.chunk)?
            .set_enabled(index, location.row as usize, enabled, self.version);
        Ok(())
    }

    /// Reads the enable bit of `T` on `entity`.
    pub fn is_enabled<T: 'static>(&self, entity: Entity) -> ECSResult<bool> {
        let (location, index) = self.enableable_slot::<T>(entity)?;
        Ok(self.chunk(location.archetype, location.chunk)?.is_enabled(index, location.row as usize))
    }

    fn enableable_slot<T: 'static>(&self, entity: Entity) -> ECSResult<(EntityLocation, usize)> {
        let component_id = component_id_of::<T>()?;
        let location = self.location(entity)?;
        let layout = self.archetypes[location.archetype as usize].layout();
        let column = layout
            .column(component_id)
            .ok_or(ReferentialError::MissingComponent { entity, component_id })?;
        let index = column.enableable_index.ok_or(ConfigurationError::WrongComponentKind {
            component_id,
            expected: "enableable",
        })?;
        Ok((location, index))
    }

    /// Reads `entity`'s shared value of `T`.
    pub fn get_shared_component<T: SharedComponent>(&self, entity: Entity) -> ECSResult<&T> {
        let component_id = component_id_of::<T>()?;
        let location = self.location(entity)?;
        let chunk = self.chunk(location.archetype, location.chunk)?;
        let missing = ReferentialError::MissingComponent { entity, component_id };
        let index = chunk.layout().shared_index(component_id).ok_or(missing)?;
        self.shared
            .get::<T>(component_id, chunk.shared_values()[index])
            .ok_or_else(|| missing.into())
    }

    /// Elements of `entity`'s buffer of `T`.
    pub fn buffer<T: Component>(&self, entity: Entity) -> ECSResult<&[T]> {
        let component_id = component_id_of::<T>()?;
        let location = self.location(entity)?;
        self.chunk(location.archetype, location.chunk)?
            .buffer::<T>(component_id, location.row as usize)
            .ok_or_else(|| ReferentialError::MissingComponent { entity, component_id }.into())
    }

    /// Appends to `entity`'s buffer of `T`.
    ///
    /// ## Errors
    /// - `BufferOverflow` once the inline capacity is full.

    pub fn push_buffer_element<T: Component>(&mut self, entity: Entity, value: T) -> ECSResult<()> {
        let component_id = component_id_of::<T>()?;
        let location = self.location(entity)?;
        let version = self.version;
        let pushed = self
            .chunk_mut(location.archetype, location.chunk)?
            .push_buffer::<T>(component_id, location.row as usize, value, version)?;
        if !pushed {
            return Err(ReferentialError::MissingComponent { entity, component_id }.into());
        }
        Ok(())
    }

    /// Empties `entity`'s buffer of `T`.
    pub fn clear_buffer<T: Component>(&mut self, entity: Entity) -> ECSResult<()> {
        let component_id = component_id_of::<T>()?;
        let location = self.location(entity)?;
        let version = self.version;
        if !self
            .chunk_mut(location.archetype, location.chunk)?
            .clear_buffer::<T>(component_id, location.row as usize, version)
        {
            return Err(ReferentialError::MissingComponent { entity, component_id }.into());
        }
        Ok(())
    }

    /// Raw bytes of `entity`'s slot for a component; used by tests and tools
    /// that work with registered IDs instead of Rust types.
    ///
    /// ## Errors
    /// - `MetaEntityMutation` for the chunk header of a meta entity.
    pub fn component_bytes_mut(
        &mut self,
        entity: Entity,
        component_id: ComponentID,
    ) -> ECSResult<&mut [u8]> {
        let location = self.location(entity)?;
        if self.is_meta_archetype(location.archetype) && component_id == CHUNK_HEADER_ID {
            return Err(ConfigurationError::MetaEntityMutation.into());
        }
        let version = self.version;
        self.chunk_mut(location.archetype, location.chunk)?
            .slot_mut(component_id, location.row as usize, version)
            .ok_or_else(|| ReferentialError::MissingComponent { entity, component_id }.into())
    }
}

/// Builds an archetype signature from component types.
pub(crate) fn signature_for_types(types: &[ComponentType]) -> ECSResult<Signature> {
    let mut signature = Signature::default();
    for ty in types {
        if ty.component_id == ENTITY_COMPONENT_ID {
            return Err(ConfigurationError::EntityTypeAsComponent.into());
        }
        if ty.modifier == TypeModifier::Exclude {
            return Err(ConfigurationError::ConflictingCategory { component_id: ty.component_id }.into());
        }
        signature.set(ty.slot());
    }
    Ok(signature)
}

static_assertions::const_assert_eq!(ENTITY_SIZE, std::mem::size_of::<Entity>());
