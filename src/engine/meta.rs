//! # Chunk-level components
//!
//! A chunk-level component stores one value per chunk instead of one per
//! entity. Each chunk of an archetype with chunk-level types is paired with a
//! *meta entity*: an ordinary entity in the archetype's meta archetype, which
//! holds the chunk-level types as regular columns plus a [`ChunkHeader`]
//! pointing back at the chunk.
//!
//! ## Lifecycle
//! - A chunk created in such an archetype gets its default-valued meta entity
//!   before any regular entity is placed in it.
//! - Releasing the chunk (its last entity left) destroys the meta entity.
//! - Adding a chunk-level type to an entity moves it to an archetype whose
//!   chunks have meta entities; removing the last chunk-level type moves it
//!   back, and the emptied chunk takes its meta entity with it.
//!
//! Meta entities cannot be destroyed or restructured directly, and queries
//! only see them when they name `ChunkHeader`.

use crate::engine::component::{CHUNK_HEADER_ID, ChunkHeader, Component, component_id_of};
use crate::engine::entity::Entity;
use crate::engine::error::{ECSResult, ReferentialError};
use crate::engine::store::EntityStore;
use crate::engine::types::{ArchetypeID, ChunkID, ComponentType};


impl EntityStore {

    /// Adds chunk-level component `T` to `entity`'s type set.
    pub fn add_chunk_component<T: Component>(&mut self, entity: Entity) -> ECSResult<()> {
        self.add_component(entity, ComponentType::chunk::<T>()?)
    }

    /// Removes chunk-level component `T` from `entity`'s type set.
    pub fn remove_chunk_component<T: Component>(&mut self, entity: Entity) -> ECSResult<()> {
        self.remove_component(entity, ComponentType::chunk::<T>()?)
    }

    /// Meta entity of the chunk holding `entity`, if that chunk has one.
    pub fn meta_entity_of(&self, entity: Entity) -> ECSResult<Option<Entity>> {
        let location = self.location(entity)?;
        Ok(self.chunk(location.archetype, location.chunk)?.meta_entity())
    }

    /// Meta entity of chunk `(archetype, chunk)`, if it has one.
    pub fn meta_entity_of_chunk(&self, archetype: ArchetypeID, chunk: ChunkID) -> ECSResult<Option<Entity>> {
        Ok(self.chunk(archetype, chunk)?.meta_entity())
    }

    /// Back-reference stored on a meta entity.
    pub fn chunk_header(&self, meta: Entity) -> ECSResult<ChunkHeader> {
        self.get_component::<ChunkHeader>(meta).copied()
    }

    fn require_meta<T: 'static>(&self, entity: Entity, archetype: ArchetypeID, chunk: ChunkID) -> ECSResult<Entity> {
        let component_id = component_id_of::<T>()?;
        self.chunk(archetype, chunk)?
            .meta_entity()
            .ok_or_else(|| ReferentialError::MissingComponent { entity, component_id }.into())
    }

    /// Reads the chunk-level value of `T` for the chunk holding `entity`.
    ///
    /// ## Errors
    /// - `MissingComponent` if the chunk has no chunk-level `T`.

    pub fn get_chunk_component<T: Component>(&self, entity: Entity) -> ECSResult<&T> {
        let location = self.location(entity)?;
        let meta = self.require_meta::<T>(entity, location.archetype, location.chunk)?;
        self.get_component::<T>(meta)
    }

    /// Overwrites the chunk-level value of `T` for the chunk holding `entity`.
    pub fn set_chunk_component<T: Component>(&mut self, entity: Entity, value: T) -> ECSResult<()> {
        let location = self.location(entity)?;
        let meta = self.require_meta::<T>(entity, location.archetype, location.chunk)?;
        self.set_component(meta, value)
    }

    /// Reads the chunk-level value of `T` for chunk `(archetype, chunk)`.
    pub fn get_chunk_component_of_chunk<T: Component>(&self, archetype: ArchetypeID, chunk: ChunkID) -> ECSResult<&T> {
        let meta = self.require_meta::<T>(Entity::NULL, archetype, chunk)?;
        self.get_component::<T>(meta)
    }

    /// Overwrites the chunk-level value of `T` for chunk `(archetype, chunk)`.
    pub fn set_chunk_component_of_chunk<T: Component>(
        &mut self,
        archetype: ArchetypeID,
        chunk: ChunkID,
        value: T,
    ) -> ECSResult<()> {
        let meta = self.require_meta::<T>(Entity::NULL, archetype, chunk)?;
        self.set_component(meta, value)
    }

    /// Number of live meta entities.
    pub fn meta_entity_count(&self) -> usize {
        self.archetypes
            .iter()
            .filter(|a| a.has(CHUNK_HEADER_ID))
            .map(|a| a.entity_count())
            .sum()
    }
}
