//! Adding and removing component types.
//!
//! Every operation here follows the same two-phase shape:
//!
//! 1. **Resolve.** Validate every handle and compute every destination
//!    archetype. Layout errors (capacity, shared-type limit, category
//!    conflicts) surface here, before any entity has moved.
//! 2. **Apply.** Move entities one by one with [`EntityStore::move_entity`],
//!    which preserves retained columns, enable bits and shared values.
//!
//! Removing the last cleanup component of an entity pending cleanup frees it.

use std::collections::HashMap;

use crate::engine::component::{
    CHUNK_HEADER_ID, CLEANUP_ENTITY_ID, Component, ComponentKind, SharedComponent, component_id_of,
    require_description,
};
use crate::engine::entity::Entity;
use crate::engine::error::{ConfigurationError, ECSResult, ReferentialError};
use crate::engine::query::QueryId;
use crate::engine::store::{EntityStore, signature_for_types};
use crate::engine::types::{ArchetypeID, ComponentType, Signature, entity_slot};


/// Direction of a structural change.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Change {
    Add,
    Remove,
}

impl EntityStore {

    fn check_mutable(&self, entity: Entity) -> ECSResult<ArchetypeID> {
        let archetype = self.archetype_of(entity)?;
        if self.is_meta_archetype(archetype) {
            return Err(ConfigurationError::MetaEntityMutation.into());
        }
        Ok(archetype)
    }

    fn change_signature(types: &[ComponentType]) -> ECSResult<Signature> {
        if types.iter().any(|t| t.component_id == CHUNK_HEADER_ID) {
            return Err(ConfigurationError::MetaEntityMutation.into());
        }
        signature_for_types(types)
    }

    fn destination(&mut self, source: ArchetypeID, delta: &Signature, change: Change) -> ECSResult<ArchetypeID> {
        let current = *self.archetypes[source as usize].signature();
        let target = match change {
            Change::Add => current.union(delta),
            Change::Remove => current.difference(delta),
        };
        if target == current {
            return Ok(source);
        }
        self.archetype_for_signature(&target).map_err(|e| {
            log::warn!("rejected structural change on archetype {}: {}", source, e);
            e
        })
    }

    /// Resolves one destination per distinct source archetype of `entities`.
    fn resolve_destinations(
        &mut self,
        entities: &[Entity],
        delta: &Signature,
        change: Change,
    ) -> ECSResult<HashMap<ArchetypeID, ArchetypeID>> {
        let mut destinations = HashMap::new();
        for &entity in entities {
            let source = self.check_mutable(entity)?;
            if let std::collections::hash_map::Entry::Vacant(slot) = destinations.entry(source) {
                slot.insert(self.destination(source, delta, change)?);
            }
        }
        Ok(destinations)
    }

    fn apply(&mut self, entities: &[Entity], destinations: &HashMap<ArchetypeID, ArchetypeID>) -> ECSResult<()> {
        for &entity in entities {
            // Duplicate handles already moved resolve through their new location.
            let source = self.archetype_of(entity)?;
            let Some(&destination) = destinations.get(&source) else { continue };
            if destination == source {
                continue;
            }
            if self.is_released_cleanup(destination) {
                self.free_entity(entity)?;
                self.record_change(entity, Some(source), None);
            } else {
                self.move_entity(entity, destination, &[])?;
            }
        }
        self.after_structural_change();
        Ok(())
    }

    /// Returns `true` if `archetype` holds pending-cleanup entities with no
    /// cleanup component left.
    fn is_released_cleanup(&self, archetype: ArchetypeID) -> bool {
        let archetype = &self.archetypes[archetype as usize];
        archetype.has(CLEANUP_ENTITY_ID) && !archetype.layout().has_cleanup
    }

    fn change_entities(&mut self, entities: &[Entity], types: &[ComponentType], change: Change) -> ECSResult<()> {
        let delta = Self::change_signature(types)?;
        let destinations = self.resolve_destinations(entities, &delta, change)?;
        self.apply(entities, &destinations)
    }

    /// Adds one component type to `entity`, default-initialised.
    ///
    /// ## Errors
    /// - `Capacity` if the resulting archetype cannot hold one entity.
    /// - `TooManySharedComponents`, `ConflictingCategory`, `EntityTypeAsComponent`.
    /// - `StaleEntity`, `MetaEntityMutation`.

    pub fn add_component(&mut self, entity: Entity, ty: ComponentType) -> ECSResult<()> {
        self.change_entities(&[entity], &[ty], Change::Add)
    }

    /// Adds several component types to `entity` in one move.
    pub fn add_components(&mut self, entity: Entity, types: &[ComponentType]) -> ECSResult<()> {
        self.change_entities(&[entity], types, Change::Add)
    }

    /// Adds `ty` to every entity in `entities`; nothing moves unless all succeed to resolve.
    pub fn add_component_to_entities(&mut self, entities: &[Entity], ty: ComponentType) -> ECSResult<()> {
        self.change_entities(entities, &[ty], Change::Add)
    }

    /// Adds several component types to every entity in `entities`.
    pub fn add_components_to_entities(&mut self, entities: &[Entity], types: &[ComponentType]) -> ECSResult<()> {
        self.change_entities(entities, types, Change::Add)
    }

    /// Adds `ty` to every entity `query` currently selects.
    pub fn add_component_to_query(&mut self, query: QueryId, ty: ComponentType) -> ECSResult<()> {
        let entities = self.query_entities(query)?;
        self.change_entities(&entities, &[ty], Change::Add)
    }

    /// Adds `T` with an initial value.
    ///
    /// ## Errors
    /// - `WrongComponentKind` if `T` is not stored as a per-entity value;
    ///   the entity does not move.
    /// - Everything [`EntityStore::add_component`] reports.

    pub fn add_component_with<T: Component>(&mut self, entity: Entity, value: T) -> ECSResult<()> {
        let desc = require_description(component_id_of::<T>()?)?;
        if !matches!(desc.kind, ComponentKind::Value | ComponentKind::Tag | ComponentKind::Cleanup) {
            return Err(ConfigurationError::WrongComponentKind {
                component_id: desc.component_id,
                expected: ComponentKind::Value.name(),
            }
            .into());
        }
        self.add_component(entity, ComponentType::of::<T>()?)?;
        self.set_component(entity, value)
    }

    /// Removes one component type from `entity`; absent types are ignored.
    pub fn remove_component(&mut self, entity: Entity, ty: ComponentType) -> ECSResult<()> {
        self.change_entities(&[entity], &[ty], Change::Remove)
    }

    /// Removes several component types from `entity` in one move.
    pub fn remove_components(&mut self, entity: Entity, types: &[ComponentType]) -> ECSResult<()> {
        self.change_entities(&[entity], types, Change::Remove)
    }

    /// Removes `ty` from every entity in `entities`.
    pub fn remove_component_from_entities(&mut self, entities: &[Entity], ty: ComponentType) -> ECSResult<()> {
        self.change_entities(entities, &[ty], Change::Remove)
    }

    /// Removes several component types from every entity in `entities`.
    pub fn remove_components_from_entities(&mut self, entities: &[Entity], types: &[ComponentType]) -> ECSResult<()> {
        self.change_entities(entities, types, Change::Remove)
    }

    /// Removes `ty` from every entity `query` currently selects.
    pub fn remove_component_from_query(&mut self, query: QueryId, ty: ComponentType) -> ECSResult<()> {
        let entities = self.query_entities(query)?;
        self.change_entities(&entities, &[ty], Change::Remove)
    }

    /// Destroys every entity `query` currently selects.
    pub fn destroy_query(&mut self, query: QueryId) -> ECSResult<()> {
        let entities = self.query_entities(query)?;
        self.destroy_entities(&entities)
    }

    /// Adds shared component `T` with `value`, or changes it if present.
    ///
    /// ## Behavior
    /// The entity moves to a chunk whose shared values match, within the same
    /// archetype when `T` was already present.

    pub fn add_shared_component<T: SharedComponent>(&mut self, entity: Entity, value: T) -> ECSResult<()> {
        let component_id = component_id_of::<T>()?;
        let source = self.check_mutable(entity)?;
        let mut delta = Signature::default();
        delta.set(entity_slot(component_id));
        let destination = self.destination(source, &delta, Change::Add)?;
        let index = self.shared.intern(component_id, value)?;
        self.move_entity(entity, destination, &[(component_id, index)])?;
        self.after_structural_change();
        Ok(())
    }

    /// Changes the value of shared component `T` on `entity`.
    ///
    /// ## Errors
    /// - `MissingComponent` if the entity does not carry `T`.

    pub fn set_shared_component<T: SharedComponent>(&mut self, entity: Entity, value: T) -> ECSResult<()> {
        let component_id = component_id_of::<T>()?;
        let source = self.check_mutable(entity)?;
        if !self.archetypes[source as usize].has(component_id) {
            return Err(ReferentialError::MissingComponent { entity, component_id }.into());
        }
        let index = self.shared.intern(component_id, value)?;
        self.move_entity(entity, source, &[(component_id, index)])?;
        self.after_structural_change();
        Ok(())
    }
}
