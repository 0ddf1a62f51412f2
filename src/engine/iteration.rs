//! # Query execution
//!
//! Store-side query API: registration, filters, cache control, and chunk-wise
//! iteration with enable-bit batching.
//!
//! ## Pipeline
//! ```text
//! cached chunk list ──► per-chunk filters ──► enable-bit batches ──► callback
//! ```
//!
//! Callbacks receive a [`ChunkView`] (shared) or [`ChunkViewMut`] (exclusive)
//! holding the chunk and its batches. Rows outside every batch belong to
//! entities whose enable bits exclude them and must be skipped by the caller;
//! [`ChunkView::rows`] does that.
//!
//! ## Parallelism
//! With the `parallel` feature, [`EntityStore::par_for_each_chunk`] hands
//! chunks to rayon. Views are read-only, so any number of them may coexist.

#[cfg(feature = "parallel")]
use rayon::prelude::*;

use crate::engine::batch::{Batch, chunk_batches};
use crate::engine::chunk::Chunk;
use crate::engine::component::{Component, SharedComponent, component_id_of};
use crate::engine::entity::Entity;
use crate::engine::error::{ECSResult, ReferentialError};
use crate::engine::query::{ChunkRef, EntityQueryDesc, MatchedArchetype, QueryFilter, QueryId, QueryState};
use crate::engine::store::EntityStore;
use crate::engine::types::{ArchetypeID, ChunkID, ComponentID, ComponentType, Version};


/// One selected run of rows, addressed by chunk.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ChunkBatch {
    /// Archetype of the chunk.
    pub archetype: ArchetypeID,
    /// Chunk slot.
    pub chunk: ChunkID,
    /// First selected row.
    pub start: usize,
    /// Number of selected rows.
    pub len: usize,
}

fn batches_for(chunk: &Chunk, matched: &MatchedArchetype) -> Vec<Batch> {
    let bits = chunk.enable_bits();
    let enabled: Vec<&[u64]> = matched.enabled_required.iter().map(|&i| bits.words(i)).collect();
    let disabled: Vec<&[u64]> = matched.disabled_required.iter().map(|&i| bits.words(i)).collect();
    chunk_batches(&enabled, &disabled, chunk.count())
}

fn missing(component_id: ComponentID) -> ReferentialError {
    ReferentialError::MissingComponent { entity: Entity::NULL, component_id }
}

fn check_row(chunk: &Chunk, row: usize) -> ECSResult<()> {
    if row >= chunk.count() {
        return Err(ReferentialError::RowOutOfRange {
            archetype: chunk.archetype(),
            chunk: chunk.id(),
            row,
            count: chunk.count(),
        }
        .into());
    }
    Ok(())
}

/// Read-only view of one chunk selected by a query.
pub struct ChunkView<'a> {
    store: &'a EntityStore,
    chunk: &'a Chunk,
    batches: Vec<Batch>,
}

impl<'a> ChunkView<'a> {
    /// Archetype of the chunk.
    #[inline] pub fn archetype(&self) -> ArchetypeID { self.chunk.archetype() }
    /// Chunk slot.
    #[inline] pub fn chunk_id(&self) -> ChunkID { self.chunk.id() }
    /// Live entities in the chunk, selected or not.
    #[inline] pub fn count(&self) -> usize { self.chunk.count() }
    /// Underlying chunk.
    #[inline] pub fn chunk(&self) -> &'a Chunk { self.chunk }
    /// Selected row runs.
    #[inline] pub fn batches(&self) -> &[Batch] { &self.batches }
    /// Entity column over every live row.
    #[inline] pub fn entities(&self) -> &'a [Entity] { self.chunk.entities() }
    /// Order version of the chunk.
    #[inline] pub fn order_version(&self) -> Version { self.chunk.order_version() }

    /// Selected rows, batch by batch.
    pub fn rows(&self) -> impl Iterator<Item = usize> + '_ {
        self.batches.iter().flat_map(Batch::range)
    }

    /// Typed column of `T` over every live row.
    pub fn column<T: Component>(&self) -> ECSResult<&'a [T]> {
        let component_id = component_id_of::<T>()?;
        self.chunk.column::<T>(component_id).ok_or_else(|| missing(component_id).into())
    }

    /// Returns `true` if the chunk stores `T` per entity.
    pub fn has<T: 'static>(&self) -> bool {
        component_id_of::<T>().is_ok_and(|id| self.chunk.layout().column_index(id).is_some())
    }

    /// Change version of `T`'s column.
    pub fn change_version<T: 'static>(&self) -> ECSResult<Version> {
        let component_id = component_id_of::<T>()?;
        self.chunk.change_version_of(component_id).ok_or_else(|| missing(component_id).into())
    }

    /// Returns `true` if `T`'s column changed at or after `version`.
    pub fn did_change<T: 'static>(&self, version: Version) -> ECSResult<bool> {
        Ok(self.change_version::<T>()? >= version)
    }

    /// Enable bit of `T` at `row`; `RowOutOfRange` past the live rows.
    pub fn is_enabled<T: 'static>(&self, row: usize) -> ECSResult<bool> {
        check_row(self.chunk, row)?;
        let component_id = component_id_of::<T>()?;
        let index = self.chunk.layout().enableable_index(component_id).ok_or_else(|| missing(component_id))?;
        Ok(self.chunk.is_enabled(index, row))
    }

    /// Shared value of `T` for this chunk.
    pub fn shared<T: SharedComponent>(&self) -> ECSResult<&'a T> {
        let component_id = component_id_of::<T>()?;
        let index = self.chunk.layout().shared_index(component_id).ok_or_else(|| missing(component_id))?;
        self.store
            .shared_values()
            .get::<T>(component_id, self.chunk.shared_values()[index])
            .ok_or_else(|| missing(component_id).into())
    }

    /// Chunk-level value of `T` for this chunk.
    pub fn chunk_component<T: Component>(&self) -> ECSResult<&'a T> {
        self.store.get_chunk_component_of_chunk::<T>(self.chunk.archetype(), self.chunk.id())
    }
}

/// Exclusive view of one chunk selected by a query.
pub struct ChunkViewMut<'a> {
    chunk: &'a mut Chunk,
    version: Version,
    batches: Vec<Batch>,
}

impl<'a> ChunkViewMut<'a> {
    /// Archetype of the chunk.
    #[inline] pub fn archetype(&self) -> ArchetypeID { self.chunk.archetype() }
    /// Chunk slot.
    #[inline] pub fn chunk_id(&self) -> ChunkID { self.chunk.id() }
    /// Live entities in the chunk, selected or not.
    #[inline] pub fn count(&self) -> usize { self.chunk.count() }
    /// Selected row runs.
    #[inline] pub fn batches(&self) -> &[Batch] { &self.batches }
    /// Entity column over every live row.
    #[inline] pub fn entities(&self) -> &[Entity] { self.chunk.entities() }

    /// Selected rows, batch by batch.
    pub fn rows(&self) -> Vec<usize> {
        self.batches.iter().flat_map(Batch::range).collect()
    }

    /// Typed column of `T` over every live row.
    pub fn column<T: Component>(&self) -> ECSResult<&[T]> {
        let component_id = component_id_of::<T>()?;
        self.chunk.column::<T>(component_id).ok_or_else(|| missing(component_id).into())
    }

    /// Mutable column of `T`; raises its change version to the store version.
    pub fn column_mut<T: Component>(&mut self) -> ECSResult<&mut [T]> {
        let component_id = component_id_of::<T>()?;
        self.chunk
            .column_mut::<T>(component_id, self.version)
            .ok_or_else(|| missing(component_id).into())
    }

    /// Sets the enable bit of `T` at `row`; returns `true` if it changed.
    ///
    /// ## Errors
    /// - `RowOutOfRange` if `row` is not a live row of this chunk.
    /// - `MissingComponent` if `T` is not enableable here.

    pub fn set_enabled<T: 'static>(&self, row: usize, enabled: bool) -> ECSResult<bool> {
        check_row(self.chunk, row)?;
        let component_id = component_id_of::<T>()?;
        let index = self.chunk.layout().enableable_index(component_id).ok_or_else(|| missing(component_id))?;
        Ok(self.chunk.set_enabled(index, row, enabled, self.version))
    }
}

impl EntityStore {

    // ---------------------------------------------------------------------
    // Registration
    // ---------------------------------------------------------------------

    /// Registers a query made of one or more clauses.
    ///
    /// ## Errors
    /// - `EmptyQuery` for an empty clause list.
    /// - Clause validation errors (see [`crate::engine::query::ArchetypeQuery::compile`]).

    pub fn create_query(&mut self, descs: &[EntityQueryDesc]) -> ECSResult<QueryId> {
        let state = QueryState::new(descs, &self.archetypes)?;
        Ok(self.queries.insert(state))
    }

    /// Releases a query; its handle becomes invalid.
    pub fn release_query(&mut self, query: QueryId) -> ECSResult<()> {
        self.queries.release(query)
    }

    /// Clauses of `query` in normalized form.
    pub fn query_desc(&self, query: QueryId) -> ECSResult<Vec<EntityQueryDesc>> {
        Ok(self.queries.get(query)?.descs())
    }

    /// Replaces the clauses of `query`, keeping its filter.
    pub fn set_query_desc(&mut self, query: QueryId, descs: &[EntityQueryDesc]) -> ECSResult<()> {
        let archetypes = &self.archetypes;
        self.queries.get_mut(query)?.set_descs(descs, archetypes)
    }

    /// Archetypes currently matched by `query`, in match order.
    pub fn matching_archetypes(&self, query: QueryId) -> ECSResult<Vec<ArchetypeID>> {
        Ok(self.queries.get(query)?.matched().iter().map(|m| m.archetype).collect())
    }

    // ---------------------------------------------------------------------
    // Filters
    // ---------------------------------------------------------------------

    /// Restricts `query` to chunks whose shared value of `T` equals `value`.
    pub fn set_shared_filter<T: SharedComponent>(&mut self, query: QueryId, value: T) -> ECSResult<()> {
        self.queries.get(query)?;
        let component_id = component_id_of::<T>()?;
        let index = self.shared.intern(component_id, value)?;
        let filter = self.queries.get_mut(query)?.filter_mut();
        filter.shared.retain(|(id, _)| *id != component_id);
        filter.shared.push((component_id, index));
        Ok(())
    }

    /// Restricts `query` to chunks where any listed column changed at or after `version`.
    pub fn set_change_filter(&mut self, query: QueryId, types: &[ComponentType], version: Version) -> ECSResult<()> {
        let filter = self.queries.get_mut(query)?.filter_mut();
        filter.changed = types.iter().map(|t| t.component_id).collect();
        filter.change_version = version;
        Ok(())
    }

    /// Restricts `query` to chunks whose order version is at least `version`.
    pub fn set_order_filter(&mut self, query: QueryId, version: Version) -> ECSResult<()> {
        self.queries.get_mut(query)?.filter_mut().order_version = Some(version);
        Ok(())
    }

    /// Removes every filter from `query`.
    pub fn reset_filter(&mut self, query: QueryId) -> ECSResult<()> {
        *self.queries.get_mut(query)?.filter_mut() = QueryFilter::default();
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Cache control
    // ---------------------------------------------------------------------

    /// Returns `true` if `query`'s cached chunk list is current.
    pub fn is_query_cache_valid(&self, query: QueryId) -> ECSResult<bool> {
        Ok(self.queries.get(query)?.is_cache_valid(&self.archetypes))
    }

    /// Rebuilds `query`'s cached chunk list if it is stale.
    pub fn update_query_cache(&self, query: QueryId) -> ECSResult<()> {
        let state = self.queries.get(query)?;
        if !state.is_cache_valid(&self.archetypes) {
            state.rebuild_cache(&self.archetypes);
        }
        Ok(())
    }

    /// Cached chunk list of `query` before filters, rebuilding if stale.
    pub fn cached_chunks(&self, query: QueryId) -> ECSResult<Vec<ChunkRef>> {
        Ok(self.queries.get(query)?.cached_chunks(&self.archetypes))
    }

    /// Fresh scan of `query`'s matching chunks, bypassing the cache.
    pub fn uncached_chunks(&self, query: QueryId) -> ECSResult<Vec<ChunkRef>> {
        Ok(self.queries.get(query)?.scan_chunks(&self.archetypes))
    }

    // ---------------------------------------------------------------------
    // Execution
    // ---------------------------------------------------------------------

    fn selected(&self, query: QueryId) -> ECSResult<Vec<(ChunkRef, Vec<Batch>)>> {
        let state = self.queries.get(query)?;
        let filter = state.filter();
        let mut out = Vec::new();
        for chunk_ref in state.cached_chunks(&self.archetypes) {
            let chunk = self.chunk(chunk_ref.archetype, chunk_ref.chunk)?;
            if !filter.accepts(chunk) {
                continue;
            }
            let batches = batches_for(chunk, &state.matched()[chunk_ref.matched]);
            if !batches.is_empty() {
                out.push((chunk_ref, batches));
            }
        }
        Ok(out)
    }

    /// Chunks `query` selects after filters, skipping chunks with no selected rows.
    pub fn query_chunks(&self, query: QueryId) -> ECSResult<Vec<ChunkRef>> {
        Ok(self.selected(query)?.into_iter().map(|(r, _)| r).collect())
    }

    /// Every batch `query` selects, in chunk order.
    pub fn query_batches(&self, query: QueryId) -> ECSResult<Vec<ChunkBatch>> {
        let mut out = Vec::new();
        for (chunk_ref, batches) in self.selected(query)? {
            out.extend(batches.into_iter().map(|b| ChunkBatch {
                archetype: chunk_ref.archetype,
                chunk: chunk_ref.chunk,
                start: b.start,
                len: b.len,
            }));
        }
        Ok(out)
    }

    /// Every entity `query` selects, in chunk then row order.
    pub fn query_entities(&self, query: QueryId) -> ECSResult<Vec<Entity>> {
        let mut out = Vec::new();
        for (chunk_ref, batches) in self.selected(query)? {
            let entities = self.chunk(chunk_ref.archetype, chunk_ref.chunk)?.entities();
            for batch in batches {
                out.extend_from_slice(&entities[batch.range()]);
            }
        }
        Ok(out)
    }

    /// Number of entities `query` selects.
    pub fn calculate_entity_count(&self, query: QueryId) -> ECSResult<usize> {
        Ok(self
            .selected(query)?
            .iter()
            .flat_map(|(_, batches)| batches.iter().map(|b| b.len))
            .sum())
    }

    /// Number of chunks `query` selects.
    pub fn calculate_chunk_count(&self, query: QueryId) -> ECSResult<usize> {
        Ok(self.selected(query)?.len())
    }

    /// Calls `f` once per selected chunk.
    pub fn for_each_chunk<F>(&self, query: QueryId, mut f: F) -> ECSResult<()>
    where
        F: FnMut(ChunkView<'_>),
    {
        for (chunk_ref, batches) in self.selected(query)? {
            let chunk = self.chunk(chunk_ref.archetype, chunk_ref.chunk)?;
            f(ChunkView { store: self, chunk, batches });
        }
        Ok(())
    }

    /// Calls `f` once per selected chunk with exclusive access.
    pub fn for_each_chunk_mut<F>(&mut self, query: QueryId, mut f: F) -> ECSResult<()>
    where
        F: FnMut(ChunkViewMut<'_>),
    {
        let version = self.version();
        for (chunk_ref, batches) in self.selected(query)? {
            let chunk = self.chunk_mut(chunk_ref.archetype, chunk_ref.chunk)?;
            f(ChunkViewMut { chunk, version, batches });
        }
        Ok(())
    }

    /// Calls `f` once per selected chunk, in parallel.
    #[cfg(feature = "parallel")]
    pub fn par_for_each_chunk<F>(&self, query: QueryId, f: F) -> ECSResult<()>
    where
        F: Fn(ChunkView<'_>) + Send + Sync,
    {
        self.selected(query)?
            .into_par_iter()
            .try_for_each(|(chunk_ref, batches)| {
                let chunk = self.chunk(chunk_ref.archetype, chunk_ref.chunk)?;
                f(ChunkView { store: self, chunk, batches });
                Ok(())
            })
    }

    /// Sets the enable bit of `T` on every entity `query` selects.
    ///
    /// Returns the number of bits that actually changed.

    pub fn set_enabled_for_query<T: 'static>(&self, query: QueryId, enabled: bool) -> ECSResult<usize> {
        let component_id = component_id_of::<T>()?;
        let version = self.version();
        let mut changed = 0;
        for (chunk_ref, batches) in self.selected(query)? {
            let chunk = self.chunk(chunk_ref.archetype, chunk_ref.chunk)?;
            let index = chunk
                .layout()
                .enableable_index(component_id)
                .ok_or_else(|| missing(component_id))?;
            for row in batches.iter().flat_map(Batch::range) {
                changed += usize::from(chunk.set_enabled(index, row, enabled, version));
            }
        }
        Ok(changed)
    }
}
