//! # Archetypes
//!
//! An [`Archetype`] groups every entity with one exact type set and owns the
//! chunks that hold them.
//!
//! ## Chunk slots
//!
//! Chunks live in stable slots: a [`ChunkID`] names the same chunk for its
//! whole lifetime, and freed slots are recycled for later chunks. Empty chunks
//! are released immediately, so every occupied slot holds at least one entity
//! once a structural operation completes.
//!
//! ## Open chunks
//!
//! Non-full chunks are indexed by their shared-value indices, so placing an
//! entity never scans the chunk list. Rows enter and leave chunks only through
//! [`Archetype::push_row`] and [`Archetype::swap_remove`], which keep that
//! index current.
//!
//! ## Chunk-list version
//!
//! `chunk_list_version` increases whenever the set of chunks a query could
//! observe changes: a chunk is created or released, or an entity moves into
//! or out of the archetype through a structural change. Query caches record
//! the version they were built against and compare on use.

use std::collections::HashMap;
use std::sync::Arc;

use crate::engine::chunk::Chunk;
use crate::engine::entity::Entity;
use crate::engine::layout::ArchetypeLayout;
use crate::engine::types::{ArchetypeID, ChunkID, ComponentID, RowID, Signature, Version, entity_slot};


/// Stores entities that share an identical type set.
///
/// ## Invariants
/// - `layout` never changes after creation.
/// - `free_slots` lists exactly the `None` entries of `chunks`.
/// - `open_chunks[values]` lists exactly the live, non-full chunks whose
///   shared-value indices equal `values`, oldest first.
/// - `meta_archetype` is `Some` iff the layout has chunk-level types.

pub struct Archetype {
    archetype_id: ArchetypeID,
    layout: Arc<ArchetypeLayout>,
    chunks: Vec<Option<Chunk>>,
    free_slots: Vec<ChunkID>,
    open_chunks: HashMap<Box<[u32]>, Vec<ChunkID>>,
    live_chunks: usize,
    chunk_list_version: u64,
    meta_archetype: Option<ArchetypeID>,
}

impl Archetype {

    /// Creates an empty archetype over a resolved layout.
    pub fn new(archetype_id: ArchetypeID, layout: ArchetypeLayout, meta_archetype: Option<ArchetypeID>) -> Self {
        Self {
            archetype_id,
            layout: Arc::new(layout),
            chunks: Vec::new(),
            free_slots: Vec::new(),
            open_chunks: HashMap::new(),
            live_chunks: 0,
            chunk_list_version: 0,
            meta_archetype,
        }
    }

    /// Identifier of this archetype.
    #[inline] pub fn archetype_id(&self) -> ArchetypeID { self.archetype_id }
    /// Column layout shared by every chunk.
    #[inline] pub fn layout(&self) -> &Arc<ArchetypeLayout> { &self.layout }
    /// Type-set signature.
    #[inline] pub fn signature(&self) -> &Signature { &self.layout.signature }
    /// Entities per chunk.
    #[inline] pub fn capacity(&self) -> usize { self.layout.capacity }
    /// Number of live chunks.
    #[inline] pub fn chunk_count(&self) -> usize { self.live_chunks }
    /// Current chunk-list version.
    #[inline] pub fn chunk_list_version(&self) -> u64 { self.chunk_list_version }
    /// Archetype of this archetype's meta entities, if it has chunk-level types.
    #[inline] pub fn meta_archetype(&self) -> Option<ArchetypeID> { self.meta_archetype }

    /// Returns `true` if `component_id` is a per-entity type of this archetype.
    #[inline]
    pub fn has(&self, component_id: ComponentID) -> bool {
        self.layout.signature.has(entity_slot(component_id))
    }

    /// Number of live entities across all chunks.
    pub fn entity_count(&self) -> usize {
        self.chunks().map(Chunk::count).sum()
    }

    /// Records that an entity moved into or out of this archetype.
    #[inline]
    pub fn bump_chunk_list_version(&mut self) {
        self.chunk_list_version += 1;
    }

    #[inline]
    /// Live chunk in slot `chunk_id`.
    pub fn chunk(&self, chunk_id: ChunkID) -> Option<&Chunk> {
        self.chunks.get(chunk_id as usize).and_then(|c| c.as_ref())
    }

    #[inline]
    /// Mutable live chunk in slot `chunk_id`.
    pub fn chunk_mut(&mut self, chunk_id: ChunkID) -> Option<&mut Chunk> {
        self.chunks.get_mut(chunk_id as usize).and_then(|c| c.as_mut())
    }

    /// Iterates over live chunks in slot order.
    pub fn chunks(&self) -> impl Iterator<Item = &Chunk> + '_ {
        self.chunks.iter().flatten()
    }

    /// Finds a non-full chunk whose shared-value indices equal `shared_values`.
    #[inline]
    pub fn find_chunk_with_space(&self, shared_values: &[u32]) -> Option<ChunkID> {
        self.open_chunks.get(shared_values).and_then(|open| open.first().copied())
    }

    /// Returns `true` if `chunk` is listed in the open index.
    pub fn is_open(&self, chunk: &Chunk) -> bool {
        self.open_chunks.get(chunk.shared_values()).is_some_and(|open| open.contains(&chunk.id()))
    }

    /// Number of non-full chunks, over every shared-value combination.
    pub fn open_chunk_count(&self) -> usize {
        self.open_chunks.values().map(Vec::len).sum()
    }

    /// Appends `entity` to chunk `chunk_id`; a chunk that fills up leaves the
    /// open index. Returns `None` for a dead slot.
    pub fn push_row(&mut self, chunk_id: ChunkID, entity: Entity, version: Version) -> Option<RowID> {
        let chunk = self.chunks.get_mut(chunk_id as usize)?.as_mut()?;
        let row = chunk.push_row(entity, version);
        if chunk.is_full() {
            if let Some(open) = self.open_chunks.get_mut(chunk.shared_values()) {
                open.retain(|&id| id != chunk_id);
            }
        }
        Some(row)
    }

    /// Swap-removes `row` of chunk `chunk_id`; a full chunk rejoins the open
    /// index. Returns the entity moved into `row` and whether the chunk is now
    /// empty, or `None` for a dead slot.
    pub fn swap_remove(&mut self, chunk_id: ChunkID, row: usize, version: Version) -> Option<(Option<Entity>, bool)> {
        let chunk = self.chunks.get_mut(chunk_id as usize)?.as_mut()?;
        let was_full = chunk.is_full();
        let moved = chunk.swap_remove(row, version);
        if was_full {
            self.open_chunks.entry(chunk.shared_values().into()).or_default().push(chunk_id);
        }
        Some((moved, chunk.is_empty()))
    }

    /// Allocates a new empty chunk and returns its slot.
    pub fn create_chunk(&mut self, shared_values: &[u32], version: Version) -> ChunkID {
        let chunk_id = match self.free_slots.pop() {
            Some(id) => id,
            None => {
                self.chunks.push(None);
                (self.chunks.len() - 1) as ChunkID
            }
        };
        let chunk = Chunk::new(
            self.archetype_id,
            chunk_id,
            Arc::clone(&self.layout),
            shared_values,
            version,
        );
        self.chunks[chunk_id as usize] = Some(chunk);
        self.open_chunks.entry(shared_values.into()).or_default().push(chunk_id);
        self.live_chunks += 1;
        self.chunk_list_version += 1;
        log::debug!(
            "archetype {}: allocated chunk {} (capacity {})",
            self.archetype_id, chunk_id, self.layout.capacity
        );
        chunk_id
    }

    /// Releases the chunk in `chunk_id`, returning it.
    pub fn destroy_chunk(&mut self, chunk_id: ChunkID) -> Option<Chunk> {
        let chunk = self.chunks.get_mut(chunk_id as usize)?.take()?;
        if let Some(open) = self.open_chunks.get_mut(chunk.shared_values()) {
            open.retain(|&id| id != chunk_id);
        }
        self.free_slots.push(chunk_id);
        self.live_chunks -= 1;
        self.chunk_list_version += 1;
        log::debug!("archetype {}: released chunk {}", self.archetype_id, chunk_id);
        Some(chunk)
    }
}
