//! Internal consistency check.
//!
//! Walks every chunk, the entity directory and every query cache and reports
//! the first disagreement as a [`ConsistencyError`]. Normal operation never
//! raises these; a failure here is always a storage bug.

use crate::engine::component::{CHUNK_HEADER_ID, ChunkHeader};
use crate::engine::entity::EntityLocation;
use crate::engine::error::{ConsistencyError, ECSResult};
use crate::engine::store::EntityStore;
use crate::engine::types::RowID;


impl EntityStore {

    /// Verifies that chunks, directory and caches agree.
    ///
    /// ## Checks
    /// - No allocated chunk is empty and none exceeds its capacity.
    /// - The open-chunk index lists exactly the non-full chunks.
    /// - Every row's entity is alive and its directory entry points back at the row.
    /// - Cached disabled counts equal the zero bits in `[0, count)`.
    /// - Chunks of archetypes with chunk-level types have a meta entity whose
    ///   header names them.
    /// - The directory's live count equals the entities found in chunks.
    /// - Every query cache that reports itself valid equals a fresh scan.

    pub fn check_internal_consistency(&self) -> ECSResult<()> {
        let mut in_chunks = 0usize;

        for archetype in &self.archetypes {
            let archetype_id = archetype.archetype_id();
            let non_full = archetype.chunks().filter(|c| !c.is_full()).count();
            if non_full != archetype.open_chunk_count()
                || archetype.chunks().any(|c| c.is_full() == archetype.is_open(c))
            {
                return Err(ConsistencyError::OpenChunks { archetype: archetype_id }.into());
            }
            for chunk in archetype.chunks() {
                let chunk_id = chunk.id();
                if chunk.is_empty() {
                    return Err(ConsistencyError::EmptyChunk { archetype: archetype_id, chunk: chunk_id }.into());
                }
                if chunk.count() > chunk.capacity() {
                    return Err(ConsistencyError::ChunkCount {
                        archetype: archetype_id,
                        chunk: chunk_id,
                        count: chunk.count(),
                        found: chunk.capacity(),
                    }
                    .into());
                }

                for (row, &entity) in chunk.entities().iter().enumerate() {
                    let expected = EntityLocation { archetype: archetype_id, chunk: chunk_id, row: row as RowID };
                    if self.entities.get_location(entity) != Some(expected) {
                        return Err(ConsistencyError::DirectoryMismatch {
                            entity,
                            archetype: archetype_id,
                            chunk: chunk_id,
                            row: row as RowID,
                        }
                        .into());
                    }
                }
                in_chunks += chunk.count();

                let bits = chunk.enable_bits();
                for index in 0..chunk.layout().enableable_count() {
                    if bits.disabled_count(index) != bits.count_disabled(index, chunk.count()) {
                        return Err(ConsistencyError::DisabledCount {
                            archetype: archetype_id,
                            chunk: chunk_id,
                            enableable_index: index,
                        }
                        .into());
                    }
                }
                drop(bits);

                if archetype.layout().has_chunk_components() {
                    let header_ok = chunk
                        .meta_entity()
                        .and_then(|meta| self.get_component::<ChunkHeader>(meta).ok())
                        .is_some_and(|h| h.archetype == archetype_id && h.chunk == chunk_id);
                    if !header_ok {
                        return Err(ConsistencyError::MetaEntity { archetype: archetype_id, chunk: chunk_id }.into());
                    }
                } else if chunk.meta_entity().is_some() && !archetype.has(CHUNK_HEADER_ID) {
                    return Err(ConsistencyError::MetaEntity { archetype: archetype_id, chunk: chunk_id }.into());
                }
            }
        }

        if in_chunks != self.entities.len() {
            return Err(ConsistencyError::EntityTotal { directory: self.entities.len(), chunks: in_chunks }.into());
        }

        for (query, state) in self.queries.iter() {
            if state.is_cache_valid(&self.archetypes)
                && state.cached_chunks(&self.archetypes) != state.scan_chunks(&self.archetypes)
            {
                return Err(ConsistencyError::QueryCache { query }.into());
            }
        }
        Ok(())
    }
}
