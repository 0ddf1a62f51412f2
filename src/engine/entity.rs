//! Entity handles and the entity directory.
//!
//! An [`Entity`] packs a dense index and a generation into one `u64`. The
//! directory ([`Entities`]) maps each live index to its current
//! [`EntityLocation`] and bumps the generation on free, so a stale handle can
//! never resolve to a recycled slot.

use crate::engine::error::{ECSError, ECSResult};
use crate::engine::types::{ArchetypeID, ChunkID, EntityID, IndexID, RowID, VersionID};


const INDEX_BITS: u32 = 32;
const INDEX_MASK: EntityID = (1 << INDEX_BITS) - 1;

/// Generation-checked entity handle.
///
/// The all-zero handle ([`Entity::NULL`]) is never issued: generations start at 1.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default, PartialOrd, Ord)]
pub struct Entity(pub EntityID);

#[inline]
const fn make_id(index: IndexID, generation: VersionID) -> EntityID {
    ((generation as EntityID) << INDEX_BITS) | (index as EntityID)
}

impl Entity {
    /// Handle that never refers to a live entity.
    pub const NULL: Entity = Entity(0);

    /// Builds a handle from raw parts.
    #[inline]
    pub const fn from_parts(index: IndexID, generation: VersionID) -> Self {
        Entity(make_id(index, generation))
    }

    /// Dense directory index.
    #[inline] pub const fn index(self) -> IndexID { (self.0 & INDEX_MASK) as IndexID }

    /// Generation counter.
    #[inline] pub const fn generation(self) -> VersionID { (self.0 >> INDEX_BITS) as VersionID }
}

impl std::fmt::Display for Entity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}v{}", self.index(), self.generation())
    }
}

/// Where an entity's data currently lives.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EntityLocation {
    /// Owning archetype.
    pub archetype: ArchetypeID,
    /// Chunk slot within the archetype.
    pub chunk: ChunkID,
    /// Row within the chunk.
    pub row: RowID,
}

/// Directory of entity generations and locations.
///
/// ## Invariants
/// - `alive[i]` implies `locations[i]` names the row holding entity `i`.
/// - `free_store` holds exactly the indices with `alive[i] == false`.

#[derive(Default)]
pub struct Entities {
    generations: Vec<VersionID>,
    free_store: Vec<IndexID>,
    alive: Vec<bool>,
    locations: Vec<EntityLocation>,
    live: usize,
}

impl Entities {
    /// Creates an empty directory.
    pub fn new() -> Self { Self::default() }

    /// Creates a directory with room for `reserve` entities before growing.
    pub fn with_capacity(reserve: usize) -> Self {
        let mut entities = Self::default();
        entities.grow(reserve);
        entities
    }

    fn grow(&mut self, additional: usize) {
        if additional == 0 { return; }
        let current = self.generations.len();
        let target = current.saturating_add(additional).min(IndexID::MAX as usize);
        self.generations.resize(target, 1);
        self.alive.resize(target, false);
        self.locations.resize(target, EntityLocation::default());
        // Reverse so that low indices are handed out first.
        self.free_store.extend((current..target).rev().map(|i| i as IndexID));
    }

    /// Issues a handle for a new entity placed at `location`.
    pub fn allocate(&mut self, location: EntityLocation) -> ECSResult<Entity> {
        if self.free_store.is_empty() {
            self.grow(self.generations.len().max(1024));
        }
        let index = self
            .free_store
            .pop()
            .ok_or_else(|| ECSError::Internal("entity index space exhausted".into()))?;

        let i = index as usize;
        self.alive[i] = true;
        self.locations[i] = location;
        self.live += 1;
        Ok(Entity::from_parts(index, self.generations[i]))
    }

    /// Frees a live entity, invalidating every outstanding handle to it.
    pub fn free(&mut self, entity: Entity) -> bool {
        if !self.is_alive(entity) { return false; }
        let i = entity.index() as usize;
        // Skip generation 0 on wrap so NULL stays unissued.
        let next = self.generations[i].wrapping_add(1);
        self.generations[i] = if next == 0 { 1 } else { next };
        self.alive[i] = false;
        self.locations[i] = EntityLocation::default();
        self.free_store.push(entity.index());
        self.live -= 1;
        true
    }

    /// Returns `true` if `entity` is live and its generation matches.
    pub fn is_alive(&self, entity: Entity) -> bool {
        let i = entity.index() as usize;
        i < self.generations.len()
            && self.alive[i]
            && self.generations[i] == entity.generation()
    }

    /// Location of a live entity.
    pub fn get_location(&self, entity: Entity) -> Option<EntityLocation> {
        if self.is_alive(entity) {
            Some(self.locations[entity.index() as usize])
        } else {
            None
        }
    }

    /// Records a new location for a live entity.
    pub fn set_location(&mut self, entity: Entity, location: EntityLocation) {
        debug_assert!(
            self.is_alive(entity),
            "set_location was called on a dead or stale entity. Entity: {:?}, Location: {:?}",
            entity, location
        );
        if self.is_alive(entity) {
            self.locations[entity.index() as usize] = location;
        }
    }

    /// Number of live entities.
    #[inline]
    pub fn len(&self) -> usize { self.live }

    /// Returns `true` if no entity is live.
    #[inline]
    pub fn is_empty(&self) -> bool { self.live == 0 }

    /// Iterates over every live entity and its location.
    pub fn iter(&self) -> impl Iterator<Item = (Entity, EntityLocation)> + '_ {
        self.alive
            .iter()
            .enumerate()
            .filter(|(_, &alive)| alive)
            .map(move |(i, _)| {
                (Entity::from_parts(i as IndexID, self.generations[i]), self.locations[i])
            })
    }
}
