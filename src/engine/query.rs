//! # Queries
//!
//! Declarative selection of archetypes and chunks.
//!
//! A query is one or more clauses ([`EntityQueryDesc`]). Each clause lists
//! component types that are required (`all`), of which at least one is
//! required (`any`), excluded (`none`), required but disabled (`disabled`) and
//! required absent (`absent`). An archetype matches the query if any clause
//! matches it; inside a clause every condition must hold.
//!
//! ## Execution model
//! 1. Clauses are validated and compiled into signatures once, at creation.
//! 2. Matching archetypes are collected when the query is created and appended
//!    to as new archetypes appear; the list is never pruned.
//! 3. The flat list of non-empty matching chunks is cached and rebuilt in full
//!    whenever any matching archetype's chunk-list version moves.
//! 4. Per-chunk [`QueryFilter`]s run after the cache, and enable-bit batching
//!    runs last, per chunk.
//!
//! ## Implicit exclusions
//! `Disabled`, `Prefab` and `SystemInstance` entities are skipped unless a
//! clause names the tag or the matching [`QueryOptions`] flag is set. Meta-chunk
//! entities (those carrying `ChunkHeader`) only match clauses that name
//! `ChunkHeader` in `all` or `any`.

use std::collections::HashSet;

use parking_lot::RwLock;

use crate::engine::archetype::Archetype;
use crate::engine::chunk::Chunk;
use crate::engine::component::{
    CHUNK_HEADER_ID, DISABLED_ID, ENTITY_COMPONENT_ID, PREFAB_ID, SYSTEM_INSTANCE_ID,
    require_description,
};
use crate::engine::error::{ConfigurationError, ECSError, ECSResult, ReferentialError};
use crate::engine::types::{
    AccessMode, ArchetypeID, ChunkID, ComponentID, ComponentType, Signature, TypeModifier, Version,
    MAX_ENABLEABLE_PER_QUERY, entity_slot, split_slot,
};


/// Option flags carried by a query clause.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct QueryOptions(u32);

impl QueryOptions {
    /// No options.
    pub const DEFAULT: QueryOptions = QueryOptions(0);
    /// Match entities tagged `Disabled`.
    pub const INCLUDE_DISABLED_ENTITIES: QueryOptions = QueryOptions(1 << 0);
    /// Match entities tagged `Prefab`.
    pub const INCLUDE_PREFAB: QueryOptions = QueryOptions(1 << 1);
    /// Match entities tagged `SystemInstance`.
    pub const INCLUDE_SYSTEMS: QueryOptions = QueryOptions(1 << 2);
    /// Treat every enableable type as enabled when batching.
    pub const IGNORE_ENABLED_BITS: QueryOptions = QueryOptions(1 << 3);

    /// Raw flag bits.
    #[inline] pub const fn bits(self) -> u32 { self.0 }
    /// Options from raw flag bits.
    #[inline] pub const fn from_bits(bits: u32) -> Self { Self(bits) }
    /// Returns `true` if every flag of `other` is set.
    #[inline] pub const fn contains(self, other: QueryOptions) -> bool { self.0 & other.0 == other.0 }
    /// Flags set in either.
    #[inline] pub const fn union(self, other: QueryOptions) -> Self { Self(self.0 | other.0) }
}

impl std::ops::BitOr for QueryOptions {
    type Output = QueryOptions;
    fn bitor(self, rhs: Self) -> Self { self.union(rhs) }
}

impl std::ops::BitOrAssign for QueryOptions {
    fn bitor_assign(&mut self, rhs: Self) { *self = self.union(rhs); }
}

/// One query clause in its declarative form.
///
/// Passing a clause through [`EntityQueryDesc::normalized`] sorts each set by
/// component and merges duplicate entries; compiled queries report their
/// clauses back in that form, so `desc -> query -> desc` is lossless.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EntityQueryDesc {
    /// Required, and enabled when enableable.
    pub all: Vec<ComponentType>,
    /// At least one present.
    pub any: Vec<ComponentType>,
    /// None present.
    pub none: Vec<ComponentType>,
    /// Required and disabled.
    pub disabled: Vec<ComponentType>,
    /// Not part of the entity's own type set.
    pub absent: Vec<ComponentType>,
    /// Implicit-exclusion and enable-bit options.
    pub options: QueryOptions,
}

fn normalize_set(types: &mut Vec<ComponentType>) {
    types.sort_by_key(|t| (t.component_id, t.modifier == TypeModifier::ChunkLevel, t.access == AccessMode::Read));
    // Write sorts before Read; keep the first of each (id, chunk-level) pair.
    types.dedup_by_key(|t| (t.component_id, t.modifier == TypeModifier::ChunkLevel));
}

impl EntityQueryDesc {
    /// Returns the clause with every set sorted and deduplicated.
    pub fn normalized(mut self) -> Self {
        for set in [&mut self.all, &mut self.any, &mut self.none, &mut self.disabled, &mut self.absent] {
            normalize_set(set);
        }
        self
    }
}

/// Builder for query clauses.
///
/// Type lookups can fail (unregistered types); the first failure is kept and
/// reported by [`QueryBuilder::build`].
///
/// ## Example
/// ```ignore
/// let query = QueryBuilder::new()
///     .read::<Position>()
///     .write::<Velocity>()
///     .none::<Frozen>()
///     .build()?;
/// let id = store.create_query(&query)?;
/// ```

#[derive(Default)]
pub struct QueryBuilder {
    clauses: Vec<EntityQueryDesc>,
    current: EntityQueryDesc,
    error: Option<ECSError>,
}

impl QueryBuilder {
    /// Creates a new, empty query builder.
    pub fn new() -> Self { Self::default() }

    fn push(mut self, result: ECSResult<ComponentType>, pick: fn(&mut EntityQueryDesc) -> &mut Vec<ComponentType>) -> Self {
        match result {
            Ok(ty) => pick(&mut self.current).push(ty),
            Err(e) => { self.error.get_or_insert(e); }
        }
        self
    }

    /// Requires `T` with read-only access.
    pub fn read<T: 'static>(self) -> Self { self.push(ComponentType::read::<T>(), |d| &mut d.all) }

    /// Requires `T` with read-write access.
    pub fn write<T: 'static>(self) -> Self { self.push(ComponentType::write::<T>(), |d| &mut d.all) }

    /// Requires `T` as a chunk-level component.
    pub fn chunk<T: 'static>(self) -> Self { self.push(ComponentType::chunk::<T>(), |d| &mut d.all) }

    /// Adds `T` to the at-least-one set.
    pub fn any<T: 'static>(self) -> Self { self.push(ComponentType::read::<T>(), |d| &mut d.any) }

    /// Excludes archetypes containing `T`.
    pub fn none<T: 'static>(self) -> Self { self.push(ComponentType::exclude::<T>(), |d| &mut d.none) }

    /// Requires `T` present and disabled; `T` must be enableable.
    pub fn disabled<T: 'static>(self) -> Self { self.push(ComponentType::read::<T>(), |d| &mut d.disabled) }

    /// Requires `T` absent from the entity's own type set.
    pub fn absent<T: 'static>(self) -> Self { self.push(ComponentType::exclude::<T>(), |d| &mut d.absent) }

    /// Adds a raw component type to the required set.
    pub fn with_type(mut self, ty: ComponentType) -> Self {
        self.current.all.push(ty);
        self
    }

    /// Sets the options of the current clause.
    pub fn options(mut self, options: QueryOptions) -> Self {
        self.current.options = options;
        self
    }

    /// Closes the current clause and starts an alternative one.
    pub fn or(mut self) -> Self {
        let clause = std::mem::take(&mut self.current);
        self.clauses.push(clause);
        self
    }

    /// Finishes the builder and returns the clause list.
    pub fn build(mut self) -> ECSResult<Vec<EntityQueryDesc>> {
        if let Some(e) = self.error {
            return Err(e);
        }
        self.clauses.push(self.current);
        Ok(self.clauses)
    }
}

/// Compiled form of one clause.
#[derive(Clone, Debug)]
pub struct ArchetypeQuery {
    desc: EntityQueryDesc,
    all: Signature,
    any: Signature,
    none: Signature,
    disabled: Signature,
    absent: Signature,
    implicit_none: Signature,
    names_chunk_header: bool,
    enabled_required: Vec<ComponentID>,
    disabled_required: Vec<ComponentID>,
}

fn signature_of(types: &[ComponentType]) -> Signature {
    let mut signature = Signature::default();
    for ty in types {
        signature.set(ty.slot());
    }
    signature
}

impl ArchetypeQuery {

    /// Validates and compiles a clause.
    ///
    /// ## Errors
    /// - `EntityTypeAsComponent` if the entity-identity type is listed.
    /// - `DisabledNotEnableable` if `disabled` lists a non-enableable type.
    /// - `TooManyEnableableComponents` if more than `MAX_ENABLEABLE_PER_QUERY`
    ///   enableable types are constrained.
    /// - `ConflictingCategory` if a type is both required and excluded.

    pub fn compile(desc: &EntityQueryDesc) -> ECSResult<Self> {
        let desc = desc.clone().normalized();

        let every = desc.all.iter().chain(&desc.any).chain(&desc.none).chain(&desc.disabled).chain(&desc.absent);
        for ty in every {
            if ty.component_id == ENTITY_COMPONENT_ID {
                return Err(ConfigurationError::EntityTypeAsComponent.into());
            }
            require_description(ty.component_id)?;
        }

        let mut enabled_required = Vec::new();
        for ty in desc.all.iter().filter(|t| !t.is_chunk_level()) {
            if require_description(ty.component_id)?.enableable {
                enabled_required.push(ty.component_id);
            }
        }
        let mut disabled_required = Vec::new();
        for ty in &desc.disabled {
            if ty.is_chunk_level() {
                return Err(ConfigurationError::ConflictingCategory { component_id: ty.component_id }.into());
            }
            if !require_description(ty.component_id)?.enableable {
                return Err(ConfigurationError::DisabledNotEnableable { component_id: ty.component_id }.into());
            }
            disabled_required.push(ty.component_id);
        }

        let distinct: HashSet<ComponentID> = enabled_required.iter().chain(&disabled_required).copied().collect();
        if distinct.len() > MAX_ENABLEABLE_PER_QUERY {
            return Err(ConfigurationError::TooManyEnableableComponents {
                requested: distinct.len(),
                max: MAX_ENABLEABLE_PER_QUERY,
            }
            .into());
        }

        let all = signature_of(&desc.all);
        let any = signature_of(&desc.any);
        let none = signature_of(&desc.none);
        let disabled = signature_of(&desc.disabled);
        let absent = signature_of(&desc.absent);

        let required = all.union(&disabled);
        if let Some(slot) = required.union(&any).iterate_over_components().find(|&s| none.has(s) || absent.has(s)) {
            let (component_id, _) = split_slot(slot);
            return Err(ConfigurationError::ConflictingCategory { component_id }.into());
        }

        let mentioned = required.union(&any).union(&none).union(&absent);
        let mut implicit_none = Signature::default();
        let tags = [
            (DISABLED_ID, QueryOptions::INCLUDE_DISABLED_ENTITIES),
            (PREFAB_ID, QueryOptions::INCLUDE_PREFAB),
            (SYSTEM_INSTANCE_ID, QueryOptions::INCLUDE_SYSTEMS),
        ];
        for (component_id, flag) in tags {
            let slot = entity_slot(component_id);
            if !mentioned.has(slot) && !desc.options.contains(flag) {
                implicit_none.set(slot);
            }
        }
        let header = entity_slot(CHUNK_HEADER_ID);
        let names_chunk_header = all.has(header) || any.has(header);

        Ok(Self {
            desc,
            all,
            any,
            none,
            disabled,
            absent,
            implicit_none,
            names_chunk_header,
            enabled_required,
            disabled_required,
        })
    }

    /// The clause in normalized declarative form.
    #[inline]
    pub fn desc(&self) -> &EntityQueryDesc { &self.desc }

    /// Returns `true` if an archetype with `signature` satisfies this clause.
    pub fn matches(&self, signature: &Signature) -> bool {
        if signature.has(entity_slot(CHUNK_HEADER_ID)) && !self.names_chunk_header {
            return false;
        }
        signature.contains_all(&self.all)
            && (self.any.is_empty() || signature.intersects(&self.any))
            && !signature.intersects(&self.none)
            && signature.contains_all(&self.disabled)
            && !signature.intersects(&self.absent)
            && !signature.intersects(&self.implicit_none)
    }

    fn resolve(&self, archetype: &Archetype) -> MatchedArchetype {
        let layout = archetype.layout();
        let ignore_bits = self.desc.options.contains(QueryOptions::IGNORE_ENABLED_BITS);
        let indices = |ids: &[ComponentID]| -> Vec<usize> {
            if ignore_bits {
                return Vec::new();
            }
            ids.iter().filter_map(|&id| layout.enableable_index(id)).collect()
        };
        MatchedArchetype {
            archetype: archetype.archetype_id(),
            enabled_required: indices(&self.enabled_required),
            disabled_required: indices(&self.disabled_required),
        }
    }
}

/// A matching archetype together with the enableable indices its clause constrains.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MatchedArchetype {
    /// Matched archetype.
    pub archetype: ArchetypeID,
    /// Enableable indices (in the archetype) that must be enabled.
    pub enabled_required: Vec<usize>,
    /// Enableable indices (in the archetype) that must be disabled.
    pub disabled_required: Vec<usize>,
}


/// Position of a chunk in a query's cached chunk list.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ChunkRef {
    /// Archetype of the chunk.
    pub archetype: ArchetypeID,
    /// Chunk slot.
    pub chunk: ChunkID,
    /// Index into the query's matched-archetype list.
    pub matched: usize,
}

/// Per-chunk filters applied after the structural cache.
///
/// All set filters must pass.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct QueryFilter {
    /// `(component, interned value index)` pairs the chunk must carry.
    pub shared: Vec<(ComponentID, u32)>,
    /// Columns of which at least one must have changed at or after `change_version`.
    pub changed: Vec<ComponentID>,
    /// Threshold for `changed`.
    pub change_version: Version,
    /// Minimum chunk order version.
    pub order_version: Option<Version>,
}

impl QueryFilter {
    /// Returns `true` if no filter is set.
    pub fn is_empty(&self) -> bool {
        self.shared.is_empty() && self.changed.is_empty() && self.order_version.is_none()
    }

    /// Returns `true` if `chunk` passes every filter.
    pub fn accepts(&self, chunk: &Chunk) -> bool {
        let layout = chunk.layout();
        let shared_ok = self.shared.iter().all(|&(component_id, index)| {
            layout
                .shared_index(component_id)
                .is_some_and(|i| chunk.shared_values()[i] == index)
        });
        let changed_ok = self.changed.is_empty()
            || self.changed.iter().any(|&component_id| {
                chunk
                    .change_version_of(component_id)
                    .is_some_and(|v| v >= self.change_version)
            });
        let order_ok = self.order_version.map_or(true, |v| chunk.order_version() >= v);
        shared_ok && changed_ok && order_ok
    }
}

#[derive(Default)]
struct ChunkCache {
    built: bool,
    matched_len: usize,
    versions: Vec<u64>,
    chunks: Vec<ChunkRef>,
}

/// Runtime state of one registered query.
pub struct QueryState {
    clauses: Vec<ArchetypeQuery>,
    matched: Vec<MatchedArchetype>,
    filter: QueryFilter,
    cache: RwLock<ChunkCache>,
}

impl QueryState {

    /// Compiles `descs` and matches them against the existing archetypes.
    pub fn new(descs: &[EntityQueryDesc], archetypes: &[Archetype]) -> ECSResult<Self> {
        if descs.is_empty() {
            return Err(ConfigurationError::EmptyQuery.into());
        }
        let clauses = descs.iter().map(ArchetypeQuery::compile).collect::<ECSResult<Vec<_>>>()?;
        let mut state = Self {
            clauses,
            matched: Vec::new(),
            filter: QueryFilter::default(),
            cache: RwLock::new(ChunkCache::default()),
        };
        for archetype in archetypes {
            state.on_new_archetype(archetype);
        }
        Ok(state)
    }

    /// Appends `archetype` to the matched list if any clause matches it.
    pub fn on_new_archetype(&mut self, archetype: &Archetype) {
        if let Some(clause) = self.clauses.iter().find(|c| c.matches(archetype.signature())) {
            self.matched.push(clause.resolve(archetype));
        }
    }

    /// Clauses in normalized declarative form.
    pub fn descs(&self) -> Vec<EntityQueryDesc> {
        self.clauses.iter().map(|c| c.desc().clone()).collect()
    }

    /// Replaces the clauses and rematches every archetype.
    pub fn set_descs(&mut self, descs: &[EntityQueryDesc], archetypes: &[Archetype]) -> ECSResult<()> {
        let mut state = Self::new(descs, archetypes)?;
        state.filter = std::mem::take(&mut self.filter);
        *self = state;
        Ok(())
    }

    /// Matched archetypes in match order.
    #[inline] pub fn matched(&self) -> &[MatchedArchetype] { &self.matched }
    /// Per-chunk filter.
    #[inline] pub fn filter(&self) -> &QueryFilter { &self.filter }
    /// Mutable per-chunk filter.
    #[inline] pub fn filter_mut(&mut self) -> &mut QueryFilter { &mut self.filter }

    /// Returns `true` if the cached chunk list reflects `archetypes`.
    pub fn is_cache_valid(&self, archetypes: &[Archetype]) -> bool {
        let cache = self.cache.read();
        cache.built
            && cache.matched_len == self.matched.len()
            && self
                .matched
                .iter()
                .zip(&cache.versions)
                .all(|(m, &v)| archetypes[m.archetype as usize].chunk_list_version() == v)
    }

    /// Scans the matched archetypes without touching the cache.
    pub fn scan_chunks(&self, archetypes: &[Archetype]) -> Vec<ChunkRef> {
        let mut chunks = Vec::new();
        for (matched, m) in self.matched.iter().enumerate() {
            let archetype = &archetypes[m.archetype as usize];
            chunks.extend(
                archetype
                    .chunks()
                    .filter(|c| !c.is_empty())
                    .map(|c| ChunkRef { archetype: m.archetype, chunk: c.id(), matched }),
            );
        }
        chunks
    }

    /// Rebuilds the cache from scratch.
    pub fn rebuild_cache(&self, archetypes: &[Archetype]) {
        let chunks = self.scan_chunks(archetypes);
        let versions = self
            .matched
            .iter()
            .map(|m| archetypes[m.archetype as usize].chunk_list_version())
            .collect();
        let mut cache = self.cache.write();
        log::debug!("query cache rebuilt: {} archetypes, {} chunks", self.matched.len(), chunks.len());
        *cache = ChunkCache { built: true, matched_len: self.matched.len(), versions, chunks };
    }

    /// Returns the cached chunk list, rebuilding it first if stale.
    pub fn cached_chunks(&self, archetypes: &[Archetype]) -> Vec<ChunkRef> {
        if !self.is_cache_valid(archetypes) {
            self.rebuild_cache(archetypes);
        }
        self.cache.read().chunks.clone()
    }
}

/// Generation-checked handle to a registered query.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct QueryId {
    /// Slot in the registry.
    pub index: u32,
    /// Slot generation at creation.
    pub generation: u32,
}

impl std::fmt::Display for QueryId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "query {}v{}", self.index, self.generation)
    }
}

struct QuerySlot {
    generation: u32,
    state: Option<QueryState>,
}

/// Owns every live query of a store.
#[derive(Default)]
pub struct QueryRegistry {
    slots: Vec<QuerySlot>,
    free: Vec<u32>,
}

impl QueryRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self { Self::default() }

    /// Registers `state` and returns its handle.
    pub fn insert(&mut self, state: QueryState) -> QueryId {
        let index = match self.free.pop() {
            Some(index) => {
                self.slots[index as usize].state = Some(state);
                index
            }
            None => {
                self.slots.push(QuerySlot { generation: 0, state: Some(state) });
                (self.slots.len() - 1) as u32
            }
        };
        let id = QueryId { index, generation: self.slots[index as usize].generation };
        log::debug!("created {}", id);
        id
    }

    /// Releases `id`; later use of the handle is a referential error.
    pub fn release(&mut self, id: QueryId) -> ECSResult<()> {
        self.get(id)?;
        let slot = &mut self.slots[id.index as usize];
        slot.state = None;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index);
        log::debug!("released {}", id);
        Ok(())
    }

    /// State of a live query.
    pub fn get(&self, id: QueryId) -> ECSResult<&QueryState> {
        self.slots
            .get(id.index as usize)
            .filter(|s| s.generation == id.generation)
            .and_then(|s| s.state.as_ref())
            .ok_or(ReferentialError::QueryReleased(id).into())
    }

    /// Mutable state of a live query.
    pub fn get_mut(&mut self, id: QueryId) -> ECSResult<&mut QueryState> {
        self.slots
            .get_mut(id.index as usize)
            .filter(|s| s.generation == id.generation)
            .and_then(|s| s.state.as_mut())
            .ok_or(ReferentialError::QueryReleased(id).into())
    }

    /// Live query states.
    pub fn iter(&self) -> impl Iterator<Item = (QueryId, &QueryState)> + '_ {
        self.slots.iter().enumerate().filter_map(|(i, s)| {
            s.state.as_ref().map(|state| (QueryId { index: i as u32, generation: s.generation }, state))
        })
    }

    /// Offers a newly created archetype to every live query.
    pub fn on_new_archetype(&mut self, archetype: &Archetype) {
        for state in self.slots.iter_mut().filter_map(|s| s.state.as_mut()) {
            state.on_new_archetype(archetype);
        }
    }
}
