//! Core identifiers, published layout constants and bit-level signatures.
//!
//! This module defines the **fundamental scalar types and constants** shared by
//! every other part of the storage core: entity indices and generations,
//! component and archetype identifiers, the chunk byte budget, and the
//! [`Signature`] bitset used for archetype identity and query matching.
//!
//! ## Type slots
//!
//! A component type can appear in an archetype in two ways: as an ordinary
//! per-entity column, or as a *chunk-level* value carried by the chunk's
//! meta entity. Both forms are tracked in the same [`Signature`] through
//! **type slots**:
//!
//! ```text
//! slot = component_id                   (per-entity)
//! slot = component_id + COMPONENT_CAP   (chunk-level)
//! ```
//!
//! Slots sort regular components before chunk-level components, which gives
//! the deterministic type-id ordering the chunk layout relies on.
//!
//! ## Published constants
//!
//! All capacity math derives from [`CHUNK_PAYLOAD_SIZE`]; the value is part of
//! the public contract so that tests can assert exact chunk capacities.

use crate::engine::component::component_id_of;
use crate::engine::error::ECSResult;


/// Globally unique entity identifier encoded as a packed 64-bit value.
pub type EntityID = u64;
/// Dense index of an entity in the directory.
pub type IndexID = u32;
/// Generation counter used to detect stale entities.
pub type VersionID = u32;

/// Unique identifier for a component type.
pub type ComponentID = u16;
/// Position of a component type inside a [`Signature`].
pub type TypeSlot = u16;
/// Unique identifier for an archetype.
pub type ArchetypeID = u16;
/// Stable chunk slot within an archetype.
pub type ChunkID = u32;
/// Row index within a chunk.
pub type RowID = u32;

/// Monotonic change/order version counter value.
pub type Version = u32;

/// Total size of one chunk allocation in bytes.
pub const CHUNK_BUFFER_SIZE: usize = 16_384;
/// Bytes of each chunk reserved for the chunk header.
pub const CHUNK_HEADER_SIZE: usize = 64;
/// Usable payload bytes per chunk; every capacity computation derives from this.
pub const CHUNK_PAYLOAD_SIZE: usize = CHUNK_BUFFER_SIZE - CHUNK_HEADER_SIZE;

/// Size of the implicit entity-identity column entry.
pub const ENTITY_SIZE: usize = std::mem::size_of::<EntityID>();

/// Maximum number of distinct shared-component types in one archetype.
pub const MAX_SHARED_COMPONENTS: usize = 16;
/// Maximum number of enableable types one query may constrain.
pub const MAX_ENABLEABLE_PER_QUERY: usize = 8;

/// Maximum number of registered component types.
pub const COMPONENT_CAP: usize = 1024;
/// Number of type slots (per-entity plus chunk-level).
pub const SLOT_CAP: usize = COMPONENT_CAP * 2;
/// Number of `u64` words required to represent a full signature.
pub const SIGNATURE_SIZE: usize = SLOT_CAP / 64;

/// Version value meaning "never written".
pub const VERSION_NONE: Version = 0;

static_assertions::const_assert_eq!(CHUNK_PAYLOAD_SIZE, 16_320);
static_assertions::const_assert!(COMPONENT_CAP <= ComponentID::MAX as usize);
static_assertions::const_assert!(SLOT_CAP <= TypeSlot::MAX as usize);
static_assertions::const_assert_eq!(SLOT_CAP % 64, 0);

/// Returns the per-entity slot of `component_id`.
#[inline]
pub const fn entity_slot(component_id: ComponentID) -> TypeSlot {
    component_id as TypeSlot
}

/// Returns the chunk-level slot of `component_id`.
#[inline]
pub const fn chunk_slot(component_id: ComponentID) -> TypeSlot {
    (component_id as usize + COMPONENT_CAP) as TypeSlot
}

/// Splits a slot into its component ID and whether it is chunk-level.
#[inline]
pub const fn split_slot(slot: TypeSlot) -> (ComponentID, bool) {
    if (slot as usize) < COMPONENT_CAP {
        (slot as ComponentID, false)
    } else {
        ((slot as usize - COMPONENT_CAP) as ComponentID, true)
    }
}

/// Bitset representing a set of type slots.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Signature {
    /// Packed slot bitset.
    pub components: [u64; SIGNATURE_SIZE],
}

impl Default for Signature {
    fn default() -> Self {
        Self {
            components: [0u64; SIGNATURE_SIZE],
        }
    }
}

impl Signature {
    /// Sets the bit corresponding to `slot`.
    #[inline]
    pub fn set(&mut self, slot: TypeSlot) {
        let index = (slot as usize) / 64;
        let bits = (slot as usize) % 64;
        self.components[index] |= 1u64 << bits;
    }

    /// Clears the bit corresponding to `slot`.
    #[inline]
    pub fn clear(&mut self, slot: TypeSlot) {
        let index = (slot as usize) / 64;
        let bits = (slot as usize) % 64;
        self.components[index] &= !(1u64 << bits);
    }

    /// Returns `true` if `slot` is present in this signature.
    #[inline]
    pub fn has(&self, slot: TypeSlot) -> bool {
        let index = (slot as usize) / 64;
        let bits = (slot as usize) % 64;
        (self.components[index] >> bits) & 1 == 1
    }

    /// Returns `true` if all slots in `signature` are present.
    #[inline]
    pub fn contains_all(&self, signature: &Signature) -> bool {
        for (component_a, component_b) in self.components.iter().zip(signature.components.iter()) {
            if (component_a & component_b) != *component_b { return false; }
        }
        true
    }

    /// Returns `true` if at least one slot is present in both signatures.
    #[inline]
    pub fn intersects(&self, signature: &Signature) -> bool {
        self.components
            .iter()
            .zip(signature.components.iter())
            .any(|(a, b)| a & b != 0)
    }

    /// Returns `true` if no slot is set.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.components.iter().all(|&word| word == 0)
    }

    /// Number of set slots.
    #[inline]
    pub fn count(&self) -> usize {
        self.components.iter().map(|word| word.count_ones() as usize).sum()
    }

    /// Returns the slots present in `self` but not in `other`.
    pub fn difference(&self, other: &Signature) -> Signature {
        let mut out = *self;
        for (word, other_word) in out.components.iter_mut().zip(other.components.iter()) {
            *word &= !other_word;
        }
        out
    }

    /// Returns the slots present in either signature.
    pub fn union(&self, other: &Signature) -> Signature {
        let mut out = *self;
        for (word, other_word) in out.components.iter_mut().zip(other.components.iter()) {
            *word |= other_word;
        }
        out
    }

    /// Iterates over all slots set in this signature in ascending order.
    pub fn iterate_over_components(&self) -> impl Iterator<Item = TypeSlot> + '_ {
        iter_bits_from_words(&self.components)
    }
}

/// Iterates over slots set in a raw signature word array.
#[inline]
fn iter_bits_from_words<'a>(
    words: &'a [u64; SIGNATURE_SIZE],
) -> impl Iterator<Item = TypeSlot> + 'a {
    words
        .iter()
        .enumerate()
        .flat_map(|(word_index, &word)| {
            let base = word_index * 64;
            let mut bits = word;
            std::iter::from_fn(move || {
                if bits == 0 {
                    return None;
                }
                let tz = bits.trailing_zeros() as usize;
                bits &= bits - 1;
                Some((base + tz) as TypeSlot)
            })
        })
}

/// Access mode for a component.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum AccessMode {
    /// Read-only access.
    Read,
    /// Exclusive write access.
    #[default]
    Write,
}

/// How a component type participates in an archetype or a query.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum TypeModifier {
    /// Ordinary per-entity component.
    #[default]
    None,
    /// Chunk-level component stored on the chunk's meta entity.
    ChunkLevel,
    /// The type must not be present.
    Exclude,
}

/// A component type together with the way it is requested.
///
/// Two `ComponentType` values over the same `component_id` that differ only in
/// [`AccessMode`] refer to the same archetype slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ComponentType {
    /// Registered component identifier.
    pub component_id: ComponentID,
    /// Requested access.
    pub access: AccessMode,
    /// Per-entity, chunk-level or excluded.
    pub modifier: TypeModifier,
}

impl ComponentType {
    /// Creates a component type from raw parts.
    #[inline]
    pub const fn new(component_id: ComponentID, access: AccessMode, modifier: TypeModifier) -> Self {
        Self { component_id, access, modifier }
    }

    /// Read-write per-entity access to `T`.
    pub fn of<T: 'static>() -> ECSResult<Self> {
        Ok(Self::new(component_id_of::<T>()?, AccessMode::Write, TypeModifier::None))
    }

    /// Read-only per-entity access to `T`.
    pub fn read<T: 'static>() -> ECSResult<Self> {
        Ok(Self::new(component_id_of::<T>()?, AccessMode::Read, TypeModifier::None))
    }

    /// Read-write per-entity access to `T`.
    pub fn write<T: 'static>() -> ECSResult<Self> {
        Self::of::<T>()
    }

    /// Chunk-level `T`.
    pub fn chunk<T: 'static>() -> ECSResult<Self> {
        Ok(Self::new(component_id_of::<T>()?, AccessMode::Write, TypeModifier::ChunkLevel))
    }

    /// `T` must be absent.
    pub fn exclude<T: 'static>() -> ECSResult<Self> {
        Ok(Self::new(component_id_of::<T>()?, AccessMode::Read, TypeModifier::Exclude))
    }

    /// Returns the signature slot this type occupies in an archetype.
    #[inline]
    pub fn slot(&self) -> TypeSlot {
        match self.modifier {
            TypeModifier::ChunkLevel => chunk_slot(self.component_id),
            TypeModifier::None | TypeModifier::Exclude => entity_slot(self.component_id),
        }
    }

    /// Returns `true` if this is a chunk-level request.
    #[inline]
    pub fn is_chunk_level(&self) -> bool {
        self.modifier == TypeModifier::ChunkLevel
    }
}
