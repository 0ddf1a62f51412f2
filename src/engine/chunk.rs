//! # Chunk storage
//!
//! A [`Chunk`] is a fixed-size, cache-line aligned byte arena holding up to
//! `capacity` entities of one archetype in structure-of-arrays form, plus side
//! tables for change versions, enable bits and shared-value indices.
//!
//! ## Arena
//!
//! ```text
//! [ Entity × capacity | pad | column 0 × capacity | pad | column 1 × capacity | ... ]
//! ```
//!
//! Offsets come from [`ArchetypeLayout`]; every column start is aligned for its
//! type, and the arena itself is 64-byte aligned, so typed slices can be taken
//! directly over the bytes.
//!
//! ## Concurrency
//!
//! Column data is only mutated through `&mut Chunk`. Enable bits live behind a
//! `parking_lot::RwLock` so they can be toggled through `&Chunk` while other
//! readers observe the same chunk; change versions are atomics advanced with
//! `fetch_max`, which makes concurrent bumps commutative.
//!
//! ## Invariants
//! - Rows `[0, count)` are live; rows at or past `count` hold stale bytes.
//! - `disabled[i]` equals the number of zero bits in `bits[i][0..count)`.
//! - Change versions never decrease.

use std::any::TypeId;
use std::mem::size_of;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use bitvec::prelude::*;
use parking_lot::{RwLock, RwLockReadGuard};

use crate::engine::component::{Component, ComponentKind};
use crate::engine::entity::Entity;
use crate::engine::error::{ConfigurationError, ECSResult};
use crate::engine::layout::ArchetypeLayout;
use crate::engine::types::{ArchetypeID, ChunkID, ComponentID, RowID, Version, ENTITY_SIZE};


#[repr(C, align(64))]
#[derive(Clone, Copy)]
struct CacheLine([u8; 64]);

const LINE: usize = size_of::<CacheLine>();

/// Per-chunk enable bit sets, one per enableable type.
pub struct EnableBits {
    bits: Vec<BitVec<u64, Lsb0>>,
    disabled: Vec<usize>,
}

impl EnableBits {
    fn new(enableable: usize, capacity: usize) -> Self {
        Self {
            bits: (0..enableable).map(|_| bitvec![u64, Lsb0; 1; capacity]).collect(),
            disabled: vec![0; enableable],
        }
    }

    /// Raw words of enableable type `index`; bits at or past `count` are undefined.
    #[inline]
    pub fn words(&self, index: usize) -> &[u64] {
        self.bits[index].as_raw_slice()
    }

    #[inline]
    /// Enable bit of type `index` at `row`; panics past the chunk capacity.
    pub fn get(&self, index: usize, row: usize) -> bool {
        self.bits[index][row]
    }

    /// Number of disabled live entities for enableable type `index`.
    #[inline]
    pub fn disabled_count(&self, index: usize) -> usize {
        self.disabled[index]
    }

    /// Number of zero bits in `[0, count)`, recomputed from the bits.
    pub fn count_disabled(&self, index: usize, count: usize) -> usize {
        self.bits[index][..count].count_zeros()
    }

    fn set(&mut self, index: usize, row: usize, value: bool) -> bool {
        let old = self.bits[index][row];
        if old == value {
            return false;
        }
        self.bits[index].set(row, value);
        if value {
            self.disabled[index] -= 1;
        } else {
            self.disabled[index] += 1;
        }
        true
    }
}

/// Packed copy of one row, used to move an entity between chunks.
#[derive(Default)]
pub struct RowSnapshot {
    bytes: Vec<u8>,
    enabled: Vec<bool>,
}

/// Fixed-capacity columnar block of entities of one archetype.
pub struct Chunk {
    archetype: ArchetypeID,
    id: ChunkID,
    layout: Arc<ArchetypeLayout>,
    data: Box<[CacheLine]>,
    count: usize,
    order_version: Version,
    change_versions: Box<[AtomicU32]>,
    enable: RwLock<EnableBits>,
    shared_values: Box<[u32]>,
    meta_entity: Option<Entity>,
}

impl Chunk {

    /// Allocates an empty, zeroed chunk.
    ///
    /// ## Behavior
    /// - Every enable bit starts set.
    /// - Change versions and the order version start at `version`.

    pub fn new(
        archetype: ArchetypeID,
        id: ChunkID,
        layout: Arc<ArchetypeLayout>,
        shared_values: &[u32],
        version: Version,
    ) -> Self {
        debug_assert_eq!(shared_values.len(), layout.shared_count());
        let lines = layout.arena_bytes.div_ceil(LINE);
        Self {
            archetype,
            id,
            data: vec![CacheLine([0; LINE]); lines].into_boxed_slice(),
            count: 0,
            order_version: version,
            change_versions: (0..layout.columns.len()).map(|_| AtomicU32::new(version)).collect(),
            enable: RwLock::new(EnableBits::new(layout.enableable_count(), layout.capacity)),
            shared_values: shared_values.into(),
            meta_entity: None,
            layout,
        }
    }

    /// Owning archetype.
    #[inline] pub fn archetype(&self) -> ArchetypeID { self.archetype }
    /// Slot of this chunk within its archetype.
    #[inline] pub fn id(&self) -> ChunkID { self.id }
    /// Column layout.
    #[inline] pub fn layout(&self) -> &Arc<ArchetypeLayout> { &self.layout }
    /// Live entities.
    #[inline] pub fn count(&self) -> usize { self.count }
    /// Maximum live entities.
    #[inline] pub fn capacity(&self) -> usize { self.layout.capacity }
    /// Returns `true` when no row is free.
    #[inline] pub fn is_full(&self) -> bool { self.count >= self.layout.capacity }
    /// Returns `true` when no row is live.
    #[inline] pub fn is_empty(&self) -> bool { self.count == 0 }
    /// Version of the last row insertion or removal.
    #[inline] pub fn order_version(&self) -> Version { self.order_version }
    /// Interned shared-value indices, one per shared type of the layout.
    #[inline] pub fn shared_values(&self) -> &[u32] { &self.shared_values }
    /// Meta entity holding this chunk's chunk-level values.
    #[inline] pub fn meta_entity(&self) -> Option<Entity> { self.meta_entity }

    pub(crate) fn set_meta_entity(&mut self, entity: Option<Entity>) {
        self.meta_entity = entity;
    }

    #[inline]
    fn bytes(&self) -> &[u8] {
        // SAFETY: `CacheLine` is `repr(C)` over `[u8; 64]` with no padding.
        unsafe { std::slice::from_raw_parts(self.data.as_ptr().cast::<u8>(), self.data.len() * LINE) }
    }

    #[inline]
    fn bytes_mut(&mut self) -> &mut [u8] {
        // SAFETY: as in `bytes`, and `&mut self` guarantees exclusivity.
        unsafe { std::slice::from_raw_parts_mut(self.data.as_mut_ptr().cast::<u8>(), self.data.len() * LINE) }
    }

    /// Entity identities of the live rows.
    #[inline]
    pub fn entities(&self) -> &[Entity] {
        // SAFETY: the identity column starts at offset 0 of a 64-aligned arena,
        // `Entity` is a transparent `u64`, and every bit pattern is valid.
        unsafe { std::slice::from_raw_parts(self.data.as_ptr().cast::<Entity>(), self.count) }
    }

    #[inline]
    fn set_entity(&mut self, row: usize, entity: Entity) {
        let start = row * ENTITY_SIZE;
        self.bytes_mut()[start..start + ENTITY_SIZE].copy_from_slice(&entity.0.to_ne_bytes());
    }

    /// Change version of column `column`.
    #[inline]
    pub fn change_version(&self, column: usize) -> Version {
        self.change_versions[column].load(Ordering::Acquire)
    }

    /// Change version of `component_id`, if it is a column here.
    pub fn change_version_of(&self, component_id: ComponentID) -> Option<Version> {
        self.layout.column_index(component_id).map(|c| self.change_version(c))
    }

    /// Raises column `column`'s change version to at least `version`.
    #[inline]
    pub fn mark_changed(&self, column: usize, version: Version) {
        self.change_versions[column].fetch_max(version, Ordering::AcqRel);
    }

    fn mark_all_changed(&self, version: Version) {
        for column in 0..self.change_versions.len() {
            self.mark_changed(column, version);
        }
    }

    /// Read access to the enable bit sets.
    #[inline]
    pub fn enable_bits(&self) -> RwLockReadGuard<'_, EnableBits> {
        self.enable.read()
    }

    /// Sets the enable bit of enableable type `index` at `row`.
    ///
    /// ## Behavior
    /// - Returns `false` and bumps nothing if the bit already equals `value`.
    /// - Otherwise flips the bit, adjusts the disabled count and raises the
    ///   column's change version to `version`.

    pub(crate) fn set_enabled(&self, index: usize, row: usize, value: bool, version: Version) -> bool {
        debug_assert!(row < self.count);
        let changed = self.enable.write().set(index, row, value);
        if changed {
            self.mark_changed(self.layout.enableable[index], version);
        }
        changed
    }

    /// Reads the enable bit of enableable type `index` at `row`.
    #[inline]
    pub(crate) fn is_enabled(&self, index: usize, row: usize) -> bool {
        self.enable.read().get(index, row)
    }

    /// Disabled-entity count of enableable type `index`.
    #[inline]
    pub fn disabled_count(&self, index: usize) -> usize {
        self.enable.read().disabled_count(index)
    }

    /// Typed view of a value column over the live rows.
    ///
    /// Returns `None` if the column is absent here or does not store `T`
    /// directly (shared and buffer kinds).

    pub fn column<T: Component>(&self, component_id: ComponentID) -> Option<&[T]> {
        let (offset, _) = self.typed_column::<T>(component_id)?;
        if size_of::<T>() == 0 {
            // SAFETY: zero-sized slices may use any aligned non-null pointer.
            return Some(unsafe { std::slice::from_raw_parts(NonNull::<T>::dangling().as_ptr(), self.count) });
        }
        // SAFETY: `typed_column` checked the type, the offset is aligned for
        // `T`, and rows `[0, count)` were initialised by `push_row`.
        Some(unsafe { std::slice::from_raw_parts(self.bytes().as_ptr().add(offset).cast::<T>(), self.count) })
    }

    /// Mutable typed view of a value column; raises its change version to `version`.
    pub fn column_mut<T: Component>(&mut self, component_id: ComponentID, version: Version) -> Option<&mut [T]> {
        let (offset, column) = self.typed_column::<T>(component_id)?;
        self.mark_changed(column, version);
        let count = self.count;
        if size_of::<T>() == 0 {
            // SAFETY: zero-sized slices may use any aligned non-null pointer.
            return Some(unsafe { std::slice::from_raw_parts_mut(NonNull::<T>::dangling().as_ptr(), count) });
        }
        // SAFETY: as in `column`, with exclusivity from `&mut self`.
        Some(unsafe { std::slice::from_raw_parts_mut(self.bytes_mut().as_mut_ptr().add(offset).cast::<T>(), count) })
    }

    fn typed_column<T: Component>(&self, component_id: ComponentID) -> Option<(usize, usize)> {
        let index = self.layout.column_index(component_id)?;
        let column = &self.layout.columns[index];
        let direct = matches!(
            column.desc.kind,
            ComponentKind::Value | ComponentKind::Tag | ComponentKind::Cleanup
        );
        if !direct || column.desc.type_id != TypeId::of::<T>() {
            return None;
        }
        Some((column.offset, index))
    }

    fn slot_range(&self, column: usize, row: usize) -> std::ops::Range<usize> {
        let layout = &self.layout.columns[column];
        let start = layout.offset + row * layout.size;
        start..start + layout.size
    }

    /// Inline elements of a buffer component at `row`.
    pub fn buffer<T: Component>(&self, component_id: ComponentID, row: usize) -> Option<&[T]> {
        let (column, elements_offset, _) = self.buffer_column::<T>(component_id)?;
        let slot = self.slot_range(column, row);
        let bytes = &self.bytes()[slot];
        let len = buffer_len(bytes);
        // SAFETY: the buffer slot is aligned for `T` and `u32`, the first `len`
        // elements were written by `push_buffer`.
        Some(unsafe { std::slice::from_raw_parts(bytes.as_ptr().add(elements_offset).cast::<T>(), len) })
    }

    /// Appends `value` to a buffer component at `row`.
    ///
    /// ## Errors
    /// - `BufferOverflow` when the inline capacity is exhausted.

    pub fn push_buffer<T: Component>(
        &mut self,
        component_id: ComponentID,
        row: usize,
        value: T,
        version: Version,
    ) -> ECSResult<bool> {
        let Some((column, elements_offset, capacity)) = self.buffer_column::<T>(component_id) else {
            return Ok(false);
        };
        let slot = self.slot_range(column, row);
        let bytes = &mut self.bytes_mut()[slot];
        let len = buffer_len(bytes);
        if len >= capacity {
            return Err(ConfigurationError::BufferOverflow { component_id, capacity }.into());
        }
        // SAFETY: element `len` lies inside the slot and is aligned for `T`.
        unsafe {
            std::ptr::write(bytes.as_mut_ptr().add(elements_offset).cast::<T>().add(len), value);
        }
        bytes[..4].copy_from_slice(&((len + 1) as u32).to_ne_bytes());
        self.mark_changed(column, version);
        Ok(true)
    }

    /// Empties a buffer component at `row`.
    pub fn clear_buffer<T: Component>(&mut self, component_id: ComponentID, row: usize, version: Version) -> bool {
        let Some((column, _, _)) = self.buffer_column::<T>(component_id) else {
            return false;
        };
        let slot = self.slot_range(column, row);
        self.bytes_mut()[slot][..4].fill(0);
        self.mark_changed(column, version);
        true
    }

    fn buffer_column<T: Component>(&self, component_id: ComponentID) -> Option<(usize, usize, usize)> {
        let index = self.layout.column_index(component_id)?;
        let column = &self.layout.columns[index];
        match column.desc.kind {
            ComponentKind::Buffer { capacity, elements_offset, .. }
                if column.desc.type_id == TypeId::of::<T>() =>
            {
                Some((index, elements_offset, capacity))
            }
            _ => None,
        }
    }

    /// Appends a default-initialised row for `entity` and returns its index.
    ///
    /// ## Behavior
    /// - Every column slot receives its type's default bytes.
    /// - Every enable bit of the row is set.
    /// - The order version and all change versions are raised to `version`.

    pub(crate) fn push_row(&mut self, entity: Entity, version: Version) -> RowID {
        debug_assert!(!self.is_full());
        let row = self.count;
        self.set_entity(row, entity);

        let layout = Arc::clone(&self.layout);
        for (column, desc) in layout.columns.iter().enumerate().filter(|(_, c)| c.size > 0) {
            let slot = self.slot_range(column, row);
            desc.desc.write_default(&mut self.bytes_mut()[slot]);
        }
        {
            let mut enable = self.enable.write();
            for index in 0..layout.enableable_count() {
                enable.bits[index].set(row, true);
            }
        }

        self.count += 1;
        self.order_version = self.order_version.max(version);
        self.mark_all_changed(version);
        row as RowID
    }

    /// Removes `row` by moving the last live row into its place.
    ///
    /// Returns the entity that now occupies `row`, if a swap happened.

    pub(crate) fn swap_remove(&mut self, row: usize, version: Version) -> Option<Entity> {
        debug_assert!(row < self.count);
        let last = self.count - 1;

        {
            let mut enable = self.enable.write();
            for index in 0..self.layout.enableable_count() {
                // Drop the removed row's contribution, then carry the last row's bit down.
                if !enable.bits[index][row] {
                    enable.disabled[index] -= 1;
                }
                if row != last {
                    let moved = enable.bits[index][last];
                    enable.bits[index].set(row, moved);
                }
            }
        }

        let moved = if row != last {
            let layout = Arc::clone(&self.layout);
            let bytes = self.bytes_mut();
            bytes.copy_within(last * ENTITY_SIZE..(last + 1) * ENTITY_SIZE, row * ENTITY_SIZE);
            for column in layout.columns.iter().filter(|c| c.size > 0) {
                let from = column.offset + last * column.size;
                bytes.copy_within(from..from + column.size, column.offset + row * column.size);
            }
            Some(self.entities_all()[row])
        } else {
            None
        };

        self.count = last;
        self.order_version = self.order_version.max(version);
        moved
    }

    fn entities_all(&self) -> &[Entity] {
        // SAFETY: see `entities`; the identity column spans `capacity` rows.
        unsafe { std::slice::from_raw_parts(self.data.as_ptr().cast::<Entity>(), self.layout.capacity) }
    }

    /// Copies `row` into `snapshot` in this chunk's packed row format.
    pub fn read_row(&self, row: usize, snapshot: &mut RowSnapshot) {
        snapshot.bytes.clear();
        snapshot.enabled.clear();
        let bytes = self.bytes();
        for column in self.layout.columns.iter() {
            let start = column.offset + row * column.size;
            snapshot.bytes.extend_from_slice(&bytes[start..start + column.size]);
        }
        let enable = self.enable.read();
        snapshot.enabled.extend((0..self.layout.enableable_count()).map(|i| enable.get(i, row)));
    }

    /// Writes the columns this chunk shares with `source` from `snapshot` into `row`.
    ///
    /// ## Behavior
    /// - Types absent from `source` keep their defaults.
    /// - Enable bits of retained enableable types are copied; new ones stay set.

    pub fn write_row(&mut self, row: usize, snapshot: &RowSnapshot, source: &ArchetypeLayout) {
        let layout = Arc::clone(&self.layout);
        for (column, dst) in layout.columns.iter().enumerate() {
            let Some(src) = source.column(dst.component_id) else { continue };
            if dst.size > 0 && src.size == dst.size {
                let range = self.slot_range(column, row);
                self.bytes_mut()[range]
                    .copy_from_slice(&snapshot.bytes[src.row_offset..src.row_offset + src.size]);
            }
            if let (Some(dst_index), Some(src_index)) = (dst.enableable_index, src.enableable_index) {
                self.enable.write().set(dst_index, row, snapshot.enabled[src_index]);
            }
        }
    }

    /// Mutable bytes of one value slot; raises the column's change version.
    pub(crate) fn slot_mut(&mut self, component_id: ComponentID, row: usize, version: Version) -> Option<&mut [u8]> {
        let column = self.layout.column_index(component_id)?;
        self.mark_changed(column, version);
        let range = self.slot_range(column, row);
        Some(&mut self.bytes_mut()[range])
    }
}

#[inline]
fn buffer_len(slot: &[u8]) -> usize {
    let mut header = [0u8; 4];
    header.copy_from_slice(&slot[..4]);
    u32::from_ne_bytes(header) as usize
}
