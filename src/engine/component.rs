//! # Component Registry
//!
//! This module provides a global registry that assigns stable `ComponentID`
//! values to Rust component types and records the static metadata the chunk
//! layout needs: size, alignment, category and enableability.
//!
//! ## Categories
//! Every registration resolves, once, into a closed [`ComponentKind`]:
//!
//! | Kind | Column bytes per entity | Notes |
//! |---|---|---|
//! | `Value` | `size_of::<T>()` | plain unmanaged value |
//! | `Tag` | 0 | zero-sized marker |
//! | `Buffer` | header + capacity × element | fixed inline capacity |
//! | `Shared` | 0 | value lives in the shared store; chunk holds an index |
//! | `Cleanup` | `size_of::<T>()` | keeps a destroyed entity alive until removed |
//!
//! Chunk-level storage is not a kind: any `Value` or `Tag` type can be
//! requested with [`TypeModifier::ChunkLevel`](crate::engine::types::TypeModifier).
//! Enableability is an orthogonal flag on `Value`, `Tag` and `Buffer` kinds.
//!
//! ## Design
//! - Components are registered once and assigned a compact `ComponentID` in `[0, COMPONENT_CAP)`.
//! - A per-component writer function produces the default bytes of a new column slot.
//! - The registry can be `freeze()`d to prevent further registrations after setup.
//! - Builtin marker types occupy the first identifiers.
//!
//! ## Invariants
//! - `ComponentID` values are unique and stable for the lifetime of the process.
//! - Re-registering a type with the same kind is a no-op returning the existing ID.
//! - Re-registering a type with a different kind is a configuration error.

use std::{
    any::{Any, TypeId, type_name},
    collections::HashMap,
    mem::{align_of, size_of},
    sync::OnceLock,
};

use parking_lot::RwLock;

use crate::engine::entity::Entity;
use crate::engine::error::{ConfigurationError, ECSResult};
use crate::engine::types::{ArchetypeID, ChunkID, ComponentID, COMPONENT_CAP};


/// Plain, unmanaged per-entity data.
///
/// Components are copied bytewise between chunks, so they must be `Copy`;
/// new slots are initialised with `Default`.
pub trait Component: Copy + Default + Send + Sync + 'static {}

impl<T: Copy + Default + Send + Sync + 'static> Component for T {}

/// Data whose value is identical for every entity in a chunk.
pub trait SharedComponent: Clone + Default + PartialEq + Send + Sync + 'static {}

impl<T: Clone + Default + PartialEq + Send + Sync + 'static> SharedComponent for T {}

/// Back-reference carried by every meta-chunk entity.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct ChunkHeader {
    /// Archetype of the owning chunk.
    pub archetype: ArchetypeID,
    /// Chunk slot of the owning chunk.
    pub chunk: ChunkID,
}

/// Excludes an entity from queries unless requested.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Disabled;

/// Marks template entities; excluded from queries unless requested.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Prefab;

/// Marks system-owned entities; excluded from queries unless requested.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SystemInstance;

/// Marks a destroyed entity kept alive by its cleanup components.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CleanupEntity;

/// Reserved ID of the implicit entity-identity type.
pub const ENTITY_COMPONENT_ID: ComponentID = 0;
/// ID of [`ChunkHeader`].
pub const CHUNK_HEADER_ID: ComponentID = 1;
/// ID of [`Disabled`].
pub const DISABLED_ID: ComponentID = 2;
/// ID of [`Prefab`].
pub const PREFAB_ID: ComponentID = 3;
/// ID of [`SystemInstance`].
pub const SYSTEM_INSTANCE_ID: ComponentID = 4;
/// ID of [`CleanupEntity`].
pub const CLEANUP_ENTITY_ID: ComponentID = 5;

/// Writes the default value of a component into a column slot.
type DefaultFn = fn(&mut [u8]);

/// Creates the default value of a shared component.
type SharedDefaultFn = fn() -> Box<dyn Any + Send + Sync>;

/// Compares two shared component values of the same type.
type SharedEqFn = fn(&dyn Any, &dyn Any) -> bool;

/// Closed set of component categories, resolved at registration time.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ComponentKind {
    /// Plain value stored in a chunk column.
    Value,
    /// Zero-sized marker with no column storage.
    Tag,
    /// Fixed-capacity inline buffer of elements.
    Buffer {
        /// Maximum number of elements per entity.
        capacity: usize,
        /// Size of one element.
        element_size: usize,
        /// Byte offset of the first element inside the slot.
        elements_offset: usize,
    },
    /// Chunk-wide value stored outside the chunk.
    Shared,
    /// Value that outlives entity destruction until explicitly removed.
    Cleanup,
}

impl ComponentKind {
    /// Human-readable category name used in errors.
    pub fn name(&self) -> &'static str {
        match self {
            ComponentKind::Value => "value",
            ComponentKind::Tag => "tag",
            ComponentKind::Buffer { .. } => "buffer",
            ComponentKind::Shared => "shared",
            ComponentKind::Cleanup => "cleanup",
        }
    }
}

/// Type-erased hooks for shared component values.
#[derive(Clone, Copy)]
pub struct SharedVTable {
    /// Produces the default value.
    pub default: SharedDefaultFn,
    /// Equality between two values of the registered type.
    pub eq: SharedEqFn,
}

/// Describes a registered component type.
///
/// ## Fields
/// - `component_id`: The runtime identifier assigned by the registry.
/// - `name`: The Rust type name (`type_name::<T>()`).
/// - `type_id`: The runtime `TypeId` for the component.
/// - `size`: Column bytes per entity (0 for tags and shared components).
/// - `align`: Column alignment in bytes.
/// - `kind`: Category resolved at registration.
/// - `enableable`: Whether per-entity enable bits are tracked.

#[derive(Copy, Clone)]
pub struct ComponentDesc {
    /// Runtime identifier assigned to this component type.
    pub component_id: ComponentID,

    /// Rust type name for diagnostics.
    pub name: &'static str,

    /// Runtime `TypeId` of the component.
    pub type_id: TypeId,

    /// Column bytes per entity.
    pub size: usize,

    /// Column alignment in bytes.
    pub align: usize,

    /// Registered category.
    pub kind: ComponentKind,

    /// Per-entity enable bits are tracked for this type.
    pub enableable: bool,

    default_fn: Option<DefaultFn>,

    shared: Option<SharedVTable>,
}

impl ComponentDesc {

    fn value<T: Component>(kind: ComponentKind, enableable: bool) -> Self {
        let (size, default_fn) = if size_of::<T>() == 0 {
            (0, None)
        } else {
            (size_of::<T>(), Some(write_default::<T> as DefaultFn))
        };
        Self {
            component_id: 0,
            name: type_name::<T>(),
            type_id: TypeId::of::<T>(),
            size,
            align: align_of::<T>(),
            kind,
            enableable,
            default_fn,
            shared: None,
        }
    }

    fn buffer<T: Component>(capacity: usize, enableable: bool) -> Self {
        let element_size = size_of::<T>();
        let align = align_of::<T>().max(align_of::<u32>());
        let elements_offset = round_up(size_of::<u32>(), align_of::<T>());
        let size = round_up(elements_offset + capacity * element_size, align);
        Self {
            component_id: 0,
            name: type_name::<T>(),
            type_id: TypeId::of::<T>(),
            size,
            align,
            kind: ComponentKind::Buffer { capacity, element_size, elements_offset },
            enableable,
            default_fn: Some(write_empty_buffer as DefaultFn),
            shared: None,
        }
    }

    fn shared<T: SharedComponent>() -> Self {
        Self {
            component_id: 0,
            name: type_name::<T>(),
            type_id: TypeId::of::<T>(),
            size: 0,
            align: 1,
            kind: ComponentKind::Shared,
            enableable: false,
            default_fn: None,
            shared: Some(SharedVTable {
                default: shared_default::<T>,
                eq: shared_eq::<T>,
            }),
        }
    }

    /// Returns a copy of this descriptor with `component_id` set to the provided value.
    #[inline]
    pub fn with_id(mut self, component_id: ComponentID) -> Self {
        self.component_id = component_id;
        self
    }

    /// Returns `true` for shared components.
    #[inline]
    pub fn is_shared(&self) -> bool {
        self.kind == ComponentKind::Shared
    }

    /// Returns `true` for cleanup components.
    #[inline]
    pub fn is_cleanup(&self) -> bool {
        self.kind == ComponentKind::Cleanup
    }

    /// Writes the default value into `slot`, which must be exactly `size` bytes.
    #[inline]
    pub fn write_default(&self, slot: &mut [u8]) {
        debug_assert_eq!(slot.len(), self.size);
        match self.default_fn {
            Some(f) => f(slot),
            None => slot.fill(0),
        }
    }

    /// Shared-value hooks; `None` unless `kind == Shared`.
    #[inline]
    pub fn shared_vtable(&self) -> Option<SharedVTable> {
        self.shared
    }

    fn same_registration(&self, other: &ComponentDesc) -> bool {
        self.kind == other.kind && self.enableable == other.enableable
    }
}

impl std::fmt::Debug for SharedVTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SharedVTable")
    }
}

impl std::fmt::Debug for ComponentDesc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComponentDesc")
            .field("component_id", &self.component_id)
            .field("name", &self.name)
            .field("size", &self.size)
            .field("align", &self.align)
            .field("kind", &self.kind)
            .field("enableable", &self.enableable)
            .finish()
    }
}

impl std::fmt::Display for ComponentDesc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "ComponentDesc {{ id: {}, name: {}, kind: {}, size: {}, align: {}, enableable: {} }}",
            self.component_id, self.name, self.kind.name(), self.size, self.align, self.enableable
        )
    }
}

#[inline]
pub(crate) const fn round_up(value: usize, align: usize) -> usize {
    (value + align - 1) / align * align
}

fn write_default<T: Component>(slot: &mut [u8]) {
    debug_assert_eq!(slot.len(), size_of::<T>());
    debug_assert_eq!(slot.as_ptr() as usize % align_of::<T>(), 0);
    // SAFETY: the slot is `size_of::<T>()` bytes at an offset aligned for `T`
    // (guaranteed by the archetype layout) and `T: Copy` has no drop glue.
    unsafe { std::ptr::write(slot.as_mut_ptr().cast::<T>(), T::default()) }
}

fn write_empty_buffer(slot: &mut [u8]) {
    slot.fill(0);
}

fn shared_default<T: SharedComponent>() -> Box<dyn Any + Send + Sync> {
    Box::new(T::default())
}

fn shared_eq<T: SharedComponent>(a: &dyn Any, b: &dyn Any) -> bool {
    match (a.downcast_ref::<T>(), b.downcast_ref::<T>()) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}

/// Global mapping between Rust component types and compact `ComponentID` values.
///
/// ## Design
/// - `by_type` maps `TypeId -> ComponentID`.
/// - `by_id` stores `ComponentDesc` indexed by `ComponentID`.
/// - `next_id` assigns new IDs sequentially until `COMPONENT_CAP`.
/// - `frozen` prevents further registration once the store is initialized.
///
/// ## Invariants
/// - Every entry in `by_type` has a matching `by_id[id]`.
/// - IDs are always in bounds of `COMPONENT_CAP`.

pub struct ComponentRegistry {
    next_id: ComponentID,
    by_type: HashMap<TypeId, ComponentID>,
    by_id: Vec<Option<ComponentDesc>>,
    frozen: bool,
}

static REGISTRY: OnceLock<RwLock<ComponentRegistry>> = OnceLock::new();

fn component_registry() -> &'static RwLock<ComponentRegistry> {
    REGISTRY.get_or_init(|| RwLock::new(ComponentRegistry::new()))
}

impl Default for ComponentRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ComponentRegistry {

    /// Creates a registry holding only the builtin types.
    pub fn new() -> Self {
        let mut registry = Self {
            next_id: 0,
            by_type: HashMap::new(),
            by_id: vec![None; COMPONENT_CAP],
            frozen: false,
        };

        // Builtins claim fixed IDs in declaration order; the registry is empty
        // and unfrozen here, so none of these can fail.
        let builtins = [
            ComponentDesc::value::<Entity>(ComponentKind::Value, false),
            ComponentDesc::value::<ChunkHeader>(ComponentKind::Value, false),
            ComponentDesc::value::<Disabled>(ComponentKind::Tag, false),
            ComponentDesc::value::<Prefab>(ComponentKind::Tag, false),
            ComponentDesc::value::<SystemInstance>(ComponentKind::Tag, false),
            ComponentDesc::value::<CleanupEntity>(ComponentKind::Tag, false),
        ];
        for desc in builtins {
            let id = registry.next_id;
            registry.next_id += 1;
            registry.by_type.insert(desc.type_id, id);
            registry.by_id[id as usize] = Some(desc.with_id(id));
        }
        debug_assert_eq!(registry.next_id, CLEANUP_ENTITY_ID + 1);
        registry
    }

    /// Allocates a new `ComponentID`.
    fn alloc_id(&mut self) -> ECSResult<ComponentID> {
        let component_id = self.next_id;
        if (component_id as usize) >= COMPONENT_CAP {
            return Err(ConfigurationError::RegistryFull.into());
        }
        self.next_id = component_id + 1;
        Ok(component_id)
    }

    /// Freezes the registry, preventing further component registrations.
    pub fn freeze(&mut self) { self.frozen = true; }

    /// Number of registered types, builtins included.
    pub fn len(&self) -> usize { self.next_id as usize }

    /// Always `false`: builtins are registered on construction.
    pub fn is_empty(&self) -> bool { self.next_id == 0 }

    /// Returns the `ComponentID` associated with a `TypeId`, if registered.
    pub fn component_id_of_type_id(&self, type_id: TypeId) -> Option<ComponentID> {
        self.by_type.get(&type_id).copied()
    }

    /// Returns the component descriptor for a `ComponentID`, if registered.
    pub fn description_by_component_id(&self, component_id: ComponentID) -> Option<&ComponentDesc> {
        self.by_id.get(component_id as usize).and_then(|o| o.as_ref())
    }

    /// Registers a descriptor, or returns the existing ID for an identical registration.
    ///
    /// ## Errors
    /// - `WrongComponentKind` if the type is registered with another kind.
    /// - `RegistryFrozen` for new types after `freeze`.
    /// - `RegistryFull` once `COMPONENT_CAP` types exist.

    pub fn register_desc(&mut self, desc: ComponentDesc) -> ECSResult<ComponentID> {
        if let Some(&existing) = self.by_type.get(&desc.type_id) {
            if existing == ENTITY_COMPONENT_ID {
                return Err(ConfigurationError::EntityTypeAsComponent.into());
            }
            let current = self.by_id[existing as usize]
                .as_ref()
                .ok_or_else(|| ConfigurationError::UnregisteredComponent { name: desc.name })?;
            if !current.same_registration(&desc) {
                return Err(ConfigurationError::WrongComponentKind {
                    component_id: existing,
                    expected: desc.kind.name(),
                }
                .into());
            }
            return Ok(existing);
        }

        if self.frozen {
            return Err(ConfigurationError::RegistryFrozen.into());
        }
        let id = self.alloc_id()?;
        self.by_type.insert(desc.type_id, id);
        self.by_id[id as usize] = Some(desc.with_id(id));
        log::debug!("registered component {}", desc.with_id(id));
        Ok(id)
    }

    /// Registers `T` as a value (or tag, when zero-sized) component.
    pub fn register<T: Component>(&mut self) -> ECSResult<ComponentID> {
        self.register_desc(ComponentDesc::value::<T>(value_kind::<T>(), false))
    }

    /// Registers `T` as an enableable value (or tag) component.
    pub fn register_enableable<T: Component>(&mut self) -> ECSResult<ComponentID> {
        self.register_desc(ComponentDesc::value::<T>(value_kind::<T>(), true))
    }

    /// Registers `T` as a shared component.
    pub fn register_shared<T: SharedComponent>(&mut self) -> ECSResult<ComponentID> {
        self.register_desc(ComponentDesc::shared::<T>())
    }

    /// Registers `T` as the element of a buffer component with inline `capacity`.
    pub fn register_buffer<T: Component>(&mut self, capacity: usize, enableable: bool) -> ECSResult<ComponentID> {
        self.register_desc(ComponentDesc::buffer::<T>(capacity, enableable))
    }

    /// Registers `T` as a cleanup component.
    pub fn register_cleanup<T: Component>(&mut self) -> ECSResult<ComponentID> {
        self.register_desc(ComponentDesc::value::<T>(ComponentKind::Cleanup, false))
    }

    /// Returns the `ComponentID` for `T`, if registered.
    pub fn id_of<T: 'static>(&self) -> Option<ComponentID> {
        self.component_id_of_type_id(TypeId::of::<T>())
    }
}

fn value_kind<T>() -> ComponentKind {
    if size_of::<T>() == 0 { ComponentKind::Tag } else { ComponentKind::Value }
}

/// Registers `T` as a value component (a tag when zero-sized) in the global registry.
pub fn register_component<T: Component>() -> ECSResult<ComponentID> {
    component_registry().write().register::<T>()
}

/// Registers `T` as an enableable component in the global registry.
pub fn register_enableable_component<T: Component>() -> ECSResult<ComponentID> {
    component_registry().write().register_enableable::<T>()
}

/// Registers `T` as a shared component in the global registry.
pub fn register_shared_component<T: SharedComponent>() -> ECSResult<ComponentID> {
    component_registry().write().register_shared::<T>()
}

/// Registers a buffer of `T` with the given inline capacity in the global registry.
pub fn register_buffer_component<T: Component>(capacity: usize) -> ECSResult<ComponentID> {
    component_registry().write().register_buffer::<T>(capacity, false)
}

/// Registers `T` as a cleanup component in the global registry.
pub fn register_cleanup_component<T: Component>() -> ECSResult<ComponentID> {
    component_registry().write().register_cleanup::<T>()
}

/// Freezes the global component registry.
pub fn freeze_components() {
    component_registry().write().freeze();
}

/// Returns the registered `ComponentID` for type `T`.
///
/// ## Errors
/// - `UnregisteredComponent` if `T` was never registered.

pub fn component_id_of<T: 'static>() -> ECSResult<ComponentID> {
    component_registry()
        .read()
        .id_of::<T>()
        .ok_or_else(|| ConfigurationError::UnregisteredComponent { name: type_name::<T>() }.into())
}

/// Returns the `ComponentID` associated with a runtime `TypeId`, if registered.
pub fn component_id_of_type_id(type_id: TypeId) -> Option<ComponentID> {
    component_registry().read().component_id_of_type_id(type_id)
}

/// Returns a copy of the descriptor for `component_id`, if registered.
pub fn component_description_by_component_id(component_id: ComponentID) -> Option<ComponentDesc> {
    component_registry().read().description_by_component_id(component_id).copied()
}

/// Returns the descriptor for `component_id` or an `UnregisteredComponent` error.
pub(crate) fn require_description(component_id: ComponentID) -> ECSResult<ComponentDesc> {
    component_description_by_component_id(component_id)
        .ok_or_else(|| ConfigurationError::UnregisteredComponent { name: "<unknown id>" }.into())
}
