//! Interned shared-component values.
//!
//! Chunks never hold shared values directly; they hold a `u32` index into the
//! per-type value list kept here. Equal values intern to the same index, so a
//! chunk's shared-value identity reduces to comparing index arrays.
//!
//! Index 0 of every type is its default value. Values are never removed, which
//! keeps every index handed out stable for the lifetime of the store.

use std::any::Any;
use std::collections::HashMap;

use crate::engine::component::{SharedComponent, SharedVTable, require_description};
use crate::engine::error::{ConfigurationError, ECSResult};
use crate::engine::types::ComponentID;


struct SharedColumn {
    vtable: SharedVTable,
    values: Vec<Box<dyn Any + Send + Sync>>,
}

impl SharedColumn {
    fn position(&self, value: &dyn Any) -> Option<u32> {
        self.values
            .iter()
            .position(|v| (self.vtable.eq)(v.as_ref(), value))
            .map(|i| i as u32)
    }
}

/// Per-type interning table for shared component values.
#[derive(Default)]
pub struct SharedComponentStore {
    columns: HashMap<ComponentID, SharedColumn>,
}

impl SharedComponentStore {
    /// Creates an empty store.
    pub fn new() -> Self { Self::default() }

    fn column(&mut self, component_id: ComponentID) -> ECSResult<&mut SharedColumn> {
        if !self.columns.contains_key(&component_id) {
            let desc = require_description(component_id)?;
            let vtable = desc.shared_vtable().ok_or(ConfigurationError::WrongComponentKind {
                component_id,
                expected: "shared",
            })?;
            self.columns.insert(
                component_id,
                SharedColumn { vtable, values: vec![(vtable.default)()] },
            );
        }
        self.columns
            .get_mut(&component_id)
            .ok_or_else(|| ConfigurationError::UnregisteredComponent { name: "<shared>" }.into())
    }

    /// Returns the index of `value`, inserting it if it is new.
    pub fn intern<T: SharedComponent>(&mut self, component_id: ComponentID, value: T) -> ECSResult<u32> {
        let column = self.column(component_id)?;
        if let Some(index) = column.position(&value) {
            return Ok(index);
        }
        column.values.push(Box::new(value));
        Ok((column.values.len() - 1) as u32)
    }

    /// Returns the index of `value` without inserting.
    pub fn index_of<T: SharedComponent>(&self, component_id: ComponentID, value: &T) -> Option<u32> {
        let column = self.columns.get(&component_id)?;
        column.position(value)
    }

    /// Returns the value at `index`, or the default for types never interned.
    pub fn get<T: SharedComponent>(&self, component_id: ComponentID, index: u32) -> Option<&T> {
        match self.columns.get(&component_id) {
            Some(column) => column.values.get(index as usize)?.downcast_ref::<T>(),
            None => None,
        }
    }

    /// Makes sure the default value of `component_id` occupies index 0.
    pub fn ensure_type(&mut self, component_id: ComponentID) -> ECSResult<()> {
        self.column(component_id).map(|_| ())
    }

    /// Number of distinct values interned for `component_id`.
    pub fn value_count(&self, component_id: ComponentID) -> usize {
        self.columns.get(&component_id).map_or(0, |c| c.values.len())
    }
}
