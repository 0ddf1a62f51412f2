#![allow(dead_code)]

use std::sync::Once;

use ecs_chunks::engine::component::{
    freeze_components, register_component, register_enableable_component, register_shared_component,
};
use ecs_chunks::engine::error::ECSResult;
use ecs_chunks::engine::store::EntityStore;
use ecs_chunks::engine::types::ComponentType;
use ecs_chunks::Entity;

pub const AGENTS_SMALL: usize = 10_000;
pub const AGENTS_MED: usize = 100_000;
pub const AGENTS_LARGE: usize = 1_000_000;

#[derive(Clone, Copy, Default)]
pub struct Position {
    pub x: f32,
    pub y: f32,
}

#[derive(Clone, Copy, Default)]
pub struct Wealth {
    pub value: f32,
}

#[derive(Clone, Copy, Default)]
pub struct Productivity {
    pub rate: f32,
}

/// Enableable marker toggled by the iteration benches.
#[derive(Clone, Copy, Default)]
pub struct Employed;

#[derive(Clone, Copy, Default)]
pub struct Taxed;

#[derive(Clone, Default, PartialEq)]
pub struct Market(pub u32);

static INIT: Once = Once::new();

pub fn init_components() {
    INIT.call_once(|| {
        register_component::<Position>().expect("register Position");
        register_component::<Wealth>().expect("register Wealth");
        register_component::<Productivity>().expect("register Productivity");
        register_component::<Taxed>().expect("register Taxed");
        register_enableable_component::<Employed>().expect("register Employed");
        register_shared_component::<Market>().expect("register Market");
        freeze_components();
    });
}

pub fn ty<T: 'static>() -> ComponentType {
    ComponentType::of::<T>().expect("component registered")
}

pub fn agent_types() -> [ComponentType; 4] {
    [ty::<Position>(), ty::<Wealth>(), ty::<Productivity>(), ty::<Employed>()]
}

/// Spawns `agent_count` agents; every tenth one is unemployed.
pub fn populate(store: &mut EntityStore, agent_count: usize) -> ECSResult<Vec<Entity>> {
    let agents = store.create_entities(&agent_types(), agent_count)?;
    for (i, &agent) in agents.iter().enumerate() {
        store.set_component(agent, Wealth { value: 100.0 })?;
        store.set_component(agent, Productivity { rate: 1.0 + (i % 7) as f32 })?;
        if i % 10 == 0 {
            store.set_enabled::<Employed>(agent, false)?;
        }
    }
    Ok(agents)
}

pub fn make_store(agent_count: usize) -> (EntityStore, Vec<Entity>) {
    let mut store = EntityStore::new();
    let agents = populate(&mut store, agent_count).expect("populate failed");
    (store, agents)
}
