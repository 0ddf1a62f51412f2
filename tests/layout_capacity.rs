use std::sync::Once;

use ecs_chunks::engine::component::{
    freeze_components, register_component, register_enableable_component, register_shared_component,
};
use ecs_chunks::engine::error::{ConfigurationError, ECSError};
use ecs_chunks::engine::store::EntityStore;
use ecs_chunks::engine::types::{ComponentType, CHUNK_PAYLOAD_SIZE, ENTITY_SIZE, MAX_SHARED_COMPONENTS};

#[derive(Clone, Copy, Debug, Default, PartialEq)]
struct Active;

#[derive(Clone, Copy, Debug, Default, PartialEq)]
struct Score(u32);

#[derive(Clone, Copy, Debug, Default, PartialEq)]
struct Position {
    x: f32,
    y: f32,
    z: f32,
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
struct Mass(f64);

#[derive(Clone, Copy, Debug, PartialEq)]
struct Big([u8; 9000]);

impl Default for Big {
    fn default() -> Self { Big([0; 9000]) }
}

#[derive(Clone, Copy, Debug, PartialEq)]
struct Bigger([u64; 1125]);

impl Default for Bigger {
    fn default() -> Self { Bigger([0; 1125]) }
}

macro_rules! shared_types {
    ($($name:ident),*) => {
        $(
            #[derive(Clone, Debug, Default, PartialEq)]
            struct $name(u32);
        )*
    };
}

shared_types!(S0, S1, S2, S3, S4, S5, S6, S7, S8, S9, S10, S11, S12, S13, S14, S15, S16);

static INIT: Once = Once::new();

fn init() {
    INIT.call_once(|| {
        let _ = env_logger::builder().is_test(true).try_init();
        register_enableable_component::<Active>().unwrap();
        register_component::<Score>().unwrap();
        register_component::<Position>().unwrap();
        register_component::<Mass>().unwrap();
        register_component::<Big>().unwrap();
        register_component::<Bigger>().unwrap();
        register_shared_component::<S0>().unwrap();
        register_shared_component::<S1>().unwrap();
        register_shared_component::<S2>().unwrap();
        register_shared_component::<S3>().unwrap();
        register_shared_component::<S4>().unwrap();
        register_shared_component::<S5>().unwrap();
        register_shared_component::<S6>().unwrap();
        register_shared_component::<S7>().unwrap();
        register_shared_component::<S8>().unwrap();
        register_shared_component::<S9>().unwrap();
        register_shared_component::<S10>().unwrap();
        register_shared_component::<S11>().unwrap();
        register_shared_component::<S12>().unwrap();
        register_shared_component::<S13>().unwrap();
        register_shared_component::<S14>().unwrap();
        register_shared_component::<S15>().unwrap();
        register_shared_component::<S16>().unwrap();
        freeze_components();
    });
}

fn ty<T: 'static>() -> ComponentType {
    ComponentType::of::<T>().unwrap()
}

#[test]
fn enableable_tag_with_u32_holds_1360_entities() {
    init();
    let store = EntityStore::new();
    let layout = store.layout_for_types(&[ty::<Active>(), ty::<Score>()]).unwrap();

    assert_eq!(layout.per_entity_bytes, ENTITY_SIZE + 4);
    assert_eq!(layout.capacity, 1360);
    assert_eq!(layout.enableable_count(), 1);
    let active = ecs_chunks::component_id_of::<Active>().unwrap();
    assert_eq!(layout.enableable_index(active), Some(0));
    assert_eq!(layout.column(active).unwrap().size, 0);
}

#[test]
fn capacity_is_tight_for_every_combination() {
    init();
    let store = EntityStore::new();
    let combinations: Vec<Vec<ComponentType>> = vec![
        vec![],
        vec![ty::<Score>()],
        vec![ty::<Active>()],
        vec![ty::<Position>()],
        vec![ty::<Mass>(), ty::<Score>()],
        vec![ty::<Position>(), ty::<Mass>(), ty::<Score>(), ty::<Active>()],
        vec![ty::<Big>()],
        vec![ty::<Bigger>()],
        vec![ty::<Score>(), ty::<S0>(), ty::<S1>()],
    ];

    for types in combinations {
        let layout = store.layout_for_types(&types).unwrap();
        let cost = layout.per_entity_bytes;
        assert!(layout.capacity >= 1);
        assert!(layout.capacity * cost <= CHUNK_PAYLOAD_SIZE, "{:?}", types);
        assert!(CHUNK_PAYLOAD_SIZE < (layout.capacity + 1) * cost, "{:?}", types);
    }
}

#[test]
fn columns_are_aligned_and_disjoint() {
    init();
    let store = EntityStore::new();
    let layout = store
        .layout_for_types(&[ty::<Score>(), ty::<Mass>(), ty::<Position>(), ty::<Active>()])
        .unwrap();

    let mut ranges: Vec<(usize, usize)> = vec![(0, layout.capacity * ENTITY_SIZE)];
    for column in layout.columns.iter().filter(|c| c.size > 0) {
        assert_eq!(column.offset % column.desc.align, 0);
        ranges.push((column.offset, column.offset + column.size * layout.capacity));
    }
    ranges.sort();
    for pair in ranges.windows(2) {
        assert!(pair[0].1 <= pair[1].0, "overlapping columns {:?}", pair);
    }
    assert!(ranges.last().unwrap().1 <= layout.arena_bytes);
}

#[test]
fn combination_over_budget_is_rejected_without_moving_anyone() {
    init();
    let mut store = EntityStore::new();
    let bigs = store.create_entities(&[ty::<Big>(), ty::<Score>()], 5).unwrap();
    let others = store.create_entities(&[ty::<Score>()], 5).unwrap();
    for (i, &e) in bigs.iter().enumerate() {
        store.set_component(e, Score(i as u32)).unwrap();
    }

    let before: Vec<_> = bigs.iter().chain(&others).map(|&e| store.location(e).unwrap()).collect();

    let everyone: Vec<_> = others.iter().chain(&bigs).copied().collect();
    let err = store.add_component_to_entities(&everyone, ty::<Bigger>()).unwrap_err();
    assert!(matches!(err, ECSError::Capacity(_)), "{err}");

    let after: Vec<_> = bigs.iter().chain(&others).map(|&e| store.location(e).unwrap()).collect();
    assert_eq!(before, after);
    for (i, &e) in bigs.iter().enumerate() {
        assert_eq!(*store.get_component::<Score>(e).unwrap(), Score(i as u32));
        assert!(!store.has_component::<Bigger>(e).unwrap());
    }
    store.check_internal_consistency().unwrap();
}

#[test]
fn creating_an_oversized_archetype_fails() {
    init();
    let mut store = EntityStore::new();
    let err = store.create_entity(&[ty::<Big>(), ty::<Bigger>()]).unwrap_err();
    match err {
        ECSError::Capacity(e) => {
            assert_eq!(e.per_entity_bytes, ENTITY_SIZE + 9000 + 9000);
            assert_eq!(e.budget, CHUNK_PAYLOAD_SIZE);
        }
        other => panic!("unexpected error {other}"),
    }
    assert_eq!(store.entity_count(), 0);
}

#[test]
fn shared_type_limit_is_enforced() {
    init();
    let mut store = EntityStore::new();
    let sixteen = vec![
        ty::<S0>(), ty::<S1>(), ty::<S2>(), ty::<S3>(), ty::<S4>(), ty::<S5>(), ty::<S6>(), ty::<S7>(),
        ty::<S8>(), ty::<S9>(), ty::<S10>(), ty::<S11>(), ty::<S12>(), ty::<S13>(), ty::<S14>(), ty::<S15>(),
    ];
    assert_eq!(sixteen.len(), MAX_SHARED_COMPONENTS);
    let e = store.create_entity(&sixteen).unwrap();
    // Shared types cost no per-entity bytes.
    assert_eq!(store.archetype(store.archetype_of(e).unwrap()).unwrap().layout().per_entity_bytes, ENTITY_SIZE);

    let err = store.add_component(e, ty::<S16>()).unwrap_err();
    assert_eq!(
        err,
        ECSError::Configuration(ConfigurationError::TooManySharedComponents {
            requested: MAX_SHARED_COMPONENTS + 1,
            max: MAX_SHARED_COMPONENTS,
        })
    );
    assert!(!store.has_component::<S16>(e).unwrap());
}

#[test]
fn entity_type_cannot_be_a_component() {
    init();
    let mut store = EntityStore::new();
    let err = store.create_entity(&[ty::<ecs_chunks::Entity>()]).unwrap_err();
    assert_eq!(err, ECSError::Configuration(ConfigurationError::EntityTypeAsComponent));
}

#[test]
fn same_type_per_entity_and_chunk_level_conflicts() {
    init();
    let mut store = EntityStore::new();
    let score = ty::<Score>();
    let chunk_score = ComponentType::chunk::<Score>().unwrap();
    let err = store.create_entity(&[score, chunk_score]).unwrap_err();
    assert_eq!(
        err,
        ECSError::Configuration(ConfigurationError::ConflictingCategory { component_id: score.component_id })
    );
}

#[test]
fn frozen_registry_rejects_new_types() {
    init();
    #[derive(Clone, Copy, Default)]
    struct Late;
    let err = register_component::<Late>().unwrap_err();
    assert_eq!(err, ECSError::Configuration(ConfigurationError::RegistryFrozen));
    // Re-registering a known type with the same kind still succeeds.
    assert!(register_component::<Score>().is_ok());
}
