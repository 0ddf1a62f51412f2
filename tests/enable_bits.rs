use std::sync::Once;

use ecs_chunks::engine::batch::{combined_mask, find_batches, Batch};
use ecs_chunks::engine::component::{
    component_id_of, freeze_components, register_component, register_enableable_component,
};
use ecs_chunks::engine::error::{ConfigurationError, ECSError, ReferentialError};
use ecs_chunks::engine::query::{QueryBuilder, QueryOptions};
use ecs_chunks::engine::store::EntityStore;
use ecs_chunks::engine::types::ComponentType;
use ecs_chunks::Entity;

#[derive(Clone, Copy, Debug, Default, PartialEq)]
struct Alive;

#[derive(Clone, Copy, Debug, Default, PartialEq)]
struct Hunger(u32);

#[derive(Clone, Copy, Debug, Default, PartialEq)]
struct Thirst(u16);

#[derive(Clone, Copy, Debug, Default, PartialEq)]
struct Plain(u32);

static INIT: Once = Once::new();

fn init() {
    INIT.call_once(|| {
        let _ = env_logger::builder().is_test(true).try_init();
        register_enableable_component::<Alive>().unwrap();
        register_component::<Hunger>().unwrap();
        register_enableable_component::<Thirst>().unwrap();
        register_component::<Plain>().unwrap();
        freeze_components();
    });
}

fn ty<T: 'static>() -> ComponentType {
    ComponentType::of::<T>().unwrap()
}

/// One full chunk of the reference archetype (1360 entities).
fn full_chunk(store: &mut EntityStore) -> Vec<Entity> {
    let entities = store.create_entities(&[ty::<Alive>(), ty::<Hunger>()], 1360).unwrap();
    let archetype = store.archetype_of(entities[0]).unwrap();
    assert_eq!(store.archetype(archetype).unwrap().chunk_count(), 1);
    entities
}

#[test]
fn find_batches_on_uniform_masks() {
    let n = 1360;
    let words = (n + 63) / 64;
    let all_on = vec![u64::MAX; words];
    assert_eq!(find_batches(&all_on, n), vec![Batch::new(0, n)]);

    let all_off = vec![0u64; words];
    assert!(find_batches(&all_off, n).is_empty());

    assert!(find_batches(&all_on, 0).is_empty());
}

#[test]
fn find_batches_splits_around_a_gap() {
    let n = 1360;
    let mut mask = vec![u64::MAX; (n + 63) / 64];
    mask[0] &= !(1 << 10);
    assert_eq!(find_batches(&mask, n), vec![Batch::new(0, 10), Batch::new(11, 1349)]);
}

#[test]
fn find_batches_runs_cross_word_boundaries() {
    // Rows 60..70 set: the run spans words 0 and 1.
    let mut mask = vec![0u64; 2];
    mask[0] = 0xF000_0000_0000_0000;
    mask[1] = 0x3F;
    assert_eq!(find_batches(&mask, 128), vec![Batch::new(60, 10)]);

    // A run reaching the last row of a non-multiple-of-64 count stops at the count.
    let mask = vec![u64::MAX; 2];
    assert_eq!(find_batches(&mask, 100), vec![Batch::new(0, 100)]);
}

#[test]
fn combined_mask_requires_enabled_and_disabled_sets() {
    let enabled = [0b1111u64];
    let disabled = [0b0110u64];
    let mask = combined_mask(&[&enabled[..]], &[&disabled[..]], 4);
    assert_eq!(mask, vec![0b1001]);
    assert_eq!(find_batches(&mask, 4), vec![Batch::new(0, 1), Batch::new(3, 1)]);
}

#[test]
fn disabling_index_10_yields_two_batches() {
    init();
    let mut store = EntityStore::new();
    let entities = full_chunk(&mut store);
    store.set_enabled::<Alive>(entities[10], false).unwrap();

    let query = store.create_query(&QueryBuilder::new().read::<Alive>().read::<Hunger>().build().unwrap()).unwrap();
    let batches: Vec<(usize, usize)> = store.query_batches(query).unwrap().iter().map(|b| (b.start, b.len)).collect();
    assert_eq!(batches, vec![(0, 10), (11, 1349)]);
    assert_eq!(store.calculate_entity_count(query).unwrap(), 1359);
    assert!(!store.query_entities(query).unwrap().contains(&entities[10]));
}

#[test]
fn setting_the_same_bit_twice_bumps_once() {
    init();
    let mut store = EntityStore::new();
    let e = store.create_entity(&[ty::<Alive>(), ty::<Hunger>()]).unwrap();
    let location = store.location(e).unwrap();
    let alive = component_id_of::<Alive>().unwrap();

    let first = store.advance_version();
    store.set_enabled::<Alive>(e, false).unwrap();
    let version = |store: &EntityStore| {
        store.chunk(location.archetype, location.chunk).unwrap().change_version_of(alive).unwrap()
    };
    assert_eq!(version(&store), first);

    let second = store.advance_version();
    store.set_enabled::<Alive>(e, false).unwrap();
    assert_eq!(version(&store), first);
    assert!(version(&store) < second);

    store.set_enabled::<Alive>(e, true).unwrap();
    assert_eq!(version(&store), second);
    assert!(store.is_enabled::<Alive>(e).unwrap());
}

#[test]
fn disabled_count_tracks_bits() {
    init();
    let mut store = EntityStore::new();
    let entities = full_chunk(&mut store);
    for &e in entities.iter().step_by(3) {
        store.set_enabled::<Alive>(e, false).unwrap();
    }
    let location = store.location(entities[0]).unwrap();
    let chunk = store.chunk(location.archetype, location.chunk).unwrap();
    let index = chunk.layout().enableable_index(component_id_of::<Alive>().unwrap()).unwrap();
    assert_eq!(chunk.disabled_count(index), (1360 + 2) / 3);
    store.check_internal_consistency().unwrap();
}

#[test]
fn enable_bits_require_an_enableable_type() {
    init();
    let mut store = EntityStore::new();
    let e = store.create_entity(&[ty::<Plain>(), ty::<Alive>()]).unwrap();
    let err = store.set_enabled::<Plain>(e, false).unwrap_err();
    assert!(matches!(err, ECSError::Configuration(ConfigurationError::WrongComponentKind { .. })));
    let err = store.set_enabled::<Hunger>(e, false).unwrap_err();
    assert!(matches!(err, ECSError::Referential(_)));
}

#[test]
fn destroy_keeps_other_entities_bits() {
    init();
    let mut store = EntityStore::new();
    let entities = full_chunk(&mut store);
    let disabled = |i: usize| i % 5 == 0 || i % 7 == 0;
    for (i, &e) in entities.iter().enumerate() {
        if disabled(i) {
            store.set_enabled::<Alive>(e, false).unwrap();
        }
        store.set_component(e, Hunger(i as u32)).unwrap();
    }

    // Middle, end, first, and a disabled one.
    let victims = [entities[700], entities[1359], entities[0], entities[35]];
    for &victim in &victims {
        store.destroy_entity(victim).unwrap();
        assert!(!store.is_alive(victim));
    }

    for (i, &e) in entities.iter().enumerate() {
        if victims.contains(&e) {
            continue;
        }
        assert_eq!(store.is_enabled::<Alive>(e).unwrap(), !disabled(i), "entity {i}");
        assert_eq!(store.get_component::<Hunger>(e).unwrap().0, i as u32);
    }
    store.check_internal_consistency().unwrap();
}

#[test]
fn disabled_clause_selects_only_disabled_rows() {
    init();
    let mut store = EntityStore::new();
    let entities = store.create_entities(&[ty::<Alive>(), ty::<Thirst>()], 100).unwrap();
    for &e in &entities[20..30] {
        store.set_enabled::<Alive>(e, false).unwrap();
    }
    store.set_enabled::<Thirst>(entities[25], false).unwrap();

    let dead = store
        .create_query(&QueryBuilder::new().disabled::<Alive>().read::<Thirst>().build().unwrap())
        .unwrap();
    let selected = store.query_entities(dead).unwrap();
    let mut expected: Vec<Entity> = entities[20..30].to_vec();
    expected.retain(|&e| e != entities[25]);
    assert_eq!(selected, expected);

    let ignoring = store
        .create_query(
            &QueryBuilder::new()
                .read::<Alive>()
                .options(QueryOptions::IGNORE_ENABLED_BITS)
                .build()
                .unwrap(),
        )
        .unwrap();
    assert_eq!(store.calculate_entity_count(ignoring).unwrap(), 100);
}

#[test]
fn disabled_clause_rejects_plain_types() {
    init();
    let mut store = EntityStore::new();
    let err = store
        .create_query(&QueryBuilder::new().disabled::<Hunger>().build().unwrap())
        .unwrap_err();
    assert_eq!(
        err,
        ECSError::Configuration(ConfigurationError::DisabledNotEnableable {
            component_id: component_id_of::<Hunger>().unwrap(),
        })
    );
}

#[test]
fn any_clause_ignores_enable_bits() {
    init();
    let mut store = EntityStore::new();
    let entities = store.create_entities(&[ty::<Thirst>()], 10).unwrap();
    store.set_enabled::<Thirst>(entities[3], false).unwrap();
    let query = store
        .create_query(&QueryBuilder::new().any::<Thirst>().any::<Plain>().build().unwrap())
        .unwrap();
    assert_eq!(store.calculate_entity_count(query).unwrap(), 10);
}

#[test]
fn query_wide_toggle_reports_changed_bits() {
    init();
    let mut store = EntityStore::new();
    let entities = store.create_entities(&[ty::<Alive>(), ty::<Plain>()], 50).unwrap();
    store.set_enabled::<Alive>(entities[7], false).unwrap();

    let query = store
        .create_query(
            &QueryBuilder::new()
                .read::<Plain>()
                .read::<Alive>()
                .options(QueryOptions::IGNORE_ENABLED_BITS)
                .build()
                .unwrap(),
        )
        .unwrap();
    assert_eq!(store.set_enabled_for_query::<Alive>(query, false).unwrap(), 49);
    assert_eq!(store.set_enabled_for_query::<Alive>(query, false).unwrap(), 0);
    assert!(entities.iter().all(|&e| !store.is_enabled::<Alive>(e).unwrap()));
}

#[test]
fn chunk_views_reject_rows_past_the_live_count() {
    init();
    let mut store = EntityStore::new();
    let entities = store.create_entities(&[ty::<Alive>(), ty::<Plain>()], 3).unwrap();
    let location = store.location(entities[0]).unwrap();
    let query = store
        .create_query(&QueryBuilder::new().read::<Alive>().read::<Plain>().build().unwrap())
        .unwrap();

    let mut results = Vec::new();
    store
        .for_each_chunk_mut(query, |view| {
            results.push(view.set_enabled::<Alive>(5, false));
            results.push(view.set_enabled::<Alive>(100_000, false));
            results.push(view.set_enabled::<Alive>(2, false));
        })
        .unwrap();
    let out_of_range = |row| {
        Err(ECSError::Referential(ReferentialError::RowOutOfRange {
            archetype: location.archetype,
            chunk: location.chunk,
            row,
            count: 3,
        }))
    };
    assert_eq!(results, vec![out_of_range(5), out_of_range(100_000), Ok(true)]);

    let mut reads = Vec::new();
    store
        .for_each_chunk(query, |view| {
            reads.push(view.is_enabled::<Alive>(3).is_err());
            reads.push(view.is_enabled::<Alive>(1).unwrap());
        })
        .unwrap();
    assert_eq!(reads, vec![true, true]);

    assert!(!store.is_enabled::<Alive>(entities[2]).unwrap());
    let chunk = store.chunk(location.archetype, location.chunk).unwrap();
    assert_eq!(chunk.disabled_count(0), 1);
    store.check_internal_consistency().unwrap();
}
