use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Once;

use ecs_chunks::engine::component::{
    component_id_of, freeze_components, register_component, register_enableable_component, register_shared_component,
    Disabled, Prefab, SystemInstance,
};
use ecs_chunks::engine::error::{ConfigurationError, ECSError, ReferentialError};
use ecs_chunks::engine::query::{EntityQueryDesc, QueryBuilder, QueryOptions};
use ecs_chunks::engine::store::EntityStore;
use ecs_chunks::engine::types::{ComponentType, MAX_ENABLEABLE_PER_QUERY};

#[derive(Clone, Copy, Debug, Default, PartialEq)]
struct Pos(f32, f32);

#[derive(Clone, Copy, Debug, Default, PartialEq)]
struct Vel(f32, f32);

#[derive(Clone, Copy, Debug, Default, PartialEq)]
struct Frozen;

#[derive(Clone, Copy, Debug, Default, PartialEq)]
struct Health(u32);

#[derive(Clone, Debug, Default, PartialEq)]
struct Faction(u8);

macro_rules! enableable_types {
    ($($name:ident),*) => {
        $(
            #[derive(Clone, Copy, Debug, Default, PartialEq)]
            struct $name;
        )*
    };
}

enableable_types!(E0, E1, E2, E3, E4, E5, E6, E7, E8);

static INIT: Once = Once::new();

fn init() {
    INIT.call_once(|| {
        let _ = env_logger::builder().is_test(true).try_init();
        register_component::<Pos>().unwrap();
        register_component::<Vel>().unwrap();
        register_component::<Frozen>().unwrap();
        register_enableable_component::<Health>().unwrap();
        register_shared_component::<Faction>().unwrap();
        register_enableable_component::<E0>().unwrap();
        register_enableable_component::<E1>().unwrap();
        register_enableable_component::<E2>().unwrap();
        register_enableable_component::<E3>().unwrap();
        register_enableable_component::<E4>().unwrap();
        register_enableable_component::<E5>().unwrap();
        register_enableable_component::<E6>().unwrap();
        register_enableable_component::<E7>().unwrap();
        register_enableable_component::<E8>().unwrap();
        freeze_components();
    });
}

fn ty<T: 'static>() -> ComponentType {
    ComponentType::of::<T>().unwrap()
}

fn assert_cache_matches_scan(store: &EntityStore, query: ecs_chunks::QueryId) {
    store.update_query_cache(query).unwrap();
    assert!(store.is_query_cache_valid(query).unwrap());
    assert_eq!(store.cached_chunks(query).unwrap(), store.uncached_chunks(query).unwrap());
}

#[test]
fn cache_tracks_chunk_creation_and_release() {
    init();
    let mut store = EntityStore::new();
    let query = store.create_query(&QueryBuilder::new().read::<Pos>().build().unwrap()).unwrap();
    assert!(!store.is_query_cache_valid(query).unwrap());
    assert_cache_matches_scan(&store, query);
    assert!(store.cached_chunks(query).unwrap().is_empty());

    let capacity = store.layout_for_types(&[ty::<Pos>()]).unwrap().capacity;
    let first = store.create_entities(&[ty::<Pos>()], capacity - 1).unwrap();
    assert!(!store.is_query_cache_valid(query).unwrap());
    assert_cache_matches_scan(&store, query);

    // Filling the existing chunk adds no chunk.
    let last = store.create_entity(&[ty::<Pos>()]).unwrap();
    assert!(store.is_query_cache_valid(query).unwrap());

    // The next entity needs a second chunk.
    let overflow = store.create_entity(&[ty::<Pos>()]).unwrap();
    assert!(!store.is_query_cache_valid(query).unwrap());
    assert_cache_matches_scan(&store, query);
    assert_eq!(store.cached_chunks(query).unwrap().len(), 2);

    // Emptying the second chunk releases it.
    store.destroy_entity(overflow).unwrap();
    assert!(!store.is_query_cache_valid(query).unwrap());
    assert_cache_matches_scan(&store, query);
    assert_eq!(store.cached_chunks(query).unwrap().len(), 1);

    // Destroying inside a chunk that survives keeps the cache.
    store.destroy_entity(first[3]).unwrap();
    assert!(store.is_query_cache_valid(query).unwrap());
    assert_eq!(store.calculate_entity_count(query).unwrap(), capacity - 1);
    assert!(store.is_alive(last));
}

#[test]
fn toggling_enable_bits_keeps_the_cache() {
    init();
    let mut store = EntityStore::new();
    let types = [ty::<Pos>(), ty::<Health>()];
    let capacity = store.layout_for_types(&types).unwrap().capacity;
    let entities = store.create_entities(&types, capacity + 10).unwrap();
    let healthy = store.create_query(&QueryBuilder::new().read::<Pos>().read::<Health>().build().unwrap()).unwrap();
    assert_cache_matches_scan(&store, healthy);
    let cached = store.cached_chunks(healthy).unwrap();
    assert_eq!(cached.len(), 2);

    // Per entity, including every row of the second chunk.
    store.set_enabled::<Health>(entities[0], false).unwrap();
    for &e in &entities[capacity..] {
        store.set_enabled::<Health>(e, false).unwrap();
    }
    assert!(store.is_query_cache_valid(healthy).unwrap());
    assert_eq!(store.cached_chunks(healthy).unwrap(), cached);
    assert_eq!(store.cached_chunks(healthy).unwrap(), store.uncached_chunks(healthy).unwrap());
    assert_eq!(store.calculate_chunk_count(healthy).unwrap(), 1);
    assert_eq!(store.calculate_entity_count(healthy).unwrap(), capacity - 1);

    // Query-wide, in both directions.
    let everyone = store
        .create_query(
            &QueryBuilder::new()
                .read::<Health>()
                .options(QueryOptions::IGNORE_ENABLED_BITS)
                .build()
                .unwrap(),
        )
        .unwrap();
    store.update_query_cache(everyone).unwrap();
    assert_eq!(store.set_enabled_for_query::<Health>(everyone, true).unwrap(), 11);
    assert_eq!(store.set_enabled_for_query::<Health>(healthy, false).unwrap(), capacity + 10);
    assert!(store.is_query_cache_valid(healthy).unwrap());
    assert!(store.is_query_cache_valid(everyone).unwrap());
    assert_eq!(store.cached_chunks(healthy).unwrap(), cached);
    assert_eq!(store.cached_chunks(healthy).unwrap(), store.uncached_chunks(healthy).unwrap());
    assert_eq!(store.calculate_entity_count(healthy).unwrap(), 0);
}

#[test]
fn new_matching_archetypes_invalidate_the_cache() {
    init();
    let mut store = EntityStore::new();
    store.create_entities(&[ty::<Pos>()], 10).unwrap();
    let query = store.create_query(&QueryBuilder::new().read::<Pos>().build().unwrap()).unwrap();
    assert_cache_matches_scan(&store, query);

    // A non-matching archetype leaves it alone.
    store.create_entity(&[ty::<Vel>()]).unwrap();
    assert!(store.is_query_cache_valid(query).unwrap());

    store.create_entity(&[ty::<Pos>(), ty::<Vel>()]).unwrap();
    assert!(!store.is_query_cache_valid(query).unwrap());
    assert_cache_matches_scan(&store, query);
    assert_eq!(store.matching_archetypes(query).unwrap().len(), 2);
    assert_eq!(store.calculate_entity_count(query).unwrap(), 11);
    assert_eq!(store.calculate_chunk_count(query).unwrap(), 2);
}

#[test]
fn moves_invalidate_both_archetypes() {
    init();
    let mut store = EntityStore::new();
    let entities = store.create_entities(&[ty::<Pos>()], 10).unwrap();
    store.create_entity(&[ty::<Pos>(), ty::<Vel>()]).unwrap();
    let query = store.create_query(&QueryBuilder::new().read::<Pos>().build().unwrap()).unwrap();
    assert_cache_matches_scan(&store, query);

    store.add_component(entities[0], ty::<Vel>()).unwrap();
    assert!(!store.is_query_cache_valid(query).unwrap());
    assert_cache_matches_scan(&store, query);
}

#[test]
fn descriptors_round_trip() {
    init();
    let mut store = EntityStore::new();
    let descs = QueryBuilder::new()
        .read::<Pos>()
        .write::<Vel>()
        .any::<Health>()
        .none::<Frozen>()
        .options(QueryOptions::INCLUDE_PREFAB)
        .or()
        .write::<Health>()
        .absent::<Pos>()
        .build()
        .unwrap();
    let normalized: Vec<EntityQueryDesc> = descs.iter().cloned().map(EntityQueryDesc::normalized).collect();

    let query = store.create_query(&descs).unwrap();
    assert_eq!(store.query_desc(query).unwrap(), normalized);

    // Duplicates collapse to the stronger access.
    let dup = vec![EntityQueryDesc {
        all: vec![ComponentType::read::<Pos>().unwrap(), ComponentType::write::<Pos>().unwrap()],
        ..Default::default()
    }];
    store.set_query_desc(query, &dup).unwrap();
    let back = store.query_desc(query).unwrap();
    assert_eq!(back[0].all, vec![ComponentType::write::<Pos>().unwrap()]);
    store.set_query_desc(query, &back).unwrap();
    assert_eq!(store.query_desc(query).unwrap(), back);
}

#[test]
fn released_queries_are_referential_errors() {
    init();
    let mut store = EntityStore::new();
    let query = store.create_query(&QueryBuilder::new().read::<Pos>().build().unwrap()).unwrap();
    store.release_query(query).unwrap();

    let released = ECSError::Referential(ReferentialError::QueryReleased(query));
    assert_eq!(store.query_entities(query).unwrap_err(), released);
    assert_eq!(store.is_query_cache_valid(query).unwrap_err(), released);
    assert_eq!(store.release_query(query).unwrap_err(), released);

    let reused = store.create_query(&QueryBuilder::new().read::<Vel>().build().unwrap()).unwrap();
    assert_eq!(reused.index, query.index);
    assert_ne!(reused, query);
    assert_eq!(store.query_desc(query).unwrap_err(), released);
    assert!(store.query_desc(reused).is_ok());
}

#[test]
fn clause_validation() {
    init();
    let mut store = EntityStore::new();
    assert_eq!(
        store.create_query(&[]).unwrap_err(),
        ECSError::Configuration(ConfigurationError::EmptyQuery)
    );

    let conflicting = QueryBuilder::new().read::<Pos>().none::<Pos>().build().unwrap();
    assert!(matches!(
        store.create_query(&conflicting).unwrap_err(),
        ECSError::Configuration(ConfigurationError::ConflictingCategory { .. })
    ));

    let wide = QueryBuilder::new()
        .read::<E0>().read::<E1>().read::<E2>().read::<E3>()
        .read::<E4>().read::<E5>().read::<E6>().read::<E7>()
        .read::<E8>()
        .build()
        .unwrap();
    assert_eq!(
        store.create_query(&wide).unwrap_err(),
        ECSError::Configuration(ConfigurationError::TooManyEnableableComponents {
            requested: MAX_ENABLEABLE_PER_QUERY + 1,
            max: MAX_ENABLEABLE_PER_QUERY,
        })
    );

    #[derive(Clone, Copy, Default)]
    struct Unknown;
    assert!(matches!(
        QueryBuilder::new().read::<Pos>().read::<Unknown>().build().unwrap_err(),
        ECSError::Configuration(ConfigurationError::UnregisteredComponent { .. })
    ));
}

#[test]
fn any_none_absent_and_alternatives() {
    init();
    let mut store = EntityStore::new();
    let p = store.create_entity(&[ty::<Pos>()]).unwrap();
    let pv = store.create_entity(&[ty::<Pos>(), ty::<Vel>()]).unwrap();
    let pf = store.create_entity(&[ty::<Pos>(), ty::<Frozen>()]).unwrap();
    let v = store.create_entity(&[ty::<Vel>()]).unwrap();
    let h = store.create_entity(&[ty::<Health>()]).unwrap();

    let selected = |store: &mut EntityStore, descs: Vec<EntityQueryDesc>| -> HashSet<ecs_chunks::Entity> {
        let query = store.create_query(&descs).unwrap();
        store.query_entities(query).unwrap().into_iter().collect()
    };

    let any = selected(&mut store, QueryBuilder::new().any::<Vel>().any::<Frozen>().build().unwrap());
    assert_eq!(any, HashSet::from([pv, pf, v]));

    let none = selected(&mut store, QueryBuilder::new().read::<Pos>().none::<Frozen>().build().unwrap());
    assert_eq!(none, HashSet::from([p, pv]));

    let absent = selected(&mut store, QueryBuilder::new().read::<Pos>().absent::<Vel>().build().unwrap());
    assert_eq!(absent, HashSet::from([p, pf]));

    let either = selected(&mut store, QueryBuilder::new().read::<Vel>().or().read::<Health>().build().unwrap());
    assert_eq!(either, HashSet::from([pv, v, h]));

    let raw = selected(
        &mut store,
        QueryBuilder::new().with_type(ComponentType::write::<Vel>().unwrap()).read::<Pos>().build().unwrap(),
    );
    assert_eq!(raw, HashSet::from([pv]));
}

#[test]
fn builtin_tags_are_excluded_unless_asked_for() {
    init();
    let mut store = EntityStore::new();
    let plain = store.create_entity(&[ty::<Pos>()]).unwrap();
    let disabled = store.create_entity(&[ty::<Pos>(), ty::<Disabled>()]).unwrap();
    let prefab = store.create_entity(&[ty::<Pos>(), ty::<Prefab>()]).unwrap();
    let system = store.create_entity(&[ty::<Pos>(), ty::<SystemInstance>()]).unwrap();

    let count = |store: &mut EntityStore, descs: Vec<EntityQueryDesc>| {
        let query = store.create_query(&descs).unwrap();
        store.query_entities(query).unwrap()
    };

    assert_eq!(count(&mut store, QueryBuilder::new().read::<Pos>().build().unwrap()), vec![plain]);

    let with_disabled = QueryBuilder::new()
        .read::<Pos>()
        .options(QueryOptions::INCLUDE_DISABLED_ENTITIES)
        .build()
        .unwrap();
    let found: HashSet<_> = count(&mut store, with_disabled).into_iter().collect();
    assert_eq!(found, HashSet::from([plain, disabled]));

    let everything = QueryBuilder::new()
        .read::<Pos>()
        .options(
            QueryOptions::INCLUDE_DISABLED_ENTITIES | QueryOptions::INCLUDE_PREFAB | QueryOptions::INCLUDE_SYSTEMS,
        )
        .build()
        .unwrap();
    assert_eq!(count(&mut store, everything).len(), 4);

    // Naming the tag opts in.
    assert_eq!(count(&mut store, QueryBuilder::new().read::<Prefab>().build().unwrap()), vec![prefab]);
    assert_eq!(count(&mut store, QueryBuilder::new().read::<SystemInstance>().build().unwrap()), vec![system]);
}

#[test]
fn shared_filter_selects_chunks_by_value() {
    init();
    let mut store = EntityStore::new();
    let entities = store.create_entities(&[ty::<Pos>(), ty::<Faction>()], 30).unwrap();
    for (i, &e) in entities.iter().enumerate() {
        store.set_shared_component(e, Faction((i % 3) as u8)).unwrap();
    }
    let query = store.create_query(&QueryBuilder::new().read::<Pos>().build().unwrap()).unwrap();
    assert_eq!(store.calculate_entity_count(query).unwrap(), 30);

    store.set_shared_filter(query, Faction(1)).unwrap();
    let selected = store.query_entities(query).unwrap();
    assert_eq!(selected.len(), 10);
    assert!(selected.iter().all(|&e| store.get_shared_component::<Faction>(e).unwrap() == &Faction(1)));
    store.for_each_chunk(query, |view| assert_eq!(view.shared::<Faction>().unwrap(), &Faction(1))).unwrap();
    assert_eq!(store.query_chunks(query).unwrap().len(), 1);

    let faction = component_id_of::<Faction>().unwrap();
    assert_eq!(store.shared_values().value_count(faction), 3);
    assert_eq!(store.shared_values().index_of(faction, &Faction(0)), Some(0));

    // Filtering on an unseen value interns it but selects nothing.
    store.set_shared_filter(query, Faction(7)).unwrap();
    assert_eq!(store.calculate_entity_count(query).unwrap(), 0);
    assert!(store.query_chunks(query).unwrap().is_empty());
    assert_eq!(store.shared_values().value_count(faction), 4);

    store.reset_filter(query).unwrap();
    assert_eq!(store.calculate_entity_count(query).unwrap(), 30);
}

#[test]
fn change_and_order_filters_use_versions() {
    init();
    let mut store = EntityStore::new();
    let a = store.create_entities(&[ty::<Pos>()], 5).unwrap();
    let b = store.create_entities(&[ty::<Pos>(), ty::<Vel>()], 5).unwrap();
    let query = store.create_query(&QueryBuilder::new().read::<Pos>().build().unwrap()).unwrap();

    let v2 = store.advance_version();
    store.get_component_mut::<Pos>(a[2]).unwrap().0 = 3.0;
    store.set_change_filter(query, &[ty::<Pos>()], v2).unwrap();
    assert_eq!(store.query_entities(query).unwrap(), a);

    let v3 = store.advance_version();
    store.for_each_chunk(query, |view| assert!(!view.did_change::<Pos>(v3).unwrap())).unwrap();
    store.reset_filter(query).unwrap();

    store.create_entity(&[ty::<Pos>(), ty::<Vel>()]).unwrap();
    store.set_order_filter(query, v3).unwrap();
    let selected = store.query_entities(query).unwrap();
    assert_eq!(selected.len(), b.len() + 1);
    assert!(b.iter().all(|e| selected.contains(e)));
}

#[test]
fn chunk_iteration_reads_and_writes_columns() {
    init();
    let mut store = EntityStore::new();
    let entities = store.create_entities(&[ty::<Pos>(), ty::<Vel>(), ty::<Health>()], 2000).unwrap();
    for (i, &e) in entities.iter().enumerate() {
        store.set_component(e, Vel(1.0, i as f32)).unwrap();
        if i % 10 == 0 {
            store.set_enabled::<Health>(e, false).unwrap();
        }
    }
    let query = store
        .create_query(&QueryBuilder::new().write::<Pos>().read::<Vel>().read::<Health>().build().unwrap())
        .unwrap();

    store
        .for_each_chunk_mut(query, |mut view| {
            let rows = view.rows();
            let vel: Vec<Vel> = view.column::<Vel>().unwrap().to_vec();
            let pos = view.column_mut::<Pos>().unwrap();
            for row in rows {
                pos[row].0 += vel[row].0;
                pos[row].1 += vel[row].1;
            }
        })
        .unwrap();

    for (i, &e) in entities.iter().enumerate() {
        let expected = if i % 10 == 0 { Pos(0.0, 0.0) } else { Pos(1.0, i as f32) };
        assert_eq!(store.get_component::<Pos>(e).unwrap(), &expected, "entity {i}");
    }

    let seen = AtomicUsize::new(0);
    store
        .par_for_each_chunk(query, |view| {
            let pos = view.column::<Pos>().unwrap();
            let moved = view.rows().filter(|&row| pos[row].0 == 1.0).count();
            seen.fetch_add(moved, Ordering::Relaxed);
        })
        .unwrap();
    assert_eq!(seen.load(Ordering::Relaxed), 1800);
}
