//! Query behaviour: cell and rect scenarios, movement deltas, and mutation
//! from inside visitors.

use std::collections::BTreeSet;

use proptest::prelude::*;
use wayfarer_index::prelude::*;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn index_with_map(name: &str, width: i32, height: i32) -> SpatialIndex {
    let mut index = SpatialIndex::new(IndexSettings {
        block_size: 8,
        max_objects: 64,
        ..IndexSettings::default()
    });
    index
        .register_local_map(MapName::from(name), TileData::filled(width, height, MapCell::WALKABLE), MapFlags::default())
        .unwrap();
    index
}

fn spawn(index: &mut SpatialIndex, map: &str, id: u32, x: i32, y: i32, data: EntityData) -> EntityKey {
    let key = index
        .add_durable(Entity::new(BlockId(id), MapName::from(map), x, y, data))
        .unwrap();
    index.link(key).unwrap();
    key
}

fn mob() -> EntityData {
    EntityData::Mob(MobData { class: 1002 })
}

fn npc() -> EntityData {
    EntityData::Npc(NpcData {
        name: "Sign".into(),
        slot: None,
    })
}

fn sorted(keys: Vec<EntityKey>) -> BTreeSet<u64> {
    keys.into_iter().map(EntityKey::to_raw).collect()
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[test]
fn single_entity_found_only_on_its_cell() {
    init_tracing();
    let mut index = index_with_map("field", 16, 16);
    let e = spawn(&mut index, "field", 110_000_000, 5, 5, mob());
    let field = MapName::from("field");

    let mut hits = Vec::new();
    query_cell(&mut index, &field, 5, 5, None, |_, k| hits.push(k)).unwrap();
    assert_eq!(hits, vec![e]);

    hits.clear();
    query_cell(&mut index, &field, 6, 6, None, |_, k| hits.push(k)).unwrap();
    assert!(hits.is_empty());
}

#[test]
fn capacity_three_range_allocates_once() {
    let mut index = SpatialIndex::new(IndexSettings {
        max_objects: 3,
        ..IndexSettings::default()
    });
    let map = MapName::from("field");
    let spell = || {
        EntityData::Spell(SpellData {
            name: "warp".into(),
            caster: None,
        })
    };
    assert!(index.add_object(map.clone(), 0, 0, spell()).is_ok());
    assert!(matches!(
        index.add_object(map, 0, 0, spell()),
        Err(IndexError::Exhausted { capacity: 3 })
    ));
}

#[test]
fn diagonal_move_reports_l_shaped_strip() {
    let mut index = index_with_map("field", 20, 20);
    let mut expected = BTreeSet::new();
    let mut id = 110_000_000;
    for y in 0..12 {
        for x in 0..12 {
            let key = spawn(&mut index, "field", id, x, y, mob());
            id += 1;
            if x <= 9 && y <= 9 && (x < 1 || y < 1) {
                expected.insert(key.to_raw());
            }
        }
    }
    let mut hits = Vec::new();
    query_movement_delta(&mut index, &MapName::from("field"), Rect::new(0, 0, 9, 9), 1, 1, None, |_, k| {
        hits.push(k)
    })
    .unwrap();
    assert_eq!(hits.len(), 19);
    assert_eq!(sorted(hits), expected);
}

#[test]
fn diagonal_move_tests_trailing_edge_after_clamping() {
    let mut index = index_with_map("field", 20, 20);
    let edge = spawn(&mut index, "field", 110_000_000, 0, 5, mob());
    let inner = spawn(&mut index, "field", 110_000_001, 3, 5, mob());
    let field = MapName::from("field");
    let rect = Rect::new(-3, -3, 6, 6);

    let delta = snapshot_movement_delta(&index, &field, rect, 1, 1, None).unwrap();
    assert!(delta.contains(&edge), "first in-bounds column counts as vacated");
    assert!(!delta.contains(&inner));

    // Same move towards the high edge: the strip is computed from the
    // clamped far side.
    let rect = Rect::new(13, 13, 22, 22);
    let far = spawn(&mut index, "field", 110_000_002, 19, 15, mob());
    let delta = snapshot_movement_delta(&index, &field, rect, -1, -1, None).unwrap();
    assert!(delta.contains(&far));
}

#[test]
fn straight_move_off_map_edge_finds_nothing() {
    let mut index = index_with_map("field", 16, 16);
    spawn(&mut index, "field", 110_000_000, 0, 4, mob());
    let delta = snapshot_movement_delta(&index, &MapName::from("field"), Rect::new(-4, 0, 5, 8), 1, 0, None).unwrap();
    assert!(delta.is_empty());
}

#[test]
fn multi_tile_step_is_rejected() {
    let mut index = index_with_map("field", 16, 16);
    // Just outside a one-cell view: a two-tile step must not report it.
    spawn(&mut index, "field", 110_000_000, 6, 5, mob());
    let field = MapName::from("field");
    let view = Rect::new(5, 5, 5, 5);

    for (dx, dy) in [(2, 0), (0, -2), (1, 3), (-5, -1)] {
        let result = snapshot_movement_delta(&index, &field, view, dx, dy, None);
        assert!(
            matches!(result, Err(IndexError::StepTooLong { dx: ex, dy: ey }) if (ex, ey) == (dx, dy)),
            "({dx}, {dy}) accepted"
        );
    }
    let visited = query_movement_delta(&mut index, &field, view, 2, 0, None, |_, _| {});
    assert!(matches!(visited, Err(IndexError::StepTooLong { .. })));
    assert!(snapshot_movement_delta(&index, &field, view, 1, 0, None).unwrap().is_empty());
}

// ---------------------------------------------------------------------------
// Reentrancy
// ---------------------------------------------------------------------------

/// A query host that carries game state next to the index.
struct Zone {
    index: SpatialIndex,
    visited: Vec<EntityKey>,
}

impl QueryHost for Zone {
    fn index(&self) -> &SpatialIndex {
        &self.index
    }

    fn index_mut(&mut self) -> &mut SpatialIndex {
        &mut self.index
    }
}

fn destroy(index: &mut SpatialIndex, key: EntityKey) {
    let id = index.get(key).unwrap().id();
    index.remove_durable(id);
    assert!(index.free(key));
}

#[test]
fn visitor_deletes_current_and_pending_entities() {
    init_tracing();
    let mut index = index_with_map("field", 16, 16);
    let a = spawn(&mut index, "field", 110_000_000, 1, 1, mob());
    let b = spawn(&mut index, "field", 110_000_001, 2, 1, mob());
    let c = spawn(&mut index, "field", 110_000_002, 3, 1, mob());
    let mut zone = Zone { index, visited: Vec::new() };
    let field = MapName::from("field");

    // Visit order is c, b, a; visiting c destroys c and a.
    let visited = query_rect(&mut zone, &field, Rect::new(0, 0, 15, 15), None, |zone, key| {
        zone.visited.push(key);
        if key == c {
            destroy(&mut zone.index, c);
            destroy(&mut zone.index, a);
            assert_eq!(zone.index.entities().pending_free(), 2);
            assert_eq!(zone.index.entities().released_total(), 0);
            assert!(zone.index.get(a).is_none());
        }
    })
    .unwrap();

    assert_eq!(visited, 2);
    assert_eq!(zone.visited, vec![c, b]);
    assert_eq!(zone.index.entities().pending_free(), 0);
    assert_eq!(zone.index.entities().released_total(), 2);
    assert_eq!(zone.index.entities().query_depth(), 0);

    let after = snapshot_rect(&zone, &field, Rect::new(0, 0, 15, 15), None).unwrap();
    assert_eq!(after, vec![b]);
}

#[test]
fn nested_query_defers_until_outermost_returns() {
    let mut index = index_with_map("field", 16, 16);
    let victim = spawn(&mut index, "field", 110_000_000, 9, 9, mob());
    spawn(&mut index, "field", 110_000_001, 1, 1, npc());
    let field = MapName::from("field");

    query_rect(&mut index, &field, Rect::new(0, 0, 7, 7), None, |index, _| {
        let inner_field = MapName::from("field");
        query_cell(index, &inner_field, 9, 9, None, |index, key| {
            destroy(index, key);
        })
        .unwrap();
        assert_eq!(index.entities().query_depth(), 1);
        assert_eq!(index.entities().pending_free(), 1);
    })
    .unwrap();

    assert!(index.get(victim).is_none());
    assert_eq!(index.entities().pending_free(), 0);
    assert_eq!(index.entities().released_total(), 1);
}

#[test]
fn visitor_may_move_entities_across_blocks() {
    let mut index = index_with_map("field", 32, 32);
    let walker = spawn(&mut index, "field", 110_000_000, 2, 2, mob());
    let field = MapName::from("field");
    let visited = query_rect(&mut index, &field, Rect::new(0, 0, 31, 31), None, |index, key| {
        index.move_entity(key, &MapName::from("field"), 30, 30).unwrap();
    })
    .unwrap();
    assert_eq!(visited, 1);
    assert_eq!(snapshot_rect(&index, &field, Rect::cell(30, 30), None).unwrap(), vec![walker]);
}

// ---------------------------------------------------------------------------
// Movement-delta equivalence
// ---------------------------------------------------------------------------

fn filter_strategy() -> impl Strategy<Value = Option<EntityKind>> {
    prop_oneof![
        Just(None),
        Just(Some(EntityKind::Mob)),
        Just(Some(EntityKind::Npc)),
    ]
}

fn straight_step() -> impl Strategy<Value = (i32, i32)> {
    prop_oneof![Just((1, 0)), Just((-1, 0)), Just((0, 1)), Just((0, -1))]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(300))]

    #[test]
    fn straight_delta_equals_rect_difference(
        placements in prop::collection::vec((0..30i32, 0..30i32, any::<bool>()), 0..60),
        (x0, y0) in (-6..30i32, -6..30i32),
        (w, h) in (0..18i32, 0..18i32),
        (dx, dy) in straight_step(),
        filter in filter_strategy(),
    ) {
        let mut index = index_with_map("field", 30, 30);
        for (i, (x, y, is_mob)) in placements.into_iter().enumerate() {
            let data = if is_mob { mob() } else { npc() };
            spawn(&mut index, "field", 110_000_000 + i as u32, x, y, data);
        }
        let field = MapName::from("field");
        let old = Rect::new(x0, y0, x0 + w, y0 + h);
        let new = old.translate(dx, dy);

        let delta = sorted(snapshot_movement_delta(&index, &field, old, dx, dy, filter).unwrap());
        let before = sorted(snapshot_rect(&index, &field, old, filter).unwrap());
        let after = sorted(snapshot_rect(&index, &field, new, filter).unwrap());
        let expected: BTreeSet<u64> = before.difference(&after).copied().collect();
        prop_assert_eq!(delta, expected);
    }
}
