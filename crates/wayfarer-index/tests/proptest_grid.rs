//! Property tests for block-grid linkage.
//!
//! Random sequences of spawn, link, unlink, move and free are applied to an
//! index, and after every step the bucket lists are walked to check that
//! each linked entity is reachable from exactly one list, in the block its
//! coordinates name, with consistent back links.

use std::collections::HashMap;

use proptest::prelude::*;
use wayfarer_index::prelude::*;

const WIDTH: i32 = 40;
const HEIGHT: i32 = 24;

#[derive(Debug, Clone)]
enum GridOp {
    Spawn { mob: bool, x: i32, y: i32 },
    Link(usize),
    Unlink(usize),
    Move(usize, i32, i32),
    Free(usize),
}

fn grid_op_strategy() -> impl Strategy<Value = GridOp> {
    prop_oneof![
        (any::<bool>(), 0..WIDTH, 0..HEIGHT).prop_map(|(mob, x, y)| GridOp::Spawn { mob, x, y }),
        (0..64usize).prop_map(GridOp::Link),
        (0..64usize).prop_map(GridOp::Unlink),
        (0..64usize, -2..WIDTH + 2, -2..HEIGHT + 2).prop_map(|(i, x, y)| GridOp::Move(i, x, y)),
        (0..64usize).prop_map(GridOp::Free),
    ]
}

fn map() -> MapName {
    MapName::from("prop")
}

fn new_index() -> SpatialIndex {
    let mut index = SpatialIndex::new(IndexSettings {
        max_objects: 16,
        ..IndexSettings::default()
    });
    index
        .register_local_map(map(), TileData::filled(WIDTH, HEIGHT, MapCell::WALKABLE), MapFlags::default())
        .unwrap();
    index
}

/// Walk every bucket and check the linkage invariants against `alive`.
fn check_linkage(index: &SpatialIndex, alive: &[EntityKey]) -> Result<(), TestCaseError> {
    let local = index.local_map(&map()).unwrap();
    let grid = local.grid();
    let arena = index.entities();
    let (blocks_x, blocks_y) = grid.blocks();

    let mut seen: HashMap<EntityKey, (i32, i32)> = HashMap::new();
    let mut players = 0;
    for by in 0..blocks_y {
        for bx in 0..blocks_x {
            for list in [BucketList::Others, BucketList::Creatures] {
                let mut expected_prev = EntityKey::LIST_HEAD;
                for key in grid.bucket(arena, bx, by, list) {
                    let entity = arena.get(key).expect("bucket holds a dead key");
                    let links = arena.links(key).unwrap();
                    prop_assert_eq!(links.prev, Some(expected_prev));
                    prop_assert_eq!(grid.block_of(entity.x(), entity.y()), (bx, by));
                    prop_assert_eq!(entity.kind().is_creature(), list == BucketList::Creatures);
                    prop_assert!(seen.insert(key, (bx, by)).is_none(), "{:?} reachable twice", key);
                    if entity.kind() == EntityKind::Player {
                        players += 1;
                    }
                    expected_prev = key;
                }
            }
        }
    }

    for &key in alive {
        let links = arena.links(key).unwrap();
        prop_assert_eq!(links.is_linked(), seen.contains_key(&key));
        if !links.is_linked() {
            prop_assert_eq!(links.next, None);
        }
    }
    prop_assert_eq!(seen.len(), grid.len());
    prop_assert_eq!(players, grid.players());
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    #[test]
    fn random_ops_preserve_linkage(ops in prop::collection::vec(grid_op_strategy(), 1..80)) {
        let mut index = new_index();
        let mut alive: Vec<EntityKey> = Vec::new();
        let mut next_id = 3_000_000u32;

        for op in ops {
            match op {
                GridOp::Spawn { mob, x, y } => {
                    let data = if mob {
                        EntityData::Mob(MobData { class: 1002 })
                    } else {
                        EntityData::Player(PlayerData {
                            name: CharName::new(format!("p{next_id}")),
                            char_id: CharId(next_id),
                        })
                    };
                    let key = index
                        .add_durable(Entity::new(BlockId(next_id), map(), x, y, data))
                        .unwrap();
                    next_id += 1;
                    alive.push(key);
                }
                GridOp::Link(i) if !alive.is_empty() => {
                    let key = alive[i % alive.len()];
                    let was_linked = index.entities().is_linked(key);
                    let result = index.link(key);
                    prop_assert_eq!(result.is_ok(), !was_linked);
                }
                GridOp::Unlink(i) if !alive.is_empty() => {
                    let key = alive[i % alive.len()];
                    let was_linked = index.entities().is_linked(key);
                    prop_assert_eq!(index.unlink(key), was_linked);
                }
                GridOp::Move(i, x, y) if !alive.is_empty() => {
                    let key = alive[i % alive.len()];
                    let before = index.get(key).map(|e| (e.x(), e.y()));
                    let in_bounds = x >= 0 && x < WIDTH && y >= 0 && y < HEIGHT;
                    let result = index.move_entity(key, &map(), x, y);
                    prop_assert_eq!(result.is_ok(), in_bounds);
                    if !in_bounds {
                        prop_assert_eq!(index.get(key).map(|e| (e.x(), e.y())), before);
                    }
                }
                GridOp::Free(i) if !alive.is_empty() => {
                    let key = alive.remove(i % alive.len());
                    index.unlink(key);
                    prop_assert!(index.free(key));
                    prop_assert!(index.get(key).is_none());
                }
                _ => {}
            }
            check_linkage(&index, &alive)?;
        }
    }
}
