//! Property tests for the identifier registries.

use std::collections::HashSet;

use proptest::prelude::*;
use wayfarer_index::prelude::*;

const CAPACITY: usize = 24;

#[derive(Debug, Clone)]
enum IdOp {
    AddObject,
    DeleteObject(usize),
    AddDurable,
    RemoveDurable(usize),
}

fn id_op_strategy() -> impl Strategy<Value = IdOp> {
    prop_oneof![
        3 => Just(IdOp::AddObject),
        2 => (0..64usize).prop_map(IdOp::DeleteObject),
        1 => Just(IdOp::AddDurable),
        1 => (0..64usize).prop_map(IdOp::RemoveDurable),
    ]
}

fn spell() -> EntityData {
    EntityData::Spell(SpellData {
        name: "sanctuary".into(),
        caster: None,
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    #[test]
    fn live_ids_stay_unique_and_resolve(ops in prop::collection::vec(id_op_strategy(), 1..120)) {
        let mut index = SpatialIndex::new(IndexSettings {
            max_objects: CAPACITY,
            ..IndexSettings::default()
        });
        let map = MapName::from("ids");
        let mut objects: Vec<BlockId> = Vec::new();
        let mut durables: Vec<BlockId> = Vec::new();
        let mut next_durable = 5_000_000u32;

        for op in ops {
            match op {
                IdOp::AddObject => match index.add_object(map.clone(), 0, 0, spell()) {
                    Ok((id, _)) => {
                        prop_assert!((id.0 as usize) >= RESERVED_OBJECT_IDS);
                        prop_assert!((id.0 as usize) < CAPACITY);
                        objects.push(id);
                    }
                    Err(IndexError::Exhausted { .. }) => {
                        prop_assert_eq!(objects.len(), CAPACITY - RESERVED_OBJECT_IDS);
                    }
                    Err(other) => prop_assert!(false, "unexpected error {other}"),
                },
                IdOp::DeleteObject(i) if !objects.is_empty() => {
                    let id = objects.remove(i % objects.len());
                    prop_assert!(index.delete_object(id, EntityKind::Spell));
                    prop_assert_eq!(index.lookup(id), None);
                }
                IdOp::AddDurable => {
                    let id = BlockId(next_durable);
                    next_durable += 1;
                    let entity = Entity::new(id, map.clone(), 0, 0, EntityData::Mob(MobData { class: 1002 }));
                    index.add_durable(entity).unwrap();
                    durables.push(id);
                }
                IdOp::RemoveDurable(i) if !durables.is_empty() => {
                    let id = durables.remove(i % durables.len());
                    let key = index.remove_durable(id).unwrap();
                    prop_assert!(index.free(key));
                    prop_assert_eq!(index.ids().presence(id), Presence::Removed);
                }
                _ => {}
            }

            let mut seen = HashSet::new();
            for &id in objects.iter().chain(durables.iter()) {
                prop_assert!(seen.insert(id), "id {} handed out twice", id);
                let entity = index.lookup_entity(id);
                prop_assert!(entity.is_some(), "id {} does not resolve", id);
                prop_assert_eq!(entity.unwrap().id(), id);
            }
            prop_assert_eq!(index.ids().ephemeral_len(), objects.len());
            prop_assert_eq!(index.entities().len(), objects.len() + durables.len());
        }
    }

    /// A released ephemeral id comes back before any higher slot is used.
    #[test]
    fn released_slot_is_reused_first(fill in 1..(CAPACITY - RESERVED_OBJECT_IDS), pick in 0..64usize) {
        let mut index = SpatialIndex::new(IndexSettings {
            max_objects: CAPACITY,
            ..IndexSettings::default()
        });
        let map = MapName::from("ids");
        let ids: Vec<BlockId> = (0..fill)
            .map(|_| index.add_object(map.clone(), 0, 0, spell()).unwrap().0)
            .collect();
        let freed = ids[pick % ids.len()];
        prop_assert!(index.delete_object(freed, EntityKind::Spell));
        let (again, _) = index.add_object(map.clone(), 0, 0, spell()).unwrap();
        prop_assert_eq!(again, freed);
    }
}
