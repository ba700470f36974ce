//! Headless drop demo -- a player walks across a field while mobs drop loot
//! around them; the loot expires or gets picked up.
//!
//! Run with:
//!   cargo run --example drop_items -p wayfarer-world
//!
//! Set `RUST_LOG=debug` to see every spawn and removal.

use wayfarer_world::prelude::*;

const FIELD: &str = "prt_fild08";

fn main() -> Result<(), anyhow::Error> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let config = WorldConfig::from_json(
        r#"{
            "max_floor_items": 1024,
            "flooritem_lifetime": 5000,
            "flooritem_dispersal": 2
        }"#,
    )?;

    let mut tiles = MemoryTiles::new();
    let mut cells = vec![MapCell::WALKABLE; 64 * 64];
    // A river across the middle of the field.
    for x in 0..64 {
        cells[32 * 64 + x] = MapCell::UNWALKABLE;
    }
    tiles.insert(MapName::from(FIELD), TileData::new(64, 64, cells)?);

    let log = BroadcastLog::new();
    let mut world = WorldState::with_collaborators(config, Box::new(TickScheduler::new()), Box::new(log.clone()))?;
    world.load_maps(&mut tiles, &[MapName::from(FIELD)])?;
    let field = MapName::from(FIELD);

    let session = world.sessions_mut().open();
    let hero = BlockId(2_000_001);
    let player = PlayerData {
        name: CharName::from("Wanderer"),
        char_id: CharId(150_000),
    };
    let (hero_key, _) = world.add_player(session, hero, player, &field, 4, 30)?;

    let mut mobs = Vec::new();
    for i in 0..8 {
        let (id, _) = world.add_mob(1002, &field, 6 + i * 6, 30)?;
        mobs.push(id);
    }

    let mut now = Tick(0);
    let mut picked = 0u32;
    for step in 0..60 {
        now = now + Interval::from_millis(250);
        world.run_timers(now);

        let x = 4 + step;
        if x < 64 {
            world.index_mut().move_entity(hero_key, &field, x, 30)?;
        }

        // Each mob the hero reaches dies and drops loot for them.
        if let Some(pos) = mobs.iter().position(|id| {
            world
                .index()
                .lookup_entity(*id)
                .is_some_and(|mob| (mob.x() - x).abs() <= 1)
        }) {
            let mob = mobs.remove(pos);
            let (mx, my) = match world.index().lookup_entity(mob) {
                Some(entity) => (entity.x(), entity.y()),
                None => continue,
            };
            world.delete_mob(mob);
            for name_id in [909, 512, 1202] {
                world.add_floor_item(ItemStack { name_id, amount: 1 }, &field, mx, my, [Some(hero), None, None])?;
            }
        }

        // Pick up whatever lies within reach.
        let mut in_reach = Vec::new();
        query_rect(&mut world, &field, Rect::around(x, 30, 1), Some(EntityKind::Item), |w, key| {
            if let Some(entity) = w.index().get(key) {
                in_reach.push(entity.id());
            }
        })?;
        for item in in_reach {
            if world.pick_up(hero, item).is_ok() {
                picked += 1;
            }
        }
    }

    world.run_timers(now + Interval::from_secs(10));

    let expired = log
        .events()
        .iter()
        .filter(|event| matches!(event, BroadcastEvent::Removed { reason: RemovalReason::Expired, .. }))
        .count();
    println!("picked up {picked} items, {expired} expired on the ground");
    println!("occupancy digest: {}", world.occupancy_digest());

    let disposed = world.shutdown();
    println!("shutdown disposed of {disposed} entities");
    Ok(())
}
