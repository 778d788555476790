use std::hint::black_box;
use std::time::Instant;

use interest_common::{EntityId, Location};
use interest_grid::{GridConfig, SpatialGrid};
use interest_kernel::{Entity, EntityKind, World};

fn make_world(entity_count: usize, spacing: f32) -> (World, SpatialGrid) {
    let mut world = World::new();
    let grid = SpatialGrid::new(GridConfig::default()).expect("default grid config is valid");
    let side = (entity_count as f32).sqrt().ceil() as usize;
    for i in 0..entity_count {
        let x = (i % side) as f32 * spacing - 4000.0;
        let z = (i / side) as f32 * spacing - 4000.0;
        let id = world
            .spawn(
                Entity::new(EntityId(i as u64 + 1), EntityKind::Creature, Location::new(x, 0.0, z))
                    .with_load_range(200.0),
            )
            .expect("ids are unique");
        grid.place(&mut world, id);
    }
    (world, grid)
}

fn bench_place(entity_count: usize, iterations: usize) {
    let start = Instant::now();
    for _ in 0..iterations {
        let _ = black_box(make_world(black_box(entity_count), 16.0));
    }
    let elapsed = start.elapsed();
    let per_iter = elapsed / iterations as u32;
    println!(
        "  spawn+place ({entity_count} entities, {iterations} iters): {per_iter:?}/iter, total {elapsed:?}"
    );
}

fn bench_query(entity_count: usize, spacing: f32, iterations: usize) {
    let (world, grid) = make_world(entity_count, spacing);
    let ids: Vec<EntityId> = world.entities().keys().copied().collect();

    let start = Instant::now();
    for i in 0..iterations {
        let id = ids[i % ids.len()];
        let _ = black_box(grid.query(black_box(&world), black_box(id)));
    }
    let elapsed = start.elapsed();
    let per_iter = elapsed / iterations as u32;
    println!(
        "  query ({entity_count} entities, spacing={spacing}, {iterations} iters): {per_iter:?}/iter, total {elapsed:?}"
    );
}

fn bench_move(entity_count: usize, iterations: usize) {
    let (mut world, grid) = make_world(entity_count, 16.0);
    let ids: Vec<EntityId> = world.entities().keys().copied().collect();

    let start = Instant::now();
    for i in 0..iterations {
        let id = ids[i % ids.len()];
        // Alternate across a cell boundary so every move re-homes.
        let x = if i % 2 == 0 { 1020.0 } else { 1030.0 };
        if let Some(e) = world.get_mut(id) {
            e.location = Location::new(x, 0.0, 0.0);
        }
        grid.move_entity(black_box(&mut world), black_box(id));
    }
    let elapsed = start.elapsed();
    let per_iter = elapsed / iterations as u32;
    println!(
        "  move ({entity_count} entities, {iterations} iters): {per_iter:?}/iter, total {elapsed:?}"
    );
}

fn main() {
    println!("=== Grid Benchmarks ===\n");

    println!("Spawn and place:");
    bench_place(100, 100);
    bench_place(1000, 10);
    bench_place(10000, 2);

    println!("\nProximity query:");
    bench_query(1000, 64.0, 10000);
    bench_query(10000, 16.0, 1000);
    bench_query(10000, 4.0, 100);

    println!("\nMove across a cell boundary:");
    bench_move(1000, 10000);
    bench_move(10000, 10000);

    println!("\n=== Done ===");
}
