use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use clap::{Parser, Subcommand};
use crossbeam_channel::Receiver;
use interest_awareness::{Direction, Notification, notify};
use interest_common::{EntityId, Location};
use interest_kernel::{Containment, Entity, EntityKind};
use interest_movement::{
    Destination, EngineConfig, MoveOutcome, MovementCoordinator, MovementError, Sweeper,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "interest-cli", about = "CLI tool for the interest engine")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Engine config file (JSON); built-in defaults when omitted
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the effective configuration and crate version
    Info,
    /// Deterministic soak run: moves, zone-ins, transfers and destroys,
    /// followed by a consistency check
    Soak {
        /// Number of creatures to spawn
        #[arg(short, long, default_value = "1000")]
        entities: usize,
        /// Number of random operations
        #[arg(short, long, default_value = "10000")]
        steps: usize,
        /// How many creatures are logged-in players
        #[arg(short, long, default_value = "16")]
        players: usize,
        /// Run a full sweep every N operations
        #[arg(long, default_value = "1000")]
        sweep_every: usize,
        /// RNG seed for a reproducible run
        #[arg(long, default_value = "42")]
        seed: u64,
    },
    /// Run the background sweep against a populated world and report timings
    Sweep {
        #[arg(short, long, default_value = "2000")]
        entities: usize,
        #[arg(long, default_value = "3")]
        seconds: u64,
        #[arg(long, default_value = "42")]
        seed: u64,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .init();

    let config = match &cli.config {
        Some(path) => EngineConfig::from_json_file(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => EngineConfig::default(),
    };

    match cli.command {
        Commands::Info => {
            println!("interest-cli v{}", env!("CARGO_PKG_VERSION"));
            println!("{}", serde_json::to_string_pretty(&config)?);
            println!(
                "grid: {0}x{0} cells of {1} units",
                config.grid.chunks_across,
                config.grid.chunk_width()
            );
        }
        Commands::Soak {
            entities,
            steps,
            players,
            sweep_every,
            seed,
        } => soak(config, entities, steps, players, sweep_every, seed)?,
        Commands::Sweep {
            entities,
            seconds,
            seed,
        } => sweep(config, entities, seconds, seed)?,
    }

    Ok(())
}

/// Splitmix64 stream; same seed, same run.
struct Rng(u64);

impl Rng {
    fn next_u64(&mut self) -> u64 {
        self.0 = self.0.wrapping_add(0x9e37_79b9_7f4a_7c15);
        let mut z = self.0;
        z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
        z ^ (z >> 31)
    }

    /// Uniform in `[-span / 2, span / 2)`.
    fn spread(&mut self, span: f32) -> f32 {
        ((self.next_u64() >> 40) as f32 / (1u64 << 24) as f32 - 0.5) * span
    }

    fn below(&mut self, n: usize) -> usize {
        (self.next_u64() % n.max(1) as u64) as usize
    }
}

/// Notification counts for the run summary.
#[derive(Debug, Default)]
struct Tally {
    appeared: usize,
    disappeared: usize,
    resyncs: usize,
    transforms: usize,
    containment: usize,
    closed: usize,
}

impl Tally {
    fn absorb(&mut self, rx: &Receiver<Notification>) {
        for notification in rx.try_iter() {
            match notification {
                Notification::Awareness(change) => match change.direction {
                    Direction::Appeared => self.appeared += 1,
                    Direction::Disappeared => self.disappeared += 1,
                },
                Notification::FullResync { .. } => self.resyncs += 1,
                Notification::TransformUpdate { .. } => self.transforms += 1,
                Notification::ContainmentUpdate { .. } => self.containment += 1,
                Notification::CloseConnection { .. } => self.closed += 1,
                Notification::ZonedIn { .. } | Notification::PlayerTransformed { .. } => {}
            }
        }
    }
}

const WORLD_SPAN: f32 = 12_000.0;

fn spawn_creature(
    coordinator: &MovementCoordinator,
    rng: &mut Rng,
    id: u64,
) -> Result<EntityId, MovementError> {
    let location = Location::new(rng.spread(WORLD_SPAN), 0.0, rng.spread(WORLD_SPAN));
    let range = 64.0 + rng.below(448) as f32;
    coordinator.create(Entity::new(EntityId(id), EntityKind::Creature, location).with_load_range(range))
}

/// Spawn creatures, giving every tenth one a bag. Returns (creatures, bags).
fn populate(
    coordinator: &MovementCoordinator,
    rng: &mut Rng,
    count: usize,
) -> Result<(Vec<EntityId>, Vec<EntityId>), MovementError> {
    let mut creatures = Vec::with_capacity(count);
    let mut bags = Vec::new();
    for i in 0..count as u64 {
        let creature = spawn_creature(coordinator, rng, i + 1)?;
        creatures.push(creature);
        if i % 10 == 0 {
            let bag = Entity::new(EntityId(1_000_000 + i), EntityKind::Item, Location::default())
                .with_parent(creature, Containment::Contained);
            bags.push(coordinator.create(bag)?);
        }
    }
    Ok((creatures, bags))
}

fn soak(
    config: EngineConfig,
    entities: usize,
    steps: usize,
    players: usize,
    sweep_every: usize,
    seed: u64,
) -> anyhow::Result<()> {
    let (tx, rx) = notify::channel();
    let coordinator = MovementCoordinator::new(config, Arc::new(tx))?;
    let mut rng = Rng(seed);
    let mut tally = Tally::default();
    let start = Instant::now();

    let (mut creatures, bags) = populate(&coordinator, &mut rng, entities)?;
    let players = players.min(creatures.len());
    for &player in &creatures[..players] {
        let location = coordinator.world().world_location(player).unwrap_or_default();
        coordinator.login(player)?;
        coordinator.request_zone_in(player, Destination::World, location)?;
        coordinator.scene_ready(player)?;
    }
    tally.absorb(&rx);
    println!(
        "Spawned {} creatures and {} bags in {:?} ({} players)",
        creatures.len(),
        bags.len(),
        start.elapsed(),
        players
    );

    let mut next_id = entities as u64 + 1;
    let (mut rejected, mut ignored) = (0usize, 0usize);
    let run = Instant::now();
    for step in 0..steps {
        if creatures.is_empty() {
            break;
        }
        let pick = rng.below(creatures.len());
        let id = creatures[pick];
        let roll = rng.below(100);
        let result = if roll < 70 {
            let here = coordinator.world().world_location(id).unwrap_or_default();
            let to = Location::new(
                here.position.x + rng.spread(100.0),
                0.0,
                here.position.z + rng.spread(100.0),
            );
            coordinator.move_object(id, Destination::World, to, 5.0)
        } else if roll < 85 {
            let to = Location::new(rng.spread(WORLD_SPAN), 0.0, rng.spread(WORLD_SPAN));
            let outcome = coordinator.teleport(id, Destination::World, to);
            if matches!(outcome, Ok(MoveOutcome::ZoneIn)) {
                coordinator.scene_ready(id)?;
            }
            outcome
        } else if roll < 95 && !bags.is_empty() {
            let bag = bags[rng.below(bags.len())];
            coordinator.transfer(bag, Destination::Parent(id))
        } else if pick >= players {
            coordinator.destroy(id);
            let replacement = spawn_creature(&coordinator, &mut rng, next_id)?;
            next_id += 1;
            creatures[pick] = replacement;
            Ok(MoveOutcome::Moved)
        } else {
            Ok(MoveOutcome::Ignored)
        };
        match result {
            Ok(MoveOutcome::Ignored) => ignored += 1,
            Ok(_) => {}
            Err(err) => {
                rejected += 1;
                tracing::warn!(step, %id, %err, "operation rejected");
            }
        }
        if sweep_every > 0 && (step + 1) % sweep_every == 0 {
            let stats = coordinator.refresh_all();
            tracing::debug!(step, entities = stats.entities, elapsed = ?stats.elapsed, "sweep");
        }
        tally.absorb(&rx);
    }
    let elapsed = run.elapsed();

    let stats = coordinator.refresh_all();
    tally.absorb(&rx);
    coordinator.validate().context("engine consistency check failed")?;

    println!("Ran {steps} operations in {elapsed:?} ({rejected} rejected, {ignored} ignored)");
    println!(
        "Final sweep: {} entities in {:?}, {} appeared, {} disappeared",
        stats.entities, stats.elapsed, stats.appeared, stats.disappeared
    );
    println!(
        "World: {} entities, {} occupied cells, {} placements, {} awareness pairs",
        coordinator.entity_count(),
        coordinator.grid().occupied_cells(),
        coordinator.grid().total_placements(),
        coordinator.ledger().relationship_count()
    );
    println!("Notifications: {tally:?}");
    println!("Consistency: OK");
    Ok(())
}

fn sweep(config: EngineConfig, entities: usize, seconds: u64, seed: u64) -> anyhow::Result<()> {
    let (tx, rx) = notify::channel();
    let coordinator = Arc::new(MovementCoordinator::new(config, Arc::new(tx))?);
    let mut rng = Rng(seed);
    let (creatures, _bags) = populate(&coordinator, &mut rng, entities)?;
    rx.try_iter().for_each(drop);

    let sweeper = Sweeper::spawn(Arc::clone(&coordinator)).context("starting sweep thread")?;
    let deadline = Instant::now() + Duration::from_secs(seconds);
    let mut moves = 0usize;
    while Instant::now() < deadline && !creatures.is_empty() {
        let id = creatures[rng.below(creatures.len())];
        let here = coordinator.world().world_location(id).unwrap_or_default();
        let to = Location::new(here.position.x + rng.spread(40.0), 0.0, here.position.z + rng.spread(40.0));
        coordinator.move_object(id, Destination::World, to, 2.0)?;
        moves += 1;
        rx.try_iter().for_each(drop);
    }
    let timings = sweeper.timings();
    sweeper.stop();
    coordinator.validate().context("engine consistency check failed")?;

    println!(
        "{} sweeps over {} entities while applying {moves} moves: avg {:?}, max {:?}",
        timings.sweeps,
        coordinator.entity_count(),
        timings.average(),
        timings.max
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn global_flags_follow_the_subcommand() {
        let cli = Cli::try_parse_from(["interest-cli", "soak", "-v", "--config", "engine.json"]).unwrap();
        assert!(cli.verbose);
        assert_eq!(cli.config, Some(PathBuf::from("engine.json")));
        assert!(matches!(cli.command, Commands::Soak { .. }));

        let cli = Cli::try_parse_from(["interest-cli", "-v", "sweep", "--seconds", "1"]).unwrap();
        assert!(cli.verbose);
        assert!(matches!(cli.command, Commands::Sweep { seconds: 1, .. }));
    }
}
