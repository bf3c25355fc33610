use std::env;
use std::fs;
use std::path::PathBuf;

use contracts::{Cell, EngineConfig, MaterialKind, TargetLocation, WorkerId};
use tracing::info;
use tracing_subscriber::EnvFilter;
use work_core::{GridSimulation, GridWorld, ObjectKind, WorldView};
use work_store::ForcedWorkSession;

const DEFAULT_MAX_TICKS: u64 = 500;

fn print_usage() {
    println!("work-cli [--config <path>] <command>");
    println!("commands:");
    println!("  config");
    println!("    prints the effective engine config as json");
    println!("  demo <scenario> [ticks]");
    println!("    runs a scenario in memory and prints the final grid");
    println!("  simulate <scenario> <save_id> [ticks] [sqlite_path]");
    println!("    runs a scenario and persists save points to sqlite");
    println!("  resume <save_id> [ticks] [sqlite_path]");
    println!("    continues the latest save point of a save");
    println!("scenarios: debris, walls, shared");
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .compact()
        .with_writer(std::io::stderr)
        .init();
}

fn parse_ticks(value: Option<&String>) -> Result<u64, String> {
    value
        .map(|raw| {
            raw.parse::<u64>()
                .map_err(|_| format!("invalid ticks: {raw}"))
        })
        .transpose()
        .map(|ticks| ticks.unwrap_or(DEFAULT_MAX_TICKS))
}

fn default_sqlite_path() -> String {
    env::var("FORCEWORK_SQLITE_PATH")
        .ok()
        .filter(|value| !value.trim().is_empty())
        .unwrap_or_else(|| "forced_work.sqlite".to_string())
}

fn parse_sqlite_path(value: Option<&String>) -> String {
    value
        .map(String::to_string)
        .filter(|path| !path.trim().is_empty())
        .unwrap_or_else(default_sqlite_path)
}

fn load_config(path: Option<PathBuf>) -> Result<EngineConfig, String> {
    let path = path.or_else(|| {
        env::var("FORCEWORK_CONFIG")
            .ok()
            .filter(|value| !value.trim().is_empty())
            .map(PathBuf::from)
    });
    let config = match path {
        Some(path) => {
            let raw = fs::read_to_string(&path)
                .map_err(|err| format!("failed to read {}: {err}", path.display()))?;
            serde_json::from_str::<EngineConfig>(&raw)
                .map_err(|err| format!("invalid config {}: {err}", path.display()))?
        }
        None => EngineConfig::default(),
    };
    config
        .validate()
        .map_err(|err| format!("invalid config: {err}"))?;
    Ok(config)
}

/// Splits `--config <path>` off the front of the argument list.
fn split_config_flag(args: &[String]) -> Result<(Option<PathBuf>, Vec<String>), String> {
    match args.first().map(String::as_str) {
        Some("--config") => {
            let path = args
                .get(1)
                .ok_or_else(|| "missing config path".to_string())?;
            Ok((Some(PathBuf::from(path)), args[2..].to_vec()))
        }
        _ => Ok((None, args.to_vec())),
    }
}

struct Scenario {
    world: GridWorld,
    overrides: Vec<(WorkerId, TargetLocation)>,
}

fn build_scenario(name: &str) -> Result<Scenario, String> {
    match name {
        "debris" => Ok(debris_scenario()),
        "walls" => Ok(walls_scenario()),
        "shared" => Ok(shared_scenario()),
        other => Err(format!("unknown scenario: {other}")),
    }
}

/// A walled room full of debris with a single doorway.
fn debris_scenario() -> Scenario {
    let mut world = GridWorld::new(14, 10);
    for x in 2..12 {
        world.set_wall(Cell::new(x, 2));
        world.set_wall(Cell::new(x, 8));
    }
    for y in 2..9 {
        world.set_wall(Cell::new(2, y));
        world.set_wall(Cell::new(11, y));
    }
    world.set_open(Cell::new(2, 5));
    for x in 3..11 {
        for y in 3..8 {
            world.add_debris(Cell::new(x, y));
        }
    }
    let worker = WorkerId(1);
    world.spawn_worker(worker, Cell::new(0, 5));
    Scenario {
        world,
        overrides: vec![(worker, Cell::new(3, 5).into())],
    }
}

/// A row of wall blueprints; finished segments block the builder's path.
fn walls_scenario() -> Scenario {
    let mut world = GridWorld::new(12, 8);
    let mut first = None;
    for x in 2..10 {
        let id = world.spawn_object(
            ObjectKind::Blueprint {
                material: MaterialKind::Wall,
            },
            Cell::new(x, 4),
        );
        first.get_or_insert(id);
    }
    let worker = WorkerId(1);
    world.spawn_worker(worker, Cell::new(0, 0));
    Scenario {
        world,
        overrides: first
            .map(|id| vec![(worker, id.into())])
            .unwrap_or_default(),
    }
}

/// Two workers forced onto the same strip of debris from opposite ends.
fn shared_scenario() -> Scenario {
    let mut world = GridWorld::new(16, 6);
    for x in 1..15 {
        world.add_debris(Cell::new(x, 2));
    }
    let left = WorkerId(1);
    let right = WorkerId(2);
    world.spawn_worker(left, Cell::new(0, 0));
    world.spawn_worker(right, Cell::new(15, 5));
    Scenario {
        world,
        overrides: vec![
            (left, Cell::new(1, 2).into()),
            (right, Cell::new(14, 2).into()),
        ],
    }
}

fn issue_overrides(sim: &mut GridSimulation, overrides: &[(WorkerId, TargetLocation)]) {
    for (worker, seed) in overrides {
        let issued = sim.issue_override(*worker, *seed);
        info!(%worker, %seed, issued, "override issued");
        if !issued {
            println!("worker {worker}: nothing to force at {seed}");
        }
    }
}

fn print_outcome(sim: &GridSimulation, notices: &[contracts::Notice], ticks: u64) {
    println!("{}", sim.world().render());
    let stats = sim.registry().stats();
    println!(
        "ticks={} tick={} completed={} orders={} targets={}",
        ticks,
        sim.world().tick(),
        sim.world().completed().len(),
        stats.orders,
        stats.targets
    );
    for notice in notices {
        println!("{notice}");
    }
}

fn run_demo(config: EngineConfig, args: &[String]) -> Result<(), String> {
    let name = args.get(1).ok_or_else(|| "missing scenario".to_string())?;
    let max_ticks = parse_ticks(args.get(2))?;
    let scenario = build_scenario(name)?;

    let mut sim = GridSimulation::new(scenario.world, config);
    issue_overrides(&mut sim, &scenario.overrides);
    let ticks = sim.run_until_idle(max_ticks);
    let notices = sim.registry_mut().drain_notices();
    print_outcome(&sim, &notices, ticks);
    Ok(())
}

fn run_simulation(config: EngineConfig, args: &[String]) -> Result<(), String> {
    let name = args.get(1).ok_or_else(|| "missing scenario".to_string())?;
    let save_id = args.get(2).ok_or_else(|| "missing save_id".to_string())?;
    let max_ticks = parse_ticks(args.get(3))?;
    let sqlite_path = parse_sqlite_path(args.get(4));
    let scenario = build_scenario(name)?;

    let mut session = ForcedWorkSession::new(save_id.as_str(), scenario.world, config);
    session
        .attach_sqlite_store(PathBuf::from(&sqlite_path))
        .map_err(|err| format!("failed to attach sqlite store: {err}"))?;
    issue_overrides(session.simulation_mut(), &scenario.overrides);
    let ticks = session.run_until_idle(max_ticks);

    if let Some(error) = session.last_persistence_error() {
        return Err(format!("persistence error after simulation: {error}"));
    }
    print_outcome(session.simulation(), session.notices(), ticks);
    println!("saved save_id={save_id} sqlite={sqlite_path}");
    Ok(())
}

fn run_resume(args: &[String]) -> Result<(), String> {
    let save_id = args.get(1).ok_or_else(|| "missing save_id".to_string())?;
    let max_ticks = parse_ticks(args.get(2))?;
    let sqlite_path = parse_sqlite_path(args.get(3));

    let mut session = ForcedWorkSession::resume_from_sqlite(&sqlite_path, save_id)
        .map_err(|err| format!("failed to load save: {err}"))?
        .ok_or_else(|| format!("no save {save_id} in {sqlite_path}"))?;
    let ticks = session.run_until_idle(max_ticks);

    if let Some(error) = session.last_persistence_error() {
        return Err(format!("persistence error after resume: {error}"));
    }
    print_outcome(session.simulation(), session.notices(), ticks);
    Ok(())
}

fn run(args: &[String]) -> Result<(), String> {
    let (config_path, args) = split_config_flag(args)?;
    match args.first().map(String::as_str) {
        Some("config") => {
            let config = load_config(config_path)?;
            let json = serde_json::to_string_pretty(&config)
                .map_err(|err| format!("failed to encode config: {err}"))?;
            println!("{json}");
            Ok(())
        }
        Some("demo") => run_demo(load_config(config_path)?, &args),
        Some("simulate") => run_simulation(load_config(config_path)?, &args),
        Some("resume") => run_resume(&args),
        _ => {
            print_usage();
            Ok(())
        }
    }
}

fn main() {
    init_tracing();
    let args: Vec<String> = env::args().skip(1).collect();
    if let Err(err) = run(&args) {
        eprintln!("error: {err}");
        print_usage();
        std::process::exit(2);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scenarios_run_to_completion() {
        for name in ["debris", "walls", "shared"] {
            let scenario = build_scenario(name).expect("known scenario");
            let mut sim = GridSimulation::new(scenario.world, EngineConfig::default());
            issue_overrides(&mut sim, &scenario.overrides);
            sim.run_until_idle(DEFAULT_MAX_TICKS);
            assert!(sim.is_idle(), "{name} did not settle");
            assert!(!sim.world().completed().is_empty(), "{name} did no work");
        }
    }

    #[test]
    fn debris_room_is_cleared_through_the_doorway() {
        let scenario = debris_scenario();
        let mut sim = GridSimulation::new(scenario.world, EngineConfig::default());
        issue_overrides(&mut sim, &scenario.overrides);
        sim.run_until_idle(DEFAULT_MAX_TICKS);
        assert_eq!(sim.world().debris_count(), 0);
    }

    #[test]
    fn config_flag_is_split_from_the_command() {
        let args = vec![
            "--config".to_string(),
            "engine.json".to_string(),
            "demo".to_string(),
        ];
        let (path, rest) = split_config_flag(&args).expect("split");
        assert_eq!(path, Some(PathBuf::from("engine.json")));
        assert_eq!(rest, vec!["demo".to_string()]);

        assert!(split_config_flag(&["--config".to_string()]).is_err());
    }

    #[test]
    fn unknown_scenario_is_rejected() {
        assert!(build_scenario("lava").is_err());
        assert_eq!(parse_ticks(None), Ok(DEFAULT_MAX_TICKS));
        assert!(parse_ticks(Some(&"soon".to_string())).is_err());
    }
}
