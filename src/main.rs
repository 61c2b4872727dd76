use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use clap::Parser;
use rand::rngs::StdRng;
use rand::SeedableRng;

use error::SimulationError;
use hs::Event;
use ring::RingIds;
use scenario::chaotic_scenario;
use scenario::easy_scenario;
use scenario::threaded_scenario;
use simulation::Outcome;
use simulation::Stats;

mod error;
mod hs;
mod ring;
mod scenario;
mod simulation;
mod threaded;

/// Elects a leader on a ring of processes with the Hirschberg-Sinclair
/// algorithm.
#[derive(Parser, Debug)]
struct Args {
    /// Seed to use for the random number generation. Picks the ring (unless
    /// --ids is given) and the message delays, so simulated runs are
    /// reproducible.
    seed: Option<u64>,
    /// Identifiers in ring order (clockwise), e.g. "3,7,2,9". Must be unique
    /// positive integers.
    #[arg(long, value_parser = RingIds::parse, conflicts_with = "count")]
    ids: Option<RingIds>,
    /// Number of processes to generate random identifiers for
    #[arg(short = 'n', long, default_value_t = 8)]
    count: usize,
    /// If set, every send, receive and kill is logged. Useful for debugging,
    /// but pretty noisy.
    #[arg(short, long)]
    verbose: bool,
    /// Runs repeatedly with fresh seeds until failure or Ctrl+C
    #[arg(long)]
    stress: bool,
    /// How to schedule the processes
    #[arg(long)]
    scenario: Option<Scenario>,
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum Scenario {
    Easy,
    Chaotic,
    Threaded,
}

fn main() {
    let args = Args::parse();

    simple_logger::SimpleLogger::new()
        .with_level(match args.verbose {
            true => log::LevelFilter::Trace,
            false => log::LevelFilter::Info,
        })
        .without_timestamps()
        .init()
        .unwrap();

    let scenario = args.scenario.unwrap_or(Scenario::Chaotic);

    let result = if args.stress {
        stress_test(args.ids, args.count, scenario)
    } else {
        let seed = args.seed.unwrap_or_else(rand::random);
        run_once(seed, args.ids, args.count, scenario)
    };

    if let Err(err) = result {
        log::error!("{err}");
        std::process::exit(1);
    }
}

fn pick_ring(
    seed: u64,
    ids: Option<&RingIds>,
    count: usize,
) -> Result<RingIds, SimulationError> {
    match ids {
        Some(ids) => Ok(ids.clone()),
        None => Ok(RingIds::random(count, &mut StdRng::seed_from_u64(seed))?),
    }
}

fn run_scenario(
    scenario: Scenario,
    ids: &RingIds,
    seed: u64,
) -> Result<Outcome, SimulationError> {
    match scenario {
        Scenario::Easy => easy_scenario(ids, seed),
        Scenario::Chaotic => chaotic_scenario(ids, seed),
        Scenario::Threaded => threaded_scenario(ids),
    }
}

fn run_once(
    seed: u64,
    ids: Option<RingIds>,
    count: usize,
    scenario: Scenario,
) -> Result<(), SimulationError> {
    let ids = pick_ring(seed, ids.as_ref(), count)?;
    println!("Ring order (clockwise): {ids}");
    log::info!("Seed was: {seed}");
    log::debug!("Largest identifier in the ring: {}", ids.max());

    let outcome = run_scenario(scenario, &ids, seed)?;

    let final_phase = outcome
        .processes
        .iter()
        .find(|p| p.id == outcome.leader)
        .map_or(0, |p| p.phase);
    let kills = outcome
        .history
        .iter()
        .filter(|(_, event)| matches!(event, Event::Kill { .. }))
        .count();
    println!("Leader elected: {} (phase {final_phase})", outcome.leader);
    println!("Total messages sent: {}", outcome.total_messages);
    println!("Probes killed: {kills}");
    println!("{:?}", outcome.stats());
    Ok(())
}

fn stress_test(
    ids: Option<RingIds>,
    count: usize,
    scenario: Scenario,
) -> Result<(), SimulationError> {
    let stop_signal = configure_ctrlc_handler();

    let mut successes = 0;
    let mut failures = 0;
    let mut first_failure = None;
    let mut total_stats = Stats::new();

    for n in 0..u64::MAX {
        let seed = rand::random();
        // a bad ring is our mistake, not the algorithm's, so bail out
        let ring = pick_ring(seed, ids.as_ref(), count)?;

        match run_scenario(scenario, &ring, seed) {
            Ok(outcome) => {
                total_stats.merge(outcome.stats());
                successes += 1;
            }
            Err(err) => {
                log::error!("Simulation {n} failed for seed {seed} on ring {ring}: {err}");
                failures += 1;
                first_failure = Some(err);
                break;
            }
        }

        if stop_signal.load(Ordering::Relaxed) {
            break;
        }
    }

    println!(
        "Stress test completed: {} succeeded, {} failed",
        successes, failures
    );
    let total = total_stats.runs.max(1) as f64;
    println!(
        "Statistics: {:.2} average ticks to completion, {:.2} average messages sent",
        total_stats.ticks_elapsed as f64 / total,
        total_stats.num_messages_sent as f64 / total
    );
    first_failure.map_or(Ok(()), Err)
}

fn configure_ctrlc_handler() -> Arc<AtomicBool> {
    let stop_signal = Arc::new(AtomicBool::new(false));

    ctrlc::set_handler({
        let stop_signal = stop_signal.clone();
        move || {
            println!("received Ctrl+C!");
            let already_stopped = stop_signal.swap(true, Ordering::Relaxed);
            if already_stopped {
                std::process::exit(1);
            }
        }
    })
    .expect("Error setting Ctrl-C handler");
    stop_signal
}
