use std::time::Duration;

use crate::error::SimulationError;
use crate::ring::RingIds;
use crate::simulation::NetworkSettings;
use crate::simulation::Outcome;
use crate::simulation::Simulation;
use crate::threaded::ThreadedRing;
use crate::threaded::ThreadedSettings;

const MAX_TICKS: u64 = 1_000_000;

const EASY_MIN_DELAY: u64 = 1;
const EASY_MAX_DELAY: u64 = 3;

const CHAOTIC_MIN_DELAY: u64 = 1;
const CHAOTIC_MAX_DELAY: u64 = 50;
const CHAOTIC_MAX_START_DELAY: u64 = 100;

const THREAD_JITTER: Duration = Duration::from_micros(500);

/// Short, even delays and everybody starts on the same tick.
pub fn easy_scenario(ids: &RingIds, seed: u64) -> Result<Outcome, SimulationError> {
    Simulation::from_seed(
        ids,
        seed,
        NetworkSettings::new(EASY_MIN_DELAY, EASY_MAX_DELAY, 0, MAX_TICKS),
    )
    .run()
}

/// Wildly uneven link delays and staggered wakeups, so probes from different
/// phases and processes interleave as badly as FIFO links allow.
pub fn chaotic_scenario(ids: &RingIds, seed: u64) -> Result<Outcome, SimulationError> {
    Simulation::from_seed(
        ids,
        seed,
        NetworkSettings::new(
            CHAOTIC_MIN_DELAY,
            CHAOTIC_MAX_DELAY,
            CHAOTIC_MAX_START_DELAY,
            MAX_TICKS,
        ),
    )
    .run()
}

/// Real threads with random sleeps. Not reproducible from a seed: the OS
/// scheduler gets a say.
pub fn threaded_scenario(ids: &RingIds) -> Result<Outcome, SimulationError> {
    ThreadedRing::new(
        ids.clone(),
        ThreadedSettings {
            max_jitter: THREAD_JITTER,
        },
    )
    .run()
}
