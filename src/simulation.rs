use all_asserts::assert_ge;
use itertools::Itertools;
use rand::distr::Uniform;
use rand::rngs::StdRng;
use rand::Rng;
use rand::SeedableRng;

use self::network::Network;
use crate::error::ProtocolViolation;
use crate::error::SimulationError;
use crate::hs::Context;
use crate::hs::Event;
use crate::hs::Incoming;
use crate::hs::Process;
use crate::hs::ProcessID;
use crate::hs::Status;
use crate::ring::RingIds;

mod network;

/// Knobs for the simulated network. Delays are in ticks.
#[derive(Debug, Clone)]
pub struct NetworkSettings {
    pub delay_distribution: Uniform<u64>,
    /// Each process wakes up at a random tick in `1..=1 + max_start_delay`.
    pub max_start_delay: u64,
    pub max_ticks: u64,
}

/// A ring wired up and ready to go.
///
/// Processes only share the network; each one is driven one message at a time
/// and never sees another's state.
pub struct Simulation {
    clock: u64,
    processes: Vec<SimProcess>,
    network: Network,
    max_ticks: u64,
    history: Vec<(ProcessID, Event)>,
}

struct SimProcess {
    process: Process,
    start_tick: u64,
    started: bool,
}

/// Final state of one process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessSummary {
    pub id: ProcessID,
    pub status: Status,
    pub phase: u32,
    pub messages_sent: u64,
}

/// What a finished run looks like from the outside.
#[derive(Debug, Clone)]
pub struct Outcome {
    pub leader: ProcessID,
    pub total_messages: u64,
    /// In ring order.
    pub processes: Vec<ProcessSummary>,
    /// Zero for runners without a logical clock.
    pub ticks_elapsed: u64,
    /// Every event, grouped by process and in causal order within a process.
    pub history: Vec<(ProcessID, Event)>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Stats {
    pub runs: u64,
    pub ticks_elapsed: u64,
    pub num_messages_sent: u64,
}

impl NetworkSettings {
    pub fn new(min_delay: u64, max_delay: u64, max_start_delay: u64, max_ticks: u64) -> Self {
        assert_ge!(min_delay, 1);
        Self {
            delay_distribution: Uniform::new_inclusive(min_delay, max_delay)
                .expect("range error"),
            max_start_delay,
            max_ticks,
        }
    }
}

impl Simulation {
    pub fn new(ids: &RingIds, mut rng: StdRng, settings: NetworkSettings) -> Self {
        let processes = ids
            .iter()
            .map(|id| SimProcess {
                process: Process::new(id),
                start_tick: 1 + rng.random_range(0..=settings.max_start_delay),
                started: false,
            })
            .collect();

        Self {
            clock: 0,
            processes,
            network: Network::new(
                StdRng::from_rng(&mut rng),
                settings.delay_distribution,
                ids.len(),
            ),
            max_ticks: settings.max_ticks,
            history: vec![],
        }
    }

    pub fn from_seed(ids: &RingIds, seed: u64, settings: NetworkSettings) -> Self {
        Self::new(ids, StdRng::seed_from_u64(seed), settings)
    }

    /// Everyone has started and nothing is left on the wire.
    pub fn is_quiescent(&self) -> bool {
        self.processes.iter().all(|p| p.started) && self.network.is_empty()
    }

    pub fn tick(&mut self) -> Result<(), SimulationError> {
        self.clock += 1;
        log::trace!("==== TICK {:04} ====", self.clock);
        log::trace!("{} messages pending...", self.network.len());

        for idx in 0..self.processes.len() {
            let p = &self.processes[idx];
            if !p.started && p.start_tick <= self.clock {
                self.processes[idx].started = true;
                self.step(idx, |process, ctx| process.start(ctx))?;
            }
        }

        while let Some((idx, incoming)) = self.network.next_msg(self.clock) {
            if !self.processes[idx].started {
                // a message can beat a process's own wakeup; it starts first
                self.processes[idx].started = true;
                self.step(idx, |process, ctx| process.start(ctx))?;
            }
            self.step(idx, |process, ctx| process.recv_message(incoming, ctx))?;
        }
        Ok(())
    }

    /// Ticks until the ring goes quiet.
    pub fn run(mut self) -> Result<Outcome, SimulationError> {
        while !self.is_quiescent() {
            if self.clock >= self.max_ticks {
                return Err(SimulationError::Stalled {
                    ticks: self.clock,
                    in_flight: self.network.len(),
                });
            }
            self.tick()?;
        }

        log::trace!("======== END OF SIMULATION ========");
        for p in &self.processes {
            log::trace!("{}", p.process.status_line());
        }

        let summaries = self
            .processes
            .iter()
            .map(|p| ProcessSummary::of(&p.process))
            .collect();
        Outcome::new(summaries, self.clock, self.history)
    }

    fn step<F>(&mut self, idx: usize, f: F) -> Result<(), SimulationError>
    where
        F: FnOnce(&mut Process, &mut Context) -> Result<(), ProtocolViolation>,
    {
        let process = &mut self.processes[idx].process;
        let id = process.id();
        let mut outgoing = vec![];
        let mut events = vec![];
        let result = f(
            process,
            &mut Context {
                outgoing: &mut outgoing,
                events: &mut events,
            },
        );

        for event in events {
            event.log(id);
            self.history.push((id, event));
        }
        result.map_err(|source| SimulationError::Protocol {
            process: id,
            source,
        })?;

        self.network.enqueue(self.clock, idx, outgoing);
        Ok(())
    }
}

impl ProcessSummary {
    pub fn of(process: &Process) -> Self {
        Self {
            id: process.id(),
            status: process.status(),
            phase: process.phase(),
            messages_sent: process.messages_sent(),
        }
    }
}

impl Outcome {
    /// Builds the outcome of a quiet ring, checking that the election
    /// actually worked: one leader, holding the biggest id, and nobody left
    /// active.
    pub fn new(
        processes: Vec<ProcessSummary>,
        ticks_elapsed: u64,
        mut history: Vec<(ProcessID, Event)>,
    ) -> Result<Self, SimulationError> {
        let leaders = processes
            .iter()
            .filter(|p| p.status == Status::Leader)
            .map(|p| p.id)
            .collect_vec();
        let leader = match leaders.as_slice() {
            [leader] => *leader,
            _ => {
                return Err(SimulationError::BadElection(format!(
                    "expected exactly one leader, got [{}]",
                    leaders.iter().format(", ")
                )))
            }
        };

        let max = processes.iter().map(|p| p.id).max();
        if max != Some(leader) {
            return Err(SimulationError::BadElection(format!(
                "leader {leader} does not hold the largest id"
            )));
        }

        if let Some(p) = processes.iter().find(|p| p.status == Status::Active) {
            return Err(SimulationError::BadElection(format!(
                "process {} is still active",
                p.id
            )));
        }

        // sort_by_key is stable, so per-process order survives
        let order = processes.iter().map(|p| p.id).collect_vec();
        history.sort_by_key(|(id, _)| order.iter().position(|x| x == id));

        Ok(Self {
            leader,
            total_messages: processes.iter().map(|p| p.messages_sent).sum(),
            processes,
            ticks_elapsed,
            history,
        })
    }

    pub fn stats(&self) -> Stats {
        Stats {
            runs: 1,
            ticks_elapsed: self.ticks_elapsed,
            num_messages_sent: self.total_messages,
        }
    }

    #[cfg(test)]
    pub fn status_of(&self, id: ProcessID) -> Option<Status> {
        self.processes
            .iter()
            .find(|p| p.id == id)
            .map(|p| p.status)
    }
}

impl Stats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn merge(&mut self, other: Stats) {
        self.runs += other.runs;
        self.ticks_elapsed += other.ticks_elapsed;
        self.num_messages_sent += other.num_messages_sent;
    }
}
