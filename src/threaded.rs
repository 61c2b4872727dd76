//! Runs the ring with one OS thread per process.
//!
//! Each process owns an mpsc inbox; its neighbors hold senders into it. The
//! only thing the threads share is an in-flight counter used to tell when the
//! ring has gone quiet, which the protocol itself never looks at.

use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::mpsc;
use std::sync::mpsc::Receiver;
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use rand::Rng;

use crate::error::ProtocolViolation;
use crate::error::SimulationError;
use crate::hs::Context;
use crate::hs::Event;
use crate::hs::Incoming;
use crate::hs::Outgoing;
use crate::hs::Process;
use crate::hs::ProcessID;
use crate::hs::Side;
use crate::ring::neighbor;
use crate::ring::RingIds;
use crate::simulation::Outcome;
use crate::simulation::ProcessSummary;

#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadedSettings {
    /// Each thread sleeps a random amount up to this before every step.
    pub max_jitter: Duration,
}

/// A ring that hasn't been started yet.
#[derive(Debug, Clone)]
pub struct ThreadedRing {
    ids: RingIds,
    settings: ThreadedSettings,
}

enum Envelope {
    Deliver(Incoming),
    Shutdown,
}

enum Report {
    Quiescent,
    Aborted(ProcessID, ProtocolViolation),
}

struct Worker {
    process: Process,
    inbox: Receiver<Envelope>,
    left: Sender<Envelope>,
    right: Sender<Envelope>,
    in_flight: Arc<AtomicUsize>,
    reports: Sender<Report>,
    max_jitter: Duration,
    history: Vec<Event>,
}

struct Finished {
    summary: ProcessSummary,
    history: Vec<Event>,
}

impl ThreadedRing {
    pub fn new(ids: RingIds, settings: ThreadedSettings) -> Self {
        Self { ids, settings }
    }

    /// Starts every process, waits for the ring to go quiet, then shuts the
    /// threads down and collects their results.
    pub fn run(self) -> Result<Outcome, SimulationError> {
        let n = self.ids.len();
        let (inboxes, receivers): (Vec<_>, Vec<_>) = (0..n).map(|_| mpsc::channel()).unzip();
        // one token per process that hasn't sent its first probes yet
        let in_flight = Arc::new(AtomicUsize::new(n));
        let (report_tx, report_rx) = mpsc::channel();

        let handles: Vec<_> = receivers
            .into_iter()
            .zip(self.ids.iter())
            .enumerate()
            .map(|(idx, (inbox, id))| {
                let worker = Worker {
                    process: Process::new(id),
                    inbox,
                    left: inboxes[neighbor(idx, Side::Left, n).0].clone(),
                    right: inboxes[neighbor(idx, Side::Right, n).0].clone(),
                    in_flight: in_flight.clone(),
                    reports: report_tx.clone(),
                    max_jitter: self.settings.max_jitter,
                    history: vec![],
                };
                thread::spawn(move || worker.run())
            })
            .collect();
        drop(report_tx);

        let failure = match report_rx.recv() {
            Ok(Report::Quiescent) => None,
            Ok(Report::Aborted(process, source)) => {
                log::error!("Process {process} aborted: {source}");
                Some(SimulationError::Protocol { process, source })
            }
            // every worker hung up without a word, which can only be a panic
            Err(_) => None,
        };

        for inbox in &inboxes {
            // workers that already bailed out have dropped their receiver
            let _ = inbox.send(Envelope::Shutdown);
        }

        let mut summaries = Vec::with_capacity(n);
        let mut history = vec![];
        for handle in handles {
            let finished = match handle.join() {
                Ok(x) => x,
                Err(panic) => std::panic::resume_unwind(panic),
            };
            let id = finished.summary.id;
            log::trace!("{:?}", finished.summary);
            history.extend(finished.history.into_iter().map(|event| (id, event)));
            summaries.push(finished.summary);
        }

        if let Some(err) = failure {
            return Err(err);
        }
        Outcome::new(summaries, 0, history)
    }
}

impl Worker {
    fn run(mut self) -> Finished {
        let id = self.process.id();

        self.jitter();
        let started = self.step(|process, ctx| process.start(ctx));
        if self.finish_step(id, started) {
            while let Ok(Envelope::Deliver(incoming)) = self.inbox.recv() {
                self.jitter();
                let handled = self.step(|process, ctx| process.recv_message(incoming, ctx));
                if !self.finish_step(id, handled) {
                    break;
                }
            }
        }

        Finished {
            summary: ProcessSummary::of(&self.process),
            history: self.history,
        }
    }

    fn step<F>(&mut self, f: F) -> Result<(), ProtocolViolation>
    where
        F: FnOnce(&mut Process, &mut Context) -> Result<(), ProtocolViolation>,
    {
        let id = self.process.id();
        let mut outgoing = vec![];
        let mut events = vec![];
        let result = f(
            &mut self.process,
            &mut Context {
                outgoing: &mut outgoing,
                events: &mut events,
            },
        );

        for event in events {
            event.log(id);
            self.history.push(event);
        }
        result?;

        for Outgoing { to, msg } in outgoing {
            let target = match to {
                Side::Left => &self.left,
                Side::Right => &self.right,
            };
            // count it before it can possibly be received
            self.in_flight.fetch_add(1, Ordering::SeqCst);
            let _ = target.send(Envelope::Deliver(Incoming {
                from: to.opposite(),
                msg,
            }));
        }
        Ok(())
    }

    /// Settles the bookkeeping for one step. Returns false if the worker
    /// should stop.
    fn finish_step(&self, id: ProcessID, result: Result<(), ProtocolViolation>) -> bool {
        if let Err(violation) = result {
            let _ = self.reports.send(Report::Aborted(id, violation));
            return false;
        }

        // zero is final: nothing is left to deliver, so nobody can send again
        if self.in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
            log::debug!("[{id}] ring is quiescent");
            let _ = self.reports.send(Report::Quiescent);
        }
        true
    }

    fn jitter(&self) {
        if !self.max_jitter.is_zero() {
            let delay = rand::rng().random_range(Duration::ZERO..=self.max_jitter);
            thread::sleep(delay);
        }
    }
}

#[cfg(test)]
mod tests {
    use all_asserts::assert_le;
    use itertools::Itertools;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use super::*;
    use crate::hs::Status;

    fn ring(raw: &[u64]) -> RingIds {
        RingIds::new(raw.iter().copied().map(ProcessID).collect()).unwrap()
    }

    fn run(raw: &[u64], max_jitter: Duration) -> Outcome {
        ThreadedRing::new(ring(raw), ThreadedSettings { max_jitter })
            .run()
            .unwrap()
    }

    #[test]
    fn four_process_ring() {
        let outcome = run(&[3, 7, 2, 9], Duration::from_micros(200));
        assert_eq!(outcome.leader, ProcessID(9));
        for id in [3, 7, 2] {
            assert_eq!(outcome.status_of(ProcessID(id)), Some(Status::Defeated));
        }
    }

    #[test]
    fn two_process_ring() {
        let outcome = run(&[5, 1], Duration::ZERO);
        assert_eq!(outcome.leader, ProcessID(5));
        assert_eq!(outcome.processes[1].status, Status::Defeated);
        assert_eq!(outcome.processes[1].phase, 0);
    }

    #[test]
    fn lone_process_does_not_deadlock() {
        let outcome = run(&[42], Duration::ZERO);
        assert_eq!(outcome.leader, ProcessID(42));
        assert_le!(outcome.total_messages, 2);
    }

    #[test]
    fn random_rings_with_jitter() {
        let mut rng = StdRng::seed_from_u64(1234);
        for _ in 0..10 {
            let n = rng.random_range(1..=24);
            let ids = RingIds::random(n, &mut rng).unwrap();
            let outcome = ThreadedRing::new(
                ids.clone(),
                ThreadedSettings {
                    max_jitter: Duration::from_micros(100),
                },
            )
            .run()
            .unwrap();
            assert_eq!(outcome.leader, ids.max());
            assert!(outcome
                .processes
                .iter()
                .all(|p| p.id == ids.max() || p.status == Status::Defeated));
        }
    }

    #[test]
    fn history_is_grouped_in_ring_order() {
        let outcome = run(&[4, 8, 1, 6], Duration::ZERO);
        let order: Vec<_> = outcome
            .history
            .iter()
            .map(|(id, _)| *id)
            .dedup()
            .collect();
        assert_eq!(
            order,
            vec![ProcessID(4), ProcessID(8), ProcessID(1), ProcessID(6)]
        );
    }

    #[test]
    fn message_count_matches_every_send() {
        let outcome = run(&[1, 2, 3, 4, 5, 6, 7, 8], Duration::from_micros(50));
        let sends = outcome
            .history
            .iter()
            .filter(|(_, e)| matches!(e, Event::Send { .. }))
            .count() as u64;
        assert_eq!(outcome.total_messages, sends);
        assert_le!(outcome.total_messages, 6 * 8 * 3);
    }
}
