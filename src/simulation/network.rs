use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::collections::HashMap;

use rand::distr::Distribution;
use rand::distr::Uniform;
use rand::rngs::StdRng;

use crate::hs::Incoming;
use crate::hs::Outgoing;
use crate::hs::Side;
use crate::ring::neighbor;

/// Messages in flight between ring neighbors.
///
/// Every message gets a random delay, but a message never overtakes an earlier
/// one on the same directed link: each link is a FIFO queue, and only the
/// interleaving across links is left to chance.
#[derive(Debug)]
pub struct Network {
    in_flight: BinaryHeap<Reverse<Packet>>,
    rng: StdRng,
    delay_distribution: Uniform<u64>,
    ring_size: usize,
    // latest arrival time scheduled on each (sender, side) link
    link_clock: HashMap<(usize, Side), u64>,
    next_seq: u64,
}

#[derive(Debug, Clone)]
struct Packet {
    arrival_time: u64,
    seq: u64,
    to: usize,
    incoming: Incoming,
}

impl PartialEq for Packet {
    fn eq(&self, other: &Self) -> bool {
        (self.arrival_time, self.seq) == (other.arrival_time, other.seq)
    }
}

impl Eq for Packet {}

impl PartialOrd for Packet {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Packet {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // seq breaks ties, which keeps equal-time messages on a link in order
        (self.arrival_time, self.seq).cmp(&(other.arrival_time, other.seq))
    }
}

impl Network {
    pub fn new(rng: StdRng, delay_distribution: Uniform<u64>, ring_size: usize) -> Self {
        Self {
            in_flight: BinaryHeap::new(),
            rng,
            delay_distribution,
            ring_size,
            link_clock: HashMap::new(),
            next_seq: 0,
        }
    }

    pub fn enqueue(&mut self, current_tick: u64, from: usize, msgs: Vec<Outgoing>) {
        for Outgoing { to: side, msg } in msgs {
            let (to, arrival_side) = neighbor(from, side, self.ring_size);

            let delay = self.delay_distribution.sample(&mut self.rng);
            let link_clock = self.link_clock.entry((from, side)).or_default();
            let arrival_time = std::cmp::max(current_tick + delay, *link_clock);
            *link_clock = arrival_time;

            log::trace!("  {from} -> {to} (arrives t={arrival_time}): {msg}");
            self.in_flight.push(Reverse(Packet {
                arrival_time,
                seq: self.next_seq,
                to,
                incoming: Incoming {
                    from: arrival_side,
                    msg,
                },
            }));
            self.next_seq += 1;
        }
    }

    /// Pops the next message due by `current_tick`, with the index of the
    /// process it's addressed to.
    pub fn next_msg(&mut self, current_tick: u64) -> Option<(usize, Incoming)> {
        if let Some(Reverse(packet)) = self.in_flight.peek() {
            if packet.arrival_time <= current_tick {
                return self.in_flight.pop().map(|x| (x.0.to, x.0.incoming));
            }
        }
        None
    }

    pub fn is_empty(&self) -> bool {
        self.in_flight.is_empty()
    }

    pub fn len(&self) -> usize {
        self.in_flight.len()
    }
}
