//! The Hirschberg-Sinclair process: a per-node state machine that only ever
//! talks to its two ring neighbors.
//!
//! A process never learns the size of the ring. In phase `k` it sends a probe
//! carrying its id `2^k` hops in each direction; bigger ids kill the probe,
//! smaller ids let it through, and the node at the end of the reach turns it
//! around as an ack. Two acks move the process to the next phase. A probe that
//! makes it all the way around the ring and back to its originator means no
//! bigger id exists, so the originator is the leader.

use std::cmp::Ordering;
use std::fmt;

use crate::error::ProtocolViolation;

/// Reach is `1 << phase`, so anything past this can't be represented.
const MAX_PHASE: u32 = 63;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProcessID(pub u64);

/// Which side of a process a channel is attached to. Also used for the
/// direction a message travels, relative to the process that launched it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    Left,
    Right,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub sender_id: ProcessID,
    pub direction: Side,
    pub phase: u32,
    /// Hops left on the outbound leg; always zero once `returning` is set.
    pub distance: u64,
    pub returning: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Active,
    Defeated,
    Leader,
}

#[derive(Debug, Clone)]
pub struct Incoming {
    pub from: Side,
    pub msg: Message,
}

#[derive(Debug, Clone)]
pub struct Outgoing {
    pub to: Side,
    pub msg: Message,
}

/// Everything observable about a single step of a process, in the order it
/// happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Send { to: Side, msg: Message },
    Receive { from: Side, msg: Message },
    Kill { from: Side, msg: Message },
    PhaseAdvance { phase: u32 },
    Defeated { by: ProcessID },
    LeaderElected { phase: u32 },
}

/// Where a process puts the results of a step. The runner owns both buffers
/// and drains them afterwards.
pub struct Context<'a> {
    pub outgoing: &'a mut Vec<Outgoing>,
    pub events: &'a mut Vec<Event>,
}

#[derive(Debug)]
pub struct Process {
    id: ProcessID,
    phase: u32,
    left_ack: bool,
    right_ack: bool,
    status: Status,
    messages_sent: u64,
}

/// How far an outbound probe launched in `phase` may travel.
pub fn reach(phase: u32) -> Result<u64, ProtocolViolation> {
    if phase >= MAX_PHASE {
        return Err(ProtocolViolation::PhaseOverflow(phase));
    }
    Ok(1 << phase)
}

impl Side {
    pub fn opposite(self) -> Self {
        match self {
            Side::Left => Side::Right,
            Side::Right => Side::Left,
        }
    }
}

impl Message {
    /// Checks that the message is something a correct process could have
    /// sent, given the side of the receiver it showed up on.
    fn validate(&self, from: Side) -> Result<(), ProtocolViolation> {
        let reach = reach(self.phase)?;
        let expected_side = if self.returning {
            if self.distance != 0 {
                return Err(ProtocolViolation::AckWithDistance {
                    sender: self.sender_id,
                    phase: self.phase,
                    distance: self.distance,
                });
            }
            // acks travel against their direction, so they enter on that side
            self.direction
        } else {
            if self.distance == 0 || self.distance > reach {
                return Err(ProtocolViolation::BadDistance {
                    sender: self.sender_id,
                    phase: self.phase,
                    distance: self.distance,
                    reach,
                });
            }
            self.direction.opposite()
        };

        if from != expected_side {
            return Err(ProtocolViolation::WrongSide {
                sender: self.sender_id,
                direction: self.direction,
                returning: self.returning,
                from,
            });
        }
        Ok(())
    }
}

impl Process {
    pub fn new(id: ProcessID) -> Self {
        Self {
            id,
            phase: 0,
            left_ack: false,
            right_ack: false,
            status: Status::Active,
            messages_sent: 0,
        }
    }

    pub fn id(&self) -> ProcessID {
        self.id
    }

    pub fn phase(&self) -> u32 {
        self.phase
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn messages_sent(&self) -> u64 {
        self.messages_sent
    }

    pub fn status_line(&self) -> String {
        format!(
            "Process #{}: {:?} in phase {} ({} messages sent)",
            self.id, self.status, self.phase, self.messages_sent
        )
    }

    /// Kicks off phase 0.
    pub fn start(&mut self, ctx: &mut Context) -> Result<(), ProtocolViolation> {
        self.start_phase(ctx)
    }

    pub fn recv_message(
        &mut self,
        incoming: Incoming,
        ctx: &mut Context,
    ) -> Result<(), ProtocolViolation> {
        let Incoming { from, msg } = incoming;
        msg.validate(from)?;
        ctx.events.push(Event::Receive {
            from,
            msg: msg.clone(),
        });

        match self.status {
            // the election is over, whatever is still in flight is irrelevant
            Status::Leader => Ok(()),
            Status::Active | Status::Defeated => {
                if msg.returning {
                    self.handle_ack(from, msg, ctx)
                } else {
                    self.handle_probe(from, msg, ctx)
                }
            }
        }
    }

    fn start_phase(&mut self, ctx: &mut Context) -> Result<(), ProtocolViolation> {
        let distance = reach(self.phase)?;
        self.left_ack = false;
        self.right_ack = false;

        for side in [Side::Left, Side::Right] {
            self.send(
                ctx,
                side,
                Message {
                    sender_id: self.id,
                    direction: side,
                    phase: self.phase,
                    distance,
                    returning: false,
                },
            );
        }
        Ok(())
    }

    fn handle_probe(
        &mut self,
        from: Side,
        msg: Message,
        ctx: &mut Context,
    ) -> Result<(), ProtocolViolation> {
        match msg.sender_id.cmp(&self.id) {
            Ordering::Less => {
                ctx.events.push(Event::Kill { from, msg });
                Ok(())
            }
            Ordering::Equal => {
                // made it around the whole ring without meeting anyone bigger
                if self.status == Status::Defeated {
                    return Err(ProtocolViolation::OwnProbeWhileDefeated);
                }
                self.status = Status::Leader;
                ctx.events.push(Event::LeaderElected { phase: self.phase });
                Ok(())
            }
            Ordering::Greater => {
                if self.status == Status::Active {
                    self.status = Status::Defeated;
                    ctx.events.push(Event::Defeated { by: msg.sender_id });
                }

                // validate() guarantees distance >= 1
                let distance = msg.distance - 1;
                if distance > 0 {
                    let direction = msg.direction;
                    self.send(ctx, direction, Message { distance, ..msg });
                } else {
                    self.send(
                        ctx,
                        from,
                        Message {
                            distance: 0,
                            returning: true,
                            ..msg
                        },
                    );
                }
                Ok(())
            }
        }
    }

    fn handle_ack(
        &mut self,
        from: Side,
        msg: Message,
        ctx: &mut Context,
    ) -> Result<(), ProtocolViolation> {
        if msg.sender_id != self.id {
            // just a hop on the way home; the return leg has no hop limit
            let to = msg.direction.opposite();
            self.send(ctx, to, msg);
            return Ok(());
        }

        if self.status != Status::Active {
            // nothing to do with it anymore
            return Ok(());
        }

        if msg.phase != self.phase {
            return Err(ProtocolViolation::StaleAck {
                ack_phase: msg.phase,
                current_phase: self.phase,
            });
        }

        let ack = match from {
            Side::Left => &mut self.left_ack,
            Side::Right => &mut self.right_ack,
        };
        if *ack {
            return Err(ProtocolViolation::DuplicateAck(from));
        }
        *ack = true;

        if self.left_ack && self.right_ack {
            self.phase += 1;
            ctx.events.push(Event::PhaseAdvance { phase: self.phase });
            self.start_phase(ctx)?;
        }
        Ok(())
    }

    fn send(&mut self, ctx: &mut Context, to: Side, msg: Message) {
        self.messages_sent += 1;
        ctx.events.push(Event::Send {
            to,
            msg: msg.clone(),
        });
        ctx.outgoing.push(Outgoing { to, msg });
    }
}

impl Event {
    /// Reports the event through `log`, tagged with the process it belongs to.
    pub fn log(&self, id: ProcessID) {
        match self {
            Event::Send { to, msg } => log::trace!("[{id}] SEND -> {to:?}: {msg}"),
            Event::Receive { from, msg } => log::trace!("[{id}] RECV <- {from:?}: {msg}"),
            Event::Kill { from, msg } => {
                log::trace!("[{id}] KILL probe from {} ({from:?} side)", msg.sender_id)
            }
            Event::PhaseAdvance { phase } => {
                log::debug!("[{id}] START PHASE {phase} (reach {})", 1u64 << phase)
            }
            Event::Defeated { by } => log::debug!("[{id}] defeated by {by}"),
            Event::LeaderElected { phase } => {
                log::info!("[{id}] LEADER ELECTED in phase {phase}")
            }
        }
    }
}

impl fmt::Display for ProcessID {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} | dir={:?} | phase={} | dist={} | returning={}",
            self.sender_id, self.direction, self.phase, self.distance, self.returning
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Buffers {
        outgoing: Vec<Outgoing>,
        events: Vec<Event>,
    }

    impl Buffers {
        fn ctx(&mut self) -> Context<'_> {
            Context {
                outgoing: &mut self.outgoing,
                events: &mut self.events,
            }
        }
    }

    fn probe(sender: u64, direction: Side, phase: u32, distance: u64) -> Incoming {
        Incoming {
            from: direction.opposite(),
            msg: Message {
                sender_id: ProcessID(sender),
                direction,
                phase,
                distance,
                returning: false,
            },
        }
    }

    fn ack(sender: u64, direction: Side, phase: u32) -> Incoming {
        Incoming {
            from: direction,
            msg: Message {
                sender_id: ProcessID(sender),
                direction,
                phase,
                distance: 0,
                returning: true,
            },
        }
    }

    #[test]
    fn start_sends_phase_zero_probes_both_ways() {
        let mut p = Process::new(ProcessID(10));
        let mut buf = Buffers::default();
        p.start(&mut buf.ctx()).unwrap();

        assert_eq!(buf.outgoing.len(), 2);
        assert_eq!(buf.outgoing[0].to, Side::Left);
        assert_eq!(buf.outgoing[1].to, Side::Right);
        for out in &buf.outgoing {
            assert_eq!(out.msg.phase, 0);
            assert_eq!(out.msg.distance, 1);
            assert!(!out.msg.returning);
            assert_eq!(out.msg.direction, out.to);
        }
        assert_eq!(p.messages_sent(), 2);
    }

    #[test]
    fn smaller_probe_is_killed() {
        let mut p = Process::new(ProcessID(10));
        let mut buf = Buffers::default();
        p.recv_message(probe(3, Side::Right, 1, 2), &mut buf.ctx()).unwrap();

        assert!(buf.outgoing.is_empty());
        assert!(matches!(buf.events.last(), Some(Event::Kill { .. })));
        assert_eq!(p.status(), Status::Active);
        assert_eq!(p.messages_sent(), 0);
    }

    #[test]
    fn bigger_probe_is_forwarded_and_defeats() {
        let mut p = Process::new(ProcessID(10));
        let mut buf = Buffers::default();
        p.recv_message(probe(20, Side::Right, 2, 4), &mut buf.ctx()).unwrap();

        assert_eq!(p.status(), Status::Defeated);
        assert_eq!(buf.outgoing.len(), 1);
        let out = &buf.outgoing[0];
        assert_eq!(out.to, Side::Right);
        assert_eq!(out.msg.distance, 3);
        assert!(!out.msg.returning);
        assert!(buf
            .events
            .contains(&Event::Defeated { by: ProcessID(20) }));
    }

    #[test]
    fn probe_at_reach_limit_turns_around() {
        let mut p = Process::new(ProcessID(10));
        let mut buf = Buffers::default();
        p.recv_message(probe(20, Side::Left, 0, 1), &mut buf.ctx()).unwrap();

        let out = &buf.outgoing[0];
        // a Left-bound probe enters on the Right, so the ack goes back Right
        assert_eq!(out.to, Side::Right);
        assert!(out.msg.returning);
        assert_eq!(out.msg.distance, 0);
        assert_eq!(out.msg.sender_id, ProcessID(20));
        assert_eq!(out.msg.direction, Side::Left);
    }

    #[test]
    fn foreign_acks_are_relayed_toward_their_originator() {
        let mut p = Process::new(ProcessID(10));
        let mut buf = Buffers::default();
        p.recv_message(ack(20, Side::Right, 3), &mut buf.ctx()).unwrap();

        assert_eq!(buf.outgoing.len(), 1);
        assert_eq!(buf.outgoing[0].to, Side::Left);
        assert!(buf.outgoing[0].msg.returning);
        // relaying an ack says nothing about our own chances
        assert_eq!(p.status(), Status::Active);
    }

    #[test]
    fn both_acks_start_the_next_phase() {
        let mut p = Process::new(ProcessID(10));
        let mut buf = Buffers::default();
        p.start(&mut buf.ctx()).unwrap();
        buf.outgoing.clear();

        p.recv_message(ack(10, Side::Left, 0), &mut buf.ctx()).unwrap();
        assert_eq!(p.phase(), 0);
        assert!(buf.outgoing.is_empty());

        p.recv_message(ack(10, Side::Right, 0), &mut buf.ctx()).unwrap();
        assert_eq!(p.phase(), 1);
        assert_eq!(buf.outgoing.len(), 2);
        assert!(buf.outgoing.iter().all(|o| o.msg.distance == 2));
        assert!(buf.events.contains(&Event::PhaseAdvance { phase: 1 }));
    }

    #[test]
    fn own_probe_around_the_ring_elects_leader() {
        let mut p = Process::new(ProcessID(10));
        let mut buf = Buffers::default();
        p.recv_message(probe(10, Side::Right, 0, 1), &mut buf.ctx()).unwrap();
        assert_eq!(p.status(), Status::Leader);
        assert!(buf.events.contains(&Event::LeaderElected { phase: 0 }));

        // leftovers are ignored once elected
        buf.outgoing.clear();
        p.recv_message(probe(99, Side::Left, 0, 1), &mut buf.ctx()).unwrap();
        assert!(buf.outgoing.is_empty());
        assert_eq!(p.status(), Status::Leader);
    }

    #[test]
    fn defeated_process_drops_its_own_late_ack() {
        let mut p = Process::new(ProcessID(10));
        let mut buf = Buffers::default();
        p.start(&mut buf.ctx()).unwrap();
        p.recv_message(probe(20, Side::Right, 0, 1), &mut buf.ctx()).unwrap();
        buf.outgoing.clear();

        p.recv_message(ack(10, Side::Left, 0), &mut buf.ctx()).unwrap();
        p.recv_message(ack(10, Side::Right, 0), &mut buf.ctx()).unwrap();
        assert!(buf.outgoing.is_empty());
        assert_eq!(p.phase(), 0);
    }

    #[test]
    fn rejects_probe_beyond_its_reach() {
        let mut p = Process::new(ProcessID(10));
        let mut buf = Buffers::default();
        let err = p
            .recv_message(probe(20, Side::Right, 1, 3), &mut buf.ctx())
            .unwrap_err();
        assert!(matches!(
            err,
            ProtocolViolation::BadDistance {
                distance: 3,
                reach: 2,
                ..
            }
        ));

        let err = p
            .recv_message(probe(20, Side::Right, 1, 0), &mut buf.ctx())
            .unwrap_err();
        assert!(matches!(err, ProtocolViolation::BadDistance { .. }));
    }

    #[test]
    fn rejects_message_on_the_wrong_side() {
        let mut p = Process::new(ProcessID(10));
        let mut buf = Buffers::default();
        let mut incoming = probe(20, Side::Right, 0, 1);
        incoming.from = Side::Right;
        let err = p.recv_message(incoming, &mut buf.ctx()).unwrap_err();
        assert!(matches!(err, ProtocolViolation::WrongSide { .. }));
    }

    #[test]
    fn rejects_stale_and_duplicate_acks() {
        let mut p = Process::new(ProcessID(10));
        let mut buf = Buffers::default();
        p.start(&mut buf.ctx()).unwrap();

        let err = p
            .recv_message(ack(10, Side::Left, 4), &mut buf.ctx())
            .unwrap_err();
        assert_eq!(
            err,
            ProtocolViolation::StaleAck {
                ack_phase: 4,
                current_phase: 0
            }
        );

        p.recv_message(ack(10, Side::Left, 0), &mut buf.ctx()).unwrap();
        let err = p
            .recv_message(ack(10, Side::Left, 0), &mut buf.ctx())
            .unwrap_err();
        assert_eq!(err, ProtocolViolation::DuplicateAck(Side::Left));
    }

    #[test]
    fn rejects_ack_that_still_has_distance() {
        let mut p = Process::new(ProcessID(10));
        let mut buf = Buffers::default();
        let mut incoming = ack(20, Side::Left, 2);
        incoming.msg.distance = 1;
        let err = p.recv_message(incoming, &mut buf.ctx()).unwrap_err();
        assert!(matches!(err, ProtocolViolation::AckWithDistance { .. }));
    }

    #[test]
    fn huge_phase_overflows() {
        assert_eq!(reach(62), Ok(1 << 62));
        assert_eq!(reach(63), Err(ProtocolViolation::PhaseOverflow(63)));
    }
}
