use thiserror::Error;

use crate::hs::ProcessID;
use crate::hs::Side;

/// Problems with the ring handed to us, caught before any process starts.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("a ring needs at least one process")]
    Empty,

    #[error("identifier {0} appears more than once")]
    Duplicate(ProcessID),

    #[error("cannot draw {requested} distinct identifiers from a pool of {available}")]
    TooMany { requested: usize, available: u64 },

    #[error("could not parse identifier '{0}' (expected a positive integer)")]
    Parse(String),
}

/// A message that the state machine should never have been able to produce.
/// Always fatal: it means the protocol logic is broken.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolViolation {
    #[error("phase {0} is too large for a 2^phase reach")]
    PhaseOverflow(u32),

    #[error(
        "outbound probe from {sender} in phase {phase} has distance {distance} (reach is {reach})"
    )]
    BadDistance {
        sender: ProcessID,
        phase: u32,
        distance: u64,
        reach: u64,
    },

    #[error("ack for {sender} in phase {phase} still carries distance {distance}")]
    AckWithDistance {
        sender: ProcessID,
        phase: u32,
        distance: u64,
    },

    #[error(
        "{direction:?}-bound message from {sender} (returning: {returning}) arrived on the {from:?} side"
    )]
    WrongSide {
        sender: ProcessID,
        direction: Side,
        returning: bool,
        from: Side,
    },

    #[error("ack for phase {ack_phase} arrived while in phase {current_phase}")]
    StaleAck { ack_phase: u32, current_phase: u32 },

    #[error("second {0:?} ack in the same phase")]
    DuplicateAck(Side),

    #[error("own probe came back around the ring after being defeated")]
    OwnProbeWhileDefeated,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SimulationError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("process {process} aborted: {source}")]
    Protocol {
        process: ProcessID,
        #[source]
        source: ProtocolViolation,
    },

    #[error("no quiescence after {ticks} ticks ({in_flight} messages still in flight)")]
    Stalled { ticks: u64, in_flight: usize },

    #[error("election went wrong: {0}")]
    BadElection(String),
}
