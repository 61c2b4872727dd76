use std::collections::HashSet;
use std::fmt;

use itertools::Itertools;
use rand::seq::index;
use rand::Rng;

use crate::error::ConfigError;
use crate::hs::ProcessID;
use crate::hs::Side;

/// Random identifiers are drawn from `1..=MAX_RANDOM_ID`.
pub const MAX_RANDOM_ID: u64 = 9999;

/// The identifiers of a ring, in clockwise order. Always non-empty and free
/// of duplicates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RingIds(Vec<ProcessID>);

impl RingIds {
    pub fn new(ids: Vec<ProcessID>) -> Result<Self, ConfigError> {
        if ids.is_empty() {
            return Err(ConfigError::Empty);
        }
        let mut seen = HashSet::with_capacity(ids.len());
        if let Some(dup) = ids.iter().find(|id| !seen.insert(**id)) {
            return Err(ConfigError::Duplicate(*dup));
        }
        Ok(Self(ids))
    }

    /// Draws `n` distinct identifiers uniformly from `1..=MAX_RANDOM_ID`.
    pub fn random<R: Rng + ?Sized>(n: usize, rng: &mut R) -> Result<Self, ConfigError> {
        if n as u64 > MAX_RANDOM_ID {
            return Err(ConfigError::TooMany {
                requested: n,
                available: MAX_RANDOM_ID,
            });
        }
        let ids = index::sample(rng, MAX_RANDOM_ID as usize, n)
            .into_iter()
            .map(|i| ProcessID(i as u64 + 1))
            .collect();
        Self::new(ids)
    }

    /// Parses something like `"3, 7, 2, 9"` or `"3 7 2 9"`.
    pub fn parse(s: &str) -> Result<Self, ConfigError> {
        let ids = s
            .split(|c: char| c == ',' || c.is_whitespace())
            .filter(|tok| !tok.is_empty())
            .map(|tok| match tok.parse::<u64>() {
                Ok(n) if n > 0 => Ok(ProcessID(n)),
                _ => Err(ConfigError::Parse(tok.to_string())),
            })
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(ids)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = ProcessID> + '_ {
        self.0.iter().copied()
    }

    pub fn max(&self) -> ProcessID {
        // non-empty by construction
        self.0.iter().copied().max().unwrap_or(ProcessID(0))
    }
}

/// Index of the process on the other end of `idx`'s `side` channel, and the
/// side it arrives on there.
pub fn neighbor(idx: usize, side: Side, n: usize) -> (usize, Side) {
    assert!(idx < n);
    match side {
        Side::Right => ((idx + 1) % n, Side::Left),
        Side::Left => ((idx + n - 1) % n, Side::Right),
    }
}

impl fmt::Display for RingIds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.0.iter().format(", "))
    }
}
