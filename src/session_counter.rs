//! Session count persistence and the 0 <-> 1 edge engine.
//!
//! The count is stored as a decimal string under the `session_count`
//! option. An absent value means zero, and writing zero deletes the value.

use crate::errors::SessionError;
use crate::paths::SESSION_COUNT;
use crate::value_store::ValueStore;

/// Whether a session is being opened or closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Open,
    Close,
}

impl Direction {
    pub fn is_going_down(self) -> bool {
        self == Direction::Close
    }
}

/// A supervisor action due on a count edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Edge {
    /// 0 -> 1: start the user's supervisor.
    Start,
    /// 1 -> 0: stop the user's supervisor.
    Stop,
}

/// The count change computed for one transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CountTransition {
    pub direction: Direction,
    pub previous: u64,
    pub next: u64,
    pub edge: Option<Edge>,
}

impl CountTransition {
    /// Plans the transition from the stored count.
    ///
    /// A close first removes the closing session, then checks for zero. An
    /// open checks for zero before adding itself. A close with nothing
    /// counted stays at zero and fires no edge.
    pub fn plan(previous: u64, direction: Direction) -> Self {
        let (next, edge) = match direction {
            Direction::Open => {
                let edge = (previous == 0).then_some(Edge::Start);
                (previous.saturating_add(1), edge)
            }
            Direction::Close => match previous.checked_sub(1) {
                Some(0) => (0, Some(Edge::Stop)),
                Some(next) => (next, None),
                None => (0, None),
            },
        };

        Self {
            direction,
            previous,
            next,
            edge,
        }
    }

    /// A close arriving when no session was counted.
    pub fn is_unbalanced(&self) -> bool {
        self.direction.is_going_down() && self.previous == 0
    }
}

/// Parses a stored count: optional surrounding whitespace, then a run of
/// decimal digits. Anything after the digits is ignored.
pub fn parse_count(raw: &str) -> Option<u64> {
    let trimmed = raw.trim_start();
    let digits_len = trimmed
        .bytes()
        .take_while(|b| b.is_ascii_digit())
        .count();
    trimmed.get(..digits_len)?.parse().ok()
}

/// Reads and writes one user's session count through a value store.
pub struct SessionCounter<'a, S: ValueStore + ?Sized> {
    store: &'a S,
}

impl<'a, S: ValueStore + ?Sized> SessionCounter<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    /// Returns the stored count. Missing or corrupt values count as zero.
    pub fn read(&self, user: &str) -> u64 {
        match self.store.get(user, SESSION_COUNT) {
            None => 0,
            Some(raw) => parse_count(&raw).unwrap_or_else(|| {
                tracing::warn!(user, value = %raw.trim(), "unreadable session count, using 0");
                0
            }),
        }
    }

    /// Persists `count`, deleting the value when it is zero.
    pub fn write(&self, user: &str, count: u64) -> Result<(), SessionError> {
        if count == 0 {
            return self.store.set(user, SESSION_COUNT, None);
        }
        self.store
            .set(user, SESSION_COUNT, Some(&count.to_string()))
    }
}

#[cfg(test)]
#[path = "tests/session_counter_tests.rs"]
mod tests;
