//! Connection lifecycle state
//!
//! The state is held in a single atomic so the dispatcher thread, callers
//! and the lifecycle manager can all read it without locking. Transitions
//! are compare-and-swap so exactly one party wins each edge.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

use crate::error::{Error, Result};

/// Lifecycle state of an adapter connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// Port not open
    Closed,
    /// Port open, identity probe in progress
    Opening,
    /// Commands may be issued
    Ready,
    /// Shutdown in progress
    Closing,
    /// Unrecoverable error or adapter in bootloader mode
    Faulted,
}

impl ConnectionState {
    fn to_raw(self) -> u8 {
        match self {
            Self::Closed => 0,
            Self::Opening => 1,
            Self::Ready => 2,
            Self::Closing => 3,
            Self::Faulted => 4,
        }
    }

    fn from_raw(raw: u8) -> Self {
        match raw {
            1 => Self::Opening,
            2 => Self::Ready,
            3 => Self::Closing,
            4 => Self::Faulted,
            _ => Self::Closed,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Closed => "closed",
            Self::Opening => "opening",
            Self::Ready => "ready",
            Self::Closing => "closing",
            Self::Faulted => "faulted",
        };
        f.write_str(name)
    }
}

/// Atomic holder for [`ConnectionState`]
#[derive(Debug)]
pub struct StateCell(AtomicU8);

impl Default for StateCell {
    fn default() -> Self {
        Self::new(ConnectionState::Closed)
    }
}

impl StateCell {
    /// Create a cell in the given state
    pub fn new(state: ConnectionState) -> Self {
        Self(AtomicU8::new(state.to_raw()))
    }

    /// Current state
    pub fn get(&self) -> ConnectionState {
        ConnectionState::from_raw(self.0.load(Ordering::Acquire))
    }

    /// Move from `from` to `to`; returns false if another transition won
    pub fn transition(&self, from: ConnectionState, to: ConnectionState) -> bool {
        let ok = self
            .0
            .compare_exchange(from.to_raw(), to.to_raw(), Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if ok {
            log::debug!("connection: {} -> {}", from, to);
        }
        ok
    }

    /// Move from any of `from` to `to`, returning the state that was left
    pub fn transition_from_any(
        &self,
        from: &[ConnectionState],
        to: ConnectionState,
    ) -> Option<ConnectionState> {
        let mut current = self.get();
        loop {
            if !from.contains(&current) {
                return None;
            }
            match self.0.compare_exchange(
                current.to_raw(),
                to.to_raw(),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    log::debug!("connection: {} -> {}", current, to);
                    return Some(current);
                }
                Err(raw) => current = ConnectionState::from_raw(raw),
            }
        }
    }

    /// Enter `Faulted` unless a shutdown is already under way
    pub fn fault(&self) -> bool {
        self.transition_from_any(
            &[ConnectionState::Opening, ConnectionState::Ready],
            ConnectionState::Faulted,
        )
        .is_some()
    }

    /// Fail fast unless the state is one of `allowed`
    pub fn ensure(&self, allowed: &[ConnectionState]) -> Result<()> {
        let state = self.get();
        if allowed.contains(&state) {
            Ok(())
        } else {
            Err(Error::NotConnected { state })
        }
    }
}
