//! Connection State Machine
//!
//! Defines the scheduler states and which transitions between them are valid.

use std::sync::atomic::{AtomicU8, Ordering};

/// Active state of the link scheduler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ConnectionState {
    /// Idle, no work per tick
    Wait = 0,
    /// Device discovery strategy runs every tick
    Scan = 1,
    /// Connection strategy runs every tick
    Connect = 2,
    /// Heartbeat evaluation runs every tick
    Watchdog = 3,
    /// Terminal, the scheduler loop exits
    Stop = 4,
}

impl ConnectionState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => ConnectionState::Wait,
            1 => ConnectionState::Scan,
            2 => ConnectionState::Connect,
            3 => ConnectionState::Watchdog,
            _ => ConnectionState::Stop,
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Wait => write!(f, "Wait"),
            ConnectionState::Scan => write!(f, "Scan"),
            ConnectionState::Connect => write!(f, "Connect"),
            ConnectionState::Watchdog => write!(f, "Watchdog"),
            ConnectionState::Stop => write!(f, "Stop"),
        }
    }
}

/// Check if a transition from one state to another is allowed
pub fn is_valid_transition(from: ConnectionState, to: ConnectionState) -> bool {
    use ConnectionState::*;

    match (from, to) {
        // Stop is absorbing
        (Stop, Stop) => true,
        (Stop, _) => false,

        // Same state is always valid
        (a, b) if a == b => true,

        // Stop can be reached from anywhere
        (_, Stop) => true,

        (Wait, Scan | Connect | Watchdog) => true,

        // Success, explicit stop, or switching strategy
        (Scan | Connect, Wait) => true,
        (Scan, Connect) | (Connect, Scan) => true,
        (Scan | Connect, Watchdog) => true,

        // Recovery always passes through Wait
        (Watchdog, Wait) => true,

        _ => false,
    }
}

/// Atomic holder of the current state
///
/// Any thread may request a transition; the scheduler observes the value at
/// its next tick.
#[derive(Debug)]
pub struct StateCell {
    raw: AtomicU8,
}

impl StateCell {
    /// Create a cell holding `initial`
    pub fn new(initial: ConnectionState) -> Self {
        Self {
            raw: AtomicU8::new(initial as u8),
        }
    }

    /// Current state
    pub fn get(&self) -> ConnectionState {
        ConnectionState::from_u8(self.raw.load(Ordering::SeqCst))
    }

    /// Move to `to` if the transition table allows it
    ///
    /// Returns the state that was replaced, or `Err(current)` if rejected.
    pub fn request(&self, to: ConnectionState) -> Result<ConnectionState, ConnectionState> {
        self.raw
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |raw| {
                let from = ConnectionState::from_u8(raw);
                is_valid_transition(from, to).then_some(to as u8)
            })
            .map(ConnectionState::from_u8)
            .map_err(ConnectionState::from_u8)
    }

    /// Move to `to` only if the current state is `expected`
    pub fn transition(&self, expected: ConnectionState, to: ConnectionState) -> bool {
        if !is_valid_transition(expected, to) {
            return false;
        }
        self.raw
            .compare_exchange(expected as u8, to as u8, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }
}

impl Default for StateCell {
    fn default() -> Self {
        Self::new(ConnectionState::Wait)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ConnectionState::*;

    const ALL: [ConnectionState; 5] = [Wait, Scan, Connect, Watchdog, Stop];

    #[test]
    fn test_initial_state() {
        let cell = StateCell::default();
        assert_eq!(cell.get(), Wait);
    }

    #[test]
    fn test_stop_is_absorbing() {
        for to in ALL {
            assert_eq!(is_valid_transition(Stop, to), to == Stop, "Stop -> {to}");
        }

        let cell = StateCell::new(Watchdog);
        assert_eq!(cell.request(Stop), Ok(Watchdog));
        for to in [Wait, Scan, Connect, Watchdog] {
            assert_eq!(cell.request(to), Err(Stop));
        }
        assert_eq!(cell.get(), Stop);
    }

    #[test]
    fn test_stop_reachable_from_anywhere() {
        for from in ALL {
            assert!(is_valid_transition(from, Stop));
        }
    }

    #[test]
    fn test_normal_connection_flow() {
        let cell = StateCell::default();
        assert_eq!(cell.request(Scan), Ok(Wait));
        assert_eq!(cell.request(Watchdog), Ok(Scan));
        assert_eq!(cell.request(Wait), Ok(Watchdog));
        assert_eq!(cell.request(Connect), Ok(Wait));
        assert_eq!(cell.request(Wait), Ok(Connect));
    }

    #[test]
    fn test_watchdog_recovers_through_wait() {
        assert!(!is_valid_transition(Watchdog, Scan));
        assert!(!is_valid_transition(Watchdog, Connect));

        let cell = StateCell::new(Watchdog);
        assert_eq!(cell.request(Scan), Err(Watchdog));
        assert_eq!(cell.get(), Watchdog);
    }

    #[test]
    fn test_transition_requires_expected_state() {
        let cell = StateCell::new(Scan);
        assert!(!cell.transition(Watchdog, Wait));
        assert_eq!(cell.get(), Scan);

        assert!(cell.transition(Scan, Wait));
        assert_eq!(cell.get(), Wait);
    }

    #[test]
    fn test_value_round_trips_through_cell() {
        for state in ALL {
            let cell = StateCell::new(state);
            assert_eq!(cell.get(), state);
        }
    }
}
