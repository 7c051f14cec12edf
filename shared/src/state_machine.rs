//! Link State Machine
//!
//! Tracks whether the device link is up and which transitions the monitor
//! loop is allowed to make.

/// State of the device link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LinkState {
    #[default]
    Disconnected,
    Connected,
}

/// Events that can trigger link transitions
#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    /// `connect()` succeeded
    ConnectSucceeded,
    /// `connect()` failed; the device may not be present yet
    ConnectFailed { reason: String },
    /// Read returned nothing before the timeout
    ReadTimedOut,
    /// Read returned a line
    LineReceived,
    /// Probe, read or write reported a broken link
    LinkLost { reason: String },
}

/// Result of feeding an event to the state machine
#[derive(Debug, Clone, PartialEq)]
pub enum TransitionResult {
    /// State changed
    Changed { from: LinkState, to: LinkState },
    /// Event was valid and the state stays as it is
    Unchanged(LinkState),
    /// Event makes no sense in the current state
    Invalid { from: LinkState, event: LinkEvent },
}

/// State machine for the device link
#[derive(Debug, Default)]
pub struct LinkStateMachine {
    current_state: LinkState,
    connects: u64,
    consecutive_failures: u32,
}

impl LinkStateMachine {
    /// Create a new state machine in the Disconnected state
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> LinkState {
        self.current_state
    }

    pub fn is_connected(&self) -> bool {
        self.current_state == LinkState::Connected
    }

    /// Number of successful connects after the first
    pub fn reconnects(&self) -> u64 {
        self.connects.saturating_sub(1)
    }

    /// Connect attempts that failed since the last success
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Process an event and return the transition result
    pub fn process_event(&mut self, event: LinkEvent) -> TransitionResult {
        use LinkEvent::*;
        use LinkState::*;

        let from = self.current_state;
        let next = match (from, &event) {
            (Disconnected, ConnectSucceeded) => {
                self.connects += 1;
                self.consecutive_failures = 0;
                Some(Connected)
            }
            (Disconnected, ConnectFailed { .. }) => {
                self.consecutive_failures = self.consecutive_failures.saturating_add(1);
                Some(Disconnected)
            }
            (Connected, ReadTimedOut | LineReceived) => Some(Connected),
            (Connected, LinkLost { .. }) => Some(Disconnected),
            _ => None,
        };

        let Some(to) = next else {
            return TransitionResult::Invalid { from, event };
        };

        self.current_state = to;
        if from == to {
            TransitionResult::Unchanged(to)
        } else {
            TransitionResult::Changed { from, to }
        }
    }
}
