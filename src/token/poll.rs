// src/token/poll.rs
//
// Peer readiness polling as an explicit state machine. The machine only
// decides what happens next; sleeping and querying belong to the driver.

/// Where the poll currently stands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollState {
    Polling { attempts: u32 },
    Stabilizing,
    Confirmed,
    TimedOut,
    Disconnected,
}

/// What the driver should do after feeding one observation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollStep {
    /// Not ready yet; wait one interval and query again
    Wait { remaining_attempts: u32 },
    /// First ready signal; wait out the stabilization delay, then re-check once
    Stabilize,
    /// The confirmatory check agreed
    Confirmed,
    /// Every attempt came back not ready
    TimedOut,
    /// Ready was seen, then lost on the confirmatory check
    Disconnected,
}

#[derive(Debug, Clone)]
pub struct PeerPoll {
    max_attempts: u32,
    state: PollState,
}

impl PeerPoll {
    /// `max_attempts` below one is treated as one
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            state: PollState::Polling { attempts: 0 },
        }
    }

    pub fn state(&self) -> PollState {
        self.state
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Feed the result of one status query
    pub fn observe(&mut self, ready: bool) -> PollStep {
        let (state, step) = match self.state {
            PollState::Polling { .. } if ready => (PollState::Stabilizing, PollStep::Stabilize),
            PollState::Polling { attempts } => {
                let attempts = attempts + 1;
                let remaining = self.max_attempts.saturating_sub(attempts);
                if remaining == 0 {
                    (PollState::TimedOut, PollStep::TimedOut)
                } else {
                    (
                        PollState::Polling { attempts },
                        PollStep::Wait {
                            remaining_attempts: remaining,
                        },
                    )
                }
            }
            PollState::Stabilizing if ready => (PollState::Confirmed, PollStep::Confirmed),
            PollState::Stabilizing => (PollState::Disconnected, PollStep::Disconnected),
            PollState::Confirmed => (PollState::Confirmed, PollStep::Confirmed),
            PollState::TimedOut => (PollState::TimedOut, PollStep::TimedOut),
            PollState::Disconnected => (PollState::Disconnected, PollStep::Disconnected),
        };
        self.state = state;
        step
    }
}
