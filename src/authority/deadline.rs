use std::time::Duration;

use crate::protocol::Phase;

/// A pending forced advance for one phase entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline {
    pub generation: u64,
    pub phase: Phase,
    pub after: Duration,
}

/// Per-phase fairness timer. Only Play and Vote wait on players, so only
/// they get armed. Every phase change bumps the generation, which cancels
/// whatever was armed before.
pub struct DeadlineTimer {
    after: Option<Duration>,
    generation: u64,
    armed: Option<Deadline>,
}

impl DeadlineTimer {
    pub fn new(after: Option<Duration>) -> Self {
        Self {
            after,
            generation: 0,
            armed: None,
        }
    }

    pub fn rearm(&mut self, phase: Phase) {
        self.generation += 1;
        self.armed = match (self.after, phase) {
            (Some(after), Phase::Play | Phase::Vote) => Some(Deadline {
                generation: self.generation,
                phase,
                after,
            }),
            _ => None,
        };
    }

    pub fn armed(&self) -> Option<Deadline> {
        self.armed
    }

    /// Disarms and returns the deadline if `generation` is the armed one.
    pub fn expire(&mut self, generation: u64) -> Option<Deadline> {
        match self.armed {
            Some(deadline) if deadline.generation == generation => self.armed.take(),
            _ => None,
        }
    }
}
