use tracing::{debug, info, warn};

use crate::protocol::{BoardState, Phase};

/// Side effects attached to entering a phase.
///
/// The machine calls `on_enter` once per entered phase, after `board`
/// already reflects the new phase. The returned value is a crisis delta
/// applied before the next step.
pub trait PhaseHooks {
    fn on_enter(&mut self, board: &BoardState) -> i64;
}

/// Owner of the `BoardState`. Nothing else changes turn, crisis or phase.
pub struct PhaseMachine {
    state: BoardState,
    transitioning: bool,
}

impl PhaseMachine {
    pub fn new() -> Self {
        Self {
            state: BoardState::default(),
            transitioning: false,
        }
    }

    pub fn current(&self) -> BoardState {
        self.state
    }

    pub fn phase(&self) -> Phase {
        self.state.phase
    }

    /// Moves one step along the phase order and runs the entry hooks.
    ///
    /// `target`, when given, must be the next phase; anything else is
    /// ignored. Entering Resolve continues straight into Draw. Returns every
    /// state entered in order, or nothing when the request was ignored
    /// (including any request made while a transition is running).
    pub fn advance(&mut self, target: Option<Phase>, hooks: &mut dyn PhaseHooks) -> Vec<BoardState> {
        if self.transitioning {
            debug!("Advance requested mid-transition; ignoring");
            return Vec::new();
        }

        let next = self.state.phase.next();
        if let Some(target) = target {
            if target != next {
                warn!(
                    "Refusing {:?} -> {:?}: next phase is {:?}",
                    self.state.phase, target, next
                );
                return Vec::new();
            }
        }

        self.transitioning = true;
        let mut visited = Vec::with_capacity(2);
        let mut step = Some(next);

        while let Some(to) = step {
            let from = self.state.phase;
            match (from, to) {
                (Phase::Lobby, Phase::Draw) => {
                    self.state.turn_number = 1;
                    self.state.crisis_level = 0;
                }
                (Phase::Resolve, Phase::Draw) => {
                    self.state.turn_number += 1;
                }
                _ => {}
            }
            self.state.phase = to;
            info!(
                "Phase {:?} -> {:?} (turn {}, crisis {})",
                from, to, self.state.turn_number, self.state.crisis_level
            );

            let delta = hooks.on_enter(&self.state);
            self.apply_crisis_delta(delta);
            visited.push(self.state);

            step = (to == Phase::Resolve).then_some(Phase::Draw);
        }

        self.transitioning = false;
        visited
    }

    /// Raises or lowers the crisis level, saturating at zero and `u32::MAX`.
    pub fn apply_crisis_delta(&mut self, delta: i64) {
        self.state = self.state.with_crisis_delta(delta);
    }
}

impl Default for PhaseMachine {
    fn default() -> Self {
        Self::new()
    }
}
