//! The host-side gatekeeper for every game action.
//!
//! `Authority::apply` is the only way in: it takes one typed action, checks
//! it against the current phase, mutates the pool/ledger/sectors and returns
//! the messages the broadcaster should fan out. Nothing here touches the
//! network, so the whole state machine runs in plain unit tests.

mod deadline;
mod hooks;

use std::collections::BTreeSet;

use thiserror::Error;
use tracing::{info, warn};

use crate::config::RulesConfig;
use crate::game::ledger::{LedgerError, PlayedCard, RoundLedger};
use crate::game::phase::PhaseMachine;
use crate::game::risk::RiskPlacement;
use crate::game::roles::RolePool;
use crate::game::sectors::SectorStore;
use crate::protocol::{BoardState, CardId, ObserverId, Phase, RiskMarker, Role, ServerMessage};

pub use deadline::{Deadline, DeadlineTimer};
use hooks::RoundHooks;

// ── Inbound ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionKind {
    /// A player tablet; gets a role from the pool.
    Tablet,
    /// The shared board display. Holds no role and may force phase changes.
    Board,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Connect {
        observer: ObserverId,
        kind: ConnectionKind,
    },
    Disconnect {
        observer: ObserverId,
    },
    PlayCard {
        observer: ObserverId,
        card_id: CardId,
    },
    Vote {
        observer: ObserverId,
        card_id: CardId,
        vote_yes: bool,
    },
    NextPhase {
        requester: ObserverId,
    },
    DeadlineExpired {
        generation: u64,
    },
}

// ── Outbound ───────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    All,
    One(ObserverId),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outbound {
    pub target: Target,
    pub message: ServerMessage,
}

impl Outbound {
    pub fn all(message: ServerMessage) -> Self {
        Self {
            target: Target::All,
            message,
        }
    }

    pub fn to(observer: ObserverId, message: ServerMessage) -> Self {
        Self {
            target: Target::One(observer),
            message,
        }
    }
}

// ── Rejections ─────────────────────────────────────────────────────

/// Why an action was dropped. Logged, never returned to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error("observer {0} is already connected")]
    AlreadyConnected(ObserverId),
    #[error("observer {0} is not connected")]
    UnknownObserver(ObserverId),
    #[error("{action} is not allowed during {phase:?}")]
    WrongPhase { action: &'static str, phase: Phase },
    #[error("observer {0} holds no playable role")]
    NotRoleHolder(ObserverId),
    #[error("observer {0} already played this round")]
    AlreadyPlayed(ObserverId),
    #[error("card {0} is already in play this round")]
    DuplicateCard(CardId),
    #[error("card {0} is not on the ballot")]
    UnknownCard(CardId),
    #[error("observer {0} is not the board")]
    NotHost(ObserverId),
    #[error("deadline generation {0} is no longer armed")]
    StaleDeadline(u64),
}

// ── Authority ──────────────────────────────────────────────────────

pub struct Authority {
    rules: RulesConfig,
    phase: PhaseMachine,
    roles: RolePool,
    sectors: SectorStore,
    ledger: RoundLedger,
    risk: Box<dyn RiskPlacement>,
    boards: BTreeSet<ObserverId>,
    deadline: DeadlineTimer,
}

impl Authority {
    pub fn new(rules: RulesConfig, risk: Box<dyn RiskPlacement>) -> Self {
        let deadline = DeadlineTimer::new(rules.round_deadline);
        Self {
            rules,
            phase: PhaseMachine::new(),
            roles: RolePool::new(),
            sectors: SectorStore::new(),
            ledger: RoundLedger::new(),
            risk,
            boards: BTreeSet::new(),
            deadline,
        }
    }

    /// Applies one action and returns what should be sent as a result.
    /// Invalid actions produce no messages and leave all state untouched.
    pub fn apply(&mut self, action: Action) -> Vec<Outbound> {
        let mut out = Vec::new();

        let result = match action.clone() {
            Action::Connect { observer, kind } => self.connect(observer, kind, &mut out),
            Action::Disconnect { observer } => self.disconnect(observer, &mut out),
            Action::PlayCard { observer, card_id } => self.play_card(observer, card_id, &mut out),
            Action::Vote {
                observer,
                card_id,
                vote_yes,
            } => self.vote(observer, card_id, vote_yes, &mut out),
            Action::NextPhase { requester } => self.next_phase(requester, &mut out),
            Action::DeadlineExpired { generation } => self.deadline_expired(generation, &mut out),
        };

        if let Err(rejection) = result {
            warn!("Dropped {:?}: {}", action, rejection);
        }
        out
    }

    pub fn board(&self) -> BoardState {
        self.phase.current()
    }

    /// Occupied cells of the risk board.
    pub fn risk_markers(&self) -> Vec<RiskMarker> {
        self.risk.markers()
    }

    #[cfg(test)]
    pub fn role_of(&self, observer: ObserverId) -> Option<Role> {
        self.roles.role_of(observer)
    }

    #[cfg(test)]
    pub fn sector(&self, role: Role) -> Option<&crate::game::sectors::SectorState> {
        self.sectors.get(role)
    }

    #[cfg(test)]
    pub fn ledger(&self) -> &RoundLedger {
        &self.ledger
    }

    pub fn deadline(&self) -> Option<Deadline> {
        self.deadline.armed()
    }

    // ── Lifecycle ──────────────────────────────────────────────────

    fn connect(
        &mut self,
        observer: ObserverId,
        kind: ConnectionKind,
        out: &mut Vec<Outbound>,
    ) -> Result<(), Rejection> {
        if self.roles.is_connected(observer) || self.boards.contains(&observer) {
            return Err(Rejection::AlreadyConnected(observer));
        }

        let board = self.phase.current();

        if kind == ConnectionKind::Board {
            self.boards.insert(observer);
            info!("Board display connected as observer {}", observer);
            out.push(Outbound::to(observer, ServerMessage::BoardStateUpdated(board)));
            self.send_ballot_to(observer, out);
            return Ok(());
        }

        // Once the pool is empty this hands out the spectator sentinel.
        let role = self.roles.assign_role(observer);

        out.push(Outbound::to(
            observer,
            ServerMessage::RoleAssigned {
                observer_id: observer,
                role,
            },
        ));
        out.push(Outbound::to(observer, ServerMessage::BoardStateUpdated(board)));

        if role.is_playable() {
            let sector = self.sectors.create(role);
            out.push(Outbound::to(
                observer,
                ServerMessage::SectorUpdated {
                    observer_id: observer,
                    role,
                    resource_level: sector.resource_level,
                },
            ));
        }

        self.send_ballot_to(observer, out);
        Ok(())
    }

    fn disconnect(&mut self, observer: ObserverId, out: &mut Vec<Outbound>) -> Result<(), Rejection> {
        if self.boards.remove(&observer) {
            info!("Board display {} disconnected", observer);
            return Ok(());
        }

        let role = self
            .roles
            .reclaim(observer)
            .ok_or(Rejection::UnknownObserver(observer))?;
        if role.is_playable() {
            self.sectors.remove(role);
        }

        let purged = self.ledger.purge_observer(observer);
        if purged.withdrawn_card.is_some() || purged.votes_removed > 0 {
            info!(
                "Observer {} left mid-round: withdrew {:?}, {} vote(s) purged",
                observer, purged.withdrawn_card, purged.votes_removed
            );
        }

        self.check_quorum(out);
        Ok(())
    }

    // ── Round actions ──────────────────────────────────────────────

    fn play_card(
        &mut self,
        observer: ObserverId,
        card_id: CardId,
        out: &mut Vec<Outbound>,
    ) -> Result<(), Rejection> {
        let role = self.require_role_holder(observer, Phase::Play, "PlayCard")?;

        self.ledger
            .record_play(PlayedCard {
                card_id: card_id.clone(),
                observer,
                role,
            })
            .map_err(|e| match e {
                LedgerError::AlreadyPlayed => Rejection::AlreadyPlayed(observer),
                LedgerError::DuplicateCard => Rejection::DuplicateCard(card_id.clone()),
                LedgerError::UnknownCard => Rejection::UnknownCard(card_id.clone()),
            })?;
        info!("Observer {} ({:?}) played {}", observer, role, card_id);

        self.phase.apply_crisis_delta(self.rules.crisis_per_play);
        out.push(Outbound::all(ServerMessage::BoardStateUpdated(self.phase.current())));

        self.check_quorum(out);
        Ok(())
    }

    fn vote(
        &mut self,
        observer: ObserverId,
        card_id: CardId,
        vote_yes: bool,
        out: &mut Vec<Outbound>,
    ) -> Result<(), Rejection> {
        self.require_role_holder(observer, Phase::Vote, "Vote")?;

        let replaced = self
            .ledger
            .record_vote(observer, &card_id, vote_yes)
            .map_err(|_| Rejection::UnknownCard(card_id.clone()))?;
        info!(
            "Observer {} voted {} on {}{}",
            observer,
            if vote_yes { "yes" } else { "no" },
            card_id,
            if replaced.is_some() { " (changed)" } else { "" }
        );

        out.push(Outbound::to(
            observer,
            ServerMessage::VoteRecorded { card_id, vote_yes },
        ));

        self.check_quorum(out);
        Ok(())
    }

    fn next_phase(&mut self, requester: ObserverId, out: &mut Vec<Outbound>) -> Result<(), Rejection> {
        if !self.boards.contains(&requester) {
            return Err(Rejection::NotHost(requester));
        }
        info!("Board {} forced the next phase from {:?}", requester, self.phase.phase());
        self.force_advance(out);
        Ok(())
    }

    fn deadline_expired(&mut self, generation: u64, out: &mut Vec<Outbound>) -> Result<(), Rejection> {
        let deadline = self
            .deadline
            .expire(generation)
            .ok_or(Rejection::StaleDeadline(generation))?;
        if deadline.phase != self.phase.phase() {
            return Err(Rejection::StaleDeadline(generation));
        }
        info!("Round deadline for {:?} expired; forcing advance", deadline.phase);
        self.force_advance(out);
        Ok(())
    }

    // ── Transitions ────────────────────────────────────────────────

    /// Advance with whatever plays and votes exist, then see whether the new
    /// phase is already complete.
    fn force_advance(&mut self, out: &mut Vec<Outbound>) {
        if self.advance(None, out) {
            self.check_quorum(out);
        }
    }

    fn advance(&mut self, target: Option<Phase>, out: &mut Vec<Outbound>) -> bool {
        let mut hooks = RoundHooks {
            rules: &self.rules,
            roles: &self.roles,
            sectors: &mut self.sectors,
            ledger: &mut self.ledger,
            risk: &mut *self.risk,
            out,
        };
        let visited = self.phase.advance(target, &mut hooks);
        if visited.is_empty() {
            return false;
        }
        self.deadline.rearm(self.phase.phase());
        true
    }

    /// Auto-advances Play→Vote once every role holder played, and
    /// Vote→Resolve once every role holder voted on every played card.
    fn check_quorum(&mut self, out: &mut Vec<Outbound>) {
        let holders = self.roles.role_holders();
        if holders.is_empty() {
            return;
        }
        self.heal_ledger(&holders);

        match self.phase.phase() {
            Phase::Play if self.ledger.player_count() == holders.len() => {
                info!("All {} role holders played; moving to Vote", holders.len());
                if self.advance(Some(Phase::Vote), out) {
                    // An empty ballot is complete the moment it opens.
                    self.check_quorum(out);
                }
            }
            Phase::Vote if self.ledger.all_voted(&holders) => {
                info!("All votes are in; resolving");
                self.advance(Some(Phase::Resolve), out);
            }
            _ => {}
        }
    }

    /// Plays and votes may only come from current role holders. Anything
    /// else means the ledger drifted from the pool; rebuild it from the pool.
    fn heal_ledger(&mut self, holders: &[ObserverId]) {
        let connected: BTreeSet<ObserverId> = holders.iter().copied().collect();
        let dropped = self.ledger.retain_observers(&connected);
        if dropped > 0 {
            warn!("Round ledger referenced departed observers; dropped {} entries", dropped);
        }
    }

    // ── Helpers ────────────────────────────────────────────────────

    fn require_role_holder(
        &self,
        observer: ObserverId,
        phase: Phase,
        action: &'static str,
    ) -> Result<Role, Rejection> {
        let role = self
            .roles
            .role_of(observer)
            .ok_or(Rejection::UnknownObserver(observer))?;
        let current = self.phase.phase();
        if current != phase {
            return Err(Rejection::WrongPhase {
                action,
                phase: current,
            });
        }
        if !role.is_playable() {
            return Err(Rejection::NotRoleHolder(observer));
        }
        Ok(role)
    }

    fn send_ballot_to(&self, observer: ObserverId, out: &mut Vec<Outbound>) {
        if self.phase.phase() == Phase::Vote {
            out.push(Outbound::to(
                observer,
                ServerMessage::CardsToVoteOn {
                    card_ids: self.ledger.ballot().to_vec(),
                },
            ));
        }
    }
}
