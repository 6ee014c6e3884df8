use serde::{Deserialize, Serialize};

// ── Core type aliases ──────────────────────────────────────────────

/// Connection id handed out by the transport. Never taken from a payload.
pub type ObserverId = u64;
pub type CardId = String;

// ── Roles ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Role {
    /// Spectator sentinel, given out once every playable role is taken.
    Unassigned,
    Farming,
    Industry,
    Housing,
    Nature,
}

impl Role {
    /// Fixed hand-out order for the role pool.
    pub const PLAYABLE: [Role; 4] = [Role::Farming, Role::Industry, Role::Housing, Role::Nature];

    pub fn is_playable(self) -> bool {
        self != Role::Unassigned
    }
}

// ── Phases ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Phase {
    Lobby,
    Draw,
    Play,
    Vote,
    Resolve,
}

impl Phase {
    /// The single forward step from this phase. Resolve wraps to Draw; nothing
    /// ever returns to Lobby.
    pub fn next(self) -> Phase {
        match self {
            Phase::Lobby => Phase::Draw,
            Phase::Draw => Phase::Play,
            Phase::Play => Phase::Vote,
            Phase::Vote => Phase::Resolve,
            Phase::Resolve => Phase::Draw,
        }
    }
}

// ── Board ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoardState {
    pub turn_number: u32,
    pub crisis_level: u32,
    pub phase: Phase,
}

impl Default for BoardState {
    fn default() -> Self {
        Self {
            turn_number: 1,
            crisis_level: 0,
            phase: Phase::Lobby,
        }
    }
}

impl BoardState {
    /// The same board with `delta` applied to the crisis level, saturating at
    /// zero and `u32::MAX`.
    pub fn with_crisis_delta(self, delta: i64) -> Self {
        let level = i64::from(self.crisis_level)
            .saturating_add(delta)
            .clamp(0, i64::from(u32::MAX));
        Self {
            crisis_level: level as u32,
            ..self
        }
    }
}

// ── Resolution ─────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardVerdict {
    pub card_id: CardId,
    pub played_by: ObserverId,
    pub role: Role,
    pub yes: u32,
    pub no: u32,
    pub accepted: bool,
    /// Hex cells the card's risks were placed on. Empty unless accepted.
    #[serde(default)]
    pub risk_cells: Vec<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalamityReport {
    pub disaster: String,
    pub triggered_risks: Vec<String>,
    pub crisis_delta: u32,
}

/// One occupied cell of the risk board, as served to the board display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskMarker {
    pub cell: u32,
    /// Axial coordinates.
    pub q: i32,
    pub r: i32,
    pub risk: String,
    pub category: Option<String>,
    pub severity: u8,
}

// ── Client → Server messages ───────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClientMessage {
    PlayCard { card_id: CardId },
    Vote { card_id: CardId, vote_yes: bool },
    /// Only honoured from the board connection.
    NextPhase,
}

// ── Server → Client messages ───────────────────────────────────────

/// Everything the host emits. Whether a message goes to one observer or to
/// everyone is decided by the `Target` it is paired with, not by the variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServerMessage {
    RoleAssigned {
        observer_id: ObserverId,
        role: Role,
    },
    SectorUpdated {
        observer_id: ObserverId,
        role: Role,
        resource_level: i64,
    },
    BoardStateUpdated(BoardState),
    /// Ballot for the current Vote phase, in play order.
    CardsToVoteOn { card_ids: Vec<CardId> },
    VoteRecorded { card_id: CardId, vote_yes: bool },
    RoundResolved {
        turn_number: u32,
        verdicts: Vec<CardVerdict>,
        calamity: Option<CalamityReport>,
    },
}
