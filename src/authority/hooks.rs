use tracing::info;

use crate::config::RulesConfig;
use crate::game::ledger::RoundLedger;
use crate::game::phase::PhaseHooks;
use crate::game::risk::RiskPlacement;
use crate::game::roles::RolePool;
use crate::game::sectors::SectorStore;
use crate::protocol::{BoardState, Phase, ServerMessage};

use super::Outbound;

/// Phase entry effects, borrowed out of the `Authority` for the length of
/// one transition.
pub(super) struct RoundHooks<'a> {
    pub rules: &'a RulesConfig,
    pub roles: &'a RolePool,
    pub sectors: &'a mut SectorStore,
    pub ledger: &'a mut RoundLedger,
    pub risk: &'a mut dyn RiskPlacement,
    pub out: &'a mut Vec<Outbound>,
}

impl PhaseHooks for RoundHooks<'_> {
    fn on_enter(&mut self, board: &BoardState) -> i64 {
        match board.phase {
            Phase::Draw => {
                self.snapshot(*board);
                self.ledger.clear();
                0
            }
            Phase::Vote => {
                self.snapshot(*board);
                let card_ids = self.ledger.freeze_ballot();
                info!("Ballot for turn {}: {:?}", board.turn_number, card_ids);
                self.out
                    .push(Outbound::all(ServerMessage::CardsToVoteOn { card_ids }));
                0
            }
            Phase::Resolve => {
                let (crisis_delta, resolved) = self.resolve(board);
                // Observers see Resolve with the round's effects already applied.
                self.snapshot(board.with_crisis_delta(crisis_delta));
                self.out.push(Outbound::all(resolved));
                crisis_delta
            }
            Phase::Lobby | Phase::Play => {
                self.snapshot(*board);
                0
            }
        }
    }
}

impl RoundHooks<'_> {
    fn snapshot(&mut self, board: BoardState) {
        self.out
            .push(Outbound::all(ServerMessage::BoardStateUpdated(board)));
    }

    /// Tallies every played card, hands accepted ones to the risk board and
    /// credits the playing sector. Returns the crisis delta and the
    /// `RoundResolved` summary.
    fn resolve(&mut self, board: &BoardState) -> (i64, ServerMessage) {
        let played = self.ledger.played().to_vec();
        let mut verdicts = self.ledger.tally();
        let mut crisis_delta = 0i64;

        for (card, verdict) in played.iter().zip(verdicts.iter_mut()) {
            info!(
                "Card {} ({:?}): {} yes / {} no -> {}",
                verdict.card_id,
                verdict.role,
                verdict.yes,
                verdict.no,
                if verdict.accepted { "accepted" } else { "rejected" }
            );
            if !verdict.accepted {
                continue;
            }

            let impact = self.risk.apply_accepted_card(card);
            crisis_delta = crisis_delta.saturating_add(i64::from(impact.crisis_delta));
            verdict.risk_cells = impact.cells;

            let Some(level) = self.sectors.increment(card.role, self.rules.resource_per_accept) else {
                continue;
            };
            if let Some(holder) = self.roles.holder_of(card.role) {
                self.out.push(Outbound::to(
                    holder,
                    ServerMessage::SectorUpdated {
                        observer_id: holder,
                        role: card.role,
                        resource_level: level,
                    },
                ));
            }
        }

        let calamity = self.risk.evaluate_calamity(board.turn_number);
        if let Some(report) = &calamity {
            crisis_delta = crisis_delta.saturating_add(i64::from(report.crisis_delta));
        }

        let resolved = ServerMessage::RoundResolved {
            turn_number: board.turn_number,
            verdicts,
            calamity,
        };
        (crisis_delta, resolved)
    }
}
