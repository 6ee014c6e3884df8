use std::collections::{BTreeSet, HashMap};

use crate::protocol::{CardId, CardVerdict, ObserverId, Role};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayedCard {
    pub card_id: CardId,
    pub observer: ObserverId,
    pub role: Role,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerError {
    AlreadyPlayed,
    DuplicateCard,
    UnknownCard,
}

/// What `purge_observer` removed.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Purged {
    pub withdrawn_card: Option<CardId>,
    pub votes_removed: usize,
}

/// Plays and votes of the round in progress.
///
/// Played cards keep their play order; that order is the ballot order and
/// the resolution order.
#[derive(Debug, Default)]
pub struct RoundLedger {
    played: Vec<PlayedCard>,
    votes: HashMap<CardId, HashMap<ObserverId, bool>>,
    ballot: Vec<CardId>,
}

impl RoundLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.played.clear();
        self.votes.clear();
        self.ballot.clear();
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.played.is_empty() && self.votes.is_empty()
    }

    pub fn has_played(&self, observer: ObserverId) -> bool {
        self.played.iter().any(|card| card.observer == observer)
    }

    pub fn played(&self) -> &[PlayedCard] {
        &self.played
    }

    /// Number of distinct observers that played this round.
    pub fn player_count(&self) -> usize {
        self.played
            .iter()
            .map(|card| card.observer)
            .collect::<BTreeSet<_>>()
            .len()
    }

    /// Records the play and opens an empty vote bucket for the card.
    pub fn record_play(&mut self, card: PlayedCard) -> Result<(), LedgerError> {
        if self.has_played(card.observer) {
            return Err(LedgerError::AlreadyPlayed);
        }
        if self.votes.contains_key(&card.card_id) {
            return Err(LedgerError::DuplicateCard);
        }
        self.votes.insert(card.card_id.clone(), HashMap::new());
        self.played.push(card);
        Ok(())
    }

    /// Sets or overwrites the observer's vote. Returns the vote it replaced.
    pub fn record_vote(
        &mut self,
        observer: ObserverId,
        card_id: &str,
        vote_yes: bool,
    ) -> Result<Option<bool>, LedgerError> {
        let bucket = self.votes.get_mut(card_id).ok_or(LedgerError::UnknownCard)?;
        Ok(bucket.insert(observer, vote_yes))
    }

    #[cfg(test)]
    pub fn has_bucket(&self, card_id: &str) -> bool {
        self.votes.contains_key(card_id)
    }

    #[cfg(test)]
    pub fn votes_for(&self, card_id: &str) -> Option<&HashMap<ObserverId, bool>> {
        self.votes.get(card_id)
    }

    /// Snapshots the played card ids as the ballot. Later calls in the same
    /// round return the first snapshot unchanged.
    pub fn freeze_ballot(&mut self) -> Vec<CardId> {
        if self.ballot.is_empty() {
            self.ballot = self.played.iter().map(|c| c.card_id.clone()).collect();
        }
        self.ballot.clone()
    }

    pub fn ballot(&self) -> &[CardId] {
        &self.ballot
    }

    /// True when every played card has a vote from every one of `voters`.
    pub fn all_voted(&self, voters: &[ObserverId]) -> bool {
        self.played.iter().all(|card| {
            self.votes
                .get(&card.card_id)
                .map_or(false, |bucket| voters.iter().all(|v| bucket.contains_key(v)))
        })
    }

    /// Removes the observer's played card (with its bucket) and every vote
    /// it cast.
    pub fn purge_observer(&mut self, observer: ObserverId) -> Purged {
        let mut purged = Purged::default();

        if let Some(pos) = self.played.iter().position(|c| c.observer == observer) {
            let card = self.played.remove(pos);
            self.votes.remove(&card.card_id);
            purged.withdrawn_card = Some(card.card_id);
        }

        for bucket in self.votes.values_mut() {
            if bucket.remove(&observer).is_some() {
                purged.votes_removed += 1;
            }
        }

        purged
    }

    /// Drops every play and vote belonging to an observer outside
    /// `connected`, plus buckets that lost their card. Returns how many
    /// entries were dropped.
    pub fn retain_observers(&mut self, connected: &BTreeSet<ObserverId>) -> usize {
        let mut dropped = 0;

        let before = self.played.len();
        self.played.retain(|c| connected.contains(&c.observer));
        dropped += before - self.played.len();

        let live: BTreeSet<&str> = self.played.iter().map(|c| c.card_id.as_str()).collect();
        let before = self.votes.len();
        self.votes.retain(|card_id, _| live.contains(card_id.as_str()));
        dropped += before - self.votes.len();

        for bucket in self.votes.values_mut() {
            let before = bucket.len();
            bucket.retain(|voter, _| connected.contains(voter));
            dropped += before - bucket.len();
        }

        dropped
    }

    /// Counts every played card's votes. Ties are accepted.
    pub fn tally(&self) -> Vec<CardVerdict> {
        self.played
            .iter()
            .map(|card| {
                let (yes, no) = self
                    .votes
                    .get(&card.card_id)
                    .map(|bucket| {
                        bucket.values().fold((0u32, 0u32), |(y, n), &vote| {
                            if vote {
                                (y + 1, n)
                            } else {
                                (y, n + 1)
                            }
                        })
                    })
                    .unwrap_or((0, 0));
                CardVerdict {
                    card_id: card.card_id.clone(),
                    played_by: card.observer,
                    role: card.role,
                    yes,
                    no,
                    accepted: yes >= no,
                    risk_cells: Vec::new(),
                }
            })
            .collect()
    }
}
