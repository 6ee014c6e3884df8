use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::game::ledger::PlayedCard;
use crate::protocol::{CalamityReport, CardId, RiskMarker};

// ── Catalogue data ─────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Risk {
    pub name: String,
    #[serde(default)]
    pub category: Option<String>,
    /// 1..=5
    #[serde(default = "default_severity")]
    pub severity: u8,
    #[serde(default)]
    pub disaster_tags: Vec<String>,
    #[serde(default = "default_base_probability")]
    pub base_probability: f32,
    #[serde(default = "default_escalation_rate")]
    pub escalation_rate: f32,
}

fn default_severity() -> u8 {
    1
}

fn default_base_probability() -> f32 {
    0.02
}

fn default_escalation_rate() -> f32 {
    0.01
}

impl Risk {
    /// Chance this risk triggers during `turn`'s calamity check.
    pub fn trigger_probability(&self, turn: u32) -> f32 {
        self.base_probability + self.escalation_rate * turn as f32
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Disaster {
    pub name: String,
    pub required_tags: Vec<String>,
    #[serde(default = "default_base_chance")]
    pub base_chance: f32,
    #[serde(default = "default_severity_multiplier")]
    pub severity_multiplier: f32,
}

fn default_base_chance() -> f32 {
    0.1
}

fn default_severity_multiplier() -> f32 {
    1.5
}

/// Card id → risks it puts on the board once accepted, plus the disasters
/// those risks can set off.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RiskCatalogue {
    #[serde(default)]
    pub cards: HashMap<CardId, Vec<Risk>>,
    #[serde(default)]
    pub disasters: Vec<Disaster>,
}

impl RiskCatalogue {
    pub fn load(path: &Path) -> Result<Self, String> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read {}: {}", path.display(), e))?;
        serde_json::from_str(&text).map_err(|e| format!("Invalid catalogue {}: {}", path.display(), e))
    }

    pub fn risks_for(&self, card_id: &str) -> &[Risk] {
        self.cards.get(card_id).map(Vec::as_slice).unwrap_or(&[])
    }
}

// ── Board collaborator ─────────────────────────────────────────────

/// What an accepted card did to the board.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CardImpact {
    pub cells: Vec<u32>,
    pub crisis_delta: u32,
}

/// The board-risk placement service the authority hands accepted cards to.
pub trait RiskPlacement: Send {
    fn apply_accepted_card(&mut self, card: &PlayedCard) -> CardImpact;

    /// Rolls the active risks for `turn` and reports a disaster if one fires.
    fn evaluate_calamity(&mut self, turn: u32) -> Option<CalamityReport>;

    /// Every occupied cell, in cell id order.
    fn markers(&self) -> Vec<RiskMarker>;
}

/// Hex board whose cells each carry at most one risk marker.
pub struct HexRiskBoard {
    /// cell id -> axial (q, r)
    coords: Vec<(i32, i32)>,
    cells: BTreeMap<u32, Option<Risk>>,
    active: Vec<Risk>,
    catalogue: RiskCatalogue,
    risks_per_card: usize,
    rng: StdRng,
}

impl HexRiskBoard {
    pub fn new(radius: u32, risks_per_card: usize, catalogue: RiskCatalogue, seed: Option<u64>) -> Self {
        let coords = hex_cells(radius as i32);
        let cells = (0..coords.len() as u32).map(|id| (id, None)).collect();
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        info!(
            "Risk board initialized with {} hex cells, {} catalogued cards",
            coords.len(),
            catalogue.cards.len()
        );

        Self {
            coords,
            cells,
            active: Vec::new(),
            catalogue,
            risks_per_card,
            rng,
        }
    }

    pub fn cell_count(&self) -> usize {
        self.cells.len()
    }

    pub fn coords(&self, cell: u32) -> Option<(i32, i32)> {
        self.coords.get(cell as usize).copied()
    }

    /// Sets `risk` on the cell, replacing whatever was there.
    pub fn add_risk_to_cell(&mut self, cell: u32, risk: Risk) -> bool {
        match self.cells.get_mut(&cell) {
            Some(slot) => {
                info!("Risk '{}' set on cell {}", risk.name, cell);
                *slot = Some(risk);
                true
            }
            None => {
                warn!("Hex cell {} does not exist", cell);
                false
            }
        }
    }

    pub fn cell_risk(&self, cell: u32) -> Option<&Risk> {
        self.cells.get(&cell).and_then(Option::as_ref)
    }

    pub fn cells_with_risk(&self) -> Vec<u32> {
        self.cells
            .iter()
            .filter(|(_, risk)| risk.is_some())
            .map(|(&id, _)| id)
            .collect()
    }

    fn random_cells(&mut self, count: usize) -> Vec<u32> {
        let ids: Vec<u32> = self.cells.keys().copied().collect();
        ids.choose_multiple(&mut self.rng, count).copied().collect()
    }
}

impl RiskPlacement for HexRiskBoard {
    fn apply_accepted_card(&mut self, card: &PlayedCard) -> CardImpact {
        let risks = self.catalogue.risks_for(&card.card_id).to_vec();
        if risks.is_empty() {
            info!("Card {} has no risks to resolve", card.card_id);
            return CardImpact::default();
        }

        let mut impact = CardImpact::default();
        for risk in risks {
            let targets = self.random_cells(self.risks_per_card);
            for &cell in &targets {
                self.add_risk_to_cell(cell, risk.clone());
            }
            info!(
                "Risk '{}' from card {} ({:?}) resolved to {} cell(s)",
                risk.name,
                card.card_id,
                card.role,
                targets.len()
            );
            impact.cells.extend(targets);
            impact.crisis_delta += 1;
            self.active.push(risk);
        }
        impact
    }

    fn evaluate_calamity(&mut self, turn: u32) -> Option<CalamityReport> {
        let mut triggered = Vec::new();
        for risk in &self.active {
            if self.rng.gen::<f32>() < risk.trigger_probability(turn) {
                triggered.push(risk.clone());
            }
        }
        if triggered.is_empty() {
            return None;
        }

        let tags: BTreeSet<&str> = triggered
            .iter()
            .flat_map(|r| r.disaster_tags.iter().map(String::as_str))
            .collect();

        for disaster in &self.catalogue.disasters {
            if !disaster.required_tags.iter().any(|t| tags.contains(t.as_str())) {
                continue;
            }
            if self.rng.gen::<f32>() < disaster.base_chance {
                let severity: u32 = triggered.iter().map(|r| r.severity as u32).sum();
                let crisis_delta = (severity as f32 * disaster.severity_multiplier).round() as u32;
                warn!(
                    "Calamity '{}' on turn {} ({} risks triggered, crisis +{})",
                    disaster.name,
                    turn,
                    triggered.len(),
                    crisis_delta
                );
                return Some(CalamityReport {
                    disaster: disaster.name.clone(),
                    triggered_risks: triggered.iter().map(|r| r.name.clone()).collect(),
                    crisis_delta,
                });
            }
        }
        None
    }

    fn markers(&self) -> Vec<RiskMarker> {
        self.cells_with_risk()
            .into_iter()
            .filter_map(|cell| {
                let risk = self.cell_risk(cell)?;
                let (q, r) = self.coords(cell)?;
                Some(RiskMarker {
                    cell,
                    q,
                    r,
                    risk: risk.name.clone(),
                    category: risk.category.clone(),
                    severity: risk.severity,
                })
            })
            .collect()
    }
}

/// Axial coordinates of a hexagon-shaped board, in cell id order.
fn hex_cells(radius: i32) -> Vec<(i32, i32)> {
    let mut cells = Vec::new();
    for q in -radius..=radius {
        let r1 = (-radius).max(-q - radius);
        let r2 = radius.min(-q + radius);
        for r in r1..=r2 {
            cells.push((q, r));
        }
    }
    cells
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Role;

    fn risk(name: &str, probability: f32, tags: &[&str]) -> Risk {
        Risk {
            name: name.to_string(),
            category: None,
            severity: 2,
            disaster_tags: tags.iter().map(|t| t.to_string()).collect(),
            base_probability: probability,
            escalation_rate: 0.0,
        }
    }

    fn disaster(name: &str, tags: &[&str], chance: f32) -> Disaster {
        Disaster {
            name: name.to_string(),
            required_tags: tags.iter().map(|t| t.to_string()).collect(),
            base_chance: chance,
            severity_multiplier: 1.5,
        }
    }

    fn played(card_id: &str) -> PlayedCard {
        PlayedCard {
            card_id: card_id.to_string(),
            observer: 1,
            role: Role::Farming,
        }
    }

    #[test]
    fn board_radius_three_has_37_cells() {
        assert_eq!(hex_cells(0).len(), 1);
        assert_eq!(hex_cells(1).len(), 7);
        let board = HexRiskBoard::new(3, 1, RiskCatalogue::default(), Some(1));
        assert_eq!(board.cell_count(), 37);
        assert_eq!(board.coords(0), Some((-3, 0)));
        assert_eq!(board.coords(36), Some((3, 0)));
        assert!(board.cells_with_risk().is_empty());
    }

    #[test]
    fn probability_escalates_with_turn() {
        let mut r = risk("drought", 0.1, &[]);
        r.escalation_rate = 0.05;
        assert!((r.trigger_probability(2) - 0.2).abs() < 1e-6);
    }

    #[test]
    fn unknown_card_changes_nothing() {
        let mut board = HexRiskBoard::new(2, 1, RiskCatalogue::default(), Some(7));
        let impact = board.apply_accepted_card(&played("mystery"));
        assert_eq!(impact, CardImpact::default());
        assert!(board.cells_with_risk().is_empty());
    }

    #[test]
    fn accepted_card_marks_distinct_cells() {
        let mut catalogue = RiskCatalogue::default();
        catalogue
            .cards
            .insert("dam".to_string(), vec![risk("flood", 0.0, &["water"])]);
        let mut board = HexRiskBoard::new(2, 3, catalogue, Some(7));

        let impact = board.apply_accepted_card(&played("dam"));
        assert_eq!(impact.crisis_delta, 1);
        assert_eq!(impact.cells.len(), 3);
        let distinct: BTreeSet<u32> = impact.cells.iter().copied().collect();
        assert_eq!(distinct.len(), 3);
        let mut placed = impact.cells.clone();
        placed.sort_unstable();
        assert_eq!(board.cells_with_risk(), placed);
    }

    #[test]
    fn new_risk_replaces_old_one_on_cell() {
        let mut board = HexRiskBoard::new(1, 1, RiskCatalogue::default(), Some(3));
        assert!(board.add_risk_to_cell(0, risk("smog", 0.0, &[])));
        assert!(board.add_risk_to_cell(0, risk("fire", 0.0, &[])));
        assert_eq!(board.cell_risk(0).unwrap().name, "fire");
        assert!(!board.add_risk_to_cell(99, risk("fire", 0.0, &[])));
        assert_eq!(board.cells_with_risk(), vec![0]);
    }

    #[test]
    fn disaster_fires_when_tags_match() {
        let mut catalogue = RiskCatalogue::default();
        catalogue
            .cards
            .insert("mine".to_string(), vec![risk("wildfire", 1.0, &["fire"])]);
        catalogue.disasters.push(disaster("Firestorm", &["fire"], 1.0));
        let mut board = HexRiskBoard::new(2, 1, catalogue, Some(11));

        board.apply_accepted_card(&played("mine"));
        let report = board.evaluate_calamity(1).expect("disaster expected");
        assert_eq!(report.disaster, "Firestorm");
        assert_eq!(report.triggered_risks, vec!["wildfire".to_string()]);
        assert_eq!(report.crisis_delta, 3); // severity 2 * 1.5
    }

    #[test]
    fn no_disaster_without_matching_tags() {
        let mut catalogue = RiskCatalogue::default();
        catalogue
            .cards
            .insert("mine".to_string(), vec![risk("wildfire", 1.0, &["fire"])]);
        catalogue.disasters.push(disaster("Flood", &["water"], 1.0));
        let mut board = HexRiskBoard::new(2, 1, catalogue, Some(11));

        board.apply_accepted_card(&played("mine"));
        assert!(board.evaluate_calamity(1).is_none());
    }

    #[test]
    fn markers_carry_axial_coordinates_and_risk() {
        let mut board = HexRiskBoard::new(1, 1, RiskCatalogue::default(), Some(5));
        let mut smog = risk("smog", 0.0, &[]);
        smog.severity = 4;
        board.add_risk_to_cell(3, smog);

        assert_eq!(
            board.markers(),
            vec![RiskMarker {
                cell: 3,
                q: 0,
                r: 0,
                risk: "smog".to_string(),
                category: None,
                severity: 4,
            }]
        );
    }

    #[test]
    fn catalogue_parses_with_defaults() {
        let json = r#"{
            "cards": { "c1": [ { "name": "erosion", "disaster_tags": ["soil"] } ] },
            "disasters": [ { "name": "Dust Bowl", "required_tags": ["soil"] } ]
        }"#;
        let catalogue: RiskCatalogue = serde_json::from_str(json).unwrap();
        let risks = catalogue.risks_for("c1");
        assert_eq!(risks.len(), 1);
        assert_eq!(risks[0].severity, 1);
        assert!((risks[0].base_probability - 0.02).abs() < 1e-6);
        assert!((catalogue.disasters[0].base_chance - 0.1).abs() < 1e-6);
        assert!(catalogue.risks_for("c2").is_empty());
    }
}
