pub mod ledger;
pub mod phase;
pub mod risk;
pub mod roles;
pub mod sectors;
