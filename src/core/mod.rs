pub mod bus;
pub mod clock;
pub mod collaborators;
pub mod config;
pub mod cooldown;
pub mod ledger;
pub mod orchestrator;
pub mod phrasebook;
pub mod recall;
pub mod session;
pub mod topic;
pub mod voice;
