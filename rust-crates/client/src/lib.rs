pub mod actions;
pub mod aggregator;
pub mod clock;
pub mod config;
pub mod create;
pub mod format;
pub mod ledger;
pub mod logging;
pub mod orchestrator;
pub mod pool;
pub mod secrets;
pub mod service;
pub mod status;
pub mod tickets;
pub mod wallets;

#[cfg(any(test, feature = "test-helpers"))]
pub mod test_helpers;
