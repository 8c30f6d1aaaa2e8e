//! tonflow: watches TON addresses and notifies subscribers of each new transaction

pub mod config;
pub mod delivery;
pub mod ledger;
pub mod sqlite_pragma;
pub mod storage;
pub mod watcher;
