//! Moderation core for a crowdsourced post-credit-scene database: votes,
//! dislike escalation and consistent deletion across the content graph.

pub mod database;
pub mod engine;
pub mod error;
pub mod escalation;
pub mod graph;
pub mod identity;
pub mod ledger;
pub mod notify;
pub mod reconcile;
pub mod sanitize;
pub mod utils;

#[cfg(test)]
mod testing;

pub use engine::Engine;
pub use error::{CoreError, CoreResult};
