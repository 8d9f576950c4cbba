pub mod bans;
pub mod repo;
pub mod reports;
pub mod schema;
pub mod stats;
pub mod store;

pub use store::{RowCounts, Store};
