pub mod lifecycle;

pub use lifecycle::{delete_all_content_from_ip, delete_entity, reconcile_movie, DeleteOutcome, MovieFate, PurgeCounts};
