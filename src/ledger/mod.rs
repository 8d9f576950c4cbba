pub mod vote;

pub use vote::{apply_vote, Target, Tally, VoteKind, VoteOutcome, VoteState};
