pub mod voter;

pub use voter::{IdentityScheme, VoterKey};
