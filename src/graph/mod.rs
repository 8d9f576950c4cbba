pub mod node;

pub use node::{delete_subtree, sweep_reports, Node, ReportKind};
