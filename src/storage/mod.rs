pub mod ledger;
pub mod projection;

pub use ledger::{InvocationLedger, MergeEffect, UpsertOutcome};
pub use projection::{project, ProjectionSettings};
