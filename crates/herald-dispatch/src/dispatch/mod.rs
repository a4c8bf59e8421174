//! Dispatcher module exports.
//!
//! Re-exports the dispatcher, its per-call report and the command awaiter so
//! downstream consumers can depend on this module directly.

mod awaiter;
pub mod dispatcher;
mod report;

pub use awaiter::{AwaitOutcome, CommandAwaiter};
pub use dispatcher::Dispatcher;
pub use report::DispatchReport;
