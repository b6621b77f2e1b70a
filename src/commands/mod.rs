// ABOUTME: Command module aggregator for the dockr CLI.
// ABOUTME: Re-exports plan, apply, destroy, and status command handlers.

mod apply;
mod plan;
mod runtime_connection;
mod status;

pub use apply::{apply, destroy};
pub use plan::plan;
pub use status::status;
