//! CLI domain: parse, route and output only.
//! No cache logic; the route table dispatches to the cache engine.

mod output;
mod parse;
mod route;

pub use output::map_error;
pub use parse::{Cli, Commands, FilterArgs, InfoView};
pub use route::{build_filter, RunContext};
