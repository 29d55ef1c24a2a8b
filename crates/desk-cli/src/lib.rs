//! CLI argument models and validation for the desk daemon.
//!
//! Every flag is also settable through a `DESK_*` environment variable.

pub mod cli_args;
pub mod validation;

pub use cli_args::Cli;
pub use validation::*;
