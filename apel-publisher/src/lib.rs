pub mod auditor;
pub mod broker;
pub mod cli;
pub mod load_config;
pub mod sign;

pub use cli::{run, Cli, Commands};
