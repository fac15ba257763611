//! CLI subcommand implementations.

pub mod decimate;
pub mod register;
pub mod rigid;
