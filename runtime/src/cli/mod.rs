//! CLI subcommand implementations for the slothound binary.

pub mod init_cmd;
pub mod register_cmd;
