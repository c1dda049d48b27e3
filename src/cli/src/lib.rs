pub mod commands;
pub mod process_command;
