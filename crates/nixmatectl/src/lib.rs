//! Nixmate Control library - exposes modules for testing

pub mod cli;
pub mod commands;
pub mod output;
pub mod progress_display;
pub mod repl;
