//! Nixmate Common - the natural-language to Nix command pipeline
//!
//! text -> Intent -> Command -> (validated) -> Execution -> Result
//!
//! Recognition is deterministic (rules + keyword scoring). Every command is
//! re-validated by the safety gate immediately before it is spawned.

pub mod ambiguity;
pub mod audit;
pub mod cache;
pub mod catalog;
pub mod command;
pub mod config;
pub mod context;
pub mod error;
pub mod exec;
pub mod intent;
pub mod logging;
pub mod pipeline;
pub mod progress;
pub mod safety;
pub mod system;
pub mod timeout;
pub mod typo;
pub mod types;

pub use error::{BuildError, ErrorKind, NixmateError};
pub use types::*;
