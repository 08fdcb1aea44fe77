//! Engine primitives: rules, matching, document mutation, persistent state,
//! the knowledge sync queue and the orchestrator that drives them.

pub mod assets;
pub mod config;
pub mod error;
pub mod fsio;
pub mod git;
pub mod glob;
pub mod hooks;
pub mod matcher;
pub mod mutator;
pub mod orchestrator;
pub mod output;
pub mod rules;
pub mod state;
pub mod store;
pub mod sync;
pub mod time;
