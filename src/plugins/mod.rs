//! Pluggable capabilities: per-language analyzers and knowledge records.

pub mod analyzer;
pub mod bash;
pub mod javascript;
pub mod knowledge;
pub mod python;
