//! Rewind core engine.
//!
//! Provides domain types, incremental feature computation, playbook
//! detectors, the LLM decision harness, and the position/exit engine.

pub mod domain;
pub mod features;
pub mod indicators;
pub mod llm;
pub mod playbooks;
pub mod positions;
pub mod schema;
