//! Pathfinder Backend
//!
//! An agentic career co-pilot with:
//! - Onboarding → Analysis → Learning agent pipeline
//! - Session log with search, summary and export
//! - Fallback recommendations when the language model is unavailable

pub mod agent;
pub mod api;
pub mod config;

pub use agent::*;
pub use api::*;
pub use config::*;
