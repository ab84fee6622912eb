//! Agent Module - Core of the Career Co-Pilot
//!
//! Architecture:
//! - Memory: append-only session log with insight/context maps
//! - Completion: opaque language-model collaborator with local fallback
//! - Pipeline: fixed Onboarding → (SkillAnalysis | Feedback) → Learning call graph

pub mod completion;
pub mod memory;
pub mod pipeline;
pub mod types;

pub use completion::*;
pub use memory::*;
pub use pipeline::*;
pub use types::*;
