//! Pathfinder Types
//!
//! Shared data structures for the career co-pilot pipeline.

use serde::{Deserialize, Serialize};

// ============================================================
// AGENT NAMES
// ============================================================

pub const ONBOARDING_AGENT: &str = "OnboardingAgent";
pub const SKILL_ANALYSIS_AGENT: &str = "SkillAnalysisAgent";
pub const FEEDBACK_AGENT: &str = "FeedbackAgent";
pub const LEARNING_AGENT: &str = "LearningAgent";

// ============================================================
// USER PROFILE
// ============================================================

/// Profile fields supplied by the presentation layer.
/// Only presence is checked; values are free text.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserProfile {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub experience: Option<String>,
}

impl UserProfile {
    pub fn new(name: &str, role: &str, experience: &str) -> Self {
        Self {
            name: Some(name.to_string()),
            role: Some(role.to_string()),
            experience: Some(experience.to_string()),
        }
    }

    fn field(value: &Option<String>) -> &str {
        match value.as_deref().map(str::trim) {
            Some(v) if !v.is_empty() => v,
            _ => "Not provided",
        }
    }

    /// Profile block embedded in agent prompts
    pub fn describe(&self) -> String {
        format!(
            "Name: {}\nCurrent role: {}\nExperience: {}",
            Self::field(&self.name),
            Self::field(&self.role),
            Self::field(&self.experience)
        )
    }
}

// ============================================================
// ROUTE
// ============================================================

/// Branch of the pipeline chosen after onboarding
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Route {
    /// Skill analysis, then a skill-gap learning plan
    SkillsThenLearning,
    /// Feedback, then a transition plan
    FeedbackThenTransition,
    /// Feedback, then a development plan
    FeedbackThenDevelopment,
}

impl Route {
    pub fn as_str(&self) -> &'static str {
        match self {
            Route::SkillsThenLearning => "skills_then_learning",
            Route::FeedbackThenTransition => "feedback_then_transition",
            Route::FeedbackThenDevelopment => "feedback_then_development",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_profile_describe_fills_missing_fields() {
        let profile = UserProfile {
            name: Some("Sam".to_string()),
            role: Some("  ".to_string()),
            experience: None,
        };
        assert_eq!(
            profile.describe(),
            "Name: Sam\nCurrent role: Not provided\nExperience: Not provided"
        );
    }

    #[test]
    fn test_route_serializes_snake_case() {
        let json = serde_json::to_string(&Route::FeedbackThenTransition).unwrap();
        assert_eq!(json, "\"feedback_then_transition\"");
        assert_eq!(Route::SkillsThenLearning.as_str(), "skills_then_learning");
    }
}
