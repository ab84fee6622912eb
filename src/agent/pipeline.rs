//! Career Pipeline Module
//!
//! Fixed call graph of role-played agents:
//!
//! ```text
//! OnboardingAgent ─┬─ "skill"/"learning"     → SkillAnalysisAgent → LearningAgent (skill gap)
//!                  ├─ "transition"/"change"  → FeedbackAgent      → LearningAgent (transition)
//!                  └─ otherwise              → FeedbackAgent      → LearningAgent (development)
//! ```
//!
//! Every step receives the session explicitly, records what it does, and
//! returns one piece of text. Completion failures are absorbed by
//! `complete_with_fallback`, so a run always produces a recommendation.

use super::completion::{complete_with_fallback, CompletionClient, CompletionRequest};
use super::memory::{MemoryError, Session};
use super::types::{
    Route, UserProfile, FEEDBACK_AGENT, LEARNING_AGENT, ONBOARDING_AGENT, SKILL_ANALYSIS_AGENT,
};
use async_trait::async_trait;
use log::info;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map};
use std::sync::Arc;

// ============================================================
// ROUTING
// ============================================================

/// Ordered (keyword, route) rules; the first keyword found wins.
pub const ROUTING_RULES: &[(&str, Route)] = &[
    ("skill", Route::SkillsThenLearning),
    ("learning", Route::SkillsThenLearning),
    ("transition", Route::FeedbackThenTransition),
    ("change", Route::FeedbackThenTransition),
];

pub const DEFAULT_ROUTE: Route = Route::FeedbackThenDevelopment;

/// Pick a branch from the onboarding assessment (case-insensitive containment)
pub fn select_route(assessment: &str) -> Route {
    let text = assessment.to_lowercase();
    ROUTING_RULES
        .iter()
        .find(|(keyword, _)| text.contains(keyword))
        .map(|(_, route)| *route)
        .unwrap_or(DEFAULT_ROUTE)
}

// ============================================================
// STEP CAPABILITY
// ============================================================

/// Everything a step reads besides the session
#[derive(Debug, Clone, Copy)]
pub struct StepInput<'a> {
    pub challenge: &'a str,
    pub profile: &'a UserProfile,
    /// Output of the previous step, if any
    pub upstream: Option<&'a str>,
}

impl StepInput<'_> {
    fn context_block(&self) -> String {
        let mut block = format!(
            "User profile:\n{}\n\nCareer challenge:\n{}",
            self.profile.describe(),
            self.challenge
        );
        if let Some(upstream) = self.upstream {
            block.push_str("\n\nFindings so far:\n");
            block.push_str(upstream);
        }
        block
    }
}

#[async_trait]
pub trait PipelineStep: Send + Sync {
    fn name(&self) -> &'static str;

    async fn handle(&self, session: &mut Session, input: &StepInput<'_>) -> Result<String, MemoryError>;
}

/// Shared plumbing for every agent: the completion client and output bound
#[derive(Clone)]
pub struct StepRuntime {
    client: Arc<dyn CompletionClient>,
    max_tokens: u32,
}

impl StepRuntime {
    pub fn new(client: Arc<dyn CompletionClient>, max_tokens: u32) -> Self {
        Self { client, max_tokens }
    }

    async fn ask(
        &self,
        session: &mut Session,
        agent: &str,
        role: &str,
        prompt: &str,
        temperature: f32,
        fallback: &str,
    ) -> String {
        let request = CompletionRequest::new(role, prompt, temperature, self.max_tokens);
        complete_with_fallback(self.client.as_ref(), session, agent, &request, fallback).await
    }
}

// ============================================================
// AGENTS
// ============================================================

/// Reads the challenge and names the underlying issue
pub struct OnboardingAgent {
    runtime: StepRuntime,
}

impl OnboardingAgent {
    const ROLE: &'static str = "You are an onboarding career coach. Identify the core issue behind a \
        professional's challenge in two or three sentences. Say explicitly whether it is a skill or \
        learning gap, a role transition or change, or a general development concern.";
    const TEMPERATURE: f32 = 0.3;
    const FALLBACK: &'static str = "Detected onboarding/learning issue.";

    pub fn new(runtime: StepRuntime) -> Self {
        Self { runtime }
    }
}

#[async_trait]
impl PipelineStep for OnboardingAgent {
    fn name(&self) -> &'static str {
        ONBOARDING_AGENT
    }

    async fn handle(&self, session: &mut Session, input: &StepInput<'_>) -> Result<String, MemoryError> {
        session.record(self.name(), &format!("Received challenge: {}", input.challenge), None)?;

        let prompt = format!("{}\n\nWhat is the core issue?", input.context_block());
        let assessment = self
            .runtime
            .ask(session, self.name(), Self::ROLE, &prompt, Self::TEMPERATURE, Self::FALLBACK)
            .await;

        session.record(self.name(), &assessment, None)?;
        Ok(assessment)
    }
}

/// Breaks a skill or learning issue down into concrete gaps
pub struct SkillAnalysisAgent {
    runtime: StepRuntime,
}

impl SkillAnalysisAgent {
    const ROLE: &'static str = "You are a technical skills analyst. List the specific skills the \
        person is missing for their goal and how critical each one is.";
    const TEMPERATURE: f32 = 0.4;
    const FALLBACK: &'static str =
        "Skill gap confirmed: hands-on practice in the core tools of the target area is missing.";

    pub fn new(runtime: StepRuntime) -> Self {
        Self { runtime }
    }
}

#[async_trait]
impl PipelineStep for SkillAnalysisAgent {
    fn name(&self) -> &'static str {
        SKILL_ANALYSIS_AGENT
    }

    async fn handle(&self, session: &mut Session, input: &StepInput<'_>) -> Result<String, MemoryError> {
        session.record(self.name(), "Mapping skill gaps against the current profile.", None)?;

        let prompt = format!("{}\n\nWhich skills are missing?", input.context_block());
        let analysis = self
            .runtime
            .ask(session, self.name(), Self::ROLE, &prompt, Self::TEMPERATURE, Self::FALLBACK)
            .await;

        session.record(self.name(), &analysis, None)?;
        Ok(analysis)
    }
}

/// Weighs the challenge against likely peer and performance feedback
pub struct FeedbackAgent {
    runtime: StepRuntime,
}

impl FeedbackAgent {
    const ROLE: &'static str = "You are a feedback reviewer. Based on the profile and challenge, state \
        what peer reviews and performance data would most likely show, and how strong that evidence is.";
    const TEMPERATURE: f32 = 0.5;
    const FALLBACKS: [&'static str; 3] = [
        "Recent peer reviews confirm this skill gap.",
        "Performance data shows need for improvement.",
        "No strong evidence, but upskilling recommended.",
    ];

    pub fn new(runtime: StepRuntime) -> Self {
        Self { runtime }
    }

    /// Canned finding for a challenge; the same challenge always gets the same one
    pub fn fallback(challenge: &str) -> &'static str {
        Self::FALLBACKS[challenge.chars().count() % Self::FALLBACKS.len()]
    }
}

#[async_trait]
impl PipelineStep for FeedbackAgent {
    fn name(&self) -> &'static str {
        FEEDBACK_AGENT
    }

    async fn handle(&self, session: &mut Session, input: &StepInput<'_>) -> Result<String, MemoryError> {
        session.record(self.name(), "Reviewing available feedback signals.", None)?;

        let prompt = format!("{}\n\nWhat does the feedback say?", input.context_block());
        let feedback = self
            .runtime
            .ask(
                session,
                self.name(),
                Self::ROLE,
                &prompt,
                Self::TEMPERATURE,
                Self::fallback(input.challenge),
            )
            .await;

        session.record(self.name(), &feedback, None)?;
        Ok(feedback)
    }
}

/// Kind of plan the learning agent drafts
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LearningFocus {
    SkillGap,
    Transition,
    Development,
}

impl LearningFocus {
    pub fn for_route(route: Route) -> Self {
        match route {
            Route::SkillsThenLearning => LearningFocus::SkillGap,
            Route::FeedbackThenTransition => LearningFocus::Transition,
            Route::FeedbackThenDevelopment => LearningFocus::Development,
        }
    }

    fn intent(&self) -> &'static str {
        match self {
            LearningFocus::SkillGap => "Suggesting a learning sprint for skill gap.",
            LearningFocus::Transition => "Drafting a role transition plan.",
            LearningFocus::Development => "Drafting a development plan.",
        }
    }

    fn ask(&self) -> &'static str {
        match self {
            LearningFocus::SkillGap => "Design a focused learning sprint that closes these gaps.",
            LearningFocus::Transition => "Design a step-by-step plan to make this transition.",
            LearningFocus::Development => "Design a growth plan for the next quarter.",
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            LearningFocus::SkillGap => "Learning Plan",
            LearningFocus::Transition => "Transition Plan",
            LearningFocus::Development => "Development Plan",
        }
    }
}

/// Turns upstream findings into an actionable plan
pub struct LearningAgent {
    runtime: StepRuntime,
    focus: LearningFocus,
}

impl LearningAgent {
    const ROLE: &'static str = "You are a learning and development planner. Produce a short, \
        time-boxed plan with concrete resources and a mentor or peer checkpoint.";
    const TEMPERATURE: f32 = 0.7;

    pub fn new(runtime: StepRuntime, focus: LearningFocus) -> Self {
        Self { runtime, focus }
    }

    pub fn focus(&self) -> LearningFocus {
        self.focus
    }

    fn fallback(challenge: &str) -> String {
        format!("Plan: Complete 2-week sprint on '{}' with mentor support.", challenge)
    }
}

#[async_trait]
impl PipelineStep for LearningAgent {
    fn name(&self) -> &'static str {
        LEARNING_AGENT
    }

    async fn handle(&self, session: &mut Session, input: &StepInput<'_>) -> Result<String, MemoryError> {
        session.record(self.name(), self.focus.intent(), None)?;

        let prompt = format!("{}\n\n{}", input.context_block(), self.focus.ask());
        let fallback = Self::fallback(input.challenge);
        let plan = self
            .runtime
            .ask(session, self.name(), Self::ROLE, &prompt, Self::TEMPERATURE, &fallback)
            .await;

        session.record(self.name(), &plan, None)?;
        Ok(plan)
    }
}

// ============================================================
// PIPELINE
// ============================================================

/// Result of one pipeline run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineOutcome {
    pub route: Route,
    pub recommendation: String,
}

pub struct CareerPipeline {
    runtime: StepRuntime,
}

impl CareerPipeline {
    pub fn new(client: Arc<dyn CompletionClient>, max_tokens: u32) -> Self {
        Self {
            runtime: StepRuntime::new(client, max_tokens),
        }
    }

    /// Run the whole call graph for one challenge.
    ///
    /// Only an empty challenge is rejected; completion failures never abort
    /// the run.
    pub async fn run(
        &self,
        session: &mut Session,
        profile: &UserProfile,
        challenge: &str,
    ) -> Result<PipelineOutcome, MemoryError> {
        let challenge = challenge.trim();
        if challenge.is_empty() {
            return Err(MemoryError::InvalidArgument(
                "challenge must be non-empty text".to_string(),
            ));
        }

        session.set_context("challenge", challenge)?;
        session.set_context("profile", serde_json::to_value(profile)?)?;

        let onboarding = OnboardingAgent::new(self.runtime.clone());
        let base = StepInput {
            challenge,
            profile,
            upstream: None,
        };
        let assessment = onboarding.handle(session, &base).await?;

        let route = select_route(&assessment);
        info!("Pipeline route selected: {}", route.as_str());
        let mut metadata = Map::new();
        metadata.insert("route".to_string(), json!(route.as_str()));
        session.record(
            ONBOARDING_AGENT,
            &format!("Routing to {}.", route_label(route)),
            Some(metadata),
        )?;
        session.set_context("route", route.as_str())?;
        session.record_insight("last_route", route.as_str())?;

        let middle: Box<dyn PipelineStep> = match route {
            Route::SkillsThenLearning => Box::new(SkillAnalysisAgent::new(self.runtime.clone())),
            Route::FeedbackThenTransition | Route::FeedbackThenDevelopment => {
                Box::new(FeedbackAgent::new(self.runtime.clone()))
            }
        };
        let findings = middle
            .handle(session, &StepInput { upstream: Some(&assessment), ..base })
            .await?;

        let learning = LearningAgent::new(self.runtime.clone(), LearningFocus::for_route(route));
        let combined = format!("{}\n{}", assessment, findings);
        let plan = learning
            .handle(session, &StepInput { upstream: Some(&combined), ..base })
            .await?;

        let recommendation = format_recommendation(
            challenge,
            &assessment,
            middle_title(route),
            &findings,
            learning.focus().title(),
            &plan,
        );

        let mut metadata = Map::new();
        metadata.insert("final".to_string(), json!(true));
        session.record(LEARNING_AGENT, &recommendation, Some(metadata))?;

        Ok(PipelineOutcome {
            route,
            recommendation,
        })
    }
}

fn route_label(route: Route) -> &'static str {
    match route {
        Route::SkillsThenLearning => "skill analysis and learning",
        Route::FeedbackThenTransition => "feedback and transition planning",
        Route::FeedbackThenDevelopment => "feedback and development planning",
    }
}

fn middle_title(route: Route) -> &'static str {
    match route {
        Route::SkillsThenLearning => "Skill Analysis",
        Route::FeedbackThenTransition | Route::FeedbackThenDevelopment => "Feedback",
    }
}

/// Concatenate step outputs into the text shown in the recommendation panel
pub fn format_recommendation(
    challenge: &str,
    assessment: &str,
    findings_title: &str,
    findings: &str,
    plan_title: &str,
    plan: &str,
) -> String {
    format!(
        "### Challenge\n{}\n\n### Assessment\n{}\n\n### {}\n{}\n\n### {}\n{}",
        challenge, assessment, findings_title, findings, plan_title, plan
    )
}
