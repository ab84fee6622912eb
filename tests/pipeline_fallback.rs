//! Pipeline behavior when the completion service misbehaves.

use async_trait::async_trait;
use pathfinder::agent::completion::{CompletionClient, CompletionError, CompletionRequest};
use pathfinder::agent::memory::Session;
use pathfinder::agent::pipeline::{CareerPipeline, FeedbackAgent};
use pathfinder::agent::types::{Route, UserProfile, LEARNING_AGENT, ONBOARDING_AGENT};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Fails every call with a transport error and counts attempts
#[derive(Default)]
struct FailingClient {
    calls: AtomicUsize,
}

#[async_trait]
impl CompletionClient for FailingClient {
    async fn complete(&self, _request: &CompletionRequest) -> Result<String, CompletionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(CompletionError::Transport("connection refused".to_string()))
    }
}

/// Answers the first call, fails the rest
#[derive(Default)]
struct FlakyClient {
    calls: AtomicUsize,
}

#[async_trait]
impl CompletionClient for FlakyClient {
    async fn complete(&self, _request: &CompletionRequest) -> Result<String, CompletionError> {
        if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
            Ok("They want to change roles into design.".to_string())
        } else {
            Err(CompletionError::Status {
                status: 429,
                body: "quota exceeded".to_string(),
            })
        }
    }
}

#[tokio::test]
async fn test_failed_service_still_produces_recommendation() {
    let client = Arc::new(FailingClient::default());
    let pipeline = CareerPipeline::new(client.clone(), 300);
    let mut session = Session::new();
    let profile = UserProfile::new("Riley", "QA Engineer", "5 years");

    let outcome = pipeline
        .run(&mut session, &profile, "Onboarding to automation is hard")
        .await
        .unwrap();

    assert!(!outcome.recommendation.trim().is_empty());
    assert_eq!(client.calls.load(Ordering::SeqCst), 3);

    let notices = session.search("unavailable");
    assert_eq!(notices.len(), 3);
    assert!(notices
        .iter()
        .all(|e| e.metadata()["error"].as_str().unwrap().contains("connection refused")));
    assert!(!session.entries_by_agent(ONBOARDING_AGENT).is_empty());
    assert!(!session.entries_by_agent(LEARNING_AGENT).is_empty());
}

#[tokio::test]
async fn test_partial_failure_keeps_live_route() {
    let client = Arc::new(FlakyClient::default());
    let pipeline = CareerPipeline::new(client, 300);
    let mut session = Session::new();

    let outcome = pipeline
        .run(&mut session, &UserProfile::default(), "I want to become a designer")
        .await
        .unwrap();

    assert_eq!(outcome.route, Route::FeedbackThenTransition);
    let feedback = FeedbackAgent::fallback("I want to become a designer");
    assert_eq!(feedback, "Recent peer reviews confirm this skill gap.");
    assert!(outcome.recommendation.contains(feedback));
    assert_eq!(session.search("AI service unavailable").len(), 2);
}
