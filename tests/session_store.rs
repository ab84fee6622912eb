//! Session log store properties, exercised through the public API.

use pathfinder::agent::memory::{Session, SessionExport};
use serde_json::{json, Map};
use std::io::Write;

fn record_all(session: &mut Session, entries: &[(&str, &str)]) {
    for (agent, message) in entries {
        session.record(agent, message, None).unwrap();
    }
}

#[test]
fn test_views_agree_on_length_and_order() {
    let mut session = Session::new();
    let script = [
        ("OnboardingAgent", "Received challenge"),
        ("SkillAnalysisAgent", "Missing SQL"),
        ("LearningAgent", "Sprint on SQL"),
        ("SkillAnalysisAgent", "Missing dashboards"),
        ("LearningAgent", "Sprint on dashboards"),
    ];
    record_all(&mut session, &script);

    assert_eq!(session.entries().len(), script.len());
    assert_eq!(session.detailed_entries().len(), script.len());

    let plain: Vec<String> = script.iter().map(|(a, m)| format!("{}: {}", a, m)).collect();
    assert_eq!(session.entries(), plain);

    let by_agent: Vec<_> = session
        .entries_by_agent("LearningAgent")
        .iter()
        .map(|e| e.message().to_string())
        .collect();
    assert_eq!(by_agent, vec!["Sprint on SQL", "Sprint on dashboards"]);

    let hits: Vec<_> = session.search("missing").iter().map(|e| e.message().to_string()).collect();
    assert_eq!(hits, vec!["Missing SQL", "Missing dashboards"]);

    let recent: Vec<_> = session.recent_entries(3).iter().map(|e| e.message()).collect();
    assert_eq!(recent, vec!["Sprint on SQL", "Missing dashboards", "Sprint on dashboards"]);
}

#[test]
fn test_length_counts_records_since_reset() {
    let mut session = Session::new();
    record_all(&mut session, &[("FeedbackAgent", "one"), ("FeedbackAgent", "two")]);
    session.reset();
    record_all(&mut session, &[("FeedbackAgent", "three")]);

    assert_eq!(session.entries(), vec!["FeedbackAgent: three"]);
    assert_eq!(session.summary().total_entries, 1);
}

#[test]
fn test_reset_preserves_insights_exactly() {
    let mut session = Session::new();
    session.record_insight("goal", "data engineer").unwrap();
    session.record_insight("blocker", json!({ "kind": "time" })).unwrap();
    session.set_context("challenge", "switching teams").unwrap();
    record_all(&mut session, &[("OnboardingAgent", "hello")]);

    let before = session.insights().clone();
    session.reset();

    assert!(session.detailed_entries().is_empty());
    assert!(session.context().is_empty());
    assert_eq!(session.insights(), &before);
    assert_eq!(session.summary().insight_count, 2);
}

#[test]
fn test_repeated_insight_writes_keep_one_key() {
    let mut session = Session::new();
    for value in ["v1", "v2", "v3"] {
        session.record_insight("focus", value).unwrap();
    }
    assert_eq!(session.insights().len(), 1);
    assert_eq!(session.insights()["focus"].value, json!("v3"));
}

#[test]
fn test_search_edge_cases() {
    let mut session = Session::new();
    record_all(
        &mut session,
        &[("OnboardingAgent", "Career CHANGE ahead"), ("FeedbackAgent", "steady")],
    );

    assert!(session.search("").is_empty());
    assert_eq!(session.search("change").len(), 1);
    assert_eq!(session.search("Change").len(), 1);
    assert!(session.search("missing").is_empty());
}

#[test]
fn test_recent_entries_bounds() {
    let mut session = Session::new();
    assert!(session.recent_entries(3).is_empty());

    record_all(&mut session, &[("A", "A"), ("B", "B"), ("C", "C")]);
    assert!(session.recent_entries(0).is_empty());
    let last_two: Vec<_> = session.recent_entries(2).iter().map(|e| e.message()).collect();
    assert_eq!(last_two, vec!["B", "C"]);
    assert_eq!(session.recent_entries(usize::MAX).len(), 3);
}

#[test]
fn test_summary_per_agent_counts() {
    let mut session = Session::new();
    record_all(
        &mut session,
        &[
            ("OnboardingAgent", "Detected issue"),
            ("LearningAgent", "Plan A"),
            ("FeedbackAgent", "Looks good"),
            ("LearningAgent", "Plan B"),
        ],
    );

    let summary = session.summary();
    assert_eq!(summary.per_agent_counts.values().sum::<usize>(), summary.total_entries);
    assert_eq!(summary.per_agent_counts["LearningAgent"], 2);
    for (agent, count) in &summary.per_agent_counts {
        assert_eq!(session.entries_by_agent(agent).len(), *count);
    }
}

#[test]
fn test_end_to_end_scenario() {
    let mut session = Session::new();
    record_all(
        &mut session,
        &[
            ("OnboardingAgent", "Detected issue"),
            ("LearningAgent", "Plan A"),
            ("FeedbackAgent", "Looks good"),
        ],
    );

    assert_eq!(
        session.entries(),
        vec![
            "OnboardingAgent: Detected issue",
            "LearningAgent: Plan A",
            "FeedbackAgent: Looks good",
        ]
    );
    assert_eq!(session.summary().total_entries, 3);
    let learning = session.entries_by_agent("LearningAgent");
    assert_eq!(learning.len(), 1);
    assert_eq!(learning[0].message(), "Plan A");
}

#[test]
fn test_export_round_trip_through_file() {
    let mut session = Session::new();
    let mut metadata = Map::new();
    metadata.insert("route".to_string(), json!("feedback_then_transition"));
    session.record("OnboardingAgent", "Routing", Some(metadata)).unwrap();
    record_all(&mut session, &[("FeedbackAgent", "Peers agree"), ("LearningAgent", "Shadow a PM")]);
    session.record_insight("target_role", "product manager").unwrap();
    session.set_context("challenge", "move into product").unwrap();

    let document = session.export_session().unwrap();
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(document.as_bytes()).unwrap();

    let read_back = std::fs::read_to_string(file.path()).unwrap();
    let parsed = SessionExport::from_json(&read_back).unwrap();

    assert_eq!(parsed.detailed_log.len(), session.detailed_entries().len());
    for (exported, live) in parsed.detailed_log.iter().zip(session.detailed_entries()) {
        assert_eq!(exported.agent(), live.agent());
        assert_eq!(exported.message(), live.message());
        assert_eq!(exported.timestamp(), live.timestamp());
        assert_eq!(exported.full_timestamp(), live.full_timestamp());
        assert_eq!(exported.metadata(), live.metadata());
    }
    assert_eq!(parsed.user_insights, *session.insights());
    assert_eq!(parsed.conversation_context, *session.context());
    assert_eq!(parsed.session_summary.per_agent_counts, session.summary().per_agent_counts);
}

#[test]
fn test_export_rejects_malformed_document() {
    assert!(SessionExport::from_json("{\"detailed_log\": 3}").is_err());
}
