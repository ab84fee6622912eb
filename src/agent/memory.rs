//! Session Memory Module
//!
//! Append-only, timestamped log of agent activity for one conversation run.
//! Every pipeline step records what it did here, so the transcript shown to the
//! user is a faithful account of the run. Alongside the log the session keeps
//! two independent key/value maps: user insights (survive `reset`) and
//! conversation context (cleared on `reset`).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use thiserror::Error;

/// Short, human-readable timestamp format used in transcripts
const SHORT_TIME_FORMAT: &str = "%H:%M:%S";

// ============================================================
// ERRORS
// ============================================================

#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

fn require_text(field: &str, value: &str) -> Result<(), MemoryError> {
    if value.trim().is_empty() {
        return Err(MemoryError::InvalidArgument(format!(
            "{} must be non-empty text",
            field
        )));
    }
    Ok(())
}

// ============================================================
// LOG ENTRY
// ============================================================

/// A single immutable event in the session log.
///
/// Fields are private so an entry cannot be altered once recorded; the
/// serialized shape (`agent`, `message`, `timestamp`, `full_timestamp`,
/// `metadata`) is the one used by exported session documents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    agent: String,
    message: String,
    /// Short form, e.g. "14:05:09"
    timestamp: String,
    /// Full instant, serialized as RFC 3339
    full_timestamp: DateTime<Utc>,
    #[serde(default)]
    metadata: Map<String, Value>,
}

impl LogEntry {
    fn new(agent: &str, message: &str, at: DateTime<Utc>, metadata: Map<String, Value>) -> Self {
        Self {
            agent: agent.to_string(),
            message: message.to_string(),
            timestamp: at.format(SHORT_TIME_FORMAT).to_string(),
            full_timestamp: at,
            metadata,
        }
    }

    pub fn agent(&self) -> &str {
        &self.agent
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn timestamp(&self) -> &str {
        &self.timestamp
    }

    pub fn full_timestamp(&self) -> DateTime<Utc> {
        self.full_timestamp
    }

    pub fn metadata(&self) -> &Map<String, Value> {
        &self.metadata
    }

    /// Plain transcript line: "<agent>: <message>"
    pub fn to_line(&self) -> String {
        format!("{}: {}", self.agent, self.message)
    }
}

// ============================================================
// INSIGHTS & SUMMARY
// ============================================================

/// A user insight with the time it was last written
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Insight {
    pub value: Value,
    pub recorded_at: DateTime<Utc>,
}

/// Derived, never-cached view over a session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub started_at: DateTime<Utc>,
    /// Milliseconds elapsed since `started_at`
    pub duration_ms: i64,
    pub total_entries: usize,
    pub per_agent_counts: BTreeMap<String, usize>,
    pub insight_count: usize,
}

/// Exported session document.
///
/// Top-level field names are a format contract for downstream consumers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionExport {
    pub session_summary: SessionSummary,
    pub detailed_log: Vec<LogEntry>,
    pub user_insights: BTreeMap<String, Insight>,
    pub conversation_context: BTreeMap<String, Value>,
}

impl SessionExport {
    /// Parse a document produced by `Session::export_session`
    pub fn from_json(document: &str) -> Result<Self, MemoryError> {
        Ok(serde_json::from_str(document)?)
    }
}

// ============================================================
// SESSION
// ============================================================

/// Session log store.
///
/// Owned by exactly one conversation; not meant for concurrent mutation.
#[derive(Debug, Clone)]
pub struct Session {
    entries: Vec<LogEntry>,
    started_at: DateTime<Utc>,
    user_insights: BTreeMap<String, Insight>,
    conversation_context: BTreeMap<String, Value>,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            started_at: Utc::now(),
            user_insights: BTreeMap::new(),
            conversation_context: BTreeMap::new(),
        }
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// `now`, clamped so it is never earlier than the last recorded entry
    fn next_timestamp(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        match self.entries.last() {
            Some(last) if last.full_timestamp > now => last.full_timestamp,
            _ => now,
        }
    }

    /// Append one entry. This is the only way entries enter the session.
    pub fn record(
        &mut self,
        agent: &str,
        message: &str,
        metadata: Option<Map<String, Value>>,
    ) -> Result<(), MemoryError> {
        require_text("agent", agent)?;
        require_text("message", message)?;

        let at = self.next_timestamp(Utc::now());
        self.entries
            .push(LogEntry::new(agent, message, at, metadata.unwrap_or_default()));
        Ok(())
    }

    /// Backward-compatible plain view, one "<agent>: <message>" line per entry
    pub fn entries(&self) -> Vec<String> {
        self.entries.iter().map(LogEntry::to_line).collect()
    }

    pub fn detailed_entries(&self) -> &[LogEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Upsert a user insight (last write wins)
    pub fn record_insight(&mut self, key: &str, value: impl Into<Value>) -> Result<(), MemoryError> {
        require_text("insight key", key)?;
        self.user_insights.insert(
            key.to_string(),
            Insight {
                value: value.into(),
                recorded_at: Utc::now(),
            },
        );
        Ok(())
    }

    pub fn insights(&self) -> &BTreeMap<String, Insight> {
        &self.user_insights
    }

    /// Upsert a conversation context value (last write wins)
    pub fn set_context(&mut self, key: &str, value: impl Into<Value>) -> Result<(), MemoryError> {
        require_text("context key", key)?;
        self.conversation_context.insert(key.to_string(), value.into());
        Ok(())
    }

    /// Value for `key`, or `None` when unset
    pub fn get_context(&self, key: &str) -> Option<&Value> {
        self.conversation_context.get(key)
    }

    /// The whole conversation context map
    pub fn context(&self) -> &BTreeMap<String, Value> {
        &self.conversation_context
    }

    pub fn summary(&self) -> SessionSummary {
        let mut per_agent_counts: BTreeMap<String, usize> = BTreeMap::new();
        for entry in &self.entries {
            *per_agent_counts.entry(entry.agent.clone()).or_insert(0) += 1;
        }

        SessionSummary {
            started_at: self.started_at,
            duration_ms: (Utc::now() - self.started_at).num_milliseconds().max(0),
            total_entries: self.entries.len(),
            per_agent_counts,
            insight_count: self.user_insights.len(),
        }
    }

    /// Start a new conversation: clears entries and context, keeps insights
    pub fn reset(&mut self) {
        self.entries.clear();
        self.conversation_context.clear();
        self.started_at = Utc::now();
    }

    /// Snapshot of the whole session as an export document
    pub fn to_export(&self) -> SessionExport {
        SessionExport {
            session_summary: self.summary(),
            detailed_log: self.entries.clone(),
            user_insights: self.user_insights.clone(),
            conversation_context: self.conversation_context.clone(),
        }
    }

    /// Serialize the session as a pretty-printed JSON document
    pub fn export_session(&self) -> Result<String, MemoryError> {
        Ok(serde_json::to_string_pretty(&self.to_export())?)
    }

    /// Case-insensitive substring search over messages.
    /// An empty keyword matches nothing.
    pub fn search(&self, keyword: &str) -> Vec<&LogEntry> {
        if keyword.is_empty() {
            return Vec::new();
        }
        let needle = keyword.to_lowercase();
        self.entries
            .iter()
            .filter(|e| e.message.to_lowercase().contains(&needle))
            .collect()
    }

    /// Entries whose agent matches `agent` exactly (case-sensitive)
    pub fn entries_by_agent(&self, agent: &str) -> Vec<&LogEntry> {
        self.entries.iter().filter(|e| e.agent == agent).collect()
    }

    /// The last `count` entries in insertion order
    pub fn recent_entries(&self, count: usize) -> &[LogEntry] {
        let start = self.entries.len().saturating_sub(count);
        &self.entries[start..]
    }
}
