//! In-memory audit trail of questions asked through the API.
//!
//! The trail is bounded: once `capacity` entries are held the oldest is
//! evicted. A capacity of zero disables recording.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;

use crate::query::Role;

/// Questions longer than this are stored truncated.
const MAX_QUERY_CHARS: usize = 1024;

/// Default number of entries kept.
pub const DEFAULT_CAPACITY: usize = 1000;

/// One asked question.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryLogEntry {
    pub id: u64,
    pub user: String,
    pub role: Role,
    pub query: String,
    pub executed_at: DateTime<Utc>,
    pub success: bool,
    /// Error code when the question failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

#[derive(Default)]
struct LogState {
    next_id: u64,
    entries: VecDeque<QueryLogEntry>,
}

pub struct QueryLog {
    capacity: usize,
    state: Mutex<LogState>,
}

impl Default for QueryLog {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl QueryLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            state: Mutex::new(LogState::default()),
        }
    }

    /// Record a question. `code` is the error code of a failed question.
    pub fn record(&self, user: &str, role: Role, query: &str, code: Option<&str>) {
        if self.capacity == 0 {
            return;
        }

        let mut state = self.state.lock();
        state.next_id += 1;
        let entry = QueryLogEntry {
            id: state.next_id,
            user: user.to_string(),
            role,
            query: query.trim().chars().take(MAX_QUERY_CHARS).collect(),
            executed_at: Utc::now(),
            success: code.is_none(),
            code: code.map(String::from),
        };
        if state.entries.len() == self.capacity {
            state.entries.pop_front();
        }
        state.entries.push_back(entry);
    }

    /// Up to `limit` entries, newest first.
    pub fn recent(&self, limit: usize) -> Vec<QueryLogEntry> {
        self.state
            .lock()
            .entries
            .iter()
            .rev()
            .take(limit)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
