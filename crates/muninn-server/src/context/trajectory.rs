// crates/muninn-server/src/context/trajectory.rs
// Classify the current session's recent tool calls into a trajectory
// pattern. The allocator only acts on a pattern whose confidence clears
// 0.5, so a weak read is as good as no read.

use rusqlite::Connection;
use serde::{Deserialize, Serialize};

use crate::db::{ToolCallRow, session_tool_calls_sync};

/// What the session looks like right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrajectoryPattern {
    /// Mostly reading and searching across many files.
    Exploration,
    /// A high share of recent calls failed.
    Failing,
    /// Circling the same files without progress.
    Stuck,
    /// Steady successful edits.
    Confident,
}

impl TrajectoryPattern {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrajectoryPattern::Exploration => "exploration",
            TrajectoryPattern::Failing => "failing",
            TrajectoryPattern::Stuck => "stuck",
            TrajectoryPattern::Confident => "confident",
        }
    }
}

/// A detected pattern with its confidence in [0, 1].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Trajectory {
    pub pattern: TrajectoryPattern,
    pub confidence: f64,
}

/// Minimum calls before any classification is attempted.
const MIN_CALLS: usize = 4;
/// How many trailing calls the classifier looks at.
const WINDOW: usize = 20;

fn is_read_tool(name: &str) -> bool {
    let lower = name.to_lowercase();
    lower.contains("read") || lower.contains("search") || lower.contains("grep")
        || lower.contains("list") || lower.contains("query")
}

fn is_edit_tool(name: &str) -> bool {
    let lower = name.to_lowercase();
    lower.contains("edit") || lower.contains("write") || lower.contains("patch")
        || lower.contains("create")
}

/// Classify a window of tool calls. Returns None below the minimum size.
pub fn classify(calls: &[ToolCallRow]) -> Option<Trajectory> {
    if calls.len() < MIN_CALLS {
        return None;
    }
    let window: Vec<&ToolCallRow> = calls.iter().rev().take(WINDOW).collect();
    let total = window.len() as f64;

    let failures = window.iter().filter(|c| !c.success).count() as f64;
    let reads = window.iter().filter(|c| is_read_tool(&c.tool_name)).count() as f64;
    let edits = window.iter().filter(|c| is_edit_tool(&c.tool_name)).count() as f64;

    let mut file_counts: std::collections::HashMap<&str, usize> = std::collections::HashMap::new();
    let mut touches = 0usize;
    for call in &window {
        for file in &call.files_involved {
            *file_counts.entry(file.as_str()).or_insert(0) += 1;
            touches += 1;
        }
    }
    let distinct_files = file_counts.len();
    let max_repeat = file_counts.values().copied().max().unwrap_or(0);

    let failure_rate = failures / total;
    let read_share = reads / total;
    let edit_share = edits / total;
    // Share of file touches landing on the single most-revisited file.
    let repeat_share = if touches > 0 {
        max_repeat as f64 / touches as f64
    } else {
        0.0
    };

    // Failing dominates: errors trump everything else the agent is doing.
    if failure_rate >= 0.4 {
        return Some(Trajectory {
            pattern: TrajectoryPattern::Failing,
            confidence: (0.5 + failure_rate).min(1.0),
        });
    }

    // Stuck: the same file keeps coming back without a failure signal.
    if repeat_share >= 0.6 && max_repeat >= 3 {
        return Some(Trajectory {
            pattern: TrajectoryPattern::Stuck,
            confidence: (0.4 + repeat_share / 2.0).min(1.0),
        });
    }

    // Exploration: read-heavy over several distinct files.
    if read_share >= 0.6 && distinct_files >= 3 {
        return Some(Trajectory {
            pattern: TrajectoryPattern::Exploration,
            confidence: (0.3 + read_share / 2.0).min(1.0),
        });
    }

    // Confident: successful edit work.
    if edit_share >= 0.5 && failure_rate <= 0.1 {
        return Some(Trajectory {
            pattern: TrajectoryPattern::Confident,
            confidence: (0.4 + edit_share / 2.0).min(1.0),
        });
    }

    None
}

/// Classify straight from the store.
pub fn detect_trajectory_sync(
    conn: &Connection,
    session_id: i64,
) -> rusqlite::Result<Option<Trajectory>> {
    let calls = session_tool_calls_sync(conn, session_id)?;
    Ok(classify(&calls))
}
