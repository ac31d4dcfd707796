//! Duplicate suppression for incoming events.
//!
//! Before creating a task from an external event, the router checks the
//! creator's recent tasks: an event from the same Slack thread, or one
//! whose description is near-identical under Jaccard word-set similarity,
//! is a duplicate and produces no new task.

use chrono::Utc;

use crate::constants::{DEDUP_SAME_AGENT_THRESHOLD, DEDUP_SIMILARITY_THRESHOLD, DEDUP_WINDOW_SECS};
use crate::models::Task;
use crate::store::TaskStore;
use crate::Result;

/// A duplicate candidate and why it matched.
#[derive(Debug, Clone)]
pub struct DuplicateMatch {
    pub task: Task,
    pub reason: String,
}

/// What a prospective task would look like, for duplicate comparison.
#[derive(Debug, Clone, Default)]
pub struct TaskProbe {
    pub description: String,
    pub slack_channel_id: Option<String>,
    pub slack_thread_ts: Option<String>,
    pub target_agent_id: Option<String>,
}

/// Jaccard similarity of the lowercased word sets of two strings.
/// Punctuation is treated as whitespace; empty tokens are dropped.
/// Both empty → 1.0; exactly one empty → 0.0.
pub fn jaccard(a: &str, b: &str) -> f64 {
    let set_a = word_set(a);
    let set_b = word_set(b);

    match (set_a.is_empty(), set_b.is_empty()) {
        (true, true) => return 1.0,
        (true, false) | (false, true) => return 0.0,
        (false, false) => {}
    }

    let intersection = set_a.intersection(&set_b).count();
    let union = set_a.union(&set_b).count();
    intersection as f64 / union as f64
}

fn word_set(text: &str) -> std::collections::HashSet<String> {
    text.to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .map(str::to_string)
        .collect()
}

/// Find the first recent task by `creator` that the probe duplicates.
///
/// Candidates are checked in recency order against three rules: same
/// Slack thread, description similarity above the high threshold, and
/// same-target-agent similarity above the lower threshold.
pub async fn find_duplicate_task(
    tasks: &TaskStore,
    creator: &str,
    probe: &TaskProbe,
) -> Result<Option<DuplicateMatch>> {
    let since = Utc::now().timestamp() - DEDUP_WINDOW_SECS;
    let candidates = tasks.recent_by_creator(creator, since).await?;

    for candidate in candidates {
        if let (Some(channel), Some(thread)) = (&probe.slack_channel_id, &probe.slack_thread_ts) {
            if candidate.context.slack_channel_id.as_deref() == Some(channel.as_str())
                && candidate.context.slack_thread_ts.as_deref() == Some(thread.as_str())
            {
                return Ok(Some(DuplicateMatch {
                    task: candidate,
                    reason: "same Slack thread".to_string(),
                }));
            }
        }

        let similarity = jaccard(&probe.description, &candidate.description);
        if similarity > DEDUP_SIMILARITY_THRESHOLD {
            return Ok(Some(DuplicateMatch {
                task: candidate,
                reason: format!("high similarity ({similarity:.2})"),
            }));
        }

        if let Some(target) = &probe.target_agent_id {
            if candidate.agent_id.as_deref() == Some(target.as_str())
                && similarity > DEDUP_SAME_AGENT_THRESHOLD
            {
                return Ok(Some(DuplicateMatch {
                    task: candidate,
                    reason: format!("similar task for same agent ({similarity:.2})"),
                }));
            }
        }
    }

    Ok(None)
}
