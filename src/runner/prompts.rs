//! Prompt assembly for dispatched triggers.
//!
//! The child is an opaque CLI agent; these prompts tell it what the
//! trigger was and which broker endpoints to drive in response.

use crate::models::{Epic, InboxMessage, Task};

pub fn assigned_task(task: &Task, base_url: &str) -> String {
    let mut prompt = format!(
        "You have been dispatched task {id}.\n\nDescription:\n{description}\n",
        id = task.id,
        description = task.description
    );
    if let Some(progress) = &task.progress {
        prompt.push_str(&format!("\nProgress so far:\n{progress}\n"));
    }
    prompt.push_str(&format!(
        "\nWork the task to completion. When done, call \
         POST {base_url}/api/tasks/{id}/finish with status completed and your output \
         (or status failed with a failureReason).\n",
        id = task.id
    ));
    prompt
}

pub fn resumed_task(task: &Task, base_url: &str) -> String {
    format!(
        "You are resuming task {id} that was paused during a previous run.\n\n\
         Description:\n{description}\n\n\
         Saved progress:\n{progress}\n\n\
         Continue from where the saved progress leaves off. When done, call \
         POST {base_url}/api/tasks/{id}/finish.\n",
        id = task.id,
        description = task.description,
        progress = task.progress.as_deref().unwrap_or("(none recorded)")
    )
}

pub fn offered_task(task: &Task, base_url: &str) -> String {
    format!(
        "Task {id} has been offered to you and is waiting for your decision.\n\n\
         Description:\n{description}\n\n\
         Review it against your capabilities and current workload, then either \
         POST {base_url}/api/tasks/{id}/accept or \
         POST {base_url}/api/tasks/{id}/reject with a short reason.\n",
        id = task.id,
        description = task.description
    )
}

pub fn unread_mentions(channels: &[String], base_url: &str) -> String {
    format!(
        "You were mentioned in {count} channel(s): {channels}.\n\n\
         Read each channel via GET {base_url}/api/channels/{{id}}/messages and reply \
         where a response is called for via POST {base_url}/api/channels/{{id}}/messages.\n",
        count = channels.len(),
        channels = channels.join(", ")
    )
}

pub fn inbox_messages(messages: &[InboxMessage], base_url: &str) -> String {
    let mut prompt = format!(
        "You have {} inbox message(s) to handle:\n\n",
        messages.len()
    );
    for message in messages {
        prompt.push_str(&format!("- [{}] {}\n", message.id, message.content));
    }
    prompt.push_str(&format!(
        "\nFor each message decide whether to answer directly or delegate it as a task \
         via POST {base_url}/api/tasks.\n"
    ));
    prompt
}

pub fn epic_progress(epics: &[Epic]) -> String {
    let mut prompt = format!(
        "Progress changed on {} epic(s) you are coordinating:\n\n",
        epics.len()
    );
    for epic in epics {
        prompt.push_str(&format!(
            "- {} ({}/{} tasks complete, {:.0}%)\n",
            epic.name,
            epic.completed_tasks,
            epic.total_tasks,
            epic.progress * 100.0
        ));
    }
    prompt.push_str("\nReview the changes and plan any follow-up tasks.\n");
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TaskSource;

    #[test]
    fn resumed_prompt_carries_saved_progress() {
        let mut task = Task::new("migrate the database", TaskSource::Api, 0);
        task.progress = Some("schemas copied, data pending".into());

        let prompt = resumed_task(&task, "http://localhost:3013");
        assert!(prompt.contains("schemas copied, data pending"));
        assert!(prompt.contains(&task.id));
        assert!(prompt.contains("resuming"));
    }

    #[test]
    fn offered_prompt_names_both_decisions() {
        let task = Task::new("review a PR", TaskSource::Api, 0);
        let prompt = offered_task(&task, "http://localhost:3013");
        assert!(prompt.contains("/accept"));
        assert!(prompt.contains("/reject"));
    }
}
