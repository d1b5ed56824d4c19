use crate::models::ChatMessage;

const MAX_TRANSCRIPT_MESSAGES: usize = 20;

/// Note recorded as the plan of a single-stage turn.
pub const DIRECT_PLAN_NOTE: &str = "Direct response: the task is answered in one gateway call";

fn transcript(history: &[ChatMessage]) -> String {
    let start = history.len().saturating_sub(MAX_TRANSCRIPT_MESSAGES);
    history[start..]
        .iter()
        .map(|m| format!("{}: {}", m.role, m.content))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Prompt for a single-stage turn. `history` excludes the current message.
pub fn direct_prompt(history: &[ChatMessage], task: &str) -> String {
    if history.is_empty() {
        return task.to_string();
    }

    format!(
        "Conversation so far:\n{}\n\nuser: {}",
        transcript(history),
        task
    )
}

pub fn plan_prompt(history: &[ChatMessage], task: &str) -> String {
    let mut prompt = String::from(
        "You are the planning stage. Analyse the task below, break it into \
         concrete steps and note any risks. Do not write the final answer.\n\n",
    );

    if !history.is_empty() {
        prompt.push_str("Conversation so far:\n");
        prompt.push_str(&transcript(history));
        prompt.push_str("\n\n");
    }

    prompt.push_str("Task:\n");
    prompt.push_str(task);
    prompt
}

pub fn act_prompt(history: &[ChatMessage], task: &str, plan: &str) -> String {
    let mut prompt = String::from(
        "You are the implementation stage. Follow the plan to complete the \
         task and reply with the final answer only.\n\n",
    );

    if !history.is_empty() {
        prompt.push_str("Conversation so far:\n");
        prompt.push_str(&transcript(history));
        prompt.push_str("\n\n");
    }

    prompt.push_str("Task:\n");
    prompt.push_str(task);
    prompt.push_str("\n\nPlan:\n");
    prompt.push_str(plan);
    prompt
}
