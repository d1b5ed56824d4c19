//! The LLM backend seam.
//!
//! The engine only ever asks a gateway to turn a prompt into text for one
//! stage. [`HttpGateway`] talks to real providers; tests plug in their own
//! [`LlmGateway`] implementations.

mod http;

pub use http::HttpGateway;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::config::StageConfig;
use crate::error::{ColloquyError, ColloquyResult};
use crate::models::Stage;

/// Provider answered locally with a templated echo.
pub const MOCK_PROVIDER: &str = "mock";

#[async_trait]
pub trait LlmGateway: Send + Sync {
    /// Turn a prompt into response text using the given stage settings.
    async fn complete(&self, prompt: &str, stage: &StageConfig) -> ColloquyResult<String>;
}

pub type DynGateway = Arc<dyn LlmGateway>;

/// Echo of the latest request in `prompt`, never the transcript around it.
pub fn mock_response(stage: &StageConfig, prompt: &str) -> String {
    format!(
        "[{}/{}] Echo: {}",
        stage.provider,
        stage.model,
        latest_request(prompt)
    )
}

/// The task a stage prompt asks about, without transcript or plan.
fn latest_request(prompt: &str) -> &str {
    if prompt.starts_with("Conversation so far:\n") {
        if let Some(pos) = prompt.rfind("\n\nuser: ") {
            return &prompt[pos + "\n\nuser: ".len()..];
        }
    }

    if prompt.starts_with("You are the ") {
        if let Some(pos) = prompt.find("Task:\n") {
            let rest = &prompt[pos + "Task:\n".len()..];
            return match rest.rfind("\n\nPlan:\n") {
                Some(end) => &rest[..end],
                None => rest,
            };
        }
    }

    prompt
}

/// Run one stage call against its deadline.
///
/// The call runs on its own task. When the timer fires first the task is
/// detached rather than aborted, so the provider request may still finish
/// in the background; its result is discarded.
pub async fn call_stage(
    gateway: DynGateway,
    prompt: String,
    stage: StageConfig,
    label: Stage,
) -> ColloquyResult<String> {
    if stage.provider == MOCK_PROVIDER {
        return Ok(mock_response(&stage, &prompt));
    }

    let timeout_secs = stage.timeout_seconds;
    let provider = stage.provider.clone();
    debug!(stage = %label, provider = %provider, timeout_secs, "Calling gateway");

    let call = tokio::spawn(async move { gateway.complete(&prompt, &stage).await });

    tokio::select! {
        joined = call => match joined {
            Ok(result) => result,
            Err(e) => Err(ColloquyError::Internal(format!(
                "Gateway task for '{}' failed: {}",
                provider, e
            ))),
        },
        _ = tokio::time::sleep(Duration::from_secs(timeout_secs)) => {
            warn!(stage = %label, provider = %provider, timeout_secs, "Stage timed out");
            Err(ColloquyError::Timeout {
                stage: label.to_string(),
                timeout_secs,
            })
        }
    }
}
