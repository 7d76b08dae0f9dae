//! services/api/src/adapters/summary_llm.rs
//!
//! This module contains the adapter for the summarization LLM.
//! It implements the `SummarizationService` port from the `core` crate.

use std::time::Duration;

use async_openai::{
    config::OpenAIConfig,
    error::OpenAIError,
    types::chat::{
        ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
        CreateChatCompletionRequestArgs,
    },
    Client,
};
use async_trait::async_trait;
use serde::Deserialize;
use summary_stream_core::{
    ports::{PortError, PortResult, SummarizationService},
    Persona, SectionResult,
};
use tracing::{debug, warn};

const BASE_RETRY_DELAY: Duration = Duration::from_millis(500);

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// An adapter that implements `SummarizationService` using an OpenAI-compatible LLM.
#[derive(Clone)]
pub struct OpenAiSummaryAdapter {
    client: Client<OpenAIConfig>,
    model: String,
    max_attempts: u32,
}

impl OpenAiSummaryAdapter {
    /// Creates a new `OpenAiSummaryAdapter`.
    pub fn new(client: Client<OpenAIConfig>, model: String, max_attempts: u32) -> Self {
        Self {
            client,
            model,
            max_attempts: max_attempts.max(1),
        }
    }

    async fn request_once(&self, text: &str, persona: Persona) -> PortResult<SectionResult> {
        let messages = vec![
            ChatCompletionRequestSystemMessageArgs::default()
                .content(system_prompt(persona))
                .build()
                .map_err(|e| PortError::Unexpected(e.to_string()))?
                .into(),
            ChatCompletionRequestUserMessageArgs::default()
                .content(format!("SECTION:\n{}", text))
                .build()
                .map_err(|e| PortError::Unexpected(e.to_string()))?
                .into(),
        ];

        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(messages)
            .n(1)
            .build()
            .map_err(|e| PortError::Unexpected(e.to_string()))?;

        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(|e: OpenAIError| PortError::Backend {
                reason: e.to_string(),
            })?;

        let content = response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| PortError::Backend {
                reason: "Summarization LLM returned no text content.".to_string(),
            })?;

        parse_section_payload(&content)
    }
}

//=========================================================================================
// `SummarizationService` Trait Implementation
//=========================================================================================

#[async_trait]
impl SummarizationService for OpenAiSummaryAdapter {
    /// Summarizes one section, retrying transient failures with a linear backoff.
    async fn summarize_section(&self, text: &str, persona: Persona) -> PortResult<SectionResult> {
        let mut attempt = 1;
        loop {
            match self.request_once(text, persona).await {
                Ok(result) => return Ok(result),
                Err(PortError::Backend { reason }) if attempt < self.max_attempts => {
                    warn!(attempt, %reason, "Summarization request failed, retrying.");
                    tokio::time::sleep(BASE_RETRY_DELAY * attempt).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

//=========================================================================================
// Prompting and Response Parsing
//=========================================================================================

fn persona_instructions(persona: Persona) -> &'static str {
    match persona {
        Persona::Neutral => "Write in a clear, neutral tone.",
        Persona::Student => {
            "Write for a student preparing for an exam: explain key terms and keep the main ideas easy to review."
        }
        Persona::Professional => {
            "Write for a busy professional: lead with decisions, outcomes and next steps."
        }
        Persona::Casual => "Write in a relaxed, conversational tone without jargon.",
    }
}

fn system_prompt(persona: Persona) -> String {
    format!(
        "You are a summarization assistant. You receive one section of a longer document. {} \
         Respond with a single JSON object and nothing else, using these fields: \
         \"summary\" (string, a few sentences), \"bullets\" (array of key insights), \
         \"action_items\" (array, may be empty), \"keywords\" (array of short phrases), \
         \"confidence\" (number between 0 and 1).",
        persona_instructions(persona)
    )
}

#[derive(Debug, Deserialize)]
struct SectionPayload {
    summary: String,
    #[serde(default)]
    bullets: Vec<String>,
    #[serde(default)]
    action_items: Vec<String>,
    #[serde(default)]
    keywords: Vec<String>,
    #[serde(default)]
    confidence: Option<f32>,
}

fn parse_section_payload(content: &str) -> PortResult<SectionResult> {
    let cleaned = strip_markdown_json(content);
    let payload: SectionPayload = serde_json::from_str(&cleaned).map_err(|e| {
        debug!(response = %cleaned, "Unparseable summarization response.");
        PortError::Backend {
            reason: format!("malformed summarization response: {}", e),
        }
    })?;
    if payload.summary.trim().is_empty() {
        return Err(PortError::Backend {
            reason: "summarization response had an empty summary".to_string(),
        });
    }
    Ok(SectionResult {
        text: payload.summary.trim().to_string(),
        bullets: payload.bullets,
        action_items: payload.action_items,
        keywords: payload.keywords,
        confidence: payload.confidence.map(|c| c.clamp(0.0, 1.0)),
    })
}

/// Strips a markdown code fence wrapped around a JSON body, if present.
fn strip_markdown_json(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    match rest.rfind("```") {
        Some(end) => rest[..end].trim(),
        None => trimmed,
    }
}
