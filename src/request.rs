use serde::Serialize;

use crate::config::GenerationConfig;
use crate::model::Message;

/// Wire body for `POST {base}/chat/completions`.
#[derive(Debug, Clone, Serialize)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<WireMessage>,
    pub temperature: f32,
    pub max_tokens: u32,
    pub top_p: f32,
    pub stream: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WireMessage {
    pub role: String,
    pub content: String,
}

impl CompletionRequest {
    pub fn build(messages: &[Message], generation: &GenerationConfig) -> Self {
        Self {
            model: generation.model.clone(),
            messages: to_wire_messages(messages),
            temperature: generation.temperature,
            max_tokens: generation.max_output_tokens,
            top_p: generation.top_p,
            stream: generation.stream,
        }
    }
}

fn to_wire_messages(messages: &[Message]) -> Vec<WireMessage> {
    messages
        .iter()
        .map(|msg| WireMessage {
            role: msg.role.as_str().to_string(),
            content: msg.content.clone(),
        })
        .collect()
}

pub fn chat_completions_url(base_url: &str) -> String {
    format!("{}/chat/completions", base_url.trim_end_matches('/'))
}
