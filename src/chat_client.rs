// src/chat_client.rs
//
// Adapter for the hosted chat-completion model. The caller supplies a prompt
// and a session id; conversational context for the session comes from the
// bounded SessionMemory and is folded into the message list, so consecutive
// turns in one session see each other.

use crate::errors::AdapterError;
use crate::memory::{Role, SessionMemory, Turn};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const SYSTEM_PROMPT: &str = "\
You are DermatologyAI, an advanced medical assistant specialized ONLY in skin conditions.

You provide:
- Professional diagnosis support (when images are provided)
- Treatment recommendations from verified medical sources
- Dermatologist referrals when needed
- General skin care advice

Always:
- Be empathetic, precise and professional
- Clarify when uncertain
- Recommend professional consultation for serious conditions";

#[derive(Debug, Clone)]
pub struct ChatModelClient {
    client: Client,
    endpoint: String,
    api_key: String,
    model: String,
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f32,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

impl ChatModelClient {
    pub fn new(endpoint: String, api_key: String) -> Self {
        Self {
            client: Client::new(),
            endpoint,
            api_key,
            model: "gpt-35-turbo".to_string(),
        }
    }

    /// Generates a response to `prompt` within the given session's
    /// conversational context, then records the turn back into memory.
    pub async fn generate(
        &self,
        prompt: &str,
        session_id: &str,
        memory: &SessionMemory,
    ) -> Result<String, AdapterError> {
        let history = memory.history(session_id).await.unwrap_or_default();

        let mut messages = Vec::with_capacity(history.len() + 2);
        messages.push(ChatMessage {
            role: "system".to_string(),
            content: SYSTEM_PROMPT.to_string(),
        });
        for turn in &history {
            messages.push(ChatMessage {
                role: turn.role.as_str().to_string(),
                content: turn.content.clone(),
            });
        }
        messages.push(ChatMessage {
            role: "user".to_string(),
            content: prompt.to_string(),
        });

        let request = ChatRequest {
            model: self.model.clone(),
            messages,
            temperature: 0.7,
        };

        tracing::debug!(
            "Chat completion request for session {}: {} history turns",
            session_id,
            history.len()
        );

        let response = self
            .client
            .post(format!("{}/chat/completions", self.endpoint))
            .header("api-key", &self.api_key)
            .timeout(Duration::from_secs(60))
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            tracing::error!("Chat model returned {}: {}", status, body);
            return Err(AdapterError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: ChatResponse = serde_json::from_str(&body)
            .map_err(|e| AdapterError::Decode(format!("{}: {}", e, body)))?;

        let text = parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| AdapterError::Decode("no choices in chat response".to_string()))?;

        memory.record_turn(session_id, prompt, &text).await;

        Ok(text)
    }

    /// Rehydrates session memory from persisted chat rows after a restart or
    /// eviction. Rows arrive oldest first as (user_message, chatbot_response).
    pub async fn rehydrate_memory(
        &self,
        session_id: &str,
        rows: Vec<(String, String)>,
        memory: &SessionMemory,
    ) {
        if rows.is_empty() {
            return;
        }
        let mut turns = Vec::with_capacity(rows.len() * 2);
        for (user, assistant) in rows {
            turns.push(Turn {
                role: Role::User,
                content: user,
            });
            turns.push(Turn {
                role: Role::Assistant,
                content: assistant,
            });
        }
        memory.replace_history(session_id, turns).await;
        tracing::debug!("Rehydrated session memory for {}", session_id);
    }
}

/// Prompt asking the model for an explanatory analysis of a confident image
/// diagnosis.
pub fn diagnosis_prompt(predicted_disease: &str, confidence_score: f64, symptoms: &str) -> String {
    format!(
        "Diagnosis: {} ({:.1}% confidence)\n\
         Symptoms: {}\n\n\
         As a dermatology assistant, provide:\n\
         1. A simple explanation of the condition\n\
         2. Recommended self-care measures\n\
         3. When to see a doctor\n\
         4. Any precautions",
        predicted_disease, confidence_score, symptoms
    )
}

/// Prompt asking the model to answer a question grounded in retrieved
/// context, citing sources.
pub fn cited_answer_prompt(question: &str, context: &str) -> String {
    format!(
        "Question: {}\nMedical Context: {}\nProvide a concise answer citing sources:",
        question, context
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diagnosis_prompt_includes_condition_and_confidence() {
        let prompt = diagnosis_prompt("eczema", 87.25, "itchy patches");
        assert!(prompt.contains("eczema"));
        assert!(prompt.contains("87.2% confidence"));
        assert!(prompt.contains("itchy patches"));
    }

    #[test]
    fn cited_answer_prompt_includes_context() {
        let prompt = cited_answer_prompt("how to treat hives", "antihistamines help");
        assert!(prompt.starts_with("Question: how to treat hives"));
        assert!(prompt.contains("antihistamines help"));
    }
}
