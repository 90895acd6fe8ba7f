//! Person summaries written by a language model, with a fixed fallback.

use crate::store::PersonContext;
use reqwest::Client;
use serde::{Deserialize, Serialize};

const SYSTEM_PROMPT: &str = "You are a gentle, caring assistant helping dementia patients \
remember their loved ones. Keep responses simple, warm, and reassuring. Never use complex \
words or long sentences.";

/// Chat-completions endpoint settings.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub url: String,
    pub api_key: Option<String>,
    pub model: String,
}

pub struct Summarizer {
    http: Client,
    llm: Option<LlmConfig>,
}

/// Summary used when the model is unavailable or says nothing.
pub fn fallback_summary(name: &str, relationship: &str) -> String {
    format!(
        "{name} is your {}. They care about you very much.",
        relationship.to_lowercase()
    )
}

/// Prompt asking for a short, warm reminder of who this person is.
pub fn build_prompt(ctx: &PersonContext) -> String {
    let memories = if ctx.memories.is_empty() {
        "No specific memories recorded yet.".to_string()
    } else {
        ctx.memories.join("\n- ")
    };
    let conversations = if ctx.conversations.is_empty() {
        "No recent conversations recorded.".to_string()
    } else {
        ctx.conversations.join("\n- ")
    };

    format!(
        "You are helping a dementia patient remember someone they know. Generate a short, warm, \
and reassuring summary about this person.

Person's name: {name}
Relationship: {relationship}

Memory notes about this person:
- {memories}

Recent conversations:
- {conversations}

Generate a friendly, simple summary (2-3 sentences max) that helps the patient remember who this \
person is and feel comfortable. Use simple words and a warm tone. Focus on the relationship and key \
positive memories. Start directly with the information, don't say things like \"This is...\" or \
\"Here's...\".",
        name = ctx.person.name,
        relationship = ctx.person.relationship,
    )
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize, Default)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: Option<ChatReply>,
}

#[derive(Deserialize)]
struct ChatReply {
    content: Option<String>,
}

impl Summarizer {
    pub fn new(http: Client, llm: Option<LlmConfig>) -> Self {
        if llm.is_none() {
            tracing::warn!("no language model configured; summaries use the fallback text");
        }
        Self { http, llm }
    }

    /// Summarize a person. Never fails: any model problem yields
    /// [`fallback_summary`].
    pub async fn summarize(&self, ctx: &PersonContext) -> String {
        let fallback = || fallback_summary(&ctx.person.name, &ctx.person.relationship);

        let Some(llm) = &self.llm else {
            return fallback();
        };

        match self.complete(llm, &build_prompt(ctx)).await {
            Ok(Some(summary)) => {
                tracing::info!(person_id = %ctx.person.id, "summary generated");
                summary
            }
            Ok(None) => {
                tracing::warn!(person_id = %ctx.person.id, "language model returned no content");
                fallback()
            }
            Err(e) => {
                tracing::warn!(person_id = %ctx.person.id, error = %e, "language model request failed");
                fallback()
            }
        }
    }

    async fn complete(&self, llm: &LlmConfig, prompt: &str) -> anyhow::Result<Option<String>> {
        let body = ChatRequest {
            model: &llm.model,
            messages: [
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                ChatMessage {
                    role: "user",
                    content: prompt,
                },
            ],
        };

        let mut request = self.http.post(&llm.url).json(&body);
        if let Some(key) = &llm.api_key {
            request = request.bearer_auth(key);
        }
        let response = request.send().await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            anyhow::bail!("HTTP {status}: {text}");
        }

        let reply: ChatResponse = response.json().await?;
        Ok(reply
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message)
            .and_then(|m| m.content)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Person;
    use crate::test_support::serve_once;
    use chrono::Utc;

    fn context(memories: &[&str], conversations: &[&str]) -> PersonContext {
        PersonContext {
            person: Person {
                id: "p1".into(),
                name: "Sarah".into(),
                relationship: "Daughter".into(),
                photo_url: None,
                created_at: Utc::now(),
            },
            memories: memories.iter().map(|s| s.to_string()).collect(),
            conversations: conversations.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn summarizer(url: Option<String>) -> Summarizer {
        Summarizer::new(
            Client::new(),
            url.map(|url| LlmConfig {
                url,
                api_key: Some("k".into()),
                model: "test-model".into(),
            }),
        )
    }

    #[test]
    fn test_fallback_lowercases_relationship() {
        assert_eq!(
            fallback_summary("Michael", "Son"),
            "Michael is your son. They care about you very much."
        );
    }

    #[test]
    fn test_prompt_lists_context() {
        let prompt = build_prompt(&context(&["Visits on Sundays", "Has a dog"], &[]));
        assert!(prompt.contains("Person's name: Sarah"));
        assert!(prompt.contains("Relationship: Daughter"));
        assert!(prompt.contains("- Visits on Sundays\n- Has a dog"));
        assert!(prompt.contains("- No recent conversations recorded."));
    }

    #[test]
    fn test_prompt_without_memories() {
        let prompt = build_prompt(&context(&[], &["Talked about the garden"]));
        assert!(prompt.contains("- No specific memories recorded yet."));
        assert!(prompt.contains("- Talked about the garden"));
    }

    #[tokio::test]
    async fn test_unconfigured_uses_fallback() {
        let summary = summarizer(None).summarize(&context(&[], &[])).await;
        assert_eq!(summary, "Sarah is your daughter. They care about you very much.");
    }

    #[tokio::test]
    async fn test_model_reply_is_trimmed() {
        let (url, request) = serve_once(
            "200 OK",
            r#"{"choices":[{"message":{"role":"assistant","content":"  Sarah is your daughter. She loves you.\n"}}]}"#,
        )
        .await;
        let summary = summarizer(Some(url)).summarize(&context(&["Visits"], &[])).await;
        assert_eq!(summary, "Sarah is your daughter. She loves you.");

        let request = request.await.unwrap();
        assert!(request.to_lowercase().contains("authorization: bearer k"));
        assert!(request.contains(r#""model":"test-model""#));
        assert!(request.contains(r#""role":"system""#));
    }

    #[tokio::test]
    async fn test_model_error_uses_fallback() {
        let (url, _request) = serve_once("429 Too Many Requests", r#"{"error":"rate limited"}"#).await;
        let summary = summarizer(Some(url)).summarize(&context(&[], &[])).await;
        assert_eq!(summary, fallback_summary("Sarah", "Daughter"));
    }

    #[tokio::test]
    async fn test_empty_reply_uses_fallback() {
        let (url, _request) = serve_once("200 OK", r#"{"choices":[]}"#).await;
        let summary = summarizer(Some(url)).summarize(&context(&[], &[])).await;
        assert_eq!(summary, fallback_summary("Sarah", "Daughter"));
    }
}
