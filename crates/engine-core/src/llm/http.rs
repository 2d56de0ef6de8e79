//! Default [`AIService`] implementation: an OpenAI-compatible chat
//! completions endpoint reached over HTTP.

use std::pin::Pin;

use anyhow::{Result, bail};
use async_stream::try_stream;
use async_trait::async_trait;
use futures::{Stream, StreamExt};
use reqwest::Client;
use serde_json::json;

use super::{AIService, ModelOverride, ProviderUsage, StreamChunk};

/// Talks to any OpenAI-compatible `/chat/completions` endpoint.
pub struct HttpAiService {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    default_model: String,
}

impl HttpAiService {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>, default_model: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into(),
            api_key,
            default_model: default_model.into(),
        }
    }

    fn model_for(&self, model_override: &ModelOverride) -> &str {
        model_override
            .model_id
            .as_deref()
            .filter(|m| !m.is_empty())
            .unwrap_or(self.default_model.as_str())
    }

    fn request(&self, body: serde_json::Value) -> reqwest::RequestBuilder {
        let url = format!("{}/chat/completions", self.base_url);
        let mut req = self.client.post(url).json(&body);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }
        req
    }

    async fn complete(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        temperature: f32,
        model_override: &ModelOverride,
        response_format: Option<serde_json::Value>,
    ) -> Result<(String, ProviderUsage, Option<String>)> {
        let model = self.model_for(model_override);
        let mut body = json!({
            "model": model,
            "temperature": temperature,
            "messages": [
                {"role": "system", "content": system_prompt},
                {"role": "user", "content": user_prompt},
            ],
        });
        if let Some(format) = response_format {
            body["response_format"] = format;
        }

        let response = self.request(body).send().await?;
        let status = response.status();
        let value: serde_json::Value = response.json().await?;

        if !status.is_success() {
            let detail = extract_error(&value)
                .unwrap_or_else(|| format!("provider request failed with status {status}"));
            bail!(detail);
        }
        if let Some(detail) = extract_error(&value) {
            bail!(detail);
        }

        let text = extract_text(&value)
            .ok_or_else(|| anyhow::anyhow!("provider returned no completion content"))?;
        let usage = extract_usage(&value);
        let request_id = value
            .get("id")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string());

        Ok((text, usage, request_id))
    }
}

#[async_trait]
impl AIService for HttpAiService {
    async fn generate_text(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        temperature: f32,
        model_override: &ModelOverride,
    ) -> Result<(String, ProviderUsage, Option<String>)> {
        self.complete(system_prompt, user_prompt, temperature, model_override, None)
            .await
    }

    async fn generate_structured_json(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        temperature: f32,
        model_override: &ModelOverride,
    ) -> Result<(String, ProviderUsage, Option<String>)> {
        self.complete(
            system_prompt,
            user_prompt,
            temperature,
            model_override,
            Some(json!({"type": "json_object"})),
        )
        .await
    }

    async fn create_chat_stream(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        temperature: f32,
        model_override: &ModelOverride,
    ) -> Result<Pin<Box<dyn Stream<Item = StreamChunk> + Send>>> {
        let model = self.model_for(model_override);
        let body = json!({
            "model": model,
            "temperature": temperature,
            "stream": true,
            "messages": [
                {"role": "system", "content": system_prompt},
                {"role": "user", "content": user_prompt},
            ],
        });

        let response = self.request(body).send().await?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            bail!("provider stream request failed with status {status}: {text}");
        }

        let mut bytes = response.bytes_stream();
        let stream = try_stream! {
            let mut buffer = String::new();
            while let Some(chunk) = bytes.next().await {
                let chunk = chunk?;
                buffer.push_str(std::str::from_utf8(&chunk).unwrap_or_default());

                while let Some(pos) = buffer.find("\n\n") {
                    let frame = buffer[..pos].to_string();
                    buffer = buffer[pos + 2..].to_string();
                    for line in frame.lines() {
                        let Some(payload) = line.strip_prefix("data: ") else { continue };
                        let payload = payload.trim();
                        if payload == "[DONE]" {
                            yield StreamChunk { delta: String::new(), done: true };
                            continue;
                        }
                        let Ok(value) = serde_json::from_str::<serde_json::Value>(payload) else { continue };
                        let delta = value
                            .get("choices")
                            .and_then(|c| c.get(0))
                            .and_then(|c| c.get("delta"))
                            .and_then(|d| d.get("content"))
                            .and_then(|v| v.as_str())
                            .unwrap_or_default();
                        if !delta.is_empty() {
                            yield StreamChunk { delta: delta.to_string(), done: false };
                        }
                    }
                }
            }
        };

        Ok(Box::pin(stream))
    }
}

fn extract_text(value: &serde_json::Value) -> Option<String> {
    value
        .get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
}

fn extract_usage(value: &serde_json::Value) -> ProviderUsage {
    let usage = value.get("usage");
    ProviderUsage {
        prompt_tokens: usage
            .and_then(|u| u.get("prompt_tokens"))
            .and_then(|v| v.as_i64())
            .unwrap_or(0) as i32,
        completion_tokens: usage
            .and_then(|u| u.get("completion_tokens"))
            .and_then(|v| v.as_i64())
            .unwrap_or(0) as i32,
        cost: None,
    }
}

fn extract_error(value: &serde_json::Value) -> Option<String> {
    value
        .get("error")
        .and_then(|e| e.get("message"))
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
}
