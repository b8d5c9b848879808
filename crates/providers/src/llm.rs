use anyhow::{Context, Result};
use async_trait::async_trait;
use concierge_core::{ChatMessage, ChatRole, ToolDeclaration};
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Client;
use serde_json::{json, Value};

const GEMINI_BASE: &str = "https://generativelanguage.googleapis.com/v1beta/models";
const ENHANCEMENT_TEMPERATURE: f64 = 0.7;
const CHAT_TEMPERATURE: f64 = 0.4;

static CODE_FENCE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)^\s*```[A-Za-z0-9_-]*\s*\n?(.*?)\s*```\s*$").expect("valid code fence regex")
});

const ENHANCEMENT_PROMPT: &str = r#"You are an enthusiastic travel concierge crafting detailed itineraries.
Using the structured JSON context provided below, create a plan that matches this JSON schema:
{
  "plan": [
    {
      "date": "YYYY-MM-DD",
      "morning": [ActivityCard],
      "afternoon": [ActivityCard],
      "evening": [ActivityCard]
    }
  ],
  "restaurants": [ActivityCard],
  "packing_checklist": ["item", ...],
  "reasoning_notes": ["note", ...]
}

ActivityCard object shape:
{
  "title": string,
  "url": string|null,
  "price_tier": "$"|"$$"|"$$$"|null,
  "duration_min": integer|null,
  "tags": [string,...],
  "wheelchair_friendly": boolean|null,
  "child_friendly": boolean|null
}

Rules:
- Respect traveler preferences and any flags in the context.
- Prefer provided activity suggestions, but you may add light variations if helpful.
- Return ONLY valid JSON matching the schema. No prose.
"#;

#[derive(Debug, Clone, PartialEq)]
pub struct ToolCall {
    pub name: String,
    pub args: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ToolResult {
    pub name: String,
    pub output: String,
}

/// One entry of a chat transcript as the model sees it.
#[derive(Debug, Clone, PartialEq)]
pub enum TranscriptEntry {
    Message(ChatMessage),
    ToolCalls(Vec<ToolCall>),
    ToolResults(Vec<ToolResult>),
}

#[derive(Debug, Clone)]
pub struct ChatTurnRequest {
    pub system: String,
    pub transcript: Vec<TranscriptEntry>,
    pub tools: Vec<ToolDeclaration>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ModelTurn {
    Text(String),
    ToolCalls(Vec<ToolCall>),
}

#[async_trait]
pub trait LanguageModel: Send + Sync {
    fn model_name(&self) -> &str;

    /// Single-shot generation in JSON response mode. Returns the raw text.
    async fn generate_json(&self, system: &str, user: &str) -> Result<String>;

    async fn chat_turn(&self, request: &ChatTurnRequest) -> Result<ModelTurn>;
}

/// Asks the model for an itinerary in the response schema and returns its
/// text with any markdown fence removed.
pub async fn request_enhancement(model: &dyn LanguageModel, context: &Value) -> Result<String> {
    let user = format!("Context JSON:\n{context}\nProduce the plan JSON now.");
    let raw = model.generate_json(ENHANCEMENT_PROMPT, &user).await?;
    Ok(strip_code_fences(&raw).to_string())
}

pub fn strip_code_fences(raw: &str) -> &str {
    match CODE_FENCE.captures(raw).and_then(|captures| captures.get(1)) {
        Some(inner) => inner.as_str(),
        None => raw.trim(),
    }
}

/// Gemini `generateContent` over plain REST.
#[derive(Clone)]
pub struct GeminiClient {
    client: Client,
    api_key: String,
    model: String,
}

impl GeminiClient {
    pub fn new(client: Client, api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client,
            api_key: api_key.into(),
            model: model.into(),
        }
    }

    async fn generate(&self, payload: &Value) -> Result<Value> {
        let url = format!("{GEMINI_BASE}/{}:generateContent", self.model);
        let response = self
            .client
            .post(url)
            .header("x-goog-api-key", self.api_key.as_str())
            .json(payload)
            .send()
            .await
            .context("Gemini request failed")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Gemini non-success status {}: {}", status.as_u16(), body);
        }
        response.json().await.context("Gemini parse failed")
    }
}

#[async_trait]
impl LanguageModel for GeminiClient {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate_json(&self, system: &str, user: &str) -> Result<String> {
        let payload = json!({
            "systemInstruction": { "parts": [{ "text": system }] },
            "contents": [{ "role": "user", "parts": [{ "text": user }] }],
            "generationConfig": {
                "responseMimeType": "application/json",
                "temperature": ENHANCEMENT_TEMPERATURE,
            }
        });
        let body = self.generate(&payload).await?;
        extract_text(&body)
            .filter(|text| !text.trim().is_empty())
            .context("Gemini output text missing")
    }

    async fn chat_turn(&self, request: &ChatTurnRequest) -> Result<ModelTurn> {
        let body = self.generate(&chat_payload(request)).await?;
        parse_model_turn(&body).context("Gemini returned no candidate content")
    }
}

pub(crate) fn chat_payload(request: &ChatTurnRequest) -> Value {
    let contents = request
        .transcript
        .iter()
        .map(|entry| match entry {
            TranscriptEntry::Message(message) => json!({
                "role": gemini_role(message.role),
                "parts": [{ "text": message.content }],
            }),
            TranscriptEntry::ToolCalls(calls) => json!({
                "role": "model",
                "parts": calls
                    .iter()
                    .map(|call| json!({ "functionCall": { "name": call.name, "args": call.args } }))
                    .collect::<Vec<_>>(),
            }),
            TranscriptEntry::ToolResults(results) => json!({
                "role": "user",
                "parts": results
                    .iter()
                    .map(|result| json!({
                        "functionResponse": {
                            "name": result.name,
                            "response": { "content": result.output },
                        }
                    }))
                    .collect::<Vec<_>>(),
            }),
        })
        .collect::<Vec<_>>();

    let mut payload = json!({
        "systemInstruction": { "parts": [{ "text": request.system }] },
        "contents": contents,
        "generationConfig": { "temperature": CHAT_TEMPERATURE },
    });
    if !request.tools.is_empty() {
        payload["tools"] = json!([{ "functionDeclarations": request.tools }]);
    }
    payload
}

fn gemini_role(role: ChatRole) -> &'static str {
    match role {
        ChatRole::User => "user",
        ChatRole::Assistant => "model",
    }
}

fn candidate_parts(body: &Value) -> Option<&Vec<Value>> {
    body.get("candidates")?
        .as_array()?
        .first()?
        .get("content")?
        .get("parts")?
        .as_array()
}

fn extract_text(body: &Value) -> Option<String> {
    let chunks = candidate_parts(body)?
        .iter()
        .filter_map(|part| part.get("text").and_then(Value::as_str))
        .collect::<Vec<_>>();
    if chunks.is_empty() {
        None
    } else {
        Some(chunks.join("\n"))
    }
}

/// Function calls take precedence over text in the same candidate.
pub(crate) fn parse_model_turn(body: &Value) -> Option<ModelTurn> {
    let parts = candidate_parts(body)?;
    let calls = parts
        .iter()
        .filter_map(|part| part.get("functionCall"))
        .filter_map(|call| {
            Some(ToolCall {
                name: call.get("name")?.as_str()?.to_string(),
                args: call.get("args").cloned().unwrap_or(Value::Null),
            })
        })
        .collect::<Vec<_>>();
    if !calls.is_empty() {
        return Some(ModelTurn::ToolCalls(calls));
    }
    Some(ModelTurn::Text(extract_text(body).unwrap_or_default()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_json_fences() {
        assert_eq!(strip_code_fences("```json\n{\"plan\": []}\n```"), "{\"plan\": []}");
        assert_eq!(strip_code_fences("```\n[1]\n```  "), "[1]");
        assert_eq!(strip_code_fences("  {\"a\":1} "), "{\"a\":1}");
    }

    #[test]
    fn function_calls_win_over_text() {
        let body = json!({
            "candidates": [{
                "content": { "parts": [
                    { "text": "Let me check." },
                    { "functionCall": { "name": "get_weather", "args": { "location": "Oslo" } } }
                ]}
            }]
        });
        assert_eq!(
            parse_model_turn(&body),
            Some(ModelTurn::ToolCalls(vec![ToolCall {
                name: "get_weather".into(),
                args: json!({ "location": "Oslo" }),
            }]))
        );
    }

    #[test]
    fn text_parts_are_joined() {
        let body = json!({ "candidates": [{ "content": { "parts": [{ "text": "Hi" }, { "text": "there" }] } }] });
        assert_eq!(parse_model_turn(&body), Some(ModelTurn::Text("Hi\nthere".into())));
        assert_eq!(parse_model_turn(&json!({ "candidates": [] })), None);
    }

    #[test]
    fn chat_payload_maps_roles_and_tool_traffic() {
        let request = ChatTurnRequest {
            system: "system text".into(),
            transcript: vec![
                TranscriptEntry::Message(ChatMessage::user("weather?")),
                TranscriptEntry::ToolCalls(vec![ToolCall {
                    name: "get_weather".into(),
                    args: json!({ "location": "Oslo" }),
                }]),
                TranscriptEntry::ToolResults(vec![ToolResult {
                    name: "get_weather".into(),
                    output: "No records found.".into(),
                }]),
                TranscriptEntry::Message(ChatMessage::assistant("Rain later.")),
            ],
            tools: concierge_core::tool_declarations(),
        };
        let payload = chat_payload(&request);

        assert_eq!(payload["systemInstruction"]["parts"][0]["text"], "system text");
        assert_eq!(payload["contents"][1]["role"], "model");
        assert_eq!(payload["contents"][1]["parts"][0]["functionCall"]["name"], "get_weather");
        assert_eq!(
            payload["contents"][2]["parts"][0]["functionResponse"]["response"]["content"],
            "No records found."
        );
        assert_eq!(payload["contents"][3]["role"], "model");
        assert_eq!(payload["tools"][0]["functionDeclarations"].as_array().unwrap().len(), 5);
    }
}
