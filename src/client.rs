//! Completion service client
//!
//! Passes only see the [`CompletionClient`] trait. [`OpenAiClient`] is the
//! blocking implementation against the OpenAI Responses API.

use crate::usage::TokenUsage;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// File consulted for the API key when `OPENAI_API_KEY` is unset.
pub const KEY_FILE_NAME: &str = ".openai.key";

#[derive(Debug, Error)]
pub enum ClientError {
    /// Missing API key or unusable client settings.
    #[error("{0}")]
    Config(String),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("provider returned {status}: {message}")]
    Provider { status: u16, message: String },

    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

/// A function tool the model is forced to call.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub model: String,
    pub input: String,
    pub reasoning_effort: Option<String>,
    /// Output verbosity hint (`low`, `medium`, `high`).
    pub verbosity: Option<String>,
    pub tool: Option<ToolSpec>,
}

/// What the service sent back for one request.
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub text: String,
    pub response: Value,
    /// Arguments of the forced tool call, when a tool was requested and called.
    pub tool_arguments: Option<Value>,
    pub usage: TokenUsage,
}

/// Submit a request and receive a structured payload plus token usage.
pub trait CompletionClient {
    fn complete(&self, request: &CompletionRequest) -> Result<Completion, ClientError>;
}

/// Read the API key from `OPENAI_API_KEY`, then from `~/.openai.key`.
pub fn load_api_key() -> Result<String, ClientError> {
    if let Ok(key) = std::env::var("OPENAI_API_KEY") {
        if !key.trim().is_empty() {
            return Ok(key.trim().to_string());
        }
    }

    let path = key_file_path().ok_or_else(|| {
        ClientError::Config("OPENAI_API_KEY not set and no home directory found".to_string())
    })?;
    if !path.exists() {
        return Err(ClientError::Config(format!(
            "Expected to find an API key at {}. Set OPENAI_API_KEY or create the file.",
            path.display()
        )));
    }
    let key = std::fs::read_to_string(&path)
        .map_err(|e| ClientError::Config(format!("Could not read {}: {}", path.display(), e)))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(ClientError::Config(format!("{} is empty", path.display())));
    }
    Ok(key.to_string())
}

fn key_file_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(KEY_FILE_NAME))
}

/// Blocking client for `POST {base_url}/responses`.
#[derive(Debug, Clone)]
pub struct OpenAiClient {
    client: reqwest::blocking::Client,
    base_url: String,
}

impl OpenAiClient {
    /// Build a client with the key from the environment or key file.
    pub fn from_env(base_url: &str, timeout: Duration) -> Result<Self, ClientError> {
        let api_key = load_api_key()?;
        Self::with_config(&api_key, base_url, timeout)
    }

    pub fn with_config(api_key: &str, base_url: &str, timeout: Duration) -> Result<Self, ClientError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let auth_value = HeaderValue::from_str(&format!("Bearer {}", api_key))
            .map_err(|_| ClientError::Config("Invalid API key format".to_string()))?;
        headers.insert(AUTHORIZATION, auth_value);

        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .map_err(|e| ClientError::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn responses_url(&self) -> String {
        format!("{}/responses", self.base_url)
    }
}

/// Request body for the Responses API.
pub fn request_body(request: &CompletionRequest) -> Value {
    let mut body = json!({
        "model": request.model,
        "input": request.input,
    });
    if let Some(effort) = &request.reasoning_effort {
        body["reasoning"] = json!({ "effort": effort });
    }
    if let Some(verbosity) = &request.verbosity {
        body["text"] = json!({ "verbosity": verbosity });
    }
    if let Some(tool) = &request.tool {
        body["tools"] = json!([{
            "type": "function",
            "name": tool.name,
            "description": tool.description,
            "parameters": tool.parameters,
        }]);
        body["tool_choice"] = json!({ "type": "function", "name": tool.name });
    }
    body
}

impl CompletionClient for OpenAiClient {
    fn complete(&self, request: &CompletionRequest) -> Result<Completion, ClientError> {
        let response = self
            .client
            .post(self.responses_url())
            .json(&request_body(request))
            .send()?;

        let status = response.status();
        let body = response.text()?;
        if !status.is_success() {
            return Err(ClientError::Provider {
                status: status.as_u16(),
                message: error_message(&body),
            });
        }

        let payload: Value = serde_json::from_str(&body)
            .map_err(|e| ClientError::InvalidResponse(format!("response is not JSON: {}", e)))?;
        Ok(completion_from_response(
            payload,
            request.tool.as_ref().map(|t| t.name.as_str()),
        ))
    }
}

/// Error text from a failed response body, JSON or not.
pub fn error_message(body: &str) -> String {
    if let Ok(payload) = serde_json::from_str::<Value>(body) {
        if let Some(message) = payload["error"]["message"].as_str() {
            return message.to_string();
        }
    }
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return "unknown error".to_string();
    }
    trimmed.chars().take(200).collect()
}

/// Split a raw Responses payload into text, tool arguments and usage.
pub fn completion_from_response(response: Value, tool_name: Option<&str>) -> Completion {
    let text = output_text(&response);
    let tool_arguments = tool_name.and_then(|name| tool_call_arguments(&response, name));
    let usage = usage_from_response(&response);
    Completion {
        text,
        response,
        tool_arguments,
        usage,
    }
}

/// `output_text` if the service provided it, else the concatenated text parts.
pub fn output_text(response: &Value) -> String {
    if let Some(text) = response["output_text"].as_str() {
        return text.to_string();
    }
    let mut parts: Vec<&str> = Vec::new();
    for item in response["output"].as_array().into_iter().flatten() {
        if item["type"] != "message" {
            continue;
        }
        for content in item["content"].as_array().into_iter().flatten() {
            if content["type"] == "output_text" {
                if let Some(text) = content["text"].as_str() {
                    parts.push(text);
                }
            }
        }
    }
    parts.join("")
}

/// Arguments of the first call to `name`, in either output shape the API uses.
pub fn tool_call_arguments(response: &Value, name: &str) -> Option<Value> {
    for item in response["output"].as_array().into_iter().flatten() {
        let call = match item["type"].as_str() {
            Some("function_call") => item,
            Some("tool_call") => &item["tool_call"],
            _ => continue,
        };
        if call["name"].as_str() != Some(name) {
            continue;
        }
        match &call["arguments"] {
            Value::Null => continue,
            arguments => return Some(arguments.clone()),
        }
    }
    None
}

/// Token usage; non-reasoning is visible output, `output_tokens - reasoning_tokens`.
pub fn usage_from_response(response: &Value) -> TokenUsage {
    let usage = &response["usage"];
    let total = usage["total_tokens"].as_i64();
    let reasoning = usage["output_tokens_details"]["reasoning_tokens"].as_i64();
    let output = usage["output_tokens"].as_i64();
    let non_reasoning = match (output, reasoning) {
        (Some(output), Some(reasoning)) => Some((output - reasoning).max(0)),
        _ => None,
    };
    TokenUsage::new(total, reasoning, non_reasoning)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_response() -> Value {
        json!({
            "id": "resp_1",
            "output": [
                { "type": "reasoning", "summary": [] },
                {
                    "type": "message",
                    "content": [
                        { "type": "output_text", "text": "Psalm 2 " },
                        { "type": "output_text", "text": "continues Psalm 1." }
                    ]
                },
                {
                    "type": "function_call",
                    "name": "submit_evaluation",
                    "arguments": "{\"justification\":\"x\",\"score\":3}"
                }
            ],
            "usage": {
                "input_tokens": 900,
                "output_tokens": 400,
                "output_tokens_details": { "reasoning_tokens": 250 },
                "total_tokens": 1300
            }
        })
    }

    #[test]
    fn test_output_text_from_parts() {
        assert_eq!(output_text(&sample_response()), "Psalm 2 continues Psalm 1.");
    }

    #[test]
    fn test_output_text_prefers_top_level() {
        let mut r = sample_response();
        r["output_text"] = json!("direct");
        assert_eq!(output_text(&r), "direct");
    }

    #[test]
    fn test_tool_call_arguments() {
        let r = sample_response();
        let args = tool_call_arguments(&r, "submit_evaluation").unwrap();
        assert!(args.as_str().unwrap().contains("justification"));
        assert!(tool_call_arguments(&r, "other_tool").is_none());
    }

    #[test]
    fn test_nested_tool_call_shape() {
        let r = json!({
            "output": [{
                "type": "tool_call",
                "tool_call": { "name": "submit_evaluation", "arguments": { "score": 1 } }
            }]
        });
        assert_eq!(
            tool_call_arguments(&r, "submit_evaluation"),
            Some(json!({ "score": 1 }))
        );
    }

    #[test]
    fn test_usage_from_response() {
        let usage = usage_from_response(&sample_response());
        assert_eq!(usage, TokenUsage::new(Some(1300), Some(250), Some(150)));
    }

    #[test]
    fn test_usage_missing() {
        let usage = usage_from_response(&json!({ "output": [] }));
        assert!(usage.is_unknown());
    }

    #[test]
    fn test_request_body_with_tool() {
        let request = CompletionRequest {
            model: "gpt-5".to_string(),
            input: "score this".to_string(),
            reasoning_effort: Some("medium".to_string()),
            verbosity: None,
            tool: Some(ToolSpec {
                name: "submit_evaluation".to_string(),
                description: "Record a score".to_string(),
                parameters: json!({ "type": "object" }),
            }),
        };
        let body = request_body(&request);
        assert_eq!(body["reasoning"]["effort"], "medium");
        assert_eq!(body["tools"][0]["name"], "submit_evaluation");
        assert_eq!(body["tool_choice"]["name"], "submit_evaluation");
    }

    #[test]
    fn test_request_body_plain() {
        let request = CompletionRequest {
            model: "gpt-5".to_string(),
            input: "argue".to_string(),
            reasoning_effort: None,
            verbosity: None,
            tool: None,
        };
        let body = request_body(&request);
        assert!(body.get("tools").is_none());
        assert!(body.get("reasoning").is_none());
        assert!(body.get("text").is_none());
    }

    #[test]
    fn test_request_body_with_verbosity() {
        let request = CompletionRequest {
            model: "gpt-5".to_string(),
            input: "argue".to_string(),
            reasoning_effort: Some("high".to_string()),
            verbosity: Some("medium".to_string()),
            tool: None,
        };
        let body = request_body(&request);
        assert_eq!(body["text"]["verbosity"], "medium");
        assert_eq!(body["reasoning"]["effort"], "high");
    }

    #[test]
    fn test_error_message_from_json_body() {
        let body = r#"{"error": {"message": "Rate limit reached", "type": "rate_limit"}}"#;
        assert_eq!(error_message(body), "Rate limit reached");
    }

    #[test]
    fn test_error_message_from_html_body() {
        let body = "<html><body>502 Bad Gateway</body></html>\n";
        assert_eq!(error_message(body), "<html><body>502 Bad Gateway</body></html>");
        assert_eq!(error_message("  "), "unknown error");
        assert_eq!(error_message(r#"{"detail": "nope"}"#), r#"{"detail": "nope"}"#);
    }

    #[test]
    fn test_completion_without_tool_request() {
        let completion = completion_from_response(sample_response(), None);
        assert!(completion.tool_arguments.is_none());
        assert_eq!(completion.usage.total, Some(1300));
    }
}
