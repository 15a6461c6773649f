//! Upstream chat providers: request construction and response normalization.
//!
//! Both the gateway handlers and the direct chat backend go through
//! [`complete`], so the provider wire formats live in exactly one place.

use crate::error::ProxyError;
use crate::models::AiEngine;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use std::str::FromStr;
use tracing::{debug, info, warn};

pub const QWEN_API_URL: &str =
    "https://dashscope.aliyuncs.com/api/v1/services/aigc/text-generation/generation";
pub const OPENAI_API_URL: &str = "https://api.openai.com/v1/chat/completions";
pub const QWEN_MODEL: &str = "qwen-plus";
pub const OPENAI_MODEL: &str = "gpt-4";

const QWEN_SYSTEM_PROMPT: &str = "You are an AI assistant specialized in document analysis and OCR. \
You can analyze documents, extract information, and answer questions about their content. \
Provide helpful, accurate, and detailed responses based on the document context provided.";

const OPENAI_SYSTEM_PROMPT: &str = "You are an AI assistant specialized in document analysis. \
You can analyze documents, extract information, and answer questions about their content. \
Provide helpful, accurate, and detailed responses based on the document context provided.";

const TEMPERATURE: f64 = 0.7;
const MAX_TOKENS: u32 = 1500;
const OPENAI_EMPTY_REPLY: &str = "No response received from OpenAI";

/// Engines with an upstream provider behind them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Engine {
    Qwen,
    OpenAi,
}

impl Engine {
    pub fn as_str(self) -> &'static str {
        match self {
            Engine::Qwen => "qwen",
            Engine::OpenAi => "openai",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            Engine::Qwen => "Qwen",
            Engine::OpenAi => "OpenAI",
        }
    }
}

impl fmt::Display for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Engine {
    type Err = ProxyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "qwen" => Ok(Engine::Qwen),
            "openai" => Ok(Engine::OpenAi),
            _ => Err(ProxyError::UnsupportedEngine),
        }
    }
}

impl From<Engine> for AiEngine {
    fn from(engine: Engine) -> Self {
        match engine {
            Engine::Qwen => AiEngine::Qwen,
            Engine::OpenAi => AiEngine::OpenAi,
        }
    }
}

impl TryFrom<AiEngine> for Engine {
    type Error = ProxyError;

    fn try_from(engine: AiEngine) -> Result<Self, Self::Error> {
        match engine {
            AiEngine::Qwen => Ok(Engine::Qwen),
            AiEngine::OpenAi => Ok(Engine::OpenAi),
            AiEngine::DocIntel => Err(ProxyError::UnsupportedEngine),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProviderEndpoint {
    pub url: String,
    pub model: String,
}

#[derive(Debug, Clone)]
pub struct ProviderEndpoints {
    pub qwen: ProviderEndpoint,
    pub openai: ProviderEndpoint,
}

impl Default for ProviderEndpoints {
    fn default() -> Self {
        Self {
            qwen: ProviderEndpoint {
                url: QWEN_API_URL.to_string(),
                model: QWEN_MODEL.to_string(),
            },
            openai: ProviderEndpoint {
                url: OPENAI_API_URL.to_string(),
                model: OPENAI_MODEL.to_string(),
            },
        }
    }
}

impl ProviderEndpoints {
    pub fn get(&self, engine: Engine) -> &ProviderEndpoint {
        match engine {
            Engine::Qwen => &self.qwen,
            Engine::OpenAi => &self.openai,
        }
    }
}

/// Provider-independent reply. `usage` is passed through from the provider
/// untouched and serialized as `null` when absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProxyResponse {
    pub content: String,
    pub usage: Option<Value>,
}

pub fn user_content(context: Option<&str>, message: &str) -> String {
    match context.filter(|c| !c.is_empty()) {
        Some(context) => format!("Context: {}\n\nQuestion: {}", context, message),
        None => message.to_string(),
    }
}

pub fn build_payload(engine: Engine, model: &str, context: Option<&str>, message: &str) -> Value {
    let user = user_content(context, message);
    match engine {
        Engine::Qwen => json!({
            "model": model,
            "input": {
                "messages": [
                    {"role": "system", "content": QWEN_SYSTEM_PROMPT},
                    {"role": "user", "content": user},
                ]
            },
            "parameters": {
                "temperature": TEMPERATURE,
                "max_tokens": MAX_TOKENS,
                "result_format": "message",
            }
        }),
        Engine::OpenAi => json!({
            "model": model,
            "messages": [
                {"role": "system", "content": OPENAI_SYSTEM_PROMPT},
                {"role": "user", "content": user},
            ],
            "temperature": TEMPERATURE,
            "max_tokens": MAX_TOKENS,
        }),
    }
}

fn upstream_error_message(engine: Engine, details: &Value) -> Option<&str> {
    let pointer = match engine {
        Engine::Qwen => "/message",
        Engine::OpenAi => "/error/message",
    };
    details
        .pointer(pointer)
        .and_then(Value::as_str)
        .filter(|m| !m.is_empty())
}

fn message_text(message: &Value) -> String {
    match message.get("content") {
        Some(Value::String(text)) => text.clone(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    }
}

/// Extracts the reply text from a successful provider body.
pub fn normalize(engine: Engine, data: Value) -> Result<ProxyResponse, ProxyError> {
    let usage = data.get("usage").filter(|u| !u.is_null()).cloned();

    let content = match engine {
        Engine::Qwen => match data.pointer("/output/choices/0/message") {
            Some(message) if message.is_object() => message_text(message),
            _ => {
                warn!("Invalid response format from Qwen API");
                return Err(ProxyError::InvalidFormat {
                    provider: engine,
                    details: data,
                });
            }
        },
        Engine::OpenAi => data
            .pointer("/choices/0/message/content")
            .and_then(Value::as_str)
            .filter(|c| !c.is_empty())
            .unwrap_or(OPENAI_EMPTY_REPLY)
            .to_string(),
    };

    Ok(ProxyResponse { content, usage })
}

/// Sends one chat turn to the provider and normalizes the reply.
pub async fn complete(
    client: &reqwest::Client,
    endpoints: &ProviderEndpoints,
    engine: Engine,
    api_key: &str,
    context: Option<&str>,
    message: &str,
) -> Result<ProxyResponse, ProxyError> {
    let endpoint = endpoints.get(engine);
    let payload = build_payload(engine, &endpoint.model, context, message);

    let mut request = client
        .post(&endpoint.url)
        .bearer_auth(api_key)
        .json(&payload);
    if engine == Engine::Qwen {
        request = request.header("X-DashScope-SSE", "disable");
    }

    info!(engine = %engine, model = %endpoint.model, "Making request to {} API", engine.display_name());

    let response = request
        .send()
        .await
        .map_err(|e| ProxyError::transport(engine, e))?;
    let status = response.status();
    debug!(engine = %engine, status = status.as_u16(), "Upstream responded");

    let body = response
        .text()
        .await
        .map_err(|e| ProxyError::transport(engine, e))?;

    if !status.is_success() {
        let details: Value = serde_json::from_str(&body).unwrap_or_else(|_| json!({}));
        let message = upstream_error_message(engine, &details)
            .unwrap_or("Unknown error")
            .to_string();
        warn!(engine = %engine, status = status.as_u16(), %message, "Upstream API error");
        return Err(ProxyError::Upstream {
            provider: engine,
            status: status.as_u16(),
            message,
            details,
        });
    }

    let data: Value = serde_json::from_str(&body).map_err(|e| ProxyError::Internal {
        details: e.to_string(),
    })?;

    normalize(engine, data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn endpoints_for(server: &MockServer) -> ProviderEndpoints {
        ProviderEndpoints {
            qwen: ProviderEndpoint {
                url: format!("{}/qwen", server.uri()),
                model: QWEN_MODEL.to_string(),
            },
            openai: ProviderEndpoint {
                url: format!("{}/openai", server.uri()),
                model: OPENAI_MODEL.to_string(),
            },
        }
    }

    #[test]
    fn context_is_prefixed_when_present() {
        assert_eq!(
            user_content(Some("Folder: Invoices"), "Total?"),
            "Context: Folder: Invoices\n\nQuestion: Total?"
        );
        assert_eq!(user_content(None, "Hello"), "Hello");
        assert_eq!(user_content(Some(""), "Hello"), "Hello");
    }

    #[test]
    fn qwen_payload_shape() {
        let payload = build_payload(Engine::Qwen, QWEN_MODEL, None, "hi");
        assert_eq!(payload["model"], "qwen-plus");
        assert_eq!(payload["parameters"]["temperature"], 0.7);
        assert_eq!(payload["parameters"]["max_tokens"], 1500);
        assert_eq!(payload["parameters"]["result_format"], "message");
        assert_eq!(payload["input"]["messages"][0]["role"], "system");
        assert!(payload["input"]["messages"][0]["content"]
            .as_str()
            .unwrap()
            .contains("document analysis and OCR"));
        assert_eq!(payload["input"]["messages"][1]["content"], "hi");
    }

    #[test]
    fn openai_payload_shape() {
        let payload = build_payload(Engine::OpenAi, OPENAI_MODEL, Some("ctx"), "q");
        assert_eq!(payload["model"], "gpt-4");
        assert_eq!(payload["max_tokens"], 1500);
        assert_eq!(payload["messages"][1]["content"], "Context: ctx\n\nQuestion: q");
        assert!(!payload["messages"][0]["content"]
            .as_str()
            .unwrap()
            .contains("OCR"));
    }

    #[test]
    fn qwen_reply_without_usage_normalizes_to_null() {
        let data = json!({"output": {"choices": [{"message": {"content": "hi"}}]}});
        let reply = normalize(Engine::Qwen, data).unwrap();
        assert_eq!(
            serde_json::to_value(&reply).unwrap(),
            json!({"content": "hi", "usage": null})
        );
    }

    #[test]
    fn qwen_reply_without_choices_is_invalid() {
        let data = json!({"output": {"text": "legacy format"}, "request_id": "abc"});
        match normalize(Engine::Qwen, data) {
            Err(ProxyError::InvalidFormat { details, .. }) => {
                assert_eq!(details["request_id"], "abc");
            }
            other => panic!("expected invalid format, got {:?}", other),
        }
    }

    #[test]
    fn openai_reply_falls_back_to_placeholder() {
        let reply = normalize(Engine::OpenAi, json!({"choices": []})).unwrap();
        assert_eq!(reply.content, "No response received from OpenAI");

        let data = json!({
            "choices": [{"message": {"content": "Answer"}}],
            "usage": {"total_tokens": 42}
        });
        let reply = normalize(Engine::OpenAi, data).unwrap();
        assert_eq!(reply.content, "Answer");
        assert_eq!(reply.usage.unwrap()["total_tokens"], 42);
    }

    #[test]
    fn engine_parsing_rejects_docintel() {
        assert_eq!("qwen".parse::<Engine>().unwrap(), Engine::Qwen);
        assert!(matches!(
            "docintel".parse::<Engine>(),
            Err(ProxyError::UnsupportedEngine)
        ));
        assert!(Engine::try_from(AiEngine::DocIntel).is_err());
    }

    #[tokio::test]
    async fn qwen_request_disables_streaming() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/qwen"))
            .and(header("authorization", "Bearer dash-key"))
            .and(header("x-dashscope-sse", "disable"))
            .and(body_partial_json(json!({"model": "qwen-plus"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "output": {"choices": [{"message": {"role": "assistant", "content": "ok"}}]},
                "usage": {"input_tokens": 10, "output_tokens": 2}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        let reply = complete(
            &client,
            &endpoints_for(&server),
            Engine::Qwen,
            "dash-key",
            None,
            "ping",
        )
        .await
        .unwrap();
        assert_eq!(reply.content, "ok");
        assert_eq!(reply.usage.unwrap()["input_tokens"], 10);
    }

    #[tokio::test]
    async fn openai_error_message_is_read_from_nested_field() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/openai"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({
                "error": {"message": "Incorrect API key provided"}
            })))
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        let err = complete(
            &client,
            &endpoints_for(&server),
            Engine::OpenAi,
            "bad",
            None,
            "ping",
        )
        .await
        .unwrap_err();
        assert_eq!(
            err.to_string(),
            "OpenAI API error (401): Incorrect API key provided"
        );
    }

    #[tokio::test]
    async fn non_json_error_body_reports_unknown_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/qwen"))
            .respond_with(ResponseTemplate::new(502).set_body_string("<html>bad gateway</html>"))
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        let err = complete(
            &client,
            &endpoints_for(&server),
            Engine::Qwen,
            "k",
            None,
            "ping",
        )
        .await
        .unwrap_err();
        assert_eq!(err.to_string(), "Qwen API error (502): Unknown error");
        assert_eq!(err.body().details.unwrap(), json!({}));
    }
}
