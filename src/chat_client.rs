//! Client-side chat path. One [`ChatBackend`] is picked by [`ChatMode`]:
//! either through the gateway or straight to the provider.

use crate::credentials::CredentialProvider;
use crate::error::ProxyError;
use crate::models::{DocumentFile, Folder};
use crate::providers::{self, Engine, ProviderEndpoints, ProxyResponse};
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChatMode {
    Direct,
    #[default]
    Gateway,
}

impl FromStr for ChatMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "direct" => Ok(ChatMode::Direct),
            "gateway" => Ok(ChatMode::Gateway),
            other => Err(format!("Unknown chat mode '{}'. Use 'direct' or 'gateway'", other)),
        }
    }
}

impl fmt::Display for ChatMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChatMode::Direct => f.write_str("direct"),
            ChatMode::Gateway => f.write_str("gateway"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub engine: Engine,
    pub context: Option<String>,
    pub message: String,
    /// Caller-held key; backends fall back to their own source when absent.
    pub api_key: Option<String>,
}

#[async_trait]
pub trait ChatBackend: Send + Sync {
    async fn complete(&self, request: &ChatRequest) -> Result<ProxyResponse>;
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GatewayRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    context_info: Option<&'a str>,
    user_message: &'a str,
    engine: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    api_key: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct GatewayError {
    error: String,
}

pub struct GatewayBackend {
    client: reqwest::Client,
    base_url: String,
}

impl GatewayBackend {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl ChatBackend for GatewayBackend {
    async fn complete(&self, request: &ChatRequest) -> Result<ProxyResponse> {
        let body = GatewayRequest {
            context_info: request.context.as_deref(),
            user_message: &request.message,
            engine: request.engine.as_str(),
            api_key: request.api_key.as_deref(),
        };

        let url = format!("{}/api/ai-proxy", self.base_url);
        debug!(%url, engine = %request.engine, "Sending chat through gateway");

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .context("Failed to connect to the DocIntel gateway. Is the server running?")?;

        let status = response.status();
        if !status.is_success() {
            let text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            let message = serde_json::from_str::<GatewayError>(&text)
                .map(|e| e.error)
                .unwrap_or(text);
            bail!("Gateway returned {}: {}", status.as_u16(), message);
        }

        response
            .json()
            .await
            .context("Failed to parse gateway response")
    }
}

pub struct DirectBackend {
    client: reqwest::Client,
    endpoints: ProviderEndpoints,
    credentials: Arc<dyn CredentialProvider>,
}

impl DirectBackend {
    pub fn new(endpoints: ProviderEndpoints, credentials: Arc<dyn CredentialProvider>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoints,
            credentials,
        }
    }
}

#[async_trait]
impl ChatBackend for DirectBackend {
    async fn complete(&self, request: &ChatRequest) -> Result<ProxyResponse> {
        let api_key = request
            .api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .or_else(|| self.credentials.api_key(request.engine))
            .ok_or(ProxyError::MissingCredential(request.engine))?;

        let reply = providers::complete(
            &self.client,
            &self.endpoints,
            request.engine,
            &api_key,
            request.context.as_deref(),
            &request.message,
        )
        .await?;
        Ok(reply)
    }
}

pub fn backend_for(
    mode: ChatMode,
    gateway_url: &str,
    endpoints: ProviderEndpoints,
    credentials: Arc<dyn CredentialProvider>,
) -> Box<dyn ChatBackend> {
    match mode {
        ChatMode::Gateway => Box::new(GatewayBackend::new(gateway_url)),
        ChatMode::Direct => Box::new(DirectBackend::new(endpoints, credentials)),
    }
}

/// Describes a folder and its files for the model. `None` when the folder is
/// empty.
pub fn build_folder_context(folder: &Folder, files: &[DocumentFile]) -> Option<String> {
    if files.is_empty() {
        return None;
    }

    let names: Vec<&str> = files.iter().map(|f| f.name.as_str()).collect();
    let total_size: u64 = files.iter().map(|f| f.size).sum();

    let ocr_texts: Vec<String> = files
        .iter()
        .filter_map(|f| {
            f.ocr_text
                .as_ref()
                .map(|text| format!("File: {}\nOCR Text: {}", f.name, text))
        })
        .collect();
    let summaries: Vec<String> = files
        .iter()
        .filter_map(|f| {
            f.summary
                .as_ref()
                .map(|summary| format!("File: {}\nSummary: {}", f.name, summary))
        })
        .collect();

    let mut context = format!(
        "Folder: {}\nFiles: {}\nTotal files: {}\nTotal size: {:.2} MB\n\n",
        folder.name,
        names.join(", "),
        files.len(),
        total_size as f64 / 1024.0 / 1024.0
    );
    if !ocr_texts.is_empty() {
        context.push_str(&format!("OCR Content:\n{}\n\n", ocr_texts.join("\n\n")));
    }
    if !summaries.is_empty() {
        context.push_str(&format!("File Summaries:\n{}\n\n", summaries.join("\n\n")));
    }

    Some(context.trim().to_string())
}

/// Reply for the built-in DocIntel engine, which has no upstream provider.
pub fn docintel_reply(folder: Option<&Folder>, file_count: usize) -> String {
    match folder {
        Some(folder) if file_count > 0 => format!(
            "Based on the analysis of the \"{}\" folder containing {} document(s), I can provide \
             insights about your query. These documents contain information about various topics. \
             What specific aspect would you like me to elaborate on?",
            folder.name, file_count
        ),
        _ => "I can help you analyze documents and folders once you upload them. \
              Please select a folder to get started."
            .to_string(),
    }
}
