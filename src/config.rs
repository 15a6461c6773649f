//! Gateway configuration, read from the environment (and `.env` when present).

use crate::providers::{
    ProviderEndpoint, ProviderEndpoints, OPENAI_API_URL, OPENAI_MODEL, QWEN_API_URL, QWEN_MODEL,
};
use anyhow::{Context, Result};

pub const DEFAULT_PORT: u16 = 3001;
pub const DEFAULT_GATEWAY_URL: &str = "http://localhost:3001";

fn default_host() -> String {
    "0.0.0.0".to_string()
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Listen address (default: 0.0.0.0)
    pub host: String,

    /// Listen port (default: 3001)
    pub port: u16,

    /// Upstream provider URLs and models
    pub endpoints: ProviderEndpoints,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: DEFAULT_PORT,
            endpoints: ProviderEndpoints::default(),
        }
    }
}

impl ServerConfig {
    /// Provider API keys are deliberately not part of this struct; they are
    /// looked up per request through `EnvCredentials`.
    pub fn from_env() -> Result<Self> {
        let host = std::env::var("HOST").unwrap_or_else(|_| default_host());
        let port = match std::env::var("PORT") {
            Ok(raw) => raw
                .trim()
                .parse()
                .with_context(|| format!("Invalid PORT '{}'", raw))?,
            Err(_) => DEFAULT_PORT,
        };

        let endpoints = ProviderEndpoints {
            qwen: ProviderEndpoint {
                url: std::env::var("QWEN_API_URL").unwrap_or_else(|_| QWEN_API_URL.to_string()),
                model: std::env::var("QWEN_MODEL").unwrap_or_else(|_| QWEN_MODEL.to_string()),
            },
            openai: ProviderEndpoint {
                url: std::env::var("OPENAI_API_URL")
                    .unwrap_or_else(|_| OPENAI_API_URL.to_string()),
                model: std::env::var("OPENAI_MODEL")
                    .unwrap_or_else(|_| OPENAI_MODEL.to_string()),
            },
        };

        Ok(Self {
            host,
            port,
            endpoints,
        })
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_point_at_public_providers() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_addr(), "0.0.0.0:3001");
        assert_eq!(config.endpoints.qwen.model, "qwen-plus");
        assert!(config.endpoints.openai.url.ends_with("/v1/chat/completions"));
    }
}
