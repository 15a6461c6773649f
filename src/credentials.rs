use crate::models::ApiKeys;
use crate::providers::Engine;

pub const QWEN_API_KEY_ENV: &str = "QWEN_API_KEY";
pub const OPENAI_API_KEY_ENV: &str = "OPENAI_API_KEY";

/// Source of provider API keys for whoever makes the upstream call.
pub trait CredentialProvider: Send + Sync {
    fn api_key(&self, engine: Engine) -> Option<String>;
}

/// Reads the server-held secrets from the environment on every lookup, so a
/// rotated key is picked up without a restart.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvCredentials;

impl CredentialProvider for EnvCredentials {
    fn api_key(&self, engine: Engine) -> Option<String> {
        let var = match engine {
            Engine::Qwen => QWEN_API_KEY_ENV,
            Engine::OpenAi => OPENAI_API_KEY_ENV,
        };
        std::env::var(var).ok().filter(|k| !k.trim().is_empty())
    }
}

#[derive(Debug, Clone, Default)]
pub struct StaticCredentials {
    keys: ApiKeys,
}

impl StaticCredentials {
    pub fn new(keys: ApiKeys) -> Self {
        Self { keys }
    }

    pub fn none() -> Self {
        Self::default()
    }
}

impl CredentialProvider for StaticCredentials {
    fn api_key(&self, engine: Engine) -> Option<String> {
        self.keys.get(engine.into()).map(str::to_string)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_credentials_skip_blank_keys() {
        let creds = StaticCredentials::new(ApiKeys {
            openai: Some(String::new()),
            qwen: Some("dash".to_string()),
        });
        assert_eq!(creds.api_key(Engine::Qwen).as_deref(), Some("dash"));
        assert_eq!(creds.api_key(Engine::OpenAi), None);
        assert_eq!(StaticCredentials::none().api_key(Engine::Qwen), None);
    }

    // Only test touching these variables; kept in one function so the steps
    // run in order.
    #[test]
    fn env_credentials_treat_blank_or_unset_as_missing() {
        let creds = EnvCredentials;

        std::env::remove_var(OPENAI_API_KEY_ENV);
        assert_eq!(creds.api_key(Engine::OpenAi), None);

        std::env::set_var(QWEN_API_KEY_ENV, "   ");
        assert_eq!(creds.api_key(Engine::Qwen), None);

        std::env::set_var(QWEN_API_KEY_ENV, "dash-rotated");
        assert_eq!(creds.api_key(Engine::Qwen).as_deref(), Some("dash-rotated"));

        std::env::remove_var(QWEN_API_KEY_ENV);
        assert_eq!(creds.api_key(Engine::Qwen), None);
    }
}
