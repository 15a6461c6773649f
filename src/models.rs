use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

pub const ROOT_FOLDER_ID: &str = "root";
pub const DEFAULT_USER_ID: &str = "1";

/// 5 GiB.
pub const DEFAULT_STORAGE_LIMIT: u64 = 5_368_709_120;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AiEngine {
    OpenAi,
    DocIntel,
    Qwen,
}

impl AiEngine {
    /// Tokens charged for the simulated analysis of one uploaded file.
    pub fn upload_tokens(self) -> u64 {
        match self {
            AiEngine::Qwen => 150,
            _ => 100,
        }
    }

    /// Tokens charged for one user-authored chat turn.
    pub fn chat_tokens(self) -> u64 {
        match self {
            AiEngine::Qwen => 75,
            _ => 50,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AiEngine::OpenAi => "openai",
            AiEngine::DocIntel => "docintel",
            AiEngine::Qwen => "qwen",
        }
    }
}

impl fmt::Display for AiEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AiEngine {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "openai" => Ok(AiEngine::OpenAi),
            "docintel" => Ok(AiEngine::DocIntel),
            "qwen" => Ok(AiEngine::Qwen),
            other => Err(format!(
                "Unknown AI engine '{}'. Use 'openai', 'docintel' or 'qwen'",
                other
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AiStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentFile {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub mime_type: String,
    pub size: u64,
    pub folder_id: String,
    pub uploaded_by: String,
    pub uploaded_at: DateTime<Utc>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub ai_status: AiStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ai_engine: Option<AiEngine>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ocr_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extracted_data: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preview_url: Option<String>,
    pub download_url: String,
}

impl DocumentFile {
    pub fn new(
        id: String,
        name: String,
        mime_type: String,
        size: u64,
        folder_id: String,
        ai_engine: AiEngine,
    ) -> Self {
        let download_url = format!("/files/{}/download", id);
        Self {
            id,
            name,
            mime_type,
            size,
            folder_id,
            uploaded_by: DEFAULT_USER_ID.to_string(),
            uploaded_at: Utc::now(),
            tags: Vec::new(),
            ai_status: AiStatus::Pending,
            ai_engine: Some(ai_engine),
            category: None,
            ocr_text: None,
            extracted_data: None,
            summary: None,
            preview_url: None,
            download_url,
        }
    }

    /// Engine the usage tally is attributed to; files without one count as openai.
    pub fn billed_engine(&self) -> AiEngine {
        self.ai_engine.unwrap_or(AiEngine::OpenAi)
    }
}

pub type Permissions = std::collections::BTreeMap<String, Vec<String>>;

fn admin_permissions() -> Permissions {
    let mut permissions = Permissions::new();
    permissions.insert(
        "admin".to_string(),
        vec!["read".to_string(), "write".to_string(), "delete".to_string()],
    );
    permissions
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Folder {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    pub path: String,
    #[serde(default)]
    pub permissions: Permissions,
    pub created_at: DateTime<Utc>,
    pub created_by: String,
}

impl Folder {
    pub fn root() -> Self {
        Self {
            id: ROOT_FOLDER_ID.to_string(),
            name: "Root".to_string(),
            parent_id: None,
            path: "/".to_string(),
            permissions: admin_permissions(),
            created_at: Utc::now(),
            created_by: DEFAULT_USER_ID.to_string(),
        }
    }

    pub fn new(id: String, name: String, parent_id: String, path: String) -> Self {
        Self {
            id,
            name,
            parent_id: Some(parent_id),
            path,
            permissions: admin_permissions(),
            created_at: Utc::now(),
            created_by: DEFAULT_USER_ID.to_string(),
        }
    }

    pub fn is_root(&self) -> bool {
        self.id == ROOT_FOLDER_ID
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Period {
    Monthly,
    Yearly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsageKind {
    Uploads,
    Chats,
    Storage,
}

impl FromStr for UsageKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "uploads" => Ok(UsageKind::Uploads),
            "chats" => Ok(UsageKind::Chats),
            "storage" => Ok(UsageKind::Storage),
            other => Err(format!(
                "Unknown usage kind '{}'. Use 'uploads', 'chats' or 'storage'",
                other
            )),
        }
    }
}

/// Adds a signed delta to a counter, never going below zero.
pub(crate) fn apply_delta(counter: &mut u64, delta: i64) {
    *counter = if delta >= 0 {
        counter.saturating_add(delta as u64)
    } else {
        counter.saturating_sub(delta.unsigned_abs())
    };
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Usage {
    pub uploads_used: u64,
    pub uploads_limit: u64,
    pub chats_used: u64,
    pub chats_limit: u64,
    pub storage_used: u64,
    pub storage_limit: u64,
    pub tokens_used: u64,
    pub tokens_limit: u64,
    pub requests_made: u64,
    pub requests_limit: u64,
    pub period: Period,
}

impl Default for Usage {
    fn default() -> Self {
        Self {
            uploads_used: 0,
            uploads_limit: 100,
            chats_used: 0,
            chats_limit: 50,
            storage_used: 0,
            storage_limit: DEFAULT_STORAGE_LIMIT,
            tokens_used: 0,
            tokens_limit: 10_000,
            requests_made: 0,
            requests_limit: 100,
            period: Period::Monthly,
        }
    }
}

impl Usage {
    pub fn add(&mut self, kind: UsageKind, amount: i64) {
        let counter = match kind {
            UsageKind::Uploads => &mut self.uploads_used,
            UsageKind::Chats => &mut self.chats_used,
            UsageKind::Storage => &mut self.storage_used,
        };
        apply_delta(counter, amount);
    }

    pub(crate) fn record_upload(&mut self, size: u64, tokens: u64) {
        self.uploads_used = self.uploads_used.saturating_add(1);
        self.storage_used = self.storage_used.saturating_add(size);
        self.tokens_used = self.tokens_used.saturating_add(tokens);
        self.requests_made = self.requests_made.saturating_add(1);
    }

    pub(crate) fn record_chat(&mut self, tokens: u64) {
        self.chats_used = self.chats_used.saturating_add(1);
        self.tokens_used = self.tokens_used.saturating_add(tokens);
        self.requests_made = self.requests_made.saturating_add(1);
    }

    pub(crate) fn release_storage(&mut self, size: u64) {
        self.storage_used = self.storage_used.saturating_sub(size);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Plan {
    Free,
    Pro,
    Enterprise,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ApiKeys {
    #[serde(default)]
    pub openai: Option<String>,
    #[serde(default)]
    pub qwen: Option<String>,
}

impl ApiKeys {
    /// Configured key for an engine. Blank keys count as missing.
    pub fn get(&self, engine: AiEngine) -> Option<&str> {
        let key = match engine {
            AiEngine::OpenAi => self.openai.as_deref(),
            AiEngine::Qwen => self.qwen.as_deref(),
            AiEngine::DocIntel => None,
        };
        key.filter(|k| !k.trim().is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrganizationSettings {
    pub default_ai_engine: AiEngine,
    pub enabled_ai_engines: Vec<AiEngine>,
    pub api_keys: ApiKeys,
    pub language: String,
    pub retention_days: u32,
    /// Written as `null` when cleared so a reload does not restore the default.
    #[serde(default)]
    pub theme: Option<String>,
}

impl Default for OrganizationSettings {
    fn default() -> Self {
        Self {
            default_ai_engine: AiEngine::Qwen,
            enabled_ai_engines: vec![AiEngine::OpenAi, AiEngine::DocIntel, AiEngine::Qwen],
            api_keys: ApiKeys {
                openai: None,
                qwen: Some(String::new()),
            },
            language: "en".to_string(),
            retention_days: 365,
            theme: Some("dark".to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Organization {
    pub id: String,
    pub name: String,
    pub plan: Plan,
    pub usage: Usage,
    pub settings: OrganizationSettings,
}

impl Default for Organization {
    fn default() -> Self {
        Self {
            id: "1".to_string(),
            name: "DocIntel Enterprise".to_string(),
            plan: Plan::Free,
            usage: Usage::default(),
            settings: OrganizationSettings::default(),
        }
    }
}

/// Raw per-engine request counts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineUsage {
    pub openai: u64,
    pub docintel: u64,
    pub qwen: u64,
}

/// Per-engine share of all recorded requests, in percent.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct EngineShares {
    pub openai: f64,
    pub docintel: f64,
    pub qwen: f64,
}

impl EngineUsage {
    pub fn record(&mut self, engine: AiEngine) {
        let counter = match engine {
            AiEngine::OpenAi => &mut self.openai,
            AiEngine::DocIntel => &mut self.docintel,
            AiEngine::Qwen => &mut self.qwen,
        };
        *counter = counter.saturating_add(1);
    }

    pub fn count(&self, engine: AiEngine) -> u64 {
        match engine {
            AiEngine::OpenAi => self.openai,
            AiEngine::DocIntel => self.docintel,
            AiEngine::Qwen => self.qwen,
        }
    }

    pub fn total(&self) -> u64 {
        self.openai
            .saturating_add(self.docintel)
            .saturating_add(self.qwen)
    }

    /// Normalizes the counts into percentages. All zeros when nothing was recorded.
    pub fn shares(&self) -> EngineShares {
        let total = self.total();
        if total == 0 {
            return EngineShares::default();
        }
        let pct = |n: u64| n as f64 * 100.0 / total as f64;
        EngineShares {
            openai: pct(self.openai),
            docintel: pct(self.docintel),
            qwen: pct(self.qwen),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonthlyData {
    pub month: String,
    pub uploads: u64,
    pub chats: u64,
    pub storage: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopFile {
    pub name: String,
    pub views: u64,
    pub chats: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Analytics {
    pub total_files: u64,
    pub total_chats: u64,
    pub total_uploads: u64,
    pub total_storage: u64,
    pub tokens_used: u64,
    pub requests_made: u64,
    pub monthly_data: Vec<MonthlyData>,
    pub top_files: Vec<TopFile>,
    pub ai_engine_usage: EngineUsage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageUsage {
    pub tokens_used: u64,
    pub cost: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: String,
    pub content: String,
    pub role: Role,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_id: Option<String>,
    pub ai_engine: AiEngine,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<MessageUsage>,
}

impl ChatMessage {
    pub fn new(id: String, role: Role, content: String, ai_engine: AiEngine) -> Self {
        Self {
            id,
            content,
            role,
            timestamp: Utc::now(),
            file_id: None,
            ai_engine,
            usage: None,
        }
    }
}
