//! Local application state: files, folders, usage counters, organization,
//! analytics and chat history, each persisted to its own storage slot.
//!
//! Every mutation updates `Usage`, `Analytics` and `Organization::usage`
//! together inside a single `&mut self` call, then writes the touched slots.

use crate::models::{
    AiEngine, Analytics, ApiKeys, ChatMessage, DocumentFile, Folder, Organization, Role, Usage,
    UsageKind, ROOT_FOLDER_ID,
};
use crate::storage::{
    load_list_slot, load_slot, save_slot, KeyValueStore, ANALYTICS_KEY, API_KEYS_KEY, CHAT_MESSAGES_KEY,
    FILES_KEY, FOLDERS_KEY, ORGANIZATION_KEY, USAGE_KEY,
};
use chrono::Utc;
use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, Default)]
pub struct DataStoreOptions {
    /// Attach the simulated OCR/extraction results to uploaded records. When
    /// off, uploads are stored exactly as given.
    pub attach_simulated_analysis: bool,
}

pub struct DataStore {
    store: Box<dyn KeyValueStore>,
    options: DataStoreOptions,
    files: Vec<DocumentFile>,
    folders: Vec<Folder>,
    current_folder: Option<Folder>,
    usage: Usage,
    organization: Organization,
    analytics: Analytics,
    chat_messages: Vec<ChatMessage>,
    api_keys: ApiKeys,
    last_id: i64,
}

impl DataStore {
    pub fn open(store: impl KeyValueStore + 'static, options: DataStoreOptions) -> Self {
        let store: Box<dyn KeyValueStore> = Box::new(store);

        let files: Vec<DocumentFile> = load_list_slot(store.as_ref(), FILES_KEY, Vec::new());
        let mut folders = load_list_slot(store.as_ref(), FOLDERS_KEY, vec![Folder::root()]);
        let usage = load_slot(store.as_ref(), USAGE_KEY, Usage::default());
        let organization = load_slot(store.as_ref(), ORGANIZATION_KEY, Organization::default());
        let analytics = load_slot(store.as_ref(), ANALYTICS_KEY, Analytics::default());
        let chat_messages: Vec<ChatMessage> =
            load_list_slot(store.as_ref(), CHAT_MESSAGES_KEY, Vec::new());
        let api_keys = load_slot(
            store.as_ref(),
            API_KEYS_KEY,
            organization.settings.api_keys.clone(),
        );

        if !folders.iter().any(Folder::is_root) {
            warn!("Stored folders had no root folder, restoring it");
            folders.insert(0, Folder::root());
        }

        debug!(
            files = files.len(),
            folders = folders.len(),
            messages = chat_messages.len(),
            "Data store opened"
        );

        Self {
            store,
            options,
            files,
            folders,
            current_folder: None,
            usage,
            organization,
            analytics,
            chat_messages,
            api_keys,
            last_id: 0,
        }
    }

    /// Millisecond timestamp id, bumped when two allocations land in the same
    /// millisecond.
    pub fn next_id(&mut self) -> String {
        let now = Utc::now().timestamp_millis();
        self.last_id = if now > self.last_id { now } else { self.last_id + 1 };
        self.last_id.to_string()
    }

    pub fn files(&self) -> &[DocumentFile] {
        &self.files
    }

    pub fn file(&self, file_id: &str) -> Option<&DocumentFile> {
        self.files.iter().find(|f| f.id == file_id)
    }

    pub fn folders(&self) -> &[Folder] {
        &self.folders
    }

    pub fn folder(&self, folder_id: &str) -> Option<&Folder> {
        self.folders.iter().find(|f| f.id == folder_id)
    }

    /// All folders except the root.
    pub fn user_folders(&self) -> Vec<&Folder> {
        self.folders.iter().filter(|f| !f.is_root()).collect()
    }

    pub fn current_folder(&self) -> Option<&Folder> {
        self.current_folder.as_ref()
    }

    pub fn usage(&self) -> &Usage {
        &self.usage
    }

    pub fn organization(&self) -> &Organization {
        &self.organization
    }

    pub fn analytics(&self) -> &Analytics {
        &self.analytics
    }

    pub fn chat_messages(&self) -> &[ChatMessage] {
        &self.chat_messages
    }

    pub fn upload_file(&mut self, file: DocumentFile) -> DocumentFile {
        let engine = file.billed_engine();
        let tokens = engine.upload_tokens();

        let record = if self.options.attach_simulated_analysis {
            attach_simulated_analysis(file)
        } else {
            file
        };
        let size = record.size;
        self.files.push(record.clone());

        self.usage.record_upload(size, tokens);

        let analytics = &mut self.analytics;
        analytics.total_files = analytics.total_files.saturating_add(1);
        analytics.total_uploads = analytics.total_uploads.saturating_add(1);
        analytics.total_storage = analytics.total_storage.saturating_add(size);
        analytics.tokens_used = analytics.tokens_used.saturating_add(tokens);
        analytics.requests_made = analytics.requests_made.saturating_add(1);
        self.analytics.ai_engine_usage.record(engine);

        self.organization.usage.record_upload(size, tokens);

        info!(file_id = %record.id, size, engine = %engine, tokens, "File uploaded");

        save_slot(self.store.as_ref(), FILES_KEY, &self.files);
        self.persist_counters();

        record
    }

    /// Removes a file and releases its storage. Unknown ids leave every
    /// aggregate untouched.
    pub fn delete_file(&mut self, file_id: &str) -> Option<DocumentFile> {
        let Some(index) = self.files.iter().position(|f| f.id == file_id) else {
            debug!(file_id, "Delete requested for unknown file");
            return None;
        };
        let removed = self.files.remove(index);
        let size = removed.size;

        self.usage.release_storage(size);

        self.analytics.total_files = self.analytics.total_files.saturating_sub(1);
        self.analytics.total_storage = self.analytics.total_storage.saturating_sub(size);

        self.organization.usage.release_storage(size);

        info!(file_id, size, "File deleted");

        save_slot(self.store.as_ref(), FILES_KEY, &self.files);
        self.persist_counters();

        Some(removed)
    }

    /// Creates a folder under `parent_id` (the root when omitted). Names are
    /// not checked for uniqueness.
    pub fn create_folder(&mut self, name: &str, parent_id: Option<&str>) -> Folder {
        let parent_id = parent_id.unwrap_or(ROOT_FOLDER_ID).to_string();

        let parent_path = match self.folder(&parent_id) {
            Some(parent) => parent.path.trim_end_matches('/').to_string(),
            None => {
                warn!(parent_id = %parent_id, "Parent folder not found, placing path at root level");
                String::new()
            }
        };
        let path = format!("{}/{}", parent_path, name);

        let id = self.next_id();
        let folder = Folder::new(id, name.to_string(), parent_id, path);
        self.folders.push(folder.clone());

        info!(folder_id = %folder.id, path = %folder.path, "Folder created");
        save_slot(self.store.as_ref(), FOLDERS_KEY, &self.folders);

        folder
    }

    /// Applies a delta to one `Usage` counter only; analytics and the
    /// organization copy are left as they are.
    pub fn update_usage(&mut self, kind: UsageKind, amount: i64) {
        self.usage.add(kind, amount);
        save_slot(self.store.as_ref(), USAGE_KEY, &self.usage);
    }

    pub fn add_chat_message(&mut self, message: ChatMessage) {
        let role = message.role;
        let engine = message.ai_engine;
        self.chat_messages.push(message);

        if role == Role::User {
            self.record_chat(engine);
            self.persist_counters();
        }

        save_slot(self.store.as_ref(), CHAT_MESSAGES_KEY, &self.chat_messages);
    }

    fn record_chat(&mut self, engine: AiEngine) {
        let tokens = engine.chat_tokens();

        self.usage.record_chat(tokens);

        let analytics = &mut self.analytics;
        analytics.total_chats = analytics.total_chats.saturating_add(1);
        analytics.tokens_used = analytics.tokens_used.saturating_add(tokens);
        analytics.requests_made = analytics.requests_made.saturating_add(1);
        self.analytics.ai_engine_usage.record(engine);

        self.organization.usage.record_chat(tokens);

        debug!(engine = %engine, tokens, "Chat usage recorded");
    }

    pub fn files_by_folder(&self, folder_id: &str) -> Vec<DocumentFile> {
        self.files
            .iter()
            .filter(|f| f.folder_id == folder_id)
            .cloned()
            .collect()
    }

    pub fn set_organization(&mut self, organization: Organization) {
        self.organization = organization;
        save_slot(self.store.as_ref(), ORGANIZATION_KEY, &self.organization);
    }

    pub fn set_current_folder(&mut self, folder: Option<Folder>) {
        self.current_folder = folder;
    }

    pub fn api_keys(&self) -> &ApiKeys {
        &self.api_keys
    }

    /// Stores provider keys in their own slot and mirrors them into the
    /// organization settings.
    pub fn save_api_keys(&mut self, keys: ApiKeys) {
        save_slot(self.store.as_ref(), API_KEYS_KEY, &keys);
        self.organization.settings.api_keys = keys.clone();
        self.api_keys = keys;
        save_slot(self.store.as_ref(), ORGANIZATION_KEY, &self.organization);
    }

    fn persist_counters(&self) {
        save_slot(self.store.as_ref(), USAGE_KEY, &self.usage);
        save_slot(self.store.as_ref(), ANALYTICS_KEY, &self.analytics);
        save_slot(self.store.as_ref(), ORGANIZATION_KEY, &self.organization);
    }
}

fn attach_simulated_analysis(mut file: DocumentFile) -> DocumentFile {
    if file.billed_engine() == AiEngine::Qwen {
        file.ocr_text = Some(format!(
            "OCR extracted text from {}. This document contains structured information \
             including dates, names, and key data points that have been processed using \
             Qwen-VL's advanced vision capabilities.",
            file.name
        ));
        file.extracted_data = Some(simulated_extraction());
        file.category = Some("Business Document".to_string());
        file.tags.push("ocr-processed".to_string());
        file.tags.push("qwen-analyzed".to_string());
    } else {
        file.category = Some("General Document".to_string());
    }
    file
}

fn simulated_extraction() -> Map<String, Value> {
    let mut data = Map::new();
    data.insert("names".to_string(), json!(["John Smith", "Sarah Johnson"]));
    data.insert("dates".to_string(), json!(["2024-01-15", "2024-02-01"]));
    data.insert("amounts".to_string(), json!(["$5,000.00", "$2,500.00"]));
    data.insert("categories".to_string(), json!(["Financial", "Business"]));
    data
}
