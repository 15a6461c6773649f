use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use docintel::chat_client::{backend_for, build_folder_context, docintel_reply, ChatMode, ChatRequest};
use docintel::config::DEFAULT_GATEWAY_URL;
use docintel::credentials::StaticCredentials;
use docintel::data_store::{DataStore, DataStoreOptions};
use docintel::logging;
use docintel::models::{AiEngine, ApiKeys, ChatMessage, DocumentFile, Role, UsageKind, ROOT_FOLDER_ID};
use docintel::providers::{Engine, ProviderEndpoints};
use docintel::storage::JsonFileStore;
use prettytable::{Cell, Row, Table};
use std::path::Path;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "docintel")]
#[command(about = "Manage DocIntel documents, folders, usage and AI chat", long_about = None)]
struct Cli {
    #[arg(long, global = true, env = "DOCINTEL_DATA_DIR", default_value = ".docintel", help = "Directory holding the local state")]
    data_dir: String,

    #[arg(long, global = true, help = "Attach simulated OCR/extraction results to uploads")]
    simulate_analysis: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Register a document")]
    Upload {
        #[arg(short, long, help = "Path to the file")]
        file: String,

        #[arg(long, help = "Target folder ID (defaults to root)")]
        folder: Option<String>,

        #[arg(short, long, help = "AI engine: qwen, openai or docintel")]
        engine: Option<AiEngine>,

        #[arg(short, long, help = "Tags (comma-separated)")]
        tags: Option<String>,
    },

    #[command(about = "Delete a document")]
    Delete {
        #[arg(short, long, help = "File ID")]
        id: String,
    },

    #[command(about = "Create a folder")]
    Mkdir {
        #[arg(short, long, help = "Folder name")]
        name: String,

        #[arg(short, long, help = "Parent folder ID (defaults to root)")]
        parent: Option<String>,
    },

    #[command(about = "List documents in a folder")]
    Ls {
        #[arg(long, default_value = ROOT_FOLDER_ID, help = "Folder ID")]
        folder: String,
    },

    #[command(about = "List folders")]
    Folders,

    #[command(about = "Show usage against plan limits")]
    Usage,

    #[command(about = "Adjust a usage counter by hand")]
    AdjustUsage {
        #[arg(short, long, help = "Counter: uploads, chats or storage")]
        kind: UsageKind,

        #[arg(short, long, allow_hyphen_values = true, help = "Signed amount to add")]
        amount: i64,
    },

    #[command(about = "Show analytics")]
    Analytics,

    #[command(about = "Ask the AI about a folder")]
    Chat {
        #[arg(short, long, help = "Your question")]
        message: String,

        #[arg(long, help = "Folder ID to use as context")]
        folder: Option<String>,

        #[arg(short, long, help = "AI engine (defaults to the organization default)")]
        engine: Option<AiEngine>,

        #[arg(long, env = "DOCINTEL_CHAT_MODE", default_value = "gateway", help = "direct or gateway")]
        mode: ChatMode,

        #[arg(long, env = "DOCINTEL_GATEWAY_URL", default_value = DEFAULT_GATEWAY_URL, help = "Gateway base URL")]
        gateway_url: String,
    },

    #[command(about = "Show chat history")]
    History,

    #[command(about = "Store an API key for an engine")]
    SetKey {
        #[arg(short, long, help = "Engine: qwen or openai")]
        engine: AiEngine,

        #[arg(short, long, help = "API key (empty to clear)")]
        key: String,
    },

    #[command(about = "Show organization settings")]
    Org,
}

#[tokio::main]
async fn main() {
    logging::init("warn");
    let cli = Cli::parse();

    if let Err(e) = run_command(cli).await {
        eprintln!("❌ Error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run_command(cli: Cli) -> Result<()> {
    let store = JsonFileStore::new(&cli.data_dir)?;
    let mut data = DataStore::open(
        store,
        DataStoreOptions {
            attach_simulated_analysis: cli.simulate_analysis,
        },
    );

    match cli.command {
        Commands::Upload {
            file,
            folder,
            engine,
            tags,
        } => upload(&mut data, file, folder, engine, tags)?,
        Commands::Delete { id } => delete(&mut data, &id)?,
        Commands::Mkdir { name, parent } => mkdir(&mut data, &name, parent.as_deref())?,
        Commands::Ls { folder } => list_files(&data, &folder)?,
        Commands::Folders => list_folders(&data),
        Commands::Usage => show_usage(&data),
        Commands::AdjustUsage { kind, amount } => {
            data.update_usage(kind, amount);
            println!("✅ Usage updated");
            show_usage(&data);
        }
        Commands::Analytics => show_analytics(&data),
        Commands::Chat {
            message,
            folder,
            engine,
            mode,
            gateway_url,
        } => chat(&mut data, message, folder, engine, mode, &gateway_url).await?,
        Commands::History => show_history(&data),
        Commands::SetKey { engine, key } => set_key(&mut data, engine, key)?,
        Commands::Org => show_org(&data),
    }

    Ok(())
}

fn mime_type_for(path: &Path) -> &'static str {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase();
    match extension.as_str() {
        "pdf" => "application/pdf",
        "txt" => "text/plain",
        "md" => "text/markdown",
        "csv" => "text/csv",
        "json" => "application/json",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "xlsx" => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        _ => "application/octet-stream",
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn format_size(bytes: u64) -> String {
    if bytes >= 1024 * 1024 {
        format!("{:.2} MB", bytes as f64 / 1024.0 / 1024.0)
    } else {
        format!("{:.2} KB", bytes as f64 / 1024.0)
    }
}

fn upload(
    data: &mut DataStore,
    file_path: String,
    folder: Option<String>,
    engine: Option<AiEngine>,
    tags: Option<String>,
) -> Result<()> {
    let path = Path::new(&file_path);
    if !path.exists() {
        bail!("File not found: {}", file_path);
    }

    let metadata = std::fs::metadata(path).context("Failed to read file metadata")?;
    if !metadata.is_file() {
        bail!("Not a regular file: {}", file_path);
    }

    let folder_id = folder.unwrap_or_else(|| ROOT_FOLDER_ID.to_string());
    if data.folder(&folder_id).is_none() {
        bail!("Folder not found with ID: {}", folder_id);
    }

    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("unknown")
        .to_string();
    let engine = engine.unwrap_or(data.organization().settings.default_ai_engine);

    let id = data.next_id();
    let mut document = DocumentFile::new(
        id,
        name,
        mime_type_for(path).to_string(),
        metadata.len(),
        folder_id,
        engine,
    );
    if let Some(tags) = tags {
        document.tags = split_list(&tags);
    }

    let stored = data.upload_file(document);

    println!("✅ File uploaded successfully!");
    println!("📄 Filename: {}", stored.name);
    println!("🆔 File ID: {}", stored.id);
    println!("📊 Size: {}", format_size(stored.size));
    println!("🤖 Engine: {}", engine);
    if let Some(category) = &stored.category {
        println!("🗂️  Category: {}", category);
    }
    if !stored.tags.is_empty() {
        println!("🏷️  Tags: {}", stored.tags.join(", "));
    }

    Ok(())
}

fn delete(data: &mut DataStore, file_id: &str) -> Result<()> {
    let removed = data
        .delete_file(file_id)
        .ok_or_else(|| anyhow!("File not found with ID: {}", file_id))?;
    println!("✅ Deleted '{}' ({})", removed.name, format_size(removed.size));
    Ok(())
}

fn mkdir(data: &mut DataStore, name: &str, parent: Option<&str>) -> Result<()> {
    if name.trim().is_empty() {
        bail!("Folder name cannot be empty");
    }
    let folder = data.create_folder(name.trim(), parent);
    println!("✅ Folder created!");
    println!("📁 Path: {}", folder.path);
    println!("🆔 Folder ID: {}", folder.id);
    Ok(())
}

fn list_files(data: &DataStore, folder_id: &str) -> Result<()> {
    let folder = data
        .folder(folder_id)
        .ok_or_else(|| anyhow!("Folder not found with ID: {}", folder_id))?;
    let files = data.files_by_folder(folder_id);

    if files.is_empty() {
        println!("📭 No files in {}", folder.path);
        println!("💡 Use 'docintel upload -f <file>' to add one");
        return Ok(());
    }

    println!("\n📚 Files in {} ({})\n", folder.path, files.len());

    let mut table = Table::new();
    table.add_row(Row::new(vec![
        Cell::new("ID"),
        Cell::new("Name"),
        Cell::new("Type"),
        Cell::new("Size"),
        Cell::new("Engine"),
        Cell::new("Uploaded"),
        Cell::new("Tags"),
    ]));
    for file in files {
        table.add_row(Row::new(vec![
            Cell::new(&file.id),
            Cell::new(&file.name),
            Cell::new(&file.mime_type),
            Cell::new(&format_size(file.size)),
            Cell::new(file.billed_engine().as_str()),
            Cell::new(&file.uploaded_at.format("%Y-%m-%d %H:%M:%S").to_string()),
            Cell::new(&file.tags.join(", ")),
        ]));
    }
    table.printstd();
    println!();

    Ok(())
}

fn list_folders(data: &DataStore) {
    let folders = data.user_folders();
    if folders.is_empty() {
        println!("📭 No folders yet.");
        println!("💡 Use 'docintel mkdir -n <name>' to create one");
        return;
    }

    let mut table = Table::new();
    table.add_row(Row::new(vec![
        Cell::new("ID"),
        Cell::new("Path"),
        Cell::new("Files"),
        Cell::new("Created"),
    ]));
    for folder in folders {
        table.add_row(Row::new(vec![
            Cell::new(&folder.id),
            Cell::new(&folder.path),
            Cell::new(&data.files_by_folder(&folder.id).len().to_string()),
            Cell::new(&folder.created_at.format("%Y-%m-%d %H:%M:%S").to_string()),
        ]));
    }
    table.printstd();
}

fn show_usage(data: &DataStore) {
    let usage = data.usage();
    let mut table = Table::new();
    table.add_row(Row::new(vec![
        Cell::new("Counter"),
        Cell::new("Used"),
        Cell::new("Limit"),
    ]));
    let rows = [
        ("Uploads", usage.uploads_used.to_string(), usage.uploads_limit.to_string()),
        ("Chats", usage.chats_used.to_string(), usage.chats_limit.to_string()),
        ("Storage", format_size(usage.storage_used), format_size(usage.storage_limit)),
        ("Tokens", usage.tokens_used.to_string(), usage.tokens_limit.to_string()),
        ("Requests", usage.requests_made.to_string(), usage.requests_limit.to_string()),
    ];
    for (label, used, limit) in rows {
        table.add_row(Row::new(vec![Cell::new(label), Cell::new(&used), Cell::new(&limit)]));
    }
    println!("\n📊 Usage ({:?})\n", usage.period);
    table.printstd();
}

fn show_analytics(data: &DataStore) {
    let analytics = data.analytics();
    println!("\n📈 Analytics\n");
    println!("   Files: {}", analytics.total_files);
    println!("   Uploads: {}", analytics.total_uploads);
    println!("   Chats: {}", analytics.total_chats);
    println!("   Storage: {}", format_size(analytics.total_storage));
    println!("   Tokens: {}", analytics.tokens_used);
    println!("   Requests: {}", analytics.requests_made);

    let tally = &analytics.ai_engine_usage;
    let shares = tally.shares();
    let mut table = Table::new();
    table.add_row(Row::new(vec![
        Cell::new("Engine"),
        Cell::new("Requests"),
        Cell::new("Share"),
    ]));
    for (engine, share) in [
        (AiEngine::Qwen, shares.qwen),
        (AiEngine::OpenAi, shares.openai),
        (AiEngine::DocIntel, shares.docintel),
    ] {
        table.add_row(Row::new(vec![
            Cell::new(engine.as_str()),
            Cell::new(&tally.count(engine).to_string()),
            Cell::new(&format!("{:.1}%", share)),
        ]));
    }
    println!();
    table.printstd();
}

async fn chat(
    data: &mut DataStore,
    message: String,
    folder_id: Option<String>,
    engine: Option<AiEngine>,
    mode: ChatMode,
    gateway_url: &str,
) -> Result<()> {
    if message.trim().is_empty() {
        bail!("Message cannot be empty");
    }

    let selected = match folder_id {
        Some(id) => Some(
            data.folder(&id)
                .cloned()
                .ok_or_else(|| anyhow!("Folder not found with ID: {}", id))?,
        ),
        None => None,
    };
    data.set_current_folder(selected);

    let folder = data.current_folder().cloned();
    let files = folder
        .as_ref()
        .map(|f| data.files_by_folder(&f.id))
        .unwrap_or_default();
    let context = folder
        .as_ref()
        .and_then(|f| build_folder_context(f, &files));
    let engine = engine.unwrap_or(data.organization().settings.default_ai_engine);

    let id = data.next_id();
    data.add_chat_message(ChatMessage::new(id, Role::User, message.clone(), engine));

    let result = match Engine::try_from(engine) {
        Err(_) => Ok(docintel_reply(folder.as_ref(), files.len())),
        Ok(provider) => {
            let credentials = Arc::new(StaticCredentials::new(data.api_keys().clone()));
            let backend = backend_for(mode, gateway_url, ProviderEndpoints::default(), credentials);
            let request = ChatRequest {
                engine: provider,
                context,
                message,
                api_key: data.api_keys().get(engine).map(str::to_string),
            };
            backend.complete(&request).await.map(|reply| reply.content)
        }
    };

    let reply = match result {
        Ok(content) => content,
        Err(e) => {
            let id = data.next_id();
            let notice = format!(
                "Sorry, I encountered an error while processing your request: {:#}",
                e
            );
            data.add_chat_message(ChatMessage::new(id, Role::Assistant, notice, engine));
            return Err(e);
        }
    };

    let id = data.next_id();
    data.add_chat_message(ChatMessage::new(id, Role::Assistant, reply.clone(), engine));

    println!("🤖 [{}] {}", engine, reply);
    Ok(())
}

fn show_history(data: &DataStore) {
    let messages = data.chat_messages();
    if messages.is_empty() {
        println!("📭 No chat history yet.");
        println!("💡 Use 'docintel chat -m <question>' to start");
        return;
    }
    for message in messages {
        let who = match message.role {
            Role::User => "👤 You",
            Role::Assistant => "🤖 AI",
        };
        println!(
            "{} [{} · {}]",
            who,
            message.ai_engine,
            message.timestamp.format("%Y-%m-%d %H:%M:%S UTC")
        );
        println!("   {}\n", message.content);
    }
}

fn set_key(data: &mut DataStore, engine: AiEngine, key: String) -> Result<()> {
    let mut keys: ApiKeys = data.api_keys().clone();
    match engine {
        AiEngine::Qwen => keys.qwen = Some(key),
        AiEngine::OpenAi => keys.openai = Some(key),
        AiEngine::DocIntel => bail!("The DocIntel engine does not use an API key"),
    }
    data.save_api_keys(keys);
    println!("✅ Settings saved successfully!");
    Ok(())
}

fn show_org(data: &DataStore) {
    let org = data.organization();
    let settings = &org.settings;
    let key_state = |engine| {
        if settings.api_keys.get(engine).is_some() {
            "configured"
        } else {
            "not set"
        }
    };
    println!("🏢 {} ({:?} plan)", org.name, org.plan);
    println!("   Default engine: {}", settings.default_ai_engine);
    println!(
        "   Enabled engines: {}",
        settings
            .enabled_ai_engines
            .iter()
            .map(|e| e.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    );
    println!("   Language: {}", settings.language);
    println!("   Retention: {} days", settings.retention_days);
    if let Some(theme) = &settings.theme {
        println!("   Theme: {}", theme);
    }
    println!("   Qwen key: {}", key_state(AiEngine::Qwen));
    println!("   OpenAI key: {}", key_state(AiEngine::OpenAi));
}
