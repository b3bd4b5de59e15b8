use anyhow::{bail, Context};
use chrono::Utc;
use clap::{Parser, Subcommand};
use pdf_chat_core::{
    slugify, AdminToken, CharacterNgramEmbedder, ChatConfig, ConversationSession, DataLayout,
    DocumentRegistry, Embedder, IndexingOptions, JsonFileRegistryStore, LanguageModel,
    OpenAiChatModel, OpenAiEmbedder, SessionOptions,
};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const DEFAULT_CONFIG_FILE: &str = "pdf-chat.toml";
const DEFAULT_ADMIN_SECRET: &str = "admin";

#[derive(Parser)]
#[command(name = "pdf-chat", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// TOML config file. Falls back to ./pdf-chat.toml when present.
    #[arg(long, env = "PDF_CHAT_CONFIG")]
    config: Option<PathBuf>,

    /// Overrides `data_dir` from the config file.
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Admin secret used for document management.
    #[arg(long, env = "PDF_CHAT_ADMIN_SECRET", hide_env_values = true)]
    admin_secret: Option<String>,

    /// API key for the embedding and chat endpoints.
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Embed with the local character-trigram model instead of the remote endpoint.
    #[arg(long, default_value_t = false)]
    local_embeddings: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Store a PDF under a new document id.
    Register {
        /// Path to the PDF file.
        #[arg(long)]
        file: PathBuf,
        /// Document name; defaults to the file name.
        #[arg(long)]
        name: Option<String>,
        #[arg(long, default_value = "")]
        description: String,
        /// Build the index right after registering.
        #[arg(long, default_value_t = false)]
        process: bool,
    },
    /// Extract, chunk and embed a registered document.
    Process {
        id: String,
    },
    /// Remove a document together with its index.
    Delete {
        id: String,
    },
    /// Show registered documents and their status.
    List,
    /// Make a document the default for `ask` and `chat`.
    Activate {
        id: String,
    },
    /// Replace the admin secret.
    ChangePassword {
        #[arg(long)]
        new_secret: String,
    },
    /// Ask one or more questions in a single conversation.
    Ask {
        /// Document id; defaults to the active document.
        #[arg(long)]
        id: Option<String>,
        #[arg(long = "question", required = true)]
        questions: Vec<String>,
    },
    /// Interactive conversation. `/new` starts over, `/quit` exits.
    Chat {
        #[arg(long)]
        id: Option<String>,
    },
}

fn load_config(cli: &Cli) -> anyhow::Result<ChatConfig> {
    let mut config = match &cli.config {
        Some(path) => ChatConfig::load(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
            ChatConfig::load(Path::new(DEFAULT_CONFIG_FILE))?
        }
        None => ChatConfig::default(),
    };

    if let Some(data_dir) = &cli.data_dir {
        config.data_dir = data_dir.clone();
    }
    config.validate()?;
    Ok(config)
}

fn admin_secret(cli: &Cli) -> String {
    match &cli.admin_secret {
        Some(secret) if !secret.is_empty() => secret.clone(),
        _ => {
            warn!("no admin secret supplied; falling back to the default secret");
            DEFAULT_ADMIN_SECRET.to_string()
        }
    }
}

fn build_embedder(cli: &Cli, config: &ChatConfig) -> anyhow::Result<Arc<dyn Embedder>> {
    if cli.local_embeddings {
        return Ok(Arc::new(CharacterNgramEmbedder::default()));
    }
    Ok(Arc::new(OpenAiEmbedder::new(
        &config.provider,
        cli.api_key.clone(),
    )?))
}

async fn open_registry(config: &ChatConfig, secret: &str) -> anyhow::Result<DocumentRegistry> {
    let layout = DataLayout::new(&config.data_dir);
    let store = Box::new(JsonFileRegistryStore::for_layout(&layout));
    let registry =
        DocumentRegistry::open(layout, store, IndexingOptions::from(config), secret).await?;
    Ok(registry)
}

async fn admin(registry: &DocumentRegistry, secret: &str) -> anyhow::Result<AdminToken> {
    registry
        .authenticate(secret)
        .await
        .context("admin secret was not accepted")
}

async fn resolve_document(registry: &DocumentRegistry, id: Option<String>) -> anyhow::Result<String> {
    if let Some(id) = id {
        return Ok(id);
    }
    match registry.active_document().await {
        Some(record) => Ok(record.id),
        None => bail!("no document is registered; use `pdf-chat register` first"),
    }
}

async fn open_session(
    cli: &Cli,
    config: &ChatConfig,
    registry: &DocumentRegistry,
    id: Option<String>,
) -> anyhow::Result<ConversationSession> {
    let document_id = resolve_document(registry, id).await?;
    let index = registry.load_index(&document_id).await?;

    let embedder = build_embedder(cli, config)?;
    let model: Arc<dyn LanguageModel> =
        Arc::new(OpenAiChatModel::new(&config.provider, cli.api_key.clone())?);
    let session = ConversationSession::new(embedder, model, SessionOptions::from(config));
    session.bind(document_id, index)?;
    Ok(session)
}

async fn chat_loop(session: &ConversationSession) -> anyhow::Result<()> {
    if let Some(id) = session.document_id().await {
        println!("chatting with {id}; /new starts over, /quit exits");
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        match line.trim() {
            "" => continue,
            "/quit" | "/exit" => break,
            "/new" => {
                session.reset()?;
                println!("started a new conversation");
            }
            question => match session.ask(question).await {
                Ok(answer) => println!("{answer}"),
                Err(error) if error.is_retryable() => {
                    println!("error: {error} (you can ask again)")
                }
                Err(error) => println!("error: {error}"),
            },
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let app_version = env!("CARGO_PKG_VERSION");

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;
    let secret = admin_secret(&cli);
    let registry = open_registry(&config, &secret).await?;

    info!(
        version = app_version,
        started_at = %Utc::now().to_rfc3339(),
        data_dir = %config.data_dir.display(),
        "pdf-chat boot"
    );

    match &cli.command {
        Command::Register {
            file,
            name,
            description,
            process,
        } => {
            let token = admin(&registry, &secret).await?;
            let name = match name {
                Some(name) => name.clone(),
                None => file
                    .file_name()
                    .and_then(|name| name.to_str())
                    .map(str::to_string)
                    .context("file name is not valid UTF-8; pass --name")?,
            };
            let id = slugify(&name);
            let bytes = tokio::fs::read(file)
                .await
                .with_context(|| format!("failed to read {}", file.display()))?;

            let record = registry.register(&token, &id, description, &bytes).await?;
            println!("registered {} ({})", record.id, record.status);

            if *process {
                let embedder = build_embedder(&cli, &config)?;
                let record = registry.build_index(&token, &id, embedder.as_ref()).await?;
                println!(
                    "processed {} into {} chunks",
                    record.id,
                    record.chunk_count.unwrap_or_default()
                );
            }
        }
        Command::Process { id } => {
            let token = admin(&registry, &secret).await?;
            let embedder = build_embedder(&cli, &config)?;
            let record = registry.build_index(&token, id, embedder.as_ref()).await?;
            println!(
                "processed {} into {} chunks",
                record.id,
                record.chunk_count.unwrap_or_default()
            );
        }
        Command::Delete { id } => {
            let token = admin(&registry, &secret).await?;
            registry.delete(&token, id).await?;
            match registry.active_document().await {
                Some(active) => println!("deleted {id}; active document is now {}", active.id),
                None => println!("deleted {id}; no documents left"),
            }
        }
        Command::List => {
            let documents = registry.list().await;
            if documents.is_empty() {
                println!("no documents registered");
            }
            let active = registry.active_document().await.map(|record| record.id);
            for (id, record) in documents {
                let marker = if active.as_deref() == Some(id.as_str()) { "*" } else { " " };
                println!(
                    "{marker} {id} [{}] chunks={} registered={} {}",
                    record.status,
                    record
                        .chunk_count
                        .map(|count| count.to_string())
                        .unwrap_or_else(|| "-".to_string()),
                    record.registered_at.to_rfc3339(),
                    record.description
                );
            }
        }
        Command::Activate { id } => {
            registry.set_active(id).await?;
            println!("active document is now {id}");
        }
        Command::ChangePassword { new_secret } => {
            let token = admin(&registry, &secret).await?;
            registry.change_credential(&token, new_secret).await?;
            println!("admin secret changed");
        }
        Command::Ask { id, questions } => {
            let session = open_session(&cli, &config, &registry, id.clone()).await?;
            for question in questions {
                println!("Q: {question}");
                let answer = session.ask(question).await?;
                println!("A: {answer}\n");
            }
        }
        Command::Chat { id } => {
            let session = open_session(&cli, &config, &registry, id.clone()).await?;
            chat_loop(&session).await?;
        }
    }

    Ok(())
}
