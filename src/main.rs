use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use sql_agent::db::SqliteDatabase;
use sql_agent::llm::OpenAiClient;
use sql_agent::schema_rag::{
    EmbeddingProvider, HashingEmbedder, InMemoryVectorStore, OpenAiEmbedder, PineconeStore, VectorStore,
};
use sql_agent::{ingest, AgentConfig, ExtractionPolicy, Services, SqlAgent};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "sql-agent")]
#[command(about = "Answer questions about a SQL database in natural language")]
struct Cli {
    /// Database URL (or set DATABASE_URL)
    #[arg(long, global = true)]
    database_url: Option<String>,

    /// Object index directory (or set OBJECT_INDEX_DIR)
    #[arg(long, global = true)]
    object_index_dir: Option<PathBuf>,

    /// Primary generation model (or set OPENAI_MODEL)
    #[arg(long, global = true)]
    model: Option<String>,

    /// Model used when the primary run fails (or set OPENAI_FALLBACK_MODEL)
    #[arg(long, global = true)]
    fallback_model: Option<String>,

    /// Table extraction policy: all_or_nothing or best_effort
    #[arg(long, global = true)]
    extraction_policy: Option<ExtractionPolicy>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Build or reload the object index and the row indexes
    Ingest,
    /// Answer a question
    Ask {
        question: String,

        /// Print the whole run (tables, context, SQL, result) as JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let mut config = AgentConfig::from_env()?;
    if let Some(url) = cli.database_url {
        config.database_url = url;
    }
    if let Some(dir) = cli.object_index_dir {
        config.object_index_dir = dir;
    }
    if let Some(model) = cli.model {
        config.model = model;
    }
    if let Some(model) = cli.fallback_model {
        config.fallback_model = model;
    }
    if let Some(policy) = cli.extraction_policy {
        config.extraction_policy = policy;
    }

    let (services, local_store) = connect(&config)?;

    match cli.command {
        Command::Ingest => {
            let indexes = ingest(&services, &config).await?;
            save_rows(local_store.as_ref())?;
            println!(
                "Indexed {} tables ({} row indexes)",
                indexes.object_index.len(),
                indexes.row_indexes.len()
            );
        }
        Command::Ask { question, json } => {
            let agent = SqlAgent::open(&services, &config).await?;
            save_rows(local_store.as_ref())?;
            let context = agent.answer_with_context(&question).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&context)?);
            } else {
                println!("{}", context.answer);
            }
        }
    }

    Ok(())
}

/// Local row store and the file it is saved to.
struct LocalRows {
    store: Arc<InMemoryVectorStore>,
    path: PathBuf,
}

/// Wire up the services. The local row store is returned separately so it can
/// be saved after indexing.
fn connect(config: &AgentConfig) -> Result<(Services, Option<LocalRows>)> {
    let timeout = Duration::from_secs(config.request_timeout_secs);
    let db = SqliteDatabase::open(&config.database_url, &config.ignore_tables)
        .with_context(|| format!("Failed to open database {}", config.database_url))?;

    if config.is_offline() {
        warn!("OPENAI_API_KEY is not set; generation calls will fail and embeddings use the local hashing model");
    }
    let llm = OpenAiClient::new(
        config.api_key.clone(),
        config.model.clone(),
        config.base_url.clone(),
        timeout,
    )?;
    let embedder: Arc<dyn EmbeddingProvider> = if config.is_offline() {
        Arc::new(HashingEmbedder::default())
    } else {
        Arc::new(OpenAiEmbedder::new(
            config.api_key.clone(),
            config.base_url.clone(),
            config.embedding_model.clone(),
            timeout,
        )?)
    };

    let mut local_store = None;
    let store: Arc<dyn VectorStore> = match &config.pinecone {
        Some(pinecone) => {
            info!("Using Pinecone index at {}", pinecone.host);
            Arc::new(PineconeStore::new(pinecone.api_key.clone(), pinecone.host.clone(), timeout)?)
        }
        None => {
            let path = rows_file(&config.row_index_path, embedder.model_name());
            let store = Arc::new(
                InMemoryVectorStore::load_or_default(&path)
                    .with_context(|| format!("Failed to load row index {}", path.display()))?,
            );
            local_store = Some(LocalRows {
                store: Arc::clone(&store),
                path,
            });
            store
        }
    };

    Ok((Services::new(Arc::new(db), Arc::new(llm), embedder, store), local_store))
}

/// `row_index.json` becomes `row_index.<embedding model>.json`; vectors from
/// different embedders never share a file.
fn rows_file(path: &Path, embedding_model: &str) -> PathBuf {
    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("row_index");
    let name = match path.extension().and_then(|e| e.to_str()) {
        Some(ext) => format!("{}.{}.{}", stem, embedding_model, ext),
        None => format!("{}.{}", stem, embedding_model),
    };
    path.with_file_name(name)
}

fn save_rows(local: Option<&LocalRows>) -> Result<()> {
    if let Some(local) = local {
        local.store.save(&local.path)?;
    }
    Ok(())
}
