mod config;
mod context;
mod github;
mod index;
mod llm;
mod pipeline;
mod pr;
mod report;
mod store;

use clap::{Parser, Subcommand};
use colored::Colorize;
use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{debug, info, info_span, Instrument};
use tracing_subscriber::EnvFilter;

use config::Config;
use context::ContextRetriever;
use github::GitHubClient;
use index::chunk::ChunkOptions;
use index::{OpenAiEmbedder, SqliteIndex};
use llm::{GenerativeClient, OpenAiChatClient};
use pipeline::{Pipeline, Services};
use report::{ReportRecord, ReportRenderer};
use store::{PrStore, SqliteStore};

/// PR Reporter: ingests a repository's code and open pull requests, then
/// writes an LLM-written markdown report per PR.
#[derive(Parser, Debug)]
#[command(name = "pr-reporter", version, about)]
struct Cli {
    /// Config file (defaults to .pr-reporter.toml in the current directory)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Runs an interactive menu when omitted
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
enum Command {
    /// Create database tables
    InitDb,
    /// Index the repository's source files for semantic search
    IngestCode {
        /// Branch to walk instead of github.branch
        #[arg(long)]
        branch: Option<String>,
    },
    /// Fetch open pull requests and store them
    IngestPrs {
        /// Cap on PRs fetched instead of github.max_prs
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Run the report pipeline over every stored PR
    Report,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    info!("loading configuration");
    let config = Config::load(cli.config.as_deref())?;
    debug!(repo = %config.github.repo, db = %config.database.url, "configuration loaded");

    match cli.command {
        Some(command) => execute(&config, command).await,
        None => interactive(&config).await,
    }
}

async fn interactive(config: &Config) -> Result<(), Box<dyn Error>> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    loop {
        println!();
        println!("{}", "PR Reporter".bold());
        println!("  0) Initialize database");
        println!("  1) Ingest codebase");
        println!("  2) Ingest pull requests");
        println!("  3) Generate reports");
        println!("  4) Exit");
        stdout.write_all(b"Select an option: ").await?;
        stdout.flush().await?;

        let Some(line) = lines.next_line().await? else {
            return Ok(());
        };
        let command = match line.trim() {
            "0" => Command::InitDb,
            "1" => Command::IngestCode { branch: None },
            "2" => Command::IngestPrs { limit: None },
            "3" => Command::Report,
            "4" => return Ok(()),
            other => {
                println!("{} {:?}", "Invalid choice:".yellow(), other);
                continue;
            }
        };

        // A failed command returns to the menu.
        if let Err(e) = execute(config, command).await {
            println!("{} {}", "Error:".red().bold(), e);
        }
    }
}

async fn execute(config: &Config, command: Command) -> Result<(), Box<dyn Error>> {
    let span = info_span!("command", command = ?command);
    async move {
        let store = open_store(config).await?;
        match command {
            Command::InitDb => {
                println!("{}", "Database schema ready.".green());
            }
            Command::IngestCode { branch } => {
                let branch = branch.unwrap_or_else(|| config.github.branch.clone());
                let host = github_client(config)?;
                let code_index = semantic_index(config, &store)?;
                let summary = index::ingest_codebase(&host, &code_index, &config.github.repo, &branch).await?;
                println!(
                    "{} {} files, {} chunks indexed from {}@{}",
                    "Done:".green().bold(),
                    summary.files_indexed,
                    summary.chunks_written,
                    config.github.repo,
                    branch
                );
                if !summary.files_skipped.is_empty() {
                    println!("{} {}", "Skipped:".yellow(), summary.files_skipped.join(", "));
                }
            }
            Command::IngestPrs { limit } => {
                let host = github_client(config)?;
                let limit = limit.unwrap_or(config.github.max_prs);
                let summary = pr::ingest_prs(&host, &store, &config.github.repo, limit).await?;
                println!(
                    "{} {} PRs from {} ({} new, {} updated)",
                    "Done:".green().bold(),
                    summary.total(),
                    summary.repo,
                    summary.inserted.len(),
                    summary.updated.len()
                );
            }
            Command::Report => run_reports(config, store).await?,
        }
        Ok(())
    }
    .instrument(span)
    .await
}

async fn run_reports(config: &Config, store: SqliteStore) -> Result<(), Box<dyn Error>> {
    let index = semantic_index(config, &store)?;
    let chat = OpenAiChatClient::new(&config.llm.endpoint, config.openai_api_key()?)?;
    let generator = GenerativeClient::new(
        Arc::new(chat),
        config.retry_policy(),
        &config.llm.model,
        config.llm.temperature,
    );
    let services = Services {
        store: Arc::new(store.clone()),
        retriever: ContextRetriever::new(Arc::new(index), config.index.top_k),
        generator,
        renderer: ReportRenderer::new(&config.output.reports_dir),
    };

    let mut pipeline = Pipeline::standard(services, &config.pipeline);
    info!(stages = ?pipeline.stage_names(), "running report pipeline");
    let state = pipeline.run().await?;
    debug!(status = ?pipeline.status(), "pipeline finished");

    let reports = state.reports.unwrap_or_default();
    for artifact in &reports {
        if let Some(saved) = store.get_report(&ReportRecord::id_for(artifact.pr_id)).await? {
            println!("  PR #{} -> {}", artifact.pr_number, saved.file_path);
        }
    }
    let on_record = store.list_reports().await?.len();
    println!(
        "{} {} report(s) generated, {} on record",
        "Done:".green().bold(),
        reports.len(),
        on_record
    );
    Ok(())
}

async fn open_store(config: &Config) -> Result<SqliteStore, Box<dyn Error>> {
    let pool = store::sqlite::connect(&config.database.url).await?;
    let store = SqliteStore::new(pool);
    store.init_schema().await?;
    Ok(store)
}

fn github_client(config: &Config) -> Result<GitHubClient, Box<dyn Error>> {
    Ok(GitHubClient::new(&config.github.api_url, Some(config.github_token()?))?)
}

fn semantic_index(config: &Config, store: &SqliteStore) -> Result<SqliteIndex, Box<dyn Error>> {
    let embedder = OpenAiEmbedder::new(
        &config.index.embeddings_url,
        &config.index.embedding_model,
        config.openai_api_key()?,
        config.index.max_retries,
    )?;
    let chunking = ChunkOptions {
        lines: config.index.chunk_lines,
        overlap: config.index.chunk_overlap,
        max_chars: config.index.max_chunk_chars,
    };
    Ok(SqliteIndex::new(
        store.pool().clone(),
        Arc::new(embedder),
        chunking,
        config.index.batch_size,
    ))
}
