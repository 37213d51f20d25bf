use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::*;
use std::io::{self, IsTerminal, Write};
use std::path::{Path, PathBuf};
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tracing_subscriber::EnvFilter;

use medrag_core::{ChunkingConfig, GenerationService, VectorIndex};
use medrag_rag::{IngestionPipeline, RagChain};

mod settings;

use settings::RagSettings;

#[derive(Parser)]
#[command(name = "medrag")]
#[command(about = "Question answering grounded in a private medical corpus", long_about = None)]
struct Cli {
    /// Collection to ingest into or query (overrides MEDRAG_COLLECTION)
    #[arg(short, long, global = true)]
    collection: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Chunk, embed and index every document under a directory
    Ingest {
        /// Corpus directory
        #[arg(short, long, default_value = "Data")]
        data: PathBuf,

        #[arg(long)]
        chunk_size: Option<usize>,

        #[arg(long)]
        chunk_overlap: Option<usize>,
    },
    /// Answer one question and exit
    Ask {
        question: String,

        /// Print the sources the answer was grounded on
        #[arg(long)]
        sources: bool,
    },
    /// Interactive question loop
    Chat,
    /// Show whether the collection exists and how large it is
    Check,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    let mut settings = RagSettings::from_env().context("invalid configuration")?;
    if let Some(collection) = cli.collection {
        settings.collection = collection;
    }

    match cli.command {
        Commands::Ingest {
            data,
            chunk_size,
            chunk_overlap,
        } => {
            settings.chunking = ChunkingConfig::new(
                chunk_size.unwrap_or(settings.chunking.chunk_size),
                chunk_overlap.unwrap_or(settings.chunking.chunk_overlap),
            )?;
            ingest(&settings, &data).await
        }
        Commands::Ask { question, sources } => ask(&settings, &question, sources).await,
        Commands::Chat => chat(&settings).await,
        Commands::Check => check(&settings).await,
    }
}

async fn ingest(settings: &RagSettings, data: &Path) -> Result<()> {
    let pipeline = IngestionPipeline::new(
        settings.build_embedder()?,
        settings.build_index().await?,
        settings.ingestion_config(),
    )?;

    println!("{} Ingesting {} ...", "📚".blue(), data.display());
    let report = pipeline
        .ingest_directory(data, &settings.collection)
        .await
        .with_context(|| format!("ingestion of {} failed", data.display()))?;

    println!(
        "{} Wrote {} chunks from {} documents to '{}'",
        "✅".green(),
        report.chunks_written,
        report.documents,
        report.collection
    );
    Ok(())
}

async fn build_chain(settings: &RagSettings) -> Result<RagChain> {
    let generator = settings.build_generator().await?;
    let generation = settings.generation_config(generator.model_id());

    let chain = RagChain::new(
        settings.build_embedder()?,
        settings.build_index().await?,
        generator,
        settings.collection.clone(),
    )
    .with_retrieval(settings.retrieval)?
    .with_generation_config(generation);

    chain.verify_collection().await.with_context(|| {
        format!(
            "collection '{}' cannot be queried with the configured embedder",
            settings.collection
        )
    })?;

    Ok(chain)
}

async fn ask(settings: &RagSettings, question: &str, show_sources: bool) -> Result<()> {
    let chain = build_chain(settings).await?;

    if !show_sources {
        println!("{}", chain.answer(question).await);
        return Ok(());
    }

    match chain.run(question).await {
        Ok(answer) => {
            println!("{}", answer.text);
            for source in &answer.sources {
                println!("  {} {}", "•".cyan(), source);
            }
        }
        Err(failure) => {
            tracing::error!(state = %failure.state, kind = failure.error.kind(), error = %failure.error, "question failed");
            println!("{}", chain.fallback_message());
        }
    }
    Ok(())
}

async fn chat(settings: &RagSettings) -> Result<()> {
    let chain = build_chain(settings).await?;
    display_banner(chain.collection());

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let Some(input) = read_question(&mut lines).await? else {
            break;
        };

        if input.is_empty() {
            continue;
        }

        let input_lower = input.to_lowercase();

        if input_lower == "exit" || input_lower == "quit" {
            println!("{}", "👋 Goodbye!".green());
            break;
        }

        if input_lower == "help" {
            print_help();
            continue;
        }

        println!("{} Thinking...", "🤖".blue());
        let answer = chain.answer(&input).await;
        println!("{} {}", "→".green(), answer);
    }

    Ok(())
}

async fn check(settings: &RagSettings) -> Result<()> {
    let index = settings.build_index().await?;

    match index.collection_info(&settings.collection).await? {
        Some(info) => println!(
            "{} Collection '{}': {} entries, dimension {}, metric {}, model {}",
            "✅".green(),
            info.name,
            info.entries,
            info.dimension,
            info.metric,
            info.embedding_model.as_deref().unwrap_or("unknown")
        ),
        None => anyhow::bail!(
            "collection '{}' does not exist, run `medrag ingest` first",
            settings.collection
        ),
    }
    Ok(())
}

/// Read one line; `None` at end of input
async fn read_question(lines: &mut Lines<BufReader<Stdin>>) -> Result<Option<String>> {
    if io::stdin().is_terminal() {
        print!("{} ", "medrag>".green().bold());
        io::stdout().flush()?;
    }

    Ok(lines
        .next_line()
        .await?
        .map(|line| line.trim().to_string()))
}

fn display_banner(collection: &str) {
    println!();
    println!("{}", "MedRAG".blue().bold());
    println!("Answers are grounded in collection '{}'.", collection.cyan());
    println!("Type {} for commands, {} to leave.", "help".green(), "exit".green());
    println!();
}

fn print_help() {
    println!("{}", "Available commands:".bold());
    println!("  {} - Ask anything about the indexed corpus", "question".green());
    println!("  {} - Show this help message", "help".green());
    println!("  {} - Exit the application", "exit/quit".green());
    println!();
    println!("{}", "Examples:".bold());
    println!("  What is diabetes?");
    println!("  How is a fracture treated?");
}
