//! # Atelier RAG core CLI
//!
//! Local front end to the retrieval pipeline: ingest a change feed, run RAG
//! queries, semantic search and suggestions, inspect the store.
//!
//! Usage:
//!   atelier ingest feed.jsonl             # Embed and upsert documents
//!   atelier query "workshop pacing"       # Build a context window
//!   atelier query "pacing" --prompt "Summarise the feedback."
//!   atelier similar question q1           # Documents like a stored one
//!   atelier search "pacing" --query-type multilingual
//!   atelier suggest work                  # Suggestions from prior queries
//!   atelier stats | health | models | reindex

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use atelier_analytics::{QueryLog, create_query_log};
use atelier_core::AtelierConfig;
use atelier_core::models;
use atelier_core::types::{DocumentType, SearchFilters, SimilarityMetric};
use atelier_embeddings::{EmbeddingGenerator, create_provider};
use atelier_rag::{
    DocumentIndexer, PromptFormat, PromptOptions, RagEngine, RagOptions, RagResult,
    generate_augmented_prompt, parse_jsonl,
};
use atelier_search::{QueryType, SemanticSearch, SemanticSearchOptions};
use atelier_vectorstore::{UpsertOptions, VectorStore, create_store};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "atelier",
    version,
    about = "🧵 Atelier: retrieval-augmented context for workshops and questionnaires"
)]
struct Cli {
    /// Config file (default: ~/.atelier/config.toml)
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Ingest this JSONL feed before running the command (useful with the memory backend)
    #[arg(long, global = true)]
    seed: Option<String>,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Embed and upsert documents from a JSONL change feed
    Ingest {
        file: String,
        #[arg(long)]
        batch_size: Option<usize>,
        /// Replace existing rows instead of updating them in place
        #[arg(long)]
        replace: bool,
    },
    /// Build a RAG context window for a query
    Query {
        text: String,
        #[command(flatten)]
        retrieval: RetrievalArgs,
        #[arg(long)]
        max_tokens: Option<usize>,
        #[arg(long)]
        max_documents: Option<usize>,
        /// head, tail, middle or smart
        #[arg(long)]
        truncation: Option<String>,
        /// Render an augmented prompt around this base prompt
        #[arg(long)]
        prompt: Option<String>,
        /// bullets, structured or paragraph
        #[arg(long)]
        format: Option<String>,
        /// Annotate prompt documents with similarity and metadata
        #[arg(long)]
        annotate: bool,
        /// Record the query and its context window in analytics
        #[arg(long)]
        track: bool,
    },
    /// Find documents similar to a stored one
    Similar {
        document_type: String,
        document_id: String,
        #[command(flatten)]
        retrieval: RetrievalArgs,
    },
    /// Semantic search with facets
    Search {
        text: String,
        /// semantic, filtered or multilingual
        #[arg(long, default_value = "semantic")]
        query_type: String,
        #[command(flatten)]
        retrieval: RetrievalArgs,
    },
    /// Suggest queries from prior searches
    Suggest {
        partial: String,
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Store statistics
    Stats,
    /// Check provider and store connectivity
    Health,
    /// List registered embedding models
    Models,
    /// Re-evaluate the vector index for the current row count
    Reindex {
        #[arg(long, default_value = "cosine")]
        metric: String,
    },
}

#[derive(Args)]
struct RetrievalArgs {
    #[arg(long)]
    limit: Option<usize>,
    #[arg(long)]
    threshold: Option<f32>,
    /// cosine, l2 or inner_product
    #[arg(long, default_value = "cosine")]
    metric: String,
    /// Restrict to a document type (repeatable)
    #[arg(long = "type")]
    types: Vec<String>,
    /// Restrict to a language (repeatable)
    #[arg(long = "language")]
    languages: Vec<String>,
    #[arg(long)]
    model: Option<String>,
}

impl RetrievalArgs {
    fn filters(&self) -> Result<SearchFilters> {
        Ok(SearchFilters {
            document_types: self
                .types
                .iter()
                .map(|t| t.parse::<DocumentType>())
                .collect::<atelier_core::Result<Vec<_>>>()?,
            languages: self.languages.clone(),
            ..Default::default()
        })
    }

    fn rag_options(&self, config: &AtelierConfig) -> Result<RagOptions> {
        let mut options = RagOptions::from_config(&config.rag)?;
        if let Some(limit) = self.limit {
            options.limit = limit;
        }
        if self.threshold.is_some() {
            options.threshold = self.threshold;
        }
        options.metric = self.metric.parse::<SimilarityMetric>()?;
        options.filters = self.filters()?;
        options.model = self.model.clone();
        Ok(options)
    }
}

fn expand_path(p: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(p).as_ref())
}

/// Explicitly wired services, built once per process.
struct App {
    config: AtelierConfig,
    generator: Arc<EmbeddingGenerator>,
    store: Arc<dyn VectorStore>,
    analytics: Option<Arc<dyn QueryLog>>,
}

impl App {
    async fn build(config: AtelierConfig) -> Result<Self> {
        let provider = create_provider(&config.embedding).context("creating embedding provider")?;
        let generator = Arc::new(EmbeddingGenerator::new(
            Arc::from(provider),
            config.embedding.clone(),
        ));
        let store = create_store(&config.store).await.context("opening vector store")?;
        let analytics = create_query_log(&config.analytics).context("opening analytics")?;
        tracing::debug!(
            "🧵 provider={} store={} analytics={}",
            generator.provider_name(),
            store.name(),
            analytics.as_ref().map(|a| a.name()).unwrap_or("off")
        );
        Ok(Self {
            config,
            generator,
            store,
            analytics,
        })
    }

    fn indexer(&self, batch_size: Option<usize>, replace: bool) -> DocumentIndexer {
        let upsert = UpsertOptions {
            batch_size: batch_size.unwrap_or(self.config.store.batch_size),
            skip_existing: !replace,
            retry: self.config.store.retry_policy(),
            on_progress: None,
        };
        DocumentIndexer::new(self.generator.clone(), self.store.clone()).with_upsert_options(upsert)
    }

    fn rag(&self) -> RagEngine {
        RagEngine::new(self.generator.clone(), self.store.clone()).with_analytics(self.analytics.clone())
    }

    fn search(&self) -> SemanticSearch {
        SemanticSearch::new(
            self.generator.clone(),
            self.store.clone(),
            self.config.search.clone(),
        )
        .with_analytics(self.analytics.clone())
    }

    async fn ingest(&self, file: &str, batch_size: Option<usize>, replace: bool) -> Result<()> {
        let path = expand_path(file);
        let input = std::fs::read_to_string(&path)
            .with_context(|| format!("reading {}", path.display()))?;
        let changes = parse_jsonl(&input)?;
        let summary = self.indexer(batch_size, replace).index(&changes).await?;
        println!(
            "📚 Indexed {}/{} documents ({} cached, {} skipped, {} batches)",
            summary.written, summary.received, summary.cached, summary.skipped_empty, summary.batches
        );
        Ok(())
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_rag(result: &RagResult) {
    println!(
        "🔎 {} candidates (avg similarity {:.3}), {} in context, {} tokens{}",
        result.total_results,
        result.average_similarity,
        result.context_window.count,
        result.context_window.size,
        if result.context_window.truncated { " (truncated)" } else { "" }
    );
    for (i, doc) in result.context_documents.iter().enumerate() {
        println!(
            "  {}. [{}] sim={:.3} rel={:.3} {}{}",
            i + 1,
            doc.document.reference(),
            doc.similarity,
            doc.relevance,
            doc.document.content.chars().take(80).collect::<String>(),
            if doc.truncated { " ✂️" } else { "" }
        );
    }
    println!(
        "⏱️  embed {:?}, search {:?}, total {:?}",
        result.performance.embedding_time, result.performance.search_time, result.performance.total_time
    );
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "atelier=debug" } else { "atelier=info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_target(false)
        .init();

    let config = match &cli.config {
        Some(path) => AtelierConfig::load_from(&expand_path(path))?,
        None => AtelierConfig::load()?,
    };
    let app = App::build(config).await?;

    if let Some(seed) = &cli.seed {
        app.ingest(seed, None, false).await?;
    }

    match cli.command {
        Command::Ingest {
            file,
            batch_size,
            replace,
        } => app.ingest(&file, batch_size, replace).await?,

        Command::Query {
            text,
            retrieval,
            max_tokens,
            max_documents,
            truncation,
            prompt,
            format,
            annotate,
            track,
        } => {
            let mut options = retrieval.rag_options(&app.config)?;
            if let Some(max) = max_tokens {
                options.max_tokens = max;
            }
            if let Some(max) = max_documents {
                options.max_documents = max;
            }
            if let Some(strategy) = truncation {
                options.truncation = strategy.parse()?;
            }
            options.track_analytics = track;
            options.store_context_window = track;

            let result = app.rag().query(&text, &options).await?;
            match prompt {
                Some(base) => {
                    let format = format.as_deref().unwrap_or(&app.config.rag.prompt_format);
                    let prompt_options = PromptOptions {
                        format: format.parse::<PromptFormat>()?,
                        include_metadata: annotate,
                    };
                    println!("{}", generate_augmented_prompt(&base, &result, &prompt_options));
                }
                None if cli.json => print_json(&result)?,
                None => print_rag(&result),
            }
        }

        Command::Similar {
            document_type,
            document_id,
            retrieval,
        } => {
            let options = retrieval.rag_options(&app.config)?;
            let result = app
                .rag()
                .find_similar_documents(document_type.parse()?, &document_id, &options)
                .await?;
            if cli.json {
                print_json(&result)?;
            } else {
                print_rag(&result);
            }
        }

        Command::Search {
            text,
            query_type,
            retrieval,
        } => {
            let query_type = match query_type.trim().to_ascii_lowercase().as_str() {
                "semantic" => QueryType::Semantic,
                "filtered" => QueryType::Filtered,
                "multilingual" => QueryType::Multilingual,
                other => anyhow::bail!("unknown query type '{other}'"),
            };
            let options = SemanticSearchOptions {
                query_type,
                limit: retrieval.limit.unwrap_or(10),
                threshold: retrieval.threshold,
                metric: retrieval.metric.parse()?,
                filters: retrieval.filters()?,
                model: retrieval.model.clone(),
                ..Default::default()
            };
            let response = app.search().search(&text, &options).await?;
            if cli.json {
                print_json(&response)?;
            } else {
                println!(
                    "🔍 {} of {} candidates (query language: {})",
                    response.results.len(),
                    response.total_candidates,
                    response.query_language
                );
                for item in &response.results {
                    println!(
                        "  [{}] score={:.3} sim={:.3} {}",
                        item.document.reference(),
                        item.score,
                        item.similarity,
                        item.document.content.chars().take(80).collect::<String>()
                    );
                }
                if let Some(facets) = &response.facets {
                    println!("📊 types: {:?}", facets.by_type);
                    println!("   languages: {:?}", facets.by_language);
                    println!("   months: {:?}", facets.by_month);
                }
            }
        }

        Command::Suggest { partial, limit } => {
            let suggestions = app.search().get_search_suggestions(&partial, limit).await?;
            if cli.json {
                print_json(&suggestions)?;
            } else if suggestions.is_empty() {
                println!("💡 No suggestions");
            } else {
                for s in suggestions {
                    println!("💡 {s}");
                }
            }
        }

        Command::Stats => {
            let stats = app.store.statistics().await?;
            if cli.json {
                print_json(&stats)?;
            } else {
                println!("📊 {} embeddings in {}", stats.total_embeddings, app.store.name());
                println!("   by type: {:?}", stats.by_type);
                println!("   by language: {:?}", stats.by_language);
                println!("   by model: {:?}", stats.by_model);
                println!("   average dimension: {:.1}", stats.average_dimension);
                println!("   index: {}", app.store.current_index_strategy());
                if let Some(stats) = app.generator.cache_stats() {
                    println!(
                        "💾 cache: {}/{} entries, hit rate {:.1}%",
                        stats.entries,
                        stats.capacity,
                        stats.hit_rate() * 100.0
                    );
                }
            }
        }

        Command::Health => {
            let provider = app.generator.health_check().await;
            let store = app.store.health_check().await;
            let mark = |ok: bool| if ok { "✅" } else { "❌" };
            println!("{} embedding provider ({})", mark(provider), app.generator.provider_name());
            println!("{} vector store ({})", mark(store), app.store.name());
            if !(provider && store) {
                std::process::exit(1);
            }
        }

        Command::Models => {
            for model in models::all_models() {
                println!(
                    "🧠 {:<28} {:<8} {:>5} dims  ${}/1k tokens",
                    model.name, model.provider, model.dimensions, model.cost_per_1k_tokens
                );
            }
        }

        Command::Reindex { metric } => {
            let strategy = app
                .store
                .ensure_index(&app.config.store.index, metric.parse()?)
                .await?;
            println!("🗂️ Index strategy: {strategy}");
        }
    }

    Ok(())
}
