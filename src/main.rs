use std::io::{BufRead, IsTerminal, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Args, CommandFactory, Parser, Subcommand};
use futures_util::StreamExt;
use miette::{Context, IntoDiagnostic, Result};
use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

use strata_core::{Document, Embedder, OutputFormat, Passage, RetrievalMode, StrataConfig};
use strata_index::{Index, IndexOrigin, IndexSettings, OpenOptions};
use strata_retrieve::QueryEngine;

#[derive(Parser)]
#[command(
    name = "strata",
    version,
    about = "Hierarchical auto-merging retrieval for grounded LLM answers",
    long_about = "Strata indexes a text corpus as a tree of chunks, retrieves the smallest\n\
                   matching pieces and merges them back into their parents when enough\n\
                   siblings match, so the model sees whole passages instead of fragments.\n\n\
                   Examples:\n  \
                     strata init                                 Create a .strata.toml config file\n  \
                     strata index docs/                          Build the index under merge_index/\n  \
                     strata query 'When was xAI founded?'        Answer from the stored index\n  \
                     strata query 'grok' --no-generate           Show the retrieved passages only\n  \
                     strata batch crag.jsonl -o preds.jsonl      Answer every record of a JSONL file\n  \
                     strata inspect                              Show how the index was built"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Path to configuration file (default: .strata.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Output format
    #[arg(
        long,
        global = true,
        default_value = "text",
        long_help = "Output format for command results.\n\n\
                       Formats:\n  \
                         text  Human-readable summaries (default)\n  \
                         json  Machine-readable JSON with camelCase keys"
    )]
    format: OutputFormat,

    /// Enable debug logging (RUST_LOG overrides)
    #[arg(long, short, global = true)]
    verbose: bool,
}

/// Flags that shape the index.
#[derive(Args, Debug, Clone, Default)]
struct IndexArgs {
    /// Retrieval mode: hierarchical, window or flat
    #[arg(long)]
    mode: Option<RetrievalMode>,

    /// Tier sizes, largest first (e.g. 2048,512,128)
    #[arg(long, value_delimiter = ',')]
    chunk_sizes: Option<Vec<usize>>,

    /// Index directory (default: merge_index)
    #[arg(long)]
    storage: Option<PathBuf>,

    /// Rebuild even if the index directory already exists
    #[arg(long)]
    rebuild: bool,
}

/// Flags that shape a query.
#[derive(Args, Debug, Clone, Default)]
struct QueryArgs {
    /// Leaves fetched from the vector index (default: 12)
    #[arg(long)]
    similarity_top_k: Option<usize>,

    /// Passages kept after reranking (default: 2)
    #[arg(long)]
    rerank_top_n: Option<usize>,

    /// Per-call deadline in seconds for embedding, rerank and generation
    #[arg(long)]
    timeout: Option<u64>,

    /// Only retrieve; do not call the language model
    #[arg(long)]
    no_generate: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Create a default .strata.toml configuration file
    #[command(long_about = "Create a default .strata.toml configuration file.\n\n\
        Generates a commented-out template with all available options.\n\
        Fails if .strata.toml already exists.")]
    Init,
    /// Chunk, embed and persist a corpus
    #[command(long_about = "Chunk, embed and persist a corpus.\n\n\
        Reads UTF-8 text files (directories are walked for .txt, .md and .rst files,\n\
        respecting .gitignore). If the index directory already exists it is loaded\n\
        instead, unless --rebuild is given or the corpus changed and\n\
        index.verify_fingerprint is enabled.\n\n\
        Examples:\n  strata index docs/\n  strata index a.txt b.txt --mode window --storage sentence_index\n  \
        strata index docs/ --chunk-sizes 1024,256,64 --rebuild")]
    Index {
        /// Files or directories to index
        #[arg(required = true)]
        inputs: Vec<PathBuf>,

        #[command(flatten)]
        index: IndexArgs,
    },
    /// Retrieve passages for a question and answer it
    #[command(long_about = "Retrieve passages for a question and answer it.\n\n\
        Uses the index in the storage directory; with --input the index is built\n\
        first when missing. Generation needs an LLM endpoint; --no-generate prints\n\
        the retrieved passages instead.\n\n\
        Examples:\n  strata query 'When did Musk establish xAI?'\n  \
        strata query 'grok' --input docs/ --no-generate\n  \
        strata query 'grok' --stream --timeout 30")]
    Query {
        /// The question
        query: String,

        /// Files or directories to build the index from if it does not exist
        #[arg(long)]
        input: Vec<PathBuf>,

        /// Print the answer as it is generated
        #[arg(long)]
        stream: bool,

        #[command(flatten)]
        index: IndexArgs,

        #[command(flatten)]
        query_args: QueryArgs,
    },
    /// Answer every record of a JSONL evaluation file
    #[command(long_about = "Answer every record of a JSONL evaluation file.\n\n\
        Each input line is {\"query\", \"answer\"?, \"search_results\": [{\"page_result\"}]}.\n\
        Record n gets its own index under <storage>/<n>.index built from its search\n\
        results. Each output line is {\"query\", \"answer\", \"pred\"}.\n\n\
        Examples:\n  strata batch crag_200.jsonl -o crag_200_result.jsonl\n  \
        strata batch crag_200.jsonl --limit 5 --no-generate")]
    Batch {
        /// JSONL file to read
        input: PathBuf,

        /// Where to write results (default: stdout)
        #[arg(long, short)]
        output: Option<PathBuf>,

        /// Only process the first N records
        #[arg(long)]
        limit: Option<usize>,

        #[command(flatten)]
        index: IndexArgs,

        #[command(flatten)]
        query_args: QueryArgs,
    },
    /// Show how a persisted index was built
    Inspect {
        /// Index directory (default: merge_index)
        #[arg(long)]
        storage: Option<PathBuf>,
    },
    /// Generate shell completion scripts
    #[command(hide = true)]
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

/// Id of the single document the input files are joined into.
const CORPUS_ID: &str = "corpus";

const DEFAULT_CONFIG: &str = r#"# Strata Configuration

[chunking]
# Tier sizes for hierarchical mode, largest first
# chunk_sizes = [2048, 512, 128]
# unit = "chars"            # or "tokens"
# Flat mode
# chunk_size = 1024
# chunk_overlap = 20
# Window mode: sentences kept on each side of a match
# window_size = 3

[retrieval]
# mode = "hierarchical"     # hierarchical | window | flat
# similarity_top_k = 12
# merge_ratio = 0.5
# merge_aggregate = "max"   # max | mean
# timeout_secs = 60

[rerank]
# provider = "lexical"      # lexical | cohere | jina | http | none
# model = "bge-reranker-base"
# base_url = "http://localhost:8080"
# top_n = 2
# on_error = "fail"         # fail | pass-through

[embedding]
# provider = "openai"       # openai | hashing
# model = "text-embedding-3-small"
# base_url = "https://api.openai.com/v1"
# dimensions = 1536
# batch_size = 64

[llm]
# provider = "openai"       # openai | ollama | vllm | compatible
# model = "gpt-4o-mini"
# base_url = "http://localhost:11434"
# context_window = 8192
# max_output_tokens = 256
# temperature = 0.1

[index]
# storage_dir = "merge_index"
# verify_fingerprint = false
"#;

/// One line of a batch input file.
#[derive(Debug, Deserialize)]
struct BatchRecord {
    query: String,
    #[serde(default)]
    answer: Option<String>,
    #[serde(default)]
    search_results: Vec<SearchResult>,
}

#[derive(Debug, Deserialize)]
struct SearchResult {
    #[serde(default)]
    page_result: String,
}

/// One line of a batch output file.
#[derive(Debug, Serialize)]
struct BatchResult {
    query: String,
    answer: Option<String>,
    pred: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct IndexReport<'a> {
    storage: String,
    origin: &'static str,
    manifest: &'a strata_index::Manifest,
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn load_config(path: Option<&Path>) -> Result<StrataConfig> {
    match path {
        Some(path) => Ok(StrataConfig::from_file(path)
            .wrap_err_with(|| format!("reading {}", path.display()))?),
        None => {
            let default_path = Path::new(".strata.toml");
            if default_path.exists() {
                Ok(StrataConfig::from_file(default_path)?)
            } else {
                Ok(StrataConfig::default())
            }
        }
    }
}

/// Fold command-line flags over the file configuration.
fn apply_overrides(config: &mut StrataConfig, index: &IndexArgs, query: &QueryArgs) {
    if let Some(mode) = index.mode {
        config.retrieval.mode = mode;
    }
    if let Some(sizes) = &index.chunk_sizes {
        config.chunking.chunk_sizes = sizes.clone();
    }
    if let Some(storage) = &index.storage {
        config.index.storage_dir = storage.clone();
    }
    if let Some(k) = query.similarity_top_k {
        config.retrieval.similarity_top_k = k;
    }
    if let Some(n) = query.rerank_top_n {
        config.rerank.top_n = n;
    }
    if let Some(secs) = query.timeout {
        config.retrieval.timeout_secs = Some(secs);
    }
}

fn progress_bar() -> Option<indicatif::ProgressBar> {
    if !std::io::stderr().is_terminal() {
        return None;
    }
    let pb = indicatif::ProgressBar::new(0);
    if let Ok(style) = indicatif::ProgressStyle::with_template(
        "{spinner:.cyan} embedding [{bar:30.cyan/blue}] {pos}/{len} leaves ({elapsed})",
    ) {
        pb.set_style(style.progress_chars("=> "));
    }
    Some(pb)
}

async fn open_index(
    config: &StrataConfig,
    dir: &Path,
    docs: &[Document],
    embedder: &dyn Embedder,
    rebuild: bool,
) -> Result<(Index, IndexOrigin)> {
    let pb = progress_bar();
    let result = Index::open_or_build(
        dir,
        docs,
        &IndexSettings::from_config(config),
        embedder,
        OpenOptions {
            rebuild,
            verify_fingerprint: config.index.verify_fingerprint,
        },
        |done, total| {
            if let Some(pb) = &pb {
                pb.set_length(total as u64);
                pb.set_position(done as u64);
            }
        },
    )
    .await;
    if let Some(pb) = pb {
        pb.finish_and_clear();
    }
    Ok(result?)
}

fn origin_label(origin: IndexOrigin) -> &'static str {
    match origin {
        IndexOrigin::Built => "built",
        IndexOrigin::Loaded => "loaded",
        IndexOrigin::Rebuilt => "rebuilt",
    }
}

fn build_engine(
    index: &Index,
    config: &StrataConfig,
    embedder: Arc<dyn Embedder>,
    generate: bool,
) -> Result<QueryEngine> {
    let scorer = strata_models::scorer_from_config(&config.rerank)?;
    let generator = if generate {
        Some(strata_models::generator_from_config(&config.llm)?)
    } else {
        None
    };
    Ok(QueryEngine::from_config(index, config, embedder, scorer, generator)?)
}

fn truncate_for_display(text: &str, max_chars: usize) -> String {
    let flat: String = text.split_whitespace().collect::<Vec<_>>().join(" ");
    match flat.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &flat[..idx]),
        None => flat,
    }
}

fn print_passages(passages: &[Passage]) {
    for (i, p) in passages.iter().enumerate() {
        let merged = if p.merged_from.is_empty() {
            String::new()
        } else {
            format!(", merged {}", p.merged_from.len())
        };
        let rerank = p
            .rerank_score
            .map(|s| format!(", rerank {s:.3}"))
            .unwrap_or_default();
        println!(
            "[{}] {} (tier {}, score {:.3}{rerank}{merged}) bytes {}..{}",
            i + 1,
            p.source_id,
            p.tier,
            p.score,
            p.span.start,
            p.span.end
        );
        println!("    {}", truncate_for_display(&p.text, 240));
    }
}

async fn run_batch(
    config: &StrataConfig,
    input: &Path,
    output: Option<&Path>,
    limit: Option<usize>,
    rebuild: bool,
    generate: bool,
) -> Result<()> {
    let file = std::fs::File::open(input)
        .into_diagnostic()
        .wrap_err_with(|| format!("opening {}", input.display()))?;
    let embedder = strata_models::embedder_from_config(&config.embedding)?;

    let mut out: Box<dyn Write> = match output {
        Some(path) => Box::new(std::io::BufWriter::new(
            std::fs::File::create(path)
                .into_diagnostic()
                .wrap_err_with(|| format!("creating {}", path.display()))?,
        )),
        None => Box::new(std::io::stdout().lock()),
    };

    let lines = std::io::BufReader::new(file).lines();
    let mut processed = 0usize;
    for (n, line) in lines.enumerate() {
        if limit.is_some_and(|l| processed >= l) {
            break;
        }
        let line = line.into_diagnostic()?;
        if line.trim().is_empty() {
            continue;
        }
        let record: BatchRecord = serde_json::from_str(&line)
            .into_diagnostic()
            .wrap_err_with(|| format!("parsing record {n} of {}", input.display()))?;

        let answered = answer_record(config, &record, n, embedder.clone(), rebuild, generate).await;
        let result = match answered {
            Ok(pred) => BatchResult {
                query: record.query,
                answer: record.answer,
                pred,
                error: None,
            },
            Err(e) => {
                tracing::warn!(record = n, error = %e, "record failed");
                BatchResult {
                    query: record.query,
                    answer: record.answer,
                    pred: String::new(),
                    error: Some(e.to_string()),
                }
            }
        };
        serde_json::to_writer(&mut out, &result).into_diagnostic()?;
        writeln!(out).into_diagnostic()?;
        processed += 1;
    }
    out.flush().into_diagnostic()?;
    eprintln!("Processed {processed} records");
    Ok(())
}

async fn answer_record(
    config: &StrataConfig,
    record: &BatchRecord,
    n: usize,
    embedder: Arc<dyn Embedder>,
    rebuild: bool,
    generate: bool,
) -> Result<String> {
    let pages: Vec<Document> = record
        .search_results
        .iter()
        .enumerate()
        .filter(|(_, r)| !r.page_result.trim().is_empty())
        .map(|(j, r)| Document::new(format!("result-{j}"), r.page_result.clone()))
        .collect();
    if pages.is_empty() {
        miette::bail!("record {n} has no non-empty search results");
    }
    let docs = vec![Document::concat(format!("record-{n}"), &pages)];

    let dir = config.index.storage_dir.join(format!("{n}.index"));
    let (index, _) = open_index(config, &dir, &docs, embedder.as_ref(), rebuild).await?;
    let engine = build_engine(&index, config, embedder, generate)?;

    if generate {
        Ok(engine.query(&record.query).await?.answer)
    } else {
        let passages = engine.retrieve(&record.query).await?;
        Ok(passages.into_iter().next().map(|p| p.text).unwrap_or_default())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    miette::set_hook(Box::new(|_| {
        Box::new(
            miette::MietteHandlerOpts::new()
                .terminal_links(true)
                .build(),
        )
    }))
    .into_diagnostic()?;
    human_panic::setup_panic!();

    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let mut config = load_config(cli.config.as_deref())?;

    match cli.command {
        Command::Init => {
            let path = Path::new(".strata.toml");
            if path.exists() {
                miette::bail!(".strata.toml already exists");
            }
            std::fs::write(path, DEFAULT_CONFIG).into_diagnostic()?;
            println!("Created .strata.toml with default configuration");
        }
        Command::Index { inputs, index } => {
            apply_overrides(&mut config, &index, &QueryArgs::default());
            config.validate()?;

            let files = strata_index::load_documents(&inputs)?;
            let docs = vec![Document::concat(CORPUS_ID, &files)];
            let embedder = strata_models::embedder_from_config(&config.embedding)?;
            let dir = config.index.storage_dir.clone();
            let (built, origin) =
                open_index(&config, &dir, &docs, embedder.as_ref(), index.rebuild).await?;

            match cli.format {
                OutputFormat::Json => {
                    let report = IndexReport {
                        storage: dir.display().to_string(),
                        origin: origin_label(origin),
                        manifest: built.manifest(),
                    };
                    println!("{}", serde_json::to_string_pretty(&report).into_diagnostic()?);
                }
                OutputFormat::Text => {
                    let m = built.manifest();
                    println!(
                        "Index {} at {}: {} files, {} nodes, {} leaves ({} mode, {})",
                        origin_label(origin),
                        dir.display(),
                        files.len(),
                        m.node_count,
                        m.leaf_count,
                        m.mode,
                        m.embedding_model
                    );
                }
            }
        }
        Command::Query {
            query,
            input,
            stream,
            index,
            query_args,
        } => {
            if stream && cli.format == OutputFormat::Json {
                miette::bail!("--stream cannot be combined with --format json");
            }
            if input.is_empty()
                && (index.rebuild || index.mode.is_some() || index.chunk_sizes.is_some())
            {
                return Err(miette::miette!(
                    help = "Pass --input <paths> to build the index with these settings, \
                            or use `strata index <paths> --rebuild`",
                    "--rebuild, --mode and --chunk-sizes need --input"
                ));
            }
            apply_overrides(&mut config, &index, &query_args);
            config.validate()?;

            let embedder = strata_models::embedder_from_config(&config.embedding)?;
            let dir = config.index.storage_dir.clone();
            let loaded = if input.is_empty() {
                if !dir.exists() {
                    return Err(miette::miette!(
                        help = "Build it with `strata index <paths>` or pass --input <paths>",
                        "No index found at {}",
                        dir.display()
                    ));
                }
                Index::load(&dir)?
            } else {
                let files = strata_index::load_documents(&input)?;
                let docs = vec![Document::concat(CORPUS_ID, &files)];
                open_index(&config, &dir, &docs, embedder.as_ref(), index.rebuild)
                    .await?
                    .0
            };

            let generate = !query_args.no_generate;
            let engine = build_engine(&loaded, &config, embedder, generate)?;

            if !generate {
                let passages = engine.retrieve(&query).await?;
                match cli.format {
                    OutputFormat::Json => {
                        println!("{}", serde_json::to_string_pretty(&passages).into_diagnostic()?);
                    }
                    OutputFormat::Text => print_passages(&passages),
                }
            } else if stream && cli.format == OutputFormat::Text {
                let mut streaming = engine.stream_query(&query).await?;
                let mut stdout = std::io::stdout().lock();
                while let Some(fragment) = streaming.stream.next().await {
                    write!(stdout, "{}", fragment?).into_diagnostic()?;
                    stdout.flush().into_diagnostic()?;
                }
                writeln!(stdout).into_diagnostic()?;
                drop(stdout);
                println!("\nSources:");
                print_passages(&streaming.passages);
            } else {
                let answer = engine.query(&query).await?;
                match cli.format {
                    OutputFormat::Json => {
                        println!("{}", serde_json::to_string_pretty(&answer).into_diagnostic()?);
                    }
                    OutputFormat::Text => {
                        println!("{}\n\nSources:", answer.answer.trim());
                        print_passages(&answer.passages);
                    }
                }
            }
        }
        Command::Batch {
            input,
            output,
            limit,
            index,
            query_args,
        } => {
            apply_overrides(&mut config, &index, &query_args);
            config.validate()?;
            run_batch(
                &config,
                &input,
                output.as_deref(),
                limit,
                index.rebuild,
                !query_args.no_generate,
            )
            .await?;
        }
        Command::Inspect { storage } => {
            let dir = storage.unwrap_or_else(|| config.index.storage_dir.clone());
            let loaded = Index::load(&dir)?;
            let tiers = loaded.store().tier_counts();
            match cli.format {
                OutputFormat::Json => {
                    let value = serde_json::json!({
                        "storage": dir.display().to_string(),
                        "manifest": loaded.manifest(),
                        "tiers": tiers,
                    });
                    println!("{}", serde_json::to_string_pretty(&value).into_diagnostic()?);
                }
                OutputFormat::Text => {
                    let m = loaded.manifest();
                    println!("Index:      {}", dir.display());
                    println!("Mode:       {}", m.mode);
                    match m.mode {
                        RetrievalMode::Hierarchical => {
                            println!("Tiers:      {:?} ({:?})", m.chunk_sizes, m.unit)
                        }
                        RetrievalMode::Window => println!("Window:     {} sentences", m.window_size),
                        RetrievalMode::Flat => {
                            println!("Chunks:     {} (overlap {})", m.chunk_size, m.chunk_overlap)
                        }
                    }
                    println!("Embedding:  {} ({} dims)", m.embedding_model, m.dimensions);
                    println!("Built:      {}", m.built_at.to_rfc3339());
                    println!("Corpus:     {}", m.fingerprint);
                    println!("Nodes:      {} ({} leaves)", m.node_count, m.leaf_count);
                    for (tier, count) in &tiers {
                        println!("  tier {tier}: {count} nodes");
                    }
                }
            }
        }
        Command::Completions { shell } => {
            let mut cmd = Cli::command();
            clap_complete::generate(shell, &mut cmd, "strata", &mut std::io::stdout());
        }
    }

    Ok(())
}
