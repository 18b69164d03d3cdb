use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};
use sift_core::tokenizer::{normalize_phrase, query_terms};
use sift_core::{
    BuildStrategy, Collation, Collection, CollectionConfig, DeterminationMode, DocId,
    DocumentWeighting, FocusType, IndexType, Query, RetrievalType, SearchParameter, TermWeighting,
    TextDocument,
};
use tracing_subscriber::{fmt, EnvFilter};
use walkdir::WalkDir;

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize)]
struct InputDoc {
    id: String,
    #[serde(default)]
    title: String,
    body: String,
    /// `/`-separated category path
    #[serde(default)]
    category: Option<String>,
}

#[derive(Parser)]
#[command(name = "sift-indexer")]
#[command(about = "Build and query sift collections", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Strategy {
    InMemory,
    Blocked,
}

#[derive(Subcommand)]
enum Commands {
    /// Build a collection from input JSON/JSONL files or a directory
    Build {
        /// Input path (file or directory)
        #[arg(long)]
        input: String,
        /// Output collection directory
        #[arg(long)]
        output: String,
        #[arg(long, value_enum, default_value_t = Strategy::InMemory)]
        strategy: Strategy,
        /// Documents per block for the token and phrase passes
        #[arg(long, default_value_t = 1000)]
        doc_limit: usize,
        /// Dictionary words per block for the n-gram passes
        #[arg(long, default_value_t = 10_000)]
        word_limit: usize,
        /// Build blocks in parallel
        #[arg(long, default_value_t = false)]
        parallel: bool,
        /// binary | case-insensitive
        #[arg(long, default_value = "binary")]
        collation: Collation,
        #[arg(long, default_value_t = 10)]
        representatives: usize,
    },
    /// Run one query against a built collection
    Query {
        #[arg(long)]
        index: String,
        /// Free text; tokenized like the documents
        #[arg(long, default_value = "")]
        text: String,
        /// Phrase that must occur, may be repeated
        #[arg(long)]
        phrase: Vec<String>,
        /// `key=value` attribute, may be repeated
        #[arg(long)]
        attribute: Vec<String>,
        /// boolean | positional | ranked
        #[arg(long, default_value = "boolean")]
        retrieval: RetrievalType,
        /// inverted-index | incidence-matrix
        #[arg(long, default_value = "inverted-index")]
        index_type: IndexType,
        /// plain | category
        #[arg(long, default_value = "plain")]
        focus: FocusType,
        /// exact-match | representative
        #[arg(long, default_value = "exact-match")]
        determination: DeterminationMode,
        /// natural | logarithmic | boolean
        #[arg(long, default_value = "logarithmic")]
        term_weighting: TermWeighting,
        /// no | idf | prob-idf
        #[arg(long, default_value = "idf")]
        document_weighting: DocumentWeighting,
        /// Skip length normalization of ranked scores
        #[arg(long, default_value_t = false)]
        no_normalize: bool,
        #[arg(long, default_value_t = 10)]
        k: usize,
    },
    /// Complete a word prefix from the collection dictionary
    Complete {
        #[arg(long)]
        index: String,
        #[arg(long)]
        prefix: String,
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
    /// Suggest dictionary words spelled like the given word
    Suggest {
        #[arg(long)]
        index: String,
        #[arg(long)]
        word: String,
        #[arg(long, default_value_t = 5)]
        limit: usize,
    },
}

#[derive(Serialize)]
struct Hit<'a> {
    doc_id: DocId,
    name: &'a str,
    score: f32,
}

fn main() -> Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Build {
            input,
            output,
            strategy,
            doc_limit,
            word_limit,
            parallel,
            collation,
            representatives,
        } => {
            let build_strategy = match strategy {
                Strategy::InMemory => BuildStrategy::InMemory,
                Strategy::Blocked => BuildStrategy::Blocked { doc_limit, word_limit },
            };
            let config = CollectionConfig {
                build_strategy,
                collation,
                representative_count: representatives,
                parallel,
            };
            build_collection(Path::new(&input), Path::new(&output), config)
        }
        Commands::Query {
            index,
            text,
            phrase,
            attribute,
            retrieval,
            index_type,
            focus,
            determination,
            term_weighting,
            document_weighting,
            no_normalize,
            k,
        } => {
            let collection = Collection::load(Path::new(&index))
                .with_context(|| format!("loading collection from {index}"))?;
            let mut query = Query::new(query_terms(&text));
            query.phrases = phrase.iter().map(|p| normalize_phrase(p)).collect();
            for raw in &attribute {
                let Some((key, value)) = raw.split_once('=') else {
                    bail!("attribute {raw:?} is not key=value");
                };
                query = query.with_attribute(key.trim(), normalize_phrase(value));
            }
            let parameter = SearchParameter {
                retrieval_type: retrieval,
                index_type,
                focus_type: focus,
                term_weighting,
                document_weighting,
                normalize: !no_normalize,
                result_count: k,
                determination_mode: determination,
                attribute_filter: None,
            };
            let result = collection.search_collection(&query, &parameter)?;
            tracing::info!(hits = result.len(), "query finished");
            for item in result.iter() {
                let name = collection
                    .documents()
                    .get(item.doc_id)
                    .map(|d| d.name.as_str())
                    .unwrap_or("");
                let hit = Hit {
                    doc_id: item.doc_id,
                    name,
                    score: item.score,
                };
                println!("{}", serde_json::to_string(&hit)?);
            }
            Ok(())
        }
        Commands::Complete { index, prefix, limit } => {
            let collection = Collection::load(Path::new(&index))?;
            let prefix = query_terms(&prefix).pop().unwrap_or_default();
            for (word, df) in collection.autocomplete(&prefix, limit) {
                println!("{word}\t{df}");
            }
            Ok(())
        }
        Commands::Suggest { index, word, limit } => {
            let collection = Collection::load(Path::new(&index))?;
            for (word, similarity) in collection.suggest(&word.to_lowercase(), limit) {
                println!("{word}\t{similarity:.3}");
            }
            Ok(())
        }
    }
}

fn build_collection(input: &Path, output: &Path, config: CollectionConfig) -> Result<()> {
    let mut files: Vec<PathBuf> = Vec::new();
    if input.is_dir() {
        for entry in WalkDir::new(input).sort_by_file_name().into_iter().filter_map(|e| e.ok()) {
            let p = entry.path();
            if p.is_file() {
                if let Some(ext) = p.extension().and_then(|s| s.to_str()) {
                    if matches!(ext, "json" | "jsonl") {
                        files.push(p.to_path_buf());
                    }
                }
            }
        }
    } else if input.is_file() {
        files.push(input.to_path_buf());
    } else {
        bail!("input {} does not exist", input.display());
    }

    let mut docs: Vec<TextDocument> = Vec::new();
    for file in &files {
        let parsed = if file.extension().and_then(|s| s.to_str()) == Some("jsonl") {
            read_jsonl(file)
        } else {
            read_json(file)
        };
        let parsed = parsed.with_context(|| format!("reading {}", file.display()))?;
        for doc in parsed {
            let doc_id = docs.len() as DocId;
            docs.push(to_text_document(doc_id, doc));
        }
    }
    tracing::info!(files = files.len(), num_docs = docs.len(), "ingested documents");

    let collection = Collection::construct(config, &docs, output)?;
    tracing::info!(
        output = %output.display(),
        terms = collection.token_dictionary().len(),
        phrases = collection.phrase_dictionary().len(),
        "collection build complete"
    );
    Ok(())
}

fn to_text_document(doc_id: DocId, doc: InputDoc) -> TextDocument {
    let text = if doc.title.is_empty() {
        doc.body
    } else {
        format!("{}\n{}", doc.title, doc.body)
    };
    let document = TextDocument::new(doc_id, doc.id, text);
    match doc.category {
        Some(path) => document.with_category(&path),
        None => document,
    }
}

fn read_jsonl(file: &Path) -> Result<Vec<InputDoc>> {
    let reader = BufReader::new(File::open(file)?);
    let mut docs = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        docs.push(serde_json::from_str(&line)?);
    }
    Ok(docs)
}

fn read_json(file: &Path) -> Result<Vec<InputDoc>> {
    let reader = BufReader::new(File::open(file)?);
    let json: serde_json::Value = serde_json::from_reader(reader)?;
    match json {
        serde_json::Value::Array(arr) => arr
            .into_iter()
            .map(|v| serde_json::from_value(v).map_err(Into::into))
            .collect(),
        serde_json::Value::Object(_) => Ok(vec![serde_json::from_value(json)?]),
        _ => Ok(Vec::new()),
    }
}
