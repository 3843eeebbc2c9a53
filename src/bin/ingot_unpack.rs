//! ingot-unpack: flatten nested JSON into relational row files
//!
//! Usage:
//!   # Read from file, output to stdout
//!   ingot-unpack data.json
//!
//!   # Read from stdin, output to stdout
//!   echo '{"id": 1, "posts": [{"id": 10}]}' | ingot-unpack
//!
//!   # Process NDJSON, write one .jsonl per table
//!   ingot-unpack --ndjson events.jsonl --output-dir ./tables
//!
//!   # Also save the inferred schema for reuse (and manual editing)
//!   ingot-unpack data.json --output-dir ./tables --schema-file schema.yml

// Use MiMalloc allocator for better performance (recommended by simd-json)
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use anyhow::{Context, Result};
use clap::Parser;
use ingot::normalize::{NormalizeConfig, Normalizer, StreamWriter, TableWriter};
use ingot::schema::Schema;
use serde_json::Value;
use std::fs::File;
use std::io::{BufReader, Read};

#[derive(Parser, Debug)]
#[command(name = "ingot-unpack")]
#[command(about = "Flatten nested JSON into relational row files", long_about = None)]
struct Args {
    /// Input file (use stdin if omitted)
    #[arg(value_name = "FILE")]
    input: Option<String>,

    /// Process newline-delimited JSON (one JSON object per line)
    #[arg(long)]
    ndjson: bool,

    /// Root table name for extracted documents
    #[arg(long, default_value = "doc")]
    table: String,

    /// Output directory for separate .jsonl files per table
    /// If omitted, writes to stdout as a single stream with a _table field
    #[arg(long, short = 'o')]
    output_dir: Option<String>,

    /// Write the inferred schema as YAML to this file
    #[arg(long)]
    schema_file: Option<String>,

    /// Skip documents that fail to normalize instead of aborting
    #[arg(long)]
    permissive: bool,

    /// Maximum table nesting depth (default: 10)
    #[arg(long)]
    max_depth: Option<usize>,

    /// Separator for generated child table names (default: "__")
    #[arg(long)]
    table_separator: Option<String>,

    /// Separator for flattened column names (default: "__")
    #[arg(long)]
    column_separator: Option<String>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    // Build config
    let mut config = NormalizeConfig::default();
    if let Some(depth) = args.max_depth {
        config.max_depth = depth;
    }
    if let Some(sep) = args.table_separator {
        config.table_separator = sep;
    }
    if let Some(sep) = args.column_separator {
        config.column_separator = sep;
    }
    let identity = config.identity.clone();
    let normalizer = Normalizer::new(config);

    let documents = read_documents(args.input.as_deref(), args.ndjson)?;

    let mut schema = Schema::new(&args.table);
    let mut table_writer = match &args.output_dir {
        Some(dir) => Some(TableWriter::new(dir)?),
        None => None,
    };
    let mut stream_writer = if table_writer.is_some() {
        None
    } else {
        Some(StreamWriter::new(std::io::stdout().lock()))
    };

    let mut skipped = 0usize;
    for (index, doc) in documents.into_iter().enumerate() {
        let normalized = match normalizer.normalize(doc, &args.table) {
            Ok(normalized) => normalized,
            Err(err) if args.permissive => {
                eprintln!("⚠ Skipping document {index}: {err}");
                skipped += 1;
                continue;
            }
            Err(err) => return Err(err).context(format!("document {index}")),
        };

        schema = match schema.evolved(&normalized.observations, &identity) {
            Ok(evolved) => evolved,
            Err(err) if args.permissive => {
                eprintln!("⚠ Skipping document {index}: {err}");
                skipped += 1;
                continue;
            }
            Err(err) => return Err(err).context(format!("document {index}")),
        };

        for (table, rows) in normalized.tables {
            let materialized = rows.iter().map(|row| row.materialize(&identity, None));
            if let Some(writer) = table_writer.as_mut() {
                writer.write_rows(&table, materialized)?;
            } else if let Some(writer) = stream_writer.as_mut() {
                for row in materialized {
                    writer.write_row(&table, row)?;
                }
            }
        }
    }

    if let Some(writer) = table_writer.as_mut() {
        writer.flush()?;
    }
    if let Some(writer) = stream_writer.as_mut() {
        writer.flush()?;
    }

    if let Some(path) = &args.schema_file {
        let yaml = schema.as_yaml(true).context("Failed to serialize schema")?;
        std::fs::write(path, yaml).with_context(|| format!("Failed to write {path}"))?;
    }

    if skipped > 0 {
        eprintln!("⚠ {skipped} document(s) skipped");
    }

    Ok(())
}

/// Read documents using SIMD-accelerated parsing when possible, with a
/// serde_json fallback for NDJSON or malformed input.
fn read_documents(input: Option<&str>, ndjson: bool) -> Result<Vec<Value>> {
    let mut content = Vec::new();
    let mut reader: Box<dyn Read> = match input {
        Some(path) => Box::new(BufReader::new(
            File::open(path).with_context(|| format!("Failed to open {path}"))?,
        )),
        None => Box::new(std::io::stdin()),
    };
    reader.read_to_end(&mut content)?;

    if !ndjson {
        // Try SIMD parsing first (faster) - use OwnedValue to avoid borrow issues
        if let Ok(parsed) = simd_json::to_owned_value(&mut content.clone()) {
            let json_str = simd_json::to_string(&parsed)?;
            let value: Value = serde_json::from_str(&json_str)?;
            return Ok(match value {
                Value::Array(elements) => elements,
                other => vec![other],
            });
        }
    }

    // NDJSON path, one document per line
    let text = String::from_utf8_lossy(&content);
    let mut documents = Vec::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let value: Value = serde_json::from_str(line).context("Failed to parse JSON")?;
        documents.push(value);
    }
    Ok(documents)
}
