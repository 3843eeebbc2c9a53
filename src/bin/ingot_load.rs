//! ingot-load: run the full extract → unpack → load pipeline
//!
//! Loads a JSON document stream into a directory destination, one JSONL
//! file per table, with idempotent materialization on record hashes.
//!
//! Usage:
//!   # Load a document (or array of documents) into ./warehouse
//!   ingot-load data.json --dest ./warehouse
//!
//!   # NDJSON input, reusing a saved schema across runs
//!   ingot-load --ndjson events.jsonl --dest ./warehouse --schema-file schema.yml

// Use MiMalloc allocator for better performance (recommended by simd-json)
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use anyhow::{Context, Result};
use clap::Parser;
use ingot::load::DirectoryGateway;
use ingot::pipeline::{ErrorMode, Pipeline};
use ingot::schema::{IdentityColumns, Schema};
use serde_json::Value;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "ingot-load")]
#[command(about = "Normalize and load nested JSON into a destination", long_about = None)]
struct Args {
    /// Input file (use stdin if omitted)
    #[arg(value_name = "FILE")]
    input: Option<String>,

    /// Process newline-delimited JSON (one JSON object per line)
    #[arg(long)]
    ndjson: bool,

    /// Destination directory
    #[arg(long, default_value = "./warehouse")]
    dest: String,

    /// Root table name for extracted documents
    #[arg(long, default_value = "json_doc")]
    table: String,

    /// Schema name
    #[arg(long, default_value = "example")]
    schema_name: String,

    /// Schema YAML to reuse if present; the evolved schema is saved back
    #[arg(long)]
    schema_file: Option<String>,

    /// Skip documents that fail to normalize instead of aborting
    #[arg(long)]
    permissive: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let gateway = Arc::new(
        DirectoryGateway::open(&args.dest, IdentityColumns::default())
            .with_context(|| format!("Failed to open destination {}", args.dest))?,
    );

    // Reuse an existing schema when one was saved by an earlier run.
    let schema = match &args.schema_file {
        Some(path) if Path::new(path).exists() => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read {path}"))?;
            Schema::from_yaml(&text).with_context(|| format!("Failed to parse {path}"))?
        }
        _ => Schema::new(&args.schema_name),
    };

    let mode = if args.permissive {
        ErrorMode::Permissive
    } else {
        ErrorMode::Strict
    };
    let mut pipeline = Pipeline::with_schema(schema, gateway).error_mode(mode);

    let documents = read_documents(args.input.as_deref(), args.ndjson)?;
    let staged = pipeline.extract(documents, &args.table);
    println!("Extracted {staged} document(s)");

    let report = pipeline.unpack()?;
    println!(
        "Unpacked {} document(s) into {} row(s)",
        report.documents, report.rows
    );
    for skip in &report.skipped {
        eprintln!("⚠ Skipped document {}: {}", skip.index, skip.reason);
    }

    let load_id = pipeline.load()?;
    println!("Loaded package {load_id}");

    // Save the schema so it can be reused (and manually edited).
    if let Some(path) = &args.schema_file {
        let yaml = pipeline
            .schema()
            .as_yaml(true)
            .context("Failed to serialize schema")?;
        std::fs::write(path, yaml).with_context(|| format!("Failed to write {path}"))?;
    }

    // A complete load can still contain failed jobs; they never raise, so
    // enumerate them explicitly.
    for load_id in pipeline.list_completed_loads() {
        println!("Checking failed jobs in {load_id}");
        for job in pipeline.list_failed_jobs(&load_id)? {
            println!("JOB: {}\nMSG: {}", job.job_id, job.message);
        }
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
        if let Ok(parsed) = simd_json::to_owned_value(&mut content.clone()) {
            let json_str = simd_json::to_string(&parsed)?;
            let value: Value = serde_json::from_str(&json_str)?;
            return Ok(match value {
                Value::Array(elements) => elements,
                other => vec![other],
            });
        }
    }

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
