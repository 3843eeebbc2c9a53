use anyhow::{Context, Result};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Writes materialized rows to one JSON Lines file per table.
pub struct TableWriter {
    dir: PathBuf,
    writers: HashMap<String, File>,
}

impl TableWriter {
    /// Create a writer that appends `<table>.jsonl` files under `output_dir`.
    pub fn new<P: AsRef<Path>>(output_dir: P) -> Result<Self> {
        std::fs::create_dir_all(&output_dir).context("Failed to create output directory")?;
        Ok(TableWriter {
            dir: output_dir.as_ref().to_path_buf(),
            writers: HashMap::new(),
        })
    }

    /// Append rows to the table's file, creating it on first use.
    pub fn write_rows<I>(&mut self, table: &str, rows: I) -> Result<()>
    where
        I: IntoIterator<Item = Map<String, Value>>,
    {
        if !self.writers.contains_key(table) {
            let path = self.dir.join(format!("{table}.jsonl"));
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .with_context(|| format!("Failed to open file: {}", path.display()))?;
            self.writers.insert(table.to_string(), file);
        }

        let writer = self
            .writers
            .get_mut(table)
            .context("writer disappeared after insertion")?;
        for row in rows {
            let json = serde_json::to_string(&row).context("Failed to serialize row")?;
            writeln!(writer, "{json}").context("Failed to write row")?;
        }
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        for writer in self.writers.values_mut() {
            writer.flush().context("Failed to flush writer")?;
        }
        Ok(())
    }
}

/// Writes all rows to a single output, each annotated with its table name.
pub struct StreamWriter<W: Write> {
    writer: W,
}

impl<W: Write> StreamWriter<W> {
    pub fn new(writer: W) -> Self {
        StreamWriter { writer }
    }

    pub fn write_row(&mut self, table: &str, row: Map<String, Value>) -> Result<()> {
        let mut annotated = row;
        annotated.insert("_table".to_string(), Value::String(table.to_string()));
        let json = serde_json::to_string(&annotated).context("Failed to serialize row")?;
        writeln!(self.writer, "{json}").context("Failed to write row")?;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush().context("Failed to flush writer")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            other => panic!("expected object, got {other}"),
        }
    }

    #[test]
    fn test_table_writer_creates_one_file_per_table() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = TableWriter::new(dir.path()).unwrap();

        writer
            .write_rows("docs", vec![row(json!({"id": 1}))])
            .unwrap();
        writer
            .write_rows("docs__tags", vec![row(json!({"value": "a"}))])
            .unwrap();
        writer.flush().unwrap();

        let docs = std::fs::read_to_string(dir.path().join("docs.jsonl")).unwrap();
        assert!(docs.contains("\"id\":1"));
        assert!(dir.path().join("docs__tags.jsonl").exists());
    }

    #[test]
    fn test_stream_writer_annotates_table() {
        let mut buffer = Vec::new();
        let mut writer = StreamWriter::new(&mut buffer);

        writer.write_row("docs", row(json!({"id": 1}))).unwrap();
        writer.flush().unwrap();

        let output = String::from_utf8(buffer).unwrap();
        assert!(output.contains("\"_table\":\"docs\""));
    }
}
