use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use indexmap::{IndexMap, IndexSet};

use crate::extract::{Record, Value};

/// Persists a finite record set. A completed write replaces whatever was at
/// `destination` before.
pub trait Sink {
    fn write(&self, records: &[Record], destination: &Path) -> anyhow::Result<()>;
}

/// Picks the sink from the destination extension, JSON unless `.csv` or `.tsv`.
pub fn sink_for(destination: &Path) -> Box<dyn Sink> {
    match destination.extension().and_then(|e| e.to_str()) {
        Some("csv") => Box::new(CsvSink::default()),
        Some("tsv") => Box::new(CsvSink { delimiter: b'\t' }),
        _ => Box::new(JsonSink),
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSink;

impl Sink for JsonSink {
    fn write(&self, records: &[Record], destination: &Path) -> anyhow::Result<()> {
        persist(destination, |file| {
            let mut wtr = BufWriter::new(file);
            serde_json::to_writer_pretty(&mut wtr, records)?;
            wtr.flush()?;
            Ok(())
        })
    }
}

/// Nested maps become `group.key` columns.
#[derive(Debug, Clone, Copy)]
pub struct CsvSink {
    pub delimiter: u8,
}

impl Default for CsvSink {
    fn default() -> Self {
        Self { delimiter: b',' }
    }
}

impl Sink for CsvSink {
    fn write(&self, records: &[Record], destination: &Path) -> anyhow::Result<()> {
        let rows = records.iter().map(flatten).collect::<Vec<_>>();
        let mut columns = IndexSet::new();
        for row in &rows {
            columns.extend(row.keys().cloned());
        }

        persist(destination, |file| {
            let mut wtr = csv::WriterBuilder::new()
                .delimiter(self.delimiter)
                .from_writer(file);
            wtr.write_record(&columns)?;
            for row in &rows {
                wtr.write_record(
                    columns
                        .iter()
                        .map(|c| row.get(c).map(String::as_str).unwrap_or_default()),
                )?;
            }
            wtr.flush()?;
            Ok(())
        })
    }
}

fn flatten(record: &Record) -> IndexMap<String, String> {
    fn walk(prefix: &str, value: &Value, out: &mut IndexMap<String, String>) {
        match value {
            Value::Missing => {
                out.insert(prefix.to_string(), String::new());
            }
            Value::Integer(n) => {
                out.insert(prefix.to_string(), n.to_string());
            }
            Value::Text(s) => {
                out.insert(prefix.to_string(), s.clone());
            }
            Value::Map(map) => {
                for (k, v) in map {
                    walk(&format!("{prefix}.{k}"), v, out);
                }
            }
        }
    }

    let mut out = IndexMap::new();
    for (k, v) in record.iter() {
        walk(k, v, &mut out);
    }
    out
}

/// Writes next to `destination`, syncs, then renames over it.
fn persist<F>(destination: &Path, write: F) -> anyhow::Result<()>
where
    F: FnOnce(&mut File) -> anyhow::Result<()>,
{
    let dir = match destination.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    write(tmp.as_file_mut())?;
    tmp.as_file().sync_all()?;
    tmp.persist(destination)?;
    log::debug!("Wrote {}", destination.display());
    Ok(())
}
