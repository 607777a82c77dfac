use std::io::Write;
use std::sync::{Arc, Mutex};

use clap::ValueEnum;
use serde_json::Value;

use crate::error::Result;
use crate::path::KeyPath;

/* ============================= FORMAT ============================= */

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Table,
    Json,
    Yaml,
}

/// Column layout for `table` output: header plus the dotted path it reads.
#[derive(Debug, Clone)]
pub struct TableSpec {
    pub columns: Vec<(&'static str, &'static str)>,
}

impl TableSpec {
    pub fn new(columns: &[(&'static str, &'static str)]) -> Self {
        Self {
            columns: columns.to_vec(),
        }
    }

    /// Render `items[]` as padded columns with a dashed rule under the header.
    pub fn render(&self, listing: &Value) -> String {
        let items = listing
            .get("items")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        let paths: Vec<Option<KeyPath>> =
            self.columns.iter().map(|(_, p)| p.parse().ok()).collect();

        let rows: Vec<Vec<String>> = items
            .iter()
            .map(|item| {
                paths
                    .iter()
                    .map(|p| match p {
                        Some(path) => cell(&path.resolve(item)),
                        None => String::new(),
                    })
                    .collect()
            })
            .collect();

        let widths: Vec<usize> = self
            .columns
            .iter()
            .enumerate()
            .map(|(i, (header, _))| {
                rows.iter()
                    .map(|r| r[i].chars().count())
                    .chain(std::iter::once(header.len()))
                    .max()
                    .unwrap_or(0)
            })
            .collect();

        let mut out = String::new();
        let header: Vec<String> = self
            .columns
            .iter()
            .zip(&widths)
            .map(|((h, _), w)| format!("{h:<w$}"))
            .collect();
        out.push_str(header.join("  ").trim_end());
        out.push('\n');
        let rule_len = widths.iter().sum::<usize>() + 2 * widths.len().saturating_sub(1);
        out.push_str(&"-".repeat(rule_len));
        out.push('\n');
        for row in rows {
            let line: Vec<String> = row
                .iter()
                .zip(&widths)
                .map(|(c, w)| format!("{c:<w$}"))
                .collect();
            out.push_str(line.join("  ").trim_end());
            out.push('\n');
        }
        out
    }
}

fn cell(values: &[Value]) -> String {
    values
        .iter()
        .map(|v| match v {
            Value::String(s) => s.clone(),
            Value::Null => String::new(),
            other => other.to_string(),
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/* ============================= SINK ============================= */

#[derive(Clone)]
enum Sink {
    Stdout,
    Capture(Arc<Mutex<String>>),
}

/// Single writer for everything the user reads on stdout.
///
/// Results honour `quiet`; dry-run documents and explicit prompts do not.
#[derive(Clone)]
pub struct Output {
    sink: Sink,
    quiet: bool,
}

impl Output {
    pub fn stdout(quiet: bool) -> Self {
        Self {
            sink: Sink::Stdout,
            quiet,
        }
    }

    /// In-memory sink, read back with [`Output::captured`].
    pub fn capture() -> Self {
        Self {
            sink: Sink::Capture(Arc::new(Mutex::new(String::new()))),
            quiet: false,
        }
    }

    pub fn with_quiet(mut self, quiet: bool) -> Self {
        self.quiet = quiet;
        self
    }

    pub fn is_quiet(&self) -> bool {
        self.quiet
    }

    pub fn captured(&self) -> String {
        match &self.sink {
            Sink::Capture(buf) => buf.lock().map(|b| b.clone()).unwrap_or_default(),
            Sink::Stdout => String::new(),
        }
    }

    fn write(&self, text: &str) {
        match &self.sink {
            Sink::Stdout => {
                let mut stdout = std::io::stdout().lock();
                let _ = stdout.write_all(text.as_bytes());
                let _ = stdout.flush();
            }
            Sink::Capture(buf) => {
                if let Ok(mut b) = buf.lock() {
                    b.push_str(text);
                }
            }
        }
    }

    /// A line of progress or result text; suppressed when quiet.
    pub fn line(&self, text: impl AsRef<str>) {
        if !self.quiet {
            self.write(&format!("{}\n", text.as_ref()));
        }
    }

    /// Text without a trailing newline; suppressed when quiet.
    pub fn inline(&self, text: impl AsRef<str>) {
        if !self.quiet {
            self.write(text.as_ref());
        }
    }

    /// One tick of a waiter's dot stream.
    pub fn dot(&self) {
        self.inline(".");
    }

    /// A `#` comment line in a dry-run stream; always written.
    pub fn comment(&self, text: impl AsRef<str>) {
        self.write(&format!("# {}\n", text.as_ref()));
    }

    /// One YAML document preceded by a `---` separator; always written.
    pub fn document(&self, doc: &Value) -> Result<()> {
        let yaml = serde_yaml::to_string(doc)?;
        self.write(&format!("---\n{yaml}"));
        Ok(())
    }

    /// Render a listing or object in the requested format.
    pub fn result(
        &self,
        value: &Value,
        format: OutputFormat,
        table: Option<&TableSpec>,
    ) -> Result<()> {
        if self.quiet {
            return Ok(());
        }
        match format {
            OutputFormat::Json => self.write(&format!("{}\n", serde_json::to_string(value)?)),
            OutputFormat::Yaml => self.write(&serde_yaml::to_string(value)?),
            OutputFormat::Table => match table {
                Some(spec) => self.write(&spec.render(value)),
                None => self.write(&serde_yaml::to_string(value)?),
            },
        }
        Ok(())
    }
}

impl Default for Output {
    fn default() -> Self {
        Self::stdout(false)
    }
}

impl std::fmt::Debug for Output {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let sink = match self.sink {
            Sink::Stdout => "stdout",
            Sink::Capture(_) => "capture",
        };
        f.debug_struct("Output")
            .field("sink", &sink)
            .field("quiet", &self.quiet)
            .finish()
    }
}

/// Split a multi-document YAML stream back into values.
pub fn parse_documents(stream: &str) -> Result<Vec<Value>> {
    use serde::Deserialize;
    let mut docs = Vec::new();
    for doc in serde_yaml::Deserializer::from_str(stream) {
        let value = Value::deserialize(doc)?;
        if !value.is_null() {
            docs.push(value);
        }
    }
    Ok(docs)
}

/* ============================= TESTS ============================= */

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_table_render_pads_columns() {
        let spec = TableSpec::new(&[("NAME", "name"), ("STATE", "state")]);
        let out = spec.render(&json!({"items": [
            {"name": "wordpress", "state": "ready"},
            {"name": "db", "state": "failed"},
        ]}));
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines[0], "NAME       STATE");
        assert!(lines[1].chars().all(|c| c == '-'));
        assert_eq!(lines[2], "wordpress  ready");
        assert_eq!(lines[3], "db         failed");
    }

    #[test]
    fn test_table_joins_list_cells() {
        let spec = TableSpec::new(&[("NAMESPACES", "namespaces[].name")]);
        let out = spec.render(&json!({"items": [
            {"namespaces": [{"name": "a"}, {"name": "b"}]},
        ]}));
        assert!(out.contains("a, b"));
    }

    #[test]
    fn test_quiet_suppresses_lines_not_documents() {
        let out = Output::capture().with_quiet(true);
        out.line("hello");
        out.dot();
        out.document(&json!({"kind": "Snapshot"})).unwrap();
        let text = out.captured();
        assert!(!text.contains("hello"));
        assert!(text.starts_with("---\n"));
        assert!(text.contains("kind: Snapshot"));
    }

    #[test]
    fn test_json_output_is_compact() {
        let out = Output::capture();
        out.result(&json!({"a": 1}), OutputFormat::Json, None).unwrap();
        assert_eq!(out.captured(), "{\"a\":1}\n");
    }

    #[test]
    fn test_documents_reparse() {
        let out = Output::capture();
        out.comment("This must be applied on the source cluster");
        out.document(&json!({"kind": "Snapshot", "metadata": {"name": "s1"}}))
            .unwrap();
        out.document(&json!({"kind": "Backup", "metadata": {"name": "b1"}}))
            .unwrap();
        let docs = parse_documents(&out.captured()).unwrap();
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0]["metadata"]["name"], "s1");
        assert_eq!(docs[1]["kind"], "Backup");
    }
}
