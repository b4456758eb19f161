//! Output Sink
//!
//! Writes a module's inventory as an aligned text table and/or
//! machine-readable JSON and YAML. Write failures are logged and counted;
//! they never stop the scan.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Which files to produce
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Table,
    Json,
    Yaml,
    #[default]
    All,
}

impl OutputFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Table => "table",
            Self::Json => "json",
            Self::Yaml => "yaml",
            Self::All => "all",
        }
    }

    fn includes(&self, other: OutputFormat) -> bool {
        *self == OutputFormat::All || *self == other
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "table" | "txt" => Ok(Self::Table),
            "json" => Ok(Self::Json),
            "yaml" | "yml" => Ok(Self::Yaml),
            "all" => Ok(Self::All),
            other => Err(format!("unknown output format: {}", other)),
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Header plus rows for one module
#[derive(Debug, Clone, Default)]
pub struct TableFile {
    pub name: String,
    pub header: Vec<String>,
    pub body: Vec<Vec<String>>,
}

impl TableFile {
    pub fn new(name: &str, header: &[&str], body: Vec<Vec<String>>) -> Self {
        Self {
            name: name.to_string(),
            header: header.iter().map(|h| h.to_string()).collect(),
            body,
        }
    }

    /// Render as an aligned, boxed text table
    pub fn render_table(&self) -> String {
        let mut widths: Vec<usize> = self.header.iter().map(|h| h.chars().count()).collect();
        for row in &self.body {
            for (i, cell) in row.iter().enumerate() {
                let len = cell.chars().count();
                match widths.get_mut(i) {
                    Some(w) => *w = (*w).max(len),
                    None => widths.push(len),
                }
            }
        }

        let separator: String = widths
            .iter()
            .map(|w| "-".repeat(w + 2))
            .collect::<Vec<_>>()
            .join("+");
        let separator = format!("+{}+\n", separator);

        let line = |cells: &[String]| -> String {
            let padded: Vec<String> = widths
                .iter()
                .enumerate()
                .map(|(i, w)| {
                    let cell = cells.get(i).map(String::as_str).unwrap_or("");
                    format!(" {:<width$} ", cell, width = *w)
                })
                .collect();
            format!("|{}|\n", padded.join("|"))
        };

        let mut out = String::new();
        out.push_str(&separator);
        out.push_str(&line(&self.header));
        out.push_str(&separator);
        for row in &self.body {
            out.push_str(&line(row));
        }
        out.push_str(&separator);
        out
    }

    /// Rows as objects keyed by header
    pub fn records(&self) -> Vec<Value> {
        self.body
            .iter()
            .map(|row| {
                let mut map = Map::new();
                for (header, cell) in self.header.iter().zip(row.iter()) {
                    map.insert(header.clone(), Value::String(cell.clone()));
                }
                Value::Object(map)
            })
            .collect()
    }
}

/// Destination and format of output files
#[derive(Debug, Clone)]
pub struct OutputWriter {
    pub directory: PathBuf,
    pub format: OutputFormat,
    pub verbosity: u8,
}

impl OutputWriter {
    pub fn new(directory: &Path, format: OutputFormat, verbosity: u8) -> Self {
        Self {
            directory: directory.to_path_buf(),
            format,
            verbosity,
        }
    }

    fn write_file(&self, subdir: &str, file_name: &str, contents: &str) -> Option<PathBuf> {
        let dir = self.directory.join(subdir);
        if let Err(e) = std::fs::create_dir_all(&dir) {
            tracing::error!("Failed to create {}: {}", dir.display(), e);
            return None;
        }
        let path = dir.join(file_name);
        match std::fs::write(&path, contents) {
            Ok(()) => Some(path),
            Err(e) => {
                tracing::error!("Failed to write {}: {}", path.display(), e);
                None
            }
        }
    }

    /// Write `table` in every selected format; returns the number of failures
    pub fn write(&self, table: &TableFile) -> usize {
        let mut failures = 0;
        let rendered = table.render_table();

        if self.verbosity >= 2 {
            print!("{}", rendered);
        }

        if self.format.includes(OutputFormat::Table) {
            let name = format!("{}.txt", table.name);
            match self.write_file("table", &name, &rendered) {
                Some(path) => tracing::info!("Wrote {}", path.display()),
                None => failures += 1,
            }
        }

        if self.format.includes(OutputFormat::Json) {
            let name = format!("{}.json", table.name);
            match serde_json::to_string_pretty(&table.records()) {
                Ok(body) => match self.write_file("json", &name, &body) {
                    Some(path) => tracing::info!("Wrote {}", path.display()),
                    None => failures += 1,
                },
                Err(e) => {
                    tracing::error!("Failed to serialize {}: {}", name, e);
                    failures += 1;
                }
            }
        }

        if self.format.includes(OutputFormat::Yaml) {
            let name = format!("{}.yaml", table.name);
            match serde_yaml::to_string(&table.records()) {
                Ok(body) => match self.write_file("yaml", &name, &body) {
                    Some(path) => tracing::info!("Wrote {}", path.display()),
                    None => failures += 1,
                },
                Err(e) => {
                    tracing::error!("Failed to serialize {}: {}", name, e);
                    failures += 1;
                }
            }
        }

        failures
    }
}
