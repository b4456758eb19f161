//! Loot Writer
//!
//! Follow-up scripts derived from a finished inventory (pull commands,
//! target lists). Purely derivative: nothing here feeds back into a scan.

use std::path::{Path, PathBuf};

/// One loot file produced by a module
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LootFile {
    pub name: String,
    pub contents: String,
    /// Shown above the contents when echoing at high verbosity
    pub hint: Option<String>,
}

impl LootFile {
    pub fn new(name: &str, contents: String) -> Self {
        Self {
            name: name.to_string(),
            contents,
            hint: None,
        }
    }

    pub fn with_hint(mut self, hint: &str) -> Self {
        self.hint = Some(hint.to_string());
        self
    }
}

/// Outcome of writing a module's loot
#[derive(Debug, Default)]
pub struct LootSummary {
    pub written: Vec<PathBuf>,
    pub failures: usize,
}

/// Write `files` under `<directory>/loot`. Failures are logged and counted.
pub fn write_loot(directory: &Path, module: &str, files: &[LootFile], verbosity: u8) -> LootSummary {
    let mut summary = LootSummary::default();
    if files.is_empty() {
        return summary;
    }

    let path = directory.join("loot");
    if let Err(e) = std::fs::create_dir_all(&path) {
        tracing::error!(module = %module, "Failed to create {}: {}", path.display(), e);
        summary.failures = files.len();
        return summary;
    }

    for file in files {
        let target = path.join(&file.name);
        if let Err(e) = std::fs::write(&target, &file.contents) {
            tracing::error!(module = %module, "Failed to write {}: {}", target.display(), e);
            summary.failures += 1;
            continue;
        }

        if verbosity > 2 && !file.contents.is_empty() {
            println!();
            if let Some(hint) = &file.hint {
                println!("[{}] {}", module, hint);
            }
            print!("{}", file.contents);
            println!("[{}] End of loot file.", module);
        }

        println!("[{}] Loot written to [{}]", module, target.display());
        summary.written.push(target);
    }

    summary
}
