//! Append-only production ledger file
//!
//! Each completed cycle appends exactly one line; existing lines are never rewritten.
//! Appends take an exclusive advisory lock so two streamers sharing one ledger cannot
//! interleave partial lines.

use crate::record::ProductionRecord;
use anyhow::{Context, Result};
use fs4::fs_std::FileExt;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct Ledger {
    path: PathBuf,
}

impl Ledger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// All records in file order; a missing ledger reads as empty
    ///
    /// Lines that do not parse are skipped with a warning.
    pub fn read_all(&self) -> Result<Vec<ProductionRecord>> {
        if !self.exists() {
            return Ok(Vec::new());
        }
        let file = File::open(&self.path)
            .with_context(|| format!("Failed to open ledger {}", self.path.display()))?;
        FileExt::lock_shared(&file)
            .with_context(|| format!("Failed to lock ledger {}", self.path.display()))?;

        let mut records = Vec::new();
        for (idx, line) in BufReader::new(&file).lines().enumerate() {
            let line =
                line.with_context(|| format!("Failed to read ledger {}", self.path.display()))?;
            if line.trim().is_empty() {
                continue;
            }
            match line.parse::<ProductionRecord>() {
                Ok(record) => records.push(record),
                Err(e) => warn!(
                    "Skipping ledger line {} of {}: {:#}",
                    idx + 1,
                    self.path.display(),
                    e
                ),
            }
        }

        FileExt::unlock(&file).ok();
        Ok(records)
    }

    /// Append one record
    pub fn append(&self, record: &ProductionRecord) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("Failed to open ledger {}", self.path.display()))?;
        FileExt::lock_exclusive(&file)
            .with_context(|| format!("Failed to lock ledger {}", self.path.display()))?;

        writeln!(file, "{record}")
            .and_then(|_| file.sync_data())
            .with_context(|| format!("Failed to append to ledger {}", self.path.display()))?;

        FileExt::unlock(&file).ok();
        debug!("Ledger append: {}", record);
        Ok(())
    }
}
