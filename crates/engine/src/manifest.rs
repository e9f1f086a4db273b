//! # Manifest - Level Membership
//!
//! Records which SSTable belongs to which level, and in what order, so a
//! restart rebuilds exactly the level set that was live in memory. File ids
//! alone cannot do that: a level merged into itself puts its (newer id)
//! outputs ahead of files registered while the merge ran.
//!
//! ## File Format
//!
//! `<dir>/MANIFEST`, one line per SSTable, each level oldest first:
//!
//! ```text
//! # StrataKV level manifest
//! # Format: L<level>:<file name>
//! L0:0000000012.sst
//! L0:0000000014.sst
//! L1:0000000013.sst
//! ```
//!
//! Lines starting with `#` and empty lines are ignored.
//!
//! ## Crash Safety
//!
//! The manifest is rewritten whole: written to `MANIFEST.tmp`, fsynced, then
//! renamed over the old one. A table that exists on disk but is not listed
//! was never installed (or was already replaced) and is removed at load.

use anyhow::{bail, Context, Result};
use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

/// Name of the manifest file within the store directory.
pub const MANIFEST_FILENAME: &str = "MANIFEST";

const MANIFEST_TMP_FILENAME: &str = "MANIFEST.tmp";

/// File names per level, each level oldest first.
pub(crate) type LevelNames = Vec<Vec<String>>;

#[derive(Debug, Clone)]
pub(crate) struct Manifest {
    path: PathBuf,
}

impl Manifest {
    pub fn new(dir: &Path) -> Self {
        Self {
            path: dir.join(MANIFEST_FILENAME),
        }
    }

    /// Reads the manifest of a store with `levels` levels.
    ///
    /// Returns `None` when no manifest has been written yet.
    ///
    /// # Errors
    ///
    /// Fails on a malformed line or a level outside `0..levels`.
    pub fn load(&self, levels: usize) -> Result<Option<LevelNames>> {
        let file = match File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(e).with_context(|| format!("opening {}", self.path.display()))
            }
        };

        let mut names: LevelNames = vec![Vec::new(); levels];
        for (n, line) in BufReader::new(file).lines().enumerate() {
            let line = line.with_context(|| format!("reading manifest line {}", n + 1))?;
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }

            let (level, name) = trimmed.split_once(':').ok_or_else(|| {
                anyhow::anyhow!(
                    "manifest line {}: expected 'L<level>:<file>', got '{}'",
                    n + 1,
                    trimmed
                )
            })?;
            let level: usize = match level.strip_prefix('L').and_then(|l| l.parse().ok()) {
                Some(l) => l,
                None => bail!("manifest line {}: bad level '{}'", n + 1, level),
            };
            if level >= levels {
                bail!(
                    "manifest line {}: level {} but the store is configured with {}",
                    n + 1,
                    level,
                    levels
                );
            }
            names[level].push(name.to_string());
        }
        Ok(Some(names))
    }

    /// Atomically replaces the manifest with `names`.
    pub fn save(&self, names: &[Vec<String>]) -> Result<()> {
        let tmp = self.path.with_file_name(MANIFEST_TMP_FILENAME);
        {
            let mut w = BufWriter::new(
                File::create(&tmp).with_context(|| format!("creating {}", tmp.display()))?,
            );
            writeln!(w, "# StrataKV level manifest")?;
            writeln!(w, "# Format: L<level>:<file name>")?;
            for (level, files) in names.iter().enumerate() {
                for name in files {
                    writeln!(w, "L{}:{}", level, name)?;
                }
            }
            w.flush()?;
            w.get_ref().sync_all()?;
        }
        fs::rename(&tmp, &self.path)
            .with_context(|| format!("installing {}", self.path.display()))?;
        if let Some(dir) = self.path.parent() {
            if let Ok(d) = File::open(dir) {
                let _ = d.sync_all();
            }
        }
        Ok(())
    }
}
