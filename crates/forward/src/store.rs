//! Persisted forwarding rules

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

use chimera_core::RuleSet;
use tracing::{debug, info, warn};

use crate::Result;

/// JSON file mapping rule name to rule
#[derive(Debug, Clone)]
pub struct RuleStore {
    path: PathBuf,
}

impl RuleStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read every stored rule.
    ///
    /// A missing or unreadable file means no rules are configured; the
    /// operator can always re-enter them.
    pub fn load(&self) -> RuleSet {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No rule store at {:?}", self.path);
                return RuleSet::new();
            }
            Err(e) => {
                warn!("Cannot read rule store {:?}: {}", self.path, e);
                return RuleSet::new();
            }
        };

        match serde_json::from_str(&content) {
            Ok(rules) => rules,
            Err(e) => {
                warn!("Ignoring unparseable rule store {:?}: {}", self.path, e);
                RuleSet::new()
            }
        }
    }

    /// Replace the stored rules.
    ///
    /// Written to a sibling temp file, synced, then renamed over the store so
    /// readers see either the old or the new contents.
    pub fn save(&self, rules: &RuleSet) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_string_pretty(rules)?;
        let temp_path = self.temp_path();
        {
            let mut file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .mode(0o600)
                .open(&temp_path)?;
            file.write_all(content.as_bytes())?;
            file.write_all(b"\n")?;
            file.sync_all()?;
        }
        fs::rename(&temp_path, &self.path)?;

        info!("Saved {} forwarding rule(s) to {:?}", rules.len(), self.path);
        Ok(())
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}
