//! Persisted set of plugins the host has already seen.
//!
//! Used to tell a first run (nothing known yet) apart from a newly installed
//! plugin.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::io::{self, BufReader, BufWriter};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const KNOWN_PLUGINS_FILE: &str = "known_plugins.json";

const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum KnownPluginsError {
    #[error("failed to create directory {path}: {source}")]
    CreateDir { path: PathBuf, source: io::Error },

    #[error("failed to write known plugins file {path}: {source}")]
    Write { path: PathBuf, source: io::Error },

    #[error("failed to read known plugins file {path}: {source}")]
    Read { path: PathBuf, source: io::Error },
}

#[derive(Debug, Serialize, Deserialize)]
struct Persisted {
    version: u32,
    plugins: BTreeSet<String>,
}

/// Flat set of `package/service` keys backed by a JSON file.
#[derive(Debug, Clone)]
pub struct KnownPlugins {
    path: PathBuf,
    plugins: BTreeSet<String>,
}

impl KnownPlugins {
    pub fn in_dir(data_dir: &Path) -> Self {
        Self::at(data_dir.join(KNOWN_PLUGINS_FILE))
    }

    /// Empty set that will be saved to `path`.
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            plugins: BTreeSet::new(),
        }
    }

    /// Reads the set. A missing file is an empty set; a corrupt file is moved
    /// aside and also treated as empty.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, KnownPluginsError> {
        let path = path.into();
        if !path.exists() {
            return Ok(Self::at(path));
        }

        let file = fs::File::open(&path).map_err(|source| KnownPluginsError::Read {
            path: path.clone(),
            source,
        })?;
        let parsed: Result<Persisted, _> = serde_json::from_reader(BufReader::new(file));
        match parsed {
            Ok(persisted) if persisted.version == FORMAT_VERSION => Ok(Self {
                path,
                plugins: persisted.plugins,
            }),
            Ok(persisted) => {
                tracing::warn!(
                    found = persisted.version,
                    path = %path.display(),
                    "unsupported known plugins version; starting empty"
                );
                Ok(Self::at(path))
            }
            Err(err) => {
                tracing::warn!(error = %err, path = %path.display(), "known plugins file is corrupt; starting empty");
                let aside = path.with_extension("corrupt.json");
                if let Err(move_err) = fs::rename(&path, &aside) {
                    tracing::warn!(error = %move_err, "failed to preserve corrupt known plugins file");
                }
                Ok(Self::at(path))
            }
        }
    }

    pub fn save(&self) -> Result<(), KnownPluginsError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|source| KnownPluginsError::CreateDir {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let file = fs::File::create(&self.path).map_err(|source| KnownPluginsError::Write {
            path: self.path.clone(),
            source,
        })?;
        let persisted = Persisted {
            version: FORMAT_VERSION,
            plugins: self.plugins.clone(),
        };
        serde_json::to_writer_pretty(BufWriter::new(file), &persisted).map_err(|e| {
            KnownPluginsError::Write {
                path: self.path.clone(),
                source: io::Error::other(e),
            }
        })?;
        tracing::debug!(count = self.plugins.len(), path = %self.path.display(), "saved known plugins");
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.plugins.contains(key)
    }

    /// Returns true if `key` was not known yet.
    pub fn insert(&mut self, key: impl Into<String>) -> bool {
        self.plugins.insert(key.into())
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.plugins.iter().map(String::as_str)
    }
}
