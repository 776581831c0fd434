use crate::launcher::{ExecLauncher, ProviderLauncher};
use cadenza_core::plugin_key;
use cadenza_plugin::PluginConfig;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

pub const MANIFEST_FILE: &str = "plugin.toml";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    #[default]
    Content,
    Dsp,
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ProviderKind::Content => "content",
            ProviderKind::Dsp => "dsp",
        })
    }
}

/// An installable plugin found by a [`PluginCatalog`].
#[derive(Clone)]
pub struct PluginDescriptor {
    pub package: String,
    pub service: String,
    /// Plugins without a human-readable name are ignored by discovery.
    pub name: Option<String>,
    pub author: Option<String>,
    pub config_entry: Option<String>,
    pub kind: ProviderKind,
    pub launcher: Arc<dyn ProviderLauncher>,
}

impl PluginDescriptor {
    pub fn key(&self) -> String {
        plugin_key(&self.package, &self.service)
    }
}

impl fmt::Debug for PluginDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginDescriptor")
            .field("package", &self.package)
            .field("service", &self.service)
            .field("name", &self.name)
            .field("author", &self.author)
            .field("config_entry", &self.config_entry)
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

/// Source of installable plugins.
pub trait PluginCatalog: Send + Sync {
    fn enumerate(&self) -> Vec<PluginDescriptor>;
}

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("failed to read manifest {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse manifest {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("manifest {path} is missing `{field}`")]
    Missing { path: PathBuf, field: &'static str },
}

/// On-disk description of an exec plugin.
///
/// ```toml
/// package = "org.example.files"
/// service = "LocalFiles"
/// name = "Local files"
/// author = "Example"
/// kind = "content"
/// executable = "bin/files-provider"
/// args = ["--quiet"]
///
/// [env]
/// FILES_ROOT = "/srv/music"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginManifest {
    pub package: String,
    pub service: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub config_entry: Option<String>,
    #[serde(default)]
    pub kind: ProviderKind,
    /// Relative paths are resolved against the manifest's directory.
    pub executable: PathBuf,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub request_timeout_ms: Option<u64>,
}

impl PluginManifest {
    pub fn load(path: &Path) -> Result<Self, CatalogError> {
        let contents = fs::read_to_string(path).map_err(|source| CatalogError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let manifest: PluginManifest =
            toml::from_str(&contents).map_err(|source| CatalogError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        if manifest.package.trim().is_empty() {
            return Err(CatalogError::Missing {
                path: path.to_path_buf(),
                field: "package",
            });
        }
        if manifest.service.trim().is_empty() {
            return Err(CatalogError::Missing {
                path: path.to_path_buf(),
                field: "service",
            });
        }
        Ok(manifest)
    }

    /// Builds the descriptor, resolving the executable relative to `base`.
    pub fn into_descriptor(self, base: &Path) -> PluginDescriptor {
        let executable = if self.executable.is_absolute() {
            self.executable
        } else {
            base.join(self.executable)
        };
        let mut config = PluginConfig::new(executable);
        config.args = self.args;
        config.env = self.env.into_iter().collect();
        config.working_dir = Some(base.to_path_buf());
        if let Some(timeout) = self.request_timeout_ms {
            config.request_timeout = std::time::Duration::from_millis(timeout);
        }
        let launcher: Arc<dyn ProviderLauncher> = match self.kind {
            ProviderKind::Content => Arc::new(ExecLauncher::content(config)),
            ProviderKind::Dsp => Arc::new(ExecLauncher::dsp(config)),
        };

        PluginDescriptor {
            package: self.package,
            service: self.service,
            name: self.name.filter(|n| !n.trim().is_empty()),
            author: self.author,
            config_entry: self.config_entry,
            kind: self.kind,
            launcher,
        }
    }
}

/// Finds plugins by scanning directories for `*/plugin.toml`.
#[derive(Debug, Clone)]
pub struct ManifestCatalog {
    roots: Vec<PathBuf>,
}

impl ManifestCatalog {
    pub fn new(roots: Vec<PathBuf>) -> Self {
        Self { roots }
    }

    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    /// Manifest paths under every root, sorted for a stable discovery order.
    pub fn manifest_paths(&self) -> Vec<PathBuf> {
        let mut paths = Vec::new();
        for root in &self.roots {
            let entries = match fs::read_dir(root) {
                Ok(entries) => entries,
                Err(err) => {
                    if err.kind() != std::io::ErrorKind::NotFound {
                        tracing::warn!(dir = %root.display(), error = %err, "cannot scan plugin directory");
                    }
                    continue;
                }
            };
            for entry in entries.flatten() {
                let manifest = entry.path().join(MANIFEST_FILE);
                if manifest.is_file() {
                    paths.push(manifest);
                }
            }
        }
        paths.sort();
        paths
    }
}

impl PluginCatalog for ManifestCatalog {
    fn enumerate(&self) -> Vec<PluginDescriptor> {
        self.manifest_paths()
            .into_iter()
            .filter_map(|path| match PluginManifest::load(&path) {
                Ok(manifest) => {
                    let base = path.parent().unwrap_or(Path::new(".")).to_path_buf();
                    tracing::debug!(manifest = %path.display(), package = %manifest.package, "found plugin");
                    Some(manifest.into_descriptor(&base))
                }
                Err(err) => {
                    tracing::warn!(error = %err, "skipping plugin manifest");
                    None
                }
            })
            .collect()
    }
}

/// Catalog backed by a list held in memory.
#[derive(Default)]
pub struct StaticCatalog {
    descriptors: Mutex<Vec<PluginDescriptor>>,
}

impl StaticCatalog {
    pub fn new(descriptors: Vec<PluginDescriptor>) -> Self {
        Self {
            descriptors: Mutex::new(descriptors),
        }
    }

    pub fn set(&self, descriptors: Vec<PluginDescriptor>) {
        *self.descriptors.lock() = descriptors;
    }

    pub fn push(&self, descriptor: PluginDescriptor) {
        self.descriptors.lock().push(descriptor);
    }
}

impl PluginCatalog for StaticCatalog {
    fn enumerate(&self) -> Vec<PluginDescriptor> {
        self.descriptors.lock().clone()
    }
}
