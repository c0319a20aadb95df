//! Persisted shape of a kiwi image build configuration
//!
//! - `ImageBuildConfig`: ordered repositories, ordered packages, description
//! - `StoredImageConfig`: a saved configuration plus digest and revision
//!
//! Repository and package order is significant and survives every round trip.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Architecture marker for binaries that install on any architecture.
pub const NOARCH: &str = "noarch";

// ---------------------------------------------------------------------------
// Content digest
// ---------------------------------------------------------------------------

/// SHA-256 hex digest of a serialized configuration.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentDigest(String);

impl ContentDigest {
    /// Compute the SHA-256 digest of the given bytes.
    pub fn from_bytes(data: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(data);
        ContentDigest(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short form (first 12 hex chars).
    pub fn short(&self) -> &str {
        &self.0[..12.min(self.0.len())]
    }
}

impl std::fmt::Display for ContentDigest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Keys
// ---------------------------------------------------------------------------

/// The package that owns an image configuration.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PackageKey {
    pub project: String,
    pub package: String,
}

impl PackageKey {
    pub fn new(project: impl Into<String>, package: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            package: package.into(),
        }
    }
}

impl std::fmt::Display for PackageKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.project, self.package)
    }
}

/// Identity of a repository reference: `(target project, repository name)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RepositoryKey {
    pub target_project: String,
    pub repository_name: String,
}

impl RepositoryKey {
    pub fn new(target_project: impl Into<String>, repository_name: impl Into<String>) -> Self {
        Self {
            target_project: target_project.into(),
            repository_name: repository_name.into(),
        }
    }
}

impl std::fmt::Display for RepositoryKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.repository_name, self.target_project)
    }
}

// ---------------------------------------------------------------------------
// References
// ---------------------------------------------------------------------------

/// A repository the image pulls binaries from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryReference {
    pub target_project: String,
    pub repository_name: String,
    /// Display-only override; `None` renders as `repository@project`.
    #[serde(default)]
    pub alias: Option<String>,
}

impl RepositoryReference {
    pub fn new(target_project: impl Into<String>, repository_name: impl Into<String>) -> Self {
        Self {
            target_project: target_project.into(),
            repository_name: repository_name.into(),
            alias: None,
        }
    }

    pub fn key(&self) -> RepositoryKey {
        RepositoryKey::new(&self.target_project, &self.repository_name)
    }

    pub fn matches(&self, key: &RepositoryKey) -> bool {
        self.target_project == key.target_project && self.repository_name == key.repository_name
    }

    /// `repositoryName@targetProject`
    pub fn default_alias(&self) -> String {
        format!("{}@{}", self.repository_name, self.target_project)
    }

    /// Alias when set, otherwise the default alias.
    pub fn display_name(&self) -> String {
        self.alias.clone().unwrap_or_else(|| self.default_alias())
    }
}

/// A binary package the image installs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageReference {
    pub name: String,
    /// Architecture overrides; empty means all architectures.
    #[serde(default)]
    pub architectures: BTreeSet<String>,
    /// Architectures the binary index reported when the package was added.
    #[serde(default)]
    pub available_architectures: BTreeSet<String>,
    /// Repositories whose index contained the package when it was added.
    #[serde(default)]
    pub resolved_from: Vec<RepositoryKey>,
}

impl PackageReference {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            architectures: BTreeSet::new(),
            available_architectures: BTreeSet::new(),
            resolved_from: Vec::new(),
        }
    }

    pub fn is_noarch(&self) -> bool {
        self.available_architectures.contains(NOARCH)
    }

    /// Whether `arch` is installable from what the index reported.
    pub fn supports(&self, arch: &str) -> bool {
        self.is_noarch() || self.available_architectures.contains(arch)
    }

    /// Overrides rendered for listings, e.g. `(x86_64)`; `None` when unrestricted.
    pub fn display_architectures(&self) -> Option<String> {
        if self.architectures.is_empty() {
            return None;
        }
        let joined: Vec<&str> = self.architectures.iter().map(String::as_str).collect();
        Some(format!("({})", joined.join(", ")))
    }
}

/// Descriptive metadata of the image.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageDescription {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub contact: Option<String>,
    #[serde(default)]
    pub specification: Option<String>,
}

// ---------------------------------------------------------------------------
// ImageBuildConfig
// ---------------------------------------------------------------------------

/// Repositories and packages declared by a buildable image.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageBuildConfig {
    #[serde(default)]
    pub description: ImageDescription,
    #[serde(default)]
    pub repositories: Vec<RepositoryReference>,
    #[serde(default)]
    pub packages: Vec<PackageReference>,
}

impl ImageBuildConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn repository(&self, key: &RepositoryKey) -> Option<&RepositoryReference> {
        self.repositories.iter().find(|r| r.matches(key))
    }

    pub fn repository_mut(&mut self, key: &RepositoryKey) -> Option<&mut RepositoryReference> {
        self.repositories.iter_mut().find(|r| r.matches(key))
    }

    pub fn package(&self, name: &str) -> Option<&PackageReference> {
        self.packages.iter().find(|p| p.name == name)
    }

    pub fn package_mut(&mut self, name: &str) -> Option<&mut PackageReference> {
        self.packages.iter_mut().find(|p| p.name == name)
    }

    /// Canonical JSON encoding used for digests and storage.
    pub fn to_canonical_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }

    pub fn digest(&self) -> serde_json::Result<ContentDigest> {
        Ok(ContentDigest::from_bytes(self.to_canonical_json()?.as_bytes()))
    }
}

/// A configuration as it was last committed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredImageConfig {
    pub owner: PackageKey,
    pub config: ImageBuildConfig,
    pub digest: ContentDigest,
    /// Starts at 1 and increases on every save that changes the digest.
    pub revision: u64,
    pub saved_at: DateTime<Utc>,
}
