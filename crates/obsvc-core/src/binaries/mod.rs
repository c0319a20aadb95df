//! Available-binaries index.
//!
//! The backend exposes the binaries a `(project, repository)` currently
//! provides through two endpoints with different wire shapes. Both are
//! adapters behind [`BinaryIndex`] and normalise to [`AvailableBinaries`].

mod adapters;
mod parse;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::backend::BackendClient;
use crate::config::{BackendConfig, ListingMode};
use obsvc_state::NOARCH;

pub use adapters::{CommandListingIndex, PathListingIndex};
pub use parse::parse_listing;

/// Package name → architectures it is built for.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AvailableBinaries {
    binaries: BTreeMap<String, BTreeSet<String>>,
}

impl AvailableBinaries {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, architecture: impl Into<String>) {
        self.binaries
            .entry(name.into())
            .or_default()
            .insert(architecture.into());
    }

    /// Union another lookup into this one.
    pub fn merge(&mut self, other: AvailableBinaries) {
        for (name, architectures) in other.binaries {
            self.binaries.entry(name).or_default().extend(architectures);
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.binaries.contains_key(name)
    }

    pub fn architectures(&self, name: &str) -> Option<&BTreeSet<String>> {
        self.binaries.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.binaries.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &BTreeSet<String>)> {
        self.binaries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.binaries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.binaries.is_empty()
    }

    /// Whether `name` is available for `architecture`; `noarch` matches any.
    pub fn supports(&self, name: &str, architecture: &str) -> bool {
        self.binaries
            .get(name)
            .is_some_and(|archs| archs.contains(architecture) || archs.contains(NOARCH))
    }

    /// Names matching `query`: the exact name first, then names it prefixes,
    /// in lexical order.
    pub fn matching(&self, query: &str) -> Vec<String> {
        let query = query.trim();
        if query.is_empty() {
            return Vec::new();
        }
        let mut names = Vec::new();
        if self.contains(query) {
            names.push(query.to_string());
        }
        names.extend(
            self.binaries
                .range::<str, _>((std::ops::Bound::Excluded(query), std::ops::Bound::Unbounded))
                .map(|(name, _)| name)
                .take_while(|name| name.starts_with(query))
                .cloned(),
        );
        names
    }

    /// Keep only entries built for `architecture` or `noarch`.
    pub(crate) fn retain_architecture(&mut self, architecture: &str) {
        self.binaries
            .retain(|_, archs| archs.contains(architecture) || archs.contains(NOARCH));
    }
}

impl FromIterator<(String, BTreeSet<String>)> for AvailableBinaries {
    fn from_iter<I: IntoIterator<Item = (String, BTreeSet<String>)>>(iter: I) -> Self {
        let mut binaries = AvailableBinaries::new();
        for (name, architectures) in iter {
            binaries
                .binaries
                .entry(name)
                .or_default()
                .extend(architectures);
        }
        binaries
    }
}

/// Errors from a binaries lookup. None of these mean "no binaries".
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BinaryIndexError {
    #[error("binary listing request failed: {0}")]
    Transport(String),

    #[error("binary listing returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("malformed binary listing: {0}")]
    Malformed(String),
}

/// Looks up the binaries a repository exposes for one architecture.
#[async_trait]
pub trait BinaryIndex: Send + Sync {
    /// An empty result means the repository has nothing built yet.
    async fn lookup(
        &self,
        project: &str,
        repository: &str,
        architecture: &str,
    ) -> Result<AvailableBinaries, BinaryIndexError>;
}

/// Adapter selected by `config.listing_mode`.
pub fn index_for(config: &BackendConfig, client: Arc<dyn BackendClient>) -> Arc<dyn BinaryIndex> {
    match config.listing_mode {
        ListingMode::PathListing => Arc::new(PathListingIndex::new(client)),
        ListingMode::CommandListing => Arc::new(CommandListingIndex::new(client)),
    }
}
