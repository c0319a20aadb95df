//! Copy-on-write edit sessions over an image build configuration.
//!
//! An [`ImageEditor`] holds the last committed configuration as a shared
//! snapshot. The first mutation clones it into a private draft; `save`
//! validates the draft and swaps it in through a single store commit.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use obsvc_state::{
    ImageBuildConfig, ImageConfigStore, PackageKey, PackageReference, RepositoryKey,
    RepositoryReference, StoredImageConfig,
};

use super::error::{ImageConfigError, ImageConfigResult};
use crate::binaries::{AvailableBinaries, BinaryIndex};
use crate::config::DEFAULT_ARCHITECTURE;
use crate::obs;

/// Where an edit session stands.
///
/// ```text
/// Clean --edit--> Editing --save--> Saved
///   ^                |
///   +----discard-----+
/// ```
///
/// Every state accepts further edits.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Clean,
    Editing,
    Saved,
}

/// Binaries one repository exposes across the session's architectures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryBinaries {
    pub repository: RepositoryKey,
    pub binaries: AvailableBinaries,
}

/// Edit session for the image configuration owned by one package.
pub struct ImageEditor {
    owner: PackageKey,
    store: Arc<dyn ImageConfigStore>,
    index: Arc<dyn BinaryIndex>,
    architectures: Vec<String>,
    persisted: Arc<ImageBuildConfig>,
    draft: Option<ImageBuildConfig>,
    revision: u64,
    state: SessionState,
}

impl ImageEditor {
    /// Load the owner's configuration (empty when none was saved yet).
    ///
    /// Package lookups query every architecture in `architectures`; an empty
    /// list falls back to [`DEFAULT_ARCHITECTURE`].
    #[instrument(skip(store, index))]
    pub async fn open(
        owner: PackageKey,
        store: Arc<dyn ImageConfigStore>,
        index: Arc<dyn BinaryIndex>,
        architectures: Vec<String>,
    ) -> ImageConfigResult<Self> {
        let (persisted, revision) = match store.load(&owner).await? {
            Some(stored) => (stored.config, stored.revision),
            None => (ImageBuildConfig::new(), 0),
        };
        let architectures = if architectures.is_empty() {
            vec![DEFAULT_ARCHITECTURE.to_string()]
        } else {
            architectures
        };
        debug!(revision, "image configuration loaded");

        Ok(Self {
            owner,
            store,
            index,
            architectures,
            persisted: Arc::new(persisted),
            draft: None,
            revision,
            state: SessionState::Clean,
        })
    }

    pub fn owner(&self) -> &PackageKey {
        &self.owner
    }

    /// The draft when one exists, otherwise the committed configuration.
    pub fn config(&self) -> &ImageBuildConfig {
        self.draft.as_ref().unwrap_or(self.persisted.as_ref())
    }

    /// The configuration as of the last load or save.
    pub fn persisted(&self) -> &ImageBuildConfig {
        &self.persisted
    }

    /// Revision of the committed configuration; 0 when never saved.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn architectures(&self) -> &[String] {
        &self.architectures
    }

    pub fn is_dirty(&self) -> bool {
        self.draft
            .as_ref()
            .is_some_and(|draft| draft != self.persisted.as_ref())
    }

    fn draft_mut(&mut self) -> &mut ImageBuildConfig {
        self.state = SessionState::Editing;
        let persisted = &self.persisted;
        self.draft.get_or_insert_with(|| persisted.as_ref().clone())
    }

    // -----------------------------------------------------------------------
    // Repositories
    // -----------------------------------------------------------------------

    pub fn add_repository(
        &mut self,
        target_project: &str,
        repository_name: &str,
    ) -> ImageConfigResult<RepositoryReference> {
        let repository = RepositoryReference::new(target_project, repository_name);
        if self.config().repository(&repository.key()).is_some() {
            return Err(ImageConfigError::DuplicateRepository {
                repository: repository.default_alias(),
            });
        }
        self.draft_mut().repositories.push(repository.clone());
        Ok(repository)
    }

    /// `None` or a blank alias restores the default.
    pub fn set_repository_alias(
        &mut self,
        key: &RepositoryKey,
        alias: Option<&str>,
    ) -> ImageConfigResult<()> {
        self.require_repository(key)?;
        let alias = alias
            .map(str::trim)
            .filter(|a| !a.is_empty())
            .map(str::to_string);
        if let Some(repository) = self.draft_mut().repository_mut(key) {
            repository.alias = alias;
        }
        Ok(())
    }

    /// Packages resolved only from this repository fail validation on save.
    pub fn remove_repository(&mut self, key: &RepositoryKey) -> ImageConfigResult<()> {
        self.require_repository(key)?;
        self.draft_mut().repositories.retain(|r| !r.matches(key));
        Ok(())
    }

    fn require_repository(&self, key: &RepositoryKey) -> ImageConfigResult<()> {
        match self.config().repository(key) {
            Some(_) => Ok(()),
            None => Err(ImageConfigError::RepositoryNotFound {
                repository: key.to_string(),
            }),
        }
    }

    // -----------------------------------------------------------------------
    // Binary lookups
    // -----------------------------------------------------------------------

    /// Query the index for every repository and architecture of the image.
    ///
    /// Any failed lookup fails the whole call; a partial view could wrongly
    /// report a package as unresolvable.
    #[instrument(skip(self), fields(owner = %self.owner))]
    pub async fn lookup_repositories(&self) -> ImageConfigResult<Vec<RepositoryBinaries>> {
        let repositories: Vec<RepositoryKey> = self
            .config()
            .repositories
            .iter()
            .map(RepositoryReference::key)
            .collect();

        let mut found = Vec::with_capacity(repositories.len());
        for repository in repositories {
            let mut binaries = AvailableBinaries::new();
            for architecture in &self.architectures {
                let listed = self
                    .index
                    .lookup(
                        &repository.target_project,
                        &repository.repository_name,
                        architecture,
                    )
                    .await
                    .map_err(|source| ImageConfigError::BinaryIndex {
                        repository: repository.to_string(),
                        source,
                    })?;
                binaries.merge(listed);
            }
            found.push(RepositoryBinaries {
                repository,
                binaries,
            });
        }
        Ok(found)
    }

    /// Candidate package names for `query`: the exact name first, then names
    /// it prefixes.
    pub async fn search_binaries(&self, query: &str) -> ImageConfigResult<Vec<String>> {
        let found = self.lookup_repositories().await?;
        Ok(merged(&found).matching(query))
    }

    // -----------------------------------------------------------------------
    // Packages
    // -----------------------------------------------------------------------

    /// Add a package by exact name, optionally restricted to `architecture`.
    #[instrument(skip(self), fields(owner = %self.owner))]
    pub async fn add_package(
        &mut self,
        name: &str,
        architecture: Option<&str>,
    ) -> ImageConfigResult<PackageReference> {
        self.require_new_package(name)?;
        let found = self.lookup_repositories().await?;
        self.add_resolved(name, architecture, &found)
    }

    /// Expand `query` to the first matching binary name and add that package.
    #[instrument(skip(self), fields(owner = %self.owner))]
    pub async fn add_package_matching(
        &mut self,
        query: &str,
        architecture: Option<&str>,
    ) -> ImageConfigResult<PackageReference> {
        let found = self.lookup_repositories().await?;
        let name = merged(&found)
            .matching(query)
            .into_iter()
            .next()
            .ok_or_else(|| ImageConfigError::PackageNotResolvable {
                name: query.to_string(),
            })?;
        debug!(query, name = %name, "expanded package name");
        self.require_new_package(&name)?;
        self.add_resolved(&name, architecture, &found)
    }

    fn require_new_package(&self, name: &str) -> ImageConfigResult<()> {
        if self.config().package(name).is_some() {
            return Err(ImageConfigError::DuplicatePackage {
                name: name.to_string(),
            });
        }
        Ok(())
    }

    fn add_resolved(
        &mut self,
        name: &str,
        architecture: Option<&str>,
        found: &[RepositoryBinaries],
    ) -> ImageConfigResult<PackageReference> {
        let mut package = PackageReference::new(name);
        for entry in found {
            if let Some(archs) = entry.binaries.architectures(name) {
                package.available_architectures.extend(archs.iter().cloned());
                package.resolved_from.push(entry.repository.clone());
            }
        }
        if package.resolved_from.is_empty() {
            return Err(ImageConfigError::PackageNotResolvable {
                name: name.to_string(),
            });
        }
        if let Some(architecture) = architecture {
            package.architectures = narrowed(&package, architecture)?;
        }

        self.draft_mut().packages.push(package.clone());
        Ok(package)
    }

    /// Restrict a package to one architecture; `None` clears the restriction.
    pub fn set_package_architecture(
        &mut self,
        name: &str,
        architecture: Option<&str>,
    ) -> ImageConfigResult<()> {
        let package = self
            .config()
            .package(name)
            .ok_or_else(|| ImageConfigError::PackageNotFound {
                name: name.to_string(),
            })?;
        let architectures = match architecture {
            Some(architecture) => narrowed(package, architecture)?,
            None => BTreeSet::new(),
        };
        if let Some(package) = self.draft_mut().package_mut(name) {
            package.architectures = architectures;
        }
        Ok(())
    }

    pub fn remove_package(&mut self, name: &str) -> ImageConfigResult<()> {
        if self.config().package(name).is_none() {
            return Err(ImageConfigError::PackageNotFound {
                name: name.to_string(),
            });
        }
        self.draft_mut().packages.retain(|p| p.name != name);
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Description
    // -----------------------------------------------------------------------

    pub fn set_author(&mut self, author: Option<&str>) {
        self.draft_mut().description.author = non_blank(author);
    }

    pub fn set_contact(&mut self, contact: Option<&str>) {
        self.draft_mut().description.contact = non_blank(contact);
    }

    pub fn set_specification(&mut self, specification: Option<&str>) {
        self.draft_mut().description.specification = non_blank(specification);
    }

    pub fn set_image_name(&mut self, name: Option<&str>) {
        self.draft_mut().description.name = non_blank(name);
    }

    // -----------------------------------------------------------------------
    // Commit
    // -----------------------------------------------------------------------

    /// Check the invariants a commit must hold, against the current draft.
    pub fn validate(&self) -> ImageConfigResult<()> {
        validate_config(self.config())
    }

    /// Validate and commit the draft as a whole.
    ///
    /// On any error the draft is kept unchanged. Saving without edits, or with
    /// edits that cancel out, keeps the stored revision.
    #[instrument(skip(self), fields(owner = %self.owner))]
    pub async fn save(&mut self) -> ImageConfigResult<u64> {
        let Some(draft) = self.draft.as_ref() else {
            self.state = SessionState::Saved;
            return Ok(self.revision);
        };
        validate_config(draft)?;

        let stored: StoredImageConfig = self.store.save(&self.owner, draft).await?;
        obs::emit_config_saved(
            &self.owner.to_string(),
            stored.revision,
            stored.digest.short(),
        );

        self.persisted = Arc::new(stored.config);
        self.revision = stored.revision;
        self.draft = None;
        self.state = SessionState::Saved;
        Ok(self.revision)
    }

    /// Drop the draft and return to the committed configuration.
    pub fn discard(&mut self) {
        self.draft = None;
        self.state = SessionState::Clean;
    }
}

fn merged(found: &[RepositoryBinaries]) -> AvailableBinaries {
    let mut all = AvailableBinaries::new();
    for entry in found {
        all.merge(entry.binaries.clone());
    }
    all
}

fn narrowed(
    package: &PackageReference,
    architecture: &str,
) -> ImageConfigResult<BTreeSet<String>> {
    if !package.supports(architecture) {
        return Err(ImageConfigError::ArchitectureNotAvailable {
            name: package.name.clone(),
            architecture: architecture.to_string(),
        });
    }
    Ok(BTreeSet::from([architecture.to_string()]))
}

fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn validate_config(config: &ImageBuildConfig) -> ImageConfigResult<()> {
    let mut repositories = BTreeSet::new();
    for repository in &config.repositories {
        if !repositories.insert(repository.key()) {
            return Err(ImageConfigError::DuplicateRepository {
                repository: repository.default_alias(),
            });
        }
    }

    let mut names = BTreeSet::new();
    for package in &config.packages {
        if !names.insert(package.name.as_str()) {
            return Err(ImageConfigError::DuplicatePackage {
                name: package.name.clone(),
            });
        }
        if !package
            .resolved_from
            .iter()
            .any(|key| repositories.contains(key))
        {
            return Err(ImageConfigError::UnresolvedPackage {
                name: package.name.clone(),
            });
        }
        if let Some(architecture) = package.architectures.iter().find(|a| !package.supports(a)) {
            return Err(ImageConfigError::ArchitectureNotAvailable {
                name: package.name.clone(),
                architecture: architecture.clone(),
            });
        }
    }
    Ok(())
}
