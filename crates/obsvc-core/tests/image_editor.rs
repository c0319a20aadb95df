//! Image configuration edit sessions against a recording backend and the
//! in-memory store.

use std::sync::Arc;

use async_trait::async_trait;
use obsvc_core::backend::fakes::RecordingBackend;
use obsvc_core::{
    BackendConfig, BackendError, BackendResponse, BinaryIndex, ImageBuildConfig, ImageConfigError,
    ImageConfigStore, ImageEditor, ListingMode, MemoryImageStore, Method, PackageKey,
    PathListingIndex, RepositoryKey, SessionState, StorageError, StorageResult, StoredImageConfig,
    NOARCH,
};

const PERL_LISTING: &str = r#"<availablebinaries>
  <packages>
    <arch>noarch</arch>
    <name>perl-Citrix</name>
  </packages>
</availablebinaries>"#;

fn owner() -> PackageKey {
    PackageKey::new("home:tom", "test_image")
}

fn stub_listing(backend: &RecordingBackend, project: &str, body: &str) {
    backend.stub(
        Method::Get,
        &format!("/build/{project}/_availablebinaries"),
        None,
        BackendResponse::ok(body),
    );
}

async fn open(
    store: Arc<dyn ImageConfigStore>,
    backend: Arc<RecordingBackend>,
) -> ImageEditor {
    let index: Arc<dyn BinaryIndex> = Arc::new(PathListingIndex::new(backend));
    ImageEditor::open(owner(), store, index, vec!["x86_64".to_string()])
        .await
        .unwrap()
}

#[tokio::test]
async fn perl_expands_to_noarch_perl_citrix_with_path_listing() {
    let backend = Arc::new(RecordingBackend::new());
    stub_listing(&backend, "home:tom", PERL_LISTING);
    let mut editor = open(Arc::new(MemoryImageStore::new()), backend).await;

    editor.add_repository("home:tom", "images").unwrap();
    let package = editor.add_package_matching("perl", None).await.unwrap();

    assert_eq!(package.name, "perl-Citrix");
    assert!(package.available_architectures.contains(NOARCH));
    assert!(package.architectures.is_empty());
    assert_eq!(package.resolved_from, vec![RepositoryKey::new("home:tom", "images")]);
}

#[tokio::test]
async fn perl_expands_to_noarch_perl_citrix_with_command_listing() {
    let backend = Arc::new(RecordingBackend::new());
    backend.stub(
        Method::Post,
        "/_command",
        Some("availablebinaries"),
        BackendResponse::ok(r#"{"perl-Citrix" => ["noarch"]}"#),
    );
    let config = BackendConfig::new("http://backend").with_listing_mode(ListingMode::CommandListing);
    let index = obsvc_core::index_for(&config, backend.clone());
    let mut editor = ImageEditor::open(
        owner(),
        Arc::new(MemoryImageStore::new()),
        index,
        config.lookup_architectures.clone(),
    )
    .await
    .unwrap();

    editor.add_repository("home:tom", "images").unwrap();
    let package = editor.add_package_matching("perl", None).await.unwrap();

    assert_eq!(package.name, "perl-Citrix");
    assert!(package.is_noarch());
    assert!(backend.requests()[0]
        .target()
        .starts_with("/_command?prpa=home:tom/images/"));
}

#[tokio::test]
async fn add_package_requires_an_exact_match() {
    let backend = Arc::new(RecordingBackend::new());
    stub_listing(&backend, "home:tom", PERL_LISTING);
    let mut editor = open(Arc::new(MemoryImageStore::new()), backend).await;
    editor.add_repository("home:tom", "images").unwrap();

    let err = editor.add_package("perl", None).await.unwrap_err();
    assert!(matches!(err, ImageConfigError::PackageNotResolvable { name } if name == "perl"));

    editor.add_package("perl-Citrix", None).await.unwrap();
    let err = editor.add_package("perl-Citrix", None).await.unwrap_err();
    assert!(matches!(err, ImageConfigError::DuplicatePackage { .. }));
    assert_eq!(editor.config().packages.len(), 1);
}

#[tokio::test]
async fn empty_repository_resolves_nothing() {
    let backend = Arc::new(RecordingBackend::new());
    let mut editor = open(Arc::new(MemoryImageStore::new()), backend).await;
    editor.add_repository("home:tom", "empty").unwrap();

    let found = editor.lookup_repositories().await.unwrap();
    assert_eq!(found.len(), 1);
    assert!(found[0].binaries.is_empty());

    let err = editor.add_package_matching("perl", None).await.unwrap_err();
    assert!(matches!(err, ImageConfigError::PackageNotResolvable { .. }));
}

#[tokio::test]
async fn lookup_failure_blocks_add_package() {
    let backend = Arc::new(RecordingBackend::new());
    backend.fail(
        Method::Get,
        "/build/home:tom/_availablebinaries",
        None,
        BackendError::Unreachable("connection refused".into()),
    );
    let mut editor = open(Arc::new(MemoryImageStore::new()), backend).await;
    editor.add_repository("home:tom", "images").unwrap();
    let before = editor.config().clone();

    let err = editor.add_package("perl-Citrix", None).await.unwrap_err();

    assert!(matches!(err, ImageConfigError::BinaryIndex { .. }));
    assert_eq!(editor.config(), &before);
}

#[tokio::test]
async fn duplicate_repository_keeps_the_first() {
    let backend = Arc::new(RecordingBackend::new());
    let mut editor = open(Arc::new(MemoryImageStore::new()), backend).await;
    let key = RepositoryKey::new("home:tom", "images");

    editor.add_repository("home:tom", "images").unwrap();
    editor.set_repository_alias(&key, Some("first")).unwrap();
    let err = editor.add_repository("home:tom", "images").unwrap_err();

    assert!(matches!(err, ImageConfigError::DuplicateRepository { .. }));
    assert_eq!(editor.config().repositories.len(), 1);
    assert_eq!(editor.config().repositories[0].display_name(), "first");
}

#[tokio::test]
async fn alias_edit_and_reset() {
    let backend = Arc::new(RecordingBackend::new());
    let mut editor = open(Arc::new(MemoryImageStore::new()), backend).await;
    let key = RepositoryKey::new("home:tom", "openSUSE_Tumbleweed");
    editor.add_repository("home:tom", "openSUSE_Tumbleweed").unwrap();

    assert_eq!(
        editor.config().repository(&key).unwrap().display_name(),
        "openSUSE_Tumbleweed@home:tom"
    );
    editor.set_repository_alias(&key, Some("tumbleweed")).unwrap();
    assert_eq!(editor.config().repository(&key).unwrap().display_name(), "tumbleweed");
    editor.set_repository_alias(&key, Some("  ")).unwrap();
    assert_eq!(editor.config().repository(&key).unwrap().alias, None);

    let missing = RepositoryKey::new("home:tom", "missing");
    assert!(matches!(
        editor.set_repository_alias(&missing, Some("x")),
        Err(ImageConfigError::RepositoryNotFound { .. })
    ));
}

#[tokio::test]
async fn architecture_override_on_noarch_package() {
    let backend = Arc::new(RecordingBackend::new());
    stub_listing(&backend, "home:tom", PERL_LISTING);
    let mut editor = open(Arc::new(MemoryImageStore::new()), backend).await;
    editor.add_repository("home:tom", "images").unwrap();
    editor.add_package_matching("perl", None).await.unwrap();

    editor
        .set_package_architecture("perl-Citrix", Some("x86_64"))
        .unwrap();

    let package = editor.config().package("perl-Citrix").unwrap();
    assert_eq!(package.display_architectures().as_deref(), Some("(x86_64)"));

    editor.set_package_architecture("perl-Citrix", None).unwrap();
    assert!(editor.config().package("perl-Citrix").unwrap().architectures.is_empty());
    assert!(matches!(
        editor.set_package_architecture("vim", Some("x86_64")),
        Err(ImageConfigError::PackageNotFound { .. })
    ));
}

#[tokio::test]
async fn architecture_must_be_available() {
    let backend = Arc::new(RecordingBackend::new());
    stub_listing(
        &backend,
        "home:tom",
        "<availablebinaries><packages><arch>x86_64</arch><name>vim</name></packages></availablebinaries>",
    );
    let mut editor = open(Arc::new(MemoryImageStore::new()), backend).await;
    editor.add_repository("home:tom", "images").unwrap();

    let err = editor.add_package("vim", Some("aarch64")).await.unwrap_err();
    assert!(matches!(
        err,
        ImageConfigError::ArchitectureNotAvailable { architecture, .. } if architecture == "aarch64"
    ));
    assert!(editor.config().packages.is_empty());

    let vim = editor.add_package("vim", Some("x86_64")).await.unwrap();
    assert_eq!(vim.display_architectures().as_deref(), Some("(x86_64)"));
}

#[tokio::test]
async fn save_then_reload_preserves_everything() {
    let backend = Arc::new(RecordingBackend::new());
    stub_listing(&backend, "home:tom", PERL_LISTING);
    stub_listing(
        &backend,
        "openSUSE:Factory",
        "<availablebinaries><packages><arch>x86_64</arch><name>vim</name><name>zsh</name></packages></availablebinaries>",
    );
    let store: Arc<dyn ImageConfigStore> = Arc::new(MemoryImageStore::new());
    let mut editor = open(store.clone(), backend.clone()).await;

    editor.add_repository("openSUSE:Factory", "snapshot").unwrap();
    editor.add_repository("home:tom", "images").unwrap();
    editor
        .set_repository_alias(&RepositoryKey::new("home:tom", "images"), Some("mine"))
        .unwrap();
    editor.add_package("zsh", None).await.unwrap();
    editor.add_package("vim", Some("x86_64")).await.unwrap();
    editor.add_package_matching("perl", None).await.unwrap();
    editor.set_author(Some("Tom Tester"));
    assert!(editor.is_dirty());

    let revision = editor.save().await.unwrap();
    assert_eq!(revision, 1);
    assert_eq!(editor.state(), SessionState::Saved);
    assert!(!editor.is_dirty());

    let reloaded = open(store, backend).await;
    assert_eq!(reloaded.revision(), 1);
    assert_eq!(reloaded.config(), editor.config());

    let repos: Vec<String> = reloaded
        .config()
        .repositories
        .iter()
        .map(|r| r.display_name())
        .collect();
    assert_eq!(repos, vec!["snapshot@openSUSE:Factory", "mine"]);
    let packages: Vec<&str> = reloaded
        .config()
        .packages
        .iter()
        .map(|p| p.name.as_str())
        .collect();
    assert_eq!(packages, vec!["zsh", "vim", "perl-Citrix"]);
    assert_eq!(
        reloaded.config().description.author.as_deref(),
        Some("Tom Tester")
    );
}

#[tokio::test]
async fn unchanged_save_keeps_revision() {
    let backend = Arc::new(RecordingBackend::new());
    let store: Arc<dyn ImageConfigStore> = Arc::new(MemoryImageStore::new());
    let mut editor = open(store, backend).await;

    editor.set_author(Some("tom"));
    assert_eq!(editor.save().await.unwrap(), 1);

    editor.set_author(Some("jerry"));
    editor.set_author(Some("tom"));
    assert!(!editor.is_dirty());
    assert_eq!(editor.save().await.unwrap(), 1);
    assert_eq!(editor.save().await.unwrap(), 1);
}

#[tokio::test]
async fn save_rejects_orphaned_package_and_keeps_draft() {
    let backend = Arc::new(RecordingBackend::new());
    stub_listing(&backend, "home:tom", PERL_LISTING);
    let store: Arc<dyn ImageConfigStore> = Arc::new(MemoryImageStore::new());
    let mut editor = open(store.clone(), backend).await;
    let key = RepositoryKey::new("home:tom", "images");

    editor.add_repository("home:tom", "images").unwrap();
    editor.add_package_matching("perl", None).await.unwrap();
    editor.remove_repository(&key).unwrap();

    let err = editor.save().await.unwrap_err();
    assert!(matches!(err, ImageConfigError::UnresolvedPackage { name } if name == "perl-Citrix"));
    assert_eq!(editor.state(), SessionState::Editing);
    assert_eq!(editor.config().packages.len(), 1);
    assert!(store.load(&owner()).await.unwrap().is_none());

    editor.remove_package("perl-Citrix").unwrap();
    assert_eq!(editor.save().await.unwrap(), 1);
}

#[tokio::test]
async fn discard_returns_to_committed_configuration() {
    let backend = Arc::new(RecordingBackend::new());
    let mut editor = open(Arc::new(MemoryImageStore::new()), backend).await;
    editor.add_repository("home:tom", "images").unwrap();
    editor.save().await.unwrap();

    editor.add_repository("home:tom", "other").unwrap();
    editor.set_image_name(Some("appliance"));
    assert!(editor.is_dirty());

    editor.discard();
    assert_eq!(editor.state(), SessionState::Clean);
    assert!(!editor.is_dirty());
    assert_eq!(editor.config(), editor.persisted());
    assert_eq!(editor.config().repositories.len(), 1);

    editor.set_author(Some("tom"));
    assert_eq!(editor.state(), SessionState::Editing);
    editor.discard();
    assert_eq!(editor.state(), SessionState::Clean);
    assert_eq!(editor.save().await.unwrap(), 1);
}

/// Store whose saves always fail.
struct FailingStore;

#[async_trait]
impl ImageConfigStore for FailingStore {
    async fn load(&self, _owner: &PackageKey) -> StorageResult<Option<StoredImageConfig>> {
        Ok(None)
    }

    async fn save(
        &self,
        _owner: &PackageKey,
        _config: &ImageBuildConfig,
    ) -> StorageResult<StoredImageConfig> {
        Err(StorageError::Backend("disk full".to_string()))
    }

    async fn delete(&self, _owner: &PackageKey) -> StorageResult<()> {
        Ok(())
    }

    async fn list(&self) -> StorageResult<Vec<PackageKey>> {
        Ok(Vec::new())
    }
}

#[tokio::test]
async fn storage_failure_keeps_draft() {
    let backend = Arc::new(RecordingBackend::new());
    let mut editor = open(Arc::new(FailingStore), backend).await;
    editor.add_repository("home:tom", "images").unwrap();
    editor.set_contact(Some("tom@example.org"));

    let err = editor.save().await.unwrap_err();

    assert!(matches!(err, ImageConfigError::Storage(_)));
    assert!(editor.is_dirty());
    assert_eq!(editor.revision(), 0);
    assert_eq!(editor.config().repositories.len(), 1);
}
