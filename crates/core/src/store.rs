use crate::credential::CredentialHash;
use crate::error::RegistryError;
use crate::models::DocumentRecord;
use crate::traits::RegistryStore;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

pub const SNAPSHOT_VERSION: u32 = 1;

/// Everything the registry persists. Documents are kept sorted by id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RegistrySnapshot {
    pub version: u32,
    pub admin_credential: CredentialHash,
    pub active_document: Option<String>,
    pub documents: BTreeMap<String, DocumentRecord>,
}

impl RegistrySnapshot {
    pub fn new(admin_credential: CredentialHash) -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            admin_credential,
            active_document: None,
            documents: BTreeMap::new(),
        }
    }
}

/// On-disk layout under one data directory.
#[derive(Debug, Clone)]
pub struct DataLayout {
    root: PathBuf,
}

impl DataLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn registry_path(&self) -> PathBuf {
        self.root.join("registry.json")
    }

    pub fn pdf_dir(&self) -> PathBuf {
        self.root.join("pdfs")
    }

    pub fn index_dir(&self) -> PathBuf {
        self.root.join("indexes")
    }

    pub fn pdf_path(&self, id: &str) -> PathBuf {
        self.pdf_dir().join(format!("{id}.pdf"))
    }

    /// Index artifacts are versioned per build so a rebuild never overwrites
    /// the artifact the registry currently points at.
    pub fn index_path(&self, id: &str, generation: &str) -> PathBuf {
        self.index_dir().join(format!("{id}.{generation}.json"))
    }

    pub fn next_index_path(&self, id: &str) -> PathBuf {
        let generation = uuid::Uuid::new_v4().simple().to_string();
        self.index_path(id, &generation)
    }

    pub async fn ensure_dirs(&self) -> std::io::Result<()> {
        tokio::fs::create_dir_all(self.pdf_dir()).await?;
        tokio::fs::create_dir_all(self.index_dir()).await
    }
}

/// Writes `bytes` next to `path` and renames the file into place, so readers
/// never observe a half-written file.
pub(crate) async fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp_path = PathBuf::from(tmp_name);

    tokio::fs::write(&tmp_path, bytes).await?;
    tokio::fs::rename(&tmp_path, path).await
}

/// Removes a file, treating an already missing file as success.
pub(crate) async fn remove_if_exists(path: &Path) -> std::io::Result<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(error) => Err(error),
    }
}

#[derive(Default)]
pub struct MemoryRegistryStore {
    snapshot: Mutex<Option<RegistrySnapshot>>,
}

impl MemoryRegistryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RegistryStore for MemoryRegistryStore {
    async fn load(&self) -> Result<Option<RegistrySnapshot>, RegistryError> {
        Ok(self.snapshot.lock().await.clone())
    }

    async fn save(&self, snapshot: &RegistrySnapshot) -> Result<(), RegistryError> {
        *self.snapshot.lock().await = Some(snapshot.clone());
        Ok(())
    }
}

pub struct JsonFileRegistryStore {
    path: PathBuf,
}

impl JsonFileRegistryStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn for_layout(layout: &DataLayout) -> Self {
        Self::new(layout.registry_path())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl RegistryStore for JsonFileRegistryStore {
    async fn load(&self) -> Result<Option<RegistrySnapshot>, RegistryError> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(error) => return Err(error.into()),
        };

        let snapshot: RegistrySnapshot = serde_json::from_slice(&bytes)?;
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(RegistryError::InvalidArgument(format!(
                "unsupported registry version {} in {}",
                snapshot.version,
                self.path.display()
            )));
        }
        Ok(Some(snapshot))
    }

    async fn save(&self, snapshot: &RegistrySnapshot) -> Result<(), RegistryError> {
        let bytes = serde_json::to_vec_pretty(snapshot)?;
        write_atomic(&self.path, &bytes).await?;
        Ok(())
    }
}
