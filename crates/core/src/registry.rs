//! Document registry: the single source of truth for which documents exist,
//! whether they are queryable, and which index artifact backs each of them.
//!
//! Every mutation is applied to a copy of the current snapshot, saved through
//! the [`RegistryStore`], and only then made visible. Operations that touch the
//! files of one document (`register`, `build_index`, `delete`) are mutually
//! exclusive per id; a second one is rejected with [`RegistryError::Busy`].
//! Different ids proceed in parallel.

use crate::chunking::ChunkingConfig;
use crate::config::ChatConfig;
use crate::credential::CredentialHash;
use crate::error::RegistryError;
use crate::extractor::{LopdfExtractor, PdfExtractor};
use crate::index::EmbeddingIndex;
use crate::ingest::{digest_bytes, is_valid_document_id, prepare_chunks};
use crate::models::{DocumentRecord, DocumentStatus};
use crate::store::{remove_if_exists, write_atomic, DataLayout, RegistrySnapshot};
use crate::traits::{Embedder, RegistryStore};
use chrono::Utc;
use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy)]
pub struct IndexingOptions {
    pub chunking: ChunkingConfig,
    /// Bound for each embedding request.
    pub timeout: Duration,
}

impl Default for IndexingOptions {
    fn default() -> Self {
        Self {
            chunking: ChunkingConfig::default(),
            timeout: Duration::from_secs(60),
        }
    }
}

impl From<&ChatConfig> for IndexingOptions {
    fn from(config: &ChatConfig) -> Self {
        Self {
            chunking: config.chunking,
            timeout: config.provider.request_timeout(),
        }
    }
}

/// Proof that the caller presented the admin credential.
#[derive(Debug, Clone)]
pub struct AdminToken {
    _private: (),
}

struct InFlight<'a> {
    ids: &'a Mutex<HashSet<String>>,
    id: String,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.ids
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.id);
    }
}

pub struct DocumentRegistry {
    layout: DataLayout,
    store: Box<dyn RegistryStore>,
    extractor: Arc<dyn PdfExtractor>,
    options: IndexingOptions,
    snapshot: RwLock<RegistrySnapshot>,
    in_flight: Mutex<HashSet<String>>,
}

impl DocumentRegistry {
    /// Opens the registry, creating it with `initial_secret` as the admin
    /// credential when the store is empty. An existing credential is kept.
    pub async fn open(
        layout: DataLayout,
        store: Box<dyn RegistryStore>,
        options: IndexingOptions,
        initial_secret: &str,
    ) -> Result<Self, RegistryError> {
        options.chunking.validate()?;
        layout.ensure_dirs().await?;

        let snapshot = match store.load().await? {
            Some(snapshot) => snapshot,
            None => {
                if initial_secret.is_empty() {
                    return Err(RegistryError::InvalidArgument(
                        "initial admin secret must not be empty".to_string(),
                    ));
                }
                let snapshot = RegistrySnapshot::new(CredentialHash::new(initial_secret));
                store.save(&snapshot).await?;
                info!(root = %layout.root().display(), "created new document registry");
                snapshot
            }
        };

        let (snapshot, repaired) = reconcile(snapshot).await;
        if repaired {
            store.save(&snapshot).await?;
        }

        info!(documents = snapshot.documents.len(), "document registry opened");
        Ok(Self {
            layout,
            store,
            extractor: Arc::new(LopdfExtractor),
            options,
            snapshot: RwLock::new(snapshot),
            in_flight: Mutex::new(HashSet::new()),
        })
    }

    pub fn with_extractor(mut self, extractor: Arc<dyn PdfExtractor>) -> Self {
        self.extractor = extractor;
        self
    }

    pub fn layout(&self) -> &DataLayout {
        &self.layout
    }

    pub async fn authenticate(&self, secret: &str) -> Result<AdminToken, RegistryError> {
        let snapshot = self.snapshot.read().await;
        if snapshot.admin_credential.verify(secret) {
            Ok(AdminToken { _private: () })
        } else {
            warn!("admin authentication failed");
            Err(RegistryError::Unauthorized)
        }
    }

    pub async fn change_credential(
        &self,
        _token: &AdminToken,
        new_secret: &str,
    ) -> Result<(), RegistryError> {
        if new_secret.is_empty() {
            return Err(RegistryError::InvalidArgument(
                "admin secret must not be empty".to_string(),
            ));
        }

        let credential = CredentialHash::new(new_secret);
        self.commit(move |snapshot| {
            snapshot.admin_credential = credential;
            Ok(())
        })
        .await?;
        info!("admin credential changed");
        Ok(())
    }

    /// Stores a new document as `unprocessed` and makes it the active one.
    /// Existing ids are never overwritten.
    pub async fn register(
        &self,
        _token: &AdminToken,
        id: &str,
        description: &str,
        content: &[u8],
    ) -> Result<DocumentRecord, RegistryError> {
        if !is_valid_document_id(id) {
            return Err(RegistryError::InvalidId(id.to_string()));
        }
        if content.is_empty() {
            return Err(RegistryError::InvalidArgument(format!(
                "document {id} has no content"
            )));
        }

        let _claim = self.claim(id)?;
        if self.snapshot.read().await.documents.contains_key(id) {
            return Err(RegistryError::DuplicateId(id.to_string()));
        }

        let source_path = self.layout.pdf_path(id);
        write_atomic(&source_path, content).await?;

        let record = DocumentRecord {
            id: id.to_string(),
            description: description.trim().to_string(),
            status: DocumentStatus::Unprocessed,
            source_path: source_path.clone(),
            index_path: None,
            checksum: digest_bytes(content),
            chunk_count: None,
            registered_at: Utc::now(),
            processed_at: None,
        };

        let inserted = record.clone();
        let committed = self
            .commit(move |snapshot| {
                snapshot.documents.insert(inserted.id.clone(), inserted.clone());
                snapshot.active_document = Some(inserted.id);
                Ok(())
            })
            .await;

        if let Err(error) = committed {
            if let Err(cleanup) = remove_if_exists(&source_path).await {
                warn!(document_id = id, error = %cleanup, "failed to remove orphaned upload");
            }
            return Err(error);
        }

        info!(document_id = id, bytes = content.len(), "document registered");
        Ok(record)
    }

    /// Extracts, chunks and embeds a document, then swaps its index in. On any
    /// failure the record and any previous index stay exactly as they were.
    pub async fn build_index(
        &self,
        _token: &AdminToken,
        id: &str,
        embedder: &dyn Embedder,
    ) -> Result<DocumentRecord, RegistryError> {
        let _claim = self.claim(id)?;
        let started = Instant::now();

        let result = self.build_index_claimed(id, embedder).await;
        match &result {
            Ok(record) => info!(
                document_id = id,
                chunk_count = record.chunk_count.unwrap_or_default(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "document processed"
            ),
            Err(error) => warn!(
                document_id = id,
                %error,
                retryable = error.is_retryable(),
                "document processing failed"
            ),
        }
        result
    }

    async fn build_index_claimed(
        &self,
        id: &str,
        embedder: &dyn Embedder,
    ) -> Result<DocumentRecord, RegistryError> {
        let record = self.get(id).await?;
        let bytes = tokio::fs::read(&record.source_path).await?;

        let extractor = Arc::clone(&self.extractor);
        let chunking = self.options.chunking;
        let document_id = id.to_string();
        let chunks = tokio::task::spawn_blocking(move || {
            prepare_chunks(&document_id, &bytes, extractor.as_ref(), chunking)
        })
        .await
        .map_err(|error| RegistryError::Io(std::io::Error::other(error)))??;

        let index = EmbeddingIndex::build(&chunks, embedder, self.options.timeout).await?;
        let staged_path = self.layout.next_index_path(id);
        index.persist(&staged_path).await?;

        let chunk_count = index.len();
        let document_id = id.to_string();
        let index_path = staged_path.clone();
        let committed = self
            .commit(move |snapshot| {
                let record = snapshot
                    .documents
                    .get_mut(&document_id)
                    .ok_or_else(|| RegistryError::NotFound(document_id.clone()))?;
                let previous = record.index_path.replace(index_path);
                record.status = DocumentStatus::Processed;
                record.chunk_count = Some(chunk_count);
                record.processed_at = Some(Utc::now());
                Ok((record.clone(), previous))
            })
            .await;

        match committed {
            Ok((record, previous)) => {
                if let Some(previous) = previous.filter(|path| *path != staged_path) {
                    if let Err(error) = remove_if_exists(&previous).await {
                        warn!(document_id = id, %error, "failed to remove superseded index");
                    }
                }
                Ok(record)
            }
            Err(error) => {
                if let Err(cleanup) = remove_if_exists(&staged_path).await {
                    warn!(document_id = id, error = %cleanup, "failed to remove staged index");
                }
                Err(error)
            }
        }
    }

    /// Removes the document, its stored bytes and its index. When it was the
    /// active document, the lowest remaining id becomes active.
    pub async fn delete(&self, _token: &AdminToken, id: &str) -> Result<(), RegistryError> {
        let _claim = self.claim(id)?;

        let document_id = id.to_string();
        let removed = self
            .commit(move |snapshot| {
                let record = snapshot
                    .documents
                    .remove(&document_id)
                    .ok_or_else(|| RegistryError::NotFound(document_id.clone()))?;
                if snapshot.active_document.as_deref() == Some(document_id.as_str()) {
                    snapshot.active_document = snapshot.documents.keys().next().cloned();
                }
                Ok(record)
            })
            .await?;

        remove_if_exists(&removed.source_path).await?;
        if let Some(index_path) = &removed.index_path {
            remove_if_exists(index_path).await?;
        }

        info!(document_id = id, "document deleted");
        Ok(())
    }

    pub async fn list(&self) -> BTreeMap<String, DocumentRecord> {
        self.snapshot.read().await.documents.clone()
    }

    pub async fn get(&self, id: &str) -> Result<DocumentRecord, RegistryError> {
        self.snapshot
            .read()
            .await
            .documents
            .get(id)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))
    }

    pub async fn active_document(&self) -> Option<DocumentRecord> {
        let snapshot = self.snapshot.read().await;
        snapshot
            .active_document
            .as_ref()
            .and_then(|id| snapshot.documents.get(id))
            .cloned()
    }

    pub async fn set_active(&self, id: &str) -> Result<(), RegistryError> {
        let document_id = id.to_string();
        self.commit(move |snapshot| {
            if !snapshot.documents.contains_key(&document_id) {
                return Err(RegistryError::NotFound(document_id));
            }
            snapshot.active_document = Some(document_id);
            Ok(())
        })
        .await
    }

    pub async fn load_index(&self, id: &str) -> Result<EmbeddingIndex, RegistryError> {
        let record = self.get(id).await?;
        match (&record.status, &record.index_path) {
            (DocumentStatus::Processed, Some(path)) => Ok(EmbeddingIndex::load(path).await?),
            _ => Err(RegistryError::NotProcessed(id.to_string())),
        }
    }

    fn claim(&self, id: &str) -> Result<InFlight<'_>, RegistryError> {
        let mut ids = self
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if !ids.insert(id.to_string()) {
            return Err(RegistryError::Busy(id.to_string()));
        }
        Ok(InFlight {
            ids: &self.in_flight,
            id: id.to_string(),
        })
    }

    async fn commit<T, F>(&self, mutate: F) -> Result<T, RegistryError>
    where
        F: FnOnce(&mut RegistrySnapshot) -> Result<T, RegistryError>,
    {
        let mut current = self.snapshot.write().await;
        let mut next = current.clone();
        let output = mutate(&mut next)?;
        self.store.save(&next).await?;
        *current = next;
        Ok(output)
    }
}

/// Downgrades records whose index artifact has gone missing and repairs a
/// dangling active selection.
async fn reconcile(mut snapshot: RegistrySnapshot) -> (RegistrySnapshot, bool) {
    let mut repaired = false;

    for record in snapshot.documents.values_mut() {
        let index_present = match &record.index_path {
            Some(path) => tokio::fs::try_exists(path).await.unwrap_or(false),
            None => false,
        };
        if record.status == DocumentStatus::Processed && !index_present {
            warn!(document_id = %record.id, "index artifact missing; marking unprocessed");
            record.status = DocumentStatus::Unprocessed;
            record.index_path = None;
            record.chunk_count = None;
            record.processed_at = None;
            repaired = true;
        } else if record.status == DocumentStatus::Unprocessed && record.index_path.is_some() {
            record.index_path = None;
            repaired = true;
        }
    }

    let dangling = snapshot
        .active_document
        .as_ref()
        .is_some_and(|id| !snapshot.documents.contains_key(id));
    if dangling {
        snapshot.active_document = snapshot.documents.keys().next().cloned();
        repaired = true;
    }

    (snapshot, repaired)
}
